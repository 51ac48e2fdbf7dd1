//! TOML-based configuration for Meridian
//!
//! Every tuned routing constant, the reasoning-service provider, handler
//! prompts and insight thresholds are declared in `meridian.toml`. Every
//! section is optional and falls back to the shipped defaults.
//!
//! Secrets are never stored in the file; the `[llm]` section names the
//! environment variable that holds the API key.

use crate::agents::aggregator::InsightThresholds;
use crate::agents::router::{RoutingThresholds, TriggerTable};
use crate::agents::scheduler::SchedulerConfig;
use crate::llm::{GenerationSettings, Provider};
use crate::types::{AppError, HandlerId, CONFIDENCE_CEILING};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Root configuration structure loaded from meridian.toml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MeridianConfig {
    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub routing: RoutingConfig,

    #[serde(default)]
    pub scheduler: SchedulerSettings,

    #[serde(default)]
    pub aggregator: AggregatorConfig,

    /// Per-handler overrides, keyed by registry name
    #[serde(default)]
    pub handlers: HashMap<String, HandlerConfig>,

    #[serde(default)]
    pub memory: MemoryConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

// ============= LLM Configuration =============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAI,
    Ollama,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: ProviderKind,

    /// Chat-completions base URL; defaults per provider
    pub api_base: Option<String>,

    /// Environment variable containing the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_provider() -> ProviderKind {
    ProviderKind::OpenAI
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_temperature() -> f32 {
    0.2
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_openai_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_ollama_base() -> String {
    "http://localhost:11434/v1".to_string()
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            api_base: None,
            api_key_env: default_api_key_env(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl LlmConfig {
    pub fn generation_settings(&self) -> GenerationSettings {
        GenerationSettings {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }

    /// Resolves the provider, reading the API key from the environment.
    pub fn provider(&self) -> Result<Provider, ConfigError> {
        match self.provider {
            ProviderKind::OpenAI => {
                let api_key = std::env::var(&self.api_key_env)
                    .map_err(|_| ConfigError::MissingEnvVar(self.api_key_env.clone()))?;
                Ok(Provider::OpenAI {
                    api_key,
                    api_base: self.api_base.clone().unwrap_or_else(default_openai_base),
                    model: self.model.clone(),
                })
            }
            ProviderKind::Ollama => Ok(Provider::Ollama {
                base_url: self.api_base.clone().unwrap_or_else(default_ollama_base),
                model: self.model.clone(),
            }),
        }
    }
}

// ============= Routing Configuration =============

/// Extra triggers for one handler
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggerConfig {
    #[serde(default)]
    pub keywords: Vec<String>,

    #[serde(default)]
    pub phrases: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Consult the reasoning service for low-confidence decisions
    #[serde(default = "default_true")]
    pub fallback_enabled: bool,

    #[serde(default = "default_fallback_threshold")]
    pub fallback_threshold: f64,

    #[serde(default = "default_fallback_timeout_ms")]
    pub fallback_timeout_ms: u64,

    #[serde(default = "default_multi_intent_min_score")]
    pub multi_intent_min_score: u32,

    #[serde(default = "default_conjunction_min_score")]
    pub conjunction_min_score: u32,

    #[serde(default = "default_comprehensive_min_score")]
    pub comprehensive_min_score: u32,

    #[serde(default = "default_score_divisor")]
    pub score_divisor: f64,

    #[serde(default = "default_multi_intent_confidence")]
    pub multi_intent_confidence: f64,

    #[serde(default = "default_comprehensive_confidence")]
    pub comprehensive_confidence: f64,

    #[serde(default = "default_default_confidence")]
    pub default_confidence: f64,

    /// Extra triggers, keyed by registry name
    #[serde(default)]
    pub triggers: HashMap<String, TriggerConfig>,

    #[serde(default)]
    pub comprehensive_triggers: Vec<String>,

    #[serde(default)]
    pub conjunctions: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_fallback_threshold() -> f64 {
    0.60
}

fn default_fallback_timeout_ms() -> u64 {
    10_000
}

fn default_multi_intent_min_score() -> u32 {
    2
}

fn default_conjunction_min_score() -> u32 {
    1
}

fn default_comprehensive_min_score() -> u32 {
    2
}

fn default_score_divisor() -> f64 {
    10.0
}

fn default_multi_intent_confidence() -> f64 {
    0.85
}

fn default_comprehensive_confidence() -> f64 {
    0.90
}

fn default_default_confidence() -> f64 {
    0.50
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            fallback_enabled: true,
            fallback_threshold: default_fallback_threshold(),
            fallback_timeout_ms: default_fallback_timeout_ms(),
            multi_intent_min_score: default_multi_intent_min_score(),
            conjunction_min_score: default_conjunction_min_score(),
            comprehensive_min_score: default_comprehensive_min_score(),
            score_divisor: default_score_divisor(),
            multi_intent_confidence: default_multi_intent_confidence(),
            comprehensive_confidence: default_comprehensive_confidence(),
            default_confidence: default_default_confidence(),
            triggers: HashMap::new(),
            comprehensive_triggers: Vec::new(),
            conjunctions: Vec::new(),
        }
    }
}

impl RoutingConfig {
    pub fn thresholds(&self) -> RoutingThresholds {
        RoutingThresholds {
            multi_intent_min_score: self.multi_intent_min_score,
            conjunction_min_score: self.conjunction_min_score,
            comprehensive_min_score: self.comprehensive_min_score,
            score_divisor: self.score_divisor,
            multi_intent_confidence: self.multi_intent_confidence,
            comprehensive_confidence: self.comprehensive_confidence,
            default_confidence: self.default_confidence,
            fallback_threshold: self.fallback_threshold,
        }
    }

    pub fn fallback_timeout(&self) -> Duration {
        Duration::from_millis(self.fallback_timeout_ms)
    }

    /// The built-in trigger table extended with the configured triggers.
    ///
    /// Triggers are lowercased so they match the lowercased request text.
    pub fn trigger_table(&self) -> Result<TriggerTable, ConfigError> {
        let lower = |items: &[String]| -> Vec<String> {
            items.iter().map(|s| s.trim().to_lowercase()).collect()
        };

        let mut table = TriggerTable::default();
        for (name, triggers) in &self.triggers {
            let handler = parse_handler(name)?;
            table.add_triggers(handler, lower(&triggers.keywords), lower(&triggers.phrases));
        }
        table.add_comprehensive(lower(&self.comprehensive_triggers));
        table.add_conjunctions(lower(&self.conjunctions));
        Ok(table)
    }
}

// ============= Scheduler Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    #[serde(default = "default_handler_timeout_secs")]
    pub handler_timeout_secs: u64,

    /// Run independent handlers concurrently
    #[serde(default = "default_true")]
    pub parallel: bool,
}

fn default_handler_timeout_secs() -> u64 {
    30
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            handler_timeout_secs: default_handler_timeout_secs(),
            parallel: true,
        }
    }
}

impl From<&SchedulerSettings> for SchedulerConfig {
    fn from(settings: &SchedulerSettings) -> Self {
        SchedulerConfig {
            handler_timeout: Duration::from_secs(settings.handler_timeout_secs),
            parallel: settings.parallel,
        }
    }
}

// ============= Aggregator Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Delay rate (percent) above which delays count as high
    #[serde(default = "default_high_delay_rate")]
    pub high_delay_rate: f64,

    /// Delay rate (percent) below which delivery counts as healthy
    #[serde(default = "default_low_delay_rate")]
    pub low_delay_rate: f64,

    #[serde(default = "default_revenue_impact_delay_rate")]
    pub revenue_impact_delay_rate: f64,
}

fn default_high_delay_rate() -> f64 {
    10.0
}

fn default_low_delay_rate() -> f64 {
    5.0
}

fn default_revenue_impact_delay_rate() -> f64 {
    8.0
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            high_delay_rate: default_high_delay_rate(),
            low_delay_rate: default_low_delay_rate(),
            revenue_impact_delay_rate: default_revenue_impact_delay_rate(),
        }
    }
}

impl From<&AggregatorConfig> for InsightThresholds {
    fn from(config: &AggregatorConfig) -> Self {
        InsightThresholds {
            high_delay_rate: config.high_delay_rate,
            low_delay_rate: config.low_delay_rate,
            revenue_impact_delay_rate: config.revenue_impact_delay_rate,
        }
    }
}

// ============= Handler Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerConfig {
    /// Replaces the built-in system prompt
    pub system_prompt: Option<String>,

    /// Replaces the built-in comprehensive-mode prompt
    pub canonical_prompt: Option<String>,

    #[serde(default = "default_true")]
    pub use_retrieval: bool,

    /// Handlers whose output this one is grounded on
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            system_prompt: None,
            canonical_prompt: None,
            use_retrieval: true,
            depends_on: Vec::new(),
        }
    }
}

// ============= Memory, Logging & Retrieval =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Prior turns handed to the reasoning service
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
}

fn default_history_window() -> usize {
    crate::memory::DEFAULT_HISTORY_WINDOW
}

fn default_max_turns() -> usize {
    crate::memory::MAX_STORED_TURNS
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            history_window: default_history_window(),
            max_turns: default_max_turns(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Directory of `.md`/`.txt` policy documents
    pub documents_dir: Option<PathBuf>,
}

// ============= Configuration Loading & Validation =============

/// Errors that can occur during configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Unknown handler '{0}' in configuration")]
    UnknownHandler(String),

    #[error("Environment variable '{0}' referenced in config is not set")]
    MissingEnvVar(String),
}

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        AppError::Configuration(err.to_string())
    }
}

fn parse_handler(name: &str) -> Result<HandlerId, ConfigError> {
    name.parse::<HandlerId>()
        .map_err(|_| ConfigError::UnknownHandler(name.to_string()))
}

impl MeridianConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let config = Self::parse(&content)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Load `path` if it exists, otherwise the built-in defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            info!(path = %path.display(), "No configuration file, using defaults");
            Ok(Self::default())
        }
    }

    /// Parse and validate configuration text
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: MeridianConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration for internal consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        let routing = &self.routing;

        if !(0.0..=1.0).contains(&routing.fallback_threshold) {
            return Err(ConfigError::ValidationError(format!(
                "routing.fallback_threshold must be within [0, 1], got {}",
                routing.fallback_threshold
            )));
        }

        for (name, value) in [
            ("multi_intent_confidence", routing.multi_intent_confidence),
            ("comprehensive_confidence", routing.comprehensive_confidence),
            ("default_confidence", routing.default_confidence),
        ] {
            if !(0.0..=CONFIDENCE_CEILING).contains(&value) {
                return Err(ConfigError::ValidationError(format!(
                    "routing.{} must be within [0, {}], got {}",
                    name, CONFIDENCE_CEILING, value
                )));
            }
        }

        if routing.score_divisor <= 0.0 {
            return Err(ConfigError::ValidationError(
                "routing.score_divisor must be positive".to_string(),
            ));
        }

        if routing.fallback_timeout_ms == 0 || self.scheduler.handler_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "timeouts must be greater than zero".to_string(),
            ));
        }

        if self.aggregator.low_delay_rate > self.aggregator.high_delay_rate {
            return Err(ConfigError::ValidationError(format!(
                "aggregator.low_delay_rate ({}) exceeds high_delay_rate ({})",
                self.aggregator.low_delay_rate, self.aggregator.high_delay_rate
            )));
        }

        for name in routing.triggers.keys() {
            parse_handler(name)?;
        }

        for (name, handler) in &self.handlers {
            let id = parse_handler(name)?;
            for dep in &handler.depends_on {
                if parse_handler(dep)? == id {
                    return Err(ConfigError::ValidationError(format!(
                        "handler '{}' depends on itself",
                        name
                    )));
                }
            }
        }

        Ok(())
    }

    /// Get a resolved value from an env var reference
    pub fn resolve_env(&self, env_name: &str) -> Option<String> {
        std::env::var(env_name).ok()
    }

    /// Handler overrides for `id`, or the defaults when none are configured.
    pub fn handler(&self, id: HandlerId) -> HandlerConfig {
        self.handlers
            .iter()
            .find(|(name, _)| name.parse::<HandlerId>().ok() == Some(id))
            .map(|(_, config)| config.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_test_config() -> String {
        r#"
[llm]
provider = "ollama"
model = "llama3.2"

[routing]
fallback_threshold = 0.7
conjunctions = ["Together With"]

[routing.triggers.delay]
keywords = ["Courier"]
phrases = ["stuck in transit"]

[scheduler]
handler_timeout_secs = 5
parallel = false

[handlers.analytics]
depends_on = ["data_query"]
use_retrieval = false

[handlers.forecasting]
canonical_prompt = "Forecast demand for 90 days"

[logging]
level = "debug"
json = true
"#
        .to_string()
    }

    #[test]
    fn test_parse_config() {
        let config = MeridianConfig::parse(&create_test_config()).unwrap();

        assert_eq!(config.llm.provider, ProviderKind::Ollama);
        assert_eq!(config.routing.fallback_threshold, 0.7);
        assert_eq!(config.routing.multi_intent_confidence, 0.85);
        assert!(!config.scheduler.parallel);
        assert!(config.logging.json);
        assert_eq!(config.memory.history_window, 5);
    }

    #[test]
    fn test_defaults() {
        let config = MeridianConfig::parse("").unwrap();
        assert_eq!(config.routing.thresholds(), RoutingThresholds::default());
        assert!(config.routing.fallback_enabled);
        assert_eq!(config.scheduler.handler_timeout_secs, 30);
        assert_eq!(config.logging.level, "info");
        assert!(config.retrieval.documents_dir.is_none());
    }

    #[test]
    fn test_handler_lookup() {
        let config = MeridianConfig::parse(&create_test_config()).unwrap();

        let analytics = config.handler(HandlerId::Analytics);
        assert_eq!(analytics.depends_on, vec!["data_query".to_string()]);
        assert!(!analytics.use_retrieval);

        let forecasting = config.handler(HandlerId::Forecasting);
        assert_eq!(
            forecasting.canonical_prompt.as_deref(),
            Some("Forecast demand for 90 days")
        );

        assert!(config.handler(HandlerId::Delay).use_retrieval);
    }

    #[test]
    fn test_configured_triggers_extend_table() {
        let config = MeridianConfig::parse(&create_test_config()).unwrap();
        let table = config.routing.trigger_table().unwrap();

        assert_eq!(table.score(HandlerId::Delay, "courier stuck in transit"), 3);
        assert!(table.has_conjunction("delay together with demand"));
    }

    #[test]
    fn test_unknown_handler_key_rejected() {
        let result = MeridianConfig::parse("[handlers.inventory]\nuse_retrieval = false\n");
        assert!(matches!(result, Err(ConfigError::UnknownHandler(name)) if name == "inventory"));

        let result = MeridianConfig::parse("[routing.triggers.returns]\nkeywords = [\"refund\"]\n");
        assert!(matches!(result, Err(ConfigError::UnknownHandler(_))));
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let result = MeridianConfig::parse("[handlers.analytics]\ndepends_on = [\"warehouse\"]\n");
        assert!(matches!(result, Err(ConfigError::UnknownHandler(_))));
    }

    #[test]
    fn test_self_dependency_rejected() {
        let result = MeridianConfig::parse("[handlers.delay]\ndepends_on = [\"delay\"]\n");
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_confidence_above_ceiling_rejected() {
        let result = MeridianConfig::parse("[routing]\ncomprehensive_confidence = 0.99\n");
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(create_test_config().as_bytes()).unwrap();

        let config = MeridianConfig::load(file.path()).unwrap();
        assert_eq!(config.llm.model, "llama3.2");
    }

    #[test]
    fn test_load_missing_file() {
        let result = MeridianConfig::load("/nonexistent/meridian.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));

        let config = MeridianConfig::load_or_default("/nonexistent/meridian.toml").unwrap();
        assert_eq!(config.llm.model, "gpt-4o-mini");
    }

    #[test]
    fn test_openai_provider_requires_key() {
        let config = MeridianConfig::parse(
            "[llm]\nprovider = \"openai\"\napi_key_env = \"MERIDIAN_TEST_UNSET_KEY\"\n",
        )
        .unwrap();
        assert!(matches!(
            config.llm.provider(),
            Err(ConfigError::MissingEnvVar(name)) if name == "MERIDIAN_TEST_UNSET_KEY"
        ));
    }

    #[test]
    fn test_ollama_provider_defaults_base() {
        let config = MeridianConfig::parse(&create_test_config()).unwrap();
        match config.llm.provider().unwrap() {
            Provider::Ollama { base_url, model } => {
                assert_eq!(base_url, "http://localhost:11434/v1");
                assert_eq!(model, "llama3.2");
            }
            other => panic!("unexpected provider {:?}", other),
        }
    }

    #[test]
    fn test_config_error_maps_to_configuration() {
        let err: AppError = ConfigError::ValidationError("bad".to_string()).into();
        assert!(matches!(err, AppError::Configuration(_)));
    }
}
