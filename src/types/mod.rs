use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

/// Hard ceiling for every routing confidence. Nothing is ever fully certain.
pub const CONFIDENCE_CEILING: f64 = 0.95;

// ============= Handler Types =============

/// Closed set of domain handlers the router may select.
///
/// Variants are declared in static priority order, so the derived `Ord`
/// agrees with [`HandlerId::priority`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerId {
    DataQuery,
    Delay,
    Analytics,
    Forecasting,
}

impl HandlerId {
    /// Every registered handler, in static priority order.
    pub const ALL: [HandlerId; 4] = [
        HandlerId::DataQuery,
        HandlerId::Delay,
        HandlerId::Analytics,
        HandlerId::Forecasting,
    ];

    /// Execution priority. Lower runs first.
    pub fn priority(self) -> u8 {
        match self {
            HandlerId::DataQuery => 1,
            HandlerId::Delay => 2,
            HandlerId::Analytics => 3,
            HandlerId::Forecasting => 4,
        }
    }

    /// Registry key, as used in configuration and in the reasoning-service contract.
    pub fn as_str(self) -> &'static str {
        match self {
            HandlerId::DataQuery => "data_query",
            HandlerId::Delay => "delay",
            HandlerId::Analytics => "analytics",
            HandlerId::Forecasting => "forecasting",
        }
    }

    /// Section title used when merging handler output.
    pub fn title(self) -> &'static str {
        match self {
            HandlerId::DataQuery => "DATA QUERY RESULTS",
            HandlerId::Delay => "DELIVERY PERFORMANCE",
            HandlerId::Analytics => "REVENUE & ANALYTICS",
            HandlerId::Forecasting => "DEMAND FORECAST",
        }
    }

    /// Fixed prompt used in comprehensive mode instead of the user's text.
    pub fn canonical_prompt(self) -> &'static str {
        match self {
            HandlerId::DataQuery => "Summarize order volume by state and status",
            HandlerId::Delay => "Get delivery delay statistics",
            HandlerId::Analytics => "Get revenue and customer analysis",
            HandlerId::Forecasting => "Forecast demand for 30 days",
        }
    }

    /// Human-readable name for summaries and failure notes.
    pub fn display_name(self) -> &'static str {
        match self {
            HandlerId::DataQuery => "Data Query",
            HandlerId::Delay => "Delay",
            HandlerId::Analytics => "Analytics",
            HandlerId::Forecasting => "Forecasting",
        }
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HandlerId {
    type Err = AppError;

    /// Validates a name against the static registry.
    ///
    /// Case and `-`/space separators are normalized; anything else that is
    /// not an exact registry key is rejected.
    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_lowercase().replace(['-', ' '], "_");
        HandlerId::ALL
            .into_iter()
            .find(|id| id.as_str() == normalized)
            .ok_or_else(|| AppError::UnknownHandler(s.trim().to_string()))
    }
}

// ============= Classification Types =============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    Policy,
    Data,
    Mixed,
}

/// Upstream decision about retrieval and data-source needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub query_type: QueryType,
    pub use_retrieval: bool,
    pub use_data_source: bool,
    pub confidence: f64,
    pub domain: HandlerId,
}

impl Classification {
    /// Classification used when the classifier cannot produce one.
    pub fn unavailable() -> Self {
        Self {
            query_type: QueryType::Data,
            use_retrieval: false,
            use_data_source: true,
            confidence: 0.0,
            domain: HandlerId::Analytics,
        }
    }
}

impl Default for Classification {
    fn default() -> Self {
        Self::unavailable()
    }
}

// ============= Request Types =============

/// A completed exchange, kept for multi-turn context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub request: String,
    pub response: String,
    pub handlers: Vec<HandlerId>,
    pub timestamp: DateTime<Utc>,
}

/// One user request. Immutable once created.
#[derive(Debug, Clone)]
pub struct Request {
    id: Uuid,
    text: String,
    history: Arc<Vec<Turn>>,
}

impl Request {
    pub fn new(text: impl Into<String>) -> Self {
        Self::with_history(text, Arc::new(Vec::new()))
    }

    /// Creates a request carrying a snapshot of prior turns.
    pub fn with_history(text: impl Into<String>, history: Arc<Vec<Turn>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            history,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn history(&self) -> &[Turn] {
        &self.history
    }
}

// ============= Routing Types =============

/// Which routing tier produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolvedBy {
    Keyword,
    Fallback,
}

/// How the scheduler should invoke the selected handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// One handler, full request text.
    Single,
    /// Several handlers, each with its decomposed sub-requests.
    Multi,
    /// Every handler, each with its canonical prompt.
    Comprehensive,
}

/// A decomposed fragment of a compound request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubRequest {
    pub text: String,
    pub handler: HandlerId,
}

impl SubRequest {
    pub fn new(text: impl Into<String>, handler: HandlerId) -> Self {
        Self {
            text: text.into(),
            handler,
        }
    }
}

/// Output of either routing tier, consumed by the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub primary_handler: HandlerId,
    pub handlers: BTreeSet<HandlerId>,
    pub confidence: f64,
    pub multi_intent: bool,
    pub sub_requests: Vec<SubRequest>,
    pub execution_order: Vec<HandlerId>,
    pub resolved_by: ResolvedBy,
    pub mode: DispatchMode,
}

/// Clamps a confidence into `[0, CONFIDENCE_CEILING]`. NaN maps to zero.
pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, CONFIDENCE_CEILING)
    }
}

impl RoutingDecision {
    pub fn single(handler: HandlerId, confidence: f64, resolved_by: ResolvedBy) -> Self {
        Self {
            primary_handler: handler,
            handlers: BTreeSet::from([handler]),
            confidence: clamp_confidence(confidence),
            multi_intent: false,
            sub_requests: Vec::new(),
            execution_order: vec![handler],
            resolved_by,
            mode: DispatchMode::Single,
        }
    }

    /// Multi-intent decision. `sub_requests` must cover every handler.
    pub fn multi(
        primary: HandlerId,
        handlers: BTreeSet<HandlerId>,
        sub_requests: Vec<SubRequest>,
        confidence: f64,
        resolved_by: ResolvedBy,
    ) -> Self {
        let execution_order = crate::agents::scheduler::order(handlers.iter().copied());
        Self {
            primary_handler: primary,
            handlers,
            confidence: clamp_confidence(confidence),
            multi_intent: true,
            sub_requests,
            execution_order,
            resolved_by,
            mode: DispatchMode::Multi,
        }
    }

    /// "Run everything" decision covering the whole registry.
    pub fn comprehensive(primary: HandlerId, confidence: f64, resolved_by: ResolvedBy) -> Self {
        Self {
            primary_handler: primary,
            handlers: HandlerId::ALL.into_iter().collect(),
            confidence: clamp_confidence(confidence),
            multi_intent: false,
            sub_requests: Vec::new(),
            execution_order: HandlerId::ALL.to_vec(),
            resolved_by,
            mode: DispatchMode::Comprehensive,
        }
    }

    /// Verifies the structural invariants every decision must hold.
    pub fn check_invariants(&self) -> Result<()> {
        if !(0.0..=CONFIDENCE_CEILING).contains(&self.confidence) {
            return Err(AppError::Internal(format!(
                "confidence {} outside [0, {}]",
                self.confidence, CONFIDENCE_CEILING
            )));
        }

        let ordered: BTreeSet<HandlerId> = self.execution_order.iter().copied().collect();
        if ordered.len() != self.execution_order.len() || ordered != self.handlers {
            return Err(AppError::Internal(format!(
                "execution order {:?} is not a permutation of {:?}",
                self.execution_order, self.handlers
            )));
        }

        if !self.handlers.contains(&self.primary_handler) {
            return Err(AppError::Internal(format!(
                "primary handler {} not among selected handlers",
                self.primary_handler
            )));
        }

        if self.multi_intent == self.sub_requests.is_empty() {
            return Err(AppError::Internal(
                "sub-requests must be present exactly when the decision is multi-intent"
                    .to_string(),
            ));
        }

        if let Some(stray) = self
            .sub_requests
            .iter()
            .find(|sub| !self.handlers.contains(&sub.handler))
        {
            return Err(AppError::Internal(format!(
                "sub-request assigned to unselected handler {}",
                stray.handler
            )));
        }

        if self.multi_intent {
            if let Some(missing) = self
                .handlers
                .iter()
                .find(|h| !self.sub_requests.iter().any(|sub| sub.handler == **h))
            {
                return Err(AppError::Internal(format!(
                    "handler {} has no sub-request",
                    missing
                )));
            }
        }

        Ok(())
    }
}

// ============= Handler Result Types =============

/// Small scalar fact extracted from a handler's answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Number(f64),
    Flag(bool),
    Text(String),
}

impl MetricValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetricValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetricValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<f64> for MetricValue {
    fn from(value: f64) -> Self {
        MetricValue::Number(value)
    }
}

impl From<bool> for MetricValue {
    fn from(value: bool) -> Self {
        MetricValue::Flag(value)
    }
}

impl From<&str> for MetricValue {
    fn from(value: &str) -> Self {
        MetricValue::Text(value.to_string())
    }
}

impl From<String> for MetricValue {
    fn from(value: String) -> Self {
        MetricValue::Text(value)
    }
}

/// Outcome of invoking one handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerResult {
    pub handler: HandlerId,
    pub text: String,
    pub used_retrieval: bool,
    pub extracted_metrics: BTreeMap<String, MetricValue>,
    pub success: bool,
    pub error: Option<String>,
}

impl HandlerResult {
    pub fn ok(handler: HandlerId, text: impl Into<String>) -> Self {
        Self {
            handler,
            text: text.into(),
            used_retrieval: false,
            extracted_metrics: BTreeMap::new(),
            success: true,
            error: None,
        }
    }

    pub fn failed(handler: HandlerId, error: impl Into<String>) -> Self {
        Self {
            handler,
            text: String::new(),
            used_retrieval: false,
            extracted_metrics: BTreeMap::new(),
            success: false,
            error: Some(error.into()),
        }
    }

    pub fn with_metric(mut self, key: impl Into<String>, value: impl Into<MetricValue>) -> Self {
        self.extracted_metrics.insert(key.into(), value.into());
        self
    }

    pub fn with_retrieval(mut self, used: bool) -> Self {
        self.used_retrieval = used;
        self
    }
}

// ============= Aggregation Types =============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub handler: HandlerId,
    pub title: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerFailure {
    pub handler: HandlerId,
    pub error: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    PartialSuccess,
    Failed,
}

/// Terminal artifact of one request, handed to a formatter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedResponse {
    pub sections: Vec<Section>,
    pub insights: Vec<String>,
    /// Every invoked handler, in priority order.
    pub handlers_used: Vec<HandlerId>,
    pub failures: Vec<HandlerFailure>,
    pub retrieval_used: bool,
    pub retrieval_handlers: Vec<HandlerId>,
    pub resolved_by: ResolvedBy,
    pub confidence: f64,
    pub outcome: Outcome,
}

impl AggregatedResponse {
    pub fn is_failure(&self) -> bool {
        self.outcome == Outcome::Failed
    }
}

// ============= Error Types =============

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("LLM error: {0}")]
    LLM(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unknown handler: {0}")]
    UnknownHandler(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Handler error: {0}")]
    Handler(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_id_parse_normalizes_case_and_separators() {
        assert_eq!("Delay".parse::<HandlerId>().unwrap(), HandlerId::Delay);
        assert_eq!("data-query".parse::<HandlerId>().unwrap(), HandlerId::DataQuery);
        assert_eq!(" DATA QUERY ".parse::<HandlerId>().unwrap(), HandlerId::DataQuery);
    }

    #[test]
    fn test_handler_id_parse_rejects_unknown() {
        let err = "inventory".parse::<HandlerId>().unwrap_err();
        assert!(matches!(err, AppError::UnknownHandler(name) if name == "inventory"));
    }

    #[test]
    fn test_priority_matches_declaration_order() {
        let mut sorted = HandlerId::ALL.to_vec();
        sorted.sort_by_key(|h| h.priority());
        assert_eq!(sorted, HandlerId::ALL.to_vec());
        assert!(HandlerId::DataQuery < HandlerId::Forecasting);
    }

    #[test]
    fn test_clamp_confidence() {
        assert_eq!(clamp_confidence(1.4), CONFIDENCE_CEILING);
        assert_eq!(clamp_confidence(-0.2), 0.0);
        assert_eq!(clamp_confidence(f64::NAN), 0.0);
        assert_eq!(clamp_confidence(0.42), 0.42);
    }

    #[test]
    fn test_single_decision_holds_invariants() {
        let decision = RoutingDecision::single(HandlerId::Delay, 2.0, ResolvedBy::Keyword);
        assert_eq!(decision.confidence, CONFIDENCE_CEILING);
        assert!(decision.check_invariants().is_ok());
    }

    #[test]
    fn test_multi_decision_requires_sub_request_per_handler() {
        let handlers = BTreeSet::from([HandlerId::Delay, HandlerId::Forecasting]);
        let decision = RoutingDecision::multi(
            HandlerId::Delay,
            handlers,
            vec![SubRequest::new("delay rate", HandlerId::Delay)],
            0.85,
            ResolvedBy::Keyword,
        );
        assert!(decision.check_invariants().is_err());
    }

    #[test]
    fn test_comprehensive_covers_registry() {
        let decision = RoutingDecision::comprehensive(HandlerId::Analytics, 0.9, ResolvedBy::Keyword);
        assert_eq!(decision.execution_order, HandlerId::ALL.to_vec());
        assert!(!decision.multi_intent);
        assert!(decision.check_invariants().is_ok());
    }

    #[test]
    fn test_metric_value_serializes_untagged() {
        let result = HandlerResult::ok(HandlerId::Delay, "ok")
            .with_metric("delay_rate", 12.5)
            .with_metric("forecast_trend", "increasing");
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["extracted_metrics"]["delay_rate"], 12.5);
        assert_eq!(json["extracted_metrics"]["forecast_trend"], "increasing");
    }
}
