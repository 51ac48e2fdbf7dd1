//! Configurable handler implementation
//!
//! A generic LLM-backed handler whose prompt, retrieval use and data
//! dependencies come from the `[handlers.<name>]` sections of
//! `meridian.toml`. One instance fills each registry slot.

use crate::agents::extract::MetricExtractor;
use crate::agents::Handler;
use crate::llm::LLMClient;
use crate::rag::Retriever;
use crate::types::{Classification, HandlerId, HandlerResult, QueryType, Result};
use crate::utils::toml_config::HandlerConfig;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// Answer given to policy questions when no document matched.
pub const NO_POLICY_DOCUMENTS: &str =
    "No policy documents found for this question. Add the relevant documents and ask again.";

/// Passages prepended to the prompt when retrieval is used.
const RETRIEVAL_TOP_K: usize = 3;

pub struct ConfigurableHandler {
    id: HandlerId,
    llm: Arc<dyn LLMClient>,
    system_prompt: String,
    canonical_prompt: String,
    use_retrieval: bool,
    retriever: Option<Arc<dyn Retriever>>,
    depends_on: Vec<HandlerId>,
    extractor: MetricExtractor,
}

impl ConfigurableHandler {
    /// Create a handler with the built-in prompts for `id`.
    pub fn new(id: HandlerId, llm: Arc<dyn LLMClient>) -> Result<Self> {
        Ok(Self {
            id,
            llm,
            system_prompt: Self::default_system_prompt(id).to_string(),
            canonical_prompt: id.canonical_prompt().to_string(),
            use_retrieval: true,
            retriever: None,
            depends_on: Vec::new(),
            extractor: MetricExtractor::new()?,
        })
    }

    /// Create a handler from its configuration section.
    ///
    /// `depends_on` names are validated against the registry.
    pub fn from_config(
        id: HandlerId,
        config: &HandlerConfig,
        llm: Arc<dyn LLMClient>,
        retriever: Option<Arc<dyn Retriever>>,
    ) -> Result<Self> {
        let depends_on = config
            .depends_on
            .iter()
            .map(|name| name.parse::<HandlerId>())
            .collect::<Result<Vec<_>>>()?;

        let mut handler = Self::new(id, llm)?.with_dependencies(depends_on);
        if let Some(prompt) = &config.system_prompt {
            handler.system_prompt = prompt.clone();
        }
        if let Some(prompt) = &config.canonical_prompt {
            handler.canonical_prompt = prompt.clone();
        }
        handler.use_retrieval = config.use_retrieval;
        handler.retriever = retriever;
        Ok(handler)
    }

    pub fn with_retriever(mut self, retriever: Arc<dyn Retriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    pub fn with_dependencies(mut self, depends_on: Vec<HandlerId>) -> Self {
        self.depends_on = depends_on;
        self
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    fn default_system_prompt(id: HandlerId) -> &'static str {
        match id {
            HandlerId::DataQuery => {
                r#"You are a Data Query handler for an e-commerce supply chain.
Answer lookups and listings of orders, customers, products and sellers.
Present records as compact tables and state the totals you report."#
            }
            HandlerId::Delay => {
                r#"You are a Delivery Performance handler.
Report delay rates as percentages (for example "Delay rate: 6.3%"), on-time rates,
and the states, categories or sellers most affected by late deliveries."#
            }
            HandlerId::Analytics => {
                r#"You are a Revenue & Analytics handler.
Handle revenue, sales performance, customer segments and payment analysis.
State total revenue explicitly when you report it."#
            }
            HandlerId::Forecasting => {
                r#"You are a Demand Forecasting handler.
Project demand and revenue for the requested horizon and say whether the
trend is increasing, decreasing or stable."#
            }
        }
    }

    async fn retrieve_context(&self, text: &str, classification: &Classification) -> Option<String> {
        if !(self.use_retrieval && classification.use_retrieval) {
            return None;
        }
        let retriever = self.retriever.as_ref()?;

        match retriever.retrieve(text, RETRIEVAL_TOP_K).await {
            Ok(passages) if !passages.is_empty() => Some(
                passages
                    .iter()
                    .map(|p| format!("[{}]\n{}", p.source, p.text.trim()))
                    .collect::<Vec<_>>()
                    .join("\n\n"),
            ),
            Ok(_) => None,
            Err(e) => {
                warn!(handler = %self.id, error = %e, "Retrieval failed");
                None
            }
        }
    }

    fn build_prompt(text: &str, context: Option<&str>, upstream: &[HandlerResult]) -> String {
        let mut prompt = String::new();
        if let Some(context) = context {
            prompt.push_str(&format!("Context from documents:\n{}\n\n", context));
        }
        for result in upstream {
            prompt.push_str(&format!(
                "Upstream {}:\n{}\n\n",
                result.handler.title(),
                result.text.trim()
            ));
        }
        prompt.push_str(&format!("User query: {}", text));
        prompt
    }
}

#[async_trait]
impl Handler for ConfigurableHandler {
    async fn invoke(&self, text: &str, classification: &Classification) -> HandlerResult {
        self.invoke_grounded(text, classification, &[]).await
    }

    async fn invoke_grounded(
        &self,
        text: &str,
        classification: &Classification,
        upstream: &[HandlerResult],
    ) -> HandlerResult {
        let context = self.retrieve_context(text, classification).await;
        let used_retrieval = context.is_some();

        if classification.query_type == QueryType::Policy && context.is_none() {
            debug!(handler = %self.id, "Policy question without documents");
            return HandlerResult::ok(self.id, NO_POLICY_DOCUMENTS);
        }

        let prompt = Self::build_prompt(text, context.as_deref(), upstream);
        match self.llm.generate_with_system(&self.system_prompt, &prompt).await {
            Ok(answer) => {
                let mut result = HandlerResult::ok(self.id, answer).with_retrieval(used_retrieval);
                result.extracted_metrics = self.extractor.extract(self.id, &result.text);
                result
            }
            Err(e) => {
                warn!(handler = %self.id, error = %e, "Handler model call failed");
                HandlerResult::failed(self.id, e.to_string()).with_retrieval(used_retrieval)
            }
        }
    }

    fn id(&self) -> HandlerId {
        self.id
    }

    fn depends_on(&self) -> Vec<HandlerId> {
        self.depends_on.clone()
    }

    fn canonical_prompt(&self) -> String {
        self.canonical_prompt.clone()
    }
}
