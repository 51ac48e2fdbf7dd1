//! Tier-2 routing through an external reasoning service.
//!
//! The service is asked to pick among the fixed handler set and to answer with
//! a JSON routing record. Its answer is validated against the static registry
//! before it can influence dispatch. [`FallbackRouter::try_route`] returns a
//! typed error on any failure; [`FallbackRouter::route`] turns every failure
//! back into the Tier-1 decision, so an outage can never make a request worse
//! off than keyword routing alone.

use crate::agents::decomposer::QueryDecomposer;
use crate::llm::LLMClient;
use crate::types::{
    clamp_confidence, AppError, HandlerId, ResolvedBy, RoutingDecision, SubRequest, Turn,
};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, warn};

/// Confidence assumed when the service omits one.
pub const DEFAULT_FALLBACK_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FallbackError {
    #[error("reasoning service unavailable: {0}")]
    Transport(String),

    #[error("reasoning service timed out after {0} ms")]
    Timeout(u64),

    #[error("malformed routing response: {0}")]
    Malformed(String),

    #[error("routing response failed validation: {0}")]
    Schema(String),
}

/// Routing record the reasoning service is asked to produce.
///
/// Only used to describe the contract in the system prompt. Replies are read
/// field by field so that a single bad field does not discard the rest.
#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
#[allow(dead_code)]
struct RoutingRecord {
    /// Primary handler.
    agent: String,
    /// Every handler that should answer part of the request.
    agents: Vec<String>,
    /// Certainty between 0 and 1.
    confidence: f64,
    multi_intent: bool,
    sub_requests: Vec<SubRequestRecord>,
    execution_order: Vec<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[allow(dead_code)]
struct SubRequestRecord {
    text: String,
    agent: String,
}

pub struct FallbackRouter {
    llm: Arc<dyn LLMClient>,
    decomposer: QueryDecomposer,
    timeout: Duration,
    history_window: usize,
    system_prompt: String,
}

impl FallbackRouter {
    pub fn new(llm: Arc<dyn LLMClient>, decomposer: QueryDecomposer, timeout: Duration) -> Self {
        Self {
            llm,
            decomposer,
            timeout,
            history_window: 5,
            system_prompt: Self::build_system_prompt(),
        }
    }

    /// Number of prior turns included in the routing prompt.
    pub fn with_history_window(mut self, turns: usize) -> Self {
        self.history_window = turns;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn build_system_prompt() -> String {
        let schema = serde_json::to_string_pretty(&schemars::schema_for!(RoutingRecord))
            .unwrap_or_default();
        let handlers = HandlerId::ALL
            .iter()
            .map(|h| format!("- {}: {}", h.as_str(), Self::describe(*h)))
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            r#"You route supply-chain analytics requests to specialist handlers.

Available handlers:
{handlers}

Pick one handler, or several when the request asks for several things.
For several handlers, split the request into one sub-request per handler.
Reply with a single JSON object and nothing else, matching this schema:
{schema}"#
        )
    }

    fn describe(handler: HandlerId) -> &'static str {
        match handler {
            HandlerId::DataQuery => "raw order, customer and product records, lookups and listings",
            HandlerId::Delay => "delivery delays, on-time rates and shipping performance",
            HandlerId::Analytics => "revenue, sales, customer segments and general analysis",
            HandlerId::Forecasting => "demand forecasts, trends and projections",
        }
    }

    fn user_prompt(&self, text: &str, history: &[Turn]) -> String {
        let candidates = HandlerId::ALL.map(|h| h.as_str()).join(", ");
        let recent = crate::memory::window(history, self.history_window);

        let mut prompt = format!("Candidate handlers: {}\n", candidates);
        if !recent.is_empty() {
            prompt.push_str("\nRecent conversation:\n");
            for turn in recent {
                prompt.push_str(&format!("User: {}\n", turn.request));
                let handlers: Vec<&str> = turn.handlers.iter().map(|h| h.as_str()).collect();
                prompt.push_str(&format!("Handled by: {}\n", handlers.join(", ")));
            }
        }
        prompt.push_str(&format!("\nRequest: {}", text));
        prompt
    }

    /// Asks the reasoning service for a decision.
    pub async fn try_route(
        &self,
        text: &str,
        history: &[Turn],
    ) -> Result<RoutingDecision, FallbackError> {
        let prompt = self.user_prompt(text, history);
        let reply = match timeout(
            self.timeout,
            self.llm.generate_with_system(&self.system_prompt, &prompt),
        )
        .await
        {
            Err(_) | Ok(Err(AppError::Timeout(_))) => {
                return Err(FallbackError::Timeout(self.timeout.as_millis() as u64))
            }
            Ok(Err(e)) => return Err(FallbackError::Transport(e.to_string())),
            Ok(Ok(reply)) => reply,
        };

        self.parse_decision(text, &reply)
    }

    /// Asks the reasoning service, keeping `tier1` unchanged on any failure.
    pub async fn route(
        &self,
        text: &str,
        history: &[Turn],
        tier1: &RoutingDecision,
    ) -> RoutingDecision {
        match self.try_route(text, history).await {
            Ok(decision) => {
                info!(
                    primary = %decision.primary_handler,
                    handlers = ?decision.execution_order,
                    confidence = decision.confidence,
                    "Tier-2 routing decision"
                );
                decision
            }
            Err(e) => {
                warn!(reason = %e, "Fallback routing failed, keeping Tier-1 decision");
                tier1.clone()
            }
        }
    }

    /// Validates a raw reply into a decision.
    pub fn parse_decision(&self, text: &str, reply: &str) -> Result<RoutingDecision, FallbackError> {
        let record = extract_object(reply)?;

        let mut names: Vec<String> = string_field(&record, &["agent", "handler"])
            .into_iter()
            .collect();
        names.extend(string_list_field(&record, &["agents", "handlers"]));

        let mut named: Vec<HandlerId> = Vec::new();
        for name in &names {
            if let Some(handler) = validate_handler(name) {
                if !named.contains(&handler) {
                    named.push(handler);
                }
            }
        }

        let Some(primary) = named.first().copied() else {
            return Err(FallbackError::Schema(
                "no known handler in response".to_string(),
            ));
        };
        let handlers: BTreeSet<HandlerId> = named.iter().copied().collect();

        let confidence = number_field(&record, &["confidence"])
            .map(clamp_confidence)
            .unwrap_or(DEFAULT_FALLBACK_CONFIDENCE);

        if let Some(order) = value_field(&record, &["executionOrder", "execution_order"])
            .and_then(Value::as_array)
        {
            for name in order.iter().filter_map(Value::as_str) {
                validate_handler(name);
            }
        }

        if handlers.len() == 1 {
            return Ok(RoutingDecision::single(primary, confidence, ResolvedBy::Fallback));
        }

        let proposed = sub_requests_field(&record);
        let sub_requests = if proposed.is_empty() {
            self.decomposer.decompose(text, &handlers)
        } else {
            self.decomposer.complete(text, &handlers, proposed)
        };

        Ok(RoutingDecision::multi(
            primary,
            handlers,
            sub_requests,
            confidence,
            ResolvedBy::Fallback,
        ))
    }
}

/// Parses a handler name, warning about anything outside the registry.
fn validate_handler(name: &str) -> Option<HandlerId> {
    match name.parse::<HandlerId>() {
        Ok(handler) => Some(handler),
        Err(_) => {
            warn!(name, "Unknown handler reference from reasoning service");
            None
        }
    }
}

/// Pulls the outermost JSON object out of a reply, tolerating code fences
/// and surrounding prose.
fn extract_object(reply: &str) -> Result<Map<String, Value>, FallbackError> {
    let start = reply.find('{');
    let end = reply.rfind('}');
    let body = match (start, end) {
        (Some(start), Some(end)) if start < end => &reply[start..=end],
        _ => return Err(FallbackError::Malformed("no JSON object in reply".to_string())),
    };

    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(FallbackError::Malformed("reply is not a JSON object".to_string())),
        Err(e) => Err(FallbackError::Malformed(e.to_string())),
    }
}

fn value_field<'a>(record: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| record.get(*key))
}

fn string_field(record: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    value_field(record, keys)
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn string_list_field(record: &Map<String, Value>, keys: &[&str]) -> Vec<String> {
    value_field(record, keys)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn number_field(record: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    value_field(record, keys).and_then(Value::as_f64)
}

fn sub_requests_field(record: &Map<String, Value>) -> Vec<SubRequest> {
    let Some(items) = value_field(record, &["subRequests", "sub_requests"]).and_then(Value::as_array)
    else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(Value::as_object)
        .filter_map(|item| {
            let text = string_field(item, &["text"])?;
            let name = string_field(item, &["agent", "handler"])?;
            let handler = validate_handler(&name)?;
            Some(SubRequest::new(text, handler))
        })
        .collect()
}
