pub mod aggregator;
pub mod configurable;
pub mod decomposer;
pub mod extract;
pub mod fallback;
pub mod orchestrator;
pub mod registry;
pub mod router;
pub mod scheduler;

use crate::types::{Classification, HandlerId, HandlerResult};
use async_trait::async_trait;

// Re-export commonly used types
pub use aggregator::{PlainFormatter, ResponseFormatter, ResultAggregator};
pub use configurable::ConfigurableHandler;
pub use decomposer::QueryDecomposer;
pub use fallback::{FallbackError, FallbackRouter};
pub use orchestrator::{Orchestrator, RequestContext};
pub use registry::{HandlerRegistry, HandlerRegistryBuilder};
pub use router::{IntentRouter, RoutingThresholds, TriggerTable};
pub use scheduler::{ExecutionScheduler, SchedulerConfig};

/// A domain handler the scheduler can invoke.
///
/// Ordinary domain failures are encoded in [`HandlerResult::success`] and
/// [`HandlerResult::error`], never raised.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Answer `text` within this handler's capability area.
    async fn invoke(&self, text: &str, classification: &Classification) -> HandlerResult;

    /// Answer `text` with successful upstream results available as grounding.
    ///
    /// Only called for handlers that declare [`Handler::depends_on`]. The
    /// default ignores the upstream results.
    async fn invoke_grounded(
        &self,
        text: &str,
        classification: &Classification,
        upstream: &[HandlerResult],
    ) -> HandlerResult {
        let _ = upstream;
        self.invoke(text, classification).await
    }

    /// The registry slot this handler fills.
    fn id(&self) -> HandlerId;

    /// Handlers whose output this one consumes when both are dispatched.
    fn depends_on(&self) -> Vec<HandlerId> {
        Vec::new()
    }

    /// Prompt used in comprehensive mode.
    fn canonical_prompt(&self) -> String {
        self.id().canonical_prompt().to_string()
    }
}
