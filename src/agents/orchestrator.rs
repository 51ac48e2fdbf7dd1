use crate::agents::aggregator::{InsightThresholds, PlainFormatter, ResponseFormatter, ResultAggregator};
use crate::agents::fallback::FallbackRouter;
use crate::agents::registry::HandlerRegistry;
use crate::agents::router::IntentRouter;
use crate::agents::scheduler::{ExecutionScheduler, SchedulerConfig};
use crate::intent::{IntentClassifier, KeywordIntentClassifier};
use crate::llm::LLMClient;
use crate::memory::ConversationHistory;
use crate::metrics::{MetricsTracker, RequestMetrics, TracingMetricsTracker};
use crate::rag::Retriever;
use crate::types::{
    AggregatedResponse, AppError, Classification, Request, Result, RoutingDecision, Turn,
};
use crate::utils::toml_config::MeridianConfig;
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Per-caller state threaded through every request.
///
/// Owned by the top-level caller. Conversation history is the only state
/// shared across requests; it is read once at request start and appended
/// once after aggregation.
#[derive(Clone)]
pub struct RequestContext {
    pub history: Arc<ConversationHistory>,
    pub metrics: Arc<dyn MetricsTracker>,
}

impl RequestContext {
    pub fn new(history: Arc<ConversationHistory>, metrics: Arc<dyn MetricsTracker>) -> Self {
        Self { history, metrics }
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new(
            Arc::new(ConversationHistory::new()),
            Arc::new(TracingMetricsTracker),
        )
    }
}

/// Top-level request handler.
///
/// Classifies a request, routes it (Tier 1, then Tier 2 when Tier 1 is
/// unsure), dispatches the selected handlers and merges their results.
pub struct Orchestrator {
    classifier: Arc<dyn IntentClassifier>,
    router: IntentRouter,
    fallback: Option<FallbackRouter>,
    scheduler: ExecutionScheduler,
    aggregator: ResultAggregator,
    formatter: Arc<dyn ResponseFormatter>,
}

impl Orchestrator {
    /// Creates an orchestrator without Tier-2 routing.
    pub fn new(
        classifier: Arc<dyn IntentClassifier>,
        router: IntentRouter,
        scheduler: ExecutionScheduler,
        aggregator: ResultAggregator,
    ) -> Self {
        Self {
            classifier,
            router,
            fallback: None,
            scheduler,
            aggregator,
            formatter: Arc::new(PlainFormatter),
        }
    }

    /// Wires every component from configuration.
    ///
    /// `llm` serves both the reasoning service and the handlers.
    pub fn from_config(
        config: &MeridianConfig,
        llm: Arc<dyn LLMClient>,
        retriever: Option<Arc<dyn Retriever>>,
    ) -> Result<Self> {
        let router = IntentRouter::new(config.routing.trigger_table()?, config.routing.thresholds())?;
        let classifier = Arc::new(KeywordIntentClassifier::new(router.table().clone()));
        let registry = Arc::new(HandlerRegistry::from_config(config, llm.clone(), retriever)?);
        let scheduler = ExecutionScheduler::new(registry, SchedulerConfig::from(&config.scheduler));
        let aggregator = ResultAggregator::new(InsightThresholds::from(&config.aggregator));

        let mut orchestrator = Self::new(classifier, router, scheduler, aggregator);
        if config.routing.fallback_enabled {
            let fallback = FallbackRouter::new(
                llm,
                orchestrator.router.decomposer().clone(),
                config.routing.fallback_timeout(),
            )
            .with_history_window(config.memory.history_window);
            orchestrator = orchestrator.with_fallback(fallback);
        }
        Ok(orchestrator)
    }

    pub fn with_fallback(mut self, fallback: FallbackRouter) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Formatter used to render the response stored in conversation history.
    pub fn with_formatter(mut self, formatter: Arc<dyn ResponseFormatter>) -> Self {
        self.formatter = formatter;
        self
    }

    pub fn router(&self) -> &IntentRouter {
        &self.router
    }

    pub fn scheduler(&self) -> &ExecutionScheduler {
        &self.scheduler
    }

    /// Routes a request. Tier 2 is consulted only below the fallback threshold.
    pub async fn route(&self, request: &Request) -> RoutingDecision {
        let tier1 = self.router.score(request.text());

        match &self.fallback {
            Some(fallback) if self.router.needs_fallback(&tier1) => {
                debug!(
                    request_id = %request.id(),
                    confidence = tier1.confidence,
                    "Tier-1 confidence below threshold, consulting fallback router"
                );
                fallback.route(request.text(), request.history(), &tier1).await
            }
            _ => tier1,
        }
    }

    /// Routing decision for `text` without dispatching any handler.
    pub async fn decide(&self, text: &str, ctx: &RequestContext) -> Result<RoutingDecision> {
        let request = Self::request(text, ctx)?;
        let decision = self.route(&request).await;
        decision.check_invariants()?;
        Ok(decision)
    }

    /// Answers one request to completion.
    pub async fn process(&self, text: &str, ctx: &RequestContext) -> Result<AggregatedResponse> {
        self.run(text, ctx).await
    }

    /// Answers one request unless `cancel` fires first.
    ///
    /// A cancelled request yields no response and leaves no trace in the
    /// history or the metrics stream.
    pub async fn process_with_cancel(
        &self,
        text: &str,
        ctx: &RequestContext,
        cancel: &CancellationToken,
    ) -> Result<AggregatedResponse> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Request cancelled");
                Err(AppError::Cancelled)
            }
            result = self.run(text, ctx) => result,
        }
    }

    fn request(text: &str, ctx: &RequestContext) -> Result<Request> {
        let text = text.trim();
        if text.is_empty() {
            return Err(AppError::InvalidInput("request text is empty".to_string()));
        }
        Ok(Request::with_history(text, ctx.history.snapshot()))
    }

    fn classify(&self, request: &Request) -> Classification {
        match self.classifier.classify(request.text()) {
            Ok(classification) => classification,
            Err(e) => {
                warn!(
                    request_id = %request.id(),
                    error = %e,
                    "ClassificationUnavailable, defaulting to data classification"
                );
                Classification::unavailable()
            }
        }
    }

    async fn run(&self, text: &str, ctx: &RequestContext) -> Result<AggregatedResponse> {
        let started = Instant::now();
        let request = Self::request(text, ctx)?;
        let classification = self.classify(&request);

        let decision = self.route(&request).await;
        decision.check_invariants()?;

        let results = self
            .scheduler
            .dispatch(&decision, &request, &classification)
            .await;
        let response = self.aggregator.aggregate(results, &decision);

        // Nothing below suspends, so a cancelled request never records.
        ctx.metrics.record(RequestMetrics {
            request_id: request.id(),
            resolved_by: response.resolved_by,
            handlers_used: response.handlers_used.clone(),
            latency_ms: started.elapsed().as_millis() as u64,
            retrieval_used: response.retrieval_used,
            outcome: response.outcome,
        });
        ctx.history.append(Turn {
            request: request.text().to_string(),
            response: self.formatter.format(&response),
            handlers: response.handlers_used.clone(),
            timestamp: Utc::now(),
        });

        Ok(response)
    }
}
