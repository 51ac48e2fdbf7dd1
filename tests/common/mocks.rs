//! Mock implementations for testing.
//!
//! Mock reasoning-service clients and scripted handlers shared by the
//! integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use meridian::agents::aggregator::ResultAggregator;
use meridian::agents::router::IntentRouter;
use meridian::agents::scheduler::{ExecutionScheduler, SchedulerConfig};
use meridian::agents::{Handler, HandlerRegistry, Orchestrator};
use meridian::intent::KeywordIntentClassifier;
use meridian::llm::LLMClient;
use meridian::types::{Classification, HandlerId, HandlerResult, MetricValue, Result};
use mockall::mock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

mock! {
    /// Reasoning service whose calls can be counted and scripted.
    pub Reasoner {}

    #[async_trait]
    impl LLMClient for Reasoner {
        async fn generate(&self, prompt: &str) -> Result<String>;
        async fn generate_with_system(&self, system: &str, prompt: &str) -> Result<String>;
        async fn generate_with_history(&self, messages: &[(String, String)]) -> Result<String>;
        fn model_name(&self) -> &str;
    }
}

/// Reasoning service that must never be called.
pub fn unused_reasoner() -> MockReasoner {
    let mut reasoner = MockReasoner::new();
    reasoner.expect_generate_with_system().times(0);
    reasoner
}

/// Reasoning service answering exactly once with `reply`.
pub fn reasoner_replying(reply: &'static str) -> MockReasoner {
    let mut reasoner = MockReasoner::new();
    reasoner
        .expect_generate_with_system()
        .times(1)
        .returning(move |_, _| Ok(reply.to_string()));
    reasoner
}

/// Handler returning a fixed answer, optionally after a delay.
pub struct StaticHandler {
    id: HandlerId,
    reply: std::result::Result<String, String>,
    delay: Duration,
    metrics: Vec<(String, MetricValue)>,
    depends_on: Vec<HandlerId>,
    calls: AtomicUsize,
    inputs: Mutex<Vec<String>>,
    upstream: Mutex<Vec<HandlerId>>,
}

impl StaticHandler {
    pub fn ok(id: HandlerId, text: &str) -> Self {
        Self {
            id,
            reply: Ok(text.to_string()),
            delay: Duration::ZERO,
            metrics: Vec::new(),
            depends_on: Vec::new(),
            calls: AtomicUsize::new(0),
            inputs: Mutex::new(Vec::new()),
            upstream: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(id: HandlerId, error: &str) -> Self {
        Self {
            reply: Err(error.to_string()),
            ..Self::ok(id, "")
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_metric(mut self, key: &str, value: impl Into<MetricValue>) -> Self {
        self.metrics.push((key.to_string(), value.into()));
        self
    }

    pub fn depending_on(mut self, deps: &[HandlerId]) -> Self {
        self.depends_on = deps.to_vec();
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn inputs(&self) -> Vec<String> {
        self.inputs.lock().unwrap().clone()
    }

    pub fn upstream_seen(&self) -> Vec<HandlerId> {
        self.upstream.lock().unwrap().clone()
    }
}

#[async_trait]
impl Handler for StaticHandler {
    async fn invoke(&self, text: &str, classification: &Classification) -> HandlerResult {
        self.invoke_grounded(text, classification, &[]).await
    }

    async fn invoke_grounded(
        &self,
        text: &str,
        _classification: &Classification,
        upstream: &[HandlerResult],
    ) -> HandlerResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inputs.lock().unwrap().push(text.to_string());
        self.upstream
            .lock()
            .unwrap()
            .extend(upstream.iter().map(|r| r.handler));

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match &self.reply {
            Ok(text) => self
                .metrics
                .iter()
                .fold(HandlerResult::ok(self.id, text.clone()), |result, (k, v)| {
                    result.with_metric(k.clone(), v.clone())
                }),
            Err(error) => HandlerResult::failed(self.id, error.clone()),
        }
    }

    fn id(&self) -> HandlerId {
        self.id
    }

    fn depends_on(&self) -> Vec<HandlerId> {
        self.depends_on.clone()
    }
}

/// One answering handler per registry slot.
pub fn all_handlers() -> Vec<Arc<StaticHandler>> {
    HandlerId::ALL
        .into_iter()
        .map(|id| Arc::new(StaticHandler::ok(id, &format!("{} answer", id.display_name()))))
        .collect()
}

pub fn registry(handlers: &[Arc<StaticHandler>]) -> Arc<HandlerRegistry> {
    let registry = handlers
        .iter()
        .fold(HandlerRegistry::builder(), |builder, handler| {
            builder.register(handler.clone() as Arc<dyn Handler>)
        })
        .build()
        .unwrap();
    Arc::new(registry)
}

pub fn scheduler(handlers: &[Arc<StaticHandler>]) -> ExecutionScheduler {
    ExecutionScheduler::new(registry(handlers), SchedulerConfig::default())
}

/// Orchestrator over `handlers` with the default router and no Tier 2.
pub fn orchestrator(handlers: &[Arc<StaticHandler>]) -> Orchestrator {
    let router = IntentRouter::with_defaults().unwrap();
    Orchestrator::new(
        Arc::new(KeywordIntentClassifier::new(router.table().clone())),
        router,
        scheduler(handlers),
        ResultAggregator::default(),
    )
}
