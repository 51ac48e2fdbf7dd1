//! Handler ordering and dispatch.
//!
//! Handlers run in static priority order. Within one dispatch, handlers with
//! no declared dependency on each other form a wave and are invoked
//! concurrently; a handler that depends on another selected handler runs in a
//! later wave and receives the upstream output as grounding. Every invocation
//! is bounded by a timeout and isolated from panics, so a single slow or
//! broken handler never holds up the others.
//!
//! Results are always returned in priority order, whatever order the
//! invocations completed in.

use crate::agents::registry::HandlerRegistry;
use crate::types::{
    AppError, Classification, DispatchMode, HandlerId, HandlerResult, Request, Result,
    RoutingDecision,
};
use futures::future::join_all;
use futures::FutureExt;
use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Deduplicates handlers and sorts them by static priority.
pub fn order(handlers: impl IntoIterator<Item = HandlerId>) -> Vec<HandlerId> {
    let mut ordered: Vec<HandlerId> = handlers
        .into_iter()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    ordered.sort_by_key(|h| h.priority());
    ordered
}

/// Groups handlers into dependency waves.
///
/// Dependencies on handlers outside `handlers` are ignored. Each wave is in
/// priority order. A cycle is a configuration error.
pub fn waves(
    handlers: &[HandlerId],
    depends_on: impl Fn(HandlerId) -> Vec<HandlerId>,
) -> Result<Vec<Vec<HandlerId>>> {
    let selected = order(handlers.iter().copied());
    let mut placed: BTreeSet<HandlerId> = BTreeSet::new();
    let mut remaining = selected.clone();
    let mut waves = Vec::new();

    while !remaining.is_empty() {
        let (ready, blocked): (Vec<HandlerId>, Vec<HandlerId>) =
            remaining.into_iter().partition(|handler| {
                depends_on(*handler)
                    .iter()
                    .filter(|dep| **dep != *handler && selected.contains(dep))
                    .all(|dep| placed.contains(dep))
            });

        if ready.is_empty() {
            return Err(AppError::Configuration(format!(
                "Dependency cycle among handlers {:?}",
                blocked
            )));
        }

        placed.extend(ready.iter().copied());
        waves.push(ready);
        remaining = blocked;
    }

    Ok(waves)
}

/// Dispatch behavior.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Upper bound for a single handler invocation.
    pub handler_timeout: Duration,

    /// Whether independent handlers run concurrently.
    /// When false, handlers run one at a time in dependency and priority order.
    pub parallel: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            handler_timeout: Duration::from_secs(30),
            parallel: true,
        }
    }
}

pub struct ExecutionScheduler {
    registry: Arc<HandlerRegistry>,
    config: SchedulerConfig,
}

impl ExecutionScheduler {
    pub fn new(registry: Arc<HandlerRegistry>, config: SchedulerConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Invokes every handler in the decision and collects all results,
    /// successful or not, in priority order.
    pub async fn dispatch(
        &self,
        decision: &RoutingDecision,
        request: &Request,
        classification: &Classification,
    ) -> Vec<HandlerResult> {
        let selected = order(decision.handlers.iter().copied());
        let plan = self.plan(&selected);

        info!(
            request_id = %request.id(),
            mode = ?decision.mode,
            handlers = ?selected,
            waves = plan.len(),
            "Dispatching handlers"
        );

        let mut results: Vec<HandlerResult> = Vec::with_capacity(selected.len());
        for wave in plan {
            let invocations = wave.iter().map(|id| {
                let input = self.input_for(*id, decision, request);
                let upstream = self.upstream_for(*id, &results);
                self.invoke_one(*id, input, classification, upstream)
            });
            let finished = join_all(invocations).await;
            results.extend(finished);
        }

        results.sort_by_key(|result| result.handler.priority());
        results
    }

    fn plan(&self, selected: &[HandlerId]) -> Vec<Vec<HandlerId>> {
        let grouped = match waves(selected, |id| self.registry.depends_on(id)) {
            Ok(grouped) => grouped,
            Err(e) => {
                warn!(error = %e, "Ignoring handler dependencies");
                vec![selected.to_vec()]
            }
        };

        if self.config.parallel {
            grouped
        } else {
            grouped.into_iter().flatten().map(|id| vec![id]).collect()
        }
    }

    /// Text a handler receives for the decision's dispatch mode.
    fn input_for(&self, id: HandlerId, decision: &RoutingDecision, request: &Request) -> String {
        match decision.mode {
            DispatchMode::Single => request.text().to_string(),
            DispatchMode::Multi => {
                let fragments: Vec<&str> = decision
                    .sub_requests
                    .iter()
                    .filter(|sub| sub.handler == id)
                    .map(|sub| sub.text.as_str())
                    .collect();
                if fragments.is_empty() {
                    request.text().to_string()
                } else {
                    fragments.join(" and ")
                }
            }
            DispatchMode::Comprehensive => self
                .registry
                .get(id)
                .map(|handler| handler.canonical_prompt())
                .unwrap_or_else(|| id.canonical_prompt().to_string()),
        }
    }

    fn upstream_for(&self, id: HandlerId, results: &[HandlerResult]) -> Vec<HandlerResult> {
        let deps = self.registry.depends_on(id);
        results
            .iter()
            .filter(|result| result.success && deps.contains(&result.handler))
            .cloned()
            .collect()
    }

    /// Invokes one handler, mapping timeouts and panics to failed results.
    async fn invoke_one(
        &self,
        id: HandlerId,
        input: String,
        classification: &Classification,
        upstream: Vec<HandlerResult>,
    ) -> HandlerResult {
        let Some(handler) = self.registry.get(id) else {
            warn!(handler = %id, "Handler not registered");
            return HandlerResult::failed(id, "handler not registered");
        };

        let start = Instant::now();
        let invocation = async {
            if upstream.is_empty() {
                handler.invoke(&input, classification).await
            } else {
                handler
                    .invoke_grounded(&input, classification, &upstream)
                    .await
            }
        };
        let outcome = timeout(
            self.config.handler_timeout,
            AssertUnwindSafe(invocation).catch_unwind(),
        )
        .await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(mut result)) => {
                if result.handler != id {
                    warn!(
                        handler = %id,
                        reported = %result.handler,
                        "Handler reported a different id"
                    );
                    result.handler = id;
                }
                debug!(handler = %id, success = result.success, duration_ms, "Handler finished");
                result
            }
            Ok(Err(_)) => {
                warn!(handler = %id, duration_ms, "Handler panicked");
                HandlerResult::failed(id, "handler panicked")
            }
            Err(_) => {
                warn!(
                    handler = %id,
                    timeout_ms = self.config.handler_timeout.as_millis() as u64,
                    "Handler timed out"
                );
                HandlerResult::failed(
                    id,
                    format!(
                        "timed out after {} ms",
                        self.config.handler_timeout.as_millis()
                    ),
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::Handler;
    use crate::types::{ResolvedBy, SubRequest};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct EchoHandler {
        id: HandlerId,
        delay: Duration,
        deps: Vec<HandlerId>,
        seen: Arc<Mutex<Vec<(HandlerId, String, usize)>>>,
    }

    impl EchoHandler {
        fn new(id: HandlerId, seen: Arc<Mutex<Vec<(HandlerId, String, usize)>>>) -> Self {
            Self {
                id,
                delay: Duration::ZERO,
                deps: Vec::new(),
                seen,
            }
        }
    }

    #[async_trait]
    impl Handler for EchoHandler {
        async fn invoke(&self, text: &str, classification: &Classification) -> HandlerResult {
            self.invoke_grounded(text, classification, &[]).await
        }

        async fn invoke_grounded(
            &self,
            text: &str,
            _classification: &Classification,
            upstream: &[HandlerResult],
        ) -> HandlerResult {
            tokio::time::sleep(self.delay).await;
            self.seen
                .lock()
                .unwrap()
                .push((self.id, text.to_string(), upstream.len()));
            HandlerResult::ok(self.id, format!("{}: {}", self.id, text))
        }

        fn id(&self) -> HandlerId {
            self.id
        }

        fn depends_on(&self) -> Vec<HandlerId> {
            self.deps.clone()
        }
    }

    struct PanickingHandler;

    #[async_trait]
    impl Handler for PanickingHandler {
        async fn invoke(&self, _text: &str, _classification: &Classification) -> HandlerResult {
            panic!("boom");
        }

        fn id(&self) -> HandlerId {
            HandlerId::Analytics
        }
    }

    type Seen = Arc<Mutex<Vec<(HandlerId, String, usize)>>>;

    fn scheduler(handlers: Vec<Arc<dyn Handler>>, config: SchedulerConfig) -> ExecutionScheduler {
        let mut builder = HandlerRegistry::builder();
        for handler in handlers {
            builder = builder.register(handler);
        }
        ExecutionScheduler::new(Arc::new(builder.build().unwrap()), config)
    }

    #[test]
    fn test_order_sorts_by_priority_and_dedupes() {
        let ordered = order([
            HandlerId::Forecasting,
            HandlerId::DataQuery,
            HandlerId::Forecasting,
            HandlerId::Delay,
        ]);
        assert_eq!(
            ordered,
            vec![HandlerId::DataQuery, HandlerId::Delay, HandlerId::Forecasting]
        );
    }

    #[test]
    fn test_waves_respect_dependencies() {
        let grouped = waves(&HandlerId::ALL, |id| match id {
            HandlerId::Analytics => vec![HandlerId::DataQuery],
            _ => vec![],
        })
        .unwrap();
        assert_eq!(
            grouped,
            vec![
                vec![HandlerId::DataQuery, HandlerId::Delay, HandlerId::Forecasting],
                vec![HandlerId::Analytics],
            ]
        );
    }

    #[test]
    fn test_waves_ignore_unselected_dependencies() {
        let grouped = waves(&[HandlerId::Analytics], |_| vec![HandlerId::DataQuery]).unwrap();
        assert_eq!(grouped, vec![vec![HandlerId::Analytics]]);
    }

    #[test]
    fn test_waves_reject_cycles() {
        let result = waves(&[HandlerId::Delay, HandlerId::Analytics], |id| match id {
            HandlerId::Delay => vec![HandlerId::Analytics],
            _ => vec![HandlerId::Delay],
        });
        assert!(matches!(result, Err(AppError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_single_dispatch_uses_full_text() {
        let seen: Seen = Arc::default();
        let s = scheduler(
            vec![Arc::new(EchoHandler::new(HandlerId::Delay, seen.clone()))],
            SchedulerConfig::default(),
        );
        let decision = RoutingDecision::single(HandlerId::Delay, 0.6, ResolvedBy::Keyword);
        let request = Request::new("what is the delay rate");

        let results = s
            .dispatch(&decision, &request, &Classification::default())
            .await;

        assert_eq!(results.len(), 1);
        assert_eq!(seen.lock().unwrap()[0].1, "what is the delay rate");
    }

    #[tokio::test]
    async fn test_comprehensive_dispatch_uses_canonical_prompts() {
        let seen: Seen = Arc::default();
        let handlers: Vec<Arc<dyn Handler>> = HandlerId::ALL
            .into_iter()
            .map(|id| Arc::new(EchoHandler::new(id, seen.clone())) as Arc<dyn Handler>)
            .collect();
        let s = scheduler(handlers, SchedulerConfig::default());
        let decision = RoutingDecision::comprehensive(HandlerId::Analytics, 0.9, ResolvedBy::Keyword);

        let results = s
            .dispatch(&decision, &Request::new("full report please"), &Classification::default())
            .await;

        assert_eq!(
            results.iter().map(|r| r.handler).collect::<Vec<_>>(),
            HandlerId::ALL.to_vec()
        );
        let seen = seen.lock().unwrap();
        assert!(seen
            .iter()
            .any(|(id, text, _)| *id == HandlerId::Forecasting && text == "Forecast demand for 30 days"));
        assert!(seen.iter().all(|(_, text, _)| text != "full report please"));
    }

    #[tokio::test]
    async fn test_multi_dispatch_results_follow_priority_not_completion() {
        let seen: Seen = Arc::default();
        let mut slow = EchoHandler::new(HandlerId::Delay, seen.clone());
        slow.delay = Duration::from_millis(60);
        let fast = EchoHandler::new(HandlerId::Forecasting, seen.clone());
        let s = scheduler(vec![Arc::new(slow), Arc::new(fast)], SchedulerConfig::default());

        let decision = RoutingDecision::multi(
            HandlerId::Delay,
            BTreeSet::from([HandlerId::Delay, HandlerId::Forecasting]),
            vec![
                SubRequest::new("show delay rate", HandlerId::Delay),
                SubRequest::new("forecast demand", HandlerId::Forecasting),
            ],
            0.85,
            ResolvedBy::Keyword,
        );

        let results = s
            .dispatch(&decision, &Request::new("show delay rate and forecast demand"), &Classification::default())
            .await;

        // Forecasting completed first but Delay has the higher priority.
        assert_eq!(seen.lock().unwrap()[0].0, HandlerId::Forecasting);
        assert_eq!(results[0].handler, HandlerId::Delay);
        assert_eq!(results[0].text, "delay: show delay rate");
        assert_eq!(results[1].text, "forecasting: forecast demand");
    }

    #[tokio::test]
    async fn test_dependent_handler_receives_upstream_output() {
        let seen: Seen = Arc::default();
        let mut analytics = EchoHandler::new(HandlerId::Analytics, seen.clone());
        analytics.deps = vec![HandlerId::DataQuery];
        let mut data = EchoHandler::new(HandlerId::DataQuery, seen.clone());
        data.delay = Duration::from_millis(20);
        let s = scheduler(vec![Arc::new(analytics), Arc::new(data)], SchedulerConfig::default());

        let decision = RoutingDecision::comprehensive(HandlerId::Analytics, 0.9, ResolvedBy::Keyword);
        s.dispatch(&decision, &Request::new("everything"), &Classification::default())
            .await;

        let seen = seen.lock().unwrap();
        let analytics_call = seen.iter().find(|(id, _, _)| *id == HandlerId::Analytics).unwrap();
        assert_eq!(analytics_call.2, 1);
        assert_eq!(seen[0].0, HandlerId::DataQuery);
    }

    #[tokio::test]
    async fn test_timeout_and_panic_become_failed_results() {
        let seen: Seen = Arc::default();
        let mut slow = EchoHandler::new(HandlerId::Delay, seen.clone());
        slow.delay = Duration::from_millis(500);
        let s = scheduler(
            vec![
                Arc::new(slow),
                Arc::new(PanickingHandler),
                Arc::new(EchoHandler::new(HandlerId::Forecasting, seen.clone())),
            ],
            SchedulerConfig {
                handler_timeout: Duration::from_millis(50),
                parallel: true,
            },
        );
        let decision = RoutingDecision::comprehensive(HandlerId::Delay, 0.9, ResolvedBy::Keyword);

        let results = s
            .dispatch(&decision, &Request::new("everything"), &Classification::default())
            .await;

        let by_id = |id: HandlerId| results.iter().find(|r| r.handler == id).unwrap();
        assert!(!by_id(HandlerId::Delay).success);
        assert!(by_id(HandlerId::Delay).error.as_deref().unwrap().contains("timed out"));
        assert_eq!(by_id(HandlerId::Analytics).error.as_deref(), Some("handler panicked"));
        assert_eq!(by_id(HandlerId::DataQuery).error.as_deref(), Some("handler not registered"));
        assert!(by_id(HandlerId::Forecasting).success);
    }

    #[tokio::test]
    async fn test_sequential_mode_runs_one_at_a_time() {
        let seen: Seen = Arc::default();
        let mut slow = EchoHandler::new(HandlerId::DataQuery, seen.clone());
        slow.delay = Duration::from_millis(30);
        let fast = EchoHandler::new(HandlerId::Delay, seen.clone());
        let s = scheduler(
            vec![Arc::new(slow), Arc::new(fast)],
            SchedulerConfig {
                parallel: false,
                ..SchedulerConfig::default()
            },
        );
        let decision = RoutingDecision::comprehensive(HandlerId::Delay, 0.9, ResolvedBy::Keyword);

        s.dispatch(&decision, &Request::new("everything"), &Classification::default())
            .await;

        let order: Vec<HandlerId> = seen.lock().unwrap().iter().map(|(id, _, _)| *id).collect();
        assert_eq!(order, vec![HandlerId::DataQuery, HandlerId::Delay]);
    }
}
