//! Per-request routing metrics.
//!
//! The orchestrator reports one [`RequestMetrics`] event per completed
//! request and never reads tracker state back.

use crate::types::{HandlerId, Outcome, ResolvedBy};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestMetrics {
    pub request_id: Uuid,
    pub resolved_by: ResolvedBy,
    pub handlers_used: Vec<HandlerId>,
    pub latency_ms: u64,
    pub retrieval_used: bool,
    pub outcome: Outcome,
}

impl RequestMetrics {
    /// True unless every invoked handler failed.
    pub fn success(&self) -> bool {
        self.outcome != Outcome::Failed
    }
}

/// Write-only sink for request metrics.
pub trait MetricsTracker: Send + Sync {
    fn record(&self, metrics: RequestMetrics);
}

/// Emits every event as a structured `tracing` record.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetricsTracker;

impl MetricsTracker for TracingMetricsTracker {
    fn record(&self, metrics: RequestMetrics) {
        info!(
            request_id = %metrics.request_id,
            resolved_by = ?metrics.resolved_by,
            handlers = ?metrics.handlers_used,
            latency_ms = metrics.latency_ms,
            retrieval_used = metrics.retrieval_used,
            success = metrics.success(),
            "Request completed"
        );
    }
}

/// Forwards events to a channel for an out-of-band consumer.
#[derive(Debug, Clone)]
pub struct ChannelMetricsTracker {
    sender: UnboundedSender<RequestMetrics>,
}

impl ChannelMetricsTracker {
    /// Creates a tracker and the receiving end of its event stream.
    pub fn new() -> (Self, UnboundedReceiver<RequestMetrics>) {
        let (sender, receiver) = unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl MetricsTracker for ChannelMetricsTracker {
    fn record(&self, metrics: RequestMetrics) {
        if self.sender.send(metrics).is_err() {
            debug!("Metrics receiver dropped, event discarded");
        }
    }
}
