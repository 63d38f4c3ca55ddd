//! Analytics sinks
//!
//! Both sinks are fire-and-forget: recording never blocks and never fails
//! the exchange.

use carelink_core::AnalyticsSink;
use carelink_domain::AnalyticsEvent;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Emits each event as a structured `tracing` line under the
/// `carelink::analytics` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAnalyticsSink;

impl AnalyticsSink for TracingAnalyticsSink {
    fn record(&self, event: AnalyticsEvent) {
        info!(
            target: "carelink::analytics",
            backend = %event.backend,
            method = %event.method,
            path = %event.path,
            outcome = event.outcome.as_str(),
            status = event.status,
            latency_ms = u64::try_from(event.latency.as_millis()).unwrap_or(u64::MAX),
            correlation_id = %event.correlation_id,
            attempts = event.attempts,
            refreshed = event.refreshed,
            "exchange completed"
        );
    }
}

/// Forwards events to a bounded channel. Events are dropped when the
/// channel is full or closed.
#[derive(Debug, Clone)]
pub struct ChannelAnalyticsSink {
    tx: mpsc::Sender<AnalyticsEvent>,
}

impl ChannelAnalyticsSink {
    pub fn new(tx: mpsc::Sender<AnalyticsEvent>) -> Self {
        Self { tx }
    }

    /// Sink plus the receiving end of a channel holding `capacity` events.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<AnalyticsEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }
}

impl AnalyticsSink for ChannelAnalyticsSink {
    fn record(&self, event: AnalyticsEvent) {
        if let Err(err) = self.tx.try_send(event) {
            debug!(error = %err, "analytics event dropped");
        }
    }
}
