//! Port interface for analytics delivery

use carelink_domain::AnalyticsEvent;

/// Receives one event per completed exchange.
///
/// Recording is fire-and-forget: implementations must not block the caller
/// and must swallow their own failures.
pub trait AnalyticsSink: Send + Sync {
    fn record(&self, event: AnalyticsEvent);
}

/// Sink that discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAnalyticsSink;

impl AnalyticsSink for NoopAnalyticsSink {
    fn record(&self, _event: AnalyticsEvent) {}
}
