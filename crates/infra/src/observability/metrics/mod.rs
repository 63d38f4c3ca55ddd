//! Metrics collection modules
//!
//! Thread-safe metrics for the transport layer.

pub mod transport;

// Re-export metric types for convenience
pub use transport::{TransportMetrics, TransportMetricsSnapshot};
