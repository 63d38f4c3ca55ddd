//! Request analytics
//!
//! Exchanges report one [`AnalyticsEvent`](carelink_domain::AnalyticsEvent)
//! each through an [`AnalyticsSink`].

pub mod ports;

pub use ports::{AnalyticsSink, NoopAnalyticsSink};
