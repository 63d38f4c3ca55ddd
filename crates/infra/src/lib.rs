//! # Carelink Infrastructure
//!
//! Network, filesystem and environment implementations of the core ports.
//!
//! This crate contains:
//! - The pooled HTTP client and the per-backend transport clients
//! - The request decorator chain and the token refresh call
//! - The file-backed credential store
//! - Analytics sinks, request logging and transport metrics
//! - Configuration loading and tracing setup
//!
//! ## Architecture
//! - Implements traits defined in `carelink-core`
//! - Contains all "impure" code (HTTP, files, environment)

pub mod analytics;
pub mod config;
pub mod credentials;
pub mod errors;
pub mod http;
pub mod observability;
pub mod transport;

// Re-export commonly used items
pub use analytics::{ChannelAnalyticsSink, TracingAnalyticsSink};
pub use credentials::FileCredentialStore;
pub use errors::InfraError;
pub use http::{HttpClient, HttpClientBuilder};
pub use observability::metrics::{TransportMetrics, TransportMetricsSnapshot};
pub use observability::{init_tracing, LogFormat};
pub use transport::{
    HttpTokenRefresher, OutboundRequest, TransportClient, TransportResponse, TransportStack,
    TransportStackBuilder,
};
