//! # Carelink Core
//!
//! Authentication logic for the transport layer - no HTTP code.
//!
//! This crate contains:
//! - Credential store and token refresher ports
//! - The refresh coordinator that collapses concurrent refreshes
//! - The exchange state machine driving one request through retry
//! - The analytics sink port
//!
//! ## Architecture Principles
//! - Only depends on `carelink-domain`
//! - No HTTP, file or platform code
//! - All external dependencies via traits

pub mod analytics;
pub mod auth;
pub mod exchange;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use analytics::{AnalyticsSink, NoopAnalyticsSink};
pub use auth::{
    CredentialStore, InMemoryCredentialStore, RefreshCoordinator, RefreshStatsSnapshot,
    SwapOutcome, TokenRefresher,
};
pub use exchange::{Exchange, ExchangePhase, InvalidTransition, Step};
