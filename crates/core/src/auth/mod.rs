//! Credential storage and refresh coordination
//!
//! This module provides the credential store and token refresher ports, an
//! in-memory store, and the coordinator that coalesces concurrent refreshes.

pub mod coordinator;
pub mod memory_store;
pub mod ports;

pub use coordinator::{RefreshCoordinator, RefreshStats, RefreshStatsSnapshot};
pub use memory_store::InMemoryCredentialStore;
pub use ports::{CredentialStore, SwapOutcome, TokenRefresher};
