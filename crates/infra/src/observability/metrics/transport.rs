//! Transport counters shared by every client of a stack
//!
//! ## Design
//! - Plain atomics, no locks
//! - SeqCst everywhere so a snapshot never shows more retries than attempts

use std::sync::atomic::{AtomicU64, Ordering};

use carelink_core::RefreshStatsSnapshot;
use carelink_domain::OutcomeClass;

/// Counters for exchanges, attempts and their outcomes.
#[derive(Debug, Default)]
pub struct TransportMetrics {
    exchanges: AtomicU64,
    attempts: AtomicU64,
    refresh_waits: AtomicU64,
    retries: AtomicU64,
    successes: AtomicU64,
    client_errors: AtomicU64,
    server_errors: AtomicU64,
    unauthorized: AtomicU64,
    authentication_expired: AtomicU64,
    network_failures: AtomicU64,
    other_failures: AtomicU64,
}

/// Point-in-time copy of [`TransportMetrics`], optionally merged with the
/// refresh coordinator's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransportMetricsSnapshot {
    pub exchanges: u64,
    pub attempts: u64,
    /// Exchanges that waited on a refresh after a 401
    pub refresh_waits: u64,
    pub retries: u64,
    pub successes: u64,
    pub client_errors: u64,
    pub server_errors: u64,
    pub unauthorized: u64,
    pub authentication_expired: u64,
    pub network_failures: u64,
    pub other_failures: u64,
    /// Refresh RPCs actually issued
    pub refreshes_started: u64,
    /// Exchanges that joined a refresh already in flight
    pub refresh_joins: u64,
}

impl TransportMetricsSnapshot {
    #[must_use]
    pub fn with_refresh_stats(mut self, stats: RefreshStatsSnapshot) -> Self {
        self.refreshes_started = stats.started;
        self.refresh_joins = stats.joined;
        self
    }
}

impl TransportMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_refresh_wait(&self) {
        self.refresh_waits.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::SeqCst);
    }

    /// Count a finished exchange under its outcome.
    pub fn record_outcome(&self, outcome: OutcomeClass) {
        self.exchanges.fetch_add(1, Ordering::SeqCst);
        let counter = match outcome {
            OutcomeClass::Success => &self.successes,
            OutcomeClass::ClientError => &self.client_errors,
            OutcomeClass::ServerError => &self.server_errors,
            OutcomeClass::Unauthorized => &self.unauthorized,
            OutcomeClass::AuthenticationExpired => &self.authentication_expired,
            OutcomeClass::NetworkFailure => &self.network_failures,
            OutcomeClass::Failed => &self.other_failures,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> TransportMetricsSnapshot {
        TransportMetricsSnapshot {
            exchanges: self.exchanges.load(Ordering::SeqCst),
            attempts: self.attempts.load(Ordering::SeqCst),
            refresh_waits: self.refresh_waits.load(Ordering::SeqCst),
            retries: self.retries.load(Ordering::SeqCst),
            successes: self.successes.load(Ordering::SeqCst),
            client_errors: self.client_errors.load(Ordering::SeqCst),
            server_errors: self.server_errors.load(Ordering::SeqCst),
            unauthorized: self.unauthorized.load(Ordering::SeqCst),
            authentication_expired: self.authentication_expired.load(Ordering::SeqCst),
            network_failures: self.network_failures.load(Ordering::SeqCst),
            other_failures: self.other_failures.load(Ordering::SeqCst),
            refreshes_started: 0,
            refresh_joins: 0,
        }
    }
}
