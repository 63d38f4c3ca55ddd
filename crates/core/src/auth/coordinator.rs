//! Refresh coordination with coalescing
//!
//! When many exchanges are rejected with the same stale credential, only one
//! refresh RPC runs. The refresh is keyed by the rejected access token:
//!
//! - if the store already holds a different credential, someone refreshed
//!   (or logged in) meanwhile and that credential is reused;
//! - otherwise the caller joins the refresh in flight for that token, or
//!   starts one.
//!
//! A refresh that failed transiently still answers every exchange whose
//! rejected attempt was dispatched before the failure was known; only
//! attempts dispatched afterwards may start a fresh refresh.
//!
//! The refresh itself runs on a spawned task, so cancelling any single
//! waiting exchange never cancels the refresh others depend on. Commits go
//! through [`CredentialStore::compare_and_set`]; a refresh that lost the race
//! to another writer is suppressed and the winner's credential is returned.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use carelink_domain::{Backend, Credential, RefreshFailure};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::ports::{CredentialStore, SwapOutcome, TokenRefresher};

type RefreshResult = Result<Credential, RefreshFailure>;
type SharedRefresh = Shared<BoxFuture<'static, RefreshResult>>;

/// When a refresh finished and whether it may be retried.
#[derive(Debug, Clone, Copy)]
struct Completion {
    at: Instant,
    transient: bool,
}

type CompletionCell = Arc<Mutex<Option<Completion>>>;

struct InFlightRefresh {
    stale_token: String,
    outcome: SharedRefresh,
    completion: CompletionCell,
}

impl InFlightRefresh {
    /// Pending refreshes and definitive outcomes for the same stale token are
    /// shared. A transient failure is shared only with attempts dispatched
    /// before it finished.
    fn reusable_for(&self, stale_token: &str, dispatched_at: Instant) -> bool {
        if self.stale_token != stale_token {
            return false;
        }
        match *self.completion.lock() {
            None | Some(Completion { transient: false, .. }) => true,
            Some(Completion { at, transient: true }) => dispatched_at <= at,
        }
    }
}

/// Counters describing coordinator activity.
#[derive(Debug, Default)]
pub struct RefreshStats {
    started: AtomicU64,
    joined: AtomicU64,
    reused: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time copy of [`RefreshStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RefreshStatsSnapshot {
    /// Refresh RPCs started
    pub started: u64,
    /// Exchanges that joined a refresh started by another exchange
    pub joined: u64,
    /// Exchanges that found an already-rotated credential in the store
    pub reused: u64,
    /// Refreshes that ended in failure
    pub failed: u64,
}

impl RefreshStats {
    pub fn snapshot(&self) -> RefreshStatsSnapshot {
        RefreshStatsSnapshot {
            started: self.started.load(Ordering::SeqCst),
            joined: self.joined.load(Ordering::SeqCst),
            reused: self.reused.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
        }
    }
}

/// Single-flight refresh for one backend.
pub struct RefreshCoordinator {
    backend: Backend,
    store: Arc<dyn CredentialStore>,
    refresher: Arc<dyn TokenRefresher>,
    inflight: Mutex<Option<InFlightRefresh>>,
    stats: Arc<RefreshStats>,
}

impl RefreshCoordinator {
    pub fn new(
        backend: Backend,
        store: Arc<dyn CredentialStore>,
        refresher: Arc<dyn TokenRefresher>,
    ) -> Self {
        Self {
            backend,
            store,
            refresher,
            inflight: Mutex::new(None),
            stats: Arc::new(RefreshStats::default()),
        }
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn stats(&self) -> RefreshStatsSnapshot {
        self.stats.snapshot()
    }

    /// Obtain a credential to retry with after the backend rejected
    /// `rejected` (`None` when the request went out without one) on an
    /// attempt sent at `dispatched_at`.
    ///
    /// # Errors
    /// Returns the shared [`RefreshFailure`] when the refresh fails, when
    /// nobody is logged in, or when the store cannot be read.
    pub async fn refresh_after_rejection(
        &self,
        rejected: Option<&Credential>,
        dispatched_at: Instant,
    ) -> RefreshResult {
        let current = self
            .store
            .get_current_credential(self.backend)
            .await
            .map_err(|e| RefreshFailure::storage(e.to_string()))?;

        let Some(current) = current else {
            return Err(RefreshFailure::rejected("no credential to refresh; login required"));
        };

        let rotated = rejected.map_or(true, |r| !current.has_access_token(&r.access_token));
        if rotated {
            self.stats.reused.fetch_add(1, Ordering::SeqCst);
            debug!(backend = %self.backend, "credential already rotated; reusing it");
            return Ok(current);
        }

        let outcome = {
            let mut slot = self.inflight.lock();
            match slot.as_ref() {
                Some(inflight) if inflight.reusable_for(&current.access_token, dispatched_at) => {
                    self.stats.joined.fetch_add(1, Ordering::SeqCst);
                    debug!(backend = %self.backend, "joining refresh in flight");
                    inflight.outcome.clone()
                }
                _ => {
                    let stale_token = current.access_token.clone();
                    let completion = CompletionCell::default();
                    let outcome = self.spawn_refresh(current, completion.clone());
                    *slot = Some(InFlightRefresh {
                        stale_token,
                        outcome: outcome.clone(),
                        completion,
                    });
                    outcome
                }
            }
        };

        outcome.await
    }

    fn spawn_refresh(&self, stale: Credential, completion: CompletionCell) -> SharedRefresh {
        self.stats.started.fetch_add(1, Ordering::SeqCst);

        let backend = self.backend;
        let store = self.store.clone();
        let refresher = self.refresher.clone();
        let stats = self.stats.clone();
        let task_completion = completion.clone();

        let task = tokio::spawn(async move {
            info!(%backend, "refreshing credential");
            let result = match refresher.refresh(&stale).await {
                Ok(refreshed) => commit(store.as_ref(), backend, &stale, refreshed).await,
                Err(failure) => Err(failure),
            };

            match &result {
                Ok(_) => info!(%backend, "credential refreshed"),
                Err(failure) => {
                    stats.failed.fetch_add(1, Ordering::SeqCst);
                    warn!(
                        %backend,
                        reason = %failure.reason,
                        error = %failure.message,
                        "credential refresh failed"
                    );
                }
            }
            let transient = result.as_ref().err().is_some_and(RefreshFailure::is_transient);
            *task_completion.lock() = Some(Completion { at: Instant::now(), transient });
            result
        });

        async move {
            match task.await {
                Ok(result) => result,
                Err(err) => {
                    completion
                        .lock()
                        .get_or_insert(Completion { at: Instant::now(), transient: true });
                    Err(RefreshFailure::network(format!("refresh task aborted: {err}")))
                }
            }
        }
        .boxed()
        .shared()
    }
}

async fn commit(
    store: &dyn CredentialStore,
    backend: Backend,
    stale: &Credential,
    refreshed: Credential,
) -> RefreshResult {
    let outcome = store
        .compare_and_set(backend, Some(&stale.access_token), refreshed.clone())
        .await
        .map_err(|e| RefreshFailure::storage(e.to_string()))?;

    match outcome {
        SwapOutcome::Swapped => Ok(refreshed),
        SwapOutcome::Superseded(Some(current)) => {
            debug!(%backend, "refresh superseded by another writer; keeping its credential");
            Ok(current)
        }
        SwapOutcome::Superseded(None) => {
            Err(RefreshFailure::rejected("credential cleared while refresh was in flight"))
        }
    }
}
