//! Test doubles for the core ports
//!
//! Available to this crate's tests and, with the `test-utils` feature, to
//! downstream crates.

#![allow(clippy::missing_panics_doc)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use carelink_domain::{AnalyticsEvent, Credential, RefreshFailure};
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::analytics::AnalyticsSink;
use crate::auth::TokenRefresher;

type RefreshOutcome = Result<Credential, RefreshFailure>;

/// Refresher that replays a script of outcomes.
///
/// Once the script is exhausted the last outcome repeats. A gated refresher
/// blocks every call until [`release`](Self::release) is called, which lets
/// tests pile up concurrent callers behind one refresh.
pub struct ScriptedRefresher {
    script: Mutex<VecDeque<RefreshOutcome>>,
    last: Mutex<RefreshOutcome>,
    calls: AtomicUsize,
    presented: Mutex<Vec<String>>,
    gate: Option<watch::Sender<bool>>,
    delay: Option<Duration>,
}

impl ScriptedRefresher {
    pub fn new(script: Vec<RefreshOutcome>) -> Self {
        let last = script
            .last()
            .cloned()
            .unwrap_or_else(|| Err(RefreshFailure::rejected("no scripted outcome")));
        Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(last),
            calls: AtomicUsize::new(0),
            presented: Mutex::new(Vec::new()),
            gate: None,
            delay: None,
        }
    }

    /// Always returns `token`, with a matching refresh token.
    pub fn succeeding(token: &str) -> Self {
        Self::new(vec![Ok(Credential::new(token).with_refresh_token(format!("refresh-{token}")))])
    }

    pub fn failing(failure: RefreshFailure) -> Self {
        Self::new(vec![Err(failure)])
    }

    #[must_use]
    pub fn gated(mut self) -> Self {
        let (tx, _rx) = watch::channel(false);
        self.gate = Some(tx);
        self
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Open the gate for every pending and future call.
    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.send_replace(true);
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Refresh tokens presented, in call order.
    pub fn presented_tokens(&self) -> Vec<String> {
        self.presented.lock().clone()
    }

    /// Wait until at least `count` calls have started.
    pub async fn wait_for_calls(&self, count: usize) {
        while self.calls() < count {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }
}

#[async_trait]
impl TokenRefresher for ScriptedRefresher {
    async fn refresh(&self, current: &Credential) -> RefreshOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.presented.lock().push(current.refresh_token.clone().unwrap_or_default());

        if let Some(gate) = &self.gate {
            let mut rx = gate.subscribe();
            let _ = rx.wait_for(|open| *open).await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.script.lock().pop_front();
        match next {
            Some(outcome) => {
                *self.last.lock() = outcome.clone();
                outcome
            }
            None => self.last.lock().clone(),
        }
    }
}

/// Sink that keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingAnalyticsSink {
    events: Mutex<Vec<AnalyticsEvent>>,
}

impl RecordingAnalyticsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AnalyticsEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl AnalyticsSink for RecordingAnalyticsSink {
    fn record(&self, event: AnalyticsEvent) {
        self.events.lock().push(event);
    }
}
