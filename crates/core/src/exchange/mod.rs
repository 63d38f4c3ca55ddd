//! Exchange state machine
//!
//! An [`Exchange`] tracks one logical request through at most one
//! credential refresh and one retry:
//!
//! ```text
//! Initial --dispatch--> AwaitingResponse --401, refresh allowed--> RefreshInFlight
//!                              |                                     |        |
//!                        other response                         succeeded   failed
//!                              v                                     v        |
//!                          Terminal <----------any response------ Retried     |
//!                              ^---------------------------------------------'
//! ```
//!
//! The machine performs no I/O. The transport client drives it and does
//! whatever each [`Step`] asks for.

use std::fmt;

use carelink_domain::Backend;
use thiserror::Error;

/// Where an exchange currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangePhase {
    Initial,
    AwaitingResponse,
    RefreshInFlight,
    /// The re-issued request is outstanding.
    Retried,
    Terminal,
}

impl fmt::Display for ExchangePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Initial => "initial",
            Self::AwaitingResponse => "awaiting_response",
            Self::RefreshInFlight => "refresh_in_flight",
            Self::Retried => "retried",
            Self::Terminal => "terminal",
        })
    }
}

/// What the driver must do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Hand the current response (or error) to the caller.
    Complete,
    /// Obtain a fresh credential.
    Refresh,
    /// Re-issue the request with the fresh credential.
    Retry,
}

/// An event arrived in a phase that does not accept it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid exchange transition: {event} while {phase}")]
pub struct InvalidTransition {
    pub phase: ExchangePhase,
    pub event: &'static str,
}

/// One logical request and its retry budget.
#[derive(Debug, Clone)]
pub struct Exchange {
    backend: Backend,
    refresh_enabled: bool,
    phase: ExchangePhase,
    refresh_attempted: bool,
    attempts: u8,
}

impl Exchange {
    /// `refresh_enabled` is false for backends without a refresh path and
    /// for requests exempt from credential injection.
    pub fn new(backend: Backend, refresh_enabled: bool) -> Self {
        Self {
            backend,
            refresh_enabled,
            phase: ExchangePhase::Initial,
            refresh_attempted: false,
            attempts: 0,
        }
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn phase(&self) -> ExchangePhase {
        self.phase
    }

    /// HTTP attempts issued so far.
    pub fn attempts(&self) -> u8 {
        self.attempts
    }

    pub fn refresh_attempted(&self) -> bool {
        self.refresh_attempted
    }

    pub fn is_terminal(&self) -> bool {
        self.phase == ExchangePhase::Terminal
    }

    /// The first attempt is about to be sent.
    pub fn dispatch(&mut self) -> Result<(), InvalidTransition> {
        match self.phase {
            ExchangePhase::Initial => {
                self.phase = ExchangePhase::AwaitingResponse;
                self.attempts = 1;
                Ok(())
            }
            phase => Err(InvalidTransition { phase, event: "dispatch" }),
        }
    }

    /// A response arrived for the outstanding attempt.
    pub fn on_response(&mut self, unauthorized: bool) -> Result<Step, InvalidTransition> {
        match self.phase {
            ExchangePhase::AwaitingResponse
                if unauthorized && self.refresh_enabled && !self.refresh_attempted =>
            {
                self.phase = ExchangePhase::RefreshInFlight;
                self.refresh_attempted = true;
                Ok(Step::Refresh)
            }
            ExchangePhase::AwaitingResponse | ExchangePhase::Retried => {
                self.phase = ExchangePhase::Terminal;
                Ok(Step::Complete)
            }
            phase => Err(InvalidTransition { phase, event: "response" }),
        }
    }

    /// The refresh produced a credential; the retry is about to be sent.
    pub fn on_refresh_succeeded(&mut self) -> Result<Step, InvalidTransition> {
        match self.phase {
            ExchangePhase::RefreshInFlight => {
                self.phase = ExchangePhase::Retried;
                self.attempts += 1;
                Ok(Step::Retry)
            }
            phase => Err(InvalidTransition { phase, event: "refresh succeeded" }),
        }
    }

    pub fn on_refresh_failed(&mut self) -> Result<Step, InvalidTransition> {
        match self.phase {
            ExchangePhase::RefreshInFlight => {
                self.phase = ExchangePhase::Terminal;
                Ok(Step::Complete)
            }
            phase => Err(InvalidTransition { phase, event: "refresh failed" }),
        }
    }

    /// The outstanding attempt failed below HTTP (connect, deadline, I/O).
    pub fn on_transport_failure(&mut self) -> Result<Step, InvalidTransition> {
        match self.phase {
            ExchangePhase::AwaitingResponse | ExchangePhase::Retried => {
                self.phase = ExchangePhase::Terminal;
                Ok(Step::Complete)
            }
            phase => Err(InvalidTransition { phase, event: "transport failure" }),
        }
    }
}
