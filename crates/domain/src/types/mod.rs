//! Domain types for the transport layer

pub mod analytics;
pub mod backend;
pub mod credential;

pub use analytics::{AnalyticsEvent, OutcomeClass};
pub use backend::Backend;
pub use credential::{Credential, Session, UserId};
