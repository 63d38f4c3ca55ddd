//! # Carelink Domain
//!
//! Plain data types shared by the transport layer.
//!
//! This crate contains:
//! - Backend, credential and session types
//! - Analytics event types
//! - Transport configuration structures
//! - The transport error taxonomy and `Result` alias
//!
//! ## Architecture
//! - No dependencies on other Carelink crates
//! - No I/O

pub mod config;
pub mod constants;
pub mod errors;
pub mod types;

// Re-export commonly used items
pub use config::*;
pub use errors::*;
pub use types::*;
