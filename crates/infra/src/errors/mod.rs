//! Infrastructure error conversions

pub mod conversions;

pub use conversions::{http_error, InfraError};
