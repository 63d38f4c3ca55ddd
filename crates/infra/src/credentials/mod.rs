//! Persisted credential storage

pub mod file_store;

pub use file_store::FileCredentialStore;
