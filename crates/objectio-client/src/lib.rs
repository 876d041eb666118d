//! ObjectIO Client - Internode storage client
//!
//! This crate provides the HTTP client a node uses to reach drives served
//! by a peer's disk gateway.

pub mod error;
pub mod rest;

// Re-exports
pub use error::{ClientError, ClientResult, error_from_status, error_from_text};
pub use rest::{ClientOptions, StorageRestClient};
