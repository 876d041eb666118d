//! ObjectIO Common - Shared types and utilities
//!
//! This crate provides the error taxonomy, drive coordinates, wire payload
//! types and configuration used across all ObjectIO components.

pub mod bitrot;
pub mod config;
pub mod error;
pub mod types;

pub use bitrot::{BitrotAlgorithm, BitrotHasher, BitrotVerifier};
pub use config::Config;
pub use error::{Classification, Error, ErrorKind, Result, ResultExt, Verdict};
pub use types::*;
