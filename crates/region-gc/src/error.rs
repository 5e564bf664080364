//! Construction-time errors.
//!
//! Collection itself has no recoverable failure path: broken invariants are
//! assertions. Only building a heap or its side structures can fail.

use std::io;

/// Errors raised while setting up the heap and its marking structures.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The OS refused to reserve or commit memory.
    #[error("failed to map memory: {0}")]
    Map(#[from] io::Error),
    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
