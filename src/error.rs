//! Error types for stream setup.
//!
//! These are only produced before streaming starts (buffer creation, loop
//! configuration, configuration loading, thread spawning). The real-time
//! path reports its outcomes through the small `Copy` enums defined next to
//! the operations themselves (`AddError`, `ReadError`).

use thiserror::Error;

/// Errors that can occur while configuring a stream
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to allocate {words} quadlets for the {store} store")]
    Allocation { store: &'static str, words: usize },

    #[error("Loop order {order} does not match {coefficients} coefficients")]
    OrderMismatch { order: usize, coefficients: usize },

    #[error("Failed to parse configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to start thread: {0}")]
    Thread(String),
}

/// Result alias used by setup-time operations
pub type Result<T> = std::result::Result<T, Error>;
