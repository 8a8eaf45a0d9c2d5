/*!
 * Error types for Brewlink Core.
 *
 * This module defines the foundation error type used by the core crate.
 * The bridge crate carries its own, richer error taxonomy for network and
 * discovery failures.
 */
use thiserror::Error;

/// Error type for core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Logging initialization failed
    #[error("Logging error: {0}")]
    Logging(String),

    /// Runtime error
    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl Error {
    /// Create a logging error
    pub fn logging<S: Into<String>>(message: S) -> Self {
        Error::Logging(message.into())
    }

    /// Create a runtime error
    pub fn runtime<S: Into<String>>(message: S) -> Self {
        Error::Runtime(message.into())
    }
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, Error>;
