//! Common error types for ClipMind

use thiserror::Error;

/// Common result type for ClipMind operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across ClipMind crates
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored value could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for errors that describe a missing record rather than a failed operation
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            #[cfg(feature = "sqlx")]
            Error::Database(sqlx::Error::RowNotFound) => true,
            _ => false,
        }
    }
}
