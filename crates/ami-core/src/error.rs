//! Error types for the AMI wire protocol

use thiserror::Error;

/// Result type for wire protocol operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while handling manager frames
#[derive(Debug, Clone, Error, PartialEq)]
pub enum Error {
    /// Frame could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),
}

impl Error {
    /// Create a parse error
    pub fn parse(message: impl Into<String>) -> Self {
        Error::Parse(message.into())
    }
}
