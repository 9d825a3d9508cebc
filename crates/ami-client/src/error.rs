//! Error types for the manager session

use thiserror::Error;

/// Result type for manager session operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur on the manager session
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error on the underlying connection
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The manager rejected the login
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// The endpoint did not behave like a manager interface
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// The session has been closed locally
    #[error("Session is closed")]
    Closed,

    /// No live connection to write to
    #[error("Session is not connected")]
    NotConnected,
}

impl Error {
    /// Create an authentication error
    pub fn authentication(message: impl Into<String>) -> Self {
        Error::Authentication {
            message: message.into(),
        }
    }

    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Error::Protocol {
            message: message.into(),
        }
    }
}
