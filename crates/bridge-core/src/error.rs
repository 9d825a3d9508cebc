//! Error types for the bridge engine

use thiserror::Error;

/// Result type for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors that can occur while running the bridge
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Configuration error
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Bus transport error
    #[error("Bus error: {0}")]
    Bus(#[from] lapin::Error),

    /// Manager session error
    #[error("Manager session error: {0}")]
    Manager(#[from] amibridge_ami_client::Error),

    /// Command dispatch error
    #[error(transparent)]
    Dispatch(#[from] crate::command::DispatchError),

    /// Internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl BridgeError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        BridgeError::Config {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        BridgeError::Internal {
            message: message.into(),
        }
    }
}
