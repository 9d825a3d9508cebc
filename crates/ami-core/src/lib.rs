//! AMI wire protocol primitives for the amibridge stack
//!
//! This crate provides the manager wire format: action construction and
//! encoding, frame parsing, and the response/event types produced by a
//! manager session.

pub mod action;
pub mod error;
pub mod message;
pub mod parser;

// Re-export commonly used types and functions
pub use action::{ActionId, AmiAction, LINE_TERMINATOR};
pub use error::{Error, Result};
pub use message::{AmiEvent, AmiFrame, AmiMessage, AmiResponse};

/// Re-export of common types for easier use
pub mod prelude {
    pub use crate::{
        ActionId, AmiAction, AmiEvent, AmiFrame, AmiMessage, AmiResponse, Error, Result,
        LINE_TERMINATOR,
    };
}
