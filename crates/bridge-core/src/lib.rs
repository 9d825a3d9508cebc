//! Action-correlation and routing engine for the amibridge stack
//!
//! Events flow manager session → event forwarder → events exchange; commands
//! flow commands exchange → addressing filter → command dispatcher → manager
//! session, with responses and correlated events matched back through the
//! correlation registry.

pub mod addressing;
pub mod bus;
pub mod command;
pub mod config;
pub mod correlation;
pub mod error;
pub mod forward;
pub mod logging;
pub mod supervisor;

// Re-export commonly used types and functions
pub use addressing::{is_addressed_to_us, publish_key, subscribe_key, CommandScope};
pub use command::{
    ActionPlan, ActionSink, CommandDispatcher, CommandEnvelope, CommandHandler, DispatchError,
};
pub use config::BridgeConfig;
pub use correlation::{
    CorrelationError, CorrelationRegistry, CorrelationWants, PendingAction,
};
pub use error::{BridgeError, Result};
pub use forward::{BusPublisher, EventForwarder};
pub use supervisor::{Bridge, ShutdownCause};

/// Re-export of common types for easier use
pub mod prelude {
    pub use crate::{
        Bridge, BridgeConfig, BridgeError, CommandDispatcher, CommandEnvelope, CommandScope,
        CorrelationRegistry, EventForwarder, Result, ShutdownCause,
    };
}
