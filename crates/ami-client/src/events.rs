//! Session lifecycle and traffic events.

use amibridge_ami_core::{AmiEvent, AmiResponse};

/// Events surfaced by a manager session, delivered in arrival order.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The session is connected and authenticated
    Connected,
    /// An asynchronous manager event
    Event(AmiEvent),
    /// A direct reply to an issued action
    Response(AmiResponse),
    /// The connection was lost (or closed locally)
    Disconnected,
    /// A reconnect attempt is about to be made
    Reconnecting {
        /// 1-based attempt counter
        attempt: u32,
    },
    /// The session hit an unrecoverable condition and stopped
    InternalError(String),
}
