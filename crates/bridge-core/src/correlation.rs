//! One-shot correlation of outbound actions to their responses and events.
//!
//! Responses and events for the same action arrive on independent channels
//! (direct reply vs. the broadcast event stream) and may arrive in either
//! order, or not at all. The registry decouples "action X was issued" from
//! "something eventually happened for X" without blocking the issuer: each
//! outbound action registers one-shot interests keyed by its correlation
//! identifier, and every registration is bounded by a timeout so an action
//! that is never answered cannot leak a pending entry.
//!
//! Outcomes are surfaced through `oneshot` receivers carrying a `Result`, so
//! a timeout reaches whichever caller would have received the callback.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::{sleep, Instant};
use tracing::{debug, trace};

use amibridge_ami_core::{ActionId, AmiEvent, AmiResponse};

/// Errors surfaced by the correlation registry
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CorrelationError {
    /// The identifier already has a pending registration
    #[error("Correlation identifier already registered: {token}")]
    DuplicateToken { token: ActionId },

    /// The pending entry expired before a response or event matched
    #[error("Action timed out: {token}")]
    ActionTimedOut { token: ActionId },
}

/// Which one-shot outcomes the issuer wants to observe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CorrelationWants {
    /// Capture the direct reply
    pub response: bool,
    /// Capture the matching event
    pub event: bool,
}

impl CorrelationWants {
    /// Capture the direct reply only.
    pub fn response() -> Self {
        CorrelationWants {
            response: true,
            event: false,
        }
    }

    /// Capture the matching event only.
    pub fn event() -> Self {
        CorrelationWants {
            response: false,
            event: true,
        }
    }

    /// Observe nothing; dispatch is fire-and-forget.
    pub fn none() -> Self {
        CorrelationWants::default()
    }

    /// Whether no outcome is requested.
    pub fn is_empty(&self) -> bool {
        !self.response && !self.event
    }
}

type ResponseResult = std::result::Result<AmiResponse, CorrelationError>;
type EventResult = std::result::Result<AmiEvent, CorrelationError>;

/// Receivers for the outcomes requested at registration.
///
/// A receiver resolves with `Ok` when the matching response/event arrives,
/// with `Err(ActionTimedOut)` on expiry, or with a receive error when the
/// entry was retired through the other channel.
#[derive(Debug)]
pub struct PendingAction {
    /// The correlation identifier the entry is keyed by
    pub token: ActionId,
    /// Resolves with the direct reply
    pub response: Option<oneshot::Receiver<ResponseResult>>,
    /// Resolves with the matching event
    pub event: Option<oneshot::Receiver<EventResult>>,
}

struct PendingEntry {
    response_tx: Option<oneshot::Sender<ResponseResult>>,
    event_tx: Option<oneshot::Sender<EventResult>>,
    created_at: Instant,
}

/// Registry of pending one-shot correlations.
///
/// Cheap to clone; all clones share the same entries. Mutation is lock-free
/// per entry and entries are fully independent: retiring one never touches
/// another.
#[derive(Clone)]
pub struct CorrelationRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    entries: DashMap<ActionId, PendingEntry>,
    timeout: Duration,
}

impl CorrelationRegistry {
    /// Create a registry whose registrations expire after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        CorrelationRegistry {
            inner: Arc::new(RegistryInner {
                entries: DashMap::new(),
                timeout,
            }),
        }
    }

    /// The configured entry lifetime.
    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    /// Register one-shot interests for `token`.
    ///
    /// With empty wants nothing is recorded and the returned receivers are
    /// both `None`. Otherwise the entry lives until a matching response or
    /// event retires it, or until the timeout expires it. Must be called
    /// from within a runtime (the expiry timer is spawned here).
    pub fn register(
        &self,
        token: ActionId,
        wants: CorrelationWants,
    ) -> std::result::Result<PendingAction, CorrelationError> {
        let mut pending = PendingAction {
            token: token.clone(),
            response: None,
            event: None,
        };
        if wants.is_empty() {
            return Ok(pending);
        }

        let mut entry = PendingEntry {
            response_tx: None,
            event_tx: None,
            created_at: Instant::now(),
        };
        if wants.response {
            let (tx, rx) = oneshot::channel();
            entry.response_tx = Some(tx);
            pending.response = Some(rx);
        }
        if wants.event {
            let (tx, rx) = oneshot::channel();
            entry.event_tx = Some(tx);
            pending.event = Some(rx);
        }

        match self.inner.entries.entry(token.clone()) {
            Entry::Occupied(_) => return Err(CorrelationError::DuplicateToken { token }),
            Entry::Vacant(slot) => {
                slot.insert(entry);
            }
        }
        self.spawn_expiry(token);

        Ok(pending)
    }

    /// Deliver a direct reply for `token`.
    ///
    /// If the entry registered a response interest it is fired exactly once
    /// and the whole entry is retired (any event interest is discarded with
    /// it). Unknown tokens — including already retired ones — are a no-op.
    /// An entry that registered only an event interest is left pending.
    pub fn deliver_response(&self, token: &ActionId, response: AmiResponse) -> bool {
        let removed = self
            .inner
            .entries
            .remove_if(token, |_, entry| entry.response_tx.is_some());
        match removed {
            Some((_, mut entry)) => {
                let fired = entry
                    .response_tx
                    .take()
                    .map(|tx| tx.send(Ok(response)).is_ok())
                    .unwrap_or(false);
                trace!(%token, fired, "Response correlated");
                fired
            }
            None => {
                trace!(%token, "Response with no pending listener");
                false
            }
        }
    }

    /// Deliver an asynchronous event.
    ///
    /// Looks up the event's correlation identifier directly; events without
    /// one (the majority) pass through in O(1). A pending entry with an
    /// event interest is fired exactly once and retired.
    pub fn deliver_event(&self, event: &AmiEvent) -> bool {
        let Some(token) = event.get_action_id() else {
            return false;
        };
        let removed = self
            .inner
            .entries
            .remove_if(&token, |_, entry| entry.event_tx.is_some());
        match removed {
            Some((_, mut entry)) => {
                let fired = entry
                    .event_tx
                    .take()
                    .map(|tx| tx.send(Ok(event.clone())).is_ok())
                    .unwrap_or(false);
                trace!(%token, event = %event.name(), fired, "Event correlated");
                fired
            }
            None => false,
        }
    }

    /// Forcibly retire a stale entry, reporting `ActionTimedOut` to every
    /// outstanding receiver. Returns false if the entry was already retired.
    pub fn expire(&self, token: &ActionId) -> bool {
        let Some((_, mut entry)) = self.inner.entries.remove(token) else {
            return false;
        };
        debug!(%token, elapsed = ?entry.created_at.elapsed(), "Expiring pending action");
        let timed_out = CorrelationError::ActionTimedOut {
            token: token.clone(),
        };
        if let Some(tx) = entry.response_tx.take() {
            let _ = tx.send(Err(timed_out.clone()));
        }
        if let Some(tx) = entry.event_tx.take() {
            let _ = tx.send(Err(timed_out));
        }
        true
    }

    /// Number of pending entries.
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    /// Whether no entries are pending.
    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    fn spawn_expiry(&self, token: ActionId) {
        let registry = self.clone();
        let timeout = self.inner.timeout;
        tokio::spawn(async move {
            sleep(timeout).await;
            registry.expire(&token);
        });
    }
}
