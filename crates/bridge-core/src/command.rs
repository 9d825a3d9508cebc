//! Inbound command envelopes and their translation to manager actions.
//!
//! Each recognized `action_type` has a handler that turns the untyped
//! envelope into a concrete action plan. The handler table is open: new
//! command types are added with [`CommandDispatcher::register_handler`]
//! without touching the dispatch loop.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, trace, warn};

use amibridge_ami_core::{ActionId, AmiAction};

use crate::correlation::{CorrelationError, CorrelationRegistry, CorrelationWants, PendingAction};

/// Errors that can occur while dispatching a command
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The payload was empty or not a valid envelope
    #[error("Malformed command envelope: {0}")]
    Envelope(String),

    /// No handler is registered for the envelope's `action_type`
    #[error("Unrecognized action type: {0}")]
    UnknownActionType(String),

    /// A type-specific required field is missing
    #[error("Missing command field: {0}")]
    MissingField(&'static str),

    /// Correlation registration failed
    #[error(transparent)]
    Correlation(#[from] CorrelationError),

    /// The manager session write failed
    #[error("Failed to write action: {0}")]
    Sink(String),
}

/// Inbound command envelope as delivered on the commands topic.
///
/// `action_type` selects the handler; the remaining fields are untyped and
/// interpreted per type. Envelopes are parsed, dispatched, and discarded —
/// never persisted or retried.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandEnvelope {
    /// Handler selector
    pub action_type: String,
    /// Type-specific fields, order preserved
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl CommandEnvelope {
    /// Parse an envelope from raw bus bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DispatchError> {
        if bytes.is_empty() {
            return Err(DispatchError::Envelope("empty payload".to_string()));
        }
        serde_json::from_slice(bytes).map_err(|error| DispatchError::Envelope(error.to_string()))
    }

    /// A payload field as a string; numbers are stringified.
    pub fn string_field(&self, name: &str) -> Option<String> {
        self.payload.get(name).map(value_to_string)
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// A translated command: the action to send and the outcomes to observe.
#[derive(Debug, Clone)]
pub struct ActionPlan {
    /// The action, without its correlation identifier stamped yet
    pub action: AmiAction,
    /// Caller-supplied correlation identifier, if the command carries one
    pub token: Option<ActionId>,
    /// One-shot outcomes to register
    pub wants: CorrelationWants,
}

/// Translates one `action_type` into a manager action.
pub trait CommandHandler: Send + Sync {
    /// The `action_type` value this handler recognizes.
    fn action_type(&self) -> &'static str;

    /// Translate the envelope into a concrete action plan.
    fn plan(&self, envelope: &CommandEnvelope) -> Result<ActionPlan, DispatchError>;
}

/// Write side of the manager session, abstracted for dispatch.
///
/// Implementations must write each payload atomically: one encoded action is
/// never interleaved with another.
#[async_trait]
pub trait ActionSink: Send + Sync {
    /// Write one encoded action payload.
    async fn send_action(&self, payload: &str) -> anyhow::Result<()>;
}

/// Maps inbound envelopes to protocol actions.
///
/// Dispatch is stateless per invocation: every call resolves a handler,
/// obtains a correlation token (fresh unless the command supplies one),
/// registers the wanted outcomes, and writes the encoded action. Outcome
/// logging runs on a spawned task, so dispatching one command never blocks
/// the next.
pub struct CommandDispatcher {
    handlers: HashMap<&'static str, Box<dyn CommandHandler>>,
    registry: CorrelationRegistry,
    sink: Arc<dyn ActionSink>,
}

impl CommandDispatcher {
    /// Create a dispatcher with the built-in handler set.
    pub fn new(registry: CorrelationRegistry, sink: Arc<dyn ActionSink>) -> Self {
        let mut dispatcher = CommandDispatcher {
            handlers: HashMap::new(),
            registry,
            sink,
        };
        dispatcher.register_handler(Box::new(PingHandler));
        dispatcher.register_handler(Box::new(QueuePauseHandler { paused: true }));
        dispatcher.register_handler(Box::new(QueuePauseHandler { paused: false }));
        dispatcher.register_handler(Box::new(OriginateHandler));
        dispatcher
    }

    /// Add or replace the handler for an `action_type`.
    pub fn register_handler(&mut self, handler: Box<dyn CommandHandler>) {
        self.handlers.insert(handler.action_type(), handler);
    }

    /// Dispatch one envelope. Returns the correlation token stamped on the
    /// outbound action.
    pub async fn dispatch(&self, envelope: CommandEnvelope) -> Result<ActionId, DispatchError> {
        let action_type = envelope.action_type.clone();
        let handler = self
            .handlers
            .get(action_type.as_str())
            .ok_or_else(|| DispatchError::UnknownActionType(action_type.clone()))?;

        let ActionPlan {
            mut action,
            token,
            wants,
        } = handler.plan(&envelope)?;
        let token = token.unwrap_or_else(ActionId::generate);
        action.set_action_id(&token);

        let pending = self.registry.register(token.clone(), wants)?;
        let payload = action.encode();
        if let Err(error) = self.sink.send_action(&payload).await {
            // free the entry right away rather than waiting for its expiry
            self.registry.expire(&token);
            return Err(DispatchError::Sink(error.to_string()));
        }

        spawn_outcome_logger(action_type.clone(), pending);
        debug!(%action_type, %token, "Command dispatched");
        Ok(token)
    }
}

/// Logs whatever outcome the registration eventually resolves with.
fn spawn_outcome_logger(action_type: String, pending: PendingAction) {
    let token = pending.token;
    if let Some(response) = pending.response {
        let action_type = action_type.clone();
        let token = token.clone();
        tokio::spawn(async move {
            match response.await {
                Ok(Ok(response)) => debug!(
                    %action_type,
                    %token,
                    success = response.success(),
                    message = response.message().unwrap_or(""),
                    "Action response"
                ),
                Ok(Err(error)) => warn!(%action_type, %token, %error, "Action response outcome"),
                Err(_) => trace!(%action_type, %token, "Response interest retired"),
            }
        });
    }
    if let Some(event) = pending.event {
        tokio::spawn(async move {
            match event.await {
                Ok(Ok(event)) => debug!(
                    %action_type,
                    %token,
                    event = event.name(),
                    "Action event"
                ),
                Ok(Err(error)) => warn!(%action_type, %token, %error, "Action event outcome"),
                Err(_) => trace!(%action_type, %token, "Event interest retired"),
            }
        });
    }
}

/// `ping` → no-argument health check; the reply is logged.
struct PingHandler;

impl CommandHandler for PingHandler {
    fn action_type(&self) -> &'static str {
        "ping"
    }

    fn plan(&self, _envelope: &CommandEnvelope) -> Result<ActionPlan, DispatchError> {
        Ok(ActionPlan {
            action: AmiAction::new("Ping"),
            token: None,
            wants: CorrelationWants::response(),
        })
    }
}

/// `pause_queue_member` / `unpause_queue_member` → interface pause toggle.
struct QueuePauseHandler {
    paused: bool,
}

impl CommandHandler for QueuePauseHandler {
    fn action_type(&self) -> &'static str {
        if self.paused {
            "pause_queue_member"
        } else {
            "unpause_queue_member"
        }
    }

    fn plan(&self, envelope: &CommandEnvelope) -> Result<ActionPlan, DispatchError> {
        let member = envelope
            .string_field("member")
            .ok_or(DispatchError::MissingField("member"))?;
        let action = AmiAction::new("QueuePause")
            .field("Interface", format!("sip/{}", member))
            .field("Paused", if self.paused { "true" } else { "false" });
        Ok(ActionPlan {
            action,
            token: None,
            wants: CorrelationWants::response(),
        })
    }
}

/// `originate` → call origination from caller-supplied `keys` and `vars`
/// maps, taken verbatim and in order.
///
/// The correlation token is caller-supplied via `keys.ActionID` when present
/// (supporting idempotent retry from the sender's side) and generated
/// otherwise. The matching `OriginateResponse` event is the observed
/// outcome; the immediate reply is left unconsumed so the entry stays
/// pending until the event or the timeout.
struct OriginateHandler;

impl CommandHandler for OriginateHandler {
    fn action_type(&self) -> &'static str {
        "originate"
    }

    fn plan(&self, envelope: &CommandEnvelope) -> Result<ActionPlan, DispatchError> {
        let mut action = AmiAction::new("Originate");
        let mut token = None;

        if let Some(keys) = envelope.payload.get("keys").and_then(Value::as_object) {
            for (key, value) in keys {
                if key.eq_ignore_ascii_case("Action") {
                    continue;
                }
                if key.eq_ignore_ascii_case("ActionID") {
                    token = Some(ActionId::from(value_to_string(value)));
                    continue;
                }
                action = action.field(key.clone(), value_to_string(value));
            }
        }
        if let Some(vars) = envelope.payload.get("vars").and_then(Value::as_object) {
            for (name, value) in vars {
                action = action.variable(name.clone(), value_to_string(value));
            }
        }

        Ok(ActionPlan {
            action,
            token,
            wants: CorrelationWants::event(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::Mutex;

    /// Collects encoded payloads instead of writing them to a session.
    #[derive(Default)]
    struct MockSink {
        payloads: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl ActionSink for MockSink {
        async fn send_action(&self, payload: &str) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("wire is down");
            }
            self.payloads.lock().await.push(payload.to_string());
            Ok(())
        }
    }

    fn dispatcher_with_sink(sink: Arc<MockSink>) -> (CommandDispatcher, CorrelationRegistry) {
        let registry = CorrelationRegistry::new(Duration::from_secs(5));
        let dispatcher = CommandDispatcher::new(registry.clone(), sink);
        (dispatcher, registry)
    }

    fn envelope(json: &str) -> CommandEnvelope {
        CommandEnvelope::from_bytes(json.as_bytes()).unwrap()
    }

    #[tokio::test]
    async fn test_pause_queue_member_dispatch_table() {
        let sink = Arc::new(MockSink::default());
        let (dispatcher, _registry) = dispatcher_with_sink(sink.clone());

        let token = dispatcher
            .dispatch(envelope(r#"{"action_type":"pause_queue_member","member":"2857"}"#))
            .await
            .unwrap();

        let payloads = sink.payloads.lock().await;
        assert_eq!(payloads.len(), 1);
        let lines: Vec<&str> = payloads[0].split("\r\n").collect();
        assert_eq!(
            lines,
            vec![
                "Action: QueuePause",
                "Interface: sip/2857",
                "Paused: true",
                format!("ActionID: {}", token).as_str(),
            ]
        );
    }

    #[tokio::test]
    async fn test_unpause_queue_member() {
        let sink = Arc::new(MockSink::default());
        let (dispatcher, _registry) = dispatcher_with_sink(sink.clone());

        dispatcher
            .dispatch(envelope(r#"{"action_type":"unpause_queue_member","member":2857}"#))
            .await
            .unwrap();

        let payloads = sink.payloads.lock().await;
        assert!(payloads[0].contains("Interface: sip/2857"));
        assert!(payloads[0].contains("Paused: false"));
    }

    #[tokio::test]
    async fn test_pause_without_member_is_rejected() {
        let sink = Arc::new(MockSink::default());
        let (dispatcher, registry) = dispatcher_with_sink(sink.clone());

        let error = dispatcher
            .dispatch(envelope(r#"{"action_type":"pause_queue_member"}"#))
            .await
            .unwrap_err();
        assert!(matches!(error, DispatchError::MissingField("member")));
        assert!(sink.payloads.lock().await.is_empty());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_action_type_is_dropped() {
        let sink = Arc::new(MockSink::default());
        let (dispatcher, registry) = dispatcher_with_sink(sink.clone());

        let error = dispatcher
            .dispatch(envelope(r#"{"action_type":"reboot_everything"}"#))
            .await
            .unwrap_err();
        assert!(matches!(error, DispatchError::UnknownActionType(_)));
        assert!(sink.payloads.lock().await.is_empty());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_originate_preserves_caller_fields_and_token() {
        let sink = Arc::new(MockSink::default());
        let (dispatcher, registry) = dispatcher_with_sink(sink.clone());

        let token = dispatcher
            .dispatch(envelope(
                r#"{"action_type":"originate",
                    "keys":{"ActionID":"call-42","Channel":"SIP/100","Exten":"2857","Context":"outbound","Priority":1},
                    "vars":{"CALLERID":"2857","QUEUE":"support"}}"#,
            ))
            .await
            .unwrap();

        assert_eq!(token, ActionId::from("call-42"));
        let payloads = sink.payloads.lock().await;
        let lines: Vec<&str> = payloads[0].split("\r\n").collect();
        assert_eq!(
            lines,
            vec![
                "Action: Originate",
                "Channel: SIP/100",
                "Exten: 2857",
                "Context: outbound",
                "Priority: 1",
                "Variable: CALLERID=2857",
                "Variable: QUEUE=support",
                "ActionID: call-42",
            ]
        );
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_tokens_are_distinct_across_dispatches() {
        let sink = Arc::new(MockSink::default());
        let (dispatcher, _registry) = dispatcher_with_sink(sink.clone());

        let mut tokens = std::collections::HashSet::new();
        for _ in 0..10 {
            let token = dispatcher
                .dispatch(envelope(r#"{"action_type":"ping"}"#))
                .await
                .unwrap();
            tokens.insert(token);
        }
        assert_eq!(tokens.len(), 10);
    }

    #[tokio::test]
    async fn test_sink_failure_frees_the_registration() {
        let sink = Arc::new(MockSink {
            payloads: Mutex::new(Vec::new()),
            fail: true,
        });
        let (dispatcher, registry) = dispatcher_with_sink(sink);

        let error = dispatcher
            .dispatch(envelope(r#"{"action_type":"ping"}"#))
            .await
            .unwrap_err();
        assert!(matches!(error, DispatchError::Sink(_)));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_envelope_rejects_garbage() {
        assert!(matches!(
            CommandEnvelope::from_bytes(b""),
            Err(DispatchError::Envelope(_))
        ));
        assert!(matches!(
            CommandEnvelope::from_bytes(b"not json"),
            Err(DispatchError::Envelope(_))
        ));
        assert!(matches!(
            CommandEnvelope::from_bytes(br#"{"no_action_type":true}"#),
            Err(DispatchError::Envelope(_))
        ));
    }

    struct CustomHandler;

    impl CommandHandler for CustomHandler {
        fn action_type(&self) -> &'static str {
            "hangup"
        }

        fn plan(&self, envelope: &CommandEnvelope) -> Result<ActionPlan, DispatchError> {
            let channel = envelope
                .string_field("channel")
                .ok_or(DispatchError::MissingField("channel"))?;
            Ok(ActionPlan {
                action: AmiAction::new("Hangup").field("Channel", channel),
                token: None,
                wants: CorrelationWants::none(),
            })
        }
    }

    #[tokio::test]
    async fn test_registering_a_new_handler_extends_the_table() {
        let sink = Arc::new(MockSink::default());
        let (mut dispatcher, _registry) = dispatcher_with_sink(sink.clone());
        dispatcher.register_handler(Box::new(CustomHandler));

        dispatcher
            .dispatch(envelope(r#"{"action_type":"hangup","channel":"SIP/100-0001"}"#))
            .await
            .unwrap();

        let payloads = sink.payloads.lock().await;
        assert!(payloads[0].starts_with("Action: Hangup\r\nChannel: SIP/100-0001"));
    }
}
