//! End-to-end tests for the correlation and routing engine, driven through a
//! mock manager write seam.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::sleep;

use amibridge_ami_core::{ActionId, AmiEvent, AmiFrame, AmiResponse};
use amibridge_bridge_core::{
    is_addressed_to_us, ActionSink, CommandDispatcher, CommandEnvelope, CorrelationRegistry,
    CorrelationWants,
};

/// Captures encoded payloads instead of writing them to a live session.
#[derive(Default)]
struct MockSink {
    payloads: Mutex<Vec<String>>,
}

#[async_trait]
impl ActionSink for MockSink {
    async fn send_action(&self, payload: &str) -> anyhow::Result<()> {
        self.payloads.lock().await.push(payload.to_string());
        Ok(())
    }
}

fn extract_action_id(payload: &str) -> ActionId {
    payload
        .split("\r\n")
        .find_map(|line| line.strip_prefix("ActionID: "))
        .map(ActionId::from)
        .expect("payload carries an ActionID")
}

fn response_for(token: &ActionId) -> AmiResponse {
    AmiResponse::from_frame(AmiFrame::from_pairs([
        ("Response", "Success"),
        ("ActionID", token.as_str()),
        ("Ping", "Pong"),
    ]))
}

#[tokio::test]
async fn test_ping_end_to_end() {
    let registry = CorrelationRegistry::new(Duration::from_secs(5));
    let sink = Arc::new(MockSink::default());
    let dispatcher = CommandDispatcher::new(registry.clone(), sink.clone());

    // inbound envelope addressed to this host
    let routing_key = "ccs.pbx.cmd.hostA";
    assert!(is_addressed_to_us(routing_key, "ccs.pbx.cmd", "hostA"));

    let envelope = CommandEnvelope::from_bytes(br#"{"action_type":"ping"}"#).unwrap();
    let token = dispatcher.dispatch(envelope).await.unwrap();

    // exactly one encoded Ping action reached the wire
    let payloads = sink.payloads.lock().await;
    assert_eq!(payloads.len(), 1);
    assert!(payloads[0].starts_with("Action: Ping\r\nActionID: "));
    assert_eq!(extract_action_id(&payloads[0]), token);
    drop(payloads);

    // a simulated matching response fires the listener exactly once and
    // removes the entry
    assert_eq!(registry.len(), 1);
    assert!(registry.deliver_response(&token, response_for(&token)));
    assert!(registry.is_empty());
    assert!(!registry.deliver_response(&token, response_for(&token)));
}

#[tokio::test]
async fn test_commands_for_other_hosts_are_filtered_before_dispatch() {
    let registry = CorrelationRegistry::new(Duration::from_secs(5));
    let sink = Arc::new(MockSink::default());
    let dispatcher = CommandDispatcher::new(registry.clone(), sink.clone());

    for (routing_key, ours) in [
        ("ccs.pbx.cmd", true),
        ("ccs.pbx.cmd.hostA", true),
        ("ccs.pbx.cmd.hostB", false),
    ] {
        if !is_addressed_to_us(routing_key, "ccs.pbx.cmd", "hostA") {
            assert!(!ours, "{} should have been accepted", routing_key);
            continue;
        }
        assert!(ours);
        let envelope = CommandEnvelope::from_bytes(br#"{"action_type":"ping"}"#).unwrap();
        dispatcher.dispatch(envelope).await.unwrap();
    }

    // only the broadcast marker and our host key produced wire traffic
    assert_eq!(sink.payloads.lock().await.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_dispatch_expires() {
    let registry = CorrelationRegistry::new(Duration::from_secs(1));
    let sink = Arc::new(MockSink::default());
    let dispatcher = CommandDispatcher::new(registry.clone(), sink.clone());

    let envelope = CommandEnvelope::from_bytes(br#"{"action_type":"ping"}"#).unwrap();
    let token = dispatcher.dispatch(envelope).await.unwrap();
    assert_eq!(registry.len(), 1);

    // nothing answers; the entry must be gone shortly after the timeout
    sleep(Duration::from_millis(1100)).await;
    assert!(registry.is_empty());

    // a late response is treated as an unknown token
    assert!(!registry.deliver_response(&token, response_for(&token)));
}

#[tokio::test]
async fn test_originate_event_outcome() {
    let registry = CorrelationRegistry::new(Duration::from_secs(5));
    let sink = Arc::new(MockSink::default());
    let dispatcher = CommandDispatcher::new(registry.clone(), sink.clone());

    let envelope = CommandEnvelope::from_bytes(
        br#"{"action_type":"originate","keys":{"ActionID":"call-7","Channel":"SIP/100","Exten":"2857"}}"#,
    )
    .unwrap();
    let token = dispatcher.dispatch(envelope).await.unwrap();
    assert_eq!(token, ActionId::from("call-7"));

    // the immediate reply does not retire the event interest
    assert!(!registry.deliver_response(&token, response_for(&token)));
    assert_eq!(registry.len(), 1);

    // the matching event does
    let event = AmiEvent::from_frame(AmiFrame::from_pairs([
        ("Event", "OriginateResponse"),
        ("ActionID", "call-7"),
        ("Response", "Success"),
    ]));
    assert!(registry.deliver_event(&event));
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_concurrent_dispatches_use_distinct_tokens() {
    let registry = CorrelationRegistry::new(Duration::from_secs(5));
    let sink = Arc::new(MockSink::default());
    let dispatcher = Arc::new(CommandDispatcher::new(registry.clone(), sink.clone()));

    let mut handles = Vec::new();
    for _ in 0..32 {
        let dispatcher = dispatcher.clone();
        handles.push(tokio::spawn(async move {
            let envelope = CommandEnvelope::from_bytes(br#"{"action_type":"ping"}"#).unwrap();
            dispatcher.dispatch(envelope).await.unwrap()
        }));
    }

    let mut tokens = std::collections::HashSet::new();
    for handle in handles {
        tokens.insert(handle.await.unwrap());
    }
    assert_eq!(tokens.len(), 32);
    assert_eq!(registry.len(), 32);
}

#[tokio::test]
async fn test_direct_registration_independence() {
    // response delivered for one token must not disturb another token's
    // pending event interest
    let registry = CorrelationRegistry::new(Duration::from_secs(5));
    let waiting = ActionId::from("waiting");
    let answered = ActionId::from("answered");

    registry
        .register(waiting.clone(), CorrelationWants::event())
        .unwrap();
    registry
        .register(answered.clone(), CorrelationWants::response())
        .unwrap();

    assert!(registry.deliver_response(&answered, response_for(&answered)));
    assert_eq!(registry.len(), 1);

    let event = AmiEvent::from_frame(AmiFrame::from_pairs([
        ("Event", "OriginateResponse"),
        ("ActionID", "waiting"),
    ]));
    assert!(registry.deliver_event(&event));
    assert!(registry.is_empty());
}
