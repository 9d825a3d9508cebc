//! Bridge lifecycle: owns the bus and manager sessions and wires the engine
//! between them.
//!
//! Startup order is strict: bus connection and exchange declarations first,
//! then the manager session (its event channel exists before the connection
//! is live, so nothing can slip past the forwarder), then the command queue
//! binding and consumption. Shutdown closes the manager session first so no
//! further events are generated, then the bus.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, error, info, warn};

use amibridge_ami_client::{ManagerSession, SessionEvent};

use crate::addressing::{self, CommandScope};
use crate::bus::BusSession;
use crate::command::{ActionSink, CommandDispatcher, CommandEnvelope};
use crate::config::BridgeConfig;
use crate::correlation::CorrelationRegistry;
use crate::error::Result;
use crate::forward::EventForwarder;

/// Why the bridge stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownCause {
    /// A termination signal was received
    Signal,
    /// The manager session failed beyond its own reconnect bound, or the
    /// command consumer ended
    TransportFatal,
}

/// Adapts the manager session to the dispatcher's write seam.
struct SessionSink {
    session: ManagerSession,
}

#[async_trait]
impl ActionSink for SessionSink {
    async fn send_action(&self, payload: &str) -> anyhow::Result<()> {
        self.session.send_action(payload).await?;
        Ok(())
    }
}

/// Owns both external sessions and runs the bridge until shutdown.
pub struct Bridge {
    config: BridgeConfig,
}

impl Bridge {
    /// Create a bridge from its configuration.
    pub fn new(config: BridgeConfig) -> Self {
        Bridge { config }
    }

    /// Run until a termination signal or an unrecoverable transport failure.
    pub async fn run(self) -> Result<ShutdownCause> {
        let config = self.config;

        let bus = Arc::new(BusSession::connect(&config.amqp_url).await?);
        bus.declare_topic_exchange(&config.events_exchange).await?;
        bus.declare_topic_exchange(&config.commands_exchange).await?;

        let registry = CorrelationRegistry::new(config.action_timeout);
        let forwarder = EventForwarder::new(
            bus.clone(),
            config.events_exchange.clone(),
            &config.events_key,
            config.host_identity.clone(),
        );

        let (session, mut session_events) = ManagerSession::connect(config.manager.clone()).await?;
        let dispatcher = CommandDispatcher::new(
            registry.clone(),
            Arc::new(SessionSink {
                session: session.clone(),
            }),
        );

        let pattern = addressing::subscribe_key(&config.commands_key, &CommandScope::Broadcast);
        let mut commands = bus
            .bind_command_queue(&config.commands_exchange, &pattern)
            .await?;

        info!(host = %config.host_identity, "Bridge running");

        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        let cause = loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Termination signal received");
                    break ShutdownCause::Signal;
                }
                maybe_event = session_events.recv() => match maybe_event {
                    Some(SessionEvent::Event(event)) => {
                        registry.deliver_event(&event);
                        forwarder.forward(event).await;
                    }
                    Some(SessionEvent::Response(response)) => {
                        match response.get_action_id() {
                            Some(token) => {
                                registry.deliver_response(&token, response);
                            }
                            None => debug!("Response without a correlation identifier"),
                        }
                    }
                    Some(SessionEvent::Connected) => info!("Manager session connected"),
                    Some(SessionEvent::Reconnecting { attempt }) => {
                        warn!(attempt, "Manager session reconnecting");
                    }
                    Some(SessionEvent::Disconnected) => warn!("Manager session disconnected"),
                    Some(SessionEvent::InternalError(message)) => {
                        error!(%message, "Manager session failed");
                        break ShutdownCause::TransportFatal;
                    }
                    None => {
                        error!("Manager session event stream ended");
                        break ShutdownCause::TransportFatal;
                    }
                },
                maybe_delivery = commands.next() => match maybe_delivery {
                    Some(Ok(delivery)) => {
                        let routing_key = delivery.routing_key.as_str();
                        if !addressing::is_addressed_to_us(
                            routing_key,
                            &config.commands_key,
                            &config.host_identity,
                        ) {
                            debug!(%routing_key, "Ignoring command for another host");
                            continue;
                        }
                        match CommandEnvelope::from_bytes(&delivery.data) {
                            Ok(envelope) => {
                                if let Err(error) = dispatcher.dispatch(envelope).await {
                                    warn!(%error, %routing_key, "Command dropped");
                                }
                            }
                            Err(error) => {
                                warn!(%error, %routing_key, "Discarding malformed command payload");
                            }
                        }
                    }
                    Some(Err(error)) => warn!(%error, "Command consume error"),
                    None => {
                        error!("Command consumer ended");
                        break ShutdownCause::TransportFatal;
                    }
                },
            }
        };

        session.close().await;
        bus.close().await;
        info!(?cause, "Bridge stopped");
        Ok(cause)
    }
}

/// Resolves when SIGTERM or ctrl-c is received.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(error) => {
                warn!(%error, "SIGTERM handler unavailable, falling back to ctrl-c");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
