//! AMQP bus session: topic exchanges, fire-and-forget publishing, and the
//! exclusive command queue.

use async_trait::async_trait;
use lapin::options::{
    BasicConsumeOptions, BasicPublishOptions, ExchangeDeclareOptions, QueueBindOptions,
    QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind};
use tracing::{debug, info};

use crate::error::Result;
use crate::forward::BusPublisher;

const CONSUMER_TAG: &str = "amibridge";

/// Connection plus the single channel the bridge uses.
pub struct BusSession {
    connection: Connection,
    channel: Channel,
}

impl BusSession {
    /// Connect to the bus server and open the channel.
    pub async fn connect(url: &str) -> Result<Self> {
        let connection = Connection::connect(url, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;
        info!("Bus connection established");
        Ok(BusSession {
            connection,
            channel,
        })
    }

    /// Declare a non-durable topic exchange.
    pub async fn declare_topic_exchange(&self, name: &str) -> Result<()> {
        self.channel
            .exchange_declare(
                name,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        debug!(exchange = %name, "Topic exchange declared");
        Ok(())
    }

    /// Declare an exclusive auto-named queue, bind it to `exchange` at
    /// `pattern`, and start a no-ack consumer on it.
    pub async fn bind_command_queue(&self, exchange: &str, pattern: &str) -> Result<Consumer> {
        let queue = self
            .channel
            .queue_declare(
                "",
                QueueDeclareOptions {
                    exclusive: true,
                    auto_delete: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        self.channel
            .queue_bind(
                queue.name().as_str(),
                exchange,
                pattern,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;
        let consumer = self
            .channel
            .basic_consume(
                queue.name().as_str(),
                CONSUMER_TAG,
                BasicConsumeOptions {
                    no_ack: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        info!(queue = %queue.name(), %exchange, %pattern, "Command queue bound");
        Ok(consumer)
    }

    /// Close the connection. Errors during shutdown are ignored.
    pub async fn close(&self) {
        let _ = self.connection.close(0, "shutting down").await;
    }
}

#[async_trait]
impl BusPublisher for BusSession {
    /// Fire-and-forget publish: no confirms, no retry. A message published
    /// while the bus is unavailable is gone.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> anyhow::Result<()> {
        self.channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default(),
            )
            .await?;
        Ok(())
    }
}
