use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
        ConfirmSelectOptions, QueueDeclareOptions,
    },
    types::{FieldTable, ShortString},
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::broker::{Broker, BrokerError, Delivery, DeliveryStream, DeliveryTag};
use crate::utils::{retry_with_backoff, RetryConfig, RetryResult};

/// Publishes to the default exchange, so the routing key is the queue name.
const DEFAULT_EXCHANGE: &str = "";
const PERSISTENT: u8 = 2;

/// RabbitMQ broker bound to a single connection and channel.
///
/// The channel runs in publisher-confirm mode: `publish` resolves only
/// after the broker confirmed the message.
pub struct RabbitMqBroker {
    connection: Connection,
    channel: Arc<Mutex<Channel>>,
    consumer_tag: String,
}

impl RabbitMqBroker {
    pub async fn connect(url: &str, prefetch: u16) -> Result<Self, BrokerError> {
        let connection = Connection::connect(url, ConnectionProperties::default())
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        channel
            .basic_qos(prefetch, BasicQosOptions::default())
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        let consumer_tag = format!("provider-relay-{}", Uuid::new_v4());

        tracing::info!(
            channel_id = channel.id(),
            prefetch = prefetch,
            consumer_tag = %consumer_tag,
            "Connected to RabbitMQ"
        );

        Ok(Self {
            connection,
            channel: Arc::new(Mutex::new(channel)),
            consumer_tag,
        })
    }

    /// Connect with exponential backoff; the last error is returned once
    /// all attempts are exhausted.
    pub async fn connect_with_retry(
        url: &str,
        prefetch: u16,
        retry: RetryConfig,
    ) -> Result<Self, BrokerError> {
        match retry_with_backoff(retry, |_attempt| Self::connect(url, prefetch)).await {
            RetryResult::Success(broker) => Ok(broker),
            RetryResult::Failed(error) => Err(error),
        }
    }
}

#[async_trait]
impl Broker for RabbitMqBroker {
    async fn declare_queue(&self, queue: &str) -> Result<(), BrokerError> {
        let options = QueueDeclareOptions {
            durable: true,
            ..QueueDeclareOptions::default()
        };

        let channel = self.channel.lock().await;
        channel
            .queue_declare(queue, options, FieldTable::default())
            .await
            .map_err(|e| BrokerError::Declare {
                queue: queue.to_string(),
                reason: e.to_string(),
            })?;

        tracing::debug!(queue = %queue, "Declared durable queue");
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<DeliveryStream, BrokerError> {
        let consumer = {
            let channel = self.channel.lock().await;
            channel
                .basic_consume(
                    queue,
                    &self.consumer_tag,
                    BasicConsumeOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(|e| BrokerError::Consume {
                    queue: queue.to_string(),
                    reason: e.to_string(),
                })?
        };

        let queue = queue.to_string();
        let deliveries = consumer.map(move |item| match item {
            Ok(delivery) => Ok(Delivery {
                tag: DeliveryTag(delivery.delivery_tag),
                body: delivery.data,
                redelivered: delivery.redelivered,
            }),
            Err(e) => Err(BrokerError::Consume {
                queue: queue.clone(),
                reason: e.to_string(),
            }),
        });

        Ok(deliveries.boxed())
    }

    async fn publish(&self, queue: &str, body: &[u8]) -> Result<(), BrokerError> {
        let properties = BasicProperties::default()
            .with_delivery_mode(PERSISTENT)
            .with_content_type(ShortString::from("application/json"))
            .with_message_id(ShortString::from(Uuid::new_v4().to_string()));

        let publish_error = |reason: String| BrokerError::Publish {
            queue: queue.to_string(),
            reason,
        };

        let channel = self.channel.lock().await;
        let confirmation = channel
            .basic_publish(
                DEFAULT_EXCHANGE,
                queue,
                BasicPublishOptions::default(),
                body,
                properties,
            )
            .await
            .map_err(|e| publish_error(e.to_string()))?
            .await
            .map_err(|e| publish_error(e.to_string()))?;

        if confirmation.is_nack() {
            return Err(publish_error("broker rejected the message".to_string()));
        }

        Ok(())
    }

    async fn ack(&self, tag: DeliveryTag) -> Result<(), BrokerError> {
        let channel = self.channel.lock().await;
        channel
            .basic_ack(tag.0, BasicAckOptions::default())
            .await
            .map_err(|e| BrokerError::Ack {
                tag,
                reason: e.to_string(),
            })
    }

    async fn close(&self) -> Result<(), BrokerError> {
        {
            let channel = self.channel.lock().await;
            channel
                .close(200, "shutdown")
                .await
                .map_err(|e| BrokerError::Connection(e.to_string()))?;
        }

        self.connection
            .close(200, "shutdown")
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        tracing::info!("RabbitMQ connection closed");
        Ok(())
    }
}
