use crate::broker::{Acker, Broker, Consumer, Delivery};
use crate::transport::outbound::dispatch::Dispatch;
use crate::{AckError, BrokerError, Connector, Exchange, Handle, MessageProperties, YosunConfig};
use async_trait::async_trait;
use futures::StreamExt;
use lapin::acker::Acker as LapinAcker;
use lapin::message::Delivery as LapinDelivery;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicPublishOptions,
    ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::publisher_confirm::Confirmation;
use lapin::types::FieldTable;
use lapin::{Channel, Consumer as LapinConsumer, Error as LapinError, ExchangeKind};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

/// A [`Broker`] backed by a RabbitMQ cluster, spoken to through `lapin`.
///
/// Each consumer gets its own channel on the shared [`Connector`] connection.
/// Publishing goes through one cached channel with publisher confirms enabled;
/// a channel that fails to publish is dropped and replaced on the next attempt.
pub struct AmqpBroker {
    connector: Connector,
    acquire_timeout: Duration,
    publishing_channel: AsyncMutex<Option<Channel>>,
}

struct AmqpConsumer {
    channel: Channel,
    consumer: LapinConsumer,
    consumer_tag: String,
}

struct AmqpAcker {
    acker: LapinAcker,
}

impl AmqpBroker {
    /// Creates a broker for the given [`Handle`]. Publishing attempts give up
    /// on obtaining a channel after `acquire_timeout`.
    pub fn new(handle: impl AsRef<Handle>, acquire_timeout: Duration) -> Self {
        Self {
            connector: Connector::new(handle),
            acquire_timeout,
            publishing_channel: AsyncMutex::new(None),
        }
    }

    /// Creates a broker for the connection described by the given
    /// [`YosunConfig`].
    pub fn from_config(config: &YosunConfig) -> Self {
        Self::new(config.connection(), config.publishing().acquire_timeout())
    }

    /// Exposes the underlying [`Connector`].
    pub fn connector(&self) -> &Connector {
        &self.connector
    }
}

impl AmqpBroker {
    async fn declare_and_bind(
        channel: &Channel,
        exchange: &Exchange,
        binding_key: &str,
    ) -> Result<String, LapinError> {
        if exchange.is_custom() {
            channel
                .exchange_declare(
                    exchange.name(),
                    ExchangeKind::Topic,
                    ExchangeDeclareOptions {
                        passive: false,
                        durable: exchange.durable(),
                        auto_delete: exchange.auto_delete(),
                        internal: false,
                        nowait: false,
                    },
                    FieldTable::default(),
                )
                .await?;
        }

        // Server-named queue, gone as soon as this consumer is
        let queue = channel
            .queue_declare(
                "",
                QueueDeclareOptions {
                    passive: false,
                    durable: false,
                    exclusive: true,
                    auto_delete: true,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await?;

        channel
            .queue_bind(
                queue.name().as_str(),
                exchange.name(),
                binding_key,
                QueueBindOptions { nowait: false },
                FieldTable::default(),
            )
            .await?;

        Ok(queue.name().as_str().to_string())
    }

    async fn open_publishing_channel(&self) -> Result<Channel, BrokerError> {
        let channel = self
            .connector
            .channel_with_timeout(self.acquire_timeout)
            .await?;

        channel
            .confirm_select(ConfirmSelectOptions { nowait: false })
            .await
            .map_err(|error| BrokerError::Publish(error.to_string()))?;

        Ok(channel)
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    async fn consume(
        &self,
        exchange: &Exchange,
        binding_key: &str,
        consumer_tag: &str,
    ) -> Result<Box<dyn Consumer>, BrokerError> {
        let channel = self.connector.channel().await?;

        let queue = Self::declare_and_bind(&channel, exchange, binding_key)
            .await
            .map_err(|error| BrokerError::Declaration {
                exchange: exchange.name().to_string(),
                binding_key: binding_key.to_string(),
                reason: error.to_string(),
            })?;

        let consumer = channel
            .basic_consume(
                &queue,
                consumer_tag,
                BasicConsumeOptions {
                    no_local: false,
                    no_ack: false,
                    exclusive: true,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
            .map_err(|error| BrokerError::Consume(error.to_string()))?;

        Ok(Box::new(AmqpConsumer {
            channel,
            consumer,
            consumer_tag: consumer_tag.to_string(),
        }))
    }

    async fn publish(&self, exchange: &Exchange, dispatch: &Dispatch) -> Result<(), BrokerError> {
        let mut guard = self.publishing_channel.lock().await;

        let channel = match guard.take() {
            Some(channel) => channel,
            None => self.open_publishing_channel().await?,
        };

        let result = async {
            channel
                .basic_publish(
                    exchange.name(),
                    dispatch.routing_key(),
                    BasicPublishOptions::default(),
                    dispatch.bytes(),
                    dispatch.properties().to_amqp(),
                )
                .await?
                .await
        }
        .await;

        match result {
            Ok(Confirmation::Nack(_)) => {
                *guard = Some(channel);

                Err(BrokerError::Publish(
                    "the broker rejected the message".to_string(),
                ))
            }
            Ok(_) => {
                *guard = Some(channel);

                Ok(())
            }
            // The channel goes with the failure
            Err(error) => Err(BrokerError::Publish(error.to_string())),
        }
    }

    async fn close(&self) {
        self.publishing_channel.lock().await.take();
        self.connector.close().await;
    }
}

#[async_trait]
impl Consumer for AmqpConsumer {
    async fn next(&mut self) -> Option<Result<Delivery, BrokerError>> {
        let result = self.consumer.next().await?;

        Some(
            result
                .map(Delivery::from)
                .map_err(|error| BrokerError::ConnectionLost(error.to_string())),
        )
    }

    async fn close(self: Box<Self>) {
        if !self.channel.status().connected() {
            return;
        }

        let cancelled = self
            .channel
            .basic_cancel(&self.consumer_tag, BasicCancelOptions { nowait: false })
            .await;

        let closed = self.channel.close(200, "Consumer closed").await;

        if let Err(error) = cancelled.and(closed) {
            debug!(
                consumer_tag = self.consumer_tag.as_str(),
                ?error,
                error_message = %error,
                "Failed to cleanly close a RabbitMQ consumer channel",
            );
        }
    }
}

#[async_trait]
impl Acker for AmqpAcker {
    async fn ack(&self) -> Result<(), AckError> {
        self.acker
            .ack(BasicAckOptions { multiple: false })
            .await
            .map_err(|error| match error {
                LapinError::ProtocolError(_)
                | LapinError::InvalidChannelState(_)
                | LapinError::InvalidConnectionState(_) => AckError::InvalidState,
                other => AckError::Broker(other.to_string()),
            })
    }
}

impl From<LapinDelivery> for Delivery {
    fn from(delivery: LapinDelivery) -> Self {
        Self {
            delivery_tag: delivery.delivery_tag,
            exchange: delivery.exchange.as_str().to_string(),
            routing_key: delivery.routing_key.as_str().to_string(),
            redelivered: delivery.redelivered,
            properties: MessageProperties::from_amqp(&delivery.properties),
            bytes: delivery.data,
            acker: Box::new(AmqpAcker {
                acker: delivery.acker,
            }),
        }
    }
}
