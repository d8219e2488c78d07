// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Channel Management
//!
//! lapin-backed implementation of the broker capabilities. One connection is
//! shared by the driver; every session is a fresh lapin channel that is
//! closed as soon as the operation using it is done.

use crate::{
    config::AmqpConfig,
    errors::AmqpError,
    exchange::ExchangeDefinition,
    queue::{QueueArgument, QueueBinding, QueueDefinition},
    session::{Acknowledger, Connector, Delivery, DeliveryStream, OutboundMessage, Session},
};
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    acker::Acker,
    message::Delivery as AmqpDelivery,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
        BasicQosOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    types::{AMQPValue, FieldTable, LongLongInt, LongString, ShortString},
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use std::{collections::BTreeMap, sync::Arc};
use tracing::{debug, error};
use uuid::Uuid;

/// Creates the connection every session of the driver is opened on.
///
/// # Parameters
/// * `cfg` - Connection details like host, port and credentials
///
/// # Example
/// ```ignore
/// let connector = new_amqp_connector(&AmqpConfig::default()).await?;
/// ```
pub async fn new_amqp_connector(cfg: &AmqpConfig) -> Result<AmqpConnector, AmqpError> {
    debug!("creating amqp connection...");
    let options = ConnectionProperties::default()
        .with_connection_name(LongString::from(cfg.connection_name.clone()));

    let conn = match Connection::connect(&cfg.uri(), options).await {
        Ok(c) => Ok(c),
        Err(err) => {
            error!(error = err.to_string(), "failure to connect");
            Err(AmqpError::ConnectionError(err.to_string()))
        }
    }?;
    debug!("amqp connected");

    Ok(AmqpConnector {
        conn: Arc::new(conn),
    })
}

/// Opens lapin channels on a shared connection.
#[derive(Clone)]
pub struct AmqpConnector {
    conn: Arc<Connection>,
}

#[async_trait]
impl Connector for AmqpConnector {
    async fn open_session(&self) -> Result<Box<dyn Session>, AmqpError> {
        match self.conn.create_channel().await {
            Ok(channel) => Ok(Box::new(AmqpSession { channel })),
            Err(err) => {
                error!(error = err.to_string(), "error to create the channel");
                Err(AmqpError::ChannelError(err.to_string()))
            }
        }
    }
}

/// A session backed by a single lapin channel.
pub struct AmqpSession {
    channel: Channel,
}

#[async_trait]
impl Session for AmqpSession {
    async fn declare_queue(&self, def: &QueueDefinition) -> Result<(), AmqpError> {
        debug!("creating queue: {}", def.name);

        match self
            .channel
            .queue_declare(
                &def.name,
                QueueDeclareOptions {
                    passive: false,
                    durable: def.durable,
                    exclusive: false,
                    auto_delete: false,
                    nowait: false,
                },
                queue_arguments(def),
            )
            .await
        {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    name = def.name.as_str(),
                    "error to declare the queue"
                );
                Err(AmqpError::DeclareQueueError(def.name.clone()))
            }
            _ => Ok(()),
        }
    }

    async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), AmqpError> {
        debug!("creating exchange: {}", def.name);

        match self
            .channel
            .exchange_declare(
                &def.name,
                (&def.kind).into(),
                ExchangeDeclareOptions {
                    passive: false,
                    durable: def.durable,
                    auto_delete: false,
                    internal: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    name = def.name.as_str(),
                    "error to declare the exchange"
                );
                Err(AmqpError::DeclareExchangeError(def.name.clone()))
            }
            _ => Ok(()),
        }
    }

    async fn bind(&self, binding: &QueueBinding) -> Result<(), AmqpError> {
        debug!(
            "binding queue: {} to the exchange: {} with the key: {}",
            binding.queue_name, binding.exchange_name, binding.routing_key
        );

        match self
            .channel
            .queue_bind(
                &binding.queue_name,
                &binding.exchange_name,
                &binding.routing_key,
                QueueBindOptions { nowait: false },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to bind queue to exchange");
                Err(AmqpError::BindingExchangeToQueueError(
                    binding.exchange_name.clone(),
                    binding.queue_name.clone(),
                ))
            }
            _ => Ok(()),
        }
    }

    async fn unbind(&self, binding: &QueueBinding) -> Result<(), AmqpError> {
        match self
            .channel
            .queue_unbind(
                &binding.queue_name,
                &binding.exchange_name,
                &binding.routing_key,
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to unbind queue from exchange");
                Err(AmqpError::UnbindingExchangeFromQueueError(
                    binding.exchange_name.clone(),
                    binding.queue_name.clone(),
                ))
            }
            _ => Ok(()),
        }
    }

    async fn publish(&self, message: &OutboundMessage) -> Result<(), AmqpError> {
        let mut headers = BTreeMap::<ShortString, AMQPValue>::default();
        for (key, value) in &message.headers {
            headers.insert(
                ShortString::from(key.clone()),
                AMQPValue::LongString(LongString::from(value.clone())),
            );
        }

        match self
            .channel
            .basic_publish(
                &message.exchange,
                &message.routing_key,
                BasicPublishOptions {
                    immediate: false,
                    mandatory: false,
                },
                &message.body,
                BasicProperties::default()
                    .with_message_id(ShortString::from(message.message_id.clone()))
                    .with_headers(FieldTable::from(headers)),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error publishing message");
                Err(AmqpError::PublishingError(err.to_string()))
            }
            _ => Ok(()),
        }
    }

    async fn open_delivery_stream(
        &self,
        queue: &str,
        prefetch_count: Option<u16>,
    ) -> Result<DeliveryStream, AmqpError> {
        if let Some(count) = prefetch_count {
            if let Err(err) = self
                .channel
                .basic_qos(count, BasicQosOptions { global: false })
                .await
            {
                error!(error = err.to_string(), "error to configure qos");
                return Err(AmqpError::QoSDeclarationError(err.to_string()));
            }
        }

        let consumer = match self
            .channel
            .basic_consume(
                queue,
                &format!("{}-{}", queue, Uuid::new_v4()),
                BasicConsumeOptions {
                    no_local: false,
                    no_ack: false,
                    exclusive: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to create the consumer");
                Err(AmqpError::ConsumerDeclarationError(err.to_string()))
            }
            Ok(c) => Ok(c),
        }?;

        Ok(consumer
            .map(|result| match result {
                Ok(delivery) => Ok(into_delivery(delivery)),
                Err(err) => Err(AmqpError::ConsumerError(err.to_string())),
            })
            .boxed())
    }

    async fn close(&self) -> Result<(), AmqpError> {
        self.channel
            .close(200, "OK")
            .await
            .map_err(|err| AmqpError::ChannelError(err.to_string()))
    }
}

/// Settles a delivery through the channel it arrived on.
pub struct AmqpAcker(Acker);

#[async_trait]
impl Acknowledger for AmqpAcker {
    async fn ack(&self) -> Result<(), AmqpError> {
        self.0
            .ack(BasicAckOptions { multiple: false })
            .await
            .map_err(|err| AmqpError::AckMessageError(err.to_string()))
    }

    async fn nack(&self, requeue: bool) -> Result<(), AmqpError> {
        self.0
            .nack(BasicNackOptions {
                multiple: false,
                requeue,
            })
            .await
            .map_err(|err| AmqpError::NackMessageError(err.to_string()))
    }
}

fn into_delivery(delivery: AmqpDelivery) -> Delivery {
    let mut headers = BTreeMap::new();
    if let Some(table) = delivery.properties.headers() {
        for (key, value) in table.inner() {
            if let AMQPValue::LongString(value) = value {
                if let Ok(value) = std::str::from_utf8(value.as_bytes()) {
                    headers.insert(key.as_str().to_owned(), value.to_owned());
                }
            }
        }
    }

    Delivery::new(delivery.data, Box::new(AmqpAcker(delivery.acker))).with_headers(headers)
}

fn queue_arguments(def: &QueueDefinition) -> FieldTable {
    let mut args = BTreeMap::new();

    for (key, value) in def.arguments() {
        let value = match value {
            QueueArgument::Text(text) => AMQPValue::LongString(LongString::from(text)),
            QueueArgument::Millis(ms) => {
                AMQPValue::LongLongInt(LongLongInt::try_from(ms).unwrap_or(LongLongInt::MAX))
            }
        };
        args.insert(ShortString::from(key), value);
    }

    FieldTable::from(args)
}
