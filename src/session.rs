// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Broker Capabilities
//!
//! The driver talks to the broker only through the traits in this module:
//! a [`Connector`] hands out short-lived [`Session`]s, a session declares
//! topology, publishes and opens delivery streams, and every [`Delivery`]
//! carries the [`Acknowledger`] used to settle it. The lapin-backed
//! implementation lives in [`crate::channel`].

use crate::{
    errors::AmqpError, exchange::ExchangeDefinition, queue::QueueBinding, queue::QueueDefinition,
};
use async_trait::async_trait;
use futures_util::{future::BoxFuture, stream::BoxStream};
use std::{collections::BTreeMap, fmt};
use tracing::warn;
use uuid::Uuid;

#[cfg(test)]
use mockall::automock;

/// Stream of deliveries produced by [`Session::open_delivery_stream`].
pub type DeliveryStream = BoxStream<'static, Result<Delivery, AmqpError>>;

/// Opens sessions on a broker connection.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open_session(&self) -> Result<Box<dyn Session>, AmqpError>;
}

/// A single channel on the broker connection.
///
/// Sessions are never shared: each operation opens its own and closes it
/// once done.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Session: Send + Sync {
    async fn declare_queue(&self, def: &QueueDefinition) -> Result<(), AmqpError>;

    async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), AmqpError>;

    async fn bind(&self, binding: &QueueBinding) -> Result<(), AmqpError>;

    async fn unbind(&self, binding: &QueueBinding) -> Result<(), AmqpError>;

    async fn publish(&self, message: &OutboundMessage) -> Result<(), AmqpError>;

    /// Starts consuming `queue`, limiting unacknowledged deliveries to
    /// `prefetch_count` when given.
    async fn open_delivery_stream(
        &self,
        queue: &str,
        prefetch_count: Option<u16>,
    ) -> Result<DeliveryStream, AmqpError>;

    async fn close(&self) -> Result<(), AmqpError>;
}

/// Settles a delivery on the broker.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self) -> Result<(), AmqpError>;

    async fn nack(&self, requeue: bool) -> Result<(), AmqpError>;
}

/// A message received from the broker.
///
/// `ack` and `nack` take the delivery by value, so a delivery is settled at
/// most once.
pub struct Delivery {
    pub body: Vec<u8>,
    pub headers: BTreeMap<String, String>,
    acker: Option<Box<dyn Acknowledger>>,
}

impl Delivery {
    pub fn new(body: Vec<u8>, acker: Box<dyn Acknowledger>) -> Self {
        Delivery {
            body,
            headers: BTreeMap::default(),
            acker: Some(acker),
        }
    }

    /// A delivery received before the stream finished its handshake.
    pub fn unbound(body: Vec<u8>) -> Self {
        Delivery {
            body,
            headers: BTreeMap::default(),
            acker: None,
        }
    }

    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    /// Whether the delivery can be settled.
    pub fn is_ready(&self) -> bool {
        self.acker.is_some()
    }

    pub async fn ack(self) -> Result<(), AmqpError> {
        match self.acker {
            Some(acker) => acker.ack().await,
            None => Err(AmqpError::AckMessageError(
                "acknowledger not bound".to_owned(),
            )),
        }
    }

    pub async fn nack(self, requeue: bool) -> Result<(), AmqpError> {
        match self.acker {
            Some(acker) => acker.nack(requeue).await,
            None => Err(AmqpError::NackMessageError(
                "acknowledger not bound".to_owned(),
            )),
        }
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("body_len", &self.body.len())
            .field("headers", &self.headers)
            .field("ready", &self.is_ready())
            .finish()
    }
}

/// A message about to be published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Target exchange; empty for the default exchange.
    pub exchange: String,
    pub routing_key: String,
    pub body: Vec<u8>,
    pub message_id: String,
    pub headers: BTreeMap<String, String>,
}

impl OutboundMessage {
    pub fn new(exchange: &str, routing_key: &str, body: &[u8]) -> Self {
        OutboundMessage {
            exchange: exchange.to_owned(),
            routing_key: routing_key.to_owned(),
            body: body.to_vec(),
            message_id: Uuid::new_v4().to_string(),
            headers: BTreeMap::default(),
        }
    }
}

/// Runs `op` on a freshly opened session and closes the session afterwards,
/// whatever `op` returned.
pub(crate) async fn with_session<T, F>(connector: &dyn Connector, op: F) -> Result<T, AmqpError>
where
    F: for<'s> FnOnce(&'s dyn Session) -> BoxFuture<'s, Result<T, AmqpError>>,
{
    let session = connector.open_session().await?;
    let result = op(session.as_ref()).await;
    close_session(session.as_ref()).await;
    result
}

pub(crate) async fn close_session(session: &dyn Session) {
    if let Err(err) = session.close().await {
        warn!(error = err.to_string(), "failure to close the session");
    }
}
