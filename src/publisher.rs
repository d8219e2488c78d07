// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Message Publisher
//!
//! Sends message bodies either straight to a queue, optionally delayed, or
//! to a topic exchange under a routing key. Each published message gets a
//! fresh message id and carries the current OpenTelemetry context in its
//! headers.

use crate::{
    errors::AmqpError,
    otel,
    session::{with_session, Connector, OutboundMessage},
    topology::DelayRegistry,
};
use std::{sync::Arc, time::Duration};
use tracing::error;

/// Exchange name routing directly to the queue named by the routing key.
pub const DEFAULT_EXCHANGE: &str = "";

/// Publishes message bodies on short-lived sessions.
pub struct QueuePublisher {
    connector: Arc<dyn Connector>,
    registry: Arc<DelayRegistry>,
}

impl QueuePublisher {
    pub fn new(connector: Arc<dyn Connector>, registry: Arc<DelayRegistry>) -> Self {
        QueuePublisher {
            connector,
            registry,
        }
    }

    /// Publishes `body` to the queue `name`, to be delivered after `delay`.
    ///
    /// The delay variant is declared on first use.
    ///
    /// # Parameters
    /// * `name` - The logical queue
    /// * `body` - Message payload
    /// * `delay` - Zero for immediate delivery
    ///
    /// # Returns
    /// [`AmqpError::PublishingError`] when the broker refuses the message
    pub async fn send_to_queue(
        &self,
        name: &str,
        body: &[u8],
        delay: Duration,
    ) -> Result<(), AmqpError> {
        let physical = match self.registry.resolve(name, delay).await {
            Some(physical) => physical,
            None => self.registry.declare_queue(name, delay).await?,
        };

        self.publish(OutboundMessage::new(DEFAULT_EXCHANGE, &physical, body))
            .await
    }

    /// Publishes `body` to the exchange `name` under `routing_key`.
    pub async fn send_to_topic(
        &self,
        name: &str,
        body: &[u8],
        routing_key: &str,
    ) -> Result<(), AmqpError> {
        self.publish(OutboundMessage::new(name, routing_key, body))
            .await
    }

    async fn publish(&self, mut message: OutboundMessage) -> Result<(), AmqpError> {
        otel::inject_current(&mut message.headers);

        with_session(self.connector.as_ref(), move |session| {
            Box::pin(async move { session.publish(&message).await })
        })
        .await
        .map_err(|err| match err {
            AmqpError::PublishingError(_) => err,
            other => {
                error!(error = other.to_string(), "error publishing message");
                AmqpError::PublishingError(other.to_string())
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        queue::QueueDefinition,
        session::MockConnector,
        testing::{failing_connector, recording_connector},
    };
    use std::sync::Mutex;

    struct Fixture {
        publisher: QueuePublisher,
        registry: Arc<DelayRegistry>,
        declared: Arc<Mutex<Vec<QueueDefinition>>>,
        published: Arc<Mutex<Vec<OutboundMessage>>>,
    }

    fn fixture() -> Fixture {
        let declared = Arc::new(Mutex::new(vec![]));
        let published = Arc::new(Mutex::new(vec![]));
        let connector: Arc<dyn Connector> =
            Arc::new(recording_connector(declared.clone(), published.clone()));
        let registry = Arc::new(DelayRegistry::new(connector.clone()));

        Fixture {
            publisher: QueuePublisher::new(connector, registry.clone()),
            registry,
            declared,
            published,
        }
    }

    #[tokio::test]
    async fn should_declare_delay_variant_on_first_send() {
        let f = fixture();

        f.publisher
            .send_to_queue("orders", b"order-1", Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(
            f.registry.resolve("orders", Duration::from_secs(1)).await,
            Some("orders.delay-1000".to_owned())
        );
        assert_eq!(f.declared.lock().unwrap().len(), 2);

        let published = f.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].exchange, DEFAULT_EXCHANGE);
        assert_eq!(published[0].routing_key, "orders.delay-1000");
        assert_eq!(published[0].body, b"order-1".to_vec());
    }

    #[tokio::test]
    async fn should_reuse_known_variant() {
        let f = fixture();
        f.registry.declare_queue("orders", Duration::ZERO).await.unwrap();

        f.publisher
            .send_to_queue("orders", b"a", Duration::ZERO)
            .await
            .unwrap();
        f.publisher
            .send_to_queue("orders", b"b", Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(f.declared.lock().unwrap().len(), 1);
        let published = f.published.lock().unwrap();
        assert!(published.iter().all(|m| m.routing_key == "orders"));
        assert_ne!(published[0].message_id, published[1].message_id);
    }

    #[tokio::test]
    async fn should_publish_to_topic_exchange() {
        let f = fixture();

        f.publisher
            .send_to_topic("orders.events", b"created", "orders.created")
            .await
            .unwrap();

        let published = f.published.lock().unwrap();
        assert_eq!(published[0].exchange, "orders.events");
        assert_eq!(published[0].routing_key, "orders.created");
        assert!(f.declared.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn should_surface_topology_failure_before_publishing() {
        let connector: Arc<dyn Connector> = Arc::new(failing_connector());
        let registry = Arc::new(DelayRegistry::new(connector.clone()));
        let publisher = QueuePublisher::new(connector, registry);

        let result = publisher
            .send_to_queue("orders", b"a", Duration::ZERO)
            .await;

        assert_eq!(result, Err(AmqpError::DeclareQueueError("orders".to_owned())));
    }

    #[tokio::test]
    async fn should_wrap_session_failures_as_publish_errors() {
        let mut connector = MockConnector::new();
        connector
            .expect_open_session()
            .returning(|| Err(AmqpError::ChannelError("connection closed".to_owned())));
        let connector: Arc<dyn Connector> = Arc::new(connector);
        let registry = Arc::new(DelayRegistry::new(connector.clone()));
        let publisher = QueuePublisher::new(connector, registry);

        let result = publisher
            .send_to_topic("orders.events", b"a", "orders.created")
            .await;

        assert!(matches!(result, Err(AmqpError::PublishingError(_))));
    }
}
