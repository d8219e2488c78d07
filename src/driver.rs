// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Bus Driver
//!
//! The driver-facing API: queue and topic management, publishing and
//! consumption. `RabbitDriver` wires the delay registry, the publisher and
//! the consumption loop around a single broker connector.

use crate::{
    channel::new_amqp_connector,
    config::{AmqpConfig, DriverConfig},
    consumer::{ConsumeOptions, ConsumptionLoop},
    dispatcher::ConsumerHandler,
    errors::AmqpError,
    exchange::ExchangeDefinition,
    publisher::QueuePublisher,
    queue::QueueBinding,
    session::{with_session, Connector},
    topology::DelayRegistry,
};
use async_trait::async_trait;
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Operations a message bus expects from a broker driver.
#[async_trait]
pub trait BusDriver: Send + Sync {
    /// Declares the queue `name`, or its variant delayed by `delay`.
    async fn create_queue(&self, name: &str, delay: Duration) -> Result<(), AmqpError>;

    /// Declares the topic exchange `name`.
    async fn create_topic(&self, name: &str) -> Result<(), AmqpError>;

    /// Routes messages published on `topic` under `route_key` to `queue`.
    async fn subscribe(
        &self,
        topic: &str,
        queue: &str,
        route_key: &str,
    ) -> Result<(), AmqpError>;

    /// Removes a route added by [`BusDriver::subscribe`].
    async fn unsubscribe(
        &self,
        topic: &str,
        queue: &str,
        route_key: &str,
    ) -> Result<(), AmqpError>;

    /// Publishes `body` to `name`, delivered once `delay` has elapsed.
    ///
    /// # Parameters
    /// * `name` - The logical queue
    /// * `body` - Message payload
    /// * `delay` - Zero for immediate delivery
    async fn send_to_queue(
        &self,
        name: &str,
        body: &[u8],
        delay: Duration,
    ) -> Result<(), AmqpError>;

    async fn send_to_topic(
        &self,
        name: &str,
        body: &[u8],
        route_key: &str,
    ) -> Result<(), AmqpError>;

    /// Consumes `queue` until `cancel` fires. Asynchronous failures are
    /// pushed to `errors`, which the caller must keep draining.
    ///
    /// # Parameters
    /// * `cancel` - Stops the loop; in-flight deliveries are settled first
    /// * `queue` - A queue previously passed to [`BusDriver::create_queue`]
    /// * `errors` - Sink for stream, settlement and handler failures
    /// * `handler` - Decides whether each message is acked or requeued
    /// * `options` - Per-call consumption settings like the prefetch count
    ///
    /// # Returns
    /// `Ok(())` once cancelled, or [`AmqpError::UndeclaredQueue`]
    async fn receive_message(
        &self,
        cancel: CancellationToken,
        queue: &str,
        errors: mpsc::Sender<AmqpError>,
        handler: Arc<dyn ConsumerHandler>,
        options: ConsumeOptions,
    ) -> Result<(), AmqpError>;
}

/// RabbitMQ implementation of [`BusDriver`].
pub struct RabbitDriver {
    connector: Arc<dyn Connector>,
    registry: Arc<DelayRegistry>,
    publisher: QueuePublisher,
    consumption: ConsumptionLoop,
}

impl RabbitDriver {
    /// Creates a driver opening its sessions through `connector`.
    ///
    /// # Parameters
    /// * `connector` - Source of broker sessions
    /// * `cfg` - Worker pool size and retry backoff of the consumption loops
    ///
    /// # Returns
    /// A driver with an empty delay registry
    pub fn new(connector: Arc<dyn Connector>, cfg: &DriverConfig) -> Self {
        let registry = Arc::new(DelayRegistry::new(connector.clone()));

        RabbitDriver {
            publisher: QueuePublisher::new(connector.clone(), registry.clone()),
            consumption: ConsumptionLoop::new(connector.clone(), registry.clone(), cfg),
            connector,
            registry,
        }
    }

    /// Connects to the broker described by `amqp`.
    ///
    /// # Parameters
    /// * `amqp` - Connection details like host, port and credentials
    /// * `cfg` - Worker pool size and retry backoff of the consumption loops
    ///
    /// # Returns
    /// The connected driver, or [`AmqpError::ConnectionError`]
    pub async fn connect(amqp: &AmqpConfig, cfg: &DriverConfig) -> Result<Self, AmqpError> {
        let connector = new_amqp_connector(amqp).await?;
        Ok(RabbitDriver::new(Arc::new(connector), cfg))
    }

    async fn binding_for(
        &self,
        topic: &str,
        queue: &str,
        route_key: &str,
    ) -> Result<QueueBinding, AmqpError> {
        let target = self
            .registry
            .initial_binding_target(queue)
            .await
            .ok_or_else(|| AmqpError::UndeclaredQueue(queue.to_owned()))?;

        Ok(QueueBinding::new(&target)
            .exchange(topic)
            .routing_key(route_key))
    }
}

#[async_trait]
impl BusDriver for RabbitDriver {
    async fn create_queue(&self, name: &str, delay: Duration) -> Result<(), AmqpError> {
        self.registry.declare_queue(name, delay).await.map(|_| ())
    }

    async fn create_topic(&self, name: &str) -> Result<(), AmqpError> {
        let def = ExchangeDefinition::new(name).topic().durable();

        with_session(self.connector.as_ref(), move |session| {
            Box::pin(async move { session.declare_exchange(&def).await })
        })
        .await
    }

    async fn subscribe(
        &self,
        topic: &str,
        queue: &str,
        route_key: &str,
    ) -> Result<(), AmqpError> {
        let binding = self.binding_for(topic, queue, route_key).await?;

        with_session(self.connector.as_ref(), move |session| {
            Box::pin(async move { session.bind(&binding).await })
        })
        .await
    }

    async fn unsubscribe(
        &self,
        topic: &str,
        queue: &str,
        route_key: &str,
    ) -> Result<(), AmqpError> {
        let binding = self.binding_for(topic, queue, route_key).await?;

        with_session(self.connector.as_ref(), move |session| {
            Box::pin(async move { session.unbind(&binding).await })
        })
        .await
    }

    async fn send_to_queue(
        &self,
        name: &str,
        body: &[u8],
        delay: Duration,
    ) -> Result<(), AmqpError> {
        self.publisher.send_to_queue(name, body, delay).await
    }

    async fn send_to_topic(
        &self,
        name: &str,
        body: &[u8],
        route_key: &str,
    ) -> Result<(), AmqpError> {
        self.publisher.send_to_topic(name, body, route_key).await
    }

    async fn receive_message(
        &self,
        cancel: CancellationToken,
        queue: &str,
        errors: mpsc::Sender<AmqpError>,
        handler: Arc<dyn ConsumerHandler>,
        options: ConsumeOptions,
    ) -> Result<(), AmqpError> {
        self.consumption
            .run(cancel, queue, errors, handler, options)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dispatcher::{handler_fn, Verdict},
        queue::QueueDefinition,
        session::OutboundMessage,
        testing::{failing_connector, recording_connector_with_bindings},
    };
    use std::sync::Mutex;

    struct Fixture {
        driver: RabbitDriver,
        declared: Arc<Mutex<Vec<QueueDefinition>>>,
        published: Arc<Mutex<Vec<OutboundMessage>>>,
        bindings: Arc<Mutex<Vec<(QueueBinding, bool)>>>,
    }

    fn fixture() -> Fixture {
        let declared = Arc::new(Mutex::new(vec![]));
        let published = Arc::new(Mutex::new(vec![]));
        let bindings = Arc::new(Mutex::new(vec![]));
        let connector = recording_connector_with_bindings(
            declared.clone(),
            published.clone(),
            bindings.clone(),
        );

        Fixture {
            driver: RabbitDriver::new(Arc::new(connector), &DriverConfig::default()),
            declared,
            published,
            bindings,
        }
    }

    #[tokio::test]
    async fn should_bind_topic_to_first_declared_variant() {
        let f = fixture();

        f.driver.create_topic("test.topic").await.unwrap();
        f.driver
            .create_queue("test.queue", Duration::from_secs(1))
            .await
            .unwrap();
        f.driver
            .create_queue("test.queue", Duration::ZERO)
            .await
            .unwrap();
        f.driver
            .subscribe("test.topic", "test.queue", "test")
            .await
            .unwrap();
        f.driver
            .send_to_topic("test.topic", b"test.message", "test")
            .await
            .unwrap();

        assert_eq!(
            *f.bindings.lock().unwrap(),
            vec![(
                QueueBinding::new("test.queue.delay-1000")
                    .exchange("test.topic")
                    .routing_key("test"),
                true
            )]
        );
        let published = f.published.lock().unwrap();
        assert_eq!(published[0].exchange, "test.topic");
        assert_eq!(published[0].routing_key, "test");
    }

    #[tokio::test]
    async fn should_remove_binding_on_unsubscribe() {
        let f = fixture();
        f.driver
            .create_queue("test.queue", Duration::ZERO)
            .await
            .unwrap();

        f.driver
            .unsubscribe("test.topic", "test.queue", "test")
            .await
            .unwrap();

        assert_eq!(
            *f.bindings.lock().unwrap(),
            vec![(
                QueueBinding::new("test.queue")
                    .exchange("test.topic")
                    .routing_key("test"),
                false
            )]
        );
    }

    #[tokio::test]
    async fn should_refuse_to_bind_undeclared_queue() {
        let f = fixture();

        let result = f.driver.subscribe("test.topic", "test.queue", "test").await;

        assert_eq!(
            result,
            Err(AmqpError::UndeclaredQueue("test.queue".to_owned()))
        );
        assert!(f.bindings.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn should_create_each_delay_variant_once() {
        let f = fixture();

        for _ in 0..2 {
            f.driver
                .create_queue("orders", Duration::from_secs(1))
                .await
                .unwrap();
        }
        f.driver
            .send_to_queue("orders", b"order-1", Duration::from_secs(1))
            .await
            .unwrap();

        let names: Vec<_> = f
            .declared
            .lock()
            .unwrap()
            .iter()
            .map(|def| def.name().to_owned())
            .collect();
        assert_eq!(names, vec!["orders", "orders.delay-1000"]);
        assert_eq!(
            f.published.lock().unwrap()[0].routing_key,
            "orders.delay-1000"
        );
    }

    #[tokio::test]
    async fn should_surface_topic_declaration_failures() {
        let driver = RabbitDriver::new(Arc::new(failing_connector()), &DriverConfig::default());

        assert_eq!(
            driver.create_topic("test.topic").await,
            Err(AmqpError::DeclareExchangeError("test.topic".to_owned()))
        );
    }

    #[tokio::test]
    async fn should_refuse_to_receive_from_undeclared_queue() {
        let f = fixture();
        let (errors, _errors_rx) = mpsc::channel(1);

        let result = f
            .driver
            .receive_message(
                CancellationToken::new(),
                "test.queue",
                errors,
                Arc::new(handler_fn(|_: &[u8]| Verdict::Accept)),
                ConsumeOptions::new(),
            )
            .await;

        assert!(result.unwrap_err().is_contract_violation());
    }
}
