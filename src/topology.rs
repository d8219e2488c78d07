// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Delay Topology Registry
//!
//! Every logical queue can be published to with a delay. A delay is served
//! by a dedicated broker queue whose messages expire after the delay and are
//! dead-lettered into the logical queue. The registry declares those queues
//! on demand and remembers the physical queue behind each
//! `(logical name, delay)` pair, as well as the first physical queue declared
//! for each logical name, which is the one bound to topic exchanges.

use crate::{
    errors::AmqpError,
    queue::QueueDefinition,
    session::{with_session, Connector},
};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Default)]
struct RegistryState {
    queues: HashMap<String, HashMap<Duration, String>>,
    initial: HashMap<String, String>,
}

/// Owner of the `(logical queue, delay) -> physical queue` mapping.
///
/// Lookups take a shared lock; recording a new variant takes the write lock
/// only after the broker accepted the declaration, so no lock is held while
/// talking to the broker.
pub struct DelayRegistry {
    connector: Arc<dyn Connector>,
    state: RwLock<RegistryState>,
}

/// Name of the queue holding messages of `name` delayed by `delay`.
pub fn delay_queue_name(name: &str, delay: Duration) -> String {
    format!("{}.delay-{}", name, delay.as_millis())
}

impl DelayRegistry {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        DelayRegistry {
            connector,
            state: RwLock::new(RegistryState::default()),
        }
    }

    /// Declares the logical queue `name` and, for a non-zero `delay`, its
    /// delay variant. Returns the physical queue to publish to.
    ///
    /// Declaring a pair that is already known returns the recorded queue
    /// without contacting the broker. Broker failures are returned as they
    /// are and leave the registry untouched.
    ///
    /// # Parameters
    /// * `name` - The logical queue
    /// * `delay` - Zero for the logical queue itself
    ///
    /// # Returns
    /// The physical queue name, e.g. `orders.delay-1000`
    pub async fn declare_queue(&self, name: &str, delay: Duration) -> Result<String, AmqpError> {
        if let Some(physical) = self.resolve(name, delay).await {
            return Ok(physical);
        }

        let base = QueueDefinition::new(name).durable();
        let (physical, variant) = if delay.is_zero() {
            (name.to_owned(), None)
        } else {
            let physical = delay_queue_name(name, delay);
            let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
            let def = QueueDefinition::new(&physical)
                .durable()
                .ttl(millis)
                .dead_letter("", name);
            (physical, Some(def))
        };

        with_session(self.connector.as_ref(), move |session| {
            Box::pin(async move {
                session.declare_queue(&base).await?;
                if let Some(def) = variant {
                    session.declare_queue(&def).await?;
                }
                Ok(())
            })
        })
        .await?;

        debug!("queue: {} declared for {} with delay {:?}", physical, name, delay);

        Ok(self.record(name, delay, physical).await)
    }

    /// Physical queue recorded for `(name, delay)`, if any.
    pub async fn resolve(&self, name: &str, delay: Duration) -> Option<String> {
        let state = self.state.read().await;
        state
            .queues
            .get(name)
            .and_then(|variants| variants.get(&delay))
            .cloned()
    }

    /// Physical queue recorded by the first declaration of `name`.
    pub async fn initial_binding_target(&self, name: &str) -> Option<String> {
        self.state.read().await.initial.get(name).cloned()
    }

    /// Whether any variant of `name` has been declared.
    pub async fn contains(&self, name: &str) -> bool {
        self.state.read().await.queues.contains_key(name)
    }

    async fn record(&self, name: &str, delay: Duration, physical: String) -> String {
        let mut state = self.state.write().await;

        let physical = state
            .queues
            .entry(name.to_owned())
            .or_default()
            .entry(delay)
            .or_insert(physical)
            .clone();

        state
            .initial
            .entry(name.to_owned())
            .or_insert_with(|| physical.clone());

        physical
    }
}
