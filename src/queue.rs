// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Definitions
//!
//! Builder types describing the queues the driver declares and the bindings
//! between queues and topic exchanges. Delay variants are plain queues with a
//! message TTL that dead-letter expired messages back into their logical queue.

use std::collections::BTreeMap;

/// Constant for the argument used to specify a dead letter exchange
pub const AMQP_HEADERS_DEAD_LETTER_EXCHANGE: &str = "x-dead-letter-exchange";
/// Constant for the argument used to specify a dead letter routing key
pub const AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY: &str = "x-dead-letter-routing-key";
/// Constant for the argument used to specify message TTL
pub const AMQP_HEADERS_MESSAGE_TTL: &str = "x-message-ttl";

/// Value of a queue declaration argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueArgument {
    Text(String),
    Millis(u64),
}

/// Definition of a queue with its declaration arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueDefinition {
    pub(crate) name: String,
    pub(crate) durable: bool,
    pub(crate) ttl: Option<u64>,
    pub(crate) dead_letter: Option<(String, String)>,
}

impl QueueDefinition {
    /// Creates a new, non-durable queue definition with the given name.
    ///
    /// # Parameters
    /// * `name` - The name of the queue
    ///
    /// # Returns
    /// A new queue definition without arguments
    pub fn new(name: &str) -> QueueDefinition {
        QueueDefinition {
            name: name.to_owned(),
            ..QueueDefinition::default()
        }
    }

    /// Makes the queue durable, persisting across broker restarts.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    /// Sets the message Time-To-Live.
    ///
    /// # Parameters
    /// * `millis` - How long a message stays in the queue, in milliseconds
    ///
    /// # Returns
    /// Self for method chaining
    pub fn ttl(mut self, millis: u64) -> Self {
        self.ttl = Some(millis);
        self
    }

    /// Routes expired or rejected messages to `routing_key` on `exchange`.
    ///
    /// An empty exchange name targets the broker's default exchange, which
    /// delivers straight to the queue named by the routing key.
    ///
    /// # Parameters
    /// * `exchange` - The dead-letter exchange
    /// * `routing_key` - The routing key expired messages are republished with
    pub fn dead_letter(mut self, exchange: &str, routing_key: &str) -> Self {
        self.dead_letter = Some((exchange.to_owned(), routing_key.to_owned()));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_durable(&self) -> bool {
        self.durable
    }

    /// Declaration arguments derived from the definition.
    pub fn arguments(&self) -> BTreeMap<&'static str, QueueArgument> {
        let mut args = BTreeMap::new();

        if let Some(ttl) = self.ttl {
            args.insert(AMQP_HEADERS_MESSAGE_TTL, QueueArgument::Millis(ttl));
        }

        if let Some((exchange, routing_key)) = &self.dead_letter {
            args.insert(
                AMQP_HEADERS_DEAD_LETTER_EXCHANGE,
                QueueArgument::Text(exchange.clone()),
            );
            args.insert(
                AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY,
                QueueArgument::Text(routing_key.clone()),
            );
        }

        args
    }
}

/// Binding of a queue to an exchange under a routing key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueBinding {
    pub(crate) queue_name: String,
    pub(crate) exchange_name: String,
    pub(crate) routing_key: String,
}

impl QueueBinding {
    /// Creates a new binding for the given queue with empty exchange and routing key.
    pub fn new(queue: &str) -> QueueBinding {
        QueueBinding {
            queue_name: queue.to_owned(),
            exchange_name: String::new(),
            routing_key: String::new(),
        }
    }

    /// Sets the exchange the queue is bound to.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn exchange(mut self, exchange: &str) -> Self {
        self.exchange_name = exchange.to_owned();
        self
    }

    pub fn routing_key(mut self, key: &str) -> Self {
        self.routing_key = key.to_owned();
        self
    }
}
