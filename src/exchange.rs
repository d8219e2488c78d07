// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Exchange Definitions
//!
//! Exchanges are the routing mechanism used by `send_to_topic`. Queues are
//! reached through the broker's default direct exchange; the driver itself
//! only declares topic exchanges.

/// Represents the types of exchanges the driver routes through.
///
/// - Direct: Routes messages to queues based on an exact match of routing keys
/// - Topic: Routes messages based on wildcard pattern matching of routing keys
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ExchangeKind {
    #[default]
    Direct,
    Topic,
}

impl From<&ExchangeKind> for lapin::ExchangeKind {
    fn from(kind: &ExchangeKind) -> Self {
        match kind {
            ExchangeKind::Direct => lapin::ExchangeKind::Direct,
            ExchangeKind::Topic => lapin::ExchangeKind::Topic,
        }
    }
}

/// Definition of an exchange with its declaration flags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExchangeDefinition {
    pub(crate) name: String,
    pub(crate) kind: ExchangeKind,
    pub(crate) durable: bool,
}

impl ExchangeDefinition {
    /// Creates a new exchange definition with the given name.
    ///
    /// By default, the exchange is a transient Direct exchange.
    ///
    /// # Parameters
    /// * `name` - The name of the exchange
    ///
    /// # Returns
    /// A new exchange definition with default settings
    pub fn new(name: &str) -> ExchangeDefinition {
        ExchangeDefinition {
            name: name.to_owned(),
            ..ExchangeDefinition::default()
        }
    }

    /// Sets the exchange type to Topic.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn topic(mut self) -> Self {
        self.kind = ExchangeKind::Topic;
        self
    }

    /// Makes the exchange durable, persisting across broker restarts.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_build_durable_topic_exchange() {
        let def = ExchangeDefinition::new("orders.events").topic().durable();

        assert_eq!(def.name(), "orders.events");
        assert_eq!(def.kind, ExchangeKind::Topic);
        assert!(def.durable);
        assert!(matches!(
            lapin::ExchangeKind::from(&def.kind),
            lapin::ExchangeKind::Topic
        ));
    }

    #[test]
    fn should_default_to_transient_direct_exchange() {
        let def = ExchangeDefinition::new("orders.direct");

        assert_eq!(def.kind, ExchangeKind::Direct);
        assert!(!def.durable);
        assert!(matches!(
            lapin::ExchangeKind::from(&def.kind),
            lapin::ExchangeKind::Direct
        ));
    }
}
