// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Driver Configuration
//!
//! Connection settings for the RabbitMQ server and tuning knobs for the
//! consumption side of the driver. Both structs deserialize from JSON with
//! every field optional, falling back to the defaults below.

use serde::Deserialize;
use std::time::Duration;

/// Default number of workers processing deliveries per consumed queue.
pub const DEFAULT_WORKERS: usize = 4;
/// Default pause between two attempts to rebuild a failed delivery stream.
pub const DEFAULT_BACKOFF_MS: u64 = 1000;

/// Connection parameters for the RabbitMQ server.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AmqpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub vhost: String,
    /// Name the connection is registered with on the broker.
    pub connection_name: String,
}

impl Default for AmqpConfig {
    fn default() -> Self {
        AmqpConfig {
            host: "localhost".to_owned(),
            port: 5672,
            user: "guest".to_owned(),
            password: "guest".to_owned(),
            vhost: "".to_owned(),
            connection_name: "easybus".to_owned(),
        }
    }
}

impl AmqpConfig {
    /// Builds the `amqp://` URI used to open the connection.
    pub fn uri(&self) -> String {
        format!(
            "amqp://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.vhost
        )
    }
}

/// Consumption settings shared by every `receive_message` call of a driver.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DriverConfig {
    /// Workers spawned per consumed queue. Values below 1 are raised to 1.
    pub workers: usize,
    /// Pause, in milliseconds, after a stream failure before reconnecting.
    pub backoff_ms: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        DriverConfig {
            workers: DEFAULT_WORKERS,
            backoff_ms: DEFAULT_BACKOFF_MS,
        }
    }
}

impl DriverConfig {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn workers(&self) -> usize {
        self.workers.max(1)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}
