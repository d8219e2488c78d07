// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

mod otel;

#[cfg(test)]
mod testing;

pub mod channel;
pub mod config;
pub mod consumer;
pub mod dispatcher;
pub mod driver;
pub mod errors;
pub mod exchange;
pub mod publisher;
pub mod queue;
pub mod session;
pub mod topology;

pub use config::{AmqpConfig, DriverConfig};
pub use consumer::ConsumeOptions;
pub use dispatcher::{handler_fn, ConsumerHandler, Verdict};
pub use driver::{BusDriver, RabbitDriver};
pub use errors::{AmqpError, ErrorKind};
