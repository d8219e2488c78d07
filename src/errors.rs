// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the RabbitMQ Bus Driver
//!
//! This module provides the error type shared by every layer of the driver.
//! The `AmqpError` enum is flat, one variant per failing operation, and
//! `ErrorKind` groups the variants into the categories a host application
//! reacts to: synchronous topology and publish failures, asynchronous stream
//! and acknowledgement failures reported on the error sink, and contract
//! violations that indicate a programming error.

use thiserror::Error;

/// Category of an [`AmqpError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Connecting to the broker failed.
    Connection,
    /// Declaring, binding or unbinding broker topology failed.
    Topology,
    /// Publishing a message failed.
    Publish,
    /// Opening or reading a delivery stream failed; the consumption loop retries.
    Stream,
    /// Settling a delivery failed.
    Ack,
    /// The caller broke the driver contract (e.g. consumed an undeclared queue).
    ContractViolation,
    /// Anything else.
    Internal,
}

/// Represents errors that can occur during AMQP/RabbitMQ operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmqpError {
    /// Internal errors that don't fit into other categories
    #[error("internal error")]
    InternalError,

    /// Error establishing a connection to the RabbitMQ server
    #[error("failure to connect `{0}`")]
    ConnectionError(String),

    /// Error opening a channel on an established connection
    #[error("failure to create a channel `{0}`")]
    ChannelError(String),

    /// Error declaring an exchange with the given name
    #[error("failure to declare an exchange `{0}`")]
    DeclareExchangeError(String),

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String),

    /// Error binding a queue to an exchange
    #[error("failure to bind queue `{1}` to exchange `{0}`")]
    BindingExchangeToQueueError(String, String),

    /// Error removing the binding between a queue and an exchange
    #[error("failure to unbind queue `{1}` from exchange `{0}`")]
    UnbindingExchangeFromQueueError(String, String),

    /// Error publishing a message
    #[error("failure to publish `{0}`")]
    PublishingError(String),

    /// Error configuring Quality of Service parameters
    #[error("failure to configure qos `{0}`")]
    QoSDeclarationError(String),

    /// Error declaring a consumer on a queue
    #[error("failure to declare consumer `{0}`")]
    ConsumerDeclarationError(String),

    /// Error reading from an open delivery stream
    #[error("failure to consume message `{0}`")]
    ConsumerError(String),

    /// The delivery stream ended or yielded a delivery without a bound acknowledger
    #[error("delivery stream for queue `{0}` is not usable, rebuilding")]
    StreamNotReady(String),

    /// Error acknowledging a message
    #[error("failure to ack message `{0}`")]
    AckMessageError(String),

    /// Error negative-acknowledging a message
    #[error("failure to nack message `{0}`")]
    NackMessageError(String),

    /// The consumer handler panicked while processing a delivery
    #[error("handler panicked while processing a message from `{0}`")]
    HandlerPanicked(String),

    /// Consumption was requested for a queue that was never declared
    #[error("the queue `{0}` does not exist, create it first")]
    UndeclaredQueue(String),
}

impl AmqpError {
    /// Returns the category this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AmqpError::InternalError => ErrorKind::Internal,
            AmqpError::ConnectionError(_) => ErrorKind::Connection,
            AmqpError::DeclareExchangeError(_)
            | AmqpError::DeclareQueueError(_)
            | AmqpError::BindingExchangeToQueueError(_, _)
            | AmqpError::UnbindingExchangeFromQueueError(_, _) => ErrorKind::Topology,
            AmqpError::PublishingError(_) => ErrorKind::Publish,
            AmqpError::ChannelError(_)
            | AmqpError::QoSDeclarationError(_)
            | AmqpError::ConsumerDeclarationError(_)
            | AmqpError::ConsumerError(_)
            | AmqpError::StreamNotReady(_) => ErrorKind::Stream,
            AmqpError::AckMessageError(_)
            | AmqpError::NackMessageError(_)
            | AmqpError::HandlerPanicked(_) => ErrorKind::Ack,
            AmqpError::UndeclaredQueue(_) => ErrorKind::ContractViolation,
        }
    }

    /// Whether the error reports a broken driver contract rather than a transient fault.
    pub fn is_contract_violation(&self) -> bool {
        self.kind() == ErrorKind::ContractViolation
    }
}
