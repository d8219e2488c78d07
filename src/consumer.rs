// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Resilient Consumption Loop
//!
//! Keeps a delivery stream open on one logical queue for as long as the
//! caller wants to consume it. Every failure to open or read the stream is
//! pushed to the error sink and followed by a pause before a fresh session
//! and stream are opened; the loop only ends when it is cancelled.
//!
//! A stream that ends, or that yields a delivery whose acknowledger is not
//! bound yet, is abandoned and rebuilt the same way: the broker still holds
//! the unsettled messages and redelivers them on the new stream.
//!
//! Each session feeds its own dispatcher. Whether the stream is being
//! rebuilt or the loop was cancelled, the loop stops reading, lets the
//! dispatcher settle every delivery it already accepted and only then closes
//! the channel those deliveries arrived on.

use crate::{
    config::DriverConfig,
    dispatcher::{report, ConsumerHandler, Dispatcher},
    errors::AmqpError,
    session::{close_session, Connector, Session},
    topology::DelayRegistry,
};
use futures_util::StreamExt;
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Per-call consumption settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumeOptions {
    /// Broker-side limit of unacknowledged deliveries per stream; the broker
    /// default applies when unset.
    pub prefetch_count: Option<u16>,
}

impl ConsumeOptions {
    pub fn new() -> Self {
        ConsumeOptions::default()
    }

    /// Limits how many unacknowledged deliveries the broker pushes.
    ///
    /// # Parameters
    /// * `count` - Maximum unacknowledged deliveries per stream
    ///
    /// # Returns
    /// Self for method chaining
    pub fn prefetch_count(mut self, count: u16) -> Self {
        self.prefetch_count = Some(count);
        self
    }
}

/// Runs consumption loops against the queues of a registry.
pub struct ConsumptionLoop {
    connector: Arc<dyn Connector>,
    registry: Arc<DelayRegistry>,
    workers: usize,
    backoff: Duration,
}

impl ConsumptionLoop {
    pub fn new(
        connector: Arc<dyn Connector>,
        registry: Arc<DelayRegistry>,
        cfg: &DriverConfig,
    ) -> Self {
        ConsumptionLoop {
            connector,
            registry,
            workers: cfg.workers(),
            backoff: cfg.backoff(),
        }
    }

    /// Consumes `queue` until `cancel` fires, handing every delivery to
    /// `handler` through a pool of workers.
    ///
    /// Returns [`AmqpError::UndeclaredQueue`] without opening any stream when
    /// `queue` was never declared. Every other failure is pushed to `errors`
    /// and retried.
    pub async fn run(
        &self,
        cancel: CancellationToken,
        queue: &str,
        errors: mpsc::Sender<AmqpError>,
        handler: Arc<dyn ConsumerHandler>,
        options: ConsumeOptions,
    ) -> Result<(), AmqpError> {
        if !self.registry.contains(queue).await {
            let err = AmqpError::UndeclaredQueue(queue.to_owned());
            error!(error = err.to_string(), "refusing to consume");
            return Err(err);
        }

        while !cancel.is_cancelled() {
            let opened = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                opened = self.connector.open_session() => opened,
            };

            let session = match opened {
                Ok(session) => session,
                Err(err) => {
                    if !self.back_off(&cancel, &errors, err).await {
                        break;
                    }
                    continue;
                }
            };

            // Deliveries are settled on the channel they arrived on, so the
            // workers fed by this session finish before it is closed.
            let dispatcher =
                Dispatcher::new(queue, self.workers, handler.clone(), errors.clone());
            let streamed = self
                .stream(session.as_ref(), &cancel, queue, &options, &dispatcher, &errors)
                .await;
            dispatcher.drain().await;
            close_session(session.as_ref()).await;

            if let Err(err) = streamed {
                if !self.back_off(&cancel, &errors, err).await {
                    break;
                }
            }
        }

        debug!("consumer for queue: {} stopped", queue);
        Ok(())
    }

    /// Pumps deliveries from a new stream into the dispatcher. Returns
    /// `Ok(())` once cancelled and an error when the stream must be rebuilt.
    async fn stream(
        &self,
        session: &dyn Session,
        cancel: &CancellationToken,
        queue: &str,
        options: &ConsumeOptions,
        dispatcher: &Dispatcher,
        errors: &mpsc::Sender<AmqpError>,
    ) -> Result<(), AmqpError> {
        let mut deliveries = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            opened = session.open_delivery_stream(queue, options.prefetch_count) => opened?,
        };
        debug!("consuming queue: {}", queue);

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                next = deliveries.next() => next,
            };

            let delivery = match next {
                Some(Ok(delivery)) if delivery.is_ready() => delivery,
                Some(Ok(_)) | None => return Err(AmqpError::StreamNotReady(queue.to_owned())),
                Some(Err(err)) => return Err(err),
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    if let Err(err) = delivery.nack(true).await {
                        report(errors, err).await;
                    }
                    return Ok(());
                }
                permit = dispatcher.reserve() => permit?.send(delivery),
            }
        }
    }

    /// Reports `err` and waits before the next attempt. Returns false when
    /// cancelled while waiting.
    async fn back_off(
        &self,
        cancel: &CancellationToken,
        errors: &mpsc::Sender<AmqpError>,
        err: AmqpError,
    ) -> bool {
        warn!(
            error = err.to_string(),
            "delivery stream failed, retrying in {:?}", self.backoff
        );

        tokio::select! {
            biased;
            _ = report(errors, err) => {}
            _ = cancel.cancelled() => return false,
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(self.backoff) => true,
        }
    }
}
