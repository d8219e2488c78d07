// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Bounded Concurrent Dispatcher
//!
//! A fixed pool of workers fed through a bounded queue. Each worker hands a
//! delivery body to the consumer handler and settles the delivery according
//! to the handler's verdict: accepted deliveries are acked, rejected ones are
//! nacked and requeued for another attempt. A handler that panics is treated
//! as a rejection, so every delivery taken by a worker is settled.
//!
//! Settlement failures are not retried; they are pushed to the error sink.
//! Deliveries may complete in any order once they fan out to several workers.

use crate::{
    errors::AmqpError,
    otel::{self, CONSUMER_TRACER},
    session::Delivery,
};
use async_trait::async_trait;
use futures_util::FutureExt;
use opentelemetry::{
    global::{self, BoxedTracer},
    trace::{Span, Status},
};
use std::{borrow::Cow, panic::AssertUnwindSafe, sync::Arc};
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinSet,
};
use tracing::{debug, error, warn};

/// Outcome of handling a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The message was processed; ack it.
    Accept,
    /// The message must be redelivered; nack it with requeue.
    Reject,
}

impl From<bool> for Verdict {
    fn from(accepted: bool) -> Self {
        if accepted {
            Verdict::Accept
        } else {
            Verdict::Reject
        }
    }
}

/// Processes message bodies received from a queue.
#[async_trait]
pub trait ConsumerHandler: Send + Sync {
    async fn exec(&self, body: &[u8]) -> Verdict;
}

/// Handler built from a synchronous closure, see [`handler_fn`].
pub struct FnHandler<F>(F);

/// Wraps a closure returning a [`Verdict`] as a handler.
pub fn handler_fn<F>(f: F) -> FnHandler<F>
where
    F: Fn(&[u8]) -> Verdict + Send + Sync,
{
    FnHandler(f)
}

#[async_trait]
impl<F> ConsumerHandler for FnHandler<F>
where
    F: Fn(&[u8]) -> Verdict + Send + Sync,
{
    async fn exec(&self, body: &[u8]) -> Verdict {
        (self.0)(body)
    }
}

/// Pushes `err` to the error sink, waiting for room if the sink is full.
pub(crate) async fn report(errors: &mpsc::Sender<AmqpError>, err: AmqpError) {
    if let Err(mpsc::error::SendError(err)) = errors.send(err).await {
        warn!(error = err.to_string(), "error sink closed, dropping error");
    }
}

/// Pool of workers settling deliveries of one queue.
pub struct Dispatcher {
    queue: String,
    sender: mpsc::Sender<Delivery>,
    workers: JoinSet<()>,
}

impl Dispatcher {
    /// Spawns `workers` workers (at least one) running `handler`.
    ///
    /// The internal queue holds as many pending deliveries as there are
    /// workers; submissions beyond that wait for a worker to free a slot.
    pub fn new(
        queue: &str,
        workers: usize,
        handler: Arc<dyn ConsumerHandler>,
        errors: mpsc::Sender<AmqpError>,
    ) -> Self {
        let workers = workers.max(1);
        let (sender, receiver) = mpsc::channel(workers);
        let receiver = Arc::new(Mutex::new(receiver));

        let mut set = JoinSet::new();
        for _ in 0..workers {
            set.spawn(work(
                queue.to_owned(),
                receiver.clone(),
                handler.clone(),
                errors.clone(),
            ));
        }
        debug!("dispatcher for queue: {} started {} workers", queue, workers);

        Dispatcher {
            queue: queue.to_owned(),
            sender,
            workers: set,
        }
    }

    /// Hands `delivery` to the pool, waiting while the queue is full.
    pub async fn submit(&self, delivery: Delivery) -> Result<(), AmqpError> {
        self.sender
            .send(delivery)
            .await
            .map_err(|_| AmqpError::InternalError)
    }

    /// Waits for a free slot in the queue. Dropping the returned permit
    /// gives the slot back.
    pub(crate) async fn reserve(&self) -> Result<mpsc::Permit<'_, Delivery>, AmqpError> {
        self.sender
            .reserve()
            .await
            .map_err(|_| AmqpError::InternalError)
    }

    /// Stops accepting deliveries and returns once every queued and
    /// in-flight delivery has been settled.
    pub async fn drain(self) {
        let Dispatcher {
            queue,
            sender,
            mut workers,
        } = self;
        drop(sender);

        while let Some(result) = workers.join_next().await {
            if let Err(err) = result {
                error!(
                    error = err.to_string(),
                    queue = queue.as_str(),
                    "worker stopped abnormally"
                );
            }
        }
        debug!("dispatcher for queue: {} drained", queue);
    }
}

async fn work(
    queue: String,
    receiver: Arc<Mutex<mpsc::Receiver<Delivery>>>,
    handler: Arc<dyn ConsumerHandler>,
    errors: mpsc::Sender<AmqpError>,
) {
    let tracer = global::tracer(CONSUMER_TRACER);

    loop {
        let next = receiver.lock().await.recv().await;
        let Some(delivery) = next else {
            break;
        };
        process(&tracer, &queue, delivery, handler.as_ref(), &errors).await;
    }
}

async fn process(
    tracer: &BoxedTracer,
    queue: &str,
    delivery: Delivery,
    handler: &dyn ConsumerHandler,
    errors: &mpsc::Sender<AmqpError>,
) {
    let mut span = otel::new_span(&delivery.headers, tracer, queue);

    let verdict = AssertUnwindSafe(handler.exec(&delivery.body))
        .catch_unwind()
        .await;

    let settled = match verdict {
        Ok(Verdict::Accept) => {
            debug!("message successfully processed");
            delivery.ack().await
        }
        Ok(Verdict::Reject) => {
            warn!("message rejected by the handler, requeuing");
            delivery.nack(true).await
        }
        Err(_) => {
            let err = AmqpError::HandlerPanicked(queue.to_owned());
            error!(error = err.to_string(), "handler panicked, requeuing");
            span.record_error(&err);
            report(errors, err).await;
            delivery.nack(true).await
        }
    };

    match settled {
        Ok(()) => span.set_status(Status::Ok),
        Err(err) => {
            error!(error = err.to_string(), "error whiling settling msg");
            span.record_error(&err);
            span.set_status(Status::Error {
                description: Cow::from("error to settle msg"),
            });
            report(errors, err).await;
        }
    }
}
