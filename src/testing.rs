// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Broker doubles shared by the unit tests.

use crate::{
    errors::AmqpError,
    queue::{QueueBinding, QueueDefinition},
    session::{
        Acknowledger, Delivery, MockConnector, MockSession, OutboundMessage, Session,
    },
};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

/// Connector whose sessions accept every operation and record declared
/// queues and published messages.
pub(crate) fn recording_connector(
    declared: Arc<Mutex<Vec<QueueDefinition>>>,
    published: Arc<Mutex<Vec<OutboundMessage>>>,
) -> MockConnector {
    recording_connector_with_bindings(declared, published, Arc::new(Mutex::new(vec![])))
}

/// Same as [`recording_connector`], also recording bindings as
/// `(binding, bound)` where `bound` is false for an unbind.
pub(crate) fn recording_connector_with_bindings(
    declared: Arc<Mutex<Vec<QueueDefinition>>>,
    published: Arc<Mutex<Vec<OutboundMessage>>>,
    bindings: Arc<Mutex<Vec<(QueueBinding, bool)>>>,
) -> MockConnector {
    let mut connector = MockConnector::new();
    connector.expect_open_session().returning(move || {
        let mut session = MockSession::new();

        let declared = declared.clone();
        session.expect_declare_queue().returning(move |def| {
            declared.lock().unwrap().push(def.clone());
            Ok(())
        });
        session.expect_declare_exchange().returning(|_| Ok(()));

        let bound = bindings.clone();
        session.expect_bind().returning(move |binding| {
            bound.lock().unwrap().push((binding.clone(), true));
            Ok(())
        });
        let unbound = bindings.clone();
        session.expect_unbind().returning(move |binding| {
            unbound.lock().unwrap().push((binding.clone(), false));
            Ok(())
        });

        let published = published.clone();
        session.expect_publish().returning(move |message| {
            published.lock().unwrap().push(message.clone());
            Ok(())
        });
        session.expect_close().returning(|| Ok(()));

        Ok(Box::new(session) as Box<dyn Session>)
    });
    connector
}

/// Connector whose sessions reject every declaration and publication.
pub(crate) fn failing_connector() -> MockConnector {
    let mut connector = MockConnector::new();
    connector.expect_open_session().returning(|| {
        let mut session = MockSession::new();
        session
            .expect_declare_queue()
            .returning(|def| Err(AmqpError::DeclareQueueError(def.name().to_owned())));
        session
            .expect_declare_exchange()
            .returning(|def| Err(AmqpError::DeclareExchangeError(def.name().to_owned())));
        session
            .expect_publish()
            .returning(|_| Err(AmqpError::PublishingError("channel closed".to_owned())));
        session.expect_close().returning(|| Ok(()));
        Ok(Box::new(session) as Box<dyn Session>)
    });
    connector
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Settlement {
    Ack,
    Nack { requeue: bool },
}

/// Acknowledger recording how its delivery was settled.
pub(crate) struct RecordingAcker {
    settled: Arc<Mutex<Vec<Settlement>>>,
    fail: bool,
}

#[async_trait]
impl Acknowledger for RecordingAcker {
    async fn ack(&self) -> Result<(), AmqpError> {
        self.settled.lock().unwrap().push(Settlement::Ack);
        if self.fail {
            return Err(AmqpError::AckMessageError("channel closed".to_owned()));
        }
        Ok(())
    }

    async fn nack(&self, requeue: bool) -> Result<(), AmqpError> {
        self.settled.lock().unwrap().push(Settlement::Nack { requeue });
        if self.fail {
            return Err(AmqpError::NackMessageError("channel closed".to_owned()));
        }
        Ok(())
    }
}

pub(crate) fn recorded_delivery(body: &[u8], settled: &Arc<Mutex<Vec<Settlement>>>) -> Delivery {
    Delivery::new(
        body.to_vec(),
        Box::new(RecordingAcker {
            settled: settled.clone(),
            fail: false,
        }),
    )
}

/// Delivery whose settlement is recorded but reported as failed.
pub(crate) fn unsettleable_delivery(
    body: &[u8],
    settled: &Arc<Mutex<Vec<Settlement>>>,
) -> Delivery {
    Delivery::new(
        body.to_vec(),
        Box::new(RecordingAcker {
            settled: settled.clone(),
            fail: true,
        }),
    )
}
