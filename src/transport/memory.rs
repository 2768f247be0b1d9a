//! In-process transport backed by an unbounded tokio channel.
//!
//! Publishes are acknowledged once enqueued. The subscriber must `ack` or
//! `nack` every delivery; a nack puts the message back in front of the queue
//! until `max_attempts` deliveries have been made, after which it is
//! dead-lettered (logged and dropped).

use std::collections::VecDeque;

use tokio::sync::mpsc;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::error::PublishFailure;
use crate::transport::{PublishHandle, Transport};

/// A message as handed to the subscriber.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub message_id: String,
    pub payload: Vec<u8>,
    /// 1 on first delivery, incremented on every redelivery.
    pub attempt: u32,
}

/// Publishing side.
#[derive(Clone)]
pub struct MemoryTransport {
    tx: mpsc::UnboundedSender<Delivery>,
}

/// Receiving side. One per transport.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<Delivery>,
    redeliver: VecDeque<Delivery>,
    max_attempts: u32,
}

impl MemoryTransport {
    /// Create a connected transport/subscription pair.
    pub fn channel(max_attempts: u32) -> (MemoryTransport, Subscription) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            MemoryTransport { tx },
            Subscription {
                rx,
                redeliver: VecDeque::new(),
                max_attempts: max_attempts.max(1),
            },
        )
    }
}

impl Transport for MemoryTransport {
    fn publish(&self, payload: Vec<u8>) -> PublishHandle {
        let message_id = Uuid::new_v4().to_string();
        let delivery = Delivery {
            message_id: message_id.clone(),
            payload,
            attempt: 1,
        };

        match self.tx.send(delivery) {
            Ok(()) => {
                debug!(message_id = %message_id, "Message enqueued");
                PublishHandle::acknowledged(message_id)
            }
            Err(_) => PublishHandle::failed(PublishFailure::Rejected(
                "subscription closed".into(),
            )),
        }
    }
}

impl Subscription {
    /// Next delivery, redeliveries first. `None` once every publisher is
    /// dropped and nothing is left to redeliver.
    pub async fn recv(&mut self) -> Option<Delivery> {
        if let Some(delivery) = self.redeliver.pop_front() {
            return Some(delivery);
        }
        self.rx.recv().await
    }

    /// Like `recv`, but returns `None` instead of waiting when the queue is empty.
    pub fn try_recv(&mut self) -> Option<Delivery> {
        self.redeliver
            .pop_front()
            .or_else(|| self.rx.try_recv().ok())
    }

    /// Confirm a delivery was processed; it will not be seen again.
    pub fn ack(&mut self, delivery: Delivery) {
        debug!(message_id = %delivery.message_id, attempt = delivery.attempt, "Delivery acked");
    }

    /// Reject a delivery so it is redelivered, unless attempts are exhausted.
    pub fn nack(&mut self, mut delivery: Delivery) {
        if delivery.attempt >= self.max_attempts {
            error!(
                message_id = %delivery.message_id,
                attempts = delivery.attempt,
                "Delivery attempts exhausted, dead-lettering message"
            );
            return;
        }
        warn!(
            message_id = %delivery.message_id,
            attempt = delivery.attempt,
            "Delivery nacked, scheduling redelivery"
        );
        delivery.attempt += 1;
        self.redeliver.push_back(delivery);
    }
}
