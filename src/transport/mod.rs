//! Publish/subscribe transport boundary.
//!
//! `Transport::publish` never blocks: it hands back a `PublishHandle`, a
//! future that resolves once the transport has acknowledged or permanently
//! rejected the payload. Delivery to subscribers is at-least-once.

pub mod memory;

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::PublishFailure;

pub use memory::{Delivery, MemoryTransport, Subscription};

/// Result of one publish once it reaches a terminal state.
pub type PublishResult = Result<String, PublishFailure>;

/// Outbound side of a publish/subscribe channel.
pub trait Transport: Send + Sync {
    /// Submit a payload. The returned handle resolves to the message id on
    /// acknowledgement.
    fn publish(&self, payload: Vec<u8>) -> PublishHandle;
}

/// Completion future for a single publish.
///
/// Resolves exactly once. If the completing side is dropped without
/// reporting, the publish counts as rejected.
#[derive(Debug)]
pub struct PublishHandle {
    rx: oneshot::Receiver<PublishResult>,
}

/// Completing side of a `PublishHandle`, held by the transport.
#[derive(Debug)]
pub struct PublishCompleter {
    tx: oneshot::Sender<PublishResult>,
}

impl PublishHandle {
    /// A handle whose outcome will be reported later through the completer.
    pub fn pending() -> (PublishCompleter, PublishHandle) {
        let (tx, rx) = oneshot::channel();
        (PublishCompleter { tx }, PublishHandle { rx })
    }

    /// A handle that is already acknowledged.
    pub fn acknowledged(message_id: impl Into<String>) -> Self {
        let (completer, handle) = Self::pending();
        completer.ack(message_id);
        handle
    }

    /// A handle that has already failed.
    pub fn failed(failure: PublishFailure) -> Self {
        let (completer, handle) = Self::pending();
        completer.fail(failure);
        handle
    }
}

impl PublishCompleter {
    pub fn ack(self, message_id: impl Into<String>) {
        // Receiver gone means nobody is waiting any more.
        let _ = self.tx.send(Ok(message_id.into()));
    }

    pub fn fail(self, failure: PublishFailure) {
        let _ = self.tx.send(Err(failure));
    }
}

impl Future for PublishHandle {
    type Output = PublishResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(PublishFailure::Rejected(
                "transport dropped the publish without reporting".into(),
            ))),
            Poll::Pending => Poll::Pending,
        }
    }
}
