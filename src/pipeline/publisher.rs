//! Publisher — submits envelopes concurrently and waits for every outcome.
//!
//! Each submission yields its own `PublishHandle`; the wait is a single
//! `join_all` over those handles, bounded by a shared deadline. A handle
//! still pending at the deadline is reported as `Failed(Timeout)`.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::time::{Instant, timeout_at};
use tracing::{info, warn};

use crate::error::PublishFailure;
use crate::pipeline::types::PublishEnvelope;
use crate::transport::{PublishHandle, Transport};

/// Terminal state of one envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum PublishStatus {
    Acknowledged { message_id: String },
    Failed(PublishFailure),
}

/// Outcome for one submitted envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishOutcome {
    pub comment_id: String,
    pub status: PublishStatus,
}

/// Per-envelope outcomes, in submission order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublishReport {
    pub outcomes: Vec<PublishOutcome>,
}

impl PublishReport {
    pub fn submitted(&self) -> usize {
        self.outcomes.len()
    }

    pub fn acknowledged(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, PublishStatus::Acknowledged { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.submitted() - self.acknowledged()
    }
}

/// Hands envelopes to a transport and blocks until all are terminal.
#[derive(Clone)]
pub struct Publisher {
    transport: Arc<dyn Transport>,
    timeout: Duration,
}

impl Publisher {
    pub fn new(transport: Arc<dyn Transport>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    /// Publish every envelope and wait until each is acknowledged, failed,
    /// or timed out. Never returns early.
    pub async fn publish_all(&self, envelopes: Vec<PublishEnvelope>) -> PublishReport {
        if envelopes.is_empty() {
            return PublishReport::default();
        }

        let deadline = Instant::now() + self.timeout;
        let submitted = envelopes.len();

        // Submit everything before waiting on anything.
        let in_flight: Vec<(String, PublishHandle)> = envelopes
            .into_iter()
            .map(|envelope| {
                let handle = match envelope.to_payload() {
                    Ok(payload) => self.transport.publish(payload),
                    Err(e) => PublishHandle::failed(PublishFailure::Serialization(e.to_string())),
                };
                (envelope.comment.id, handle)
            })
            .collect();

        let timeout = self.timeout;
        let outcomes = join_all(in_flight.into_iter().map(|(comment_id, handle)| async move {
            let status = match timeout_at(deadline, handle).await {
                Ok(Ok(message_id)) => PublishStatus::Acknowledged { message_id },
                Ok(Err(failure)) => PublishStatus::Failed(failure),
                Err(_) => PublishStatus::Failed(PublishFailure::Timeout(timeout)),
            };
            if let PublishStatus::Failed(ref failure) = status {
                warn!(comment_id = %comment_id, error = %failure, "Publish failed");
            }
            PublishOutcome { comment_id, status }
        }))
        .await;

        let report = PublishReport { outcomes };
        info!(
            submitted,
            acknowledged = report.acknowledged(),
            failed = report.failed(),
            "Publish batch complete"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::pipeline::types::RawComment;
    use crate::transport::{MemoryTransport, PublishCompleter};

    fn envelope(id: &str) -> PublishEnvelope {
        PublishEnvelope::new(
            RawComment {
                id: id.into(),
                created_at_unix_seconds: 1000,
                author: "u1".into(),
                channel: "leagueoflegends".into(),
                body: "ahri".into(),
            },
            ["ahri"].into_iter().collect(),
        )
    }

    /// Transport driven by a script: one behaviour per publish, in order.
    enum Step {
        Ack,
        Fail,
        Hang,
        AckLater(Duration),
    }

    struct ScriptedTransport {
        steps: Mutex<Vec<Step>>,
        /// Completers for `Hang` steps, kept alive so the handle stays pending.
        parked: Mutex<Vec<PublishCompleter>>,
    }

    impl ScriptedTransport {
        fn new(mut steps: Vec<Step>) -> Self {
            steps.reverse();
            Self {
                steps: Mutex::new(steps),
                parked: Mutex::new(Vec::new()),
            }
        }
    }

    impl Transport for ScriptedTransport {
        fn publish(&self, _payload: Vec<u8>) -> PublishHandle {
            let step = self.steps.lock().unwrap().pop().unwrap_or(Step::Ack);
            match step {
                Step::Ack => PublishHandle::acknowledged("m"),
                Step::Fail => PublishHandle::failed(PublishFailure::Rejected("quota".into())),
                Step::Hang => {
                    let (completer, handle) = PublishHandle::pending();
                    self.parked.lock().unwrap().push(completer);
                    handle
                }
                Step::AckLater(delay) => {
                    let (completer, handle) = PublishHandle::pending();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        completer.ack("late");
                    });
                    handle
                }
            }
        }
    }

    #[tokio::test]
    async fn empty_batch_is_empty_report() {
        let (transport, _sub) = MemoryTransport::channel(1);
        let publisher = Publisher::new(Arc::new(transport), Duration::from_secs(1));
        let report = publisher.publish_all(vec![]).await;
        assert_eq!(report.submitted(), 0);
    }

    #[tokio::test]
    async fn all_acknowledged_through_memory_transport() {
        let (transport, mut sub) = MemoryTransport::channel(1);
        let publisher = Publisher::new(Arc::new(transport), Duration::from_secs(1));
        let report = publisher
            .publish_all(vec![envelope("c1"), envelope("c2"), envelope("c3")])
            .await;

        assert_eq!(report.submitted(), 3);
        assert_eq!(report.acknowledged(), 3);
        let ids: Vec<&str> = report.outcomes.iter().map(|o| o.comment_id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2", "c3"]);

        let mut delivered = 0;
        while let Some(d) = sub.try_recv() {
            let decoded = PublishEnvelope::from_payload(&d.payload).unwrap();
            assert_eq!(decoded.mentions.as_slice(), &["ahri"]);
            delivered += 1;
        }
        assert_eq!(delivered, 3);
    }

    #[tokio::test]
    async fn failure_does_not_abort_other_envelopes() {
        let transport = ScriptedTransport::new(vec![Step::Ack, Step::Fail, Step::Ack]);
        let publisher = Publisher::new(Arc::new(transport), Duration::from_secs(1));
        let report = publisher
            .publish_all(vec![envelope("c1"), envelope("c2"), envelope("c3")])
            .await;

        assert_eq!(report.acknowledged(), 2);
        assert_eq!(report.failed(), 1);
        assert_eq!(
            report.outcomes[1].status,
            PublishStatus::Failed(PublishFailure::Rejected("quota".into()))
        );
    }

    #[tokio::test]
    async fn stuck_publish_times_out_as_partial_failure() {
        let transport = ScriptedTransport::new(vec![Step::Ack, Step::Hang]);
        let timeout = Duration::from_millis(50);
        let publisher = Publisher::new(Arc::new(transport), timeout);

        let started = std::time::Instant::now();
        let report = publisher.publish_all(vec![envelope("c1"), envelope("c2")]).await;

        assert!(started.elapsed() >= timeout);
        assert_eq!(report.acknowledged(), 1);
        assert_eq!(
            report.outcomes[1].status,
            PublishStatus::Failed(PublishFailure::Timeout(timeout))
        );
    }

    #[tokio::test]
    async fn waits_for_slow_acknowledgements() {
        let transport = ScriptedTransport::new(vec![
            Step::AckLater(Duration::from_millis(30)),
            Step::Ack,
        ]);
        let publisher = Publisher::new(Arc::new(transport), Duration::from_secs(2));
        let report = publisher.publish_all(vec![envelope("c1"), envelope("c2")]).await;

        assert_eq!(report.acknowledged(), 2);
        assert_eq!(
            report.outcomes[0].status,
            PublishStatus::Acknowledged { message_id: "late".into() }
        );
    }
}
