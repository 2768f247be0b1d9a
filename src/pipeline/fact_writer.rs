//! Fact writer — scores one envelope and commits its rows atomically.
//!
//! One envelope with k mentions becomes k rows sharing a single score, written
//! in one transaction. The store is insert-only, so a redelivered envelope
//! collides on `(comment_id, entity_name)`; that collision means the rows are
//! already there and is reported as `AlreadyApplied`, not as an error.
//! Constraint violations and non-finite scores can never commit and come back
//! as `Unwritable`; only connectivity failures are `StoreUnavailable`.

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{DatabaseError, PipelineError};
use crate::pipeline::types::{FactRow, PublishEnvelope};
use crate::sentiment::SentimentScorer;
use crate::store::Database;

/// What happened to a consumed envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    /// This call committed `rows` new facts.
    Committed { rows: usize },
    /// A previous delivery already committed these facts.
    AlreadyApplied,
}

impl WriteOutcome {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Committed { .. } => "committed",
            Self::AlreadyApplied => "already_applied",
        }
    }
}

pub struct FactWriter {
    store: Arc<dyn Database>,
    scorer: Arc<dyn SentimentScorer>,
}

impl FactWriter {
    pub fn new(store: Arc<dyn Database>, scorer: Arc<dyn SentimentScorer>) -> Self {
        Self { store, scorer }
    }

    /// Score, expand and commit one envelope.
    pub async fn consume(&self, envelope: &PublishEnvelope) -> Result<WriteOutcome, PipelineError> {
        let comment = &envelope.comment;
        let raw = self.scorer.score(&comment.body);
        if !raw.is_finite() {
            return Err(PipelineError::Unwritable(format!(
                "scorer returned {raw} for comment {}",
                comment.id
            )));
        }
        let score = raw.clamp(-1.0, 1.0);
        let rows = FactRow::expand(envelope, score);

        debug!(
            comment_id = %comment.id,
            mentions = rows.len(),
            score,
            "Expanded envelope into facts"
        );

        match self.store.insert_facts(&rows).await {
            Ok(written) => {
                info!(
                    comment_id = %comment.id,
                    channel = %comment.channel,
                    created_at = %comment
                        .created_at()
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_default(),
                    rows = written,
                    score,
                    "Facts committed"
                );
                Ok(WriteOutcome::Committed { rows: written })
            }
            Err(DatabaseError::Duplicate(reason)) => {
                info!(
                    comment_id = %comment.id,
                    reason = %reason,
                    "Facts already recorded, discarding redelivery"
                );
                Ok(WriteOutcome::AlreadyApplied)
            }
            Err(DatabaseError::Constraint(reason)) => Err(PipelineError::Unwritable(reason)),
            Err(e) => Err(PipelineError::StoreUnavailable(e)),
        }
    }
}
