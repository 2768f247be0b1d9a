//! Pipeline cycles — one producer invocation and one consumer delivery.
//!
//! Producer states run linearly:
//! `SelectChannel → FetchComments → Filter → Publish → Done`.
//! An empty catalog goes straight to `Done` without touching the source.
//!
//! Each invocation is stateless; everything that outlives it is in the store.

use std::sync::Arc;

use rand::Rng;
use rand::seq::SliceRandom;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::catalog::EntityCatalog;
use crate::error::PipelineError;
use crate::pipeline::fact_writer::{FactWriter, WriteOutcome};
use crate::pipeline::filter::MentionFilter;
use crate::pipeline::publisher::Publisher;
use crate::pipeline::types::PublishEnvelope;
use crate::source::CommentSource;
use crate::transport::{Delivery, Subscription};

/// Producer cycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    SelectChannel,
    FetchComments,
    Filter,
    Publish,
    Done,
}

impl CycleState {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::SelectChannel => "select_channel",
            Self::FetchComments => "fetch_comments",
            Self::Filter => "filter",
            Self::Publish => "publish",
            Self::Done => "done",
        }
    }
}

/// Summary of one producer cycle.
///
/// `requested` is the configured fetch size; `acknowledged` is what the
/// transport actually accepted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub channel: Option<String>,
    pub requested: usize,
    pub fetched: usize,
    pub submitted: usize,
    pub acknowledged: usize,
    pub failed: usize,
    pub final_state: CycleState,
}

impl CycleReport {
    fn empty(requested: usize) -> Self {
        Self {
            channel: None,
            requested,
            fetched: 0,
            submitted: 0,
            acknowledged: 0,
            failed: 0,
            final_state: CycleState::Done,
        }
    }
}

/// Uniform random channel choice. `None` when there are no channels.
pub fn pick_channel<'a, R: Rng + ?Sized>(
    channels: &'a [String],
    rng: &mut R,
) -> Option<&'a String> {
    channels.choose(rng)
}

/// One producer invocation: pick a channel, fetch, filter, publish, wait.
pub struct ProducerCycle {
    catalog: EntityCatalog,
    source: Arc<dyn CommentSource>,
    publisher: Publisher,
    fetch_size: usize,
}

impl ProducerCycle {
    pub fn new(
        catalog: EntityCatalog,
        source: Arc<dyn CommentSource>,
        publisher: Publisher,
        fetch_size: usize,
    ) -> Self {
        Self {
            catalog,
            source,
            publisher,
            fetch_size,
        }
    }

    pub async fn run(&self) -> Result<CycleReport, PipelineError> {
        let mut state = CycleState::SelectChannel;
        debug!(state = state.label(), "Producer cycle started");

        let channels: Vec<String> = self.catalog.list_channels().await?.into_iter().collect();
        let channel = {
            let mut rng = rand::thread_rng();
            pick_channel(&channels, &mut rng).cloned()
        };
        let Some(channel) = channel else {
            info!("Entity catalog is empty, nothing to fetch");
            return Ok(CycleReport::empty(self.fetch_size));
        };

        state = CycleState::FetchComments;
        debug!(state = state.label(), channel = %channel, "Fetching comments");
        let comments = self.source.fetch_recent(&channel, self.fetch_size).await?;
        let fetched = comments.len();

        state = CycleState::Filter;
        debug!(state = state.label(), fetched, "Filtering comments");
        let entities = self.catalog.list_entities(&channel).await?;
        let envelopes: Vec<PublishEnvelope> = MentionFilter::new(entities).filter(comments);

        state = CycleState::Publish;
        debug!(state = state.label(), envelopes = envelopes.len(), "Publishing envelopes");
        let report = self.publisher.publish_all(envelopes).await;

        state = CycleState::Done;
        let cycle = CycleReport {
            channel: Some(channel),
            requested: self.fetch_size,
            fetched,
            submitted: report.submitted(),
            acknowledged: report.acknowledged(),
            failed: report.failed(),
            final_state: state,
        };
        info!(
            channel = cycle.channel.as_deref().unwrap_or_default(),
            source = self.source.name(),
            fetched = cycle.fetched,
            submitted = cycle.submitted,
            acknowledged = cycle.acknowledged,
            failed = cycle.failed,
            "Producer cycle complete"
        );
        Ok(cycle)
    }
}

/// One consumer invocation per delivered payload.
pub struct ConsumerCycle {
    writer: FactWriter,
}

impl ConsumerCycle {
    pub fn new(writer: FactWriter) -> Self {
        Self { writer }
    }

    /// Decode, score, expand and commit one payload.
    pub async fn handle_payload(&self, payload: &[u8]) -> Result<WriteOutcome, PipelineError> {
        let envelope = PublishEnvelope::from_payload(payload)
            .map_err(|e| PipelineError::MalformedPayload(e.to_string()))?;
        if envelope.mentions.is_empty() {
            return Err(PipelineError::MalformedPayload(format!(
                "envelope for comment {} has no mentions",
                envelope.comment.id
            )));
        }
        if envelope.mentions.iter().any(String::is_empty) {
            return Err(PipelineError::MalformedPayload(format!(
                "envelope for comment {} names an empty entity",
                envelope.comment.id
            )));
        }
        self.writer.consume(&envelope).await
    }
}

/// Counters from draining a subscription.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConsumeStats {
    pub committed: usize,
    pub already_applied: usize,
    pub malformed: usize,
    pub rejected: usize,
    pub retried: usize,
}

/// Process one delivery and settle it with the subscription.
///
/// Success and redeliveries are acked. Malformed payloads and rows the store
/// can never accept are acked and dropped. Connectivity failures are nacked so
/// the transport redelivers.
async fn settle(
    consumer: &ConsumerCycle,
    subscription: &mut Subscription,
    delivery: Delivery,
    stats: &mut ConsumeStats,
) {
    match consumer.handle_payload(&delivery.payload).await {
        Ok(outcome) => {
            debug!(
                message_id = %delivery.message_id,
                outcome = outcome.label(),
                "Delivery handled"
            );
            match outcome {
                WriteOutcome::Committed { .. } => stats.committed += 1,
                WriteOutcome::AlreadyApplied => stats.already_applied += 1,
            }
            subscription.ack(delivery);
        }
        Err(PipelineError::MalformedPayload(reason)) => {
            error!(
                message_id = %delivery.message_id,
                reason = %reason,
                "Dropping malformed payload"
            );
            stats.malformed += 1;
            subscription.ack(delivery);
        }
        Err(e) if !e.is_retryable() => {
            error!(message_id = %delivery.message_id, error = %e, "Dropping unwritable delivery");
            stats.rejected += 1;
            subscription.ack(delivery);
        }
        Err(e) => {
            warn!(message_id = %delivery.message_id, error = %e, "Delivery failed, will retry");
            stats.retried += 1;
            subscription.nack(delivery);
        }
    }
}

/// Consume deliveries until every publisher is gone.
pub async fn run_consumer(
    consumer: &ConsumerCycle,
    subscription: &mut Subscription,
) -> ConsumeStats {
    let mut stats = ConsumeStats::default();
    while let Some(delivery) = subscription.recv().await {
        settle(consumer, subscription, delivery, &mut stats).await;
    }
    info!(?stats, "Consumer stopped");
    stats
}

/// Consume whatever is queued right now, then return.
pub async fn drain_pending(
    consumer: &ConsumerCycle,
    subscription: &mut Subscription,
) -> ConsumeStats {
    let mut stats = ConsumeStats::default();
    while let Some(delivery) = subscription.try_recv() {
        settle(consumer, subscription, delivery, &mut stats).await;
    }
    stats
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;
    use crate::error::{DatabaseError, SourceError};
    use crate::pipeline::types::{EntityCatalogEntry, FactRow, RawComment};
    use crate::sentiment::SentimentScorer;
    use crate::store::{Database, LibSqlBackend};
    use crate::transport::{MemoryTransport, Transport};

    struct StubSource {
        comments: Vec<RawComment>,
        calls: AtomicUsize,
    }

    impl StubSource {
        fn new(comments: Vec<RawComment>) -> Arc<Self> {
            Arc::new(Self {
                comments,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl CommentSource for StubSource {
        fn name(&self) -> &str {
            "stub"
        }

        async fn fetch_recent(
            &self,
            channel: &str,
            limit: usize,
        ) -> Result<Vec<RawComment>, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .comments
                .iter()
                .filter(|c| c.channel == channel)
                .take(limit)
                .cloned()
                .collect())
        }
    }

    struct FailingSource;

    #[async_trait]
    impl CommentSource for FailingSource {
        fn name(&self) -> &str {
            "failing"
        }

        async fn fetch_recent(
            &self,
            _channel: &str,
            _limit: usize,
        ) -> Result<Vec<RawComment>, SourceError> {
            Err(SourceError::Status {
                status: 503,
                body: "unavailable".into(),
            })
        }
    }

    /// Store that fails its first `outages` calls to the chosen methods with a
    /// connection error, then behaves like the in-memory backend.
    struct FlakyStore {
        inner: LibSqlBackend,
        outages: AtomicUsize,
        fail_catalog: bool,
        fail_facts: bool,
        catalog_calls: AtomicUsize,
    }

    impl FlakyStore {
        async fn new(outages: usize, fail_catalog: bool, fail_facts: bool) -> Arc<Self> {
            Arc::new(Self {
                inner: LibSqlBackend::new_memory().await.unwrap(),
                outages: AtomicUsize::new(outages),
                fail_catalog,
                fail_facts,
                catalog_calls: AtomicUsize::new(0),
            })
        }

        fn outage(&self, applies: bool) -> Result<(), DatabaseError> {
            let down = applies
                && self
                    .outages
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok();
            if down {
                Err(DatabaseError::Pool("connection refused".into()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl Database for FlakyStore {
        async fn init_schema(&self) -> Result<(), DatabaseError> {
            self.inner.init_schema().await
        }

        async fn list_channels(&self) -> Result<Vec<String>, DatabaseError> {
            self.catalog_calls.fetch_add(1, Ordering::SeqCst);
            self.outage(self.fail_catalog)?;
            self.inner.list_channels().await
        }

        async fn list_entities(&self, channel: &str) -> Result<Vec<String>, DatabaseError> {
            self.outage(self.fail_catalog)?;
            self.inner.list_entities(channel).await
        }

        async fn insert_entities(
            &self,
            entries: &[EntityCatalogEntry],
        ) -> Result<usize, DatabaseError> {
            self.inner.insert_entities(entries).await
        }

        async fn insert_facts(&self, rows: &[FactRow]) -> Result<usize, DatabaseError> {
            self.outage(self.fail_facts)?;
            self.inner.insert_facts(rows).await
        }

        async fn list_facts_for_comment(
            &self,
            comment_id: &str,
        ) -> Result<Vec<FactRow>, DatabaseError> {
            self.inner.list_facts_for_comment(comment_id).await
        }

        async fn count_facts(&self) -> Result<u64, DatabaseError> {
            self.inner.count_facts().await
        }
    }

    struct Fixed(f64);

    impl SentimentScorer for Fixed {
        fn score(&self, _text: &str) -> f64 {
            self.0
        }
    }

    fn comment(id: &str, body: &str) -> RawComment {
        RawComment {
            id: id.into(),
            created_at_unix_seconds: 1000,
            author: "u1".into(),
            channel: "leagueoflegends".into(),
            body: body.into(),
        }
    }

    async fn catalog_with(entries: &[(&str, &str)]) -> (Arc<dyn Database>, EntityCatalog) {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let rows: Vec<EntityCatalogEntry> = entries
            .iter()
            .map(|(e, c)| EntityCatalogEntry::new(*e, *c))
            .collect();
        db.insert_entities(&rows).await.unwrap();
        (Arc::clone(&db), EntityCatalog::new(db))
    }

    #[test]
    fn pick_channel_covers_all_channels() {
        let channels = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let mut rng = StdRng::seed_from_u64(7);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..200 {
            seen.insert(pick_channel(&channels, &mut rng).unwrap().clone());
        }
        assert_eq!(seen.len(), 3);
        assert!(pick_channel(&[], &mut rng).is_none());
    }

    #[tokio::test]
    async fn empty_catalog_finishes_without_fetching() {
        let (_db, catalog) = catalog_with(&[]).await;
        let source = StubSource::new(vec![comment("c1", "ahri")]);
        let (transport, _sub) = MemoryTransport::channel(1);
        let cycle = ProducerCycle::new(
            catalog,
            source.clone(),
            Publisher::new(Arc::new(transport), Duration::from_secs(1)),
            2,
        );

        let report = cycle.run().await.unwrap();
        assert_eq!(report.final_state, CycleState::Done);
        assert_eq!(report.submitted, 0);
        assert!(report.channel.is_none());
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn producer_publishes_only_matching_comments() {
        let (_db, catalog) = catalog_with(&[("ahri", "leagueoflegends")]).await;
        let source = StubSource::new(vec![
            comment("c1", "ahri is my favorite"),
            comment("c2", "zed is stronger"),
        ]);
        let (transport, mut sub) = MemoryTransport::channel(1);
        let cycle = ProducerCycle::new(
            catalog,
            source,
            Publisher::new(Arc::new(transport), Duration::from_secs(1)),
            2,
        );

        let report = cycle.run().await.unwrap();
        assert_eq!(report.channel.as_deref(), Some("leagueoflegends"));
        assert_eq!(report.requested, 2);
        assert_eq!(report.fetched, 2);
        assert_eq!(report.submitted, 1);
        assert_eq!(report.acknowledged, 1);

        let delivery = sub.try_recv().unwrap();
        let envelope = PublishEnvelope::from_payload(&delivery.payload).unwrap();
        assert_eq!(envelope.comment.id, "c1");
        assert_eq!(envelope.mentions.as_slice(), &["ahri"]);
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn source_failure_surfaces_as_error() {
        let (_db, catalog) = catalog_with(&[("ahri", "leagueoflegends")]).await;
        let (transport, _sub) = MemoryTransport::channel(1);
        let cycle = ProducerCycle::new(
            catalog,
            Arc::new(FailingSource),
            Publisher::new(Arc::new(transport), Duration::from_secs(1)),
            2,
        );
        let err = cycle.run().await.unwrap_err();
        assert!(matches!(err, PipelineError::Source(SourceError::Status { status: 503, .. })));
    }

    #[tokio::test]
    async fn malformed_payload_is_rejected() {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let consumer = ConsumerCycle::new(FactWriter::new(db, Arc::new(Fixed(0.0))));

        let err = consumer.handle_payload(b"{not json").await.unwrap_err();
        assert!(matches!(err, PipelineError::MalformedPayload(_)));

        let no_mentions = serde_json::to_vec(&PublishEnvelope::new(
            comment("c1", "ahri"),
            Default::default(),
        ))
        .unwrap();
        let err = consumer.handle_payload(&no_mentions).await.unwrap_err();
        assert!(matches!(err, PipelineError::MalformedPayload(_)));
    }

    #[tokio::test]
    async fn drain_settles_every_delivery() {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let consumer = ConsumerCycle::new(FactWriter::new(Arc::clone(&db), Arc::new(Fixed(0.43))));
        let (transport, mut sub) = MemoryTransport::channel(3);

        let good = PublishEnvelope::new(comment("c1", "ahri"), ["ahri"].into_iter().collect());
        let payload = good.to_payload().unwrap();
        transport.publish(payload.clone()).await.unwrap();
        transport.publish(b"garbage".to_vec()).await.unwrap();
        transport.publish(payload).await.unwrap();

        let stats = drain_pending(&consumer, &mut sub).await;
        assert_eq!(
            stats,
            ConsumeStats {
                committed: 1,
                already_applied: 1,
                malformed: 1,
                rejected: 0,
                retried: 0,
            }
        );
        assert_eq!(db.count_facts().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn store_outage_is_nacked_then_committed_on_redelivery() {
        let store = FlakyStore::new(2, false, true).await;
        let db: Arc<dyn Database> = store.clone();
        let consumer = ConsumerCycle::new(FactWriter::new(Arc::clone(&db), Arc::new(Fixed(0.3))));
        let (transport, mut sub) = MemoryTransport::channel(5);

        let envelope = PublishEnvelope::new(comment("c1", "ahri"), ["ahri"].into_iter().collect());
        transport.publish(envelope.to_payload().unwrap()).await.unwrap();

        let stats = drain_pending(&consumer, &mut sub).await;
        assert_eq!(stats.retried, 2);
        assert_eq!(stats.committed, 1);
        assert_eq!(db.count_facts().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn store_outage_past_attempt_budget_is_dead_lettered() {
        let store = FlakyStore::new(10, false, true).await;
        let db: Arc<dyn Database> = store.clone();
        let consumer = ConsumerCycle::new(FactWriter::new(Arc::clone(&db), Arc::new(Fixed(0.3))));
        let (transport, mut sub) = MemoryTransport::channel(3);

        let envelope = PublishEnvelope::new(comment("c1", "ahri"), ["ahri"].into_iter().collect());
        transport.publish(envelope.to_payload().unwrap()).await.unwrap();

        let stats = drain_pending(&consumer, &mut sub).await;
        assert_eq!(stats.retried, 3);
        assert_eq!(stats.committed, 0);
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn catalog_outage_fails_the_cycle_without_retrying() {
        let store = FlakyStore::new(1, true, false).await;
        store
            .insert_entities(&[EntityCatalogEntry::new("ahri", "leagueoflegends")])
            .await
            .unwrap();
        let db: Arc<dyn Database> = store.clone();
        let source = StubSource::new(vec![comment("c1", "ahri")]);
        let (transport, _sub) = MemoryTransport::channel(1);
        let cycle = ProducerCycle::new(
            EntityCatalog::new(db),
            source.clone(),
            Publisher::new(Arc::new(transport), Duration::from_secs(1)),
            2,
        );

        let err = cycle.run().await.unwrap_err();
        assert!(matches!(err, PipelineError::StoreUnavailable(DatabaseError::Pool(_))));
        assert!(err.is_retryable());
        assert_eq!(store.catalog_calls.load(Ordering::SeqCst), 1);
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);

        // The next invocation sees the recovered store.
        assert!(cycle.run().await.is_ok());
    }

    #[tokio::test]
    async fn empty_entity_name_is_dropped_not_retried() {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let consumer = ConsumerCycle::new(FactWriter::new(Arc::clone(&db), Arc::new(Fixed(0.3))));
        let (transport, mut sub) = MemoryTransport::channel(5);

        let envelope = PublishEnvelope::new(
            comment("c1", "ahri"),
            vec!["ahri".to_string(), String::new()].into(),
        );
        transport.publish(envelope.to_payload().unwrap()).await.unwrap();

        let stats = drain_pending(&consumer, &mut sub).await;
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.retried, 0);
        assert_eq!(db.count_facts().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn non_finite_score_is_dropped_not_retried() {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let writer = FactWriter::new(Arc::clone(&db), Arc::new(Fixed(f64::NAN)));
        let consumer = ConsumerCycle::new(writer);
        let (transport, mut sub) = MemoryTransport::channel(5);

        let envelope = PublishEnvelope::new(comment("c1", "ahri"), ["ahri"].into_iter().collect());
        transport.publish(envelope.to_payload().unwrap()).await.unwrap();

        let stats = drain_pending(&consumer, &mut sub).await;
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.retried, 0);
        assert_eq!(db.count_facts().await.unwrap(), 0);
    }
}
