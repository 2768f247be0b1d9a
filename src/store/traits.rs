//! Backend-agnostic `Database` trait for the entity catalog and fact table.

use async_trait::async_trait;

use crate::error::DatabaseError;
use crate::pipeline::types::{EntityCatalogEntry, FactRow};

/// Durable store used by the pipeline.
///
/// Reads are point-in-time. Multi-row writes run in a single transaction:
/// either every row lands or none do.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn init_schema(&self) -> Result<(), DatabaseError>;

    // ── Entities ────────────────────────────────────────────────────

    /// Distinct channels with at least one tracked entity, sorted.
    async fn list_channels(&self) -> Result<Vec<String>, DatabaseError>;

    /// Distinct entity names tracked for `channel`, sorted. Empty if none.
    async fn list_entities(&self, channel: &str) -> Result<Vec<String>, DatabaseError>;

    /// Insert catalog rows in one transaction. Returns rows written.
    async fn insert_entities(&self, entries: &[EntityCatalogEntry]) -> Result<usize, DatabaseError>;

    // ── Facts ───────────────────────────────────────────────────────

    /// Insert fact rows in one transaction.
    ///
    /// Insert-only: a row whose `(comment_id, entity_name)` already exists
    /// fails the whole batch with `DatabaseError::Duplicate`.
    async fn insert_facts(&self, rows: &[FactRow]) -> Result<usize, DatabaseError>;

    /// All facts recorded for one comment, ordered by entity name.
    async fn list_facts_for_comment(&self, comment_id: &str) -> Result<Vec<FactRow>, DatabaseError>;

    /// Total number of fact rows.
    async fn count_facts(&self) -> Result<u64, DatabaseError>;
}
