//! Entity catalog — which entities to look for, and in which channels.
//!
//! Every read goes to the store; nothing is cached between cycles.

pub mod loader;

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::debug;

use crate::error::PipelineError;
use crate::store::Database;

/// Read-only view over the `Entities` table.
#[derive(Clone)]
pub struct EntityCatalog {
    store: Arc<dyn Database>,
}

impl EntityCatalog {
    pub fn new(store: Arc<dyn Database>) -> Self {
        Self { store }
    }

    /// Distinct channels with at least one tracked entity.
    pub async fn list_channels(&self) -> Result<BTreeSet<String>, PipelineError> {
        let channels: BTreeSet<String> = self.store.list_channels().await?.into_iter().collect();
        debug!(count = channels.len(), "Loaded catalog channels");
        Ok(channels)
    }

    /// Distinct entity names tracked for `channel`; empty when the channel is unknown.
    pub async fn list_entities(&self, channel: &str) -> Result<BTreeSet<String>, PipelineError> {
        let entities: BTreeSet<String> =
            self.store.list_entities(channel).await?.into_iter().collect();
        debug!(channel, count = entities.len(), "Loaded catalog entities");
        Ok(entities)
    }
}
