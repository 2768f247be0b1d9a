//! Bulk CSV loader for the entity catalog.
//!
//! Expects a header line followed by `entity,channel` rows; quoted fields may
//! contain commas. Rows are written `batch_size` at a time, one transaction
//! per batch.

use std::path::Path;

use csv::Trim;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::LoadError;
use crate::pipeline::types::EntityCatalogEntry;
use crate::store::Database;

/// Default number of rows per insert transaction.
pub const DEFAULT_BATCH_SIZE: usize = 5000;

/// One data row of the catalog CSV, read by position.
#[derive(Debug, Deserialize)]
struct CatalogRow {
    entity_name: String,
    channel: String,
}

/// Parse catalog CSV text. The first line is treated as a header.
pub fn parse_entities_csv(text: &str) -> Result<Vec<EntityCatalogEntry>, LoadError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(text.as_bytes());

    let mut entries = Vec::new();
    for result in reader.records() {
        let record = result.map_err(|e| LoadError::MalformedLine {
            line: e.position().map(|p| p.line() as usize).unwrap_or_default(),
            content: e.to_string(),
        })?;
        if record.iter().all(str::is_empty) {
            continue;
        }

        let line = record.position().map(|p| p.line() as usize).unwrap_or_default();
        let malformed = || LoadError::MalformedLine {
            line,
            content: record.iter().collect::<Vec<_>>().join(","),
        };
        if record.len() != 2 {
            return Err(malformed());
        }
        let row: CatalogRow = record.deserialize(None).map_err(|_| malformed())?;
        if row.entity_name.is_empty() || row.channel.is_empty() {
            return Err(malformed());
        }

        entries.push(EntityCatalogEntry::new(row.entity_name, row.channel));
    }

    if entries.is_empty() {
        return Err(LoadError::EmptyCatalog);
    }
    Ok(entries)
}

/// Load a catalog CSV into the store. Returns the number of rows inserted.
pub async fn load_entities_csv(
    db: &dyn Database,
    path: &Path,
    batch_size: usize,
) -> Result<usize, LoadError> {
    if batch_size == 0 {
        return Err(LoadError::InvalidBatchSize(batch_size));
    }

    let text = tokio::fs::read_to_string(path).await?;
    let entries = parse_entities_csv(&text)?;
    let batches = entries.len().div_ceil(batch_size);

    info!(
        path = %path.display(),
        rows = entries.len(),
        batches,
        "Uploading entity batches"
    );

    let mut loaded = 0;
    for (n, batch) in entries.chunks(batch_size).enumerate() {
        loaded += db.insert_entities(batch).await?;
        debug!(batch = n + 1, of = batches, rows = batch.len(), "Entity batch committed");
    }

    info!(loaded, "Entity catalog load complete");
    Ok(loaded)
}
