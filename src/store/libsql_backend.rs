//! libSQL backend — async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. Multi-row writes run inside
//! a libSQL transaction and roll back on the first failing statement.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use libsql::{Connection, Database as LibSqlDatabase, params};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::DatabaseError;
use crate::pipeline::types::{EntityCatalogEntry, FactRow};
use crate::store::migrations;
use crate::store::traits::Database;

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations. A connection
/// cannot nest transactions and sees its own uncommitted writes, so every
/// read and write takes `tx_lock` first.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    tx_lock: Mutex<()>,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db)?;
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let backend = Self::from_database(db)?;
        backend.init_schema().await?;
        Ok(backend)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
            tx_lock: Mutex::new(()),
        })
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Read the first column of every row as a string.
async fn collect_strings(
    mut rows: libsql::Rows,
    context: &str,
) -> Result<Vec<String>, DatabaseError> {
    let mut values = Vec::new();
    while let Some(row) = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Query(format!("{context}: {e}")))?
    {
        let value: String = row
            .get(0)
            .map_err(|e| DatabaseError::Query(format!("{context} row parse: {e}")))?;
        values.push(value);
    }
    Ok(values)
}

/// Map a libsql Row to a FactRow.
///
/// Column order matches FACT_COLUMNS.
fn row_to_fact(row: &libsql::Row) -> Result<FactRow, libsql::Error> {
    Ok(FactRow {
        comment_id: row.get(0)?,
        created_at_unix_seconds: row.get(1)?,
        author: row.get(2)?,
        channel: row.get(3)?,
        entity_name: row.get(4)?,
        sentiment_compound: row.get(5)?,
    })
}

// ── Trait implementation ────────────────────────────────────────────

const FACT_COLUMNS: &str = "Id, Created_UTC, Author, SubReddit, EntityName, Sentiment";

const INSERT_FACT_SQL: &str = "INSERT INTO Comments \
    (Id, Created_UTC, Author, SubReddit, EntityName, Sentiment) \
    VALUES (?1, ?2, ?3, ?4, ?5, ?6)";

#[async_trait]
impl Database for LibSqlBackend {
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Entities ────────────────────────────────────────────────────

    async fn list_channels(&self) -> Result<Vec<String>, DatabaseError> {
        let _guard = self.tx_lock.lock().await;
        let rows = self
            .conn()
            .query(
                "SELECT DISTINCT SubReddit FROM Entities ORDER BY SubReddit",
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_channels: {e}")))?;
        collect_strings(rows, "list_channels").await
    }

    async fn list_entities(&self, channel: &str) -> Result<Vec<String>, DatabaseError> {
        let _guard = self.tx_lock.lock().await;
        let rows = self
            .conn()
            .query(
                "SELECT DISTINCT EntityName FROM Entities WHERE SubReddit = ?1 ORDER BY EntityName",
                params![channel],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_entities: {e}")))?;
        collect_strings(rows, "list_entities").await
    }

    async fn insert_entities(
        &self,
        entries: &[EntityCatalogEntry],
    ) -> Result<usize, DatabaseError> {
        if entries.is_empty() {
            return Ok(0);
        }

        let _guard = self.tx_lock.lock().await;
        let tx = self
            .conn()
            .transaction()
            .await
            .map_err(|e| DatabaseError::Pool(format!("insert_entities begin: {e}")))?;

        for entry in entries {
            let result = tx
                .execute(
                    "INSERT INTO Entities (EntityName, SubReddit) VALUES (?1, ?2)",
                    params![entry.entity_name.as_str(), entry.channel.as_str()],
                )
                .await;
            if let Err(e) = result {
                let err = DatabaseError::from_write("insert_entities", e);
                if let Err(rb) = tx.rollback().await {
                    warn!(error = %rb, "Rollback failed after entity insert error");
                }
                return Err(err);
            }
        }

        tx.commit()
            .await
            .map_err(|e| DatabaseError::from_write("insert_entities commit", e))?;

        debug!(count = entries.len(), "Entities inserted into DB");
        Ok(entries.len())
    }

    // ── Facts ───────────────────────────────────────────────────────

    async fn insert_facts(&self, rows: &[FactRow]) -> Result<usize, DatabaseError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let _guard = self.tx_lock.lock().await;
        let tx = self
            .conn()
            .transaction()
            .await
            .map_err(|e| DatabaseError::Pool(format!("insert_facts begin: {e}")))?;

        for row in rows {
            let result = tx
                .execute(
                    INSERT_FACT_SQL,
                    params![
                        row.comment_id.as_str(),
                        row.created_at_unix_seconds,
                        row.author.as_str(),
                        row.channel.as_str(),
                        row.entity_name.as_str(),
                        row.sentiment_compound,
                    ],
                )
                .await;
            if let Err(e) = result {
                let err = DatabaseError::from_write("insert_facts", e);
                if let Err(rb) = tx.rollback().await {
                    warn!(error = %rb, "Rollback failed after fact insert error");
                }
                return Err(err);
            }
        }

        tx.commit()
            .await
            .map_err(|e| DatabaseError::from_write("insert_facts commit", e))?;

        debug!(
            comment_id = %rows[0].comment_id,
            count = rows.len(),
            "Facts committed"
        );
        Ok(rows.len())
    }

    async fn list_facts_for_comment(
        &self,
        comment_id: &str,
    ) -> Result<Vec<FactRow>, DatabaseError> {
        let _guard = self.tx_lock.lock().await;
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {FACT_COLUMNS} FROM Comments WHERE Id = ?1 ORDER BY EntityName"
                ),
                params![comment_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_facts_for_comment: {e}")))?;

        let mut facts = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_facts_for_comment: {e}")))?
        {
            let fact = row_to_fact(&row)
                .map_err(|e| DatabaseError::Query(format!("fact row parse: {e}")))?;
            facts.push(fact);
        }
        Ok(facts)
    }

    async fn count_facts(&self) -> Result<u64, DatabaseError> {
        let _guard = self.tx_lock.lock().await;
        let mut rows = self
            .conn()
            .query("SELECT COUNT(*) FROM Comments", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("count_facts: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let count: i64 = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("count_facts row parse: {e}")))?;
                Ok(count.max(0) as u64)
            }
            Ok(None) => Ok(0),
            Err(e) => Err(DatabaseError::Query(format!("count_facts: {e}"))),
        }
    }
}
