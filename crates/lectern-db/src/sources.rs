//! Source documents and unit collection from PostgreSQL.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row};
use tracing::{debug, warn};
use uuid::Uuid;

use lectern_core::{new_v7, Error, Result, SourceUnit, UnitCollector};

use crate::chunking::{Chunker, MarkdownChunker};

/// Reads a textbook's `source_documents` in order and chunks each one into
/// a [`SourceUnit`].
#[derive(Clone)]
pub struct PgUnitCollector {
    pool: Pool<Postgres>,
    chunker: Arc<dyn Chunker>,
}

impl PgUnitCollector {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            pool,
            chunker: Arc::new(MarkdownChunker::default()),
        }
    }

    /// Use a different chunking strategy.
    pub fn with_chunker(mut self, chunker: Arc<dyn Chunker>) -> Self {
        self.chunker = chunker;
        self
    }

    /// Add a source document to a textbook.
    pub async fn insert_document(
        &self,
        textbook_id: Uuid,
        filename: &str,
        position: i32,
        content: &str,
    ) -> Result<Uuid> {
        let id = new_v7();
        sqlx::query(
            "INSERT INTO source_documents (id, textbook_id, filename, position, content)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(id)
        .bind(textbook_id)
        .bind(filename)
        .bind(position)
        .bind(content)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(id)
    }
}

#[async_trait]
impl UnitCollector for PgUnitCollector {
    async fn collect_units(&self, textbook_id: Uuid) -> Result<Vec<SourceUnit>> {
        let rows = sqlx::query(
            "SELECT id, filename, content FROM source_documents
             WHERE textbook_id = $1
             ORDER BY position, filename, id",
        )
        .bind(textbook_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        let units: Vec<SourceUnit> = rows
            .into_iter()
            .map(|row| {
                let id: Uuid = row.get("id");
                let label: String = row.get("filename");
                let content: String = row.get("content");
                let chunks = self.chunker.chunk(id, &content);
                if chunks.is_empty() {
                    warn!(
                        subsystem = "db",
                        component = "sources",
                        textbook_id = %textbook_id,
                        unit = %label,
                        "Source document produced no chunks"
                    );
                }
                SourceUnit { id, label, chunks }
            })
            .collect();

        debug!(
            subsystem = "db",
            component = "sources",
            op = "collect",
            textbook_id = %textbook_id,
            unit_count = units.len(),
            "Collected source units"
        );
        Ok(units)
    }
}
