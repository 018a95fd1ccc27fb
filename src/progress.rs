//! Ingestion Progress Tracker.
//!
//! One row per source document path, acting as a small state machine:
//!
//! ```text
//! PENDING -> IN_PROGRESS -> DONE
//!               |  ^
//!               v  |          (retry resumes at last_chunk_index + 1)
//!             FAILED
//! ```
//!
//! The resume pointer (`last_chunk_index`) only advances after a chunk is
//! fully committed, vector binding included. A DONE path is terminal until
//! its source fingerprint changes, at which point the next claim starts a
//! fresh pass from chunk 0.

use chrono::Utc;
use sqlx::{Row, SqlitePool};

use crate::error::Result;
use crate::models::{IngestionStatus, ProgressRow};

/// What the driver should do with a claimed document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// Path is DONE with an unchanged source; nothing to do.
    AlreadyDone,
    /// Ingest starting at this chunk index (0 for a fresh pass).
    Start { next_chunk: i64 },
}

#[derive(Clone)]
pub struct ProgressTracker {
    pool: SqlitePool,
}

impl ProgressTracker {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, xml_path: &str) -> Result<Option<ProgressRow>> {
        let row = sqlx::query(
            "SELECT xml_path, status, last_chunk_index, source_hash, error, updated_at
             FROM ingestion_progress WHERE xml_path = ?",
        )
        .bind(xml_path)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_progress))
    }

    /// Claim a document for ingestion and decide the resume point.
    ///
    /// A changed `source_hash` always restarts at chunk 0; new content is
    /// not assumed to share chunk boundaries with the old content.
    pub async fn claim(&self, xml_path: &str, source_hash: &str) -> Result<ClaimOutcome> {
        let existing = self.get(xml_path).await?;

        let next_chunk = match existing {
            None => {
                self.upsert(xml_path, IngestionStatus::Pending, -1, source_hash, None)
                    .await?;
                0
            }
            Some(row) => {
                if row.status == IngestionStatus::Done && row.source_hash == source_hash {
                    return Ok(ClaimOutcome::AlreadyDone);
                }
                if row.source_hash == source_hash {
                    // Resume the interrupted or failed pass.
                    row.last_chunk_index + 1
                } else {
                    // Source changed: fresh pass from zero.
                    self.upsert(xml_path, IngestionStatus::Pending, -1, source_hash, None)
                        .await?;
                    0
                }
            }
        };

        self.upsert(
            xml_path,
            IngestionStatus::InProgress,
            next_chunk - 1,
            source_hash,
            None,
        )
        .await?;
        Ok(ClaimOutcome::Start { next_chunk })
    }

    /// Advance the resume pointer past a fully committed chunk.
    pub async fn advance(&self, xml_path: &str, chunk_index: i64) -> Result<()> {
        sqlx::query(
            "UPDATE ingestion_progress SET last_chunk_index = ?, updated_at = ? WHERE xml_path = ?",
        )
        .bind(chunk_index)
        .bind(Utc::now().timestamp())
        .bind(xml_path)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_done(&self, xml_path: &str) -> Result<()> {
        sqlx::query(
            "UPDATE ingestion_progress SET status = 'DONE', error = NULL, updated_at = ? WHERE xml_path = ?",
        )
        .bind(Utc::now().timestamp())
        .bind(xml_path)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a failure. The pointer is left where it was so a retry
    /// resumes rather than restarting.
    pub async fn mark_failed(&self, xml_path: &str, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE ingestion_progress SET status = 'FAILED', error = ?, updated_at = ? WHERE xml_path = ?",
        )
        .bind(error)
        .bind(Utc::now().timestamp())
        .bind(xml_path)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Drop the tracking row so the next claim starts a fresh pass from
    /// chunk 0 regardless of prior state.
    pub async fn reset(&self, xml_path: &str) -> Result<()> {
        sqlx::query("DELETE FROM ingestion_progress WHERE xml_path = ?")
            .bind(xml_path)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn all(&self) -> Result<Vec<ProgressRow>> {
        let rows = sqlx::query(
            "SELECT xml_path, status, last_chunk_index, source_hash, error, updated_at
             FROM ingestion_progress ORDER BY xml_path",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_progress).collect())
    }

    async fn upsert(
        &self,
        xml_path: &str,
        status: IngestionStatus,
        last_chunk_index: i64,
        source_hash: &str,
        error: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO ingestion_progress (xml_path, status, last_chunk_index, source_hash, error, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(xml_path) DO UPDATE SET
                status = excluded.status,
                last_chunk_index = excluded.last_chunk_index,
                source_hash = excluded.source_hash,
                error = excluded.error,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(xml_path)
        .bind(status.as_str())
        .bind(last_chunk_index)
        .bind(source_hash)
        .bind(error)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn row_to_progress(row: &sqlx::sqlite::SqliteRow) -> ProgressRow {
    let status: String = row.get("status");
    ProgressRow {
        xml_path: row.get("xml_path"),
        status: IngestionStatus::parse(&status).unwrap_or(IngestionStatus::Failed),
        last_chunk_index: row.get("last_chunk_index"),
        source_hash: row.get("source_hash"),
        error: row.get("error"),
        updated_at: row.get("updated_at"),
    }
}
