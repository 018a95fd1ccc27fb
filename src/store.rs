//! Chunk Store: idempotent upserts, exactly-once vector binding, and the
//! queries the activator and auditors run.
//!
//! Rows are never rewritten in place. Re-ingesting identical content is a
//! no-op; drifted content under the same declared version gets a new row
//! with a bumped `revision` and a `supersedes` link back to the row it
//! replaces, so history stays queryable.

use chrono::Utc;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::error::{LedgerError, Result};
use crate::models::{ChunkDraft, PolicyChunk};

/// Outcome of an upsert against the `(identity, version, index)` slot.
#[derive(Debug, Clone)]
pub enum UpsertOutcome {
    /// No prior row: inserted at revision 0.
    Inserted(PolicyChunk),
    /// Prior row has identical content: nothing written.
    Unchanged(PolicyChunk),
    /// Content drifted: new revision inserted, prior row linked via
    /// `supersedes`.
    Superseded {
        new: PolicyChunk,
        replaced: String,
    },
}

impl UpsertOutcome {
    pub fn row(&self) -> &PolicyChunk {
        match self {
            UpsertOutcome::Inserted(c) => c,
            UpsertOutcome::Unchanged(c) => c,
            UpsertOutcome::Superseded { new, .. } => new,
        }
    }
}

#[derive(Clone)]
pub struct ChunkStore {
    pool: SqlitePool,
}

impl ChunkStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or recognize a chunk. Conflicts on
    /// `(identity_hash, policy_version, chunk_index)` are resolved by
    /// content comparison; see [`UpsertOutcome`].
    pub async fn upsert_chunk(&self, draft: &ChunkDraft) -> Result<UpsertOutcome> {
        // The parser validates ranges, but drafts can be constructed
        // directly; the store is the last line of defense.
        if draft.range.end_dec < draft.range.start_dec {
            return Err(LedgerError::ConstraintViolation(format!(
                "end address {} is below start address {}",
                draft.range.end_hex, draft.range.start_hex
            )));
        }

        let existing = self
            .latest_revision(&draft.identity_hash, &draft.policy_version, draft.chunk_index)
            .await?;

        match existing {
            None => {
                let row = self.insert_row(draft, 0, None).await?;
                Ok(UpsertOutcome::Inserted(row))
            }
            Some(prior) => {
                // Same digest, different source fields means a hash
                // collision against mismatched data. Fatal, never merged.
                if prior.project != draft.identity.project
                    || prior.mpu_name != draft.identity.mpu_name
                    || prior.rg_index != draft.identity.rg_index
                    || prior.profile != draft.identity.profile
                {
                    return Err(LedgerError::ConstraintViolation(format!(
                        "identity hash collision: row {} carries different identity fields",
                        prior.chunk_id
                    )));
                }
                if prior.content_hash == draft.content_hash {
                    return Ok(UpsertOutcome::Unchanged(prior));
                }
                let new = self
                    .insert_row(draft, prior.revision + 1, Some(&prior.chunk_id))
                    .await?;
                Ok(UpsertOutcome::Superseded {
                    new,
                    replaced: prior.chunk_id,
                })
            }
        }
    }

    async fn insert_row(
        &self,
        draft: &ChunkDraft,
        revision: i64,
        supersedes: Option<&str>,
    ) -> Result<PolicyChunk> {
        let chunk_id = Uuid::new_v4().to_string();
        let created_at = Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO policy_chunks (
                chunk_id, project, policy_version, mpu_name, rg_index, profile,
                start_hex, end_hex, start_dec, end_dec,
                chunk_index, chunk_text, identity_hash, content_hash,
                revision, supersedes, vector_id, is_active, is_propagated,
                xml_path, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, 0, 1, ?, ?)
            "#,
        )
        .bind(&chunk_id)
        .bind(&draft.identity.project)
        .bind(&draft.policy_version)
        .bind(&draft.identity.mpu_name)
        .bind(draft.identity.rg_index)
        .bind(&draft.identity.profile)
        .bind(&draft.range.start_hex)
        .bind(&draft.range.end_hex)
        .bind(draft.range.start_dec)
        .bind(draft.range.end_dec)
        .bind(draft.chunk_index)
        .bind(&draft.chunk_text)
        .bind(&draft.identity_hash)
        .bind(&draft.content_hash)
        .bind(revision)
        .bind(supersedes)
        .bind(&draft.xml_path)
        .bind(created_at)
        .execute(&self.pool)
        .await?;

        Ok(PolicyChunk {
            chunk_id,
            project: draft.identity.project.clone(),
            policy_version: draft.policy_version.clone(),
            mpu_name: draft.identity.mpu_name.clone(),
            rg_index: draft.identity.rg_index,
            profile: draft.identity.profile.clone(),
            start_hex: draft.range.start_hex.clone(),
            end_hex: draft.range.end_hex.clone(),
            start_dec: draft.range.start_dec,
            end_dec: draft.range.end_dec,
            chunk_index: draft.chunk_index,
            chunk_text: draft.chunk_text.clone(),
            identity_hash: draft.identity_hash.clone(),
            content_hash: draft.content_hash.clone(),
            revision,
            supersedes: supersedes.map(str::to_string),
            vector_id: None,
            is_active: false,
            is_propagated: true,
            xml_path: draft.xml_path.clone(),
            created_at,
        })
    }

    /// Bind the external vector id to a row, exactly once. Re-supplying the
    /// same id is an idempotent retry; a different id is a caller bug.
    ///
    /// The update is guarded by `vector_id IS NULL` and judged by its
    /// affected-row count, so a binding that lands concurrently is detected
    /// rather than silently skipped.
    pub async fn bind_vector(&self, chunk_id: &str, vector_id: &str) -> Result<()> {
        let res = sqlx::query(
            "UPDATE policy_chunks SET vector_id = ? WHERE chunk_id = ? AND vector_id IS NULL",
        )
        .bind(vector_id)
        .bind(chunk_id)
        .execute(&self.pool)
        .await?;

        if res.rows_affected() > 0 {
            return Ok(());
        }

        // No unbound row matched: the row is missing or already bound.
        let current: Option<Option<String>> =
            sqlx::query_scalar("SELECT vector_id FROM policy_chunks WHERE chunk_id = ?")
                .bind(chunk_id)
                .fetch_optional(&self.pool)
                .await?;

        match current {
            None => Err(LedgerError::ConstraintViolation(format!(
                "no chunk row with id {}",
                chunk_id
            ))),
            Some(Some(existing)) if existing == vector_id => Ok(()),
            Some(Some(existing)) => Err(LedgerError::AlreadyBound {
                chunk_id: chunk_id.to_string(),
                existing,
            }),
            Some(None) => Err(LedgerError::ConstraintViolation(format!(
                "binding update for chunk row {} affected no rows",
                chunk_id
            ))),
        }
    }

    /// Latest revision committed for one `(identity, version, index)` slot.
    pub async fn latest_revision(
        &self,
        identity_hash: &str,
        policy_version: &str,
        chunk_index: i64,
    ) -> Result<Option<PolicyChunk>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM policy_chunks
            WHERE identity_hash = ? AND policy_version = ? AND chunk_index = ?
            ORDER BY revision DESC
            LIMIT 1
            "#,
        )
        .bind(identity_hash)
        .bind(policy_version)
        .bind(chunk_index)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_chunk))
    }

    pub async fn get(&self, chunk_id: &str) -> Result<Option<PolicyChunk>> {
        let row = sqlx::query("SELECT * FROM policy_chunks WHERE chunk_id = ?")
            .bind(chunk_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_chunk))
    }

    /// Latest revision per chunk index for one version of one identity.
    /// An audit view: it spans every index the version has ever carried,
    /// including ones a later, shorter rendition no longer produces.
    pub async fn version_set(
        &self,
        identity_hash: &str,
        policy_version: &str,
    ) -> Result<Vec<PolicyChunk>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM policy_chunks p
            WHERE identity_hash = ? AND policy_version = ?
              AND revision = (
                SELECT MAX(revision) FROM policy_chunks
                WHERE identity_hash = p.identity_hash
                  AND policy_version = p.policy_version
                  AND chunk_index = p.chunk_index
              )
            ORDER BY chunk_index
            "#,
        )
        .bind(identity_hash)
        .bind(policy_version)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_chunk).collect())
    }

    /// Currently active rows for a logical policy.
    pub async fn active_rows(&self, identity_hash: &str) -> Result<Vec<PolicyChunk>> {
        let rows = sqlx::query(
            "SELECT * FROM policy_chunks WHERE identity_hash = ? AND is_active = 1 ORDER BY chunk_index",
        )
        .bind(identity_hash)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_chunk).collect())
    }

    /// All rows carrying a given content hash, for drift audits.
    pub async fn rows_by_content_hash(&self, content_hash: &str) -> Result<Vec<PolicyChunk>> {
        let rows = sqlx::query(
            "SELECT * FROM policy_chunks WHERE content_hash = ? ORDER BY created_at",
        )
        .bind(content_hash)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_chunk).collect())
    }

    pub async fn count_rows(&self) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM policy_chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

pub(crate) fn row_to_chunk(row: &sqlx::sqlite::SqliteRow) -> PolicyChunk {
    PolicyChunk {
        chunk_id: row.get("chunk_id"),
        project: row.get("project"),
        policy_version: row.get("policy_version"),
        mpu_name: row.get("mpu_name"),
        rg_index: row.get("rg_index"),
        profile: row.get("profile"),
        start_hex: row.get("start_hex"),
        end_hex: row.get("end_hex"),
        start_dec: row.get("start_dec"),
        end_dec: row.get("end_dec"),
        chunk_index: row.get("chunk_index"),
        chunk_text: row.get("chunk_text"),
        identity_hash: row.get("identity_hash"),
        content_hash: row.get("content_hash"),
        revision: row.get("revision"),
        supersedes: row.get("supersedes"),
        vector_id: row.get("vector_id"),
        is_active: row.get::<i64, _>("is_active") != 0,
        is_propagated: row.get::<i64, _>("is_propagated") != 0,
        xml_path: row.get("xml_path"),
        created_at: row.get("created_at"),
    }
}
