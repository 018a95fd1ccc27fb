//! Version Activator.
//!
//! Promotes a fully ingested, fully vector-bound version set to active and
//! demotes whatever was active for the same logical policy, in one
//! transaction, with the postcondition read back before commit. No reader
//! ever observes a half-activated policy.

use sqlx::{Row, SqlitePool};

use crate::error::{LedgerError, Result};

#[derive(Clone)]
pub struct VersionActivator {
    pool: SqlitePool,
}

impl VersionActivator {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Atomically cut over `identity_hash` to the given row set.
    ///
    /// Preconditions checked inside the transaction: every target row
    /// belongs to the identity and carries a bound `vector_id`.
    /// Postcondition checked before commit: the active rows for the
    /// identity are exactly the target set, one per chunk index. Any
    /// violation rolls back and surfaces as `ActivationConflict`.
    pub async fn activate(&self, identity_hash: &str, chunk_ids: &[String]) -> Result<()> {
        if chunk_ids.is_empty() {
            return Err(LedgerError::ActivationConflict {
                identity_hash: identity_hash.to_string(),
                reason: "empty version set".to_string(),
            });
        }

        let conflict = |reason: String| LedgerError::ActivationConflict {
            identity_hash: identity_hash.to_string(),
            reason,
        };

        let mut tx = self.pool.begin().await?;

        // Verify the target rows exist, match the identity, and are bound.
        for chunk_id in chunk_ids {
            let row = sqlx::query(
                "SELECT identity_hash, vector_id FROM policy_chunks WHERE chunk_id = ?",
            )
            .bind(chunk_id)
            .fetch_optional(&mut *tx)
            .await?;

            let row = match row {
                Some(r) => r,
                None => return Err(conflict(format!("missing chunk row {}", chunk_id))),
            };
            let row_identity: String = row.get("identity_hash");
            if row_identity != identity_hash {
                return Err(conflict(format!(
                    "chunk row {} belongs to identity {}",
                    chunk_id, row_identity
                )));
            }
            let vector_id: Option<String> = row.get("vector_id");
            if vector_id.is_none() {
                return Err(conflict(format!("chunk row {} has no vector binding", chunk_id)));
            }
        }

        // Demote the predecessor version.
        sqlx::query("UPDATE policy_chunks SET is_active = 0 WHERE identity_hash = ? AND is_active = 1")
            .bind(identity_hash)
            .execute(&mut *tx)
            .await?;

        // Promote the new set.
        for chunk_id in chunk_ids {
            sqlx::query(
                "UPDATE policy_chunks SET is_active = 1 WHERE chunk_id = ? AND identity_hash = ?",
            )
            .bind(chunk_id)
            .bind(identity_hash)
            .execute(&mut *tx)
            .await?;
        }

        // Read back the invariant: exactly the new set is active, one row
        // per chunk index.
        let row = sqlx::query(
            "SELECT COUNT(*) AS n, COUNT(DISTINCT chunk_index) AS distinct_n
             FROM policy_chunks WHERE identity_hash = ? AND is_active = 1",
        )
        .bind(identity_hash)
        .fetch_one(&mut *tx)
        .await?;
        let active: i64 = row.get("n");
        let distinct: i64 = row.get("distinct_n");

        if active != chunk_ids.len() as i64 || distinct != chunk_ids.len() as i64 {
            // Dropping the transaction rolls it back.
            return Err(conflict(format!(
                "postcondition failed: {} active rows over {} chunk indices, expected {}",
                active,
                distinct,
                chunk_ids.len()
            )));
        }

        tx.commit().await?;
        tracing::debug!(identity_hash, rows = chunk_ids.len(), "activated version set");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AddressRange, ChunkDraft, PolicyIdentity};
    use crate::store::ChunkStore;
    use crate::{db, identity, migrate};

    async fn fixture() -> (tempfile::TempDir, ChunkStore, VersionActivator) {
        let dir = tempfile::tempdir().unwrap();
        let pool = db::connect_path(&dir.path().join("pol.sqlite")).await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        (
            dir,
            ChunkStore::new(pool.clone()),
            VersionActivator::new(pool),
        )
    }

    fn draft(version: &str, chunk_index: i64, text: &str) -> ChunkDraft {
        let id = PolicyIdentity::new("AMBOSELI", "MPU0", 3, Some("TZ"));
        ChunkDraft {
            identity_hash: identity::identity_hash(&id),
            identity: id,
            policy_version: version.to_string(),
            range: AddressRange {
                start_hex: "0x1000".into(),
                end_hex: "0x1FFF".into(),
                start_dec: 0x1000,
                end_dec: 0x1FFF,
            },
            chunk_index,
            content_hash: identity::content_hash(text),
            chunk_text: text.to_string(),
            xml_path: format!("policy_{}.xml", version),
        }
    }

    async fn committed_version(
        store: &ChunkStore,
        version: &str,
        texts: &[&str],
    ) -> (String, Vec<String>) {
        let mut ids = Vec::new();
        let mut identity_hash = String::new();
        for (i, text) in texts.iter().enumerate() {
            let outcome = store
                .upsert_chunk(&draft(version, i as i64, text))
                .await
                .unwrap();
            let row = outcome.row().clone();
            store
                .bind_vector(&row.chunk_id, &format!("vec-{}-{}", version, i))
                .await
                .unwrap();
            identity_hash = row.identity_hash.clone();
            ids.push(row.chunk_id);
        }
        (identity_hash, ids)
    }

    #[tokio::test]
    async fn cutover_swaps_active_sets_atomically() {
        let (_dir, store, activator) = fixture().await;

        let (identity_hash, v1) = committed_version(&store, "v1", &["a", "b"]).await;
        activator.activate(&identity_hash, &v1).await.unwrap();
        let active = store.active_rows(&identity_hash).await.unwrap();
        assert_eq!(active.len(), 2);
        assert!(active.iter().all(|c| c.policy_version == "v1"));

        let (_, v2) = committed_version(&store, "v2", &["a2", "b2", "c2"]).await;
        activator.activate(&identity_hash, &v2).await.unwrap();
        let active = store.active_rows(&identity_hash).await.unwrap();
        assert_eq!(active.len(), 3);
        assert!(active.iter().all(|c| c.policy_version == "v2"));
    }

    #[tokio::test]
    async fn unbound_chunk_blocks_activation() {
        let (_dir, store, activator) = fixture().await;
        let outcome = store.upsert_chunk(&draft("v1", 0, "a")).await.unwrap();
        let row = outcome.row().clone();
        // No bind_vector call.
        let err = activator
            .activate(&row.identity_hash, &[row.chunk_id.clone()])
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::ActivationConflict { .. }));
        assert!(store.active_rows(&row.identity_hash).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_set_is_rejected() {
        let (_dir, _store, activator) = fixture().await;
        assert!(matches!(
            activator.activate("deadbeef", &[]).await,
            Err(LedgerError::ActivationConflict { .. })
        ));
    }

    #[tokio::test]
    async fn foreign_row_is_rejected() {
        let (_dir, store, activator) = fixture().await;
        let (_, v1) = committed_version(&store, "v1", &["a"]).await;
        let err = activator.activate("not-the-identity", &v1).await.unwrap_err();
        assert!(matches!(err, LedgerError::ActivationConflict { .. }));
    }
}
