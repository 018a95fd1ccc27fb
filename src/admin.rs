//! Administrative reset. Destructive; every entry point is gated on an
//! explicit confirmation flag so a fat-fingered invocation cannot wipe an
//! environment.

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::error::{LedgerError, Result};
use crate::migrate;
use crate::vector::VectorIndex;

#[derive(Debug, Clone, Copy, Default)]
pub struct ResetOptions {
    /// Must be set; without it the reset refuses to run.
    pub confirmed: bool,
    /// Also drop the tables instead of just emptying them.
    pub drop_schema: bool,
}

/// Wipe chunk rows, progress, and locks, and clear the vector collection.
/// The hierarchy is configuration rather than ingested state and survives
/// a reset.
pub async fn run_reset(
    pool: &SqlitePool,
    index: Arc<dyn VectorIndex>,
    collection: &str,
    options: ResetOptions,
) -> Result<()> {
    if !options.confirmed {
        return Err(LedgerError::ConstraintViolation(
            "reset requires explicit confirmation".to_string(),
        ));
    }

    index
        .delete_collection(collection)
        .await
        .map_err(|e| LedgerError::ConstraintViolation(format!("vector reset failed: {e}")))?;

    if options.drop_schema {
        migrate::drop_schema(pool).await?;
        tracing::warn!("schema dropped");
        return Ok(());
    }

    for table in ["policy_chunks", "ingestion_progress", "ingestion_locks"] {
        sqlx::query(&format!("DELETE FROM {table}"))
            .execute(pool)
            .await?;
    }
    tracing::warn!("ledger emptied, hierarchy preserved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::ProjectHierarchy;
    use crate::vector::InMemoryVectorIndex;
    use crate::{db, migrate};

    async fn test_pool() -> (tempfile::TempDir, SqlitePool) {
        let dir = tempfile::tempdir().unwrap();
        let pool = db::connect_path(&dir.path().join("pol.sqlite")).await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        (dir, pool)
    }

    #[tokio::test]
    async fn reset_refuses_without_confirmation() {
        let (_dir, pool) = test_pool().await;
        let index = Arc::new(InMemoryVectorIndex::new());
        let result = run_reset(
            &pool,
            index,
            "AccessControlPolicy",
            ResetOptions::default(),
        )
        .await;
        assert!(matches!(result, Err(LedgerError::ConstraintViolation(_))));
    }

    #[tokio::test]
    async fn reset_preserves_hierarchy() {
        let (_dir, pool) = test_pool().await;
        let hierarchy = ProjectHierarchy::new(pool.clone());
        hierarchy.add_edge("AMBOSELI", "SERENGETI").await.unwrap();

        sqlx::query(
            "INSERT INTO ingestion_progress (xml_path, status, last_chunk_index, source_hash, updated_at)
             VALUES ('a.xml', 'DONE', 4, 'h', 0)",
        )
        .execute(&pool)
        .await
        .unwrap();

        let index = Arc::new(InMemoryVectorIndex::new());
        run_reset(
            &pool,
            index,
            "AccessControlPolicy",
            ResetOptions {
                confirmed: true,
                drop_schema: false,
            },
        )
        .await
        .unwrap();

        let progress: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ingestion_progress")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(progress, 0);
        assert_eq!(hierarchy.children("AMBOSELI").await.unwrap().len(), 1);
    }
}
