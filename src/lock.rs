//! Ingestion Lock Manager.
//!
//! One exclusive lease per project. Contention fails fast with `LockHeld`
//! rather than queuing; callers own retry/backoff. A lease older than the
//! TTL is considered abandoned (crashed worker) and is forcibly reclaimed
//! by the next `acquire`, which logs the recovery.
//!
//! The service is an injected dependency; the SQLite implementation is the
//! production stand-in for a distributed mutex, the in-memory one is for
//! tests and single-process tooling.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::error::{LedgerError, Result};
use crate::models::LockRow;

/// A held lease. Pass it back to `release`; the owner id guards against
/// releasing a lock someone else reclaimed in the meantime.
#[derive(Debug, Clone)]
pub struct Lease {
    pub project: String,
    pub owner: String,
    pub acquired_at: i64,
}

#[async_trait]
pub trait LockService: Send + Sync {
    /// Acquire the project lease or fail with `LockHeld`.
    async fn acquire(&self, project: &str) -> Result<Lease>;

    /// Release a held lease. Releasing a lease that was reclaimed by
    /// another worker is a no-op.
    async fn release(&self, lease: &Lease) -> Result<()>;
}

/// Lease table in SQLite with TTL-based reclamation.
pub struct SqliteLockService {
    pool: SqlitePool,
    ttl: Duration,
}

impl SqliteLockService {
    pub fn new(pool: SqlitePool, ttl: Duration) -> Self {
        Self { pool, ttl }
    }

    pub async fn list(&self) -> Result<Vec<LockRow>> {
        let rows = sqlx::query("SELECT project, owner, locked_at FROM ingestion_locks ORDER BY project")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|r| LockRow {
                project: r.get("project"),
                owner: r.get("owner"),
                locked_at: r.get("locked_at"),
            })
            .collect())
    }

    /// Unconditional administrative removal of a project's lock row.
    pub async fn force_release(&self, project: &str) -> Result<bool> {
        let res = sqlx::query("DELETE FROM ingestion_locks WHERE project = ?")
            .bind(project)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }
}

#[async_trait]
impl LockService for SqliteLockService {
    async fn acquire(&self, project: &str) -> Result<Lease> {
        let owner = Uuid::new_v4().to_string();
        let now = Utc::now().timestamp();

        let inserted = sqlx::query(
            "INSERT INTO ingestion_locks (project, owner, locked_at) VALUES (?, ?, ?)
             ON CONFLICT(project) DO NOTHING",
        )
        .bind(project)
        .bind(&owner)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() > 0 {
            return Ok(Lease {
                project: project.to_string(),
                owner,
                acquired_at: now,
            });
        }

        // Row exists: either a live holder or an abandoned lease.
        let row = sqlx::query("SELECT owner, locked_at FROM ingestion_locks WHERE project = ?")
            .bind(project)
            .fetch_optional(&self.pool)
            .await?;

        let (held_owner, locked_at): (String, i64) = match row {
            Some(r) => (r.get("owner"), r.get("locked_at")),
            // Holder released between our insert attempt and the read.
            None => return self.acquire(project).await,
        };

        let age = now - locked_at;
        if age <= self.ttl.as_secs() as i64 {
            return Err(LedgerError::LockHeld {
                project: project.to_string(),
            });
        }

        // Stale lease: compare-and-swap so only one reclaimer wins.
        let reclaimed = sqlx::query(
            "UPDATE ingestion_locks SET owner = ?, locked_at = ?
             WHERE project = ? AND owner = ? AND locked_at = ?",
        )
        .bind(&owner)
        .bind(now)
        .bind(project)
        .bind(&held_owner)
        .bind(locked_at)
        .execute(&self.pool)
        .await?;

        if reclaimed.rows_affected() > 0 {
            tracing::warn!(
                project,
                stale_owner = %held_owner,
                age_secs = age,
                "reclaimed abandoned ingestion lock"
            );
            return Ok(Lease {
                project: project.to_string(),
                owner,
                acquired_at: now,
            });
        }

        Err(LedgerError::LockHeld {
            project: project.to_string(),
        })
    }

    async fn release(&self, lease: &Lease) -> Result<()> {
        sqlx::query("DELETE FROM ingestion_locks WHERE project = ? AND owner = ?")
            .bind(&lease.project)
            .bind(&lease.owner)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Process-local lock service for tests.
pub struct InMemoryLockService {
    ttl_secs: i64,
    held: Mutex<HashMap<String, (String, i64)>>,
}

impl InMemoryLockService {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl_secs: ttl.as_secs() as i64,
            held: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl LockService for InMemoryLockService {
    async fn acquire(&self, project: &str) -> Result<Lease> {
        let now = Utc::now().timestamp();
        let owner = Uuid::new_v4().to_string();
        let mut held = self.held.lock().unwrap();
        if let Some((_, locked_at)) = held.get(project) {
            if now - locked_at <= self.ttl_secs {
                return Err(LedgerError::LockHeld {
                    project: project.to_string(),
                });
            }
        }
        held.insert(project.to_string(), (owner.clone(), now));
        Ok(Lease {
            project: project.to_string(),
            owner,
            acquired_at: now,
        })
    }

    async fn release(&self, lease: &Lease) -> Result<()> {
        let mut held = self.held.lock().unwrap();
        if let Some((owner, _)) = held.get(&lease.project) {
            if owner == &lease.owner {
                held.remove(&lease.project);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, migrate};

    async fn service(ttl: Duration) -> (tempfile::TempDir, SqliteLockService) {
        let dir = tempfile::tempdir().unwrap();
        let pool = db::connect_path(&dir.path().join("pol.sqlite")).await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        (dir, SqliteLockService::new(pool, ttl))
    }

    #[tokio::test]
    async fn second_acquire_fails_fast() {
        let (_dir, locks) = service(Duration::from_secs(900)).await;
        let lease = locks.acquire("AMBOSELI").await.unwrap();
        assert!(matches!(
            locks.acquire("AMBOSELI").await,
            Err(LedgerError::LockHeld { .. })
        ));
        // Different projects are independent.
        let other = locks.acquire("SERENGETI").await.unwrap();
        locks.release(&other).await.unwrap();
        locks.release(&lease).await.unwrap();
        // Released lock is acquirable again.
        locks.acquire("AMBOSELI").await.unwrap();
    }

    #[tokio::test]
    async fn stale_lock_is_reclaimed() {
        let (_dir, locks) = service(Duration::from_secs(60)).await;
        let lease = locks.acquire("AMBOSELI").await.unwrap();

        // Age the lock past the TTL directly in the table.
        sqlx::query("UPDATE ingestion_locks SET locked_at = locked_at - 3600 WHERE project = ?")
            .bind("AMBOSELI")
            .execute(&locks.pool)
            .await
            .unwrap();

        let reclaimed = locks.acquire("AMBOSELI").await.unwrap();
        assert_ne!(reclaimed.owner, lease.owner);

        // The original holder's release must not clobber the new lease.
        locks.release(&lease).await.unwrap();
        let rows = locks.list().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].owner, reclaimed.owner);
    }

    #[tokio::test]
    async fn in_memory_mirrors_semantics() {
        let locks = InMemoryLockService::new(Duration::from_secs(900));
        let lease = locks.acquire("P").await.unwrap();
        assert!(locks.acquire("P").await.is_err());
        locks.release(&lease).await.unwrap();
        assert!(locks.acquire("P").await.is_ok());
    }
}
