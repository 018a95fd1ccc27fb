use sqlx::SqlitePool;

use crate::error::Result;

/// Create the ledger schema. Idempotent, safe to run on every startup.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Chunk ledger. The hex range strings are the audit record; decimal
    // mirrors are derived. `revision` disambiguates content drift under an
    // unchanged declared version; superseded rows stay for audit.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS policy_chunks (
            chunk_id TEXT PRIMARY KEY,
            project TEXT NOT NULL,
            policy_version TEXT NOT NULL,
            mpu_name TEXT NOT NULL,
            rg_index INTEGER NOT NULL,
            profile TEXT NOT NULL,
            start_hex TEXT NOT NULL,
            end_hex TEXT NOT NULL,
            start_dec INTEGER NOT NULL,
            end_dec INTEGER NOT NULL,
            chunk_index INTEGER NOT NULL,
            chunk_text TEXT NOT NULL,
            identity_hash TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            revision INTEGER NOT NULL DEFAULT 0,
            supersedes TEXT,
            vector_id TEXT,
            is_active INTEGER NOT NULL DEFAULT 0,
            is_propagated INTEGER NOT NULL DEFAULT 1,
            xml_path TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(identity_hash, policy_version, chunk_index, revision)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Per-document resume state.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ingestion_progress (
            xml_path TEXT PRIMARY KEY,
            status TEXT NOT NULL CHECK (
                status IN ('PENDING', 'IN_PROGRESS', 'DONE', 'FAILED')
            ),
            last_chunk_index INTEGER NOT NULL DEFAULT -1,
            source_hash TEXT NOT NULL DEFAULT '',
            error TEXT,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Per-project exclusive lease.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ingestion_locks (
            project TEXT PRIMARY KEY,
            owner TEXT NOT NULL,
            locked_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Propagation forest.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS project_hierarchy (
            parent_project TEXT NOT NULL,
            child_project TEXT NOT NULL,
            PRIMARY KEY (parent_project, child_project)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chunks_identity ON policy_chunks(identity_hash)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chunks_content_hash ON policy_chunks(content_hash)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_project ON policy_chunks(project)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chunks_active ON policy_chunks(identity_hash, is_active)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Drop every ledger table. Only reachable through the confirmation-gated
/// admin reset.
pub async fn drop_schema(pool: &SqlitePool) -> Result<()> {
    for table in [
        "policy_chunks",
        "ingestion_progress",
        "ingestion_locks",
        "project_hierarchy",
    ] {
        sqlx::query(&format!("DROP TABLE IF EXISTS {}", table))
            .execute(pool)
            .await?;
    }
    Ok(())
}
