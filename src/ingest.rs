//! Ingestion driver: the orchestration layer that ties parsing, chunking,
//! the ledger, vector binding, activation, and propagation together.
//!
//! Ordering inside one document is strict: the per-project lock is taken
//! before any write, the resume pointer only moves past a chunk once its
//! row and vector binding are durable, and the document is marked DONE
//! only after every touched identity has been activated. An interruption
//! at any point leaves a state the next run can pick up from.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use walkdir::WalkDir;

use crate::activate::VersionActivator;
use crate::chunk;
use crate::config::Config;
use crate::error::{LedgerError, Result};
use crate::hierarchy::PropagationResolver;
use crate::identity;
use crate::lock::{Lease, LockService};
use crate::models::{ChunkDraft, PolicyChunk};
use crate::parser::{self, PolicyDocument};
use crate::progress::{ClaimOutcome, ProgressTracker};
use crate::store::ChunkStore;
use crate::vector::{VectorAttributes, VectorIndex};

#[derive(Debug, Clone, Copy, Default)]
pub struct IngestOptions {
    /// Discard any recorded progress and re-run the document from chunk 0.
    pub full: bool,
    /// Parse and chunk only; no database or vector writes.
    pub dry_run: bool,
}

/// What one document pass did.
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub xml_path: String,
    pub project: String,
    pub policy_version: String,
    pub chunks_total: usize,
    /// Chunks skipped because the resume pointer was already past them.
    pub chunks_resumed_past: usize,
    pub chunks_processed: usize,
    pub vectors_bound: usize,
    /// Logical policies whose active set was cut over this pass.
    pub identities_activated: usize,
    /// Child projects flagged for propagation.
    pub children_notified: Vec<String>,
    pub already_done: bool,
}

/// Result of sweeping a directory: per-file failures do not abort the
/// sweep.
#[derive(Debug, Default)]
pub struct SweepOutcome {
    pub reports: Vec<IngestReport>,
    pub failures: Vec<(String, LedgerError)>,
}

pub struct Ingestor {
    store: ChunkStore,
    progress: ProgressTracker,
    locks: Arc<dyn LockService>,
    index: Arc<dyn VectorIndex>,
    activator: VersionActivator,
    resolver: PropagationResolver,
    max_words: usize,
    max_retries: u32,
    retry_base_ms: u64,
}

impl Ingestor {
    pub fn new(
        pool: SqlitePool,
        config: &Config,
        locks: Arc<dyn LockService>,
        index: Arc<dyn VectorIndex>,
    ) -> Self {
        Self {
            store: ChunkStore::new(pool.clone()),
            progress: ProgressTracker::new(pool.clone()),
            locks,
            index,
            activator: VersionActivator::new(pool.clone()),
            resolver: PropagationResolver::new(pool),
            max_words: config.chunking.max_words,
            max_retries: config.vector.max_retries,
            retry_base_ms: config.vector.retry_base_ms,
        }
    }

    pub fn store(&self) -> &ChunkStore {
        &self.store
    }

    pub fn progress(&self) -> &ProgressTracker {
        &self.progress
    }

    /// Ingest a single policy document.
    pub async fn ingest_file(&self, path: &Path, options: IngestOptions) -> Result<IngestReport> {
        let xml_path = path.to_string_lossy().to_string();
        let xml = std::fs::read_to_string(path)?;
        let doc = match parser::parse_policy_xml(&xml_path, &xml) {
            Ok(doc) => doc,
            Err(e) => {
                // Record the aborted pass so `status` shows the diagnostic;
                // a fixed source restarts from chunk 0.
                if !options.dry_run {
                    let source_hash = identity::content_hash(&xml);
                    if let ClaimOutcome::Start { .. } =
                        self.progress.claim(&xml_path, &source_hash).await?
                    {
                        self.progress.mark_failed(&xml_path, &e.to_string()).await?;
                    }
                }
                return Err(e);
            }
        };
        let drafts = chunk::build_drafts(&doc, &xml_path, self.max_words)?;

        let mut report = IngestReport {
            xml_path: xml_path.clone(),
            project: doc.project.clone(),
            policy_version: doc.policy_version.clone(),
            chunks_total: drafts.len(),
            chunks_resumed_past: 0,
            chunks_processed: 0,
            vectors_bound: 0,
            identities_activated: 0,
            children_notified: Vec::new(),
            already_done: false,
        };

        if options.dry_run {
            tracing::info!(
                path = %xml_path,
                project = %doc.project,
                chunks = drafts.len(),
                "dry run, nothing written"
            );
            return Ok(report);
        }

        let lease = self.locks.acquire(&doc.project).await?;

        if options.full {
            self.progress.reset(&xml_path).await?;
        }

        let next_chunk = match self.progress.claim(&xml_path, &doc.source_hash).await {
            Ok(ClaimOutcome::AlreadyDone) => {
                self.release_lease(&lease).await;
                report.already_done = true;
                tracing::info!(path = %xml_path, "source unchanged, already ingested");
                return Ok(report);
            }
            Ok(ClaimOutcome::Start { next_chunk }) => next_chunk,
            Err(e) => {
                self.release_lease(&lease).await;
                return Err(e);
            }
        };

        let result = async {
            let touched = self
                .run_pass(&drafts, &xml_path, next_chunk, &mut report)
                .await?;
            self.finish(&doc, &xml_path, &touched, &mut report).await
        }
        .await;

        match result {
            Ok(()) => {
                self.release_lease(&lease).await;
                tracing::info!(
                    path = %xml_path,
                    project = %doc.project,
                    version = %doc.policy_version,
                    processed = report.chunks_processed,
                    resumed_past = report.chunks_resumed_past,
                    activated = report.identities_activated,
                    "ingestion complete"
                );
                Ok(report)
            }
            Err(e) => {
                // The pointer already reflects the last durable chunk, so a
                // retry resumes where this pass stopped. Applies equally to
                // a failed cut-over: the chunks stay committed and the next
                // run re-attempts activation from the lock step.
                if let Err(mark_err) = self.progress.mark_failed(&xml_path, &e.to_string()).await {
                    tracing::error!(path = %xml_path, error = %mark_err, "failed to record failure");
                }
                self.release_lease(&lease).await;
                Err(e)
            }
        }
    }

    /// Sweep a directory tree for `.xml` documents, in path order. A file
    /// that fails is recorded and the sweep continues.
    pub async fn ingest_dir(&self, root: &Path, options: IngestOptions) -> Result<SweepOutcome> {
        let mut paths: Vec<_> = WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| {
                p.extension()
                    .map(|ext| ext.eq_ignore_ascii_case("xml"))
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();

        let mut outcome = SweepOutcome::default();
        for path in paths {
            match self.ingest_file(&path, options).await {
                Ok(report) => outcome.reports.push(report),
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "ingestion failed");
                    outcome.failures.push((path.to_string_lossy().to_string(), e));
                }
            }
        }
        Ok(outcome)
    }

    /// Returns the row for every chunk of the current document, whether
    /// committed by this pass or by the interrupted one being resumed. That
    /// set is what activation cuts over to; rows from earlier, longer
    /// renditions of the same version are deliberately left out.
    async fn run_pass(
        &self,
        drafts: &[ChunkDraft],
        xml_path: &str,
        next_chunk: i64,
        report: &mut IngestReport,
    ) -> Result<Vec<PolicyChunk>> {
        let mut touched = Vec::with_capacity(drafts.len());
        for draft in drafts {
            if draft.chunk_index < next_chunk {
                let row = self
                    .store
                    .latest_revision(&draft.identity_hash, &draft.policy_version, draft.chunk_index)
                    .await?
                    .ok_or_else(|| {
                        LedgerError::ConstraintViolation(format!(
                            "resume pointer is past chunk {} but no row exists for it",
                            draft.chunk_index
                        ))
                    })?;
                touched.push(row);
                report.chunks_resumed_past += 1;
                continue;
            }

            let outcome = self.store.upsert_chunk(draft).await?;
            let mut row = outcome.row().clone();

            if row.vector_id.is_none() {
                let vector_id = self.bind_chunk_vector(&row).await?;
                row.vector_id = Some(vector_id);
                report.vectors_bound += 1;
            }

            self.progress.advance(xml_path, draft.chunk_index).await?;
            report.chunks_processed += 1;
            touched.push(row);
        }
        Ok(touched)
    }

    /// Push one chunk into the vector index and make the binding durable.
    /// The id is generated here, so a crash between index write and bind
    /// leaves an orphan object in the index, never a dangling reference in
    /// the ledger.
    async fn bind_chunk_vector(&self, row: &PolicyChunk) -> Result<String> {
        let vector_id = uuid::Uuid::new_v4().to_string();
        let attributes = VectorAttributes {
            project: row.project.clone(),
            policy_version: row.policy_version.clone(),
            mpu_name: row.mpu_name.clone(),
            profile: row.profile.clone(),
            rg_index: row.rg_index,
            chunk_index: row.chunk_index,
            chunk_text: row.chunk_text.clone(),
        };

        let mut last_reason = String::new();
        for attempt in 1..=self.max_retries {
            match self.index.upsert(&vector_id, &attributes).await {
                Ok(()) => {
                    self.store.bind_vector(&row.chunk_id, &vector_id).await?;
                    return Ok(vector_id);
                }
                Err(e) => {
                    last_reason = e.to_string();
                    tracing::warn!(
                        chunk = row.chunk_index,
                        attempt,
                        error = %last_reason,
                        "vector upsert failed"
                    );
                    if attempt < self.max_retries {
                        let backoff = self.retry_base_ms * (1u64 << (attempt - 1));
                        tokio::time::sleep(Duration::from_millis(backoff)).await;
                    }
                }
            }
        }

        Err(LedgerError::VectorBindFailure {
            chunk_index: row.chunk_index,
            attempts: self.max_retries,
            reason: last_reason,
        })
    }

    /// Post-pass bookkeeping: cut each touched identity over to exactly the
    /// rows this pass committed, raise propagation flags, and only then mark
    /// the document DONE. DONE is last so an interrupted finish stays
    /// retryable.
    async fn finish(
        &self,
        doc: &PolicyDocument,
        xml_path: &str,
        touched: &[PolicyChunk],
        report: &mut IngestReport,
    ) -> Result<()> {
        let mut by_identity: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        for row in touched {
            by_identity
                .entry(row.identity_hash.as_str())
                .or_default()
                .push(row.chunk_id.clone());
        }

        for (identity_hash, ids) in &by_identity {
            self.activator.activate(identity_hash, ids).await?;
            report.identities_activated += 1;
        }

        // This project just landed fresh data: its parents' pending flags
        // (if any) are satisfied, and its own children now lag behind.
        self.resolver.acknowledge(&doc.project).await?;
        report.children_notified = self.resolver.schedule(&doc.project).await?;

        self.progress.mark_done(xml_path).await?;
        Ok(())
    }

    /// A failed release leaves the lease to expire on its own. Propagating
    /// the error here would mask whatever the pass itself produced, so it
    /// is logged and swallowed.
    async fn release_lease(&self, lease: &Lease) {
        if let Err(e) = self.locks.release(lease).await {
            tracing::error!(
                project = %lease.project,
                error = %e,
                "failed to release ingestion lock"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::InMemoryLockService;
    use crate::vector::InMemoryVectorIndex;
    use crate::{db, migrate};
    use std::io::Write;

    const SAMPLE_XML: &str = r#"
<Policy project="AMBOSELI" version="v1.0">
  <MPU name="MPU0">
    <PRTn index="3" profile="TZ" start="0x1000" end="0x1FFF">
      <SecurityRationale>Secure world firmware text region.</SecurityRationale>
    </PRTn>
    <PRTn index="4" profile="NS" start="0x2000" end="0x2FFF"/>
  </MPU>
</Policy>
"#;

    struct Fixture {
        _dir: tempfile::TempDir,
        ingestor: Ingestor,
        index: Arc<InMemoryVectorIndex>,
        xml: std::path::PathBuf,
    }

    async fn fixture(xml_body: &str) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let pool = db::connect_path(&dir.path().join("pol.sqlite")).await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();

        let xml = dir.path().join("policy.xml");
        let mut f = std::fs::File::create(&xml).unwrap();
        f.write_all(xml_body.as_bytes()).unwrap();

        let config = Config {
            db: crate::config::DbConfig {
                path: dir.path().join("pol.sqlite"),
            },
            chunking: Default::default(),
            lock: Default::default(),
            vector: Default::default(),
        };
        let index = Arc::new(InMemoryVectorIndex::new());
        let locks = Arc::new(InMemoryLockService::new(Duration::from_secs(900)));
        let ingestor = Ingestor::new(pool, &config, locks, index.clone());

        Fixture {
            _dir: dir,
            ingestor,
            index,
            xml,
        }
    }

    #[tokio::test]
    async fn happy_path_ingests_binds_and_activates() {
        let fx = fixture(SAMPLE_XML).await;
        let report = fx
            .ingestor
            .ingest_file(&fx.xml, IngestOptions::default())
            .await
            .unwrap();

        assert_eq!(report.chunks_total, 2);
        assert_eq!(report.chunks_processed, 2);
        assert_eq!(report.vectors_bound, 2);
        assert_eq!(report.identities_activated, 2);
        assert_eq!(fx.index.len(), 2);

        // Every row is active and bound.
        let rows = fx.ingestor.store().count_rows().await.unwrap();
        assert_eq!(rows, 2);
    }

    #[tokio::test]
    async fn dry_run_writes_nothing() {
        let fx = fixture(SAMPLE_XML).await;
        let report = fx
            .ingestor
            .ingest_file(
                &fx.xml,
                IngestOptions {
                    dry_run: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(report.chunks_total, 2);
        assert_eq!(report.chunks_processed, 0);
        assert_eq!(fx.ingestor.store().count_rows().await.unwrap(), 0);
        assert!(fx.index.is_empty());
        assert!(fx.ingestor.progress().all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn second_pass_is_already_done() {
        let fx = fixture(SAMPLE_XML).await;
        fx.ingestor
            .ingest_file(&fx.xml, IngestOptions::default())
            .await
            .unwrap();

        let report = fx
            .ingestor
            .ingest_file(&fx.xml, IngestOptions::default())
            .await
            .unwrap();
        assert!(report.already_done);
        assert_eq!(report.chunks_processed, 0);
        assert_eq!(fx.ingestor.store().count_rows().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn full_pass_reprocesses_without_duplicating() {
        let fx = fixture(SAMPLE_XML).await;
        fx.ingestor
            .ingest_file(&fx.xml, IngestOptions::default())
            .await
            .unwrap();

        let report = fx
            .ingestor
            .ingest_file(
                &fx.xml,
                IngestOptions {
                    full: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(!report.already_done);
        assert_eq!(report.chunks_processed, 2);
        // Identical content: rows are recognized, not duplicated, and keep
        // their original vector bindings.
        assert_eq!(report.vectors_bound, 0);
        assert_eq!(fx.ingestor.store().count_rows().await.unwrap(), 2);
    }
}
