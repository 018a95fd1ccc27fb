//! # Policy Ledger CLI (`pol`)
//!
//! The `pol` binary drives the ingestion ledger: database initialization,
//! document ingestion, progress inspection, hierarchy management, lock
//! administration, and environment resets.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `pol init` | Create the SQLite database and run schema migrations |
//! | `pol ingest <path>` | Ingest a policy XML file or sweep a directory |
//! | `pol status` | Show per-document ingestion progress |
//! | `pol hierarchy add <parent> <child>` | Register a propagation edge |
//! | `pol hierarchy list` | Print the propagation forest |
//! | `pol locks` | Show held ingestion locks |
//! | `pol locks --release <project>` | Force-release a project's lock |
//! | `pol reset --confirm` | Wipe ingested state (hierarchy survives) |

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use policy_ledger::config::{self, Config};
use policy_ledger::hierarchy::ProjectHierarchy;
use policy_ledger::ingest::{IngestOptions, IngestReport, Ingestor};
use policy_ledger::lock::{LockService, SqliteLockService};
use policy_ledger::progress::ProgressTracker;
use policy_ledger::vector::{HttpVectorIndex, InMemoryVectorIndex, VectorIndex};
use policy_ledger::{admin, db, migrate};

/// Policy Ledger CLI — versioned, crash-safe ingestion of MPU access-control
/// policy documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file.
#[derive(Parser)]
#[command(
    name = "pol",
    about = "Policy Ledger — versioned, resumable ingestion of MPU access-control policy documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/pol.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. Idempotent.
    Init,

    /// Ingest a policy XML document, or sweep a directory of them.
    ///
    /// A previously interrupted document resumes from its checkpoint; an
    /// unchanged DONE document is skipped.
    Ingest {
        /// Path to a `.xml` file or a directory to sweep.
        path: PathBuf,

        /// Ignore checkpoints — reprocess from chunk 0.
        #[arg(long)]
        full: bool,

        /// Parse and chunk only; show counts without writing anything.
        #[arg(long)]
        dry_run: bool,
    },

    /// Show per-document ingestion progress.
    Status,

    /// Manage the project propagation hierarchy.
    Hierarchy {
        #[command(subcommand)]
        action: HierarchyAction,
    },

    /// Show held ingestion locks, optionally force-releasing one.
    Locks {
        /// Force-release the lock for this project.
        #[arg(long)]
        release: Option<String>,
    },

    /// Wipe ingested state: chunk rows, progress, locks, and the vector
    /// collection. The hierarchy survives unless --drop-schema is given.
    Reset {
        /// Required; refuses to run without it.
        #[arg(long)]
        confirm: bool,

        /// Drop the tables entirely instead of emptying them.
        #[arg(long)]
        drop_schema: bool,
    },
}

#[derive(Subcommand)]
enum HierarchyAction {
    /// Register a parent -> child propagation edge.
    ///
    /// Rejected if the edge would create a cycle.
    Add {
        parent: String,
        child: String,
    },
    /// Print all registered edges.
    List,
}

fn build_vector_index(cfg: &Config) -> anyhow::Result<Arc<dyn VectorIndex>> {
    match cfg.vector.provider.as_str() {
        "http" => Ok(Arc::new(HttpVectorIndex::from_config(&cfg.vector)?)),
        _ => Ok(Arc::new(InMemoryVectorIndex::new())),
    }
}

fn print_report(report: &IngestReport) {
    if report.already_done {
        println!(
            "{}: unchanged, already ingested ({} chunks)",
            report.xml_path, report.chunks_total
        );
        return;
    }
    println!(
        "{}: project {} version {} — {} chunks ({} processed, {} resumed past, {} vectors bound, {} policies activated)",
        report.xml_path,
        report.project,
        report.policy_version,
        report.chunks_total,
        report.chunks_processed,
        report.chunks_resumed_past,
        report.vectors_bound,
        report.identities_activated,
    );
    if !report.children_notified.is_empty() {
        println!("  propagation pending for: {}", report.children_notified.join(", "));
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    let pool = db::connect(&cfg).await?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&pool).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            path,
            full,
            dry_run,
        } => {
            migrate::run_migrations(&pool).await?;
            let index = build_vector_index(&cfg)?;
            let locks: Arc<dyn LockService> = Arc::new(SqliteLockService::new(
                pool.clone(),
                Duration::from_secs(cfg.lock.ttl_secs),
            ));
            let ingestor = Ingestor::new(pool, &cfg, locks, index);
            let options = IngestOptions { full, dry_run };

            if path.is_dir() {
                let outcome = ingestor.ingest_dir(&path, options).await?;
                for report in &outcome.reports {
                    print_report(report);
                }
                for (failed_path, err) in &outcome.failures {
                    eprintln!("{}: FAILED — {}", failed_path, err);
                }
                println!(
                    "Swept {} documents, {} failed.",
                    outcome.reports.len() + outcome.failures.len(),
                    outcome.failures.len()
                );
                if !outcome.failures.is_empty() {
                    std::process::exit(1);
                }
            } else {
                let report = ingestor.ingest_file(&path, options).await?;
                print_report(&report);
            }
        }
        Commands::Status => {
            let tracker = ProgressTracker::new(pool);
            let rows = tracker.all().await?;
            if rows.is_empty() {
                println!("No documents tracked.");
            }
            for row in rows {
                let error = row
                    .error
                    .map(|e| format!(" — {}", e))
                    .unwrap_or_default();
                println!(
                    "{:<12} last_chunk={:<5} {}{}",
                    row.status.as_str(),
                    row.last_chunk_index,
                    row.xml_path,
                    error
                );
            }
        }
        Commands::Hierarchy { action } => {
            let hierarchy = ProjectHierarchy::new(pool);
            match action {
                HierarchyAction::Add { parent, child } => {
                    hierarchy.add_edge(&parent, &child).await?;
                    println!("Edge added: {} -> {}", parent, child);
                }
                HierarchyAction::List => {
                    let edges = hierarchy.edges().await?;
                    if edges.is_empty() {
                        println!("No hierarchy edges registered.");
                    }
                    for edge in edges {
                        println!("{} -> {}", edge.parent_project, edge.child_project);
                    }
                }
            }
        }
        Commands::Locks { release } => {
            let locks = SqliteLockService::new(pool, Duration::from_secs(cfg.lock.ttl_secs));
            if let Some(project) = release {
                if locks.force_release(&project).await? {
                    println!("Lock released for {}.", project);
                } else {
                    println!("No lock held for {}.", project);
                }
            } else {
                let held = locks.list().await?;
                if held.is_empty() {
                    println!("No locks held.");
                }
                for row in held {
                    println!(
                        "{:<20} owner={} locked_at={}",
                        row.project, row.owner, row.locked_at
                    );
                }
            }
        }
        Commands::Reset {
            confirm,
            drop_schema,
        } => {
            let index = build_vector_index(&cfg)?;
            admin::run_reset(
                &pool,
                index,
                &cfg.vector.collection,
                admin::ResetOptions {
                    confirmed: confirm,
                    drop_schema,
                },
            )
            .await?;
            println!("Reset complete.");
        }
    }

    Ok(())
}
