//! # Policy Ledger
//!
//! A versioned, crash-safe ingestion ledger for memory-protection policy
//! documents.
//!
//! Policy Ledger parses MPU access-control policy XML, chunks each
//! protection region into content-addressed rows in SQLite, binds every row
//! to an object in an external vector index, and cuts retrieval over to a
//! new policy version atomically. Ingestion is resumable: progress is
//! checkpointed per chunk, so an interrupted run picks up where it stopped
//! instead of starting over.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌───────────────┐   ┌───────────┐
//! │ Policy XML │──▶│ Parse + Chunk │──▶│  SQLite    │
//! │  (MPU/PRT) │   │  + Identity   │   │  ledger    │
//! └────────────┘   └───────────────┘   └─────┬─────┘
//!                                            │
//!                        ┌───────────────────┤
//!                        ▼                   ▼
//!                  ┌───────────┐       ┌───────────┐
//!                  │  Vector   │       │    CLI    │
//!                  │  index    │       │   (pol)   │
//!                  └───────────┘       └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! pol init                          # create database
//! pol ingest ./policies/board_v2.xml
//! pol ingest ./policies --full      # sweep a directory, ignore checkpoints
//! pol status                        # per-document progress
//! pol hierarchy add AMBOSELI SERENGETI
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Crate error type |
//! | [`identity`] | Identity and content hashing |
//! | [`parser`] | Policy XML parsing |
//! | [`chunk`] | Region-text chunking |
//! | [`store`] | Chunk ledger (upserts, vector binding) |
//! | [`progress`] | Resumable ingestion checkpoints |
//! | [`lock`] | Per-project ingestion leases |
//! | [`activate`] | Atomic version cut-over |
//! | [`hierarchy`] | Project propagation forest |
//! | [`vector`] | Vector index client |
//! | [`ingest`] | Ingestion driver |
//! | [`admin`] | Maintenance operations |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod activate;
pub mod admin;
pub mod chunk;
pub mod config;
pub mod db;
pub mod error;
pub mod hierarchy;
pub mod identity;
pub mod ingest;
pub mod lock;
pub mod migrate;
pub mod models;
pub mod parser;
pub mod progress;
pub mod store;
pub mod vector;
