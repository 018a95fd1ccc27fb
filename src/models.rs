//! Core data models for the policy ledger.
//!
//! These types mirror the relational schema: chunk rows, ingestion progress,
//! lock leases, and hierarchy edges. Timestamps are unix seconds (UTC).

use crate::identity;

/// Version-independent identity of a logical policy: one protection region
/// of one MPU in one project, under one security profile.
///
/// `profile` is always stored normalized: empty or absent profiles become
/// the sentinel `"TZ"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PolicyIdentity {
    pub project: String,
    pub mpu_name: String,
    pub rg_index: i64,
    pub profile: String,
}

impl PolicyIdentity {
    pub fn new(project: &str, mpu_name: &str, rg_index: i64, profile: Option<&str>) -> Self {
        Self {
            project: project.to_string(),
            mpu_name: mpu_name.to_string(),
            rg_index,
            profile: identity::normalize_profile(profile),
        }
    }
}

/// Address range of a protection region. The hex strings are the audit
/// record and are never reduced to integers in storage; the decimal mirrors
/// are derived conveniences for range queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressRange {
    pub start_hex: String,
    pub end_hex: String,
    pub start_dec: i64,
    pub end_dec: i64,
}

/// A chunk ready for upsert: identity, content, and both hashes computed,
/// but no row id or vector binding yet.
#[derive(Debug, Clone)]
pub struct ChunkDraft {
    pub identity: PolicyIdentity,
    pub policy_version: String,
    pub range: AddressRange,
    /// 0-based ordinal within the source document.
    pub chunk_index: i64,
    /// Whitespace-normalized chunk text.
    pub chunk_text: String,
    pub identity_hash: String,
    pub content_hash: String,
    pub xml_path: String,
}

/// One persisted row of the `policy_chunks` table.
#[derive(Debug, Clone)]
pub struct PolicyChunk {
    pub chunk_id: String,
    pub project: String,
    pub policy_version: String,
    pub mpu_name: String,
    pub rg_index: i64,
    pub profile: String,
    pub start_hex: String,
    pub end_hex: String,
    pub start_dec: i64,
    pub end_dec: i64,
    pub chunk_index: i64,
    pub chunk_text: String,
    pub identity_hash: String,
    pub content_hash: String,
    /// Bumped when content drifts under an unchanged declared version.
    pub revision: i64,
    /// Row id of the row this one replaced, if any.
    pub supersedes: Option<String>,
    /// External vector-store key; immutable once set.
    pub vector_id: Option<String>,
    pub is_active: bool,
    pub is_propagated: bool,
    pub xml_path: String,
    pub created_at: i64,
}

/// Ingestion status of one source document path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestionStatus {
    Pending,
    InProgress,
    Done,
    Failed,
}

impl IngestionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestionStatus::Pending => "PENDING",
            IngestionStatus::InProgress => "IN_PROGRESS",
            IngestionStatus::Done => "DONE",
            IngestionStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(IngestionStatus::Pending),
            "IN_PROGRESS" => Some(IngestionStatus::InProgress),
            "DONE" => Some(IngestionStatus::Done),
            "FAILED" => Some(IngestionStatus::Failed),
            _ => None,
        }
    }
}

/// One row of the `ingestion_progress` table.
#[derive(Debug, Clone)]
pub struct ProgressRow {
    pub xml_path: String,
    pub status: IngestionStatus,
    /// Highest chunk index fully committed, including vector binding.
    /// -1 means no chunk has committed yet.
    pub last_chunk_index: i64,
    /// Fingerprint of the normalized source document for the current pass.
    pub source_hash: String,
    pub error: Option<String>,
    pub updated_at: i64,
}

/// One row of the `ingestion_locks` table: an exclusive per-project lease.
#[derive(Debug, Clone)]
pub struct LockRow {
    pub project: String,
    pub owner: String,
    pub locked_at: i64,
}

/// One edge of the project hierarchy forest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HierarchyEdge {
    pub parent_project: String,
    pub child_project: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips() {
        for s in [
            IngestionStatus::Pending,
            IngestionStatus::InProgress,
            IngestionStatus::Done,
            IngestionStatus::Failed,
        ] {
            assert_eq!(IngestionStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(IngestionStatus::parse("BOGUS"), None);
    }

    #[test]
    fn identity_normalizes_profile() {
        let id = PolicyIdentity::new("AMBOSELI", "MPU0", 3, None);
        assert_eq!(id.profile, "TZ");
        let id = PolicyIdentity::new("AMBOSELI", "MPU0", 3, Some("  "));
        assert_eq!(id.profile, "TZ");
        let id = PolicyIdentity::new("AMBOSELI", "MPU0", 3, Some("NSP"));
        assert_eq!(id.profile, "NSP");
    }
}
