//! Identity and content hashing.
//!
//! Two digests drive the whole ledger: the identity hash recognizes "the
//! same logical policy across versions", the content hash recognizes "the
//! same bytes". Both are SHA-256, computed over normalized inputs so a
//! re-exported source file with cosmetic whitespace differences is
//! recognized as unchanged.

use sha2::{Digest, Sha256};

use crate::models::PolicyIdentity;

/// Sentinel profile used when the source omits one.
pub const PROFILE_SENTINEL: &str = "TZ";

/// Normalize a profile attribute: empty or absent becomes the sentinel.
pub fn normalize_profile(profile: Option<&str>) -> String {
    match profile {
        Some(p) if !p.trim().is_empty() => p.trim().to_string(),
        _ => PROFILE_SENTINEL.to_string(),
    }
}

/// Normalize text before hashing or storage: unify line endings, strip
/// trailing whitespace per line, collapse runs of blank lines, trim the
/// whole. Deterministic and idempotent.
pub fn normalize_text(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    let mut out = String::with_capacity(unified.len());
    let mut blank_run = false;
    for line in unified.split('\n') {
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            blank_run = true;
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
            if blank_run {
                out.push('\n');
            }
        }
        blank_run = false;
        out.push_str(trimmed);
    }
    out
}

/// Deterministic digest over the version-independent identity fields.
///
/// The key layout is `project|mpu_name|rg_index|profile`; the policy
/// version, chunk index, and content never contribute, so every version of
/// the same region maps to the same hash.
pub fn identity_hash(identity: &PolicyIdentity) -> String {
    let key = format!(
        "{}|{}|{}|{}",
        identity.project, identity.mpu_name, identity.rg_index, identity.profile
    );
    sha256_hex(key.as_bytes())
}

/// Deterministic digest over normalized chunk text.
pub fn content_hash(text: &str) -> String {
    sha256_hex(normalize_text(text).as_bytes())
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
