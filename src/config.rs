use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub lock: LockConfig,
    #[serde(default)]
    pub vector: VectorConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Word budget per chunk of region text.
    #[serde(default = "default_max_words")]
    pub max_words: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_words: default_max_words(),
        }
    }
}

fn default_max_words() -> usize {
    512
}

#[derive(Debug, Deserialize, Clone)]
pub struct LockConfig {
    /// Age in seconds after which an ingestion lock is considered abandoned
    /// and reclaimable.
    #[serde(default = "default_lock_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_lock_ttl_secs(),
        }
    }
}

fn default_lock_ttl_secs() -> u64 {
    900
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorConfig {
    /// `http` for a live vector index, `memory` for a process-local stand-in
    /// (development and tests).
    #[serde(default = "default_vector_provider")]
    pub provider: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            provider: default_vector_provider(),
            url: None,
            collection: default_collection(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_base_ms: default_retry_base_ms(),
        }
    }
}

fn default_vector_provider() -> String {
    "memory".to_string()
}
fn default_collection() -> String {
    "AccessControlPolicy".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_base_ms() -> u64 {
    500
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.chunking.max_words == 0 {
        anyhow::bail!("chunking.max_words must be > 0");
    }

    if config.lock.ttl_secs == 0 {
        anyhow::bail!("lock.ttl_secs must be > 0");
    }

    if config.vector.max_retries == 0 {
        anyhow::bail!("vector.max_retries must be >= 1");
    }

    match config.vector.provider.as_str() {
        "memory" => {}
        "http" => {
            if config.vector.url.is_none() {
                anyhow::bail!("vector.url must be set when provider is 'http'");
            }
        }
        other => anyhow::bail!(
            "Unknown vector provider: '{}'. Must be http or memory.",
            other
        ),
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pol.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        (dir, path)
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let (_dir, path) = write_config("[db]\npath = \"./data/pol.sqlite\"\n");
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.chunking.max_words, 512);
        assert_eq!(cfg.lock.ttl_secs, 900);
        assert_eq!(cfg.vector.provider, "memory");
        assert_eq!(cfg.vector.collection, "AccessControlPolicy");
    }

    #[test]
    fn http_provider_requires_url() {
        let (_dir, path) = write_config(
            "[db]\npath = \"./pol.sqlite\"\n\n[vector]\nprovider = \"http\"\n",
        );
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn unknown_provider_rejected() {
        let (_dir, path) = write_config(
            "[db]\npath = \"./pol.sqlite\"\n\n[vector]\nprovider = \"weaviate9000\"\n",
        );
        assert!(load_config(&path).is_err());
    }
}
