//! Vector index client.
//!
//! The ledger only needs two things from the vector side: an upsert that
//! makes `vector_id` durable, and collection-level deletion for
//! environment resets. Embedding generation happens inside the index
//! service; the ledger ships text and attributes, never vectors.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;

use crate::config::VectorConfig;

/// Attributes stored alongside the embedding, used for filtered retrieval.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct VectorAttributes {
    pub project: String,
    pub policy_version: String,
    pub mpu_name: String,
    pub profile: String,
    pub rg_index: i64,
    pub chunk_index: i64,
    pub chunk_text: String,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Store (or overwrite) the object under `vector_id`. Must be
    /// idempotent: retrying with the same id and attributes is safe.
    async fn upsert(&self, vector_id: &str, attributes: &VectorAttributes) -> Result<()>;

    /// Delete every object in a collection. Used by the administrative
    /// reset only.
    async fn delete_collection(&self, collection: &str) -> Result<()>;
}

/// Weaviate-style HTTP client.
pub struct HttpVectorIndex {
    client: reqwest::Client,
    base_url: String,
    collection: String,
}

impl HttpVectorIndex {
    pub fn from_config(cfg: &VectorConfig) -> Result<Self> {
        let base_url = cfg
            .url
            .clone()
            .context("vector.url is required for the http provider")?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .context("failed to build vector index HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            collection: cfg.collection.clone(),
        })
    }
}

#[async_trait]
impl VectorIndex for HttpVectorIndex {
    async fn upsert(&self, vector_id: &str, attributes: &VectorAttributes) -> Result<()> {
        let payload = serde_json::json!({
            "class": self.collection,
            "id": vector_id,
            "properties": attributes,
        });

        let resp = self
            .client
            .post(format!("{}/v1/objects", self.base_url))
            .json(&payload)
            .send()
            .await
            .context("vector index upsert request failed")?;

        // 422 "already exists" is an idempotent retry hitting a committed
        // object; treat the id-addressed PUT fallback as the overwrite path.
        if resp.status() == reqwest::StatusCode::UNPROCESSABLE_ENTITY {
            let resp = self
                .client
                .put(format!("{}/v1/objects/{}/{}", self.base_url, self.collection, vector_id))
                .json(&payload)
                .send()
                .await
                .context("vector index overwrite request failed")?;
            resp.error_for_status()
                .context("vector index overwrite rejected")?;
            return Ok(());
        }

        resp.error_for_status().context("vector index upsert rejected")?;
        Ok(())
    }

    async fn delete_collection(&self, collection: &str) -> Result<()> {
        let resp = self
            .client
            .delete(format!("{}/v1/schema/{}", self.base_url, collection))
            .send()
            .await
            .context("vector index collection delete failed")?;
        resp.error_for_status()
            .context("vector index collection delete rejected")?;
        Ok(())
    }
}

/// Process-local index for development and tests, with a programmable
/// failure point to exercise crash-resume paths.
pub struct InMemoryVectorIndex {
    objects: Mutex<HashMap<String, VectorAttributes>>,
    /// Fail every upsert for this chunk index until cleared.
    fail_on_chunk: Mutex<Option<i64>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            fail_on_chunk: Mutex::new(None),
        }
    }

    pub fn fail_on_chunk(&self, chunk_index: Option<i64>) {
        *self.fail_on_chunk.lock().unwrap() = chunk_index;
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, vector_id: &str) -> Option<VectorAttributes> {
        self.objects.lock().unwrap().get(vector_id).cloned()
    }
}

impl Default for InMemoryVectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn upsert(&self, vector_id: &str, attributes: &VectorAttributes) -> Result<()> {
        if let Some(fail_idx) = *self.fail_on_chunk.lock().unwrap() {
            if attributes.chunk_index == fail_idx {
                anyhow::bail!("injected failure at chunk {}", fail_idx);
            }
        }
        self.objects
            .lock()
            .unwrap()
            .insert(vector_id.to_string(), attributes.clone());
        Ok(())
    }

    async fn delete_collection(&self, _collection: &str) -> Result<()> {
        self.objects.lock().unwrap().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn attrs(chunk_index: i64) -> VectorAttributes {
        VectorAttributes {
            project: "AMBOSELI".into(),
            policy_version: "v1.0".into(),
            mpu_name: "MPU0".into(),
            profile: "TZ".into(),
            rg_index: 3,
            chunk_index,
            chunk_text: "MPU: MPU0".into(),
        }
    }

    fn http_index(base_url: &str) -> HttpVectorIndex {
        let cfg = VectorConfig {
            provider: "http".into(),
            url: Some(base_url.to_string()),
            ..VectorConfig::default()
        };
        HttpVectorIndex::from_config(&cfg).unwrap()
    }

    #[tokio::test]
    async fn http_upsert_posts_object() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/v1/objects")
                .json_body_partial(r#"{"class": "AccessControlPolicy", "id": "vec-1"}"#);
            then.status(200);
        });

        let index = http_index(&server.base_url());
        index.upsert("vec-1", &attrs(0)).await.unwrap();
        mock.assert();
    }

    #[tokio::test]
    async fn http_upsert_surfaces_server_errors() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/v1/objects");
            then.status(500);
        });

        let index = http_index(&server.base_url());
        assert!(index.upsert("vec-1", &attrs(0)).await.is_err());
    }

    #[tokio::test]
    async fn http_delete_collection() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(DELETE).path("/v1/schema/AccessControlPolicy");
            then.status(200);
        });

        let index = http_index(&server.base_url());
        index.delete_collection("AccessControlPolicy").await.unwrap();
        mock.assert();
    }

    #[tokio::test]
    async fn in_memory_failure_injection() {
        let index = InMemoryVectorIndex::new();
        index.fail_on_chunk(Some(1));
        index.upsert("vec-0", &attrs(0)).await.unwrap();
        assert!(index.upsert("vec-1", &attrs(1)).await.is_err());
        index.fail_on_chunk(None);
        index.upsert("vec-1", &attrs(1)).await.unwrap();
        assert_eq!(index.len(), 2);
    }
}
