//! HTTP `RowStore` backend.
//!
//! Thin client for the row-store service. Every operation is a JSON POST;
//! read responses are decoded defensively through `RowSet` so a malformed
//! payload degrades to an empty result instead of failing the caller.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};

use super::rows::RowSet;
use super::traits::{Embedding, References, RowStore};
use crate::error::StorageError;

/// Row-store connection settings.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub base_url: String,
    pub token: Option<SecretString>,
}

impl StoreConfig {
    /// Build config from environment variables.
    /// Returns `None` if `TASKWEAVE_STORE_URL` is not set.
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("TASKWEAVE_STORE_URL").ok()?;
        let token = std::env::var("TASKWEAVE_STORE_TOKEN")
            .ok()
            .map(SecretString::from);
        Some(Self { base_url, token })
    }
}

/// HTTP client for the external row store.
pub struct HttpRowStore {
    config: StoreConfig,
    http: reqwest::Client,
}

impl HttpRowStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, StorageError> {
        let url = format!("{}/{}", self.config.base_url.trim_end_matches('/'), path);
        let mut request = self.http.post(&url).json(&body);
        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request
            .send()
            .await
            .map_err(|e| StorageError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(StorageError::Query {
                table: path.to_string(),
                reason: format!("store returned {status}"),
            });
        }

        response
            .json()
            .await
            .map_err(|e| StorageError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl RowStore for HttpRowStore {
    async fn insert(
        &self,
        table: &str,
        fields: &[&str],
        rows: Vec<Vec<Value>>,
    ) -> Result<(), StorageError> {
        self.post(
            "api/insert",
            json!({ "table": table, "fields": fields, "values": rows }),
        )
        .await
        .map(|_| ())
    }

    async fn update(
        &self,
        table: &str,
        fields: &[&str],
        rows: Vec<Vec<Value>>,
    ) -> Result<(), StorageError> {
        self.post(
            "api/update",
            json!({ "table": table, "fields": fields, "values": rows }),
        )
        .await
        .map(|_| ())
    }

    async fn upsert(
        &self,
        table: &str,
        fields: &[&str],
        rows: Vec<Vec<Value>>,
        embedding: Option<Embedding>,
        references: References,
    ) -> Result<(), StorageError> {
        let mut body = json!({ "table": table, "fields": fields, "values": rows });
        if let Some(embedding) = embedding {
            body["text"] = json!(embedding.text);
            body["embeddings"] = json!(embedding.vector);
        }
        if !references.is_empty() {
            body["references"] = json!(references);
        }
        self.post("api/upsert", body).await.map(|_| ())
    }

    async fn lookup(
        &self,
        table: &str,
        fields: &[&str],
        condition: Option<&str>,
    ) -> Result<RowSet, StorageError> {
        let mut body = json!({ "table": table, "fields": fields });
        if let Some(condition) = condition {
            body["condition"] = json!(condition);
        }
        let payload = self.post("api/lookup", body).await?;
        Ok(RowSet::decode(&payload))
    }

    async fn recursive_traversal(
        &self,
        relation: &str,
        source_field: &str,
        target_field: &str,
        start_condition: &str,
    ) -> Result<RowSet, StorageError> {
        let payload = self
            .post(
                "api/relation/recursive",
                json!({
                    "relation": relation,
                    "source_field": source_field,
                    "target_field": target_field,
                    "starting_condition": start_condition,
                }),
            )
            .await?;
        Ok(RowSet::decode(&payload))
    }

    async fn similarity_search(
        &self,
        query: &[f32],
        k: usize,
    ) -> Result<RowSet, StorageError> {
        let payload = self
            .post(
                "api/vector/search",
                json!({ "query": query, "limit": k }),
            )
            .await?;
        Ok(RowSet::decode(&payload))
    }
}
