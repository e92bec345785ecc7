//! Remote document store adapter
//!
//! The sync engine only needs a narrow contract from the remote side: put a
//! document by id (full overwrite or merge), delete by id, and fetch a whole
//! collection for pull-refresh. Any document store satisfying that contract
//! works; [`HttpBackend`] implements it over a JSON HTTP API.

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

use crate::error::StoreError;
use crate::records::Collection;

/// A document fetched from the remote store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteDocument {
    pub id: String,
    pub fields: Map<String, Value>,
}

/// Remote document store contract consumed by the sync engine.
///
/// All operations must be idempotent by id: replaying a drain from the start
/// after a partial failure repeats already-applied calls.
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// Write a document. `merge = false` overwrites the whole document,
    /// `merge = true` only touches the given fields.
    async fn put(
        &self,
        collection: Collection,
        id: &str,
        fields: &Map<String, Value>,
        merge: bool,
    ) -> Result<(), StoreError>;

    /// Delete a document by id. Deleting an absent document is a success.
    async fn delete(&self, collection: Collection, id: &str) -> Result<(), StoreError>;

    /// Fetch every document in a collection
    async fn fetch_all(&self, collection: Collection) -> Result<Vec<RemoteDocument>, StoreError>;
}

/// Configuration for the HTTP backend
#[derive(Debug, Clone)]
pub struct HttpBackendConfig {
    /// Base URL, e.g. `http://localhost:8090`
    pub base_url: String,
    /// Optional bearer token
    pub api_key: Option<String>,
    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for HttpBackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8090".to_string(),
            api_key: None,
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    documents: Vec<RemoteDocument>,
}

/// HTTP client for a remote document store
pub struct HttpBackend {
    config: HttpBackendConfig,
    client: Client,
}

impl HttpBackend {
    /// Create a new backend client
    pub fn new(config: HttpBackendConfig) -> Result<Self, StoreError> {
        let mut headers = header::HeaderMap::new();
        if let Some(ref api_key) = config.api_key {
            let value = header::HeaderValue::from_str(&format!("Bearer {api_key}"))
                .map_err(|e| StoreError::Config(format!("invalid api key: {e}")))?;
            headers.insert(header::AUTHORIZATION, value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(|e| StoreError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    fn doc_url(&self, collection: Collection, id: &str) -> String {
        format!(
            "{}/store/v1/{}/{}",
            self.config.base_url, collection, id
        )
    }

    async fn check(&self, response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response.text().await.unwrap_or_default();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            Err(StoreError::BackendUnavailable(format!(
                "{status}: {message}"
            )))
        } else {
            Err(StoreError::Rejected {
                status: status.as_u16(),
                message,
            })
        }
    }
}

#[async_trait]
impl RemoteBackend for HttpBackend {
    async fn put(
        &self,
        collection: Collection,
        id: &str,
        fields: &Map<String, Value>,
        merge: bool,
    ) -> Result<(), StoreError> {
        let response = self
            .client
            .put(self.doc_url(collection, id))
            .query(&[("merge", merge)])
            .json(fields)
            .send()
            .await?;

        self.check(response).await?;
        Ok(())
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<(), StoreError> {
        let response = self
            .client
            .delete(self.doc_url(collection, id))
            .send()
            .await?;

        // Already gone counts as deleted
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }

        self.check(response).await?;
        Ok(())
    }

    async fn fetch_all(&self, collection: Collection) -> Result<Vec<RemoteDocument>, StoreError> {
        let url = format!("{}/store/v1/{}", self.config.base_url, collection);
        let response = self.client.get(&url).send().await?;
        let response = self.check(response).await?;

        let list: ListResponse = response.json().await?;
        Ok(list.documents)
    }
}
