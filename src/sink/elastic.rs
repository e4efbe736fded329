//! HTTP sink for an Elasticsearch-style backend.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::config::ElasticConfig;

use super::SinkError;
use super::IndexSink;

/// Sink writing documents over the backend's HTTP API.
///
/// Upserts use the update endpoint with `doc_as_upsert`, so fragments
/// merge into the stored document rather than replacing it. The
/// underlying connection pool is process-wide; clone the sink freely.
#[derive(Clone)]
pub struct EsSink {
    endpoint: String,
    credentials: Option<(String, String)>,
    client: reqwest::Client,
}

impl EsSink {
    /// Build a sink from backend configuration.
    ///
    /// The only timeout applied to mutations is the client's request
    /// timeout configured here.
    pub fn new(config: &ElasticConfig) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            endpoint: config.endpoint(),
            credentials: config.credentials(),
            client,
        })
    }

    fn url(&self, index: &str, doc_type: &str, id: &str, action: Option<&str>) -> String {
        let mut url = format!("{}/{index}/{doc_type}/{id}", self.endpoint);
        if let Some(action) = action {
            url.push('/');
            url.push_str(action);
        }
        url
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.credentials {
            Some((user, pass)) => request.basic_auth(user, Some(pass)),
            None => request,
        }
    }

    async fn check(name: String, response: reqwest::Response) -> Result<(), SinkError> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(SinkError::NotFound { name });
        }
        let body = response.text().await.unwrap_or_default();
        Err(SinkError::Backend {
            name,
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl IndexSink for EsSink {
    async fn upsert(
        &self,
        index: &str,
        doc_type: &str,
        id: &str,
        fragment: Value,
    ) -> Result<(), SinkError> {
        let name = format!("{index}/{doc_type}/{id}");
        let request = self
            .authorized(self.client.post(self.url(index, doc_type, id, Some("_update"))))
            .json(&json!({ "doc": fragment, "doc_as_upsert": true }));
        Self::check(name, request.send().await?).await
    }

    async fn delete(&self, index: &str, doc_type: &str, id: &str) -> Result<(), SinkError> {
        let name = format!("{index}/{doc_type}/{id}");
        let request = self.authorized(self.client.delete(self.url(index, doc_type, id, None)));
        Self::check(name, request.send().await?).await
    }
}
