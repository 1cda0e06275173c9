//! HTTP gateways and publishers.

use super::{Gateway, Publisher};
use crate::config::{PublisherConfig, CID_PLACEHOLDER};
use crate::error::AttemptError;
use crate::types::ContentId;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;

/// Read-only gateway addressed by a `{cid}` URL template.
pub struct HttpGateway {
    template: String,
    client: reqwest::Client,
}

impl HttpGateway {
    pub fn new(template: impl Into<String>) -> Self {
        Self::with_client(template, reqwest::Client::new())
    }

    pub fn with_client(template: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            template: template.into(),
            client,
        }
    }

    pub fn url_for(&self, content_id: &ContentId) -> String {
        self.template.replace(CID_PLACEHOLDER, content_id.as_str())
    }
}

#[async_trait]
impl Gateway for HttpGateway {
    fn name(&self) -> &str {
        &self.template
    }

    async fn fetch(&self, content_id: &ContentId) -> Result<Vec<u8>, AttemptError> {
        let response = self.client.get(self.url_for(content_id)).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AttemptError::Status(status.as_u16()));
        }

        Ok(response.bytes().await?.to_vec())
    }
}

/// Pinning service that accepts a JSON blob and answers with its identifier.
pub struct HttpPublisher {
    config: PublisherConfig,
    client: reqwest::Client,
}

impl HttpPublisher {
    pub fn new(config: PublisherConfig) -> Self {
        Self::with_client(config, reqwest::Client::new())
    }

    pub fn with_client(config: PublisherConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }
}

#[async_trait]
impl Publisher for HttpPublisher {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn publish(&self, blob: &[u8]) -> Result<ContentId, AttemptError> {
        let mut request = self
            .client
            .post(&self.config.url)
            .header(CONTENT_TYPE, "application/json")
            .body(blob.to_vec());

        if let Some(token) = &self.config.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AttemptError::Status(status.as_u16()));
        }

        let body: Value = response.json().await?;
        extract_id(&body, &self.config.id_pointer)
    }
}

fn extract_id(body: &Value, pointer: &str) -> Result<ContentId, AttemptError> {
    body.pointer(pointer)
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(ContentId::new)
        .ok_or_else(|| AttemptError::Malformed(format!("no identifier at {}", pointer)))
}
