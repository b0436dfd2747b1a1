//! Off-chain token metadata publishing
//!
//! Runs once, sequentially, before the launch: upload the image, then the
//! metadata document that points at it. The returned URI goes into the
//! create instruction.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::MetadataConfig;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Upload to {url} failed with HTTP {status}: {body}")]
    Http { url: String, status: u16, body: String },

    #[error("Upload to {0} returned an empty URI")]
    EmptyUri(String),

    #[error("Could not read image {path}: {reason}")]
    Image { path: String, reason: String },

    #[error("Incomplete metadata: {0}")]
    Incomplete(&'static str),
}

impl MetadataError {
    pub fn is_retryable(&self) -> bool {
        match self {
            MetadataError::Transport(_) => true,
            MetadataError::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    pub fn category(&self) -> &'static str {
        match self {
            MetadataError::Transport(_) => "transport",
            MetadataError::Http { .. } => "http",
            MetadataError::EmptyUri(_) => "response",
            MetadataError::Image { .. } | MetadataError::Incomplete(_) => "input",
        }
    }
}

/// Metadata document as the storage service expects it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenMetadata {
    pub name: String,
    pub symbol: String,
    pub description: String,
    pub created_on: String,
    pub platform_id: String,
    /// URI of the uploaded image
    pub image: String,
}

impl TokenMetadata {
    pub fn from_config(config: &MetadataConfig, image: String) -> Result<Self, MetadataError> {
        if config.name.trim().is_empty() {
            return Err(MetadataError::Incomplete("metadata.name"));
        }
        if config.symbol.trim().is_empty() {
            return Err(MetadataError::Incomplete("metadata.symbol"));
        }
        Ok(Self {
            name: config.name.clone(),
            symbol: config.symbol.clone(),
            description: config.description.clone(),
            created_on: config.created_on.clone(),
            platform_id: config.platform_id.clone(),
            image,
        })
    }
}

#[async_trait]
pub trait MetadataPublisher: Send + Sync {
    /// Upload image bytes, returning their URI
    async fn upload_image(&self, file_name: &str, bytes: Vec<u8>) -> Result<String, MetadataError>;

    /// Upload the metadata document, returning its URI
    async fn upload_metadata(&self, metadata: &TokenMetadata) -> Result<String, MetadataError>;
}

/// Publisher for a storage service that answers uploads with a plain-text URI
#[derive(Debug, Clone)]
pub struct HttpMetadataPublisher {
    client: reqwest::Client,
    image_url: String,
    metadata_url: String,
}

impl HttpMetadataPublisher {
    pub fn new(image_url: impl Into<String>, metadata_url: impl Into<String>, timeout: Duration) -> Result<Self, MetadataError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MetadataError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            image_url: image_url.into(),
            metadata_url: metadata_url.into(),
        })
    }

    pub fn from_config(config: &MetadataConfig, timeout: Duration) -> Result<Self, MetadataError> {
        Self::new(&config.image_upload_url, &config.metadata_upload_url, timeout)
    }

    async fn read_uri(url: &str, response: reqwest::Response) -> Result<String, MetadataError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| MetadataError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(MetadataError::Http {
                url: url.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        let uri = body.trim();
        if uri.is_empty() {
            return Err(MetadataError::EmptyUri(url.to_string()));
        }
        Ok(uri.to_string())
    }
}

#[async_trait]
impl MetadataPublisher for HttpMetadataPublisher {
    async fn upload_image(&self, file_name: &str, bytes: Vec<u8>) -> Result<String, MetadataError> {
        let size = bytes.len();
        let form = Form::new().part("image", Part::bytes(bytes).file_name(file_name.to_string()));
        let response = self
            .client
            .post(&self.image_url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| MetadataError::Transport(e.to_string()))?;

        let uri = Self::read_uri(&self.image_url, response).await?;
        debug!(file = file_name, bytes = size, uri = %uri, "Image uploaded");
        Ok(uri)
    }

    async fn upload_metadata(&self, metadata: &TokenMetadata) -> Result<String, MetadataError> {
        let response = self
            .client
            .post(&self.metadata_url)
            .json(metadata)
            .send()
            .await
            .map_err(|e| MetadataError::Transport(e.to_string()))?;

        let uri = Self::read_uri(&self.metadata_url, response).await?;
        info!(name = %metadata.name, symbol = %metadata.symbol, uri = %uri, "📝 Metadata published");
        Ok(uri)
    }
}

/// Resolve the metadata URI for a run: a configured URI wins, otherwise the
/// image and document are uploaded in sequence.
pub async fn publish(publisher: &dyn MetadataPublisher, config: &MetadataConfig) -> Result<String, MetadataError> {
    if let Some(uri) = config.uri.as_deref().filter(|u| !u.trim().is_empty()) {
        debug!(uri = uri, "Using preconfigured metadata URI");
        return Ok(uri.to_string());
    }

    let path = config.image_path.as_deref().ok_or(MetadataError::Incomplete("metadata.image_path"))?;
    let bytes = tokio::fs::read(path).await.map_err(|e| MetadataError::Image {
        path: path.to_string(),
        reason: e.to_string(),
    })?;
    let file_name = Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("image.png");

    let image = publisher.upload_image(file_name, bytes).await?;
    let metadata = TokenMetadata::from_config(config, image)?;
    publisher.upload_metadata(&metadata).await
}
