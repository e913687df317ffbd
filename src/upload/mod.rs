//! Upload module
//!
//! Per-object upload lifecycle: negotiate a storage URL with the server,
//! stream the payload there, classify the result.
//!
//! # Flow
//!
//! ```text
//! POST /packages/{uid}/objects/{sha256}  (signed, descriptor JSON)
//!   200 -> Exists, nothing to send
//!   201 -> {storage, url}
//!          PUT {url}  (unsigned, streamed payload)
//!            2xx -> Success
//! anything else -> Fail(cause)
//! ```
//!
//! Failures are returned as [`UploadOutcome::Fail`], never raised; the
//! orchestrator decides what a failed object means for the transaction.

use crate::config::{DEFAULT_CHUNK_SIZE, MIN_CHUNK_SIZE};
use crate::http::{HttpClient, HttpError, RequestOptions};
use crate::package::ObjectDescriptor;
use crate::progress::ProgressReporter;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;

pub mod stream;

pub use stream::file_chunks;

/// Upload errors
#[derive(Error, Debug)]
pub enum UploadError {
    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid upload response: {0}")]
    InvalidResponse(String),
}

/// Result of uploading one object
#[derive(Debug)]
pub enum UploadOutcome {
    /// Payload streamed to storage
    Success,
    /// Server already had the object
    Exists,
    Fail(UploadError),
}

impl UploadOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, UploadOutcome::Success | UploadOutcome::Exists)
    }
}

/// Upload destination returned by the server
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UploadTarget {
    pub storage: String,
    pub url: String,
}

/// Uploads a single object of a package
#[async_trait]
pub trait ObjectUploader: Send + Sync {
    async fn upload_object(&self, object: &ObjectDescriptor, package_uid: &str) -> UploadOutcome;
}

/// Object uploader talking to the UpdateHub API
pub struct HttpObjectUploader {
    client: HttpClient,
    server_url: String,
    progress: Arc<dyn ProgressReporter>,
    chunk_size: usize,
}

impl HttpObjectUploader {
    pub fn new(
        client: HttpClient,
        server_url: impl Into<String>,
        progress: Arc<dyn ProgressReporter>,
    ) -> Self {
        Self {
            client,
            server_url: server_url.into().trim_end_matches('/').to_string(),
            progress,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Set the streaming chunk size (floored at [`MIN_CHUNK_SIZE`])
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(MIN_CHUNK_SIZE);
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    fn object_url(&self, package_uid: &str, sha256sum: &str) -> String {
        format!(
            "{}/packages/{}/objects/{}",
            self.server_url, package_uid, sha256sum
        )
    }

    /// Ask the server where to put the object. `None` means it already exists.
    async fn negotiate(
        &self,
        object: &ObjectDescriptor,
        package_uid: &str,
    ) -> Result<Option<UploadTarget>, UploadError> {
        let url = self.object_url(package_uid, &object.sha256sum);
        let body = serde_json::to_vec(&object.metadata)
            .map_err(|e| UploadError::InvalidResponse(e.to_string()))?;
        let response = self.client.post(&url, RequestOptions::json(body)).await?;

        match response.status() {
            StatusCode::OK => Ok(None),
            StatusCode::CREATED => {
                let body = response.bytes().await.map_err(|e| {
                    UploadError::InvalidResponse(format!("unreadable body: {}", e))
                })?;
                let target: UploadTarget = serde_json::from_slice(&body)
                    .map_err(|e| UploadError::InvalidResponse(e.to_string()))?;
                Ok(Some(target))
            }
            status => Err(UploadError::InvalidResponse(format!(
                "unexpected status {}",
                status
            ))),
        }
    }

    async fn send_payload(
        &self,
        object: &ObjectDescriptor,
        target: &UploadTarget,
    ) -> Result<(), UploadError> {
        let file = tokio::fs::File::open(&object.path).await?;
        let size = file.metadata().await?.len();
        let chunks = file_chunks(file, self.chunk_size, self.progress.clone());
        self.client
            .put_stream(&target.url, reqwest::Body::wrap_stream(chunks), size)
            .await?;
        Ok(())
    }

    async fn try_upload(
        &self,
        object: &ObjectDescriptor,
        package_uid: &str,
    ) -> Result<UploadOutcome, UploadError> {
        let Some(target) = self.negotiate(object, package_uid).await? else {
            // Nothing is streamed, but the bytes count towards the package total
            self.progress.object_read(object.size);
            return Ok(UploadOutcome::Exists);
        };

        tracing::debug!(storage = %target.storage, "Upload URL negotiated");
        self.send_payload(object, &target).await?;
        Ok(UploadOutcome::Success)
    }
}

#[async_trait]
impl ObjectUploader for HttpObjectUploader {
    #[tracing::instrument(
        name = "upload.object",
        skip(self, object),
        fields(
            package.uid = %package_uid,
            object.filename = %object.filename,
            object.sha256 = %object.sha256sum,
            upload.bytes = object.size,
            upload.outcome = tracing::field::Empty
        )
    )]
    async fn upload_object(&self, object: &ObjectDescriptor, package_uid: &str) -> UploadOutcome {
        let outcome = match self.try_upload(object, package_uid).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(error = %e, "Object upload failed");
                UploadOutcome::Fail(e)
            }
        };

        let label = match &outcome {
            UploadOutcome::Success => "success",
            UploadOutcome::Exists => "exists",
            UploadOutcome::Fail(_) => "fail",
        };
        tracing::Span::current().record("upload.outcome", label);
        outcome
    }
}
