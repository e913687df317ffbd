//! Push orchestrator
//!
//! Drives one package transaction through its three phases:
//!
//! 1. **metadata**: validate, sign and POST the metadata, receiving the package UID
//! 2. **objects**: upload every object; any failure aborts the rest
//! 3. **finish**: PUT `/packages/{uid}/finish`
//!
//! Object uploads run on a bounded worker pool (`upload_concurrency`, at most
//! [`MAX_UPLOAD_CONCURRENCY`]). Each worker builds and signs its own requests;
//! only the progress reporter is shared.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use uhu::auth::StaticCredentials;
//! use uhu::http::HttpClient;
//! use uhu::progress::SilentProgress;
//! use uhu::{Package, PackagePusher};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = HttpClient::new(Arc::new(StaticCredentials::new("id", "secret")))?;
//! let package = Package::load("package.json", &SilentProgress)?;
//! let pusher = PackagePusher::new(client, "https://api.updatehub.io", Arc::new(SilentProgress))
//!     .with_concurrency(4);
//! let uid = pusher.push_package(&package).await?;
//! println!("{}", uid);
//! # Ok(())
//! # }
//! ```

use crate::auth::{canonical_json, sign_dict, CredentialsError};
use crate::config::MAX_UPLOAD_CONCURRENCY;
use crate::http::{HttpClient, HttpError, RequestOptions};
use crate::package::{
    BasicMetadataValidator, MetadataValidator, ObjectDescriptor, Package, ValidationError,
};
use crate::progress::ProgressReporter;
use crate::upload::{HttpObjectUploader, ObjectUploader, UploadError, UploadOutcome};
use futures::stream::{self, TryStreamExt};
use reqwest::StatusCode;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub mod transaction;

pub use transaction::{Transaction, TransactionError, TransactionState};

/// Header carrying the metadata signature
pub const SIGNATURE_HEADER: &str = "UH-SIGNATURE";

/// Transaction phase, for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Metadata,
    Objects,
    Finish,
    Status,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Metadata => "metadata",
            Phase::Objects => "objects",
            Phase::Finish => "finish",
            Phase::Status => "status",
        };
        f.write_str(name)
    }
}

/// Push errors
#[derive(Error, Debug)]
pub enum PushError {
    #[error(transparent)]
    InvalidMetadata(#[from] ValidationError),

    #[error(transparent)]
    Credentials(#[from] CredentialsError),

    #[error("{0}")]
    Metadata(String),

    #[error("{filename}: {cause}")]
    Object {
        filename: String,
        #[source]
        cause: UploadError,
    },

    #[error("{0}")]
    Finish(String),

    #[error("{0}")]
    Status(String),

    #[error(transparent)]
    Transaction(#[from] TransactionError),
}

impl PushError {
    /// Phase the transaction failed in
    pub fn phase(&self) -> Phase {
        match self {
            PushError::InvalidMetadata(_) | PushError::Credentials(_) | PushError::Metadata(_) => {
                Phase::Metadata
            }
            PushError::Object { .. } => Phase::Objects,
            PushError::Finish(_) => Phase::Finish,
            PushError::Status(_) => Phase::Status,
            PushError::Transaction(e) => match e.to {
                TransactionState::MetadataSent => Phase::Metadata,
                TransactionState::ObjectsUploading => Phase::Objects,
                _ => Phase::Finish,
            },
        }
    }
}

/// Pushes packages to an UpdateHub server
pub struct PackagePusher {
    client: HttpClient,
    server_url: String,
    validator: Arc<dyn MetadataValidator>,
    uploader: Arc<dyn ObjectUploader>,
    progress: Arc<dyn ProgressReporter>,
    concurrency: usize,
}

impl PackagePusher {
    pub fn new(
        client: HttpClient,
        server_url: impl Into<String>,
        progress: Arc<dyn ProgressReporter>,
    ) -> Self {
        let server_url = server_url.into().trim_end_matches('/').to_string();
        let uploader = HttpObjectUploader::new(client.clone(), server_url.clone(), progress.clone());
        Self {
            client,
            server_url,
            validator: Arc::new(BasicMetadataValidator),
            uploader: Arc::new(uploader),
            progress,
            concurrency: 1,
        }
    }

    pub fn with_validator(mut self, validator: Arc<dyn MetadataValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_uploader(mut self, uploader: Arc<dyn ObjectUploader>) -> Self {
        self.uploader = uploader;
        self
    }

    /// Object upload workers, clamped to `1..=MAX_UPLOAD_CONCURRENCY`
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.clamp(1, MAX_UPLOAD_CONCURRENCY);
        self
    }

    /// Rebuild the default uploader with another streaming chunk size
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        let uploader = HttpObjectUploader::new(
            self.client.clone(),
            self.server_url.clone(),
            self.progress.clone(),
        )
        .with_chunk_size(chunk_size);
        self.uploader = Arc::new(uploader);
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run a full transaction and return the package UID
    #[tracing::instrument(
        name = "push.package",
        skip(self, package),
        fields(
            package.objects = package.objects().len(),
            package.bytes = package.size(),
            package.uid = tracing::field::Empty
        ),
        err
    )]
    pub async fn push_package(&self, package: &Package) -> Result<String, PushError> {
        let mut tx = Transaction::new();
        match self.run(&mut tx, package).await {
            Ok(uid) => {
                tracing::Span::current().record("package.uid", uid.as_str());
                tracing::info!(package.uid = %uid, "Package pushed");
                self.progress.push_finish(&uid);
                Ok(uid)
            }
            Err(e) => {
                tx.fail();
                Err(e)
            }
        }
    }

    async fn run(&self, tx: &mut Transaction, package: &Package) -> Result<String, PushError> {
        let uid = self.upload_metadata(package.metadata()).await?;
        tx.metadata_sent(uid.as_str())?;

        tx.transition(TransactionState::ObjectsUploading)?;
        self.upload_objects(&uid, package.objects()).await?;

        self.finish_package(&uid).await?;
        tx.transition(TransactionState::Finalized)?;
        Ok(uid)
    }

    /// Validate, sign and register the metadata. Returns the package UID.
    #[tracing::instrument(name = "push.metadata", skip(self, metadata), err)]
    pub async fn upload_metadata(&self, metadata: &Value) -> Result<String, PushError> {
        self.validator.validate(metadata)?;

        let credentials = self.client.credentials()?;
        let signature = sign_dict(metadata, &credentials);
        let options =
            RequestOptions::json(canonical_json(metadata)).header(SIGNATURE_HEADER, signature);

        let url = format!("{}/packages", self.server_url);
        let response = self
            .client
            .post(&url, options)
            .await
            .map_err(|e| PushError::Metadata(e.to_string()))?;

        if response.status() != StatusCode::CREATED {
            return Err(PushError::Metadata(format!(
                "unexpected status {}",
                response.status()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| PushError::Metadata(format!("invalid response: {}", e)))?;
        match body.get("uid") {
            Some(Value::String(uid)) if !uid.is_empty() => Ok(uid.clone()),
            Some(Value::Number(uid)) => Ok(uid.to_string()),
            _ => Err(PushError::Metadata("response has no package uid".into())),
        }
    }

    /// Upload every object. The first failure aborts the remaining uploads.
    #[tracing::instrument(
        name = "push.objects",
        skip(self, objects),
        fields(package.uid = %package_uid, objects = objects.len()),
        err
    )]
    pub async fn upload_objects(
        &self,
        package_uid: &str,
        objects: &[ObjectDescriptor],
    ) -> Result<(), PushError> {
        self.progress.start_package_upload(objects);

        let result = stream::iter(objects.iter().map(Ok::<_, PushError>))
            .try_for_each_concurrent(self.concurrency, |object| async move {
                match self.uploader.upload_object(object, package_uid).await {
                    UploadOutcome::Fail(cause) => Err(PushError::Object {
                        filename: object.filename.clone(),
                        cause,
                    }),
                    UploadOutcome::Success | UploadOutcome::Exists => Ok(()),
                }
            })
            .await;

        self.progress.finish_package_upload();
        result
    }

    /// Finalize the transaction
    #[tracing::instrument(name = "push.finish", skip(self), fields(package.uid = %package_uid), err)]
    pub async fn finish_package(&self, package_uid: &str) -> Result<(), PushError> {
        let url = format!("{}/packages/{}/finish", self.server_url, package_uid);
        let response = self
            .client
            .put(&url, RequestOptions::new())
            .await
            .map_err(|e| PushError::Finish(e.to_string()))?;

        if response.status() != StatusCode::NO_CONTENT {
            return Err(PushError::Finish(format!(
                "unexpected status {}",
                response.status()
            )));
        }
        Ok(())
    }

    /// Current server-side status of a package
    #[tracing::instrument(name = "push.status", skip(self), fields(package.uid = %package_uid), err)]
    pub async fn get_package_status(&self, package_uid: &str) -> Result<String, PushError> {
        let url = format!("{}/packages/{}", self.server_url, package_uid);
        let response = self
            .client
            .get(&url, RequestOptions::new())
            .await
            .map_err(|e: HttpError| PushError::Status(e.to_string()))?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| PushError::Status(format!("invalid response: {}", e)))?;
        body.get("status")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| PushError::Status("response has no package status".into()))
    }
}
