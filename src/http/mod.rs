//! HTTP client module
//!
//! Wraps `reqwest` with UH-V1 signing and uniform error reporting.
//!
//! # Features
//!
//! - **Signing**: Credentials are fetched and the request signed on every call
//! - **Timeouts**: 30 s to connect, 30 s per socket read, 30 s total for API calls
//! - **Error Messages**: Server error bodies are turned into readable text
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use uhu::auth::StaticCredentials;
//! use uhu::http::{HttpClient, RequestOptions};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = HttpClient::new(Arc::new(StaticCredentials::new("id", "secret")))?;
//! let response = client
//!     .get("https://api.updatehub.io/packages/1234", RequestOptions::new())
//!     .await?;
//! println!("{}", response.status());
//! # Ok(())
//! # }
//! ```
//!
//! # Tracing
//!
//! | Operation | Span Name | Attributes |
//! |-----------|-----------|------------|
//! | Signed API call | `http.request` | method, url, status_code |
//! | Streamed upload | `http.put_stream` | url, bytes, status_code |

use crate::auth::canonical::parse_url;
use crate::auth::{Credentials, CredentialsError, CredentialsProvider, InvalidUrl, Request};
use bytes::Bytes;
use reqwest::header::CONTENT_LENGTH;
use reqwest::{Method, Response, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Timeout applied to connects, socket reads and whole API calls
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub const UNKNOWN_ERROR: &str = "An unexpected request error occurred. Try again later.";
pub const UNAUTHORIZED_ERROR: &str = "Unauthorized. Did you set your credentials?";

/// HTTP errors
#[derive(Error, Debug)]
pub enum HttpError {
    #[error("invalid URL")]
    InvalidUrl,

    #[error("server not available")]
    ServerUnavailable,

    #[error("invalid header '{0}'")]
    InvalidHeader(String),

    #[error("{}", UNAUTHORIZED_ERROR)]
    Unauthorized,

    #[error("{message}")]
    Server { status: StatusCode, message: String },

    #[error("{}", UNKNOWN_ERROR)]
    Unknown,

    #[error(transparent)]
    Credentials(#[from] CredentialsError),

    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}

impl From<InvalidUrl> for HttpError {
    fn from(err: InvalidUrl) -> Self {
        tracing::debug!(error = %err, "Rejected request URL");
        HttpError::InvalidUrl
    }
}

impl HttpError {
    /// Map a transport failure
    fn from_transport(err: reqwest::Error) -> Self {
        tracing::debug!(error = %err, "HTTP transport error");
        // Connect timeouts report both is_connect and is_timeout
        if err.is_builder() {
            HttpError::InvalidUrl
        } else if err.is_connect() {
            HttpError::ServerUnavailable
        } else {
            HttpError::Unknown
        }
    }

    /// Status code of a server-side rejection
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            HttpError::Unauthorized => Some(StatusCode::UNAUTHORIZED),
            HttpError::Server { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Turn an error response body into a readable message.
///
/// Accepts `{"error_message": "..."}` and `{"errors": {"field": ["msg", ...]}}`;
/// anything else yields [`UNKNOWN_ERROR`].
pub fn format_server_error(body: &[u8]) -> String {
    let Ok(value) = serde_json::from_slice::<Value>(body) else {
        return UNKNOWN_ERROR.to_string();
    };

    if let Some(message) = value.get("error_message") {
        let message = match message {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        if !message.trim().is_empty() {
            return message;
        }
        return UNKNOWN_ERROR.to_string();
    }

    if let Some(errors) = value.get("errors") {
        return format_field_errors(errors).unwrap_or_else(|| UNKNOWN_ERROR.to_string());
    }

    UNKNOWN_ERROR.to_string()
}

/// One `- field: msg1, msg2` line per field
fn format_field_errors(errors: &Value) -> Option<String> {
    let fields = errors.as_object().filter(|fields| !fields.is_empty())?;
    let mut lines = Vec::with_capacity(fields.len());
    for (field, messages) in fields {
        let messages = messages
            .as_array()?
            .iter()
            .map(|m| m.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()?;
        lines.push(format!("- {}: {}", field, messages.join(", ")));
    }
    Some(lines.join("\n"))
}

/// Per-call request options
#[derive(Debug, Clone)]
pub struct RequestOptions {
    body: Bytes,
    json: bool,
    headers: Vec<(String, String)>,
    sign: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            body: Bytes::new(),
            json: false,
            headers: Vec::new(),
            sign: true,
        }
    }
}

impl RequestOptions {
    /// Empty, signed request
    pub fn new() -> Self {
        Self::default()
    }

    /// Signed request with a JSON body
    pub fn json(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            json: true,
            ..Self::default()
        }
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Skip signing
    pub fn unsigned(mut self) -> Self {
        self.sign = false;
        self
    }
}

/// Signing HTTP client
///
/// Holds no per-call state; cloning is cheap.
#[derive(Clone)]
pub struct HttpClient {
    http: reqwest::Client,
    credentials: Arc<dyn CredentialsProvider>,
    timeout: Duration,
}

impl HttpClient {
    /// Create a new client
    pub fn new(credentials: Arc<dyn CredentialsProvider>) -> Result<Self, HttpError> {
        Ok(Self {
            http: build_http(REQUEST_TIMEOUT)?,
            credentials,
            timeout: REQUEST_TIMEOUT,
        })
    }

    /// Replace [`REQUEST_TIMEOUT`] for connects, reads and API calls
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, HttpError> {
        self.http = build_http(timeout)?;
        self.timeout = timeout;
        Ok(self)
    }

    /// Fetch the current credentials from the provider
    pub fn credentials(&self) -> Result<Credentials, CredentialsError> {
        self.credentials.credentials()
    }

    pub async fn get(&self, url: &str, options: RequestOptions) -> Result<Response, HttpError> {
        self.send(Method::GET, url, options).await
    }

    pub async fn post(&self, url: &str, options: RequestOptions) -> Result<Response, HttpError> {
        self.send(Method::POST, url, options).await
    }

    pub async fn put(&self, url: &str, options: RequestOptions) -> Result<Response, HttpError> {
        self.send(Method::PUT, url, options).await
    }

    /// Build, sign and send an API request
    #[tracing::instrument(
        name = "http.request",
        skip(self, options),
        fields(
            http.method = %method,
            http.url = %url,
            http.status_code = tracing::field::Empty
        ),
        err
    )]
    pub async fn send(
        &self,
        method: Method,
        url: &str,
        options: RequestOptions,
    ) -> Result<Response, HttpError> {
        let mut builder = Request::builder(method, url)
            .payload(options.body)
            .json(options.json);
        for (name, value) in options.headers {
            builder = builder.header(name, value);
        }
        let mut request = builder.build()?;
        for (name, value) in request.headers() {
            check_header(name, &value.to_string())?;
        }

        if options.sign {
            let credentials = self.credentials.credentials()?;
            request.sign(&credentials);
        }

        let mut outgoing = self
            .http
            .request(request.method().clone(), request.url().clone())
            .timeout(self.timeout)
            .body(request.payload().clone());
        for (name, value) in request.headers() {
            outgoing = outgoing.header(name.as_str(), value.to_string());
        }

        let response = outgoing.send().await.map_err(HttpError::from_transport)?;
        tracing::Span::current().record("http.status_code", response.status().as_u16());

        Self::classify(response).await
    }

    /// Stream a body to an opaque storage URL. Unsigned, no total deadline.
    #[tracing::instrument(
        name = "http.put_stream",
        skip(self, body),
        fields(
            http.method = "PUT",
            http.url = %url,
            upload.bytes = content_length,
            http.status_code = tracing::field::Empty
        ),
        err
    )]
    pub async fn put_stream(
        &self,
        url: &str,
        body: reqwest::Body,
        content_length: u64,
    ) -> Result<Response, HttpError> {
        let url = parse_url(url)?;
        let response = self
            .http
            .put(url)
            .header(CONTENT_LENGTH, content_length)
            .body(body)
            .send()
            .await
            .map_err(HttpError::from_transport)?;
        tracing::Span::current().record("http.status_code", response.status().as_u16());

        Self::classify(response).await
    }

    async fn classify(response: Response) -> Result<Response, HttpError> {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(HttpError::Unauthorized);
        }
        if status.is_success() {
            return Ok(response);
        }

        let body = response.bytes().await.unwrap_or_default();
        let message = format_server_error(&body);
        tracing::warn!(status = status.as_u16(), error = %message, "Request rejected");
        Err(HttpError::Server { status, message })
    }
}

fn build_http(timeout: Duration) -> Result<reqwest::Client, HttpError> {
    reqwest::Client::builder()
        .connect_timeout(timeout)
        .read_timeout(timeout)
        .build()
        .map_err(|e| HttpError::Client(e.to_string()))
}

/// Reject header names and values that cannot go on the wire
fn check_header(name: &str, value: &str) -> Result<(), HttpError> {
    let valid = reqwest::header::HeaderName::from_bytes(name.as_bytes()).is_ok()
        && reqwest::header::HeaderValue::from_str(value).is_ok();
    if valid {
        Ok(())
    } else {
        Err(HttpError::InvalidHeader(name.to_string()))
    }
}
