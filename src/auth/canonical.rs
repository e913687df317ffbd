//! Canonical requests
//!
//! A [`Request`] captures everything that is signed: method, URL, payload,
//! headers and the construction date. Its canonical form is
//!
//! ```text
//! {METHOD}
//! {PATH}
//! {SORTED_QUERY}
//! {SORTED_HEADERS}
//!
//! {PAYLOAD_SHA256_HEX}
//! ```
//!
//! The canonical form is recomputed on demand and never stored.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::{Method, Url};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Value of the `Api-Content-Type` header
pub const API_CONTENT_TYPE: &str = "application/vnd.updatehub-v1+json";

/// Product token of the `User-Agent` header
pub const USER_AGENT_PRODUCT: &str = "updatehub-utils";

/// Query values keep only `[A-Za-z0-9_.~-]` literal
const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// URL could not be used for a request
#[derive(Error, Debug)]
#[error("invalid URL: {0}")]
pub struct InvalidUrl(pub String);

/// Lowercase hex SHA-256 of `data`
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Header value as it takes part in the canonical request
///
/// Non-text values have a fixed string form: integers are bare, floats always
/// carry a decimal point (`0.0`, never `0`).
#[derive(Debug, Clone, PartialEq)]
pub enum HeaderValue {
    Text(String),
    Integer(i64),
    Float(f64),
}

impl fmt::Display for HeaderValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderValue::Text(value) => f.write_str(value),
            HeaderValue::Integer(value) => write!(f, "{}", value),
            HeaderValue::Float(value) => {
                if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e16 {
                    write!(f, "{:.1}", value)
                } else {
                    write!(f, "{}", value)
                }
            }
        }
    }
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        HeaderValue::Text(value.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        HeaderValue::Text(value)
    }
}

impl From<i64> for HeaderValue {
    fn from(value: i64) -> Self {
        HeaderValue::Integer(value)
    }
}

impl From<f64> for HeaderValue {
    fn from(value: f64) -> Self {
        HeaderValue::Float(value)
    }
}

/// An API request prepared for signing
///
/// `date` and the payload digest are fixed at construction. The only later
/// mutation is [`Request::sign`], which adds the `Authorization` header once.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    url: Url,
    raw_query: String,
    payload: Bytes,
    headers: Vec<(String, HeaderValue)>,
    date: DateTime<Utc>,
    payload_sha256: String,
}

impl Request {
    /// Start building a request
    pub fn builder(method: Method, url: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(method, url)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Query text exactly as given, before URL normalization
    pub fn raw_query(&self) -> &str {
        &self.raw_query
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn headers(&self) -> &[(String, HeaderValue)] {
        &self.headers
    }

    /// Look up a header by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&HeaderValue> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    }

    pub fn date(&self) -> DateTime<Utc> {
        self.date
    }

    pub fn payload_sha256(&self) -> &str {
        &self.payload_sha256
    }

    /// Canonical string form used as signing input
    pub fn canonical(&self) -> String {
        format!(
            "{}\n{}\n{}\n{}\n\n{}",
            self.method.as_str().to_ascii_uppercase(),
            self.url.path(),
            canonical_query(&self.raw_query),
            self.canonical_headers(),
            self.payload_sha256
        )
    }

    /// `name:value` lines, names lowercased, both sides trimmed, sorted
    pub fn canonical_headers(&self) -> String {
        let mut lines: Vec<String> = self
            .headers
            .iter()
            .map(|(name, value)| {
                format!(
                    "{}:{}",
                    name.trim().to_ascii_lowercase(),
                    value.to_string().trim()
                )
            })
            .collect();
        lines.sort();
        lines.join("\n")
    }

    /// Whether the `Authorization` header has been attached
    pub fn is_signed(&self) -> bool {
        self.header("authorization").is_some()
    }

    /// Attach the UH-V1 `Authorization` header.
    ///
    /// A request is signed at most once; later calls leave it untouched.
    pub fn sign(&mut self, credentials: &super::Credentials) {
        if self.is_signed() {
            return;
        }
        let authorization = super::Signature::new(credentials, self).authorization_header();
        self.headers
            .push(("Authorization".to_string(), HeaderValue::Text(authorization)));
    }

    #[cfg(test)]
    pub(crate) fn with_raw_headers(mut self, headers: Vec<(String, HeaderValue)>) -> Self {
        self.headers = headers;
        self
    }
}

/// Builder for [`Request`]
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    method: Method,
    url: String,
    payload: Bytes,
    json: bool,
    headers: Vec<(String, HeaderValue)>,
    date: Option<DateTime<Utc>>,
    version: Option<String>,
}

impl RequestBuilder {
    fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            payload: Bytes::new(),
            json: false,
            headers: Vec::new(),
            date: None,
            version: None,
        }
    }

    /// Set the request body
    pub fn payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Mark the body as JSON (adds `Content-Type: application/json`)
    pub fn json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    /// Add or replace a header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<HeaderValue>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Fix the request date instead of using the current time
    pub fn date(mut self, date: DateTime<Utc>) -> Self {
        self.date = Some(date);
        self
    }

    /// Override the version advertised in `User-Agent`
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Build the request, adding the default header set
    pub fn build(self) -> Result<Request, InvalidUrl> {
        let url = parse_url(&self.url)?;
        let raw_query = raw_query(&self.url).to_string();
        let date = self.date.unwrap_or_else(Utc::now);
        let payload_sha256 = sha256_hex(&self.payload);
        let version = self.version.as_deref().unwrap_or(crate::VERSION);

        let mut headers: Vec<(String, HeaderValue)> = vec![
            (
                "User-Agent".into(),
                format!("{}/{}", USER_AGENT_PRODUCT, version).into(),
            ),
            ("Host".into(), netloc(&url).into()),
            ("Timestamp".into(), epoch_seconds(&date).into()),
            ("Content-sha256".into(), payload_sha256.clone().into()),
            ("Api-Content-Type".into(), API_CONTENT_TYPE.into()),
            ("Accept".into(), "application/json".into()),
        ];
        if self.json {
            headers.push(("Content-Type".into(), "application/json".into()));
        }
        for (name, value) in self.headers {
            match headers
                .iter_mut()
                .find(|(key, _)| key.eq_ignore_ascii_case(&name))
            {
                Some(existing) => existing.1 = value,
                None => headers.push((name, value)),
            }
        }

        Ok(Request {
            method: self.method,
            url,
            raw_query,
            payload: self.payload,
            headers,
            date,
            payload_sha256,
        })
    }
}

/// Parse an absolute `http`/`https` URL
pub fn parse_url(raw: &str) -> Result<Url, InvalidUrl> {
    let url = Url::parse(raw).map_err(|e| InvalidUrl(format!("{}: {}", raw, e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(InvalidUrl(format!("unsupported scheme '{}'", url.scheme())));
    }
    if url.host_str().is_none() {
        return Err(InvalidUrl(format!("{}: missing host", raw)));
    }
    Ok(url)
}

/// Text between `?` and `#`.
///
/// URL parsing trims trailing whitespace, which would turn `a= ` into a blank
/// value, so the signed query is taken from the input string.
fn raw_query(raw: &str) -> &str {
    let without_fragment = raw.split_once('#').map_or(raw, |(head, _)| head);
    without_fragment
        .split_once('?')
        .map_or("", |(_, query)| query)
}

/// Host plus port when the port is not the scheme default
fn netloc(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    }
}

/// Seconds since the epoch with microsecond precision
fn epoch_seconds(date: &DateTime<Utc>) -> f64 {
    date.timestamp_micros() as f64 / 1_000_000.0
}

/// Canonical form of a raw query string.
///
/// Values are sorted within each key and percent-encoded; the rendered
/// `key=value` tokens are then sorted as a whole and joined with `&`.
/// Pairs without a value are dropped, `+` decodes to a space.
pub fn canonical_query(query: &str) -> String {
    let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for pair in query.split('&') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        let value = decode_component(value);
        if value.is_empty() {
            continue;
        }
        grouped.entry(decode_component(key)).or_default().push(value);
    }

    let mut tokens: Vec<String> = grouped
        .into_iter()
        .flat_map(|(key, mut values)| {
            values.sort();
            values.into_iter().map(move |value| {
                format!("{}={}", key, utf8_percent_encode(&value, QUERY_VALUE))
            })
        })
        .collect();
    tokens.sort();
    tokens.join("&")
}

fn decode_component(component: &str) -> String {
    percent_decode_str(&component.replace('+', " "))
        .decode_utf8_lossy()
        .into_owned()
}
