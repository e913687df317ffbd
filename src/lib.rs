//! UpdateHub Utils Library
//!
//! Client-side uploader for UpdateHub firmware packages.
//!
//! # Features
//!
//! - **UH-V1 Signing**: Every API call carries an HMAC-SHA256 `Authorization` header
//! - **Three-Phase Push**: Metadata, per-object upload, finalize
//! - **Content Addressed**: Objects are keyed by SHA-256; the server skips what it already holds
//! - **Streamed Uploads**: Payloads are read and sent in fixed-size chunks
//! - **Delta Archives**: `raw-delta` payloads are checked for a known archive signature
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use uhu::auth::ConfigCredentials;
//! use uhu::http::HttpClient;
//! use uhu::package::Package;
//! use uhu::progress::SilentProgress;
//! use uhu::push::PackagePusher;
//! use uhu::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load(Config::default_path()?)?;
//!     let progress = Arc::new(SilentProgress);
//!     let package = Package::load("package.json", progress.as_ref())?;
//!
//!     let client = HttpClient::new(Arc::new(ConfigCredentials::new(config.clone())))?;
//!     let pusher = PackagePusher::new(client, config.server_url(), progress);
//!     let uid = pusher.push_package(&package).await?;
//!     println!("{uid}");
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod config;
pub mod delta;
pub mod http;
pub mod package;
pub mod progress;
pub mod push;
pub mod upload;

// Re-export commonly used types
pub use config::Config;
pub use package::{ObjectDescriptor, Package};
pub use push::PackagePusher;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
