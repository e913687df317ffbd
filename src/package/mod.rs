//! Package descriptors
//!
//! A package file lists installation sets of payload objects:
//!
//! ```json
//! {
//!   "product": "0123456789",
//!   "version": "1.0",
//!   "supported-hardware": "any",
//!   "objects": [[{"filename": "rootfs.img", "mode": "raw", "target": "/dev/sda1"}]]
//! }
//! ```
//!
//! Loading hashes every payload, producing the metadata sent to the server
//! (each entry gains `sha256sum` and `size`, `filename` becomes the base name)
//! and the list of objects to upload, deduplicated by digest.

use crate::delta;
use crate::progress::ProgressReporter;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub mod validator;

pub use validator::{BasicMetadataValidator, MetadataValidator, ValidationError, KNOWN_MODES};

/// Mode whose payloads must be delta archives
pub const DELTA_MODE: &str = "raw-delta";

/// Package loading errors
#[derive(Error, Debug)]
pub enum PackageError {
    #[error("Invalid package file {path}: {reason}")]
    InvalidPackageFile { path: PathBuf, reason: String },

    #[error("Invalid file {path}: {source}")]
    InvalidFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// One payload of a package
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectDescriptor {
    /// Local payload location
    pub path: PathBuf,
    /// Name sent to the server
    pub filename: String,
    pub sha256sum: String,
    pub size: u64,
    pub mode: String,
    /// Full descriptor as sent to the server, mode-specific fields included
    pub metadata: Map<String, Value>,
}

impl ObjectDescriptor {
    /// Hash a payload and build its descriptor from a package-file entry
    pub fn from_entry(
        base_dir: &Path,
        mut entry: Map<String, Value>,
        package_path: &Path,
    ) -> Result<Self, PackageError> {
        let invalid = |reason: String| PackageError::InvalidPackageFile {
            path: package_path.to_path_buf(),
            reason,
        };

        let filename = entry
            .get("filename")
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| invalid("object entry without a filename".into()))?
            .to_string();
        let mode = entry
            .get("mode")
            .and_then(Value::as_str)
            .ok_or_else(|| invalid(format!("object '{}' has no mode", filename)))?
            .to_string();

        let path = base_dir.join(&filename);
        let (sha256sum, size) = hash_file(&path).map_err(|source| PackageError::InvalidFile {
            path: path.clone(),
            source,
        })?;

        if mode == DELTA_MODE {
            for (key, value) in delta::validate_delta(&path)? {
                entry.entry(key).or_insert(value);
            }
        }

        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or(filename);
        entry.insert("filename".into(), Value::String(filename.clone()));
        entry.insert("sha256sum".into(), Value::String(sha256sum.clone()));
        entry.insert("size".into(), json!(size));

        Ok(Self {
            path,
            filename,
            sha256sum,
            size,
            mode,
            metadata: entry,
        })
    }
}

/// Stream a file through SHA-256
fn hash_file(path: &Path) -> io::Result<(String, u64)> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let size = io::copy(&mut file, &mut hasher)?;
    Ok((hex::encode(hasher.finalize()), size))
}

#[derive(Debug, Deserialize)]
struct PackageFile {
    product: String,
    version: String,
    #[serde(rename = "supported-hardware", default = "default_supported_hardware")]
    supported_hardware: Value,
    objects: Vec<Vec<Map<String, Value>>>,
}

fn default_supported_hardware() -> Value {
    Value::String("any".into())
}

/// Metadata plus the objects to upload
#[derive(Debug, Clone)]
pub struct Package {
    metadata: Value,
    objects: Vec<ObjectDescriptor>,
}

impl Package {
    pub fn new(metadata: Value, objects: Vec<ObjectDescriptor>) -> Self {
        Self { metadata, objects }
    }

    /// Load a package file, hashing every payload it references
    pub fn load(
        path: impl AsRef<Path>,
        progress: &dyn ProgressReporter,
    ) -> Result<Self, PackageError> {
        let path = path.as_ref();
        let invalid = |reason: String| PackageError::InvalidPackageFile {
            path: path.to_path_buf(),
            reason,
        };

        let content = std::fs::read_to_string(path).map_err(|e| invalid(e.to_string()))?;
        let file: PackageFile = serde_json::from_str(&content).map_err(|e| invalid(e.to_string()))?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));

        progress.start_objects_load();
        let mut seen = HashSet::new();
        let mut objects = Vec::new();
        let mut sets = Vec::with_capacity(file.objects.len());
        for set in file.objects {
            let mut entries = Vec::with_capacity(set.len());
            for entry in set {
                let object = ObjectDescriptor::from_entry(base_dir, entry, path)?;
                progress.object_read(1);
                entries.push(Value::Object(object.metadata.clone()));
                if seen.insert(object.sha256sum.clone()) {
                    objects.push(object);
                }
            }
            sets.push(Value::Array(entries));
        }
        progress.finish_objects_load();

        tracing::info!(
            product = %file.product,
            version = %file.version,
            objects = objects.len(),
            "Package loaded"
        );

        let metadata = json!({
            "product": file.product,
            "version": file.version,
            "supported-hardware": file.supported_hardware,
            "objects": sets,
        });

        Ok(Self { metadata, objects })
    }

    /// Metadata document sent to the server
    pub fn metadata(&self) -> &Value {
        &self.metadata
    }

    /// Distinct objects, in first-seen order
    pub fn objects(&self) -> &[ObjectDescriptor] {
        &self.objects
    }

    /// Total payload bytes
    pub fn size(&self) -> u64 {
        self.objects.iter().map(|o| o.size).sum()
    }
}
