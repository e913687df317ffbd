//! Metadata validation
//!
//! Mode-specific schemas live outside this crate; the orchestrator only needs
//! something implementing [`MetadataValidator`]. [`BasicMetadataValidator`]
//! checks the structure every package shares.

use serde_json::Value;
use thiserror::Error;

/// Installation modes understood by the device agent
pub const KNOWN_MODES: &[&str] = &[
    "copy",
    "flash",
    "imxkobs",
    "mender",
    "raw",
    "raw-delta",
    "tarball",
    "test",
    "ubifs",
    "uboot-env",
    "zephyr",
];

/// Validation errors
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("{0} doesn't match a known format type")]
    UnknownFormat(String),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid metadata: {0}")]
    InvalidMetadata(String),
}

/// Validates package metadata before it is sent
pub trait MetadataValidator: Send + Sync {
    fn validate(&self, metadata: &Value) -> Result<(), ValidationError>;
}

/// Structural checks shared by every mode
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicMetadataValidator;

fn invalid(message: impl Into<String>) -> ValidationError {
    ValidationError::InvalidMetadata(message.into())
}

fn is_sha256_hex(value: &str) -> bool {
    value.len() == 64
        && value
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

impl BasicMetadataValidator {
    fn validate_object(object: &Value, set: usize, index: usize) -> Result<(), ValidationError> {
        let at = format!("objects[{}][{}]", set, index);
        let object = object
            .as_object()
            .ok_or_else(|| invalid(format!("{} must be an object", at)))?;

        match object.get("filename").and_then(Value::as_str) {
            Some(name) if !name.is_empty() => {}
            _ => return Err(invalid(format!("{}.filename must be a non-empty string", at))),
        }

        match object.get("sha256sum").and_then(Value::as_str) {
            Some(sum) if is_sha256_hex(sum) => {}
            _ => {
                return Err(invalid(format!(
                    "{}.sha256sum must be a lowercase hex SHA-256 digest",
                    at
                )))
            }
        }

        if object.get("size").and_then(Value::as_u64).is_none() {
            return Err(invalid(format!("{}.size must be a non-negative integer", at)));
        }

        match object.get("mode").and_then(Value::as_str) {
            Some(mode) if KNOWN_MODES.contains(&mode) => Ok(()),
            Some(mode) => Err(invalid(format!("{}.mode '{}' is not supported", at, mode))),
            None => Err(invalid(format!("{}.mode must be a string", at))),
        }
    }
}

impl MetadataValidator for BasicMetadataValidator {
    fn validate(&self, metadata: &Value) -> Result<(), ValidationError> {
        for field in ["product", "version"] {
            match metadata.get(field).and_then(Value::as_str) {
                Some(value) if !value.trim().is_empty() => {}
                _ => return Err(invalid(format!("{} must be a non-empty string", field))),
            }
        }

        let sets = metadata
            .get("objects")
            .and_then(Value::as_array)
            .filter(|sets| !sets.is_empty())
            .ok_or_else(|| invalid("objects must be a non-empty list of installation sets"))?;

        for (i, set) in sets.iter().enumerate() {
            let objects = set
                .as_array()
                .filter(|objects| !objects.is_empty())
                .ok_or_else(|| invalid(format!("objects[{}] must be a non-empty list", i)))?;
            for (j, object) in objects.iter().enumerate() {
                Self::validate_object(object, i, j)?;
            }
        }

        Ok(())
    }
}
