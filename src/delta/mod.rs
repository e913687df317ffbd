//! Delta archive detection
//!
//! Classifies payload binaries by their leading magic bytes. The registry is
//! fixed at compile time; a file matches the first entry whose magic equals
//! the corresponding prefix of the file.

use crate::package::ValidationError;
use serde_json::{Map, Value};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// A recognised delta archive format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveFormat {
    pub name: &'static str,
    pub magic: &'static [u8],
}

/// Known archivers
pub const ARCHIVERS: &[ArchiveFormat] = &[ArchiveFormat {
    name: "bita",
    magic: b"BITA1\0",
}];

/// Longest magic in [`ARCHIVERS`]
pub const MAX_SIGNATURE_SIZE: usize = max_signature_size();

const fn max_signature_size() -> usize {
    let mut max = 0;
    let mut i = 0;
    while i < ARCHIVERS.len() {
        if ARCHIVERS[i].magic.len() > max {
            max = ARCHIVERS[i].magic.len();
        }
        i += 1;
    }
    max
}

/// Match a header buffer against the registry
pub fn detect_bytes(header: &[u8]) -> Option<ArchiveFormat> {
    ARCHIVERS
        .iter()
        .find(|format| header.starts_with(format.magic))
        .copied()
}

/// Identify the archive format of a file.
///
/// Reads at most [`MAX_SIGNATURE_SIZE`] bytes from the start. Short files
/// yield `None`; only a failure to open or read is an error.
pub fn detect(path: impl AsRef<Path>) -> io::Result<Option<ArchiveFormat>> {
    let file = File::open(path.as_ref())?;
    let mut header = Vec::with_capacity(MAX_SIGNATURE_SIZE);
    file.take(MAX_SIGNATURE_SIZE as u64).read_to_end(&mut header)?;
    Ok(detect_bytes(&header))
}

/// Reject payloads that are not a known delta archive.
///
/// Returns an attribute bag for mode-specific validators to extend.
pub fn validate_delta(path: impl AsRef<Path>) -> Result<Map<String, Value>, ValidationError> {
    let path = path.as_ref();
    let filename = path.display().to_string();
    match detect(path) {
        Ok(Some(format)) => {
            tracing::debug!(file = %filename, format = format.name, "Delta archive detected");
            Ok(Map::new())
        }
        Ok(None) => Err(ValidationError::UnknownFormat(filename)),
        Err(source) => Err(ValidationError::Io {
            path: filename,
            source,
        }),
    }
}
