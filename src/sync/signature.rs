//! Cheap identity for a file version: name, modification time and size.
//!
//! This is not a content hash. Two different files sharing all three
//! attributes produce the same signature.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Signature of the file at `path`. Falls back to the bare file name when
/// the file cannot be stat'ed.
pub fn signature(path: &Path) -> String {
    let name = super::file_name(path);
    match std::fs::metadata(path) {
        Ok(metadata) => render(&name, metadata.modified().ok(), Some(metadata.len())),
        Err(_) => name,
    }
}

pub(crate) fn render(name: &str, modified: Option<SystemTime>, size: Option<u64>) -> String {
    let mtime = modified.and_then(|t| t.duration_since(UNIX_EPOCH).ok());
    match (mtime, size) {
        (Some(mtime), Some(size)) => format!("{}_{}_{}", name, mtime.as_secs_f64(), size),
        _ => name.to_string(),
    }
}
