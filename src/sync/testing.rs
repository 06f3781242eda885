//! Test doubles shared by the sync tests.

use super::{file_name, Severity, StatusSink, SyncContext};
use crate::uploader::{ActivityUploader, UploadError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

/// Uploader that answers from a per-file script and records every call.
/// Files without a scripted answer upload successfully.
#[derive(Default)]
pub struct ScriptedUploader {
    responses: Mutex<HashMap<String, Result<(), UploadError>>>,
    delete_during: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedUploader {
    pub fn respond(&self, name: &str, response: Result<(), UploadError>) {
        self.responses.lock().insert(name.to_string(), response);
    }

    /// Remove the file from disk while the upload is "in flight".
    pub fn delete_during_upload(&self, name: &str) {
        self.delete_during.lock().insert(name.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ActivityUploader for ScriptedUploader {
    async fn upload(&self, path: &Path) -> Result<(), UploadError> {
        let name = file_name(path);
        self.calls.lock().push(name.clone());
        if self.delete_during.lock().contains(&name) {
            let _ = std::fs::remove_file(path);
        }
        self.responses.lock().get(&name).cloned().unwrap_or(Ok(()))
    }
}

#[derive(Default)]
pub struct RecordingSink {
    messages: Mutex<Vec<(Severity, String)>>,
}

impl RecordingSink {
    pub fn contains(&self, severity: Severity, needle: &str) -> bool {
        self.messages
            .lock()
            .iter()
            .any(|(s, m)| *s == severity && m.contains(needle))
    }
}

impl StatusSink for RecordingSink {
    fn emit(&self, severity: Severity, message: String) {
        self.messages.lock().push((severity, message));
    }
}

pub fn context(sink: Arc<RecordingSink>) -> SyncContext {
    SyncContext::new(sink)
}
