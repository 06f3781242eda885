pub mod error;
pub mod job;
pub mod poller;
pub mod processed;
pub mod reconciler;
pub mod scanner;
pub mod signature;
pub mod status;
pub mod stop;
pub mod watcher;

#[cfg(test)]
pub(crate) mod testing;

pub use error::SyncError;
pub use job::SourceSyncJob;
pub use poller::PollLoop;
pub use processed::{ProcessedSet, ProcessedSetStore};
pub use reconciler::UploadReconciler;
pub use scanner::FolderScanner;
pub use signature::signature;
pub use status::{Severity, StatusSink};
pub use stop::StopSignal;
pub use watcher::WatchLoop;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::broadcast;

/// Name of the archive subfolder created inside every watched source.
pub const ARCHIVE_DIR_NAME: &str = "uploaded";

/// Extension of the only recognized activity type.
pub const DEFAULT_EXTENSION: &str = "fit";

/// A recognized activity file as seen at listing time.
#[derive(Debug, Clone)]
pub struct ActivityFile {
    pub path: PathBuf,
    pub name: String,
    pub modified: Option<SystemTime>,
    pub size: Option<u64>,
}

impl ActivityFile {
    /// Stat the file. Missing metadata is kept as `None` rather than failing.
    pub fn from_path(path: &Path) -> Self {
        let name = file_name(path);
        let metadata = std::fs::metadata(path).ok();
        Self {
            path: path.to_path_buf(),
            name,
            modified: metadata.as_ref().and_then(|m| m.modified().ok()),
            size: metadata.map(|m| m.len()),
        }
    }

    pub fn signature(&self) -> String {
        signature::render(&self.name, self.modified, self.size)
    }
}

/// Result of processing one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    Uploaded,
    AlreadyRemote,
    Failed,
    Skipped,
}

/// Aggregate of one `SourceSyncJob` run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    pub uploaded: usize,
    pub last_uploaded: Option<String>,
    pub already_remote: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl JobSummary {
    pub fn record(&mut self, file_name: &str, outcome: SyncOutcome) {
        match outcome {
            SyncOutcome::Uploaded => {
                self.uploaded += 1;
                self.last_uploaded = Some(file_name.to_string());
            }
            SyncOutcome::AlreadyRemote => self.already_remote += 1,
            SyncOutcome::Failed => self.failed += 1,
            SyncOutcome::Skipped => self.skipped += 1,
        }
    }

    /// Fold another summary into this one, keeping the later upload name.
    pub fn merge(&mut self, other: &JobSummary) {
        self.uploaded += other.uploaded;
        self.already_remote += other.already_remote;
        self.failed += other.failed;
        self.skipped += other.skipped;
        if other.last_uploaded.is_some() {
            self.last_uploaded = other.last_uploaded.clone();
        }
    }
}

/// Events published while syncing. Nobody is required to listen.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    FileUploaded { source: String, file_name: String },
    JobCompleted { source: String, summary: JobSummary },
    CacheBridged { file_name: String },
}

pub type EventSender = broadcast::Sender<SyncEvent>;

/// Shared handles every sync component needs.
#[derive(Clone)]
pub struct SyncContext {
    pub sink: Arc<dyn StatusSink>,
    pub events: EventSender,
}

impl SyncContext {
    pub fn new(sink: Arc<dyn StatusSink>) -> Self {
        let (events, _) = broadcast::channel(128);
        Self { sink, events }
    }

    pub fn publish(&self, event: SyncEvent) {
        let _ = self.events.send(event);
    }
}

pub fn archive_dir(folder: &Path) -> PathBuf {
    folder.join(ARCHIVE_DIR_NAME)
}

pub fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}

/// Case-insensitive extension check.
pub fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case(extension))
        .unwrap_or(false)
}
