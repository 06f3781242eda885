use super::{archive_dir, FolderScanner, JobSummary, SyncEvent, UploadReconciler};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{error, info};

/// One pass over a folder: every current candidate goes through the reconciler,
/// one at a time.
#[derive(Clone)]
pub struct SourceSyncJob {
    scanner: FolderScanner,
    reconciler: UploadReconciler,
}

impl SourceSyncJob {
    pub fn new(scanner: FolderScanner, reconciler: UploadReconciler) -> Self {
        Self {
            scanner,
            reconciler,
        }
    }

    pub fn scanner(&self) -> &FolderScanner {
        &self.scanner
    }

    pub fn reconciler(&self) -> &UploadReconciler {
        &self.reconciler
    }

    /// Never fails. Folder-level problems are logged and yield an empty summary.
    pub async fn run(&self, folder: &Path, label: &str) -> JobSummary {
        let started = Instant::now();
        let ctx = self.reconciler.context();
        info!("Processing {} folder: {}", label, folder.display());

        let candidates = match self.prepare(folder) {
            Ok(candidates) => candidates,
            Err(e) => {
                error!("Error processing {} folder: {}", label, e);
                ctx.sink
                    .error(format!("Error processing {} folder: {}", label, e));
                let summary = JobSummary::default();
                ctx.publish(SyncEvent::JobCompleted {
                    source: label.to_string(),
                    summary: summary.clone(),
                });
                return summary;
            }
        };

        let mut summary = JobSummary::default();
        for path in candidates {
            let outcome = self.reconciler.reconcile(&path, label).await;
            summary.record(&super::file_name(&path), outcome);
        }

        let elapsed = humantime::format_duration(std::time::Duration::from_millis(
            started.elapsed().as_millis() as u64,
        ));
        if summary.uploaded > 0 {
            info!(
                "Completed {} processing in {}. Uploaded: {} files",
                label, elapsed, summary.uploaded
            );
            ctx.sink.success(format!(
                "Completed {} processing. Uploaded: {} files",
                label, summary.uploaded
            ));
        } else {
            info!("Completed {} processing in {}. No new files to upload", label, elapsed);
            ctx.sink.success(format!(
                "Completed {} processing. No new files to upload",
                label
            ));
        }

        ctx.publish(SyncEvent::JobCompleted {
            source: label.to_string(),
            summary: summary.clone(),
        });
        summary
    }

    fn prepare(&self, folder: &Path) -> super::error::Result<Vec<PathBuf>> {
        if !folder.is_dir() {
            return Err(super::SyncError::FolderMissing(folder.to_path_buf()));
        }
        let archive = archive_dir(folder);
        std::fs::create_dir_all(&archive).map_err(|e| super::SyncError::io(&archive, e))?;
        Ok(self.scanner.list_candidates(folder)?.collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::reconciler::copy_preserving_mtime;
    use crate::sync::testing::{context, RecordingSink, ScriptedUploader};
    use crate::sync::{Severity, SyncEvent};
    use crate::uploader::UploadError;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn job() -> (Arc<ScriptedUploader>, Arc<RecordingSink>, SourceSyncJob) {
        let uploader = Arc::new(ScriptedUploader::default());
        let sink = Arc::new(RecordingSink::default());
        let reconciler = UploadReconciler::new(uploader.clone(), context(sink.clone()));
        (uploader, sink, SourceSyncJob::new(FolderScanner::new("fit"), reconciler))
    }

    #[tokio::test]
    async fn new_file_counted_archived_file_not_uploaded() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("uploaded");
        std::fs::create_dir_all(&archive).unwrap();
        std::fs::write(dir.path().join("ride1.fit"), b"new ride").unwrap();
        let ride2 = dir.path().join("ride2.fit");
        std::fs::write(&ride2, b"old ride").unwrap();
        copy_preserving_mtime(&ride2, &archive.join("ride2.fit")).unwrap();

        let (uploader, _sink, job) = job();
        let summary = job.run(dir.path(), "Wahoo").await;

        assert_eq!(summary.uploaded, 1);
        assert_eq!(summary.last_uploaded.as_deref(), Some("ride1.fit"));
        assert_eq!(summary.already_remote, 1);
        assert_eq!(uploader.calls(), vec!["ride1.fit"]);
        assert!(archive.join("ride1.fit").exists());
        assert!(!ride2.exists());
    }

    #[tokio::test]
    async fn conflict_is_archived_but_not_counted() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.fit"), b"x").unwrap();
        let (uploader, _sink, job) = job();
        uploader.respond("a.fit", Err(UploadError::new("HTTP Error 409 Conflict")));

        let summary = job.run(dir.path(), "Wahoo").await;

        assert_eq!(summary.uploaded, 0);
        assert_eq!(summary.last_uploaded, None);
        assert!(dir.path().join("uploaded").join("a.fit").exists());
        assert!(!dir.path().join("a.fit").exists());
    }

    #[tokio::test]
    async fn one_failure_does_not_abort_the_batch() {
        let dir = TempDir::new().unwrap();
        for name in ["1.fit", "2.fit", "3.fit"] {
            std::fs::write(dir.path().join(name), name.as_bytes()).unwrap();
        }
        let (uploader, _sink, job) = job();
        uploader.respond("2.fit", Err(UploadError::with_status(500, "boom")));

        let summary = job.run(dir.path(), "Wahoo").await;

        assert_eq!(summary.uploaded, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(uploader.calls().len(), 3);
        assert!(dir.path().join("2.fit").exists());
        assert!(dir.path().join("uploaded").join("1.fit").exists());
        assert!(dir.path().join("uploaded").join("3.fit").exists());
    }

    #[tokio::test]
    async fn second_run_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.fit"), b"x").unwrap();
        let (uploader, _sink, job) = job();

        let first = job.run(dir.path(), "Wahoo").await;
        let second = job.run(dir.path(), "Wahoo").await;

        assert_eq!(first.uploaded, 1);
        assert_eq!(second, JobSummary::default());
        assert_eq!(uploader.calls().len(), 1);
    }

    #[tokio::test]
    async fn locked_file_left_in_place_is_not_uploaded_again() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("ride.fit");
        std::fs::write(&file, b"x").unwrap();
        let uploader = Arc::new(ScriptedUploader::default());
        let sink = Arc::new(RecordingSink::default());
        let reconciler = UploadReconciler::new(uploader.clone(), context(sink.clone()))
            .with_rename(|_, _| Err(std::io::Error::from(std::io::ErrorKind::PermissionDenied)));
        let job = SourceSyncJob::new(FolderScanner::new("fit"), reconciler);

        let first = job.run(dir.path(), "Wahoo").await;
        assert_eq!(first.uploaded, 1);
        assert!(file.exists());
        assert!(dir.path().join("uploaded").join("ride.fit").exists());
        assert!(sink.contains(Severity::Warning, "File locked"));

        let second = job.run(dir.path(), "Wahoo").await;
        assert_eq!(second.uploaded, 0);
        assert_eq!(second.already_remote, 1);
        assert_eq!(uploader.calls().len(), 1);
    }

    #[tokio::test]
    async fn missing_folder_yields_zero_result() {
        let dir = TempDir::new().unwrap();
        let (uploader, sink, job) = job();

        let summary = job.run(&dir.path().join("nope"), "Wahoo").await;

        assert_eq!(summary, JobSummary::default());
        assert!(uploader.calls().is_empty());
        assert!(sink.contains(Severity::Error, "Error processing Wahoo folder"));
    }

    #[tokio::test]
    async fn completion_event_is_published() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.fit"), b"x").unwrap();
        let (_uploader, _sink, job) = job();
        let mut events = job.reconciler().context().events.subscribe();

        job.run(dir.path(), "Wahoo").await;

        let mut saw_upload = false;
        let mut saw_completion = false;
        while let Ok(event) = events.try_recv() {
            match event {
                SyncEvent::FileUploaded { file_name, .. } => saw_upload = file_name == "a.fit",
                SyncEvent::JobCompleted { summary, .. } => saw_completion = summary.uploaded == 1,
                SyncEvent::CacheBridged { .. } => {}
            }
        }
        assert!(saw_upload);
        assert!(saw_completion);
    }
}
