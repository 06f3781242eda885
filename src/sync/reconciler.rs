use super::{archive_dir, file_name, signature, ActivityFile, SyncContext, SyncEvent, SyncOutcome};
use crate::uploader::{ActivityUploader, FailureKind};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Where a finished file ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Moved,
    /// Original was locked and stays in place; a copy sits in the archive.
    Copied,
}

/// Uploads one file and settles its local placement.
///
/// ```text
/// candidate --upload ok-------------> uploaded ------> archived
/// candidate --conflict--------------> already remote -> archived
/// candidate --same signature archived-> already remote -> archived
/// candidate --other error-----------> failed (left in place)
/// ```
#[derive(Clone)]
pub struct UploadReconciler {
    uploader: Arc<dyn ActivityUploader>,
    ctx: SyncContext,
    rename: RenameFn,
}

/// Moves a file; swapped out in tests to simulate locks.
pub type RenameFn = fn(&Path, &Path) -> io::Result<()>;

impl UploadReconciler {
    pub fn new(uploader: Arc<dyn ActivityUploader>, ctx: SyncContext) -> Self {
        Self {
            uploader,
            ctx,
            rename: rename_file,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_rename(mut self, rename: RenameFn) -> Self {
        self.rename = rename;
        self
    }

    pub fn context(&self) -> &SyncContext {
        &self.ctx
    }

    pub async fn reconcile(&self, path: &Path, source: &str) -> SyncOutcome {
        let name = file_name(path);
        let folder = match path.parent() {
            Some(folder) => folder.to_path_buf(),
            None => {
                warn!("{} has no parent folder, skipping", path.display());
                return SyncOutcome::Skipped;
            }
        };
        let archive = archive_dir(&folder);

        if is_missing(path) {
            debug!("{} vanished before upload", path.display());
            self.ctx.sink.info(format!("Skipped {}: no longer present", name));
            return SyncOutcome::Skipped;
        }

        if is_already_archived(path, &archive) {
            info!("{} already archived with the same signature, not uploading", name);
            self.ctx
                .sink
                .info(format!("Already uploaded earlier: {}", name));
            self.dispose(path, &archive).await;
            return SyncOutcome::AlreadyRemote;
        }

        info!("Uploading file: {} from {}", name, source);
        self.ctx.sink.info(format!("Uploading {}...", name));

        match self.uploader.upload(path).await {
            Ok(()) => {
                info!("Successfully uploaded: {}", name);
                self.ctx.sink.success(format!("Successfully uploaded: {}", name));
                self.ctx.publish(SyncEvent::FileUploaded {
                    source: source.to_string(),
                    file_name: name.clone(),
                });
                self.dispose(path, &archive).await;
                SyncOutcome::Uploaded
            }
            Err(e) => match self.uploader.classify(&e) {
                FailureKind::Conflict => {
                    info!("File already uploaded (409 conflict): {}", name);
                    self.ctx
                        .sink
                        .info(format!("File already uploaded (409 conflict): {}", name));
                    self.dispose(path, &archive).await;
                    SyncOutcome::AlreadyRemote
                }
                FailureKind::Other if is_missing(path) => {
                    debug!("{} vanished during upload: {}", path.display(), e);
                    SyncOutcome::Skipped
                }
                FailureKind::Other => {
                    error!("Failed to upload {}: {}", name, e);
                    self.ctx
                        .sink
                        .error(format!("Failed to upload {}: {}", name, e));
                    SyncOutcome::Failed
                }
            },
        }
    }

    async fn dispose(&self, path: &Path, archive: &Path) {
        let src = path.to_path_buf();
        let dest_dir = archive.to_path_buf();
        let name = file_name(path);
        let rename = self.rename;

        let result =
            tokio::task::spawn_blocking(move || move_or_copy_with(&src, &dest_dir, rename)).await;
        match result {
            Ok(Ok(Disposition::Moved)) => {
                info!("Moved {} to uploaded folder", name);
            }
            Ok(Ok(Disposition::Copied)) => {
                warn!("File locked, copied instead of moved: {}", name);
                self.ctx
                    .sink
                    .warning(format!("File locked, copied instead of moved: {}", name));
            }
            Ok(Err(e)) if e.kind() == io::ErrorKind::NotFound => {
                debug!("{} disappeared before it could be archived", name);
            }
            Ok(Err(e)) => {
                warn!("Could not archive {}: {}", name, e);
                self.ctx
                    .sink
                    .warning(format!("Could not archive {}: {}", name, e));
            }
            Err(e) => {
                error!("Archive task for {} panicked: {}", name, e);
            }
        }
    }
}

fn rename_file(from: &Path, to: &Path) -> io::Result<()> {
    std::fs::rename(from, to)
}

/// Move `src` into `archive_dir` under its own name; copy when the source is locked.
pub fn move_or_copy(src: &Path, archive_dir: &Path) -> io::Result<Disposition> {
    move_or_copy_with(src, archive_dir, rename_file)
}

pub fn move_or_copy_with(src: &Path, archive_dir: &Path, rename: RenameFn) -> io::Result<Disposition> {
    std::fs::create_dir_all(archive_dir)?;
    let dest = archive_target(src, archive_dir)?;

    match rename(src, &dest) {
        Ok(()) => Ok(Disposition::Moved),
        Err(e) if is_locked(&e) => {
            copy_preserving_mtime(src, &dest)?;
            Ok(Disposition::Copied)
        }
        Err(e) => Err(e),
    }
}

/// Copy keeping the modification time so signatures of both copies agree.
pub fn copy_preserving_mtime(src: &Path, dest: &Path) -> io::Result<()> {
    let modified = std::fs::metadata(src)?.modified()?;
    std::fs::copy(src, dest)?;
    std::fs::File::options()
        .write(true)
        .open(dest)?
        .set_modified(modified)
}

/// Locked by another process (Windows sharing/lock violations included).
pub fn is_locked(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::PermissionDenied | io::ErrorKind::ResourceBusy
    ) || (cfg!(windows) && matches!(e.raw_os_error(), Some(32) | Some(33)))
}

fn archive_target(src: &Path, archive_dir: &Path) -> io::Result<PathBuf> {
    src.file_name()
        .map(|name| archive_dir.join(name))
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))
}

fn is_missing(path: &Path) -> bool {
    matches!(std::fs::metadata(path), Err(e) if e.kind() == io::ErrorKind::NotFound)
}

fn is_already_archived(path: &Path, archive: &Path) -> bool {
    let Ok(archived) = archive_target(path, archive) else {
        return false;
    };
    if !archived.is_file() {
        return false;
    }
    ActivityFile::from_path(path).signature() == signature(&archived)
}
