use super::{has_extension, ARCHIVE_DIR_NAME};
use super::error::{Result, SyncError};
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Lists candidate activity files directly inside a folder.
///
/// Never mutates anything. Each call re-reads the directory, so calling it
/// again after files moved yields the current state.
#[derive(Debug, Clone)]
pub struct FolderScanner {
    extension: String,
}

impl FolderScanner {
    pub fn new(extension: impl Into<String>) -> Self {
        Self {
            extension: extension.into(),
        }
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Whether a single path looks like a candidate (used for watch events).
    pub fn is_candidate(&self, path: &Path) -> bool {
        has_extension(path, &self.extension)
            && path.file_name().map(|n| n != ARCHIVE_DIR_NAME).unwrap_or(false)
    }

    pub fn list_candidates(&self, folder: &Path) -> Result<impl Iterator<Item = PathBuf> + '_> {
        if !folder.is_dir() {
            return Err(SyncError::FolderMissing(folder.to_path_buf()));
        }

        // Symlinks are followed so a link to a regular file counts as one,
        // while a link to a directory is dropped by the is_file check.
        let entries = WalkDir::new(folder)
            .min_depth(1)
            .max_depth(1)
            .follow_links(true)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    debug!("Skipping unreadable entry: {}", e);
                    None
                }
            })
            .filter(|entry| entry.file_name() != ARCHIVE_DIR_NAME)
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(move |path| has_extension(path, &self.extension));

        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn names(scanner: &FolderScanner, folder: &Path) -> Vec<String> {
        let mut names: Vec<String> = scanner
            .list_candidates(folder)
            .unwrap()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn lists_only_matching_regular_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.fit"), b"1").unwrap();
        std::fs::write(dir.path().join("B.FIT"), b"2").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"3").unwrap();
        std::fs::create_dir(dir.path().join("folder.fit")).unwrap();
        std::fs::create_dir(dir.path().join(ARCHIVE_DIR_NAME)).unwrap();
        std::fs::write(dir.path().join(ARCHIVE_DIR_NAME).join("old.fit"), b"4").unwrap();

        let scanner = FolderScanner::new("fit");
        assert_eq!(names(&scanner, dir.path()), vec!["B.FIT", "a.fit"]);
    }

    #[test]
    fn relisting_reflects_current_state() {
        let dir = TempDir::new().unwrap();
        let scanner = FolderScanner::new("fit");
        std::fs::write(dir.path().join("a.fit"), b"1").unwrap();
        assert_eq!(names(&scanner, dir.path()), vec!["a.fit"]);

        std::fs::remove_file(dir.path().join("a.fit")).unwrap();
        std::fs::write(dir.path().join("b.fit"), b"1").unwrap();
        assert_eq!(names(&scanner, dir.path()), vec!["b.fit"]);
    }

    #[test]
    fn missing_folder_is_an_error() {
        let dir = TempDir::new().unwrap();
        let scanner = FolderScanner::new("fit");
        let result = scanner.list_candidates(&dir.path().join("gone"));
        assert!(matches!(result, Err(SyncError::FolderMissing(_))));
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_directories_are_excluded() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("real");
        std::fs::create_dir(&target).unwrap();
        std::os::unix::fs::symlink(&target, dir.path().join("link.fit")).unwrap();
        std::fs::write(dir.path().join("ride.fit"), b"1").unwrap();

        let scanner = FolderScanner::new("fit");
        assert_eq!(names(&scanner, dir.path()), vec!["ride.fit"]);
    }

    #[test]
    fn candidate_check_for_single_paths() {
        let scanner = FolderScanner::new("fit");
        assert!(scanner.is_candidate(Path::new("/w/ride.Fit")));
        assert!(!scanner.is_candidate(Path::new("/w/ride.gpx")));
    }
}
