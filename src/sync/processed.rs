use super::error::{Result, SyncError};
use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Signatures already handed off from a source that cannot be moved out of.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessedSet {
    signatures: BTreeSet<String>,
}

impl ProcessedSet {
    pub fn contains(&self, signature: &str) -> bool {
        self.signatures.contains(signature)
    }

    /// Returns `true` if the signature was not already present.
    pub fn insert(&mut self, signature: impl Into<String>) -> bool {
        self.signatures.insert(signature.into())
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    /// Sorted iteration.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.signatures.iter().map(String::as_str)
    }
}

impl FromIterator<String> for ProcessedSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            signatures: iter.into_iter().collect(),
        }
    }
}

/// Line-oriented store: one signature per line, sorted, UTF-8.
/// Single writer only.
#[derive(Debug, Clone)]
pub struct ProcessedSetStore {
    path: PathBuf,
}

impl ProcessedSetStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing or unreadable files yield an empty set.
    pub fn load(&self) -> ProcessedSet {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No processed list at {}, starting empty", self.path.display());
                return ProcessedSet::default();
            }
            Err(e) => {
                warn!("Could not read processed list {}: {}", self.path.display(), e);
                return ProcessedSet::default();
            }
        };

        contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Full rewrite through a temporary sibling file, then rename over the target.
    pub fn save(&self, set: &ProcessedSet) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| self.persist_error(e))?;
            }
        }

        let tmp = self.path.with_extension("tmp");
        let write = || -> std::io::Result<()> {
            let mut file = std::fs::File::create(&tmp)?;
            for signature in set.iter() {
                writeln!(file, "{}", signature)?;
            }
            file.sync_all()?;
            std::fs::rename(&tmp, &self.path)
        };

        write().map_err(|e| self.persist_error(e))
    }

    fn persist_error(&self, source: std::io::Error) -> SyncError {
        SyncError::Persist {
            path: self.path.clone(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let store = ProcessedSetStore::new(dir.path().join("processed.txt"));
        assert!(store.load().is_empty());
    }

    #[test]
    fn save_writes_sorted_newline_terminated_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state").join("processed.txt");
        let store = ProcessedSetStore::new(&path);

        let mut set = ProcessedSet::default();
        set.insert("b.fit_2_20");
        set.insert("a.fit_1_10");
        assert!(!set.insert("a.fit_1_10"));
        store.save(&set).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert_eq!(raw, "a.fit_1_10\nb.fit_2_20\n");
        assert_eq!(store.load(), set);
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn blank_lines_and_whitespace_are_ignored() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("processed.txt");
        std::fs::write(&path, "\n  x.fit_1_1  \n\ny.fit_2_2\n").unwrap();

        let set = ProcessedSetStore::new(&path).load();
        assert_eq!(set.len(), 2);
        assert!(set.contains("x.fit_1_1"));
        assert!(set.contains("y.fit_2_2"));
    }

    #[test]
    fn corrupt_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("processed.txt");
        std::fs::write(&path, [0xff, 0xfe, 0x00, 0x80]).unwrap();
        assert!(ProcessedSetStore::new(&path).load().is_empty());
    }

    #[test]
    fn save_into_unwritable_location_reports_persist_error() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"file, not a dir").unwrap();
        let store = ProcessedSetStore::new(blocker.join("processed.txt"));

        let err = store.save(&ProcessedSet::default()).unwrap_err();
        assert!(matches!(err, SyncError::Persist { .. }));
    }
}
