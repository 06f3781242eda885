use super::reconciler::copy_preserving_mtime;
use super::{
    archive_dir, file_name, signature, FolderScanner, ProcessedSet, ProcessedSetStore, StopSignal,
    SyncContext, SyncEvent,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(300);
pub const DEFAULT_BRIDGE_DELAY: Duration = Duration::from_secs(1);

/// What one polling cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// New versions copied into the watched folder.
    pub bridged: usize,
    /// Originals copied into the local already-handled cache.
    pub cached: usize,
}

/// Polls a single-slot cache folder that another application overwrites in place.
///
/// New versions (by signature) are copied into the watched folder where the
/// watcher uploads them. The cache folder itself is only ever read.
#[derive(Clone)]
pub struct PollLoop {
    cache_folder: PathBuf,
    watch_folder: PathBuf,
    handled_folder: PathBuf,
    scanner: FolderScanner,
    store: ProcessedSetStore,
    processed: Arc<Mutex<ProcessedSet>>,
    ctx: SyncContext,
    interval: Duration,
    bridge_delay: Duration,
    stop: StopSignal,
}

impl PollLoop {
    pub fn new(
        cache_folder: impl Into<PathBuf>,
        watch_folder: impl Into<PathBuf>,
        handled_folder: impl Into<PathBuf>,
        scanner: FolderScanner,
        store: ProcessedSetStore,
        ctx: SyncContext,
    ) -> Self {
        let processed = store.load();
        debug!("Loaded {} processed signatures from {}", processed.len(), store.path().display());
        Self {
            cache_folder: cache_folder.into(),
            watch_folder: watch_folder.into(),
            handled_folder: handled_folder.into(),
            scanner,
            store,
            processed: Arc::new(Mutex::new(processed)),
            ctx,
            interval: DEFAULT_POLL_INTERVAL,
            bridge_delay: DEFAULT_BRIDGE_DELAY,
            stop: StopSignal::new(),
        }
    }

    /// Signal that ends `run` and cuts a cycle short. Clones share the
    /// processed set, so each run can get its own signal.
    pub fn with_stop(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_bridge_delay(mut self, delay: Duration) -> Self {
        self.bridge_delay = delay;
        self
    }

    pub fn cache_folder(&self) -> &Path {
        &self.cache_folder
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(self) {
        if !self.cache_folder.is_dir() {
            info!(
                "Cache folder not found, skipping sync: {}",
                self.cache_folder.display()
            );
            return;
        }

        info!("Monitoring cache folder: {}", self.cache_folder.display());
        self.ctx
            .sink
            .info(format!("Monitoring cache folder: {}", self.cache_folder.display()));

        loop {
            if self.stop.is_stopped() {
                break;
            }
            self.cycle().await;
            if !self.stop.sleep(self.interval).await {
                break;
            }
        }

        info!("Stopped monitoring {}", self.cache_folder.display());
    }

    /// One pass: bridge unseen versions, then cache originals that finished uploading.
    /// Errors are logged; the next cycle tries again.
    pub async fn cycle(&self) -> CycleReport {
        let mut processed = self.processed.lock().await;
        let mut report = CycleReport::default();

        let candidates: Vec<PathBuf> = match self.scanner.list_candidates(&self.cache_folder) {
            Ok(candidates) => candidates.collect(),
            Err(e) => {
                error!("Error while monitoring cache folder: {}", e);
                self.ctx
                    .sink
                    .error(format!("Error while monitoring cache folder: {}", e));
                return report;
            }
        };

        for path in &candidates {
            if self.stop.is_stopped() {
                return report;
            }
            if self.bridge(path, &mut processed).await {
                report.bridged += 1;
            }
        }

        let uploaded = archive_dir(&self.watch_folder);
        for path in &candidates {
            let name = file_name(path);
            if uploaded.join(&name).is_file() && self.cache_handled(path, &name) {
                report.cached += 1;
            }
        }

        report
    }

    async fn bridge(&self, path: &Path, processed: &mut ProcessedSet) -> bool {
        let sig = signature(path);
        if processed.contains(&sig) {
            return false;
        }

        let name = file_name(path);
        info!("Found new version: {}", name);
        self.ctx.sink.info(format!("Found: {}", name));

        let dest = self.watch_folder.join(&name);
        if let Err(e) = copy_preserving_mtime(path, &dest) {
            warn!("Could not copy file {}: {}", name, e);
            self.ctx
                .sink
                .warning(format!("Could not copy file {}: {}", name, e));
            return false;
        }
        debug!("Copied {} into {}", name, self.watch_folder.display());

        // Let the watcher see the new file before moving on.
        self.stop.sleep(self.bridge_delay).await;

        processed.insert(sig);
        if let Err(e) = self.store.save(processed) {
            warn!("Could not write processed file list: {}", e);
            self.ctx
                .sink
                .warning(format!("Could not write processed file list: {}", e));
        }

        self.ctx.publish(SyncEvent::CacheBridged { file_name: name });
        true
    }

    fn cache_handled(&self, path: &Path, name: &str) -> bool {
        let dest = self.handled_folder.join(name);
        if dest.is_file() && signature(&dest) == signature(path) {
            return false;
        }

        let result = std::fs::create_dir_all(&self.handled_folder)
            .and_then(|_| copy_preserving_mtime(path, &dest));
        match result {
            Ok(()) => {
                info!("Cache file archived locally: {}", name);
                true
            }
            Err(e) => {
                warn!("Could not cache file {}: {}", name, e);
                false
            }
        }
    }
}
