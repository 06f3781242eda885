use super::{SourceSyncJob, StopSignal};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Serializes work on one folder between the watcher and on-demand syncs.
pub type FolderGate = Arc<Mutex<()>>;

pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(1);

/// Event-driven sync of a continuously synced folder.
///
/// Does a full pass on start, then reacts to new files. A periodic full pass
/// picks up anything left behind by failed uploads.
pub struct WatchLoop {
    folder: PathBuf,
    label: String,
    job: SourceSyncJob,
    grace_period: Duration,
    rescan_interval: Option<Duration>,
    gate: FolderGate,
    stop: StopSignal,
}

impl WatchLoop {
    pub fn new(folder: impl Into<PathBuf>, label: impl Into<String>, job: SourceSyncJob, stop: StopSignal) -> Self {
        Self {
            folder: folder.into(),
            label: label.into(),
            job,
            grace_period: DEFAULT_GRACE_PERIOD,
            rescan_interval: None,
            gate: FolderGate::default(),
            stop,
        }
    }

    /// Wait after a creation event so the external sync client can finish writing.
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn with_rescan_interval(mut self, interval: Option<Duration>) -> Self {
        self.rescan_interval = interval.filter(|d| !d.is_zero());
        self
    }

    pub fn with_gate(mut self, gate: FolderGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(self) {
        self.ctx_info(format!("Checking existing files in {}", self.folder.display()));
        self.full_pass().await;
        if self.stop.is_stopped() {
            return;
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        // Keep the watcher alive for the whole loop.
        let _watcher = match self.start_watcher(tx) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                error!("Failed to watch {}: {}", self.folder.display(), e);
                self.job
                    .reconciler()
                    .context()
                    .sink
                    .error(format!("Failed to watch {}: {}", self.folder.display(), e));
                if self.rescan_interval.is_none() {
                    return;
                }
                None
            }
        };
        self.ctx_info(format!("Watching folder: {}", self.folder.display()));

        let mut rescan = self.rescan_interval.map(|every| {
            let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        let mut events_open = true;
        loop {
            if !events_open && rescan.is_none() {
                break;
            }
            tokio::select! {
                _ = self.stop.stopped() => break,
                maybe_event = rx.recv(), if events_open => match maybe_event {
                    Some(Ok(event)) => self.handle_event(event).await,
                    Some(Err(e)) => warn!("Watch error on {}: {}", self.folder.display(), e),
                    None => {
                        warn!("Watcher channel closed for {}", self.folder.display());
                        events_open = false;
                    }
                },
                _ = next_tick(&mut rescan) => {
                    debug!("Periodic rescan of {}", self.folder.display());
                    self.full_pass().await;
                }
            }
        }

        info!("Stopped watching {}", self.folder.display());
    }

    fn start_watcher(
        &self,
        tx: mpsc::UnboundedSender<notify::Result<Event>>,
    ) -> notify::Result<RecommendedWatcher> {
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = tx.send(res);
        })?;
        watcher.watch(&self.folder, RecursiveMode::NonRecursive)?;
        Ok(watcher)
    }

    async fn full_pass(&self) {
        let _guard = self.gate.lock().await;
        self.job.run(&self.folder, &self.label).await;
    }

    async fn handle_event(&self, event: Event) {
        for path in created_paths(&event) {
            // The watch is non-recursive, so only the name matters. Rebasing onto
            // our own folder path hides platform differences in reported paths.
            let Some(name) = path.file_name() else {
                continue;
            };
            let path = self.folder.join(name);
            if !self.job.scanner().is_candidate(&path) {
                continue;
            }

            info!("New file detected: {}", path.display());
            self.ctx_info(format!("New file detected: {}", path.display()));

            if !self.stop.sleep(self.grace_period).await {
                return;
            }

            let _guard = self.gate.lock().await;
            // A repeated event for a file a previous event already archived.
            if !path.exists() {
                debug!("{} already handled", path.display());
                continue;
            }
            self.job.reconciler().reconcile(&path, &self.label).await;
        }
    }

    fn ctx_info(&self, message: String) {
        self.job.reconciler().context().sink.info(message);
    }
}

/// Paths that newly appeared: plain creations plus renames into the folder.
///
/// inotify follows every `To` of a paired rename with a `Both` for the same
/// destination, so `Both` is ignored. FSEvents only reports `Any`, which covers
/// both ends of a rename; the end that still exists is the new name.
fn created_paths(event: &Event) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = match event.kind {
        EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            event.paths.clone()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Any)) => {
            event.paths.iter().filter(|p| p.exists()).cloned().collect()
        }
        _ => Vec::new(),
    };
    paths.dedup();
    paths
}

async fn next_tick(rescan: &mut Option<Interval>) {
    match rescan {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
