use crate::storage::{Storage, UploadRecord};
use crate::sync::poller::CycleReport;
use crate::sync::watcher::FolderGate;
use crate::sync::{
    FolderScanner, JobSummary, PollLoop, ProcessedSetStore, SourceSyncJob, StopSignal, SyncContext,
    StatusSink, SyncEvent, UploadReconciler, WatchLoop,
};
use crate::uploader::ActivityUploader;
use crate::utils::config::Config;
use crate::utils::log_buffer::{LogBuffer, LogEntry};
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub const WATCH_SOURCE: &str = "watched";

/// Owns the watcher, the cache poller and on-demand syncs for one configuration.
#[derive(Clone)]
pub struct UploaderService {
    config: Arc<Config>,
    storage: Storage,
    ctx: SyncContext,
    job: SourceSyncJob,
    poller: Option<PollLoop>,
    log_buffer: LogBuffer,
    gate: FolderGate,
    running: Arc<AtomicBool>,
    loops: Arc<Mutex<Option<RunningLoops>>>,
    recorder: Arc<Mutex<Option<Recorder>>>,
}

/// Watcher and poller of one start/stop cycle.
struct RunningLoops {
    stop: StopSignal,
    tasks: Vec<JoinHandle<()>>,
}

struct Recorder {
    stop: StopSignal,
    task: JoinHandle<()>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub running: bool,
    pub watch_folder: PathBuf,
    pub cache_folder: Option<PathBuf>,
    pub last_sync: Option<String>,
    pub last_upload: Option<UploadRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncNowReport {
    pub cache: Option<CycleReport>,
    pub summary: JobSummary,
}

impl UploaderService {
    pub fn new(config: Config, storage: Storage, uploader: Arc<dyn ActivityUploader>) -> Self {
        let log_buffer = LogBuffer::new(config.log_buffer_size);
        let ctx = SyncContext::new(Arc::new(log_buffer.clone()));
        let scanner = FolderScanner::new(config.extension.clone());
        let reconciler = UploadReconciler::new(uploader, ctx.clone());
        let job = SourceSyncJob::new(scanner.clone(), reconciler);

        let poller = config.cache_folder.as_ref().map(|cache_folder| {
            PollLoop::new(
                cache_folder,
                &config.watch_folder,
                &config.cache_archive_folder,
                scanner,
                ProcessedSetStore::new(&config.processed_file),
                ctx.clone(),
            )
            .with_interval(config.poll_interval())
            .with_bridge_delay(config.bridge_delay())
        });

        Self {
            config: Arc::new(config),
            storage,
            ctx,
            job,
            poller,
            log_buffer,
            gate: FolderGate::default(),
            running: Arc::new(AtomicBool::new(false)),
            loops: Arc::new(Mutex::new(None)),
            recorder: Arc::new(Mutex::new(None)),
        }
    }

    /// Spawn the watcher and (when configured) the poller with a fresh stop
    /// signal. Returns `false` if they are already running.
    pub fn start(&self) -> bool {
        let mut loops = self.loops.lock();
        if loops.is_some() {
            warn!("Uploader already running");
            return false;
        }

        info!("Starting uploader for {}", self.config.watch_folder.display());
        self.ensure_recorder();

        let stop = StopSignal::new();
        let mut tasks = Vec::new();

        let watcher = WatchLoop::new(
            self.config.watch_folder.clone(),
            WATCH_SOURCE,
            self.job.clone(),
            stop.clone(),
        )
        .with_grace_period(self.config.grace_period())
        .with_rescan_interval(self.config.rescan_interval())
        .with_gate(self.gate.clone());
        tasks.push(watcher.spawn());

        if let Some(poller) = &self.poller {
            tasks.push(poller.clone().with_stop(stop.clone()).spawn());
        }

        *loops = Some(RunningLoops { stop, tasks });
        self.running.store(true, Ordering::SeqCst);
        self.log_buffer.info("Auto-sync started".to_string());
        true
    }

    /// Halt the watcher and poller and wait for them. History recording and
    /// on-demand syncs keep working; `start` may be called again afterwards.
    /// Returns `false` if nothing was running.
    pub async fn stop(&self) -> bool {
        let loops = self.loops.lock().take();
        let Some(loops) = loops else {
            return false;
        };

        info!("Stopping uploader");
        self.running.store(false, Ordering::SeqCst);
        loops.stop.stop();
        for task in loops.tasks {
            join_task(task).await;
        }
        self.log_buffer.info("Auto-sync stopped".to_string());
        true
    }

    /// One cache poll (if configured) followed by a full pass over the watched folder.
    pub async fn sync_now(&self) -> SyncNowReport {
        info!("Manual sync requested");
        self.ensure_recorder();
        let cache = match &self.poller {
            Some(poller) if poller.cache_folder().is_dir() => Some(poller.cycle().await),
            _ => None,
        };

        let summary = {
            let _guard = self.gate.lock().await;
            self.job.run(&self.config.watch_folder, WATCH_SOURCE).await
        };

        if summary.uploaded > 0 {
            self.log_buffer.success(format!(
                "Sync complete! Uploaded {} activities",
                summary.uploaded
            ));
        } else {
            self.log_buffer
                .info("Sync complete - no new activities found".to_string());
        }

        SyncNowReport { cache, summary }
    }

    pub async fn status(&self) -> ServiceStatus {
        let last_sync = match self.storage.last_sync().await {
            Ok(ts) => ts.and_then(format_timestamp),
            Err(e) => {
                warn!("Could not read last sync time: {}", e);
                None
            }
        };
        let last_upload = match self.storage.last_upload().await {
            Ok(upload) => upload,
            Err(e) => {
                warn!("Could not read last upload: {}", e);
                None
            }
        };

        ServiceStatus {
            running: self.running.load(Ordering::SeqCst),
            watch_folder: self.config.watch_folder.clone(),
            cache_folder: self.config.cache_folder.clone(),
            last_sync,
            last_upload,
        }
    }

    pub fn get_logs(&self, limit: Option<usize>) -> Vec<LogEntry> {
        self.log_buffer.get_logs(limit)
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Stop the loops, then the history recorder, so events published by the
    /// loops on their way out are still kept.
    pub async fn shutdown(&self) {
        self.stop().await;

        let recorder = self.recorder.lock().take();
        if let Some(recorder) = recorder {
            recorder.stop.stop();
            join_task(recorder.task).await;
        }
    }

    fn ensure_recorder(&self) {
        let mut recorder = self.recorder.lock();
        if recorder.is_none() {
            let stop = StopSignal::new();
            let task = tokio::spawn(record_history(
                self.ctx.events.subscribe(),
                self.storage.clone(),
                stop.clone(),
            ));
            *recorder = Some(Recorder { stop, task });
        }
    }
}

async fn join_task(task: JoinHandle<()>) {
    match tokio::time::timeout(Duration::from_secs(5), task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Sync task ended abnormally: {}", e),
        Err(_) => warn!("Sync task did not stop in time"),
    }
}

async fn record_history(
    mut rx: tokio::sync::broadcast::Receiver<SyncEvent>,
    storage: Storage,
    stop: StopSignal,
) {
    loop {
        let event = tokio::select! {
            _ = stop.stopped() => break,
            event = rx.recv() => event,
        };
        match event {
            Ok(event) => store_event(&storage, event).await,
            Err(RecvError::Lagged(missed)) => warn!("History recorder missed {} events", missed),
            Err(RecvError::Closed) => return,
        }
    }

    // Whatever was already published before the stop.
    while let Ok(event) = rx.try_recv() {
        store_event(&storage, event).await;
    }
}

async fn store_event(storage: &Storage, event: SyncEvent) {
    let now = Utc::now().timestamp();
    let result = match event {
        SyncEvent::JobCompleted { source, summary } => {
            storage.record_run(&source, &summary, now).await.map(|_| ())
        }
        SyncEvent::FileUploaded { source, file_name } => {
            storage.record_upload(&source, &file_name, now).await
        }
        SyncEvent::CacheBridged { file_name } => {
            debug!("Bridged {} from cache folder", file_name);
            Ok(())
        }
    };
    if let Err(e) = result {
        warn!("Could not record sync history: {}", e);
    }
}

fn format_timestamp(ts: i64) -> Option<String> {
    Utc.timestamp_opt(ts, 0)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
}
