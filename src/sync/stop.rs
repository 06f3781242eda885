use std::time::Duration;
use tokio::sync::watch;

/// Longest uninterrupted sleep before the stop flag is looked at again.
const STOP_TICK: Duration = Duration::from_millis(500);

/// Cooperative stop flag shared between the loops and whoever owns them.
///
/// `stop` may be called from any thread.
#[derive(Clone)]
pub struct StopSignal {
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx, rx }
    }

    pub fn stop(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Sleep for `duration` in short ticks. Returns `false` if stopped early.
    pub async fn sleep(&self, duration: Duration) -> bool {
        let mut rx = self.rx.clone();
        let deadline = tokio::time::Instant::now() + duration;

        loop {
            if *rx.borrow_and_update() {
                return false;
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return true;
            }
            let tick = std::cmp::min(deadline - now, STOP_TICK);
            tokio::select! {
                _ = rx.changed() => {}
                _ = tokio::time::sleep(tick) => {}
            }
        }
    }

    /// Resolves once `stop` has been called.
    pub async fn stopped(&self) {
        let mut rx = self.rx.clone();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}
