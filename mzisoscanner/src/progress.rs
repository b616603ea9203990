use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use mzisoscan::ScanTask;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Periodically logs the progress of a [`ScanTask`] from a background thread
pub struct ProgressWatcher {
    done: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ProgressWatcher {
    pub fn spawn(task: Arc<ScanTask>, report_every: Duration) -> Self {
        let done = Arc::new(AtomicBool::new(false));
        let flag = done.clone();
        let handle = thread::spawn(move || {
            let mut last_report = Instant::now();
            while !flag.load(Ordering::Acquire) && !task.status().is_done() {
                thread::sleep(POLL_INTERVAL);
                if last_report.elapsed() >= report_every {
                    info!(
                        "{}: {} rows ({:0.1}%)",
                        task.message(),
                        task.processed(),
                        task.progress() * 100.0
                    );
                    last_report = Instant::now();
                }
            }
        });
        Self {
            done,
            handle: Some(handle),
        }
    }

    /// Stop watching and wait for the watcher thread to exit
    pub fn finish(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.done.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.join() {
                warn!("Failed to join progress watcher: {e:?}");
            }
        }
    }
}

impl Drop for ProgressWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}
