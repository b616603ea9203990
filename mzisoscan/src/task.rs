//! A shareable descriptor of a running scan: status, progress, message and cancellation
use std::fmt::Display;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TaskStatus {
    #[default]
    Waiting,
    Processing,
    Finished,
    Error,
    Canceled,
}

impl TaskStatus {
    /// Whether the task has stopped, successfully or not
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Finished | Self::Error | Self::Canceled)
    }
}

impl Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Tracks one scan run. Share it behind an `Arc` to poll progress or cancel from another thread.
#[derive(Debug, Default)]
pub struct ScanTask {
    status: RwLock<TaskStatus>,
    message: Mutex<String>,
    processed: AtomicUsize,
    total: AtomicUsize,
    canceled: AtomicBool,
}

impl ScanTask {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> TaskStatus {
        self.status.read().map(|s| *s).unwrap_or(TaskStatus::Error)
    }

    pub fn set_status(&self, status: TaskStatus) {
        if let Ok(mut s) = self.status.write() {
            // A canceled task stays canceled
            if *s != TaskStatus::Canceled || status == TaskStatus::Canceled {
                *s = status;
            }
        }
    }

    pub fn message(&self) -> String {
        self.message.lock().map(|m| m.clone()).unwrap_or_default()
    }

    pub fn set_message(&self, message: impl Into<String>) {
        if let Ok(mut m) = self.message.lock() {
            *m = message.into();
        }
    }

    /// Mark the task as failed with `message`
    pub fn fail(&self, message: impl Into<String>) {
        self.set_message(message);
        self.set_status(TaskStatus::Error);
    }

    /// Request cancellation. Workers notice it before their next pivot.
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::Release);
        self.set_status(TaskStatus::Canceled);
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }

    pub(crate) fn begin(&self, total: usize) {
        self.processed.store(0, Ordering::Release);
        self.total.store(total, Ordering::Release);
        self.set_status(TaskStatus::Processing);
    }

    /// Record one more processed row
    pub(crate) fn advance(&self) -> usize {
        self.processed.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn processed(&self) -> usize {
        self.processed.load(Ordering::Acquire)
    }

    /// The fraction of rows processed so far, in `[0, 1]`
    pub fn progress(&self) -> f64 {
        let total = self.total.load(Ordering::Acquire);
        if total == 0 {
            return if self.status() == TaskStatus::Finished { 1.0 } else { 0.0 };
        }
        (self.processed() as f64 / total as f64).min(1.0)
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn test_progress_across_threads() {
        let task = Arc::new(ScanTask::new());
        task.begin(400);
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let task = task.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        task.advance();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(task.processed(), 400);
        assert_eq!(task.progress(), 1.0);
        assert_eq!(task.status(), TaskStatus::Processing);
    }

    #[test]
    fn test_cancel_is_sticky() {
        let task = ScanTask::new();
        assert_eq!(task.status(), TaskStatus::Waiting);
        task.cancel();
        task.set_status(TaskStatus::Finished);
        assert!(task.is_canceled());
        assert_eq!(task.status(), TaskStatus::Canceled);
        assert!(task.status().is_done());
    }

    #[test]
    fn test_fail() {
        let task = ScanTask::new();
        task.fail("bad charge");
        assert_eq!(task.status(), TaskStatus::Error);
        assert_eq!(task.message(), "bad charge");
    }
}
