use log::info;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Progress and cancellation reporting for a build cycle.
pub trait ProgressMonitor: Send + Sync {
    fn begin(&self, _task: &str, _total_work: u32) {}

    /// Names the step currently running.
    fn sub_task(&self, name: &str);

    fn worked(&self, units: u32);

    /// Cancellation requested by whoever watches the progress.
    fn is_canceled(&self) -> bool {
        false
    }

    fn done(&self) {}
}

#[derive(Debug, Default)]
pub struct NullProgress;

impl ProgressMonitor for NullProgress {
    fn sub_task(&self, _name: &str) {}
    fn worked(&self, _units: u32) {}
}

/// Writes each step to the log as `[done/total] name`.
#[derive(Debug, Default)]
pub struct LogProgress {
    total: AtomicU32,
    done: AtomicU32,
    canceled: AtomicBool,
}

impl LogProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }

    pub fn completed(&self) -> u32 {
        self.done.load(Ordering::SeqCst)
    }
}

impl ProgressMonitor for LogProgress {
    fn begin(&self, task: &str, total_work: u32) {
        self.total.store(total_work, Ordering::SeqCst);
        self.done.store(0, Ordering::SeqCst);
        info!("{}", task);
    }

    fn sub_task(&self, name: &str) {
        info!(
            "[{}/{}] {}",
            self.done.load(Ordering::SeqCst) + 1,
            self.total.load(Ordering::SeqCst).max(1),
            name
        );
    }

    fn worked(&self, units: u32) {
        self.done.fetch_add(units, Ordering::SeqCst);
    }

    fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_progress_counts() {
        let progress = LogProgress::new();
        progress.begin("build", 3);
        progress.sub_task("latex");
        progress.worked(1);
        progress.worked(1);
        assert_eq!(progress.completed(), 2);
        assert!(!progress.is_canceled());
        progress.cancel();
        assert!(progress.is_canceled());
    }
}
