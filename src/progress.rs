use crate::model::OperationOutcome;

/// Progress reporting for long-running automation passes. Frontends
/// implement this to surface status; the core calls it at every phase
/// transition and per-item completion. All methods are infallible — a sink
/// that cannot deliver must swallow the problem rather than disturb the run.
pub trait Progress {
    /// Called once at the start with the number of desired items.
    fn begin(&mut self, _total: usize) {}

    /// Free-form status line for human eyes.
    fn log(&mut self, _msg: &str) {}

    /// Called when one desired item reaches a terminal status.
    fn item_done(&mut self, _outcome: &OperationOutcome) {}

    /// Called at the end, successful or not.
    fn finish(&mut self) {}
}

/// A no-op progress sink.
pub struct NullProgress;

impl Progress for NullProgress {}

/// Sink that forwards status lines to the `log` crate at info level and
/// item completions at debug level.
#[derive(Default)]
pub struct LogProgress {
    done: usize,
    total: usize,
}

impl Progress for LogProgress {
    fn begin(&mut self, total: usize) {
        self.total = total;
        self.done = 0;
    }

    fn log(&mut self, msg: &str) {
        log::info!("{}", msg);
    }

    fn item_done(&mut self, outcome: &OperationOutcome) {
        self.done += 1;
        log::debug!(
            "item {}/{}: {} -> {:?}{}",
            self.done,
            self.total,
            outcome.label,
            outcome.status,
            outcome.reason.as_deref().map(|r| format!(" ({r})")).unwrap_or_default()
        );
    }

    fn finish(&mut self) {
        if self.total > 0 {
            log::info!("run complete ({}/{})", self.done, self.total);
        }
    }
}
