//! Cooperative pause / cancel handles.
//!
//! Workers observe these at safepoints only (between pages, between
//! batches); an in-flight page always completes or times out on its own
//! budget.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Token for cooperative cancellation of job execution.
///
/// Uses an AtomicBool internally. Clone is cheap and shares state.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

/// Per-job control surface shared between the API and the job runner.
#[derive(Debug, Clone)]
pub struct JobControl {
    cancel: CancellationToken,
    pause_tx: watch::Sender<bool>,
    pause_rx: watch::Receiver<bool>,
}

impl Default for JobControl {
    fn default() -> Self {
        Self::new()
    }
}

impl JobControl {
    pub fn new() -> Self {
        let (pause_tx, pause_rx) = watch::channel(false);
        Self {
            cancel: CancellationToken::new(),
            pause_tx,
            pause_rx,
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn pause(&self) {
        let _ = self.pause_tx.send(true);
    }

    pub fn resume(&self) {
        let _ = self.pause_tx.send(false);
    }

    pub fn is_paused(&self) -> bool {
        *self.pause_rx.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pause_state_toggles_across_clones() {
        let control = JobControl::new();
        let observer = control.clone();
        assert!(!observer.is_paused());
        control.pause();
        assert!(observer.is_paused());
        control.resume();
        assert!(!observer.is_paused());
    }

    #[test]
    fn cancellation_is_shared_across_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn control_cancel_survives_resume() {
        let control = JobControl::new();
        control.pause();
        control.cancel();
        control.resume();
        assert!(control.is_cancelled());
        assert!(!control.is_paused());
    }
}
