use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Serialize)]
pub struct BatchProgress {
    pub current_file: String,
    pub completed_count: usize,
    pub total_count: usize,
    pub phase: BatchPhase,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum BatchPhase {
    Hashing,
    Generating,
    Cleaning,
    Deleting,
    Complete,
}

pub type ProgressCallback = Box<dyn Fn(BatchProgress) + Send + Sync>;

/// Shared flag checked once per file by batch jobs.
pub type CancellationToken = Arc<AtomicBool>;

pub fn cancellation_token() -> CancellationToken {
    Arc::new(AtomicBool::new(false))
}

/// Optional progress reporting and cancellation for a batch job.
#[derive(Default)]
pub struct BatchHooks {
    progress: Option<ProgressCallback>,
    cancel: Option<CancellationToken>,
}

impl BatchHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|token| token.load(Ordering::Relaxed))
    }

    pub fn report(
        &self,
        phase: BatchPhase,
        current_file: &str,
        completed_count: usize,
        total_count: usize,
    ) {
        let Some(callback) = &self.progress else {
            return;
        };

        let progress = BatchProgress {
            current_file: current_file.to_string(),
            completed_count,
            total_count,
            phase,
        };

        // A misbehaving observer must not take the batch down with it
        if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            callback(progress);
        })) {
            log::warn!("Progress callback panicked: {:?}", e);
        }
    }
}

impl std::fmt::Debug for BatchHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchHooks")
            .field("progress", &self.progress.is_some())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
