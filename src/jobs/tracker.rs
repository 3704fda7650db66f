//! State of the single preprocessing job.

use std::sync::{Mutex, MutexGuard};

use serde::Serialize;

use crate::error::JobError;

/// Lifecycle of the preprocessing job.
///
/// ```text
/// Pending ──start──▶ Running(0..100) ──▶ Succeeded{count}
///                         │
///                         └──────────────▶ Failed{message}
/// ```
///
/// A finished job may be started again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running { progress: u8 },
    Succeeded { count: usize },
    Failed { message: String },
}

impl JobState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running { .. } => "running",
            Self::Succeeded { .. } => "succeeded",
            Self::Failed { .. } => "failed",
        }
    }

    pub fn progress(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Running { progress } => *progress,
            Self::Succeeded { .. } => 100,
            Self::Failed { .. } => 100,
        }
    }
}

/// Point-in-time view of the job, as reported by `/get-progress`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobSnapshot {
    pub id: u64,
    pub state: &'static str,
    pub progress: u8,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub slide: Option<String>,
}

struct Inner {
    id: u64,
    slide: Option<String>,
    state: JobState,
}

/// Holder of the job state, shared by handlers and the worker.
pub struct JobTracker {
    inner: Mutex<Inner>,
}

impl JobTracker {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                id: 0,
                slide: None,
                state: JobState::Pending,
            }),
        }
    }

    // State updates never leave the lock half-written, so a poisoned lock
    // still holds a consistent value.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claim the job slot for `slide`.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::AlreadyRunning`] while a job is running.
    pub fn start(&self, slide: &str) -> Result<u64, JobError> {
        let mut inner = self.lock();
        if matches!(inner.state, JobState::Running { .. }) {
            return Err(JobError::AlreadyRunning);
        }
        inner.id += 1;
        inner.slide = Some(slide.to_string());
        inner.state = JobState::Running { progress: 0 };
        Ok(inner.id)
    }

    /// Record progress of job `id`. Progress never moves backwards.
    pub fn set_progress(&self, id: u64, progress: u8) {
        let mut inner = self.lock();
        if inner.id != id {
            return;
        }
        if let JobState::Running { progress: current } = &mut inner.state {
            *current = (*current).max(progress.min(99));
        }
    }

    pub fn succeed(&self, id: u64, count: usize) {
        self.finish(id, JobState::Succeeded { count });
    }

    pub fn fail(&self, id: u64, message: impl Into<String>) {
        self.finish(
            id,
            JobState::Failed {
                message: message.into(),
            },
        );
    }

    fn finish(&self, id: u64, state: JobState) {
        let mut inner = self.lock();
        if inner.id == id && matches!(inner.state, JobState::Running { .. }) {
            inner.state = state;
        }
    }

    pub fn state(&self) -> JobState {
        self.lock().state.clone()
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let inner = self.lock();
        JobSnapshot {
            id: inner.id,
            state: inner.state.name(),
            progress: inner.state.progress(),
            slide: inner.slide.clone(),
        }
    }
}

impl Default for JobTracker {
    fn default() -> Self {
        Self::new()
    }
}
