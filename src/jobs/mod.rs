//! Background preprocessing (nuclei detection).
//!
//! One job runs at a time. [`JobRunner::start`] claims the slot in the
//! [`JobTracker`] and spawns the worker; handlers poll the tracker.
//! Results land in the [`SegmentationStore`] and are served as overlays as
//! soon as the job succeeds.

mod nuclei;
mod tracker;

use std::sync::Arc;

use tracing::{error, info};

use crate::error::JobError;
use crate::overlay::SegmentationStore;
use crate::slide::LoadedSlide;

pub use nuclei::{detect_nuclei, scale_set, DetectionParams};
pub use tracker::{JobSnapshot, JobState, JobTracker};

/// Starts preprocessing jobs and owns their shared state.
pub struct JobRunner {
    tracker: Arc<JobTracker>,
    overlays: Arc<SegmentationStore>,
}

impl JobRunner {
    pub fn new(tracker: Arc<JobTracker>, overlays: Arc<SegmentationStore>) -> Self {
        Self { tracker, overlays }
    }

    pub fn tracker(&self) -> &Arc<JobTracker> {
        &self.tracker
    }

    /// Start nuclei detection on `loaded` in the background.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::AlreadyRunning`] while another job runs.
    pub fn start(
        &self,
        loaded: Arc<LoadedSlide>,
        params: DetectionParams,
    ) -> Result<u64, JobError> {
        let id = self.tracker.start(&loaded.filename)?;
        info!(job = id, slide = %loaded.filename, ?params, "Preprocess started");

        let tracker = Arc::clone(&self.tracker);
        let overlays = Arc::clone(&self.overlays);
        tokio::spawn(async move {
            match run_detection(id, &loaded, params, &tracker, &overlays).await {
                Ok(count) => {
                    info!(job = id, slide = %loaded.filename, nuclei = count, "Preprocess finished");
                    tracker.succeed(id, count);
                }
                Err(e) => {
                    error!(job = id, slide = %loaded.filename, error = %e, "Preprocess failed");
                    let message = match e {
                        JobError::Failed(message) => message,
                        other => other.to_string(),
                    };
                    tracker.fail(id, message);
                }
            }
        });

        Ok(id)
    }
}

async fn run_detection(
    id: u64,
    loaded: &LoadedSlide,
    params: DetectionParams,
    tracker: &Arc<JobTracker>,
    overlays: &SegmentationStore,
) -> Result<usize, JobError> {
    let dims = loaded.slide.level_dimensions();
    let level = params.level.unwrap_or(dims.len().saturating_sub(1));
    let (width, height) = *dims.get(level).ok_or_else(|| {
        JobError::Failed(format!(
            "level {} is out of range for a slide with {} levels",
            level,
            dims.len()
        ))
    })?;
    let (base_width, base_height) = dims[0];
    tracker.set_progress(id, 5);

    let img = loaded
        .slide
        .read_region(level, (0, 0), (width, height))
        .await
        .map_err(|e| JobError::Failed(e.to_string()))?;
    tracker.set_progress(id, 30);

    let worker_tracker = Arc::clone(tracker);
    let mut set = tokio::task::spawn_blocking(move || {
        let report = |p: u8| worker_tracker.set_progress(id, 30 + (p as u16 * 60 / 100) as u8);
        detect_nuclei(&img, &params, &report)
    })
    .await
    .map_err(|e| JobError::Failed(format!("detection worker failed: {}", e)))?;

    scale_set(
        &mut set,
        base_width as f64 / width.max(1) as f64,
        base_height as f64 / height.max(1) as f64,
    );

    overlays
        .write(&loaded.filename, &set)
        .await
        .map_err(|e| JobError::Failed(e.to_string()))?;

    Ok(set.centroids.len())
}
