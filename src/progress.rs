//! Pipeline progress events.
//!
//! Progress is published on a `tokio::sync::broadcast` channel owned by
//! the builder: any number of observers can subscribe, and a lagging
//! receiver drops events instead of slowing the pipeline down.

use serde::Serialize;

/// The four stages of a single item's pipeline, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStage {
    Chunking,
    Embedding,
    Storing,
    Completed,
}

impl ProcessingStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStage::Chunking => "chunking",
            ProcessingStage::Embedding => "embedding",
            ProcessingStage::Storing => "storing",
            ProcessingStage::Completed => "completed",
        }
    }
}

/// One progress observation. `job_id` is set for batch work and `None`
/// for direct single-item calls.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub job_id: Option<String>,
    pub item_id: String,
    pub stage: ProcessingStage,
    pub processed: usize,
    pub total: usize,
    pub percentage: f32,
    pub message: Option<String>,
}

/// `processed/total` as a percentage; 100 when there is nothing to do.
pub fn percentage(processed: usize, total: usize) -> f32 {
    if total == 0 {
        100.0
    } else {
        (processed as f32 / total as f32) * 100.0
    }
}

/// Estimated remaining time, extrapolated from throughput so far.
/// `None` until at least one unit has completed.
pub fn eta_ms(elapsed_ms: u64, processed: usize, total: usize) -> Option<u64> {
    if processed == 0 || processed >= total {
        return None;
    }
    let per_unit = elapsed_ms as f64 / processed as f64;
    Some((per_unit * (total - processed) as f64) as u64)
}
