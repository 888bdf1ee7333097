//! End-of-run reduction.
//!
//! Once every row of a run has been dispatched and every worker has joined,
//! each stage's `finalize` is called once, in pipeline order, on the calling
//! thread. Stages merge their own per-worker state there; this module only
//! guarantees ordering and exclusivity, and collects what the stages report.

use crate::error::{PipelineError, Result};
use crate::stage::{Stage, StageKind};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::debug;

/// What one stage reported at finalize.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StageReport {
    pub index: usize,
    pub name: String,
    pub kind: StageKind,
    /// The flag `finalize` returned.
    pub completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<JsonValue>,
}

/// Finalize `stages` in order, stopping at the first failure.
pub(crate) fn finalize_all(stages: &[Stage]) -> Result<Vec<StageReport>> {
    stages
        .iter()
        .enumerate()
        .map(|(index, stage)| {
            let completed = stage
                .finalize()
                .map_err(|e| PipelineError::stage_fault(index, stage.name(), e))?;
            debug!(index, name = stage.name(), completed, "finalized stage");
            Ok(StageReport {
                index,
                name: stage.name().to_string(),
                kind: stage.kind(),
                completed,
                metrics: stage.metrics(),
            })
        })
        .collect()
}
