//! Assertion helpers for run results.

use crate::error::{PipelineError, Result};
use std::fmt::Debug;

/// Assert two floats agree to within `1e-9` relative error.
///
/// # Panics
/// If they differ by more.
///
/// ```
/// use rowchain::testing::assert_close;
///
/// assert_close(0.1 + 0.2, 0.3);
/// ```
pub fn assert_close(actual: f64, expected: f64) {
    let scale = expected.abs().max(1.0);
    assert!(
        (actual - expected).abs() <= 1e-9 * scale,
        "Values differ:\n  Expected: {expected}\n  Actual: {actual}"
    );
}

/// Assert `result` failed with a [`PipelineError::StageFault`] at `stage`.
///
/// # Panics
/// If it succeeded or failed in another way.
pub fn assert_fault_at<T: Debug>(result: Result<T>, stage: usize) {
    match result {
        Err(PipelineError::StageFault { stage: at, .. }) => assert_eq!(
            at, stage,
            "Fault raised by stage {at}, expected stage {stage}"
        ),
        other => panic!("Expected a fault at stage {stage}, got {other:?}"),
    }
}

/// Assert the JSON metric reported at `key` is the number `expected`.
///
/// # Panics
/// If the metric is absent or not that number.
pub fn assert_metric(summary: &crate::RunSummary, stage: usize, key: &str, expected: f64) {
    let found = summary.metric(stage, key).and_then(serde_json::Value::as_f64);
    match found {
        Some(v) => assert_close(v, expected),
        None => panic!("Stage {stage} reported no numeric metric '{key}': {:?}", summary.stages),
    }
}
