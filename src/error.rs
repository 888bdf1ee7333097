//! Error taxonomy for building and running pipelines.
//!
//! Engine entry points return [`Result<T>`], whose error is a [`PipelineError`].
//! Stage code written by users (trait impls and the `try_*` closures) returns
//! [`anyhow::Result`]; the dispatcher wraps those failures into
//! [`PipelineError::StageFault`] with the originating stage attached.

use crate::schema::{ScalarType, Shape};
use thiserror::Error;

/// Result alias used by every engine operation.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Everything that can go wrong while building or running a pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The handle was extended (or run) already; only the newest handle of a
    /// lineage may be used.
    #[error("attempting to use an invalidated pipeline handle")]
    InvalidPipeline,

    /// A stage declared an input shape that differs from what the previous stage
    /// produces. Raised while building, never while running.
    #[error("shape mismatch at stage {stage}: chain provides {expected}, stage declares {found}")]
    ShapeMismatch {
        stage: usize,
        expected: Shape,
        found: Shape,
    },

    /// A stage referenced a field position that does not exist or has an
    /// unusable type.
    #[error("invalid field {index} for shape {shape}: {reason}")]
    InvalidField {
        index: usize,
        shape: Shape,
        reason: &'static str,
    },

    /// The named table is absent from an opened source.
    #[error("no table named '{table}' in source '{source_name}'")]
    NoSuchSource { table: String, source_name: String },

    /// A schema field has no column of that name in the opened table.
    #[error("table '{table}' has no column named '{column}'")]
    NoSuchColumn { table: String, column: String },

    /// A schema field exists in the table but with another type.
    #[error("column '{column}' in table '{table}' is {found}, schema expects {expected}")]
    ColumnTypeMismatch {
        table: String,
        column: String,
        expected: ScalarType,
        found: ScalarType,
    },

    /// A transform, predicate or finalize hook failed.
    #[error("stage {stage} ({name}) failed")]
    StageFault {
        stage: usize,
        name: String,
        #[source]
        source: anyhow::Error,
    },

    /// The storage collaborator failed outside of table lookup.
    #[error("source error: {0}")]
    Source(String),

    /// A runner configuration could not be parsed.
    #[error("invalid runner config: {0}")]
    Config(String),

    /// The worker pool could not be created.
    #[error("failed to build worker pool: {0}")]
    ThreadPool(String),
}

impl PipelineError {
    pub(crate) fn stage_fault(stage: usize, name: &str, source: anyhow::Error) -> Self {
        Self::StageFault {
            stage,
            name: name.to_string(),
            source,
        }
    }

    /// Index of the failing stage, for [`StageFault`](Self::StageFault).
    #[must_use]
    pub fn fault_stage(&self) -> Option<usize> {
        match self {
            Self::StageFault { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}
