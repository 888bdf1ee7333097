//! Type flow resolution.
//!
//! Walks a stage list left to right computing the shape that flows into and
//! out of every stage, rejecting the chain at the first stage whose declared
//! input differs from what precedes it. A mapper's output is its declared
//! output; a filter passes its input through.
//!
//! The execution mode is read off stage 0 alone: if it declares the batched
//! convention the whole chain runs batched. Later stages are not checked for a
//! matching convention; one that disagrees fails when first called.
//!
//! Resolution is a pure function of the schema and the declarations.

use crate::error::{PipelineError, Result};
use crate::schema::{Schema, Shape};
use crate::stage::{Convention, StageKind};
use serde::Serialize;
use std::fmt::{Display, Formatter, Result as FormatResult};
use tracing::debug;

/// Whether a resolved chain is driven one record or one batch at a time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Scalar,
    Batched,
}

impl From<Convention> for Mode {
    fn from(c: Convention) -> Self {
        match c {
            Convention::Scalar => Self::Scalar,
            Convention::Batched => Self::Batched,
        }
    }
}

impl Display for Mode {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        match self {
            Self::Scalar => f.write_str("scalar"),
            Self::Batched => f.write_str("batched"),
        }
    }
}

/// Declared signature of one stage.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum StageDecl {
    Mapper {
        input: Shape,
        output: Shape,
        convention: Convention,
    },
    Filter {
        input: Shape,
        convention: Convention,
    },
}

impl StageDecl {
    #[must_use]
    pub fn input(&self) -> &Shape {
        match self {
            Self::Mapper { input, .. } | Self::Filter { input, .. } => input,
        }
    }

    #[must_use]
    pub fn convention(&self) -> Convention {
        match self {
            Self::Mapper { convention, .. } | Self::Filter { convention, .. } => *convention,
        }
    }

    #[must_use]
    pub fn kind(&self) -> StageKind {
        match self {
            Self::Mapper { .. } => StageKind::Mapper,
            Self::Filter { .. } => StageKind::Filter,
        }
    }
}

/// Shapes on either side of one resolved stage.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct StageShapes {
    pub kind: StageKind,
    pub input: Shape,
    pub output: Shape,
}

/// Result of resolving a chain.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub struct Resolution {
    pub mode: Mode,
    /// Shape read from the source (the schema's shape).
    pub input: Shape,
    pub stages: Vec<StageShapes>,
}

impl Resolution {
    /// Shape leaving the last stage (the schema's shape for an empty chain).
    #[must_use]
    pub fn output(&self) -> &Shape {
        self.stages.last().map_or(&self.input, |s| &s.output)
    }
}

/// Resolve `decls` against `schema`.
///
/// # Errors
/// [`PipelineError::ShapeMismatch`] naming the first stage whose declared input
/// differs from the shape flowing into it.
pub fn resolve(schema: &Schema, decls: &[StageDecl]) -> Result<Resolution> {
    let input = schema.shape();
    let mut current = input.clone();
    let mut stages = Vec::with_capacity(decls.len());

    for (index, decl) in decls.iter().enumerate() {
        if *decl.input() != current {
            return Err(PipelineError::ShapeMismatch {
                stage: index,
                expected: current,
                found: decl.input().clone(),
            });
        }
        let output = match decl {
            StageDecl::Mapper { output, .. } => output.clone(),
            StageDecl::Filter { .. } => current.clone(),
        };
        stages.push(StageShapes {
            kind: decl.kind(),
            input: current,
            output: output.clone(),
        });
        current = output;
    }

    let mode = decls.first().map_or(Mode::Scalar, |d| d.convention().into());
    debug!(stages = stages.len(), %mode, output = %current, "resolved chain");
    Ok(Resolution {
        mode,
        input,
        stages,
    })
}
