//! Pipeline construction.
//!
//! A [`Pipeline`] is a schema plus a resolved chain of [`Stage`]s. Every append
//! consumes the handle it extends and returns a new one, re-running the
//! resolver so a shape mismatch is reported while building rather than while
//! running.
//!
//! Handles may be cloned, but only the newest handle of a lineage is live:
//! extending or running a pipeline retires every other handle derived from the
//! same [`Pipeline::new`]/[`Pipeline::create`], and using a retired handle fails
//! with [`PipelineError::InvalidPipeline`].
//!
//! ```
//! use rowchain::{Pipeline, Schema, ScalarType};
//!
//! # fn main() -> rowchain::Result<()> {
//! let schema = Schema::new([
//!     ("x", ScalarType::Float),
//!     ("y", ScalarType::Int),
//!     ("z", ScalarType::Double),
//! ]);
//! let p = Pipeline::new(schema)
//!     .map(|(x, y, _z): (f32, i32, f64)| (y, x))?
//!     .filter(|(y, _x): (i32, f32)| y <= 5)?
//!     .map(|(y, _x): (i32, f32)| y * y + 1)?
//!     .count()?;
//! assert_eq!(p.len(), 4);
//! # Ok(())
//! # }
//! ```

use crate::combiners::{Count, Sum};
use crate::error::{PipelineError, Result};
use crate::resolver::{resolve, Mode, Resolution, StageDecl};
use crate::schema::{Row, Schema, Shape};
use crate::stage::{
    BatchedFilterFn, BatchedMapFn, Convention, FilterFn, ForEach, MapFn, Stage, TryFilterFn,
    TryMapFn,
};
use crate::vector::{Mask, VectorRow};
use std::fmt::{Display, Formatter, Result as FormatResult};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Shared by every handle derived from one root; holds the generation of the
/// only live handle.
#[derive(Debug, Default)]
struct Lineage {
    live: AtomicU64,
}

/// A schema and a type-checked chain of stages.
#[derive(Clone, Debug)]
pub struct Pipeline {
    schema: Arc<Schema>,
    stages: Vec<Stage>,
    resolution: Resolution,
    lineage: Arc<Lineage>,
    generation: u64,
}

impl Pipeline {
    /// A pipeline with no stages.
    #[must_use]
    pub fn new(schema: Schema) -> Self {
        let resolution = Resolution {
            input: schema.shape(),
            ..Resolution::default()
        };
        Self {
            schema: Arc::new(schema),
            stages: Vec::new(),
            resolution,
            lineage: Arc::default(),
            generation: 0,
        }
    }

    /// Build directly from prebuilt stages.
    ///
    /// # Errors
    /// [`PipelineError::ShapeMismatch`] if the stages do not chain.
    pub fn create(schema: Schema, stages: impl IntoIterator<Item = Stage>) -> Result<Self> {
        let stages: Vec<Stage> = stages.into_iter().collect();
        let resolution = resolve(&schema, &declarations(&stages))?;
        Ok(Self {
            schema: Arc::new(schema),
            stages,
            resolution,
            lineage: Arc::default(),
            generation: 0,
        })
    }

    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    #[must_use]
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    #[must_use]
    pub fn resolution(&self) -> &Resolution {
        &self.resolution
    }

    #[must_use]
    pub fn mode(&self) -> Mode {
        self.resolution.mode
    }

    /// Shape produced by the last stage.
    #[must_use]
    pub fn output_shape(&self) -> &Shape {
        self.resolution.output()
    }

    /// Whether this handle is still the live one of its lineage.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.lineage.live.load(Ordering::Acquire) == self.generation
    }

    pub(crate) fn ensure_live(&self) -> Result<()> {
        if self.is_live() {
            Ok(())
        } else {
            Err(PipelineError::InvalidPipeline)
        }
    }

    /// Retire this handle (and every clone of it). Fails if it was already
    /// retired; of two clones racing to claim, exactly one wins.
    pub(crate) fn claim(&self) -> Result<()> {
        self.lineage
            .live
            .compare_exchange(
                self.generation,
                self.generation + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| ())
            .map_err(|_| PipelineError::InvalidPipeline)
    }

    /// Convention new helper stages adopt: that of the chain, scalar if empty.
    fn chain_convention(&self) -> Convention {
        match self.resolution.mode {
            Mode::Scalar => Convention::Scalar,
            Mode::Batched => Convention::Batched,
        }
    }

    /// Append any stage.
    ///
    /// # Errors
    /// [`PipelineError::InvalidPipeline`] if this handle was retired;
    /// [`PipelineError::ShapeMismatch`] if the stage's declared input differs from
    /// this pipeline's output shape.
    pub fn stage(self, stage: Stage) -> Result<Self> {
        self.ensure_live()?;
        let mut stages = self.stages.clone();
        stages.push(stage);
        let resolution = resolve(&self.schema, &declarations(&stages))?;
        self.claim()?;
        debug!(
            stages = stages.len(),
            generation = self.generation + 1,
            "extended pipeline"
        );
        Ok(Self {
            schema: self.schema,
            stages,
            resolution,
            lineage: self.lineage,
            generation: self.generation + 1,
        })
    }

    /// Append a transform. Its argument type must match the current output
    /// shape; its return type becomes the new one.
    ///
    /// # Errors
    /// See [`Pipeline::stage`].
    pub fn map<I, O, F>(self, f: F) -> Result<Self>
    where
        I: Row,
        O: Row,
        F: Fn(I) -> O + Send + Sync + 'static,
    {
        self.stage(Stage::mapper(MapFn::new(f)))
    }

    /// Append a transform that may fail; an `Err` aborts the run as a stage fault.
    ///
    /// # Errors
    /// See [`Pipeline::stage`].
    pub fn try_map<I, O, F>(self, f: F) -> Result<Self>
    where
        I: Row,
        O: Row,
        F: Fn(I) -> anyhow::Result<O> + Send + Sync + 'static,
    {
        self.stage(Stage::mapper(TryMapFn::new(f)))
    }

    /// Append a predicate; records it rejects reach no later stage.
    ///
    /// # Errors
    /// See [`Pipeline::stage`].
    pub fn filter<I, F>(self, f: F) -> Result<Self>
    where
        I: Row,
        F: Fn(I) -> bool + Send + Sync + 'static,
    {
        self.stage(Stage::filter(FilterFn::new(f)))
    }

    /// # Errors
    /// See [`Pipeline::stage`].
    pub fn try_filter<I, F>(self, f: F) -> Result<Self>
    where
        I: Row,
        F: Fn(I) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        self.stage(Stage::filter(TryFilterFn::new(f)))
    }

    /// Append a batched transform over [`Lanes`](crate::vector::Lanes). As the
    /// first stage it makes the whole chain run batched.
    ///
    /// # Errors
    /// See [`Pipeline::stage`].
    pub fn map_batched<I, O, F>(self, f: F) -> Result<Self>
    where
        I: VectorRow,
        O: VectorRow,
        F: Fn(&Mask, I) -> O + Send + Sync + 'static,
    {
        self.stage(Stage::mapper(BatchedMapFn::new(f)))
    }

    /// Append a batched predicate returning the lanes to keep.
    ///
    /// # Errors
    /// See [`Pipeline::stage`].
    pub fn filter_batched<I, F>(self, f: F) -> Result<Self>
    where
        I: VectorRow,
        F: Fn(&Mask, I) -> Mask + Send + Sync + 'static,
    {
        self.stage(Stage::filter(BatchedFilterFn::new(f)))
    }

    /// Append a sink called with every record that reaches it.
    ///
    /// # Errors
    /// See [`Pipeline::stage`].
    pub fn for_each<I, F>(self, f: F) -> Result<Self>
    where
        I: Row,
        F: Fn(I) + Send + Sync + 'static,
    {
        let convention = self.chain_convention();
        self.stage(Stage::mapper(ForEach::new(f, convention)))
    }

    /// Append a pass-through counter that reports its total at finalize.
    ///
    /// # Errors
    /// See [`Pipeline::stage`].
    pub fn count(self) -> Result<Self> {
        let count = Count::with_convention(self.output_shape().clone(), self.chain_convention());
        self.stage(Stage::mapper(count))
    }

    /// Append a pass-through sum of output field `field`.
    ///
    /// # Errors
    /// [`PipelineError::InvalidField`] if the field is out of range or not
    /// numeric, otherwise see [`Pipeline::stage`].
    pub fn sum(self, field: usize) -> Result<Self> {
        let sum = Sum::with_convention(self.output_shape().clone(), field, self.chain_convention())?;
        self.stage(Stage::mapper(sum))
    }

    /// Resolved shapes and mode, for display.
    #[must_use]
    pub fn describe(&self) -> PipelineExplanation {
        PipelineExplanation {
            schema: (*self.schema).clone(),
            names: self.stages.iter().map(|s| s.name().to_string()).collect(),
            resolution: self.resolution.clone(),
        }
    }
}

fn declarations(stages: &[Stage]) -> Vec<StageDecl> {
    stages.iter().map(Stage::declaration).collect()
}

/// Printable description of a resolved pipeline.
#[derive(Clone, Debug)]
pub struct PipelineExplanation {
    pub schema: Schema,
    pub names: Vec<String>,
    pub resolution: Resolution,
}

impl Display for PipelineExplanation {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        writeln!(f, "┌─ PIPELINE ({} mode) ─────────────────────────", self.resolution.mode)?;
        write!(f, "│ Schema: ")?;
        for (i, field) in self.schema.fields().iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}:{}", field.name, field.ty)?;
        }
        writeln!(f)?;
        for (i, (name, shapes)) in self.names.iter().zip(&self.resolution.stages).enumerate() {
            writeln!(
                f,
                "│ Stage {i}: {name} [{:?}] {} -> {}",
                shapes.kind, shapes.input, shapes.output
            )?;
        }
        writeln!(f, "│ Output: {}", self.resolution.output())?;
        write!(f, "└──────────────────────────────────────────────")
    }
}
