//! Stage abstraction: mappers, filters, and the closure-backed stages the
//! builder creates.
//!
//! A stage is called from many worker threads at once through `&self`, so any
//! bookkeeping it keeps must be per-worker (see
//! [`PerWorker`](crate::accumulator::PerWorker)). `finalize` runs once, on the
//! calling thread, after every row of a run has been processed.
//!
//! Each stage declares a calling convention. Only the first stage's convention
//! decides how a chain executes; a stage asked to run in the convention it does
//! not implement fails with a [`StageFault`](crate::PipelineError::StageFault).

use crate::resolver::StageDecl;
use crate::schema::{Record, Row, Shape};
use crate::vector::{Mask, VectorRecord, VectorRow};
use anyhow::{anyhow, bail, Result};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::fmt::{Debug, Formatter, Result as FormatResult};
use std::marker::PhantomData;
use std::sync::Arc;

/// How a stage expects to be called.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub enum Convention {
    /// One record per call.
    #[default]
    Scalar,
    /// [`LANES`](crate::vector::LANES) records per call, with a validity mask.
    Batched,
}

/// A shape-transforming stage.
pub trait Mapper: Send + Sync {
    fn input_shape(&self) -> Shape;

    fn output_shape(&self) -> Shape;

    fn convention(&self) -> Convention {
        Convention::Scalar
    }

    fn name(&self) -> &str {
        "map"
    }

    /// Scalar transform.
    fn map(&self, _record: Record) -> Result<Record> {
        bail!("{} does not support the scalar calling convention", self.name())
    }

    /// Batched transform. Lanes cleared in `mask` carry no meaning and must not
    /// affect the live lanes' results.
    fn map_batch(&self, _mask: &Mask, _record: VectorRecord) -> Result<VectorRecord> {
        bail!("{} does not support the batched calling convention", self.name())
    }

    /// Called once after all rows; returns whether the stage completed.
    fn finalize(&self) -> Result<bool> {
        Ok(true)
    }

    /// Values reported in the run summary after `finalize`.
    fn metrics(&self) -> Option<JsonValue> {
        None
    }
}

/// A predicate stage; records it rejects go no further.
pub trait Filter: Send + Sync {
    fn input_shape(&self) -> Shape;

    fn convention(&self) -> Convention {
        Convention::Scalar
    }

    fn name(&self) -> &str {
        "filter"
    }

    fn test(&self, _record: &Record) -> Result<bool> {
        bail!("{} does not support the scalar calling convention", self.name())
    }

    /// Batched predicate. The dispatcher ANDs the result with `mask`, so lanes
    /// already invalid stay invalid whatever is returned for them.
    fn test_batch(&self, _mask: &Mask, _record: &VectorRecord) -> Result<Mask> {
        bail!("{} does not support the batched calling convention", self.name())
    }

    fn finalize(&self) -> Result<bool> {
        Ok(true)
    }

    fn metrics(&self) -> Option<JsonValue> {
        None
    }
}

/// Kind tag of a [`Stage`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum StageKind {
    Mapper,
    Filter,
}

/// One link of a pipeline.
///
/// Stages are reference-counted so a caller can keep a handle to a prebuilt
/// stateful stage and read its results after the run.
#[derive(Clone)]
pub enum Stage {
    Mapper(Arc<dyn Mapper>),
    Filter(Arc<dyn Filter>),
}

impl Stage {
    pub fn mapper(mapper: impl Mapper + 'static) -> Self {
        Self::Mapper(Arc::new(mapper))
    }

    pub fn filter(filter: impl Filter + 'static) -> Self {
        Self::Filter(Arc::new(filter))
    }

    #[must_use]
    pub fn kind(&self) -> StageKind {
        match self {
            Self::Mapper(_) => StageKind::Mapper,
            Self::Filter(_) => StageKind::Filter,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Mapper(m) => m.name(),
            Self::Filter(f) => f.name(),
        }
    }

    #[must_use]
    pub fn convention(&self) -> Convention {
        match self {
            Self::Mapper(m) => m.convention(),
            Self::Filter(f) => f.convention(),
        }
    }

    /// What the resolver needs to know about this stage.
    #[must_use]
    pub fn declaration(&self) -> StageDecl {
        match self {
            Self::Mapper(m) => StageDecl::Mapper {
                input: m.input_shape(),
                output: m.output_shape(),
                convention: m.convention(),
            },
            Self::Filter(f) => StageDecl::Filter {
                input: f.input_shape(),
                convention: f.convention(),
            },
        }
    }

    pub(crate) fn finalize(&self) -> Result<bool> {
        match self {
            Self::Mapper(m) => m.finalize(),
            Self::Filter(f) => f.finalize(),
        }
    }

    pub(crate) fn metrics(&self) -> Option<JsonValue> {
        match self {
            Self::Mapper(m) => m.metrics(),
            Self::Filter(f) => f.metrics(),
        }
    }
}

impl Debug for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        let decl = self.declaration();
        f.debug_struct("Stage")
            .field("kind", &self.kind())
            .field("name", &self.name())
            .field("decl", &decl)
            .finish()
    }
}

fn unpack<I: Row>(record: &Record) -> Result<I> {
    I::from_record(record).ok_or_else(|| {
        anyhow!(
            "record of shape {} does not match declared input {}",
            record.shape(),
            I::shape()
        )
    })
}

fn unpack_vectors<I: VectorRow>(record: &VectorRecord) -> Result<I> {
    I::from_vectors(record).ok_or_else(|| {
        anyhow!(
            "batch of shape {} does not match declared input {}",
            record.shape(),
            I::shape()
        )
    })
}

// ---- Closure-backed stages ----

pub(crate) struct MapFn<I, O, F> {
    f: F,
    _t: PhantomData<fn(I) -> O>,
}

impl<I, O, F> MapFn<I, O, F> {
    pub(crate) const fn new(f: F) -> Self {
        Self { f, _t: PhantomData }
    }
}

impl<I, O, F> Mapper for MapFn<I, O, F>
where
    I: Row,
    O: Row,
    F: Fn(I) -> O + Send + Sync + 'static,
{
    fn input_shape(&self) -> Shape {
        I::shape()
    }

    fn output_shape(&self) -> Shape {
        O::shape()
    }

    fn map(&self, record: Record) -> Result<Record> {
        Ok((self.f)(unpack::<I>(&record)?).into_record())
    }
}

pub(crate) struct TryMapFn<I, O, F> {
    f: F,
    _t: PhantomData<fn(I) -> O>,
}

impl<I, O, F> TryMapFn<I, O, F> {
    pub(crate) const fn new(f: F) -> Self {
        Self { f, _t: PhantomData }
    }
}

impl<I, O, F> Mapper for TryMapFn<I, O, F>
where
    I: Row,
    O: Row,
    F: Fn(I) -> Result<O> + Send + Sync + 'static,
{
    fn input_shape(&self) -> Shape {
        I::shape()
    }

    fn output_shape(&self) -> Shape {
        O::shape()
    }

    fn name(&self) -> &str {
        "try_map"
    }

    fn map(&self, record: Record) -> Result<Record> {
        Ok((self.f)(unpack::<I>(&record)?)?.into_record())
    }
}

pub(crate) struct FilterFn<I, F> {
    f: F,
    _t: PhantomData<fn(I)>,
}

impl<I, F> FilterFn<I, F> {
    pub(crate) const fn new(f: F) -> Self {
        Self { f, _t: PhantomData }
    }
}

impl<I, F> Filter for FilterFn<I, F>
where
    I: Row,
    F: Fn(I) -> bool + Send + Sync + 'static,
{
    fn input_shape(&self) -> Shape {
        I::shape()
    }

    fn test(&self, record: &Record) -> Result<bool> {
        Ok((self.f)(unpack::<I>(record)?))
    }
}

pub(crate) struct TryFilterFn<I, F> {
    f: F,
    _t: PhantomData<fn(I)>,
}

impl<I, F> TryFilterFn<I, F> {
    pub(crate) const fn new(f: F) -> Self {
        Self { f, _t: PhantomData }
    }
}

impl<I, F> Filter for TryFilterFn<I, F>
where
    I: Row,
    F: Fn(I) -> Result<bool> + Send + Sync + 'static,
{
    fn input_shape(&self) -> Shape {
        I::shape()
    }

    fn name(&self) -> &str {
        "try_filter"
    }

    fn test(&self, record: &Record) -> Result<bool> {
        (self.f)(unpack::<I>(record)?)
    }
}

pub(crate) struct BatchedMapFn<I, O, F> {
    f: F,
    _t: PhantomData<fn(I) -> O>,
}

impl<I, O, F> BatchedMapFn<I, O, F> {
    pub(crate) const fn new(f: F) -> Self {
        Self { f, _t: PhantomData }
    }
}

impl<I, O, F> Mapper for BatchedMapFn<I, O, F>
where
    I: VectorRow,
    O: VectorRow,
    F: Fn(&Mask, I) -> O + Send + Sync + 'static,
{
    fn input_shape(&self) -> Shape {
        I::shape()
    }

    fn output_shape(&self) -> Shape {
        O::shape()
    }

    fn convention(&self) -> Convention {
        Convention::Batched
    }

    fn name(&self) -> &str {
        "map_batched"
    }

    fn map_batch(&self, mask: &Mask, record: VectorRecord) -> Result<VectorRecord> {
        Ok((self.f)(mask, unpack_vectors::<I>(&record)?).into_vectors())
    }
}

pub(crate) struct BatchedFilterFn<I, F> {
    f: F,
    _t: PhantomData<fn(I)>,
}

impl<I, F> BatchedFilterFn<I, F> {
    pub(crate) const fn new(f: F) -> Self {
        Self { f, _t: PhantomData }
    }
}

impl<I, F> Filter for BatchedFilterFn<I, F>
where
    I: VectorRow,
    F: Fn(&Mask, I) -> Mask + Send + Sync + 'static,
{
    fn input_shape(&self) -> Shape {
        I::shape()
    }

    fn convention(&self) -> Convention {
        Convention::Batched
    }

    fn name(&self) -> &str {
        "filter_batched"
    }

    fn test_batch(&self, mask: &Mask, record: &VectorRecord) -> Result<Mask> {
        Ok((self.f)(mask, unpack_vectors::<I>(record)?))
    }
}

/// Terminal sink: hands each live record to a callback and passes it on
/// unchanged. Works in both conventions; in batched mode the callback sees the
/// valid lanes one by one.
pub(crate) struct ForEach<I, F> {
    f: F,
    convention: Convention,
    _t: PhantomData<fn(I)>,
}

impl<I, F> ForEach<I, F> {
    pub(crate) const fn new(f: F, convention: Convention) -> Self {
        Self {
            f,
            convention,
            _t: PhantomData,
        }
    }
}

impl<I, F> Mapper for ForEach<I, F>
where
    I: Row,
    F: Fn(I) + Send + Sync + 'static,
{
    fn input_shape(&self) -> Shape {
        I::shape()
    }

    fn output_shape(&self) -> Shape {
        I::shape()
    }

    fn convention(&self) -> Convention {
        self.convention
    }

    fn name(&self) -> &str {
        "for_each"
    }

    fn map(&self, record: Record) -> Result<Record> {
        (self.f)(unpack::<I>(&record)?);
        Ok(record)
    }

    fn map_batch(&self, mask: &Mask, record: VectorRecord) -> Result<VectorRecord> {
        for lane in mask.valid_lanes() {
            let row = record
                .lane_record(lane)
                .ok_or_else(|| anyhow!("lane {lane} out of range"))?;
            (self.f)(unpack::<I>(&row)?);
        }
        Ok(record)
    }
}
