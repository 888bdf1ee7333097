//! Prebuilt stateful stages.
//!
//! Both are pass-through mappers that accumulate into [`PerWorker`] slots while
//! rows flow and reduce those slots in `finalize`:
//! - [`Count`]: number of live records (lanes, in batched mode) that reached it.
//! - [`Sum`]: sum of one numeric field, widened to `f64`.
//!
//! Either can be built once, kept behind an `Arc`, and placed in a pipeline with
//! [`Pipeline::create`](crate::Pipeline::create) or
//! [`Pipeline::stage`](crate::Pipeline::stage) so its total can be read after the
//! run. `finalize` drains the slots into the total, so a stage shared by several
//! pipelines reports each run on its own.

use crate::accumulator::PerWorker;
use crate::error::PipelineError;
use crate::schema::{Record, Shape, Value};
use crate::stage::{Convention, Mapper};
use crate::vector::{Mask, VectorRecord};
use anyhow::{anyhow, Result};
use serde_json::{json, Value as JsonValue};
use std::sync::{Mutex, PoisonError};
use tracing::info;

/* ===================== Count ===================== */

/// Counts the records passing through it.
#[derive(Debug)]
pub struct Count {
    shape: Shape,
    convention: Convention,
    counter: PerWorker<u64>,
    total: Mutex<Option<u64>>,
}

impl Count {
    /// A scalar-convention counter over records of `shape`.
    #[must_use]
    pub fn new(shape: Shape) -> Self {
        Self::with_convention(shape, Convention::Scalar)
    }

    #[must_use]
    pub fn with_convention(shape: Shape, convention: Convention) -> Self {
        Self {
            shape,
            convention,
            counter: PerWorker::new(),
            total: Mutex::new(None),
        }
    }

    /// Count accumulated since the last `finalize`.
    #[must_use]
    pub fn running_total(&self) -> u64 {
        self.counter.reduce(0, |acc, n| acc + n)
    }

    /// Total recorded by the last `finalize`, if any.
    #[must_use]
    pub fn total(&self) -> Option<u64> {
        *self.total.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Human-readable report of the finalized total.
    #[must_use]
    pub fn summary(&self) -> String {
        match self.total() {
            Some(n) => format!("Counter saw {n} events."),
            None => "Counter not finalized.".to_string(),
        }
    }

    /// Clear the slots and the finalized total.
    pub fn reset(&self) {
        self.counter.reset();
        *self.total.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

/// A clone carries every worker slot and the finalized total.
impl Clone for Count {
    fn clone(&self) -> Self {
        Self {
            shape: self.shape.clone(),
            convention: self.convention,
            counter: self.counter.clone(),
            total: Mutex::new(self.total()),
        }
    }
}

impl Mapper for Count {
    fn input_shape(&self) -> Shape {
        self.shape.clone()
    }

    fn output_shape(&self) -> Shape {
        self.shape.clone()
    }

    fn convention(&self) -> Convention {
        self.convention
    }

    fn name(&self) -> &str {
        "count"
    }

    fn map(&self, record: Record) -> Result<Record> {
        self.counter.with_local(|n| *n += 1);
        Ok(record)
    }

    fn map_batch(&self, mask: &Mask, record: VectorRecord) -> Result<VectorRecord> {
        let live = mask.count() as u64;
        self.counter.with_local(|n| *n += live);
        Ok(record)
    }

    fn finalize(&self) -> Result<bool> {
        let total = self.running_total();
        self.counter.reset();
        *self.total.lock().unwrap_or_else(PoisonError::into_inner) = Some(total);
        info!(total, "Counter saw {total} events.");
        Ok(true)
    }

    fn metrics(&self) -> Option<JsonValue> {
        self.total().map(|count| json!({ "count": count }))
    }
}

/* ===================== Sum ===================== */

/// Sums one numeric field of the records passing through it.
#[derive(Debug)]
pub struct Sum {
    shape: Shape,
    field: usize,
    convention: Convention,
    acc: PerWorker<f64>,
    total: Mutex<Option<f64>>,
}

impl Sum {
    /// Sum field `field` of records of `shape`.
    ///
    /// # Errors
    /// [`PipelineError::InvalidField`] if `field` is out of range or boolean.
    pub fn new(shape: Shape, field: usize) -> crate::Result<Self> {
        Self::with_convention(shape, field, Convention::Scalar)
    }

    /// # Errors
    /// See [`Sum::new`].
    pub fn with_convention(shape: Shape, field: usize, convention: Convention) -> crate::Result<Self> {
        match shape.get(field) {
            None => Err(PipelineError::InvalidField {
                index: field,
                shape,
                reason: "out of range",
            }),
            Some(ty) if !ty.is_numeric() => Err(PipelineError::InvalidField {
                index: field,
                shape,
                reason: "not numeric",
            }),
            Some(_) => Ok(Self {
                shape,
                field,
                convention,
                acc: PerWorker::new(),
                total: Mutex::new(None),
            }),
        }
    }

    #[must_use]
    pub fn running_total(&self) -> f64 {
        self.acc.reduce(0.0, |acc, v| acc + v)
    }

    #[must_use]
    pub fn total(&self) -> Option<f64> {
        *self.total.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn reset(&self) {
        self.acc.reset();
        *self.total.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn widen(&self, value: Option<Value>) -> Result<f64> {
        value
            .and_then(|v| v.as_f64())
            .ok_or_else(|| anyhow!("field {} is missing or not numeric", self.field))
    }
}

impl Clone for Sum {
    fn clone(&self) -> Self {
        Self {
            shape: self.shape.clone(),
            field: self.field,
            convention: self.convention,
            acc: self.acc.clone(),
            total: Mutex::new(self.total()),
        }
    }
}

impl Mapper for Sum {
    fn input_shape(&self) -> Shape {
        self.shape.clone()
    }

    fn output_shape(&self) -> Shape {
        self.shape.clone()
    }

    fn convention(&self) -> Convention {
        self.convention
    }

    fn name(&self) -> &str {
        "sum"
    }

    fn map(&self, record: Record) -> Result<Record> {
        let v = self.widen(record.get(self.field))?;
        self.acc.with_local(|acc| *acc += v);
        Ok(record)
    }

    fn map_batch(&self, mask: &Mask, record: VectorRecord) -> Result<VectorRecord> {
        let vector = record
            .vectors()
            .get(self.field)
            .ok_or_else(|| anyhow!("field {} out of range", self.field))?;
        let mut partial = 0.0;
        for lane in mask.valid_lanes() {
            partial += self.widen(vector.lane(lane))?;
        }
        self.acc.with_local(|acc| *acc += partial);
        Ok(record)
    }

    fn finalize(&self) -> Result<bool> {
        let total = self.running_total();
        self.acc.reset();
        *self.total.lock().unwrap_or_else(PoisonError::into_inner) = Some(total);
        info!(total, field = self.field, "sum finalized");
        Ok(true)
    }

    fn metrics(&self) -> Option<JsonValue> {
        self.total().map(|sum| json!({ "sum": sum }))
    }
}
