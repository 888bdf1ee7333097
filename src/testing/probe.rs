//! An instrumented pass-through stage.

use crate::schema::{Record, Shape};
use crate::stage::{Convention, Mapper};
use crate::vector::{Mask, VectorRecord};
use anyhow::{bail, Result};
use serde_json::{json, Value as JsonValue};
use std::sync::atomic::{AtomicU64, Ordering};

/// Passes records through unchanged while counting calls, rows seen and
/// finalize invocations. Optionally fails on a given call, fails at finalize,
/// or reports itself incomplete.
///
/// Keep it behind an `Arc` and hand a clone of the `Arc` to the pipeline:
///
/// ```
/// use rowchain::{Stage, testing::{Probe, events_schema}};
/// use std::sync::Arc;
///
/// let probe = Arc::new(Probe::new(events_schema().shape()));
/// let stage = Stage::Mapper(probe.clone());
/// assert_eq!(probe.calls(), 0);
/// # drop(stage);
/// ```
#[derive(Debug, Default)]
pub struct Probe {
    shape: Shape,
    convention: Convention,
    fail_at: Option<u64>,
    fail_finalize: bool,
    incomplete: bool,
    calls: AtomicU64,
    rows: AtomicU64,
    finalized: AtomicU64,
}

impl Probe {
    #[must_use]
    pub fn new(shape: Shape) -> Self {
        Self {
            shape,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn batched(shape: Shape) -> Self {
        Self {
            shape,
            convention: Convention::Batched,
            ..Self::default()
        }
    }

    /// Fail the `n`th call (1-based) and every one after it.
    #[must_use]
    pub const fn failing_at(mut self, n: u64) -> Self {
        self.fail_at = Some(n);
        self
    }

    /// Return an error from `finalize`.
    #[must_use]
    pub const fn failing_finalize(mut self) -> Self {
        self.fail_finalize = true;
        self
    }

    /// Report `false` from `finalize`.
    #[must_use]
    pub const fn incomplete(mut self) -> Self {
        self.incomplete = true;
        self
    }

    /// Invocations of `map` / `map_batch`.
    #[must_use]
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Records seen; in batched mode, live lanes.
    #[must_use]
    pub fn rows(&self) -> u64 {
        self.rows.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn finalized(&self) -> u64 {
        self.finalized.load(Ordering::Relaxed)
    }

    fn hit(&self, rows: u64) -> Result<()> {
        let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        if self.fail_at.is_some_and(|n| call >= n) {
            bail!("probe failing on call {call}");
        }
        self.rows.fetch_add(rows, Ordering::Relaxed);
        Ok(())
    }
}

impl Mapper for Probe {
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
        "probe"
    }

    fn map(&self, record: Record) -> Result<Record> {
        self.hit(1)?;
        Ok(record)
    }

    fn map_batch(&self, mask: &Mask, record: VectorRecord) -> Result<VectorRecord> {
        self.hit(mask.count() as u64)?;
        Ok(record)
    }

    fn finalize(&self) -> Result<bool> {
        self.finalized.fetch_add(1, Ordering::Relaxed);
        if self.fail_finalize {
            bail!("probe failing at finalize");
        }
        Ok(!self.incomplete)
    }

    fn metrics(&self) -> Option<JsonValue> {
        Some(json!({ "calls": self.calls(), "rows": self.rows() }))
    }
}
