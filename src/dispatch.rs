//! Stage dispatch: push one record or one batch through a resolved chain.
//!
//! Both modes share [`walk`]; what differs is how a value is carried across a
//! stage, captured by [`Carried`]. A scalar filter that says no drops the
//! record. A batched filter narrows the mask and drops the batch only once no
//! lane is left; surviving lanes keep their original values and positions.

use crate::error::{PipelineError, Result};
use crate::pipeline::Pipeline;
use crate::schema::Record;
use crate::stage::{Filter, Mapper, Stage};
use crate::vector::Batch;

/// A value that can travel down a chain.
pub(crate) trait Carried: Sized {
    fn through_mapper(self, mapper: &dyn Mapper) -> anyhow::Result<Self>;

    /// `None` once nothing is left to carry.
    fn through_filter(self, filter: &dyn Filter) -> anyhow::Result<Option<Self>>;

    fn is_live(&self) -> bool {
        true
    }
}

impl Carried for Record {
    fn through_mapper(self, mapper: &dyn Mapper) -> anyhow::Result<Self> {
        mapper.map(self)
    }

    fn through_filter(self, filter: &dyn Filter) -> anyhow::Result<Option<Self>> {
        Ok(filter.test(&self)?.then_some(self))
    }
}

impl Carried for Batch {
    fn through_mapper(self, mapper: &dyn Mapper) -> anyhow::Result<Self> {
        let record = mapper.map_batch(&self.mask, self.record)?;
        Ok(Self::new(self.mask, record))
    }

    fn through_filter(self, filter: &dyn Filter) -> anyhow::Result<Option<Self>> {
        let verdict = filter.test_batch(&self.mask, &self.record)?;
        let mask = self.mask & verdict;
        Ok(mask.any().then(|| Self::new(mask, self.record)))
    }

    fn is_live(&self) -> bool {
        self.mask.any()
    }
}

/// Run `item` through `stages` in order. Returns what left the last stage, or
/// `None` if a filter removed it.
pub(crate) fn walk<C: Carried>(stages: &[Stage], item: C) -> Result<Option<C>> {
    if !item.is_live() {
        return Ok(None);
    }
    let mut carried = item;
    for (index, stage) in stages.iter().enumerate() {
        let step = match stage {
            Stage::Mapper(m) => carried.through_mapper(m.as_ref()).map(Some),
            Stage::Filter(f) => carried.through_filter(f.as_ref()),
        };
        match step {
            Ok(Some(next)) => carried = next,
            Ok(None) => return Ok(None),
            Err(e) => return Err(PipelineError::stage_fault(index, stage.name(), e)),
        }
    }
    Ok(Some(carried))
}

/// Dispatch one record through a scalar-mode pipeline.
///
/// # Errors
/// [`PipelineError::InvalidPipeline`] for a retired handle,
/// [`PipelineError::StageFault`] if a stage fails.
pub fn execute_chain(pipeline: &Pipeline, record: Record) -> Result<Option<Record>> {
    pipeline.ensure_live()?;
    walk(pipeline.stages(), record)
}

/// Dispatch one batch through a batched-mode pipeline. The returned batch
/// carries the narrowed mask.
///
/// # Errors
/// As [`execute_chain`].
pub fn execute_batch(pipeline: &Pipeline, batch: Batch) -> Result<Option<Batch>> {
    pipeline.ensure_live()?;
    walk(pipeline.stages(), batch)
}
