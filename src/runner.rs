use crate::dispatch::walk;
use crate::error::{PipelineError, Result};
use crate::finalize::{finalize_all, StageReport};
use crate::pipeline::Pipeline;
use crate::resolver::Mode;
use crate::source::{bind, Binding, Source, Table};
use crate::vector::{Batch, Mask, VectorRecord, LANES};
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::ops::Range;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tracing::{debug, info, warn};

/// How a [`Runner`] schedules partitions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecMode {
    /// Every source front to back on the calling thread, in storage order.
    Sequential,
    /// One task per cluster on a pool of `threads` workers (the runner's
    /// default when `None`).
    Parallel { threads: Option<usize> },
}

/// Drives a pipeline over sources and finalizes it.
///
/// Deserializable so it can come from a config file:
///
/// ```
/// use rowchain::{ExecMode, Runner};
///
/// let r = Runner::from_json(r#"{ "mode": { "parallel": { "threads": 4 } } }"#).unwrap();
/// assert_eq!(r.mode, ExecMode::Parallel { threads: Some(4) });
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Runner {
    pub mode: ExecMode,
    pub default_threads: usize,
}

impl Default for Runner {
    fn default() -> Self {
        Self {
            mode: ExecMode::Parallel { threads: None },
            default_threads: num_cpus::get().max(1),
        }
    }
}

/// Counts for one run.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RunSummary {
    pub mode: Mode,
    pub exec: ExecMode,
    pub table: String,
    pub sources: Vec<String>,
    /// Cursor ranges processed (one per source when sequential).
    pub partitions: usize,
    pub rows_read: u64,
    /// Batches dispatched; zero in scalar mode.
    pub batches: u64,
    /// Records (or live lanes) that left the last stage.
    pub emitted: u64,
    pub stages: Vec<StageReport>,
    pub elapsed_ms: u64,
}

impl RunSummary {
    /// Whether every stage's finalize reported completion.
    #[must_use]
    pub fn completed(&self) -> bool {
        self.stages.iter().all(|s| s.completed)
    }

    /// A metric a stage reported, e.g. `metric(3, "count")`.
    #[must_use]
    pub fn metric(&self, stage: usize, key: &str) -> Option<&JsonValue> {
        self.stages.get(stage)?.metrics.as_ref()?.get(key)
    }

    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct Tally {
    partitions: usize,
    rows: u64,
    batches: u64,
    emitted: u64,
}

impl Tally {
    const fn merge(self, other: Self) -> Self {
        Self {
            partitions: self.partitions + other.partitions,
            rows: self.rows + other.rows,
            batches: self.batches + other.batches,
            emitted: self.emitted + other.emitted,
        }
    }
}

/// An opened table with its schema binding.
struct Bound {
    locator: String,
    table: Arc<dyn Table>,
    binding: Binding,
}

impl Runner {
    #[must_use]
    pub fn sequential() -> Self {
        Self {
            mode: ExecMode::Sequential,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn parallel(threads: usize) -> Self {
        Self {
            mode: ExecMode::Parallel {
                threads: Some(threads),
            },
            ..Self::default()
        }
    }

    /// # Errors
    /// [`PipelineError::Config`] if `text` is not a valid runner config.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| PipelineError::Config(e.to_string()))
    }

    /// Run `pipeline` over table `table` of every source, then finalize it.
    ///
    /// Every source is opened and bound before any row is read. The pipeline is
    /// consumed and its lineage retired, so its stages finalize at most once.
    ///
    /// # Errors
    /// [`PipelineError::InvalidPipeline`] for a retired handle;
    /// [`PipelineError::NoSuchSource`], [`PipelineError::NoSuchColumn`] or
    /// [`PipelineError::ColumnTypeMismatch`] before any row is read;
    /// [`PipelineError::StageFault`] from the first failing stage (finalize is
    /// then skipped); [`PipelineError::ThreadPool`] if workers cannot start.
    pub fn run(&self, pipeline: Pipeline, table: &str, sources: &[&dyn Source]) -> Result<RunSummary> {
        pipeline.ensure_live()?;
        let started = Instant::now();
        let bound = open_all(&pipeline, table, sources)?;
        pipeline.claim()?;

        let tally = match self.mode {
            ExecMode::Sequential => run_sequential(&pipeline, &bound)?,
            ExecMode::Parallel { threads } => {
                run_parallel(&pipeline, &bound, threads.unwrap_or(self.default_threads))?
            }
        };
        let stages = finalize_all(pipeline.stages())?;

        let summary = RunSummary {
            mode: pipeline.mode(),
            exec: self.mode,
            table: table.to_string(),
            sources: bound.into_iter().map(|b| b.locator).collect(),
            partitions: tally.partitions,
            rows_read: tally.rows,
            batches: tally.batches,
            emitted: tally.emitted,
            stages,
            elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        };
        info!(
            mode = %summary.mode,
            partitions = summary.partitions,
            rows = summary.rows_read,
            emitted = summary.emitted,
            elapsed_ms = summary.elapsed_ms,
            "run complete"
        );
        Ok(summary)
    }
}

impl Pipeline {
    /// Run sequentially: one thread, storage order.
    ///
    /// # Errors
    /// See [`Runner::run`].
    pub fn process(self, table: &str, sources: &[&dyn Source]) -> Result<RunSummary> {
        Runner::sequential().run(self, table, sources)
    }

    /// Run with one task per cluster on a pool sized to the machine.
    ///
    /// # Errors
    /// See [`Runner::run`].
    pub fn process_parallel(self, table: &str, sources: &[&dyn Source]) -> Result<RunSummary> {
        Runner::default().run(self, table, sources)
    }
}

fn open_all(pipeline: &Pipeline, table: &str, sources: &[&dyn Source]) -> Result<Vec<Bound>> {
    sources
        .iter()
        .map(|source| {
            let opened = source.open(table)?;
            let binding = bind(pipeline.schema(), opened.as_ref())?;
            Ok(Bound {
                locator: source.locator().to_string(),
                table: opened,
                binding,
            })
        })
        .collect()
}

fn run_sequential(pipeline: &Pipeline, bound: &[Bound]) -> Result<Tally> {
    bound.iter().try_fold(Tally::default(), |acc, b| {
        let all = 0..b.table.num_rows();
        Ok(acc.merge(run_range(pipeline, b, all)?))
    })
}

fn run_parallel(pipeline: &Pipeline, bound: &[Bound], threads: usize) -> Result<Tally> {
    let pool = ThreadPoolBuilder::new()
        .num_threads(threads.max(1))
        .thread_name(|i| format!("rowchain-worker-{i}"))
        .build()
        .map_err(|e| PipelineError::ThreadPool(e.to_string()))?;

    let tasks: Vec<(usize, Range<usize>)> = bound
        .iter()
        .enumerate()
        .flat_map(|(i, b)| b.table.clusters().into_iter().map(move |r| (i, r)))
        .collect();
    debug!(tasks = tasks.len(), threads, "scheduling partitions");

    // First fault wins; the rest are logged and dropped.
    let fault: Mutex<Option<PipelineError>> = Mutex::new(None);
    let tally = pool.install(|| {
        tasks
            .into_par_iter()
            .filter_map(|(i, range)| match run_range(pipeline, &bound[i], range.clone()) {
                Ok(t) => Some(t),
                Err(e) => {
                    let mut first = fault.lock().unwrap_or_else(PoisonError::into_inner);
                    if first.is_none() {
                        *first = Some(e);
                    } else {
                        warn!(source = %bound[i].locator, ?range, error = %e, "dropping later fault");
                    }
                    None
                }
            })
            .reduce(Tally::default, Tally::merge)
    });

    match fault.into_inner().unwrap_or_else(PoisonError::into_inner) {
        Some(e) => Err(e),
        None => Ok(tally),
    }
}

/// The per-partition loop: read rows of `range` and dispatch them.
fn run_range(pipeline: &Pipeline, bound: &Bound, range: Range<usize>) -> Result<Tally> {
    debug!(source = %bound.locator, ?range, "partition start");
    let mut cursor = bound.table.cursor(range)?;
    let stages = pipeline.stages();
    let mut tally = Tally {
        partitions: 1,
        ..Tally::default()
    };

    match pipeline.mode() {
        Mode::Scalar => {
            while cursor.advance() {
                let record = bound.binding.read_record(&*cursor)?;
                tally.rows += 1;
                if walk(stages, record)?.is_some() {
                    tally.emitted += 1;
                }
            }
        }
        Mode::Batched => {
            let shape = &pipeline.resolution().input;
            loop {
                let mut record = VectorRecord::zeroed(shape);
                let mut filled = 0;
                while filled < LANES && cursor.advance() {
                    bound.binding.read_lane(&*cursor, filled, &mut record)?;
                    filled += 1;
                }
                if filled == 0 {
                    break;
                }
                tally.rows += filled as u64;
                tally.batches += 1;
                if let Some(out) = walk(stages, Batch::new(Mask::first(filled), record))? {
                    tally.emitted += out.mask.count() as u64;
                }
                if filled < LANES {
                    break;
                }
            }
        }
    }

    debug!(source = %bound.locator, rows = tally.rows, "partition done");
    Ok(tally)
}
