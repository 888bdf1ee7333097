//! # Rowchain
//!
//! A **typed row pipeline engine**: describe a chain of transforms and filters
//! over fixed-schema tabular records, have every link type-checked while the
//! chain is built, then run it over columnar sources sequentially, in parallel
//! across storage clusters, or eight rows at a time in masked batches.
//!
//! ## Key Features
//!
//! - **Build-time shape checking** - each append re-resolves the chain and
//!   rejects a stage whose input does not match what precedes it
//! - **Closure stages** - `map`, `filter`, `try_map`, `try_filter`, `for_each`,
//!   with argument and return shapes taken from Rust tuple types
//! - **Batched execution** - `map_batched` / `filter_batched` over
//!   [`Lanes`] with a validity [`Mask`]; filters narrow the mask instead of
//!   compacting rows
//! - **Sequential and parallel execution** - one task per source cluster on a
//!   Rayon pool, joined before finalize
//! - **Per-worker state** - [`PerWorker`] slots reduced once at finalize
//! - **Single live handle** - extending or running a pipeline retires every
//!   other handle of it
//!
//! ## Quick Start
//!
//! ```
//! use rowchain::*;
//!
//! # fn main() -> rowchain::Result<()> {
//! let schema = Schema::new([
//!     ("x", ScalarType::Float),
//!     ("y", ScalarType::Int),
//!     ("z", ScalarType::Double),
//! ]);
//! let source = MemorySource::new("mem").with_table(
//!     MemoryTable::new("events")
//!         .with_column("x", vec![1.0_f32, 9.0])
//!         .with_column("y", vec![2_i32, 10])
//!         .with_column("z", vec![0.0_f64, 0.0]),
//! )?;
//!
//! let summary = Pipeline::new(schema)
//!     .map(|(x, y, _z): (f32, i32, f64)| (y, x))?
//!     .filter(|(y, _x): (i32, f32)| y <= 5)?
//!     .map(|(y, _x): (i32, f32)| y * y + 1)?
//!     .count()?
//!     .process("events", &[&source])?;
//!
//! assert_eq!(summary.emitted, 1);
//! assert_eq!(summary.metric(3, "count"), Some(&serde_json::json!(1)));
//! # Ok(())
//! # }
//! ```
//!
//! ## Core Concepts
//!
//! ### Schema, Record, Shape
//!
//! A [`Schema`] names and types the columns read from a table. Rows travel as
//! [`Record`]s, whose [`Shape`] is what the [`resolver`] compares between
//! stages.
//!
//! ### Stages
//!
//! A [`Stage`] is either a [`Mapper`] (may change the shape) or a [`Filter`]
//! (keeps it). Closures passed to the builder become stages; stateful stages
//! such as [`Count`] and [`Sum`] can also be built up front and placed with
//! [`Pipeline::create`] or [`Pipeline::stage`] so their totals stay readable.
//!
//! ### Execution
//!
//! [`Runner`] opens every source, binds the schema to its columns, dispatches
//! rows (or batches) through the chain, then calls each stage's `finalize` once
//! in order. [`Pipeline::process`] and [`Pipeline::process_parallel`] are the
//! shortcuts for the two [`ExecMode`]s.
//!
//! ## Feature Flags
//!
//! - `io-json` - Load a [`MemorySource`] from a JSON document
//!
//! ## Module Overview
//!
//! - [`schema`] - Scalar types, shapes, schemas, records
//! - [`vector`] - Lanes, masks and batches
//! - [`stage`] - Mapper / Filter traits and the stage enum
//! - [`resolver`] - Type flow resolution and mode selection
//! - [`pipeline`] - The builder
//! - [`dispatch`] - One record or batch through a chain
//! - [`runner`] - Sequential and parallel execution
//! - [`source`] - Columnar source traits and the in-memory source
//! - [`combiners`] - Count and Sum stages

pub mod accumulator;
pub mod combiners;
pub mod dispatch;
pub mod error;
pub mod finalize;
pub mod pipeline;
pub mod resolver;
pub mod runner;
pub mod schema;
pub mod source;
pub mod stage;
pub mod testing;
pub mod vector;

pub use accumulator::PerWorker;
pub use combiners::{Count, Sum};
pub use dispatch::{execute_batch, execute_chain};
pub use error::{PipelineError, Result};
pub use finalize::StageReport;
pub use pipeline::{Pipeline, PipelineExplanation};
pub use resolver::{resolve, Mode, Resolution, StageDecl, StageShapes};
pub use runner::{ExecMode, RunSummary, Runner};
pub use schema::{Field, Record, Row, Scalar, ScalarType, Schema, Shape, Value};
pub use source::{bind, Binding, ColumnData, Cursor, MemorySource, MemoryTable, Source, Table};
pub use stage::{Convention, Filter, Mapper, Stage, StageKind};
pub use vector::{Batch, Lanes, Mask, Vector, VectorRecord, VectorRow, LANES};
