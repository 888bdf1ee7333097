//! Pre-built schemas, tables and sources.

use crate::error::Result;
use crate::schema::{Record, ScalarType, Schema, Value};
use crate::source::{MemorySource, MemoryTable};

/// Table name used by every fixture source.
pub const EVENTS_TABLE: &str = "events";

/// `(x: float, y: int, z: double)`.
#[must_use]
pub fn events_schema() -> Schema {
    Schema::new([
        ("x", ScalarType::Float),
        ("y", ScalarType::Int),
        ("z", ScalarType::Double),
    ])
}

/// The two rows `(1.0, 2, 0.0)` and `(9.0, 10, 0.0)`.
#[must_use]
pub fn events_rows() -> Vec<Record> {
    vec![
        Record::new(vec![Value::Float(1.0), Value::Int(2), Value::Double(0.0)]),
        Record::new(vec![Value::Float(9.0), Value::Int(10), Value::Double(0.0)]),
    ]
}

#[must_use]
pub fn events_table() -> MemoryTable {
    MemoryTable::new(EVENTS_TABLE)
        .with_column("x", vec![1.0_f32, 9.0])
        .with_column("y", vec![2_i32, 10])
        .with_column("z", vec![0.0_f64, 0.0])
}

/// # Errors
/// Never in practice; the fixture columns have equal length.
pub fn events_source() -> Result<MemorySource> {
    MemorySource::new("mem://events").with_table(events_table())
}

/// Same schema as [`events_schema`], `rows` rows, split into clusters of
/// `cluster_rows`.
///
/// Values are small integers so float sums are exact in any order:
/// `x = i % 97`, `y = i % 13`, `z = i % 7`.
#[must_use]
pub fn numeric_table(rows: usize, cluster_rows: usize) -> MemoryTable {
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    let (x, y, z): (Vec<f32>, Vec<i32>, Vec<f64>) = (
        (0..rows).map(|i| (i % 97) as f32).collect(),
        (0..rows).map(|i| (i % 13) as i32).collect(),
        (0..rows).map(|i| (i % 7) as f64).collect(),
    );
    MemoryTable::new(EVENTS_TABLE)
        .with_column("x", x)
        .with_column("y", y)
        .with_column("z", z)
        .with_cluster_rows(cluster_rows)
}

/// A source holding one [`numeric_table`].
///
/// # Errors
/// Never in practice; the generated columns have equal length.
pub fn numeric_source(locator: &str, rows: usize, cluster_rows: usize) -> Result<MemorySource> {
    MemorySource::new(locator).with_table(numeric_table(rows, cluster_rows))
}

/// The rows of [`numeric_table`] as records, in storage order.
#[must_use]
pub fn numeric_rows(rows: usize) -> Vec<Record> {
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    let records = (0..rows)
        .map(|i| {
            Record::new(vec![
                Value::Float((i % 97) as f32),
                Value::Int((i % 13) as i32),
                Value::Double((i % 7) as f64),
            ])
        })
        .collect();
    records
}
