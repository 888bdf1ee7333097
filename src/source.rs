//! Columnar sources.
//!
//! The engine reads through three small traits:
//! - [`Source`]: a named container of tables (a file, a directory, a registry).
//! - [`Table`]: named typed columns plus the cluster boundaries parallel runs
//!   split on.
//! - [`Cursor`]: forward-only iteration over a row range, reading the current
//!   row's columns by position.
//!
//! [`MemorySource`]/[`MemoryTable`] implement them over typed column vectors, and
//! with the `io-json` feature a [`MemorySource`] can be loaded from a JSON
//! document:
//!
//! ```json
//! { "locator": "events.json",
//!   "tables": [ { "name": "events", "cluster_rows": 2,
//!                 "columns": [ { "name": "x", "type": "float", "values": [1.0, 9.0] } ] } ] }
//! ```
//!
//! Before any row is read, [`bind`] matches a [`Schema`] against a table's
//! columns by name and type.

use crate::error::{PipelineError, Result};
use crate::schema::{Field, Record, ScalarType, Scalar, Schema, Value};
use crate::vector::VectorRecord;
use std::collections::HashMap;
use std::fmt::Debug;
use std::ops::Range;
use std::sync::Arc;
use tracing::debug;

/// Rows per cluster when none is configured.
pub const DEFAULT_CLUSTER_ROWS: usize = 1024;

/// A collection of tables reachable by name.
pub trait Source: Send + Sync {
    /// Where the source came from, for error messages and reports.
    fn locator(&self) -> &str;

    /// Open a table.
    ///
    /// # Errors
    /// [`PipelineError::NoSuchSource`] if there is no such table.
    fn open(&self, table: &str) -> Result<Arc<dyn Table>>;
}

/// One table: equally long named columns.
pub trait Table: Send + Sync {
    fn name(&self) -> &str;

    fn columns(&self) -> Vec<Field>;

    fn num_rows(&self) -> usize;

    /// Contiguous, non-overlapping row ranges covering every row in order.
    fn clusters(&self) -> Vec<Range<usize>>;

    /// A cursor positioned before the first row of `range`.
    ///
    /// # Errors
    /// [`PipelineError::Source`] if the range lies outside the table.
    fn cursor(&self, range: Range<usize>) -> Result<Box<dyn Cursor + '_>>;
}

/// Forward-only row iteration.
pub trait Cursor {
    /// Move to the next row; `false` once the range is exhausted.
    fn advance(&mut self) -> bool;

    /// Value of table column `column` at the current row.
    fn read(&self, column: usize) -> Option<Value>;
}

/* ===================== Columns ===================== */

/// A typed column.
#[derive(Clone, Debug, PartialEq)]
pub enum ColumnData {
    Float(Vec<f32>),
    Double(Vec<f64>),
    Int(Vec<i32>),
    UInt(Vec<u32>),
    Long(Vec<i64>),
    Bool(Vec<bool>),
}

impl ColumnData {
    #[must_use]
    pub const fn scalar_type(&self) -> ScalarType {
        match self {
            Self::Float(_) => ScalarType::Float,
            Self::Double(_) => ScalarType::Double,
            Self::Int(_) => ScalarType::Int,
            Self::UInt(_) => ScalarType::UInt,
            Self::Long(_) => ScalarType::Long,
            Self::Bool(_) => ScalarType::Bool,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Float(v) => v.len(),
            Self::Double(v) => v.len(),
            Self::Int(v) => v.len(),
            Self::UInt(v) => v.len(),
            Self::Long(v) => v.len(),
            Self::Bool(v) => v.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn get(&self, row: usize) -> Option<Value> {
        match self {
            Self::Float(v) => v.get(row).copied().map(Value::Float),
            Self::Double(v) => v.get(row).copied().map(Value::Double),
            Self::Int(v) => v.get(row).copied().map(Value::Int),
            Self::UInt(v) => v.get(row).copied().map(Value::UInt),
            Self::Long(v) => v.get(row).copied().map(Value::Long),
            Self::Bool(v) => v.get(row).copied().map(Value::Bool),
        }
    }
}

/// A column and its name.
#[derive(Clone, Debug, PartialEq)]
pub struct NamedColumn {
    pub name: String,
    pub data: ColumnData,
}

/* ===================== In-memory tables ===================== */

/// A table held as typed column vectors.
#[derive(Clone, Debug, PartialEq)]
pub struct MemoryTable {
    name: String,
    columns: Vec<NamedColumn>,
    cluster_rows: usize,
}

impl MemoryTable {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            cluster_rows: DEFAULT_CLUSTER_ROWS,
        }
    }

    /// Append a column built from native values.
    #[must_use]
    pub fn with_column<T: Scalar>(self, name: impl Into<String>, values: Vec<T>) -> Self {
        self.with_column_data(name, T::into_column(values))
    }

    #[must_use]
    pub fn with_column_data(mut self, name: impl Into<String>, data: ColumnData) -> Self {
        self.columns.push(NamedColumn {
            name: name.into(),
            data,
        });
        self
    }

    /// Rows per cluster; 0 puts the whole table in one cluster.
    #[must_use]
    pub const fn with_cluster_rows(mut self, rows: usize) -> Self {
        self.cluster_rows = rows;
        self
    }

    #[must_use]
    pub fn column_data(&self) -> &[NamedColumn] {
        &self.columns
    }

    fn check_lengths(&self) -> Result<()> {
        let rows = self.num_rows();
        match self.columns.iter().find(|c| c.data.len() != rows) {
            Some(bad) => Err(PipelineError::Source(format!(
                "table '{}': column '{}' has {} rows, expected {rows}",
                self.name,
                bad.name,
                bad.data.len()
            ))),
            None => Ok(()),
        }
    }
}

impl Table for MemoryTable {
    fn name(&self) -> &str {
        &self.name
    }

    fn columns(&self) -> Vec<Field> {
        self.columns
            .iter()
            .map(|c| Field::new(c.name.clone(), c.data.scalar_type()))
            .collect()
    }

    fn num_rows(&self) -> usize {
        self.columns.first().map_or(0, |c| c.data.len())
    }

    fn clusters(&self) -> Vec<Range<usize>> {
        let rows = self.num_rows();
        if rows == 0 {
            return Vec::new();
        }
        if self.cluster_rows == 0 {
            return vec![0..rows];
        }
        (0..rows)
            .step_by(self.cluster_rows)
            .map(|start| start..(start + self.cluster_rows).min(rows))
            .collect()
    }

    fn cursor(&self, range: Range<usize>) -> Result<Box<dyn Cursor + '_>> {
        if range.start > range.end || range.end > self.num_rows() {
            return Err(PipelineError::Source(format!(
                "range {range:?} is outside table '{}' of {} rows",
                self.name,
                self.num_rows()
            )));
        }
        Ok(Box::new(MemoryCursor {
            table: self,
            next: range.start,
            end: range.end,
            current: None,
        }))
    }
}

struct MemoryCursor<'a> {
    table: &'a MemoryTable,
    next: usize,
    end: usize,
    current: Option<usize>,
}

impl Cursor for MemoryCursor<'_> {
    fn advance(&mut self) -> bool {
        if self.next < self.end {
            self.current = Some(self.next);
            self.next += 1;
            true
        } else {
            self.current = None;
            false
        }
    }

    fn read(&self, column: usize) -> Option<Value> {
        let row = self.current?;
        self.table.columns.get(column)?.data.get(row)
    }
}

/// Tables kept in memory under one locator.
#[derive(Clone, Debug, Default)]
pub struct MemorySource {
    locator: String,
    tables: HashMap<String, Arc<MemoryTable>>,
}

impl MemorySource {
    #[must_use]
    pub fn new(locator: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
            tables: HashMap::new(),
        }
    }

    /// Add (or replace) a table.
    ///
    /// # Errors
    /// [`PipelineError::Source`] if its columns differ in length.
    pub fn with_table(mut self, table: MemoryTable) -> Result<Self> {
        table.check_lengths()?;
        self.tables.insert(table.name.clone(), Arc::new(table));
        Ok(self)
    }

    #[must_use]
    pub fn table_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tables.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Source for MemorySource {
    fn locator(&self) -> &str {
        &self.locator
    }

    fn open(&self, table: &str) -> Result<Arc<dyn Table>> {
        self.tables
            .get(table)
            .map(|t| Arc::clone(t) as Arc<dyn Table>)
            .ok_or_else(|| PipelineError::NoSuchSource {
                table: table.to_string(),
                source_name: self.locator.clone(),
            })
    }
}

/* ===================== Binding ===================== */

/// Schema fields resolved to table column positions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Binding {
    columns: Vec<usize>,
}

/// Match every schema field to a table column of the same name and type.
///
/// # Errors
/// [`PipelineError::NoSuchColumn`] or [`PipelineError::ColumnTypeMismatch`].
pub fn bind(schema: &Schema, table: &dyn Table) -> Result<Binding> {
    let available = table.columns();
    let columns = schema
        .fields()
        .iter()
        .map(|field| {
            let position = available
                .iter()
                .position(|c| c.name == field.name)
                .ok_or_else(|| PipelineError::NoSuchColumn {
                    table: table.name().to_string(),
                    column: field.name.clone(),
                })?;
            let found = available[position].ty;
            if found == field.ty {
                Ok(position)
            } else {
                Err(PipelineError::ColumnTypeMismatch {
                    table: table.name().to_string(),
                    column: field.name.clone(),
                    expected: field.ty,
                    found,
                })
            }
        })
        .collect::<Result<Vec<_>>>()?;
    debug!(table = table.name(), ?columns, "bound schema");
    Ok(Binding { columns })
}

impl Binding {
    #[must_use]
    pub fn columns(&self) -> &[usize] {
        &self.columns
    }

    /// The cursor's current row as a record in schema order.
    ///
    /// # Errors
    /// [`PipelineError::Source`] if the cursor has no value for a bound column.
    pub fn read_record(&self, cursor: &dyn Cursor) -> Result<Record> {
        self.columns
            .iter()
            .map(|&c| cursor.read(c).ok_or_else(|| missing(c)))
            .collect::<Result<Vec<_>>>()
            .map(Record::new)
    }

    /// Store the cursor's current row into lane `lane` of `out`.
    ///
    /// # Errors
    /// As [`Binding::read_record`].
    pub fn read_lane(&self, cursor: &dyn Cursor, lane: usize, out: &mut VectorRecord) -> Result<()> {
        for (vector, &c) in out.vectors_mut().iter_mut().zip(&self.columns) {
            let value = cursor.read(c).ok_or_else(|| missing(c))?;
            if !vector.set_lane(lane, value) {
                return Err(PipelineError::Source(format!(
                    "column {c} value {value} does not fit lane {lane}"
                )));
            }
        }
        Ok(())
    }
}

fn missing(column: usize) -> PipelineError {
    PipelineError::Source(format!("cursor has no value for column {column}"))
}

/* ===================== JSON loading ===================== */

#[cfg(feature = "io-json")]
mod json {
    use super::{ColumnData, MemorySource, MemoryTable, DEFAULT_CLUSTER_ROWS};
    use crate::error::{PipelineError, Result};
    use crate::schema::ScalarType;
    use serde::Deserialize;
    use serde_json::Value as JsonValue;
    use std::fs::read_to_string;
    use std::path::Path;

    #[derive(Deserialize)]
    struct SourceDoc {
        #[serde(default)]
        locator: Option<String>,
        tables: Vec<TableDoc>,
    }

    #[derive(Deserialize)]
    struct TableDoc {
        name: String,
        #[serde(default = "default_cluster_rows")]
        cluster_rows: usize,
        columns: Vec<ColumnDoc>,
    }

    #[derive(Deserialize)]
    struct ColumnDoc {
        name: String,
        #[serde(rename = "type")]
        ty: ScalarType,
        values: JsonValue,
    }

    const fn default_cluster_rows() -> usize {
        DEFAULT_CLUSTER_ROWS
    }

    fn column(ty: ScalarType, values: JsonValue) -> serde_json::Result<ColumnData> {
        use serde_json::from_value;
        Ok(match ty {
            ScalarType::Float => ColumnData::Float(from_value(values)?),
            ScalarType::Double => ColumnData::Double(from_value(values)?),
            ScalarType::Int => ColumnData::Int(from_value(values)?),
            ScalarType::UInt => ColumnData::UInt(from_value(values)?),
            ScalarType::Long => ColumnData::Long(from_value(values)?),
            ScalarType::Bool => ColumnData::Bool(from_value(values)?),
        })
    }

    impl MemorySource {
        /// Parse a JSON source document. `locator` is used when the document
        /// names none.
        ///
        /// # Errors
        /// [`PipelineError::Source`] on malformed JSON, values that do not fit
        /// the declared column type, or columns of unequal length.
        pub fn from_json_str(locator: &str, text: &str) -> Result<Self> {
            let doc: SourceDoc = serde_json::from_str(text)
                .map_err(|e| PipelineError::Source(format!("parse {locator}: {e}")))?;
            let mut source = Self::new(doc.locator.unwrap_or_else(|| locator.to_string()));
            for t in doc.tables {
                let mut table = MemoryTable::new(t.name.clone()).with_cluster_rows(t.cluster_rows);
                for c in t.columns {
                    let data = column(c.ty, c.values).map_err(|e| {
                        PipelineError::Source(format!(
                            "{locator}: column '{}' of table '{}' is not {}: {e}",
                            c.name, t.name, c.ty
                        ))
                    })?;
                    table = table.with_column_data(c.name, data);
                }
                source = source.with_table(table)?;
            }
            Ok(source)
        }

        /// Read and parse a JSON source file; its path is the default locator.
        ///
        /// # Errors
        /// [`PipelineError::Source`] if the file cannot be read or parsed.
        pub fn from_json_path(path: impl AsRef<Path>) -> Result<Self> {
            let path = path.as_ref();
            let text = read_to_string(path)
                .map_err(|e| PipelineError::Source(format!("open {}: {e}", path.display())))?;
            Self::from_json_str(&path.display().to_string(), &text)
        }
    }
}
