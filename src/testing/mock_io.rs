//! JSON source documents in temporary files.

use crate::source::{ColumnData, MemoryTable};
use serde_json::{json, Value as JsonValue};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// A temporary file that is deleted when dropped.
pub struct TempFilePath {
    #[allow(dead_code)]
    temp_file: NamedTempFile,
    path: PathBuf,
}

impl TempFilePath {
    /// # Errors
    /// If the file cannot be created.
    pub fn with_extension(extension: &str) -> std::io::Result<Self> {
        let temp_file = tempfile::Builder::new()
            .suffix(&format!(".{extension}"))
            .tempfile()?;
        let path = temp_file.path().to_path_buf();
        Ok(Self { temp_file, path })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// The JSON document [`MemorySource::from_json_path`](crate::MemorySource::from_json_path)
/// reads back into `tables`.
#[must_use]
pub fn source_document(tables: &[MemoryTable], cluster_rows: usize) -> JsonValue {
    let tables: Vec<JsonValue> = tables
        .iter()
        .map(|t| {
            let columns: Vec<JsonValue> = t
                .column_data()
                .iter()
                .map(|c| {
                    json!({
                        "name": c.name,
                        "type": c.data.scalar_type(),
                        "values": column_values(&c.data),
                    })
                })
                .collect();
            json!({ "name": crate::Table::name(t), "cluster_rows": cluster_rows, "columns": columns })
        })
        .collect();
    json!({ "tables": tables })
}

fn column_values(data: &ColumnData) -> JsonValue {
    match data {
        ColumnData::Float(v) => json!(v),
        ColumnData::Double(v) => json!(v),
        ColumnData::Int(v) => json!(v),
        ColumnData::UInt(v) => json!(v),
        ColumnData::Long(v) => json!(v),
        ColumnData::Bool(v) => json!(v),
    }
}

/// Write any JSON value to a temporary `.json` file.
///
/// # Errors
/// If the file cannot be created or written.
pub fn mock_json_file(doc: &JsonValue) -> std::io::Result<TempFilePath> {
    let temp = TempFilePath::with_extension("json")?;
    let mut file = std::fs::File::create(temp.path())?;
    serde_json::to_writer_pretty(&mut file, doc)?;
    file.flush()?;
    Ok(temp)
}

/// Write `tables` as a JSON source file.
///
/// # Errors
/// If the file cannot be created or written.
pub fn mock_source_file(tables: &[MemoryTable], cluster_rows: usize) -> std::io::Result<TempFilePath> {
    mock_json_file(&source_document(tables, cluster_rows))
}
