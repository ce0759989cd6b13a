use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use pgform_core::state::{SaveError, SaveHandler};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::info;

use crate::loader::is_gzip;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to write export file at {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize JSON export: {0}")]
    Json(#[from] serde_json::Error),
}

/// Writes `{"is_new": .., "payload": ..}` as pretty JSON, gzipped for `*.gz`.
pub fn write_payload(path: &Path, is_new: bool, payload: &Value) -> Result<(), ExportError> {
    let body = serde_json::to_vec_pretty(&json!({ "is_new": is_new, "payload": payload }))?;
    let write_error = |source| ExportError::Write {
        path: path.display().to_string(),
        source,
    };

    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(write_error)?;
    }
    let file = File::create(path).map_err(write_error)?;
    if is_gzip(path) {
        let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        encoder.write_all(&body).map_err(write_error)?;
        encoder.finish().map_err(write_error)?;
    } else {
        let mut writer = BufWriter::new(file);
        writer.write_all(&body).map_err(write_error)?;
        writer.flush().map_err(write_error)?;
    }
    Ok(())
}

/// Exports collection rows as CSV, one column per header. Nested values are
/// written as compact JSON.
pub fn export_rows_to_csv(path: &Path, headers: &[String], rows: &[Value]) -> Result<usize, ExportError> {
    let mut content = String::new();
    content.push_str(
        &headers
            .iter()
            .map(|header| csv_escape(header))
            .collect::<Vec<_>>()
            .join(","),
    );
    content.push('\n');

    for row in rows {
        let values = headers
            .iter()
            .map(|header| csv_escape(&cell_text(row.get(header))))
            .collect::<Vec<_>>();
        content.push_str(&values.join(","));
        content.push('\n');
    }

    let write_error = |source| ExportError::Write {
        path: path.display().to_string(),
        source,
    };
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(write_error)?;
    }
    fs::write(path, content).map_err(write_error)?;
    Ok(rows.len())
}

fn cell_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    }
}

fn csv_escape(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Save handler that drops each payload into a file.
#[derive(Debug, Clone)]
pub struct FileSaveHandler {
    path: PathBuf,
}

impl FileSaveHandler {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SaveHandler for FileSaveHandler {
    async fn save(&self, is_new: bool, payload: &Value) -> Result<(), SaveError> {
        write_payload(&self.path, is_new, payload).map_err(|error| SaveError::new(error.to_string()))?;
        info!(path = %self.path.display(), is_new, "saved form changes");
        Ok(())
    }
}
