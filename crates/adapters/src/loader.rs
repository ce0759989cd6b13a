use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use flate2::read::GzDecoder;
use pgform_core::state::{InitDataLoader, LoaderError};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("failed to read document at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse document at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Reads a JSON document, transparently gunzipping `*.gz` files. An empty
/// file reads as `null`.
pub fn read_document(path: &Path) -> Result<Value, DocumentError> {
    let file = File::open(path).map_err(|source| DocumentError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader: Box<dyn Read> = if is_gzip(path) {
        Box::new(GzDecoder::new(BufReader::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };

    let mut raw = String::new();
    reader
        .read_to_string(&mut raw)
        .map_err(|source| DocumentError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    if raw.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&raw).map_err(|source| DocumentError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

pub(crate) fn is_gzip(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("gz"))
}

/// Initial data read from a file on every load.
#[derive(Debug, Clone)]
pub struct FileInitDataLoader {
    path: PathBuf,
}

impl FileInitDataLoader {
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
impl InitDataLoader for FileInitDataLoader {
    async fn load(&self) -> Result<Value, LoaderError> {
        debug!(path = %self.path.display(), "reading initial data");
        read_document(&self.path).map_err(|error| {
            LoaderError::new(error.to_string())
                .with_response(json!({ "path": self.path.display().to_string() }))
        })
    }
}

/// Fixed initial data, handy for create-mode presets.
#[derive(Debug, Clone, Default)]
pub struct StaticLoader {
    data: Value,
}

impl StaticLoader {
    #[must_use]
    pub fn new(data: Value) -> Self {
        Self { data }
    }
}

#[async_trait]
impl InitDataLoader for StaticLoader {
    async fn load(&self) -> Result<Value, LoaderError> {
        Ok(self.data.clone())
    }
}
