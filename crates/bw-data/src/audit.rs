//! Append-only audit trail for the serving path.
//!
//! Every prediction request produces exactly one record: either the
//! prediction with the model version that produced it, or the error with the
//! offending payload.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use bw_types::{BwResult, RawInput};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub sepal_length: Option<f64>,
    pub sepal_width: Option<f64>,
    pub petal_length: Option<f64>,
    pub petal_width: Option<f64>,
    pub prediction: Option<usize>,
    pub model_version: Option<String>,
    pub error: Option<String>,
    /// Raw request body, kept verbatim for failed requests.
    pub payload: Option<serde_json::Value>,
}

impl AuditRecord {
    pub fn prediction(input: &RawInput, prediction: usize, model_version: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            sepal_length: Some(input.sepal_length),
            sepal_width: Some(input.sepal_width),
            petal_length: Some(input.petal_length),
            petal_width: Some(input.petal_width),
            prediction: Some(prediction),
            model_version: Some(model_version.into()),
            error: None,
            payload: None,
        }
    }

    /// Failed request: numeric fields are captured where the payload has them.
    pub fn failure(
        payload: &serde_json::Value,
        error: impl Into<String>,
        model_version: Option<String>,
    ) -> Self {
        let field = |name: &str| payload.get(name).and_then(serde_json::Value::as_f64);
        Self {
            timestamp: Utc::now(),
            sepal_length: field("sepal_length"),
            sepal_width: field("sepal_width"),
            petal_length: field("petal_length"),
            petal_width: field("petal_width"),
            prediction: None,
            model_version,
            error: Some(error.into()),
            payload: Some(payload.clone()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Append-only record store.
pub trait AuditSink: Send + Sync {
    fn append(&self, record: AuditRecord) -> BwResult<()>;
}

/// JSON-lines file sink, opened in append mode.
#[derive(Debug)]
pub struct JsonlAuditLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlAuditLog {
    pub fn open<P: AsRef<Path>>(path: P) -> BwResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        tracing::info!("Audit log at {}", path.display());
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every record back, oldest first.
    pub fn read_all<P: AsRef<Path>>(path: P) -> BwResult<Vec<AuditRecord>> {
        let reader = BufReader::new(File::open(path)?);
        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str(&line)?);
        }
        Ok(records)
    }
}

impl AuditSink for JsonlAuditLog {
    fn append(&self, record: AuditRecord) -> BwResult<()> {
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');
        let mut file = self.file.lock();
        file.write_all(line.as_bytes())?;
        file.flush()?;
        Ok(())
    }
}

/// In-memory sink for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }
}

impl AuditSink for MemoryAuditLog {
    fn append(&self, record: AuditRecord) -> BwResult<()> {
        self.records.lock().push(record);
        Ok(())
    }
}
