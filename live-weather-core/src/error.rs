use std::path::PathBuf;

use reqwest::StatusCode;
use thiserror::Error;

use crate::pipeline::StageKind;

/// Errors raised by pipeline stages.
///
/// Every variant is fatal for the run that produced it.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The weather API answered with a non-success status.
    #[error("OpenWeatherMap API returned status {status}: {body}")]
    Upstream { status: StatusCode, body: String },

    #[error("HTTP request to {url} failed")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("I/O error on {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Input is not valid JSON.
    #[error("Failed to parse JSON from {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Input is JSON but lacks a required field or has the wrong type.
    #[error("Observation in {} does not match the expected shape: {source}", path.display())]
    Schema {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Observation timestamp {dt} is out of range")]
    InvalidTimestamp { dt: i64 },

    #[error("Columnar encoding failed: {0}")]
    Arrow(#[from] arrow_schema::ArrowError),

    #[error("Parquet I/O failed: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Object storage operation on '{key}' failed")]
    Storage {
        key: String,
        #[source]
        source: object_store::Error,
    },

    #[error("Warehouse load into {table} failed: {message}")]
    Warehouse { table: String, message: String },

    #[error("Stage '{stage}' failed")]
    StageFailed {
        stage: StageKind,
        #[source]
        source: Box<PipelineError>,
    },
}

impl PipelineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    /// Split a `serde_json` failure into "not JSON" and "wrong shape".
    pub(crate) fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        let path = path.into();
        match source.classify() {
            serde_json::error::Category::Data => Self::Schema { path, source },
            _ => Self::Parse { path, source },
        }
    }

    /// Status code carried by an upstream failure, looking through stage wrappers.
    pub fn upstream_status(&self) -> Option<StatusCode> {
        match self {
            Self::Upstream { status, .. } => Some(*status),
            Self::StageFailed { source, .. } => source.upstream_status(),
            _ => None,
        }
    }

    /// The innermost error, with stage wrappers removed.
    pub fn root(&self) -> &PipelineError {
        match self {
            Self::StageFailed { source, .. } => source.root(),
            other => other,
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
