//! Appending staged Parquet files to the destination table.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug};

use crate::error::PipelineResult;

pub mod bigquery;
pub mod memory;

pub use bigquery::BigQueryWarehouse;
pub use memory::MemoryWarehouse;

/// Fully qualified destination table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    pub project: String,
    pub dataset: String,
    pub table: String,
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project, self.dataset, self.table)
    }
}

/// A Parquet load that appends to one table, creating it on first load.
///
/// Rows already in the table are kept and duplicates are not detected.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadRequest {
    /// Fully qualified object URIs. The hourly run always sends one.
    pub source_uris: Vec<String>,
    pub destination: TableRef,
}

impl LoadRequest {
    pub fn append(source_uri: String, destination: TableRef) -> Self {
        Self {
            source_uris: vec![source_uri],
            destination,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOutcome {
    pub job_id: String,
    pub output_rows: u64,
}

#[async_trait]
pub trait Warehouse: Send + Sync + Debug {
    /// Run the load to completion.
    async fn load(&self, request: &LoadRequest) -> PipelineResult<LoadOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_request_targets_one_object() {
        let table = TableRef {
            project: "p".into(),
            dataset: "energy_data".into(),
            table: "hourly_updated_weather".into(),
        };
        let req = LoadRequest::append("gs://b/staged/x.parquet".into(), table.clone());

        assert_eq!(req.source_uris, vec!["gs://b/staged/x.parquet".to_string()]);
        assert_eq!(req.destination.to_string(), "p.energy_data.hourly_updated_weather");
    }
}
