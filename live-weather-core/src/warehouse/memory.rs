use arrow_array::RecordBatch;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::info;

use crate::error::{PipelineError, PipelineResult};
use crate::model::ObservationRow;
use crate::storage::StorageProvider;
use crate::transform::{decode_parquet, rows_from_batch};

use super::{LoadOutcome, LoadRequest, TableRef, Warehouse};

/// Warehouse kept in process memory, reading staged objects from `storage`.
///
/// Tables are created on first load, loads with a different schema are
/// rejected, and appends never deduplicate.
#[derive(Debug)]
pub struct MemoryWarehouse {
    storage: StorageProvider,
    tables: Mutex<HashMap<TableRef, Vec<RecordBatch>>>,
    jobs: AtomicU64,
}

impl MemoryWarehouse {
    pub fn new(storage: StorageProvider) -> Self {
        Self {
            storage,
            tables: Mutex::new(HashMap::new()),
            jobs: AtomicU64::new(0),
        }
    }

    /// All rows of `table`, in load order. `None` if the table does not exist.
    pub async fn rows(&self, table: &TableRef) -> PipelineResult<Option<Vec<ObservationRow>>> {
        let tables = self.tables.lock().await;
        let Some(batches) = tables.get(table) else {
            return Ok(None);
        };

        let mut rows = Vec::new();
        for batch in batches {
            rows.extend(rows_from_batch(batch)?);
        }
        Ok(Some(rows))
    }

    async fn fetch_batches(&self, request: &LoadRequest) -> PipelineResult<Vec<RecordBatch>> {
        let mut batches = Vec::new();
        for uri in &request.source_uris {
            let key = self.storage.key_for_uri(uri).ok_or_else(|| {
                fail(
                    &request.destination,
                    format!("{uri} is not in {:?}", self.storage),
                )
            })?;
            batches.extend(decode_parquet(self.storage.get(key).await?)?);
        }
        Ok(batches)
    }
}

fn fail(table: &TableRef, message: String) -> PipelineError {
    PipelineError::Warehouse {
        table: table.to_string(),
        message,
    }
}

#[async_trait]
impl Warehouse for MemoryWarehouse {
    async fn load(&self, request: &LoadRequest) -> PipelineResult<LoadOutcome> {
        let table = &request.destination;
        let incoming = self.fetch_batches(request).await?;
        let output_rows: usize = incoming.iter().map(RecordBatch::num_rows).sum();

        let mut tables = self.tables.lock().await;
        let table_schema = tables
            .get(table)
            .and_then(|batches| batches.first())
            .or(incoming.first())
            .map(RecordBatch::schema);
        if let Some(schema) = table_schema {
            if let Some(bad) = incoming.iter().find(|b| b.schema().fields() != schema.fields()) {
                return Err(fail(
                    table,
                    format!("schema mismatch: table has {schema}, file has {}", bad.schema()),
                ));
            }
        }

        tables.entry(table.clone()).or_default().extend(incoming);
        drop(tables);

        let job_id = format!("memory_load_{}", self.jobs.fetch_add(1, Ordering::Relaxed) + 1);

        info!(%table, %job_id, output_rows, "Loaded into in-memory table");
        Ok(LoadOutcome {
            job_id,
            output_rows: output_rows as u64,
        })
    }
}
