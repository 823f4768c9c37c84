use async_trait::async_trait;
use chrono::Utc;
use object_store::CredentialProvider;
use object_store::gcp::GcpCredentialProvider;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{PipelineError, PipelineResult};

use super::{LoadOutcome, LoadRequest, TableRef, Warehouse};

pub const DEFAULT_BASE_URL: &str = "https://bigquery.googleapis.com/bigquery/v2";

const WRITE_DISPOSITION: &str = "WRITE_APPEND";
const CREATE_DISPOSITION: &str = "CREATE_IF_NEEDED";

/// Loads staged objects through BigQuery load jobs.
#[derive(Debug, Clone)]
pub struct BigQueryWarehouse {
    http: Client,
    credentials: GcpCredentialProvider,
    base_url: String,
    poll_interval: Duration,
}

impl BigQueryWarehouse {
    pub fn new(credentials: GcpCredentialProvider) -> Self {
        Self {
            http: Client::new(),
            credentials,
            base_url: DEFAULT_BASE_URL.to_string(),
            poll_interval: Duration::from_secs(2),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    async fn send<T: DeserializeOwned>(
        &self,
        table: &TableRef,
        request: RequestBuilder,
    ) -> PipelineResult<T> {
        let fail = |message: String| PipelineError::Warehouse {
            table: table.to_string(),
            message,
        };

        let token = self
            .credentials
            .get_credential()
            .await
            .map_err(|e| fail(format!("could not obtain access token: {e}")))?;

        let res = request
            .bearer_auth(&token.bearer)
            .send()
            .await
            .map_err(|e| fail(format!("request failed: {e}")))?;

        let status = res.status();
        let body = res
            .text()
            .await
            .map_err(|e| fail(format!("failed to read response body: {e}")))?;

        if !status.is_success() {
            return Err(fail(format!("BigQuery returned status {status}: {body}")));
        }

        serde_json::from_str(&body).map_err(|e| fail(format!("unexpected job response: {e}")))
    }
}

fn new_job_id() -> String {
    format!("live_weather_load_{}", Utc::now().format("%Y%m%d%H%M%S%f"))
}

fn job_body(project: &str, job_id: &str, request: &LoadRequest) -> serde_json::Value {
    json!({
        "jobReference": { "projectId": project, "jobId": job_id },
        "configuration": {
            "load": {
                "sourceUris": request.source_uris,
                "sourceFormat": "PARQUET",
                "destinationTable": {
                    "projectId": request.destination.project,
                    "datasetId": request.destination.dataset,
                    "tableId": request.destination.table,
                },
                "writeDisposition": WRITE_DISPOSITION,
                "createDisposition": CREATE_DISPOSITION,
            }
        }
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorProto {
    reason: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStatus {
    state: String,
    error_result: Option<ErrorProto>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoadStatistics {
    output_rows: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct JobStatistics {
    #[serde(default)]
    load: LoadStatistics,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Job {
    job_reference: JobReference,
    status: JobStatus,
    #[serde(default)]
    statistics: JobStatistics,
}

#[async_trait]
impl Warehouse for BigQueryWarehouse {
    async fn load(&self, request: &LoadRequest) -> PipelineResult<LoadOutcome> {
        let table = &request.destination;
        let project = &table.project;
        let job_id = new_job_id();

        info!(%table, %job_id, sources = ?request.source_uris, "Submitting BigQuery load job");

        let mut job: Job = self
            .send(
                table,
                self.http
                    .post(format!("{}/projects/{project}/jobs", self.base_url))
                    .json(&job_body(project, &job_id, request)),
            )
            .await?;

        while job.status.state != "DONE" {
            debug!(
                job_id = %job.job_reference.job_id,
                state = %job.status.state,
                "Waiting for load job"
            );
            tokio::time::sleep(self.poll_interval).await;

            let mut get = self.http.get(format!(
                "{}/projects/{project}/jobs/{}",
                self.base_url, job.job_reference.job_id
            ));
            if let Some(location) = &job.job_reference.location {
                get = get.query(&[("location", location)]);
            }
            job = self.send(table, get).await?;
        }

        if let Some(err) = job.status.error_result {
            return Err(PipelineError::Warehouse {
                table: table.to_string(),
                message: format!(
                    "{}: {}",
                    err.reason.as_deref().unwrap_or("error"),
                    err.message.as_deref().unwrap_or("load job failed")
                ),
            });
        }

        let output_rows = job
            .statistics
            .load
            .output_rows
            .and_then(|n| n.parse().ok())
            .unwrap_or_default();

        info!(%table, job_id = %job.job_reference.job_id, output_rows, "Load job finished");
        Ok(LoadOutcome {
            job_id: job.job_reference.job_id,
            output_rows,
        })
    }
}
