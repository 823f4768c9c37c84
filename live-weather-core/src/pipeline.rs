//! Sequential run driver.
//!
//! A run walks [`StageKind::CHAIN`] in order. The first stage that still fails
//! after its retries halts the run; whether cleanup then runs is decided by
//! [`CleanupPolicy`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::PipelineConfig;
use crate::context::RunContext;
use crate::error::{PipelineError, PipelineResult};
use crate::model::ObservationRow;
use crate::provider::{WeatherProvider, provider_from_config};
use crate::storage::StorageProvider;
use crate::transform::transform_file;
use crate::warehouse::{BigQueryWarehouse, LoadOutcome, LoadRequest, TableRef, Warehouse};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Fetch,
    UploadRaw,
    Transform,
    UploadStaged,
    Load,
    Cleanup,
}

impl StageKind {
    /// Execution order of a run.
    pub const CHAIN: [StageKind; 6] = [
        StageKind::Fetch,
        StageKind::UploadRaw,
        StageKind::Transform,
        StageKind::UploadStaged,
        StageKind::Load,
        StageKind::Cleanup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Fetch => "fetch",
            StageKind::UploadRaw => "upload-raw",
            StageKind::Transform => "transform",
            StageKind::UploadStaged => "upload-staged",
            StageKind::Load => "load",
            StageKind::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// When local files are removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CleanupPolicy {
    /// Only after every other stage succeeded; a failed run keeps its files.
    #[default]
    OnSuccess,
    /// After every run, failed or not.
    Always,
}

impl FromStr for CleanupPolicy {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "on-success" => Ok(CleanupPolicy::OnSuccess),
            "always" => Ok(CleanupPolicy::Always),
            _ => Err(anyhow::anyhow!(
                "Unknown cleanup policy '{value}'. Supported: on-success, always."
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    Succeeded,
    Failed,
    Skipped,
}

#[derive(Debug, Clone)]
pub struct StageResult {
    pub stage: StageKind,
    pub status: StageStatus,
    /// Zero for skipped stages.
    pub attempts: u32,
    pub duration: Duration,
}

/// Outcome of one run.
#[derive(Debug)]
pub struct RunReport {
    pub context: RunContext,
    pub stages: Vec<StageResult>,
    /// The row written by the transform stage.
    pub row: Option<ObservationRow>,
    pub load: Option<LoadOutcome>,
    pub error: Option<PipelineError>,
    pub duration: Duration,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn failed_stage(&self) -> Option<StageKind> {
        self.stages
            .iter()
            .find(|r| r.status == StageStatus::Failed)
            .map(|r| r.stage)
    }

    pub fn status_of(&self, stage: StageKind) -> Option<StageStatus> {
        self.stages.iter().find(|r| r.stage == stage).map(|r| r.status)
    }

    pub fn into_result(mut self) -> PipelineResult<RunReport> {
        match self.error.take() {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }
}

/// The hourly ingestion pipeline with its collaborators.
#[derive(Debug)]
pub struct Pipeline {
    provider: Box<dyn WeatherProvider>,
    storage: StorageProvider,
    warehouse: Box<dyn Warehouse>,
    table: TableRef,
    cleanup: CleanupPolicy,
    retries: u32,
    retry_delay: Duration,
}

impl Pipeline {
    pub fn new(
        config: &PipelineConfig,
        provider: Box<dyn WeatherProvider>,
        storage: StorageProvider,
        warehouse: Box<dyn Warehouse>,
    ) -> Self {
        Self {
            provider,
            storage,
            warehouse,
            table: config.table.clone(),
            cleanup: config.cleanup,
            retries: config.retries,
            retry_delay: config.retry_delay,
        }
    }

    /// OpenWeatherMap, the configured GCS bucket and BigQuery.
    pub fn from_config(config: &PipelineConfig) -> PipelineResult<Self> {
        let storage = StorageProvider::gcs(&config.bucket)?;
        let credentials = storage.credentials().cloned().ok_or_else(|| {
            PipelineError::Warehouse {
                table: config.table.to_string(),
                message: "no GCP credentials available for BigQuery".to_string(),
            }
        })?;
        let warehouse = BigQueryWarehouse::new(credentials);

        Ok(Self::new(
            config,
            provider_from_config(config),
            storage,
            Box::new(warehouse),
        ))
    }

    pub fn with_cleanup(mut self, cleanup: CleanupPolicy) -> Self {
        self.cleanup = cleanup;
        self
    }

    pub fn cleanup_policy(&self) -> CleanupPolicy {
        self.cleanup
    }

    /// Execute every stage for `ctx`. Never panics on stage failure; the
    /// error is carried in the report.
    pub async fn run(&self, ctx: &RunContext) -> RunReport {
        let started = Instant::now();
        info!(
            logical_date = %ctx.logical_date(),
            location = %ctx.location(),
            stages = StageKind::CHAIN.len(),
            "Starting live weather run"
        );

        let mut report = RunReport {
            context: ctx.clone(),
            stages: Vec::with_capacity(StageKind::CHAIN.len()),
            row: None,
            load: None,
            error: None,
            duration: Duration::ZERO,
        };

        for stage in StageKind::CHAIN {
            let halted = report.error.is_some();
            if halted && !(stage == StageKind::Cleanup && self.cleanup == CleanupPolicy::Always) {
                info!(%stage, "Skipping stage");
                report.stages.push(StageResult {
                    stage,
                    status: StageStatus::Skipped,
                    attempts: 0,
                    duration: Duration::ZERO,
                });
                continue;
            }

            let stage_started = Instant::now();
            let (attempts, result) = self.run_with_retries(stage, ctx, &mut report).await;
            let status = if result.is_ok() {
                StageStatus::Succeeded
            } else {
                StageStatus::Failed
            };
            report.stages.push(StageResult {
                stage,
                status,
                attempts,
                duration: stage_started.elapsed(),
            });

            if let Err(err) = result {
                error!(%stage, attempts, error = %err, "Stage failed");
                // A cleanup failure never masks the stage that halted the run.
                if report.error.is_none() {
                    report.error = Some(PipelineError::StageFailed {
                        stage,
                        source: Box::new(err),
                    });
                }
            }
        }

        report.duration = started.elapsed();
        match report.failed_stage() {
            None => info!(
                logical_date = %ctx.logical_date(),
                elapsed_ms = report.duration.as_millis() as u64,
                "Run completed"
            ),
            Some(stage) => error!(
                logical_date = %ctx.logical_date(),
                %stage,
                "Run halted"
            ),
        }
        report
    }

    async fn run_with_retries(
        &self,
        stage: StageKind,
        ctx: &RunContext,
        report: &mut RunReport,
    ) -> (u32, PipelineResult<()>) {
        let mut attempt = 0;
        loop {
            attempt += 1;
            info!(%stage, attempt, "Running stage");

            match self.execute(stage, ctx, report).await {
                Ok(()) => return (attempt, Ok(())),
                Err(err) if attempt <= self.retries => {
                    warn!(
                        %stage,
                        attempt,
                        error = %err,
                        retry_in_secs = self.retry_delay.as_secs(),
                        "Stage failed, retrying"
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(err) => return (attempt, Err(err)),
            }
        }
    }

    async fn execute(
        &self,
        stage: StageKind,
        ctx: &RunContext,
        report: &mut RunReport,
    ) -> PipelineResult<()> {
        match stage {
            StageKind::Fetch => {
                self.provider
                    .download_current(ctx.location(), ctx.raw_path())
                    .await
            }
            StageKind::UploadRaw => {
                self.storage
                    .upload_file(ctx.raw_path(), ctx.raw_object_key())
                    .await?;
                Ok(())
            }
            StageKind::Transform => {
                report.row = Some(transform_file(ctx.raw_path(), ctx.parquet_path()).await?);
                Ok(())
            }
            StageKind::UploadStaged => {
                self.storage
                    .upload_file(ctx.parquet_path(), ctx.staged_object_key())
                    .await?;
                Ok(())
            }
            StageKind::Load => {
                let request = LoadRequest::append(
                    self.storage.uri_for(ctx.staged_object_key()),
                    self.table.clone(),
                );
                report.load = Some(self.warehouse.load(&request).await?);
                Ok(())
            }
            StageKind::Cleanup => remove_local_files(ctx).await,
        }
    }
}

async fn remove_local_files(ctx: &RunContext) -> PipelineResult<()> {
    for path in ctx.local_files() {
        match tokio::fs::remove_file(path).await {
            Ok(()) => info!(path = %path.display(), "Deleted local file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "Local file already absent");
            }
            Err(e) => return Err(PipelineError::io(path, e)),
        }
    }
    Ok(())
}
