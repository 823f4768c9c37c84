use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use inquire::{Password, Text};
use tracing::{error, info};

use live_weather_core::{
    CleanupPolicy, Config, Pipeline, PipelineConfig, RunContext, RunReport, schedule,
};

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(
    name = "live-weather",
    version,
    about = "Hourly OpenWeatherMap to BigQuery ingestion"
)]
pub struct Cli {
    /// Log level used when RUST_LOG is unset (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Store the API key and GCP target in the config file.
    Configure,

    /// Ingest a single hour.
    Run {
        /// Logical date (RFC 3339); defaults to the last completed hour.
        #[arg(long, value_parser = parse_logical_date)]
        logical_date: Option<DateTime<Utc>>,

        /// Override the configured cleanup policy (on-success, always).
        #[arg(long)]
        cleanup: Option<CleanupPolicy>,

        /// Print the resolved run without fetching or writing anything.
        #[arg(long)]
        dry_run: bool,
    },

    /// Run every hour until interrupted.
    Schedule,
}

fn parse_logical_date(value: &str) -> Result<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("Invalid logical date '{value}', expected RFC 3339"))?;
    Ok(parsed.with_timezone(&Utc))
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        match self.command {
            Command::Configure => configure(),
            Command::Run {
                logical_date,
                cleanup,
                dry_run,
            } => {
                let mut config = load_config()?;
                if let Some(cleanup) = cleanup {
                    config.cleanup = cleanup;
                }
                let logical_date =
                    logical_date.unwrap_or_else(|| schedule::latest_logical_date(Utc::now()));
                let ctx = RunContext::new(logical_date, config.location, &config.work_dir);

                if dry_run {
                    print_plan(&config, &ctx);
                    return Ok(());
                }

                let pipeline = Pipeline::from_config(&config)?;
                let report = pipeline.run(&ctx).await;
                print_report(&report);
                report.into_result()?;
                Ok(())
            }
            Command::Schedule => {
                let config = load_config()?;
                run_schedule(&config).await
            }
        }
    }
}

fn load_config() -> Result<PipelineConfig> {
    Config::load()?.with_env().resolve()
}

fn configure() -> Result<()> {
    let mut config = Config::load()?;
    println!(
        "Configuring live-weather ({})",
        Config::config_file_path()?.display()
    );

    let api_key = Password::new("OpenWeatherMap API key:")
        .without_confirmation()
        .prompt()?;

    let mut project = Text::new("GCP project id:");
    if let Some(current) = config.gcp.project_id.as_deref() {
        project = project.with_default(current);
    }
    let project_id = project.prompt()?;

    let mut bucket = Text::new("GCS bucket:");
    if let Some(current) = config.gcp.bucket.as_deref() {
        bucket = bucket.with_default(current);
    }
    let bucket = bucket.prompt()?;

    config.openweather.api_key = Some(api_key.trim().to_string());
    config.gcp.project_id = Some(project_id.trim().to_string());
    config.gcp.bucket = Some(bucket.trim().to_string());
    config.save()?;

    println!("Saved.");
    Ok(())
}

/// Fires once per hour boundary. A failed run is logged and the loop moves on;
/// the next tick never starts before the previous run returned.
async fn run_schedule(config: &PipelineConfig) -> Result<()> {
    let pipeline = Pipeline::from_config(config)?;
    info!(
        location = %config.location,
        table = %config.table,
        cleanup = ?pipeline.cleanup_policy(),
        "Scheduler started"
    );

    loop {
        let now = Utc::now();
        let tick = schedule::next_tick(now);
        let wait = (tick - now).to_std().unwrap_or_default();
        info!(next_run = %tick, "Waiting for next hour");

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping scheduler");
                return Ok(());
            }
        }

        let ctx = RunContext::new(
            schedule::logical_date_for_tick(tick),
            config.location,
            &config.work_dir,
        );
        let report = pipeline.run(&ctx).await;
        if let Some(err) = &report.error {
            error!(logical_date = %ctx.logical_date(), error = %err, "Scheduled run failed");
        }
    }
}

fn print_plan(config: &PipelineConfig, ctx: &RunContext) {
    println!("Logical date:  {}", ctx.logical_date().to_rfc3339());
    println!("Location:      {}", ctx.location());
    println!("Raw file:      {}", ctx.raw_path().display());
    println!("Parquet file:  {}", ctx.parquet_path().display());
    println!("Raw object:    gs://{}/{}", config.bucket, ctx.raw_object_key());
    println!("Staged object: gs://{}/{}", config.bucket, ctx.staged_object_key());
    println!("Table:         {}", config.table);
    println!("Cleanup:       {:?}", config.cleanup);
    println!(
        "Retries:       {} (delay {}s)",
        config.retries,
        config.retry_delay.as_secs()
    );
}

fn print_report(report: &RunReport) {
    println!("Run {}", report.context.suffix());
    for stage in &report.stages {
        println!(
            "  {:<14} {:<10} attempts={} {}ms",
            stage.stage.as_str(),
            format!("{:?}", stage.status),
            stage.attempts,
            stage.duration.as_millis()
        );
    }
    if let Some(row) = &report.row {
        println!(
            "  observed {} temp={} humidity={} pressure={}",
            row.timestamp.to_rfc3339(),
            row.temp,
            row.humidity,
            row.pressure
        );
    }
    if let Some(load) = &report.load {
        println!("  loaded {} row(s) in job {}", load.output_rows, load.job_id);
    }
}
