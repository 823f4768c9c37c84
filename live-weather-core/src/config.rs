use anyhow::{Context, Result, anyhow, bail};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, time::Duration};

use crate::model::Location;
use crate::pipeline::CleanupPolicy;
use crate::warehouse::TableRef;

pub const DEFAULT_ENDPOINT: &str = "https://api.openweathermap.org/data/2.5/weather";
pub const DEFAULT_DATASET: &str = "energy_data";
pub const DEFAULT_TABLE: &str = "hourly_updated_weather";

pub const ENV_PROJECT_ID: &str = "GCP_PROJECT_ID";
pub const ENV_BUCKET: &str = "GCP_GCS_BUCKET";
pub const ENV_API_KEY: &str = "OWM_API_KEY";
pub const ENV_WORK_DIR: &str = "LIVE_WEATHER_HOME";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GcpSection {
    pub project_id: Option<String>,
    pub bucket: Option<String>,
    pub dataset: Option<String>,
    pub table: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenWeatherSection {
    pub api_key: Option<String>,
    pub endpoint: Option<String>,
}

/// Scheduling options recognized by the hourly runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleSection {
    pub retries: u32,
    pub retry_delay_secs: u64,
    pub catchup: bool,
    pub max_active_runs: u32,
}

impl Default for ScheduleSection {
    fn default() -> Self {
        Self {
            retries: 1,
            retry_delay_secs: 300,
            catchup: false,
            max_active_runs: 1,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSection {
    pub work_dir: Option<PathBuf>,
    pub cleanup: CleanupPolicy,
}

/// Top-level configuration stored on disk.
///
/// Example TOML:
/// [gcp]
/// project_id = "my-project"
/// bucket = "my-bucket"
///
/// [openweather]
/// api_key = "..."
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub gcp: GcpSection,
    pub openweather: OpenWeatherSection,
    pub location: Location,
    pub schedule: ScheduleSection,
    pub run: RunSection,
}

/// Validated settings handed to every stage.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub project_id: String,
    pub bucket: String,
    pub api_key: String,
    pub endpoint: String,
    pub location: Location,
    pub table: TableRef,
    pub work_dir: PathBuf,
    pub cleanup: CleanupPolicy,
    pub retries: u32,
    pub retry_delay: Duration,
}

impl Config {
    /// Load config from disk, or return an empty default if it doesn't exist yet.
    pub fn load() -> Result<Self> {
        let path = Self::config_file_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let cfg: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(cfg)
    }

    /// Save config to disk, creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_file_path()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;

        fs::write(&path, toml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    fn project_dirs() -> Result<ProjectDirs> {
        ProjectDirs::from("dev", "live-weather", "live-weather")
            .ok_or_else(|| anyhow!("Could not determine platform config directory"))
    }

    /// Path to the config file.
    pub fn config_file_path() -> Result<PathBuf> {
        Ok(Self::project_dirs()?.config_dir().join("config.toml"))
    }

    /// Process environment takes precedence over the file.
    pub fn with_env(self) -> Self {
        self.with_env_from(|key| std::env::var(key).ok())
    }

    pub fn with_env_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get(ENV_PROJECT_ID) {
            self.gcp.project_id = Some(v);
        }
        if let Some(v) = get(ENV_BUCKET) {
            self.gcp.bucket = Some(v);
        }
        if let Some(v) = get(ENV_API_KEY) {
            self.openweather.api_key = Some(v);
        }
        if let Some(v) = get(ENV_WORK_DIR) {
            self.run.work_dir = Some(PathBuf::from(v));
        }
        self
    }

    /// Validate and fill defaults.
    pub fn resolve(&self) -> Result<PipelineConfig> {
        let project_id = required(&self.gcp.project_id, "gcp.project_id", ENV_PROJECT_ID)?;
        let bucket = required(&self.gcp.bucket, "gcp.bucket", ENV_BUCKET)?;
        let api_key = required(&self.openweather.api_key, "openweather.api_key", ENV_API_KEY)?;

        if self.schedule.catchup {
            bail!("schedule.catchup = true is not supported; missed hours are never backfilled");
        }
        if self.schedule.max_active_runs != 1 {
            bail!(
                "schedule.max_active_runs must be 1 (got {})",
                self.schedule.max_active_runs
            );
        }

        let work_dir = match &self.run.work_dir {
            Some(dir) => dir.clone(),
            None => Self::project_dirs()?.cache_dir().to_path_buf(),
        };

        let table = TableRef {
            project: project_id.clone(),
            dataset: self.gcp.dataset.clone().unwrap_or_else(|| DEFAULT_DATASET.to_string()),
            table: self.gcp.table.clone().unwrap_or_else(|| DEFAULT_TABLE.to_string()),
        };

        Ok(PipelineConfig {
            project_id,
            bucket,
            api_key,
            endpoint: self
                .openweather
                .endpoint
                .clone()
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            location: self.location,
            table,
            work_dir,
            cleanup: self.run.cleanup,
            retries: self.schedule.retries,
            retry_delay: Duration::from_secs(self.schedule.retry_delay_secs),
        })
    }
}

fn required(value: &Option<String>, key: &str, env: &str) -> Result<String> {
    value.clone().ok_or_else(|| {
        anyhow!(
            "Missing required setting `{key}`.\n\
             Hint: set {env} or run `live-weather configure`."
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + use<> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    fn complete_env() -> impl Fn(&str) -> Option<String> {
        env(&[
            (ENV_PROJECT_ID, "proj"),
            (ENV_BUCKET, "bucket"),
            (ENV_API_KEY, "KEY"),
            (ENV_WORK_DIR, "/tmp/lw"),
        ])
    }

    #[test]
    fn resolve_errors_when_api_key_missing() {
        let cfg = Config::default().with_env_from(env(&[
            (ENV_PROJECT_ID, "proj"),
            (ENV_BUCKET, "bucket"),
        ]));
        let err = cfg.resolve().unwrap_err();

        let msg = err.to_string();
        assert!(msg.contains("openweather.api_key"));
        assert!(msg.contains(ENV_API_KEY));
    }

    #[test]
    fn resolve_fills_defaults() {
        let resolved = Config::default().with_env_from(complete_env()).resolve().unwrap();

        assert_eq!(resolved.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(resolved.location, Location::DEFAULT);
        assert_eq!(resolved.table.to_string(), "proj.energy_data.hourly_updated_weather");
        assert_eq!(resolved.work_dir, PathBuf::from("/tmp/lw"));
        assert_eq!(resolved.retries, 1);
        assert_eq!(resolved.retry_delay, Duration::from_secs(300));
        assert_eq!(resolved.cleanup, CleanupPolicy::OnSuccess);
    }

    #[test]
    fn env_overrides_file_values() {
        let mut cfg = Config::default();
        cfg.gcp.bucket = Some("from-file".into());
        cfg.openweather.api_key = Some("FILE_KEY".into());

        let resolved = cfg.with_env_from(complete_env()).resolve().unwrap();
        assert_eq!(resolved.bucket, "bucket");
        assert_eq!(resolved.api_key, "KEY");
    }

    #[test]
    fn blank_env_values_are_ignored() {
        let mut cfg = Config::default();
        cfg.openweather.api_key = Some("FILE_KEY".into());

        let cfg = cfg.with_env_from(env(&[(ENV_API_KEY, "  ")]));
        assert_eq!(cfg.openweather.api_key.as_deref(), Some("FILE_KEY"));
    }

    #[test]
    fn catchup_is_rejected() {
        let mut cfg = Config::default().with_env_from(complete_env());
        cfg.schedule.catchup = true;

        let err = cfg.resolve().unwrap_err();
        assert!(err.to_string().contains("catchup"));
    }

    #[test]
    fn parses_toml_with_partial_sections() {
        let cfg: Config = toml::from_str(
            r#"
            [gcp]
            project_id = "p"
            bucket = "b"
            table = "other_table"

            [openweather]
            api_key = "k"

            [run]
            cleanup = "always"
            "#,
        )
        .unwrap();

        let resolved = cfg.with_env_from(env(&[(ENV_WORK_DIR, "/w")])).resolve().unwrap();
        assert_eq!(resolved.table.to_string(), "p.energy_data.other_table");
        assert_eq!(resolved.cleanup, CleanupPolicy::Always);
        assert_eq!(resolved.location, Location::DEFAULT);
    }

    #[test]
    fn config_round_trips_through_toml() {
        let mut cfg = Config::default();
        cfg.gcp.project_id = Some("p".into());
        cfg.openweather.api_key = Some("k".into());

        let text = toml::to_string_pretty(&cfg).unwrap();
        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(back.gcp.project_id.as_deref(), Some("p"));
        assert_eq!(back.schedule.retries, 1);
    }
}
