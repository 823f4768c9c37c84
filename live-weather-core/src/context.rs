//! Per-run values resolved from the logical run timestamp.

use std::path::{Path, PathBuf};

use chrono::{DateTime, DurationRound, TimeDelta, Utc};

use crate::model::Location;

const RAW_PREFIX: &str = "raw/live_weather";
const STAGED_PREFIX: &str = "staged/live_weather";

/// Everything a run needs to name its files and objects.
///
/// Built once per run and handed to every stage; nothing downstream formats
/// timestamps into paths on its own.
#[derive(Debug, Clone, PartialEq)]
pub struct RunContext {
    logical_date: DateTime<Utc>,
    location: Location,
    suffix: String,
    raw_path: PathBuf,
    parquet_path: PathBuf,
    raw_object_key: String,
    staged_object_key: String,
}

impl RunContext {
    /// `logical_date` is truncated to the hour.
    pub fn new(logical_date: DateTime<Utc>, location: Location, work_dir: &Path) -> Self {
        let logical_date = logical_date
            .duration_trunc(TimeDelta::hours(1))
            .unwrap_or(logical_date);
        let suffix = logical_date.format("%Y-%m-%d-%H").to_string();

        Self {
            raw_path: work_dir.join(format!("{suffix}.json")),
            parquet_path: work_dir.join(format!("{suffix}.parquet")),
            raw_object_key: format!("{RAW_PREFIX}/{location}/{suffix}.json"),
            staged_object_key: format!("{STAGED_PREFIX}/{location}/{suffix}.parquet"),
            logical_date,
            location,
            suffix,
        }
    }

    pub fn logical_date(&self) -> DateTime<Utc> {
        self.logical_date
    }

    pub fn location(&self) -> Location {
        self.location
    }

    /// `YYYY-MM-DD-HH` of the logical date.
    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    pub fn raw_path(&self) -> &Path {
        &self.raw_path
    }

    pub fn parquet_path(&self) -> &Path {
        &self.parquet_path
    }

    pub fn raw_object_key(&self) -> &str {
        &self.raw_object_key
    }

    pub fn staged_object_key(&self) -> &str {
        &self.staged_object_key
    }

    /// Local files this run may create.
    pub fn local_files(&self) -> [&Path; 2] {
        [&self.raw_path, &self.parquet_path]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn resolves_paths_and_keys_from_logical_date() {
        let date = Utc.with_ymd_and_hms(2022, 4, 15, 5, 20, 13).unwrap();
        let ctx = RunContext::new(date, Location::DEFAULT, Path::new("/opt/work"));

        assert_eq!(ctx.suffix(), "2022-04-15-05");
        assert_eq!(ctx.logical_date(), Utc.with_ymd_and_hms(2022, 4, 15, 5, 0, 0).unwrap());
        assert_eq!(ctx.raw_path(), Path::new("/opt/work/2022-04-15-05.json"));
        assert_eq!(ctx.parquet_path(), Path::new("/opt/work/2022-04-15-05.parquet"));
        assert_eq!(ctx.raw_object_key(), "raw/live_weather/39.847_-104.656/2022-04-15-05.json");
        assert_eq!(
            ctx.staged_object_key(),
            "staged/live_weather/39.847_-104.656/2022-04-15-05.parquet"
        );
    }

    #[test]
    fn distinct_hours_never_share_files() {
        let a = RunContext::new(
            Utc.with_ymd_and_hms(2022, 4, 15, 5, 0, 0).unwrap(),
            Location::DEFAULT,
            Path::new("/w"),
        );
        let b = RunContext::new(
            Utc.with_ymd_and_hms(2022, 4, 15, 6, 0, 0).unwrap(),
            Location::DEFAULT,
            Path::new("/w"),
        );

        assert_ne!(a.raw_path(), b.raw_path());
        assert_ne!(a.staged_object_key(), b.staged_object_key());
    }
}
