//! Core library for the `live-weather` hourly ingestion job.
//!
//! This crate defines:
//! - Configuration & credentials handling
//! - The OpenWeatherMap fetcher
//! - JSON to Parquet flattening with the fixed observation schema
//! - Object storage and warehouse loading
//! - The sequential run driver
//!
//! It is used by `live-weather-cli`, but can also be reused by other binaries or services.

pub mod config;
pub mod context;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod provider;
pub mod schedule;
pub mod storage;
pub mod transform;
pub mod warehouse;

pub use config::{Config, PipelineConfig};
pub use context::RunContext;
pub use error::{PipelineError, PipelineResult};
pub use model::{Location, ObservationRow, RawObservation};
pub use pipeline::{CleanupPolicy, Pipeline, RunReport, StageKind, StageStatus};
pub use provider::{OpenWeatherProvider, WeatherProvider};
pub use storage::StorageProvider;
pub use warehouse::{LoadRequest, MemoryWarehouse, TableRef, Warehouse};
