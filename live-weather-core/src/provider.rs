use async_trait::async_trait;
use std::{fmt::Debug, path::Path};

use crate::{PipelineConfig, error::PipelineResult, model::Location};

pub mod openweather;

pub use openweather::OpenWeatherProvider;

/// Source of current weather observations.
#[async_trait]
pub trait WeatherProvider: Send + Sync + Debug {
    /// Fetch the current observation for `location` and write the response
    /// body verbatim to `outfile`.
    ///
    /// Nothing is written when the upstream call fails.
    async fn download_current(&self, location: Location, outfile: &Path) -> PipelineResult<()>;
}

/// Construct the configured provider.
pub fn provider_from_config(config: &PipelineConfig) -> Box<dyn WeatherProvider> {
    Box::new(OpenWeatherProvider::with_endpoint(
        config.api_key.clone(),
        config.endpoint.clone(),
    ))
}
