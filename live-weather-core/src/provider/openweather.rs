use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use std::path::Path;
use tracing::{debug, info};

use crate::{
    config::DEFAULT_ENDPOINT,
    error::{PipelineError, PipelineResult},
    model::Location,
};

use super::WeatherProvider;

#[derive(Debug, Clone)]
pub struct OpenWeatherProvider {
    api_key: String,
    endpoint: String,
    http: Client,
}

impl OpenWeatherProvider {
    pub fn new(api_key: String) -> Self {
        Self::with_endpoint(api_key, DEFAULT_ENDPOINT.to_string())
    }

    pub fn with_endpoint(api_key: String, endpoint: String) -> Self {
        Self {
            api_key,
            endpoint,
            http: Client::new(),
        }
    }

    /// One GET against the current-weather endpoint. Only `200 OK` is accepted.
    pub async fn fetch_current(&self, location: Location) -> PipelineResult<Bytes> {
        info!(
            lat = location.lat,
            lon = location.lon,
            "Requesting current weather from OpenWeatherMap"
        );

        let lat = location.lat.to_string();
        let lon = location.lon.to_string();

        let res = self
            .http
            .get(&self.endpoint)
            .query(&[
                ("appid", self.api_key.as_str()),
                ("lat", lat.as_str()),
                ("lon", lon.as_str()),
                ("units", "metric"),
            ])
            .send()
            .await
            .map_err(|e| self.http_error(e))?;

        let status = res.status();
        let body = res.bytes().await.map_err(|e| self.http_error(e))?;

        if status != StatusCode::OK {
            return Err(PipelineError::Upstream {
                status,
                body: truncate_body(&String::from_utf8_lossy(&body)),
            });
        }

        debug!(%status, bytes = body.len(), "OpenWeatherMap responded");
        Ok(body)
    }

    // The request URL carries the API key, so it is stripped from the error.
    fn http_error(&self, err: reqwest::Error) -> PipelineError {
        PipelineError::Http {
            url: self.endpoint.clone(),
            source: err.without_url(),
        }
    }
}

#[async_trait]
impl WeatherProvider for OpenWeatherProvider {
    async fn download_current(&self, location: Location, outfile: &Path) -> PipelineResult<()> {
        let body = self.fetch_current(location).await?;

        serde_json::from_slice::<serde_json::Value>(&body)
            .map_err(|e| PipelineError::json(outfile, e))?;

        if let Some(parent) = outfile.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PipelineError::io(parent, e))?;
        }
        tokio::fs::write(outfile, &body)
            .await
            .map_err(|e| PipelineError::io(outfile, e))?;

        info!(path = %outfile.display(), "Raw observation written");
        Ok(())
    }
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    match body.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
