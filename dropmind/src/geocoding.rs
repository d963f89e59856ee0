//! Reverse geocoding for unlabeled location items

use crate::interface::ResolutionFailure;
use crate::link_metadata::request_failure;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Human-readable place label for a coordinate
    async fn reverse(&self, lat: f64, lon: f64, timeout: Duration) -> Result<String, ResolutionFailure>;
}

/// Client for a Nominatim-compatible `/reverse` endpoint
pub struct NominatimGeocoder {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct ReverseResponse {
    display_name: Option<String>,
}

impl NominatimGeocoder {
    pub fn new(base_url: &str, user_agent: &str) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().user_agent(user_agent).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Geocoder for NominatimGeocoder {
    async fn reverse(&self, lat: f64, lon: f64, timeout: Duration) -> Result<String, ResolutionFailure> {
        let response = self
            .client
            .get(format!("{}/reverse", self.base_url))
            .query(&[
                ("format", "jsonv2".to_string()),
                ("lat", lat.to_string()),
                ("lon", lon.to_string()),
            ])
            .timeout(timeout)
            .send()
            .await
            .map_err(request_failure)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ResolutionFailure::Unreachable { status: Some(status.as_u16()) });
        }

        let body: ReverseResponse = response.json().await.map_err(|e| {
            if e.is_decode() {
                ResolutionFailure::Unparseable
            } else {
                request_failure(e)
            }
        })?;

        body.display_name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .ok_or(ResolutionFailure::Unparseable)
    }
}
