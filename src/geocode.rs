use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

const EARTH_RADIUS_M: f64 = 6_371_000.0;
const USER_AGENT: &str = "sumai-agent/0.1 (property search assistant)";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// Address → coordinate lookup. `Ok(None)` means the service answered but found nothing.
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn geocode(&self, address: &str) -> Result<Option<GeoPoint>>;
}

#[derive(Debug, Deserialize)]
struct NominatimResponse {
    lat: String,
    lon: String,
}

#[derive(Clone)]
pub struct NominatimGeocoder {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl NominatimGeocoder {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }
}

#[async_trait]
impl Geocoder for NominatimGeocoder {
    #[instrument(skip(self))]
    async fn geocode(&self, address: &str) -> Result<Option<GeoPoint>> {
        let url = format!("{}/search", self.base_url);
        let response: Vec<NominatimResponse> = self
            .client
            .get(&url)
            .query(&[
                ("q", address),
                ("format", "json"),
                ("limit", "1"),
                ("countrycodes", "jp"),
            ])
            .header("User-Agent", USER_AGENT)
            .timeout(self.timeout)
            .send()
            .await
            .context("geocoding request failed")?
            .error_for_status()
            .context("geocoding service returned non-success status")?
            .json()
            .await
            .context("failed to decode geocoding response")?;

        let Some(first) = response.first() else {
            warn!(address, "address not found by geocoder");
            return Ok(None);
        };

        let latitude: f64 = first
            .lat
            .parse()
            .map_err(|e| anyhow!("invalid latitude in geocoding response: {e}"))?;
        let longitude: f64 = first
            .lon
            .parse()
            .map_err(|e| anyhow!("invalid longitude in geocoding response: {e}"))?;

        debug!(latitude, longitude, "geocoded address");
        Ok(Some(GeoPoint {
            latitude,
            longitude,
        }))
    }
}

/// Great-circle distance in metres (haversine).
pub fn haversine_m(a: GeoPoint, b: GeoPoint) -> f64 {
    let dlat = (b.latitude - a.latitude).to_radians();
    let dlng = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2)
        + a.latitude.to_radians().cos() * b.latitude.to_radians().cos() * (dlng / 2.0).sin().powi(2);

    2.0 * EARTH_RADIUS_M * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Latitude/longitude deltas that enclose a circle of `radius_m` around `center`.
pub fn bounding_deltas(center: GeoPoint, radius_m: f64) -> (f64, f64) {
    let dlat = (radius_m / EARTH_RADIUS_M).to_degrees();
    let cos_lat = center.latitude.to_radians().cos().abs().max(1e-6);
    (dlat, dlat / cos_lat)
}
