//! ==============================================================================
//! sensor.rs - lux sensor client
//! ==============================================================================
//!
//! purpose:
//!     one HTTP GET to `http://<address>/lux` per call. the device answers
//!     `{ "luxSensor": <number> }`; anything else is a FetchError.
//!
//! relationships:
//!     - used by: poll.rs (every tick, and the manual single fetch)
//!     - used by: main.rs (`fetch` subcommand)
//!     - returns: domain.rs RecordedReading (fresh id + timestamp)
//!
//! ==============================================================================

use crate::domain::RecordedReading;
use crate::error::FetchError;

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

/// anything that can produce a lux reading for an address
///
/// the poll controller only sees this trait, so tests drive it with fakes.
#[async_trait]
pub trait LuxSource: Send + Sync {
    async fn fetch_reading(&self, address: &str) -> Result<RecordedReading, FetchError>;
}

/// body returned by the sensor's /lux endpoint
#[derive(Debug, Deserialize)]
struct LuxResponse {
    #[serde(rename = "luxSensor")]
    lux_sensor: f64,
}

/// `http://<address>/<path>`, tolerating a scheme or trailing slash in the address
pub fn endpoint_url(address: &str, path: &str) -> String {
    let host = address.trim();
    let host = host
        .strip_prefix("http://")
        .or_else(|| host.strip_prefix("https://"))
        .unwrap_or(host)
        .trim_end_matches('/');
    format!("http://{}/{}", host, path.trim_start_matches('/'))
}

#[derive(Clone)]
pub struct HttpSensorClient {
    client: reqwest::Client,
}

impl HttpSensorClient {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl LuxSource for HttpSensorClient {
    async fn fetch_reading(&self, address: &str) -> Result<RecordedReading, FetchError> {
        let url = endpoint_url(address, "lux");
        tracing::debug!("[SENSOR] GET {}", url);

        let res = self.client.get(&url).send().await?;
        if !res.status().is_success() {
            return Err(FetchError::Status(res.status().as_u16()));
        }

        let body = res.bytes().await?;
        let parsed: LuxResponse = serde_json::from_slice(&body)
            .map_err(|e| FetchError::Body(format!("{} (got: {})", e, String::from_utf8_lossy(&body))))?;

        Ok(RecordedReading::fresh(parsed.lux_sensor))
    }
}
