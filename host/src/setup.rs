//! ==============================================================================
//! setup.rs - point the sensor device at this controller
//! ==============================================================================
//!
//! purpose:
//!     one-shot configuration call: `POST http://<setup_host>/setip` with
//!     `{ "ip": "<address>" }`. the device answers with json on success.
//!     fire-and-forget from the operator's point of view; the result is only
//!     reported through the log.
//!
//! relationships:
//!     - used by: main.rs (`setip` subcommand)
//!     - uses: sensor.rs (endpoint_url)
//!
//! ==============================================================================

use crate::error::FetchError;
use crate::sensor::endpoint_url;

use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Serialize)]
struct SetIpRequest<'a> {
    ip: &'a str,
}

/// send the address and return the device's json reply
pub async fn set_device_ip(setup_host: &str, ip: &str, timeout: Duration) -> Result<serde_json::Value, FetchError> {
    let client = reqwest::Client::builder().timeout(timeout).build()?;
    let url = endpoint_url(setup_host, "setip");
    tracing::debug!("[SETUP] POST {} ip={}", url, ip);

    let res = client.post(&url).json(&SetIpRequest { ip }).send().await?;
    if !res.status().is_success() {
        return Err(FetchError::Status(res.status().as_u16()));
    }
    let body = res.bytes().await?;
    serde_json::from_slice(&body).map_err(|e| FetchError::Body(e.to_string()))
}

/// same call, outcome logged instead of returned
pub async fn announce_ip(setup_host: &str, ip: &str, timeout: Duration) -> bool {
    match set_device_ip(setup_host, ip, timeout).await {
        Ok(reply) => {
            tracing::info!("[SETUP] ✓ Success: {}", reply);
            true
        }
        Err(e) => {
            tracing::error!("[SETUP] Error: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::serve;
    use axum::{http::StatusCode, routing::post, Json, Router};
    use std::sync::Arc;
    use tokio::sync::Mutex;

    #[tokio::test]
    async fn posts_ip_and_returns_reply() {
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        let app = Router::new().route(
            "/setip",
            post(move |Json(body): Json<serde_json::Value>| {
                let sink = sink.clone();
                async move {
                    *sink.lock().await = Some(body);
                    Json(serde_json::json!({ "status": "ok" }))
                }
            }),
        );
        let host = serve(app).await;

        let reply = set_device_ip(&host, "192.168.2.123", Duration::from_secs(2)).await.unwrap();
        assert_eq!(reply["status"], "ok");
        assert_eq!(*seen.lock().await, Some(serde_json::json!({ "ip": "192.168.2.123" })));
    }

    #[tokio::test]
    async fn error_status_is_reported() {
        let app = Router::new().route("/setip", post(|| async { StatusCode::BAD_REQUEST }));
        let host = serve(app).await;
        assert!(!announce_ip(&host, "1.2.3.4", Duration::from_secs(2)).await);
    }
}
