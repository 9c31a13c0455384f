//! ==============================================================================
//! server.rs - dashboard and control api
//! ==============================================================================
//!
//! purpose:
//!     the operator surface. every button on the dashboard maps to one api
//!     route, so the same controls work from curl or scripts.
//!
//! routes:
//!     GET    /                    dashboard html
//!     GET    /api/readings        store snapshot
//!     DELETE /api/readings        clear all
//!     DELETE /api/readings/:id    remove one
//!     GET    /api/session         state + settings
//!     POST   /api/session/start   start test (no-op if running)
//!     POST   /api/session/stop    stop test
//!     PUT    /api/settings        partial settings update (reconfigures a running test)
//!     POST   /api/fetch           single reading
//!     GET    /api/export.csv      spreadsheet download
//!     POST   /api/export          spreadsheet written to the export directory
//!
//! relationships:
//!     - uses: poll.rs (controller), store.rs, export.rs
//!     - started by: main.rs
//!
//! ==============================================================================

use crate::domain::Reading;
use crate::export;
use crate::poll::{PollController, PollSettings, StartOutcome};

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Json, Response},
    routing::{delete, get, post, put},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use tower_http::cors::CorsLayer;

#[derive(Clone)]
pub struct AppState {
    pub controller: PollController,
    pub export_dir: PathBuf,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(dashboard_handler))
        .route("/api/readings", get(readings_handler).delete(clear_handler))
        .route("/api/readings/:id", delete(remove_handler))
        .route("/api/session", get(session_handler))
        .route("/api/session/start", post(start_handler))
        .route("/api/session/stop", post(stop_handler))
        .route("/api/settings", put(settings_handler))
        .route("/api/fetch", post(fetch_handler))
        .route("/api/export.csv", get(download_handler))
        .route("/api/export", post(export_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run_server(bind: &str, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!("[SERVER] ✓ Dashboard live at http://{}", listener.local_addr()?);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

fn error_response(status: StatusCode, message: impl std::fmt::Display) -> Response {
    (status, Json(json!({ "status": "error", "message": message.to_string() }))).into_response()
}

fn ordered_readings(state: &AppState) -> Vec<Reading> {
    state.controller.store().readings().into_iter().map(|r| r.reading).collect()
}

// ==============================================================================
// readings
// ==============================================================================

async fn readings_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.controller.store().snapshot())
}

async fn clear_handler(State(state): State<AppState>) -> StatusCode {
    state.controller.store().clear_readings();
    StatusCode::NO_CONTENT
}

async fn remove_handler(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
    if state.controller.store().remove_reading(&id) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

// ==============================================================================
// session
// ==============================================================================

async fn session_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.controller.status())
}

async fn start_handler(State(state): State<AppState>) -> impl IntoResponse {
    let outcome = match state.controller.start() {
        StartOutcome::Started => "started",
        StartOutcome::AlreadyPolling => "already_polling",
    };
    Json(json!({ "status": outcome, "session": state.controller.status() }))
}

async fn stop_handler(State(state): State<AppState>) -> impl IntoResponse {
    let stopped = state.controller.stop().await;
    Json(json!({ "stopped": stopped, "session": state.controller.status() }))
}

/// every field optional; missing ones keep their current value
#[derive(Debug, Deserialize)]
struct SettingsUpdate {
    address: Option<String>,
    interval_seconds: Option<u64>,
    duration_minutes: Option<f64>,
}

async fn settings_handler(State(state): State<AppState>, Json(update): Json<SettingsUpdate>) -> Response {
    let current = state.controller.settings();
    let next = PollSettings {
        address: update.address.map(|a| a.trim().to_string()).unwrap_or(current.address),
        interval_seconds: update.interval_seconds.unwrap_or(current.interval_seconds),
        duration_minutes: update.duration_minutes.unwrap_or(current.duration_minutes),
    };
    match state.controller.reconfigure(next) {
        Ok(()) => Json(state.controller.status()).into_response(),
        Err(e) => error_response(StatusCode::BAD_REQUEST, e),
    }
}

async fn fetch_handler(State(state): State<AppState>) -> Response {
    match state.controller.fetch_once().await {
        Ok(recorded) => Json(recorded).into_response(),
        Err(e) => error_response(StatusCode::BAD_GATEWAY, e),
    }
}

// ==============================================================================
// export
// ==============================================================================

async fn download_handler(State(state): State<AppState>) -> Response {
    let readings = ordered_readings(&state);
    match export::to_csv_bytes(&readings) {
        Ok(bytes) => (
            [
                (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}\"", export::export_file_name()),
                ),
            ],
            bytes,
        )
            .into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e)),
    }
}

async fn export_handler(State(state): State<AppState>) -> Response {
    let readings = ordered_readings(&state);
    match export::export_snapshot(&readings, &state.export_dir) {
        Ok(path) => {
            tracing::info!("[EXPORT] {} readings -> {}", readings.len(), path.display());
            Json(json!({ "status": "ok", "path": path.display().to_string(), "rows": readings.len() })).into_response()
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e)),
    }
}

// ==============================================================================
// dashboard
// ==============================================================================

async fn dashboard_handler(State(state): State<AppState>) -> Html<String> {
    Html(render_dashboard(&state.controller))
}

fn render_dashboard(controller: &PollController) -> String {
    let status = controller.status();
    let polling = controller.is_polling();
    let items: String = controller
        .store()
        .readings()
        .iter()
        .map(|r| {
            format!(
                "<li>{}: {:.1}</li>",
                html_escape(&r.reading.timestamp),
                r.reading.lux_value
            )
        })
        .collect();

    format!(
        r#"<!doctype html>
<html>
<head><title>lux host</title><meta charset="utf-8"></head>
<body style="font-family: system-ui; padding: 2rem; background: #1a1a2e; color: #eee;">
    <h2>All Readings:</h2>
    <ul id="readings">{items}</ul>

    <div style="margin: 1rem 0">
        <label>Sensor IP:
            <input id="address" type="text" value="{address}" style="margin-left: 8px; width: 140px">
        </label>
        <label style="margin-left: 24px">Test duration (minutes):
            <input id="duration" type="number" min="0.1" step="0.1" value="{duration}" style="margin-left: 8px; width: 60px">
        </label>
        <label style="margin-left: 24px">Polling interval (seconds):
            <input id="interval" type="number" min="1" step="1" value="{interval}" style="margin-left: 8px; width: 60px">
        </label>
        <button onclick="applySettings()" style="margin-left: 8px">Apply</button>
    </div>

    <button id="toggle" onclick="toggleTest()">{toggle}</button>
    <button onclick="call('POST', '/api/fetch')" style="margin-left: 8px">Fetch Reading</button>
    <button onclick="call('DELETE', '/api/readings')" style="margin-left: 8px">Clear Readings</button>
    <a href="/api/export.csv" style="margin-left: 8px; color: #8ecae6">Download Spreadsheet</a>

<script>
let polling = {polling};
async function call(method, url, body) {{
    const opts = {{ method, headers: {{ 'Content-Type': 'application/json' }} }};
    if (body) opts.body = JSON.stringify(body);
    const res = await fetch(url, opts);
    if (!res.ok) console.error(method, url, res.status, await res.text());
    await refresh();
}}
function toggleTest() {{
    return call('POST', polling ? '/api/session/stop' : '/api/session/start');
}}
function applySettings() {{
    return call('PUT', '/api/settings', {{
        address: document.getElementById('address').value,
        interval_seconds: Number(document.getElementById('interval').value),
        duration_minutes: Number(document.getElementById('duration').value),
    }});
}}
async function refresh() {{
    const [snap, session] = await Promise.all([
        fetch('/api/readings').then(r => r.json()),
        fetch('/api/session').then(r => r.json()),
    ]);
    const list = document.getElementById('readings');
    list.innerHTML = '';
    for (const r of Object.values(snap.readings)) {{
        const li = document.createElement('li');
        li.textContent = r.timestamp + ': ' + r.luxValue.toFixed(1);
        list.appendChild(li);
    }}
    polling = session.state === 'polling';
    document.getElementById('toggle').textContent = polling ? 'Stop Test' : 'Start Test';
}}
setInterval(refresh, 1000);
</script>
</body>
</html>"#,
        items = items,
        address = html_escape(&status.settings.address),
        duration = status.settings.duration_minutes,
        interval = status.settings.interval_seconds,
        toggle = if polling { "Stop Test" } else { "Start Test" },
        polling = polling,
    )
}

/// escape html special characters to prevent xss
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_escape_covers_markup() {
        assert_eq!(html_escape(r#"<a href="x">&</a>"#), "&lt;a href=&quot;x&quot;&gt;&amp;&lt;/a&gt;");
    }
}
