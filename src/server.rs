//! ==============================================================================
//! server.rs - http + websocket surface
//! ==============================================================================
//!
//! purpose:
//!     the endpoints the trap devices and the browser dashboard talk to.
//!     devices POST readings, the dashboard polls the reports or hangs on
//!     the websocket for live pushes.
//!
//! routes:
//!     POST /send_detection      ingest one reading (device -> hub)
//!     GET  /get_detection       latest reading per trap
//!     GET  /api/history         recent raw rows, newest first
//!     GET  /api/report/daily    per-day totals
//!     GET  /api/report/hourly   24 hourly increment buckets (?date=YYYY-MM-DD)
//!     GET  /ws                  live update stream
//!
//! relationships:
//!     - uses: db.rs (persistence), aggregate.rs (hourly buckets)
//!     - state: Arc<AppState> shared across handlers; the live map behind an
//!       RwLock (ingest writes, api reads), updates fan out on a broadcast
//!       channel so every websocket client gets its own subscription
//!
//! ==============================================================================

use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{
        rejection::JsonRejection,
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{broadcast, RwLock};
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use crate::aggregate;
use crate::config::HubConfig;
use crate::db::Database;
use crate::domain::{Detection, LiveState};

/// shared between all handlers and websocket sessions
pub struct AppState {
    /// trap ids the hub accepts readings from (from config)
    trap_ids: Vec<u8>,
    /// echo each reading at info level
    show_detections: bool,
    live: RwLock<LiveState>,
    db: Database,
    updates: broadcast::Sender<String>,
}

impl AppState {
    pub fn new(config: &HubConfig, db: Database) -> Arc<Self> {
        // 64 pending updates per lagging client before it gets dropped
        let (updates, _) = broadcast::channel(64);
        Arc::new(Self {
            trap_ids: config.traps.ids.clone(),
            show_detections: config.logging.show_detections,
            live: RwLock::new(LiveState::default()),
            db,
            updates,
        })
    }
}

pub async fn run(config: &HubConfig, state: Arc<AppState>) -> Result<()> {
    let app = router(state);

    let addr = format!("{}:{}", config.server.bind, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/send_detection", post(send_detection))
        .route("/get_detection", get(get_detection))
        .route("/api/history", get(history))
        .route("/api/report/daily", get(daily_report))
        .route("/api/report/hourly", get(hourly_report))
        .route("/ws", get(ws_upgrade))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ==============================================================================
// ingest
// ==============================================================================

/// body of POST /send_detection. the devices do not all carry a clock, so the
/// timestamp is optional and stamped on arrival when missing.
#[derive(Debug, Deserialize)]
struct DetectionPayload {
    trap: u8,
    detection: i64,
    #[serde(default)]
    x: f64,
    #[serde(default)]
    y: f64,
    #[serde(default)]
    timestamp_ms: Option<i64>,
}

async fn send_detection(
    State(app): State<Arc<AppState>>,
    payload: Result<Json<DetectionPayload>, JsonRejection>,
) -> (StatusCode, Json<serde_json::Value>) {
    let Json(payload) = match payload {
        Ok(json) => json,
        Err(rejection) => {
            warn!("rejected detection payload: {rejection}");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": format!("invalid detection payload: {rejection}") })),
            );
        }
    };

    if !app.trap_ids.contains(&payload.trap) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": format!("unknown trap id {}", payload.trap) })),
        );
    }

    let now_ms = Utc::now().timestamp_millis();
    let detection = Detection {
        trap: payload.trap,
        detection: payload.detection,
        x: payload.x,
        y: payload.y,
        timestamp_ms: payload.timestamp_ms.unwrap_or(now_ms),
    };

    if app.show_detections {
        info!(
            trap = detection.trap,
            count = detection.detection,
            x = detection.x,
            y = detection.y,
            "detection received"
        );
    }

    {
        let mut live = app.live.write().await;
        live.traps.insert(detection.trap, detection.clone());
        live.last_update = now_ms;
    }

    // a persistence hiccup is logged but does not fail the device's request;
    // the live state and the push below already happened
    if let Err(err) = app.db.insert_detection(&detection).await {
        error!("failed to persist detection: {err:#}");
    }

    let event = json!({ "event": "detection", "detection": detection });
    let _ = app.updates.send(event.to_string());

    (StatusCode::OK, Json(json!({ "message": "detection stored" })))
}

// ==============================================================================
// read api
// ==============================================================================

/// latest reading per trap
async fn get_detection(State(app): State<Arc<AppState>>) -> Json<LiveState> {
    let live = app.live.read().await;
    Json(live.clone())
}

#[derive(Deserialize)]
struct HistoryParams {
    limit: Option<u32>,
}

async fn history(
    State(app): State<Arc<AppState>>,
    Query(params): Query<HistoryParams>,
) -> Json<Vec<Detection>> {
    let limit = params.limit.unwrap_or(50).min(1000);
    match app.db.recent_detections(limit).await {
        Ok(rows) => Json(rows),
        Err(err) => {
            error!("history query failed: {err:#}");
            Json(Vec::new())
        }
    }
}

async fn daily_report(State(app): State<Arc<AppState>>) -> impl IntoResponse {
    match app.db.daily_totals().await {
        Ok(points) => Json(points),
        Err(err) => {
            error!("daily report query failed: {err:#}");
            Json(Vec::new())
        }
    }
}

#[derive(Deserialize)]
struct HourlyParams {
    /// "YYYY-MM-DD"; omitted means all recorded days
    date: Option<String>,
}

/// 24 hourly increment buckets. a failed query degrades to the zero-filled
/// structure instead of an error so the chart always renders.
async fn hourly_report(
    State(app): State<Arc<AppState>>,
    Query(params): Query<HourlyParams>,
) -> impl IntoResponse {
    match app.db.hourly_readings(params.date).await {
        Ok(readings) => Json(aggregate::hourly_report(&readings)),
        Err(err) => {
            error!("hourly report query failed, serving zeros: {err:#}");
            Json(aggregate::empty_hourly_report())
        }
    }
}

// ==============================================================================
// websocket push
// ==============================================================================

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(app): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| client_session(socket, app))
}

/// one connected dashboard client: snapshot first, then every update until
/// the client goes away
async fn client_session(mut socket: WebSocket, app: Arc<AppState>) {
    let mut updates = app.updates.subscribe();

    let snapshot = {
        let live = app.live.read().await;
        json!({ "event": "snapshot", "state": &*live }).to_string()
    };
    if socket.send(Message::Text(snapshot)).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(text) => {
                    if socket.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                // skip what we missed and keep streaming
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("websocket client lagged, skipped {missed} updates");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                // clients only ever send pings/keepalives; nothing to do
                Some(Ok(_)) => {}
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_timestamp_is_optional() {
        let payload: DetectionPayload =
            serde_json::from_str(r#"{"trap":1,"detection":4}"#).unwrap();
        assert_eq!(payload.trap, 1);
        assert_eq!(payload.detection, 4);
        assert_eq!(payload.timestamp_ms, None);
        assert_eq!(payload.x, 0.0);

        let payload: DetectionPayload = serde_json::from_str(
            r#"{"trap":2,"detection":9,"x":3.0,"y":4.0,"timestamp_ms":1700000000000}"#,
        )
        .unwrap();
        assert_eq!(payload.timestamp_ms, Some(1_700_000_000_000));
        assert_eq!(payload.y, 4.0);
    }

    #[test]
    fn payload_without_required_fields_is_rejected() {
        assert!(serde_json::from_str::<DetectionPayload>(r#"{"detection":4}"#).is_err());
        assert!(serde_json::from_str::<DetectionPayload>(r#"{"trap":1}"#).is_err());
    }
}
