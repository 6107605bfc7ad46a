//! Web control surface: embedded UI page, status/events queries, SSE push
//! stream, and the operator control endpoint.
//!
//! Commands take the single write path through the shared lock; everything
//! else reads snapshots. The push stream is fed from a broadcast channel so
//! the controller never blocks on a slow client.

use std::convert::Infallible;
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, RwLock};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{info, warn};

use crate::config;
use crate::controller::{Command, Controller, ControlError};
use crate::pump::PumpRelay;
use crate::state::{Clock, PushEvent};

const INDEX_HTML: &str = include_str!("ui/index.html");

// ---------------------------------------------------------------------------
// Shared application state
// ---------------------------------------------------------------------------

/// Controller plus the relay it drives, behind one lock. The tick loop and
/// the control endpoint are the only writers; both apply relay changes
/// before releasing the lock so hardware never lags the state machine.
pub struct App {
    pub controller: Controller,
    pub pump: PumpRelay,
}

impl App {
    /// Apply any pump transitions carried by a batch of push events.
    pub fn actuate(&mut self, events: &[PushEvent]) {
        for ev in events {
            if let PushEvent::Pump(on) = ev {
                self.pump.set(*on);
            }
        }
    }
}

pub type SharedApp = Arc<RwLock<App>>;

#[derive(Clone)]
pub struct WebState {
    pub app: SharedApp,
    pub push: broadcast::Sender<PushEvent>,
    pub clock: Clock,
    pub config_path: String,
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(state: WebState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/status", get(api_status))
        .route("/api/events", get(api_events))
        .route("/api/stream", get(api_stream))
        .route("/api/control", get(api_control))
        .with_state(state)
}

async fn index() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
        INDEX_HTML,
    )
}

async fn api_status(State(st): State<WebState>) -> impl IntoResponse {
    let app = st.app.read().await;
    Json(app.controller.status(st.clock.now_ms()))
}

async fn api_events(State(st): State<WebState>) -> impl IntoResponse {
    let app = st.app.read().await;
    Json(app.controller.state().recent_events())
}

/// SSE stream of state changes. Event names and payloads match what the UI
/// subscribes to: `sensors`, `pump`, `auto`, `wifi`.
async fn api_stream(
    State(st): State<WebState>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(st.push.subscribe()).filter_map(|msg| match msg {
        Ok(ev) => Some(Ok(Event::default().event(ev.name()).data(ev.data()))),
        // Lagged subscriber: skip missed events, the next one resyncs it.
        Err(_) => None,
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

// ---------------------------------------------------------------------------
// Control endpoint
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ControlQuery {
    auto: Option<bool>,
    pump: Option<bool>,
}

/// `GET /api/control?auto=<bool>` or `GET /api/control?pump=<bool>`.
/// Exactly one field per call; anything else is rejected with no state
/// change.
async fn api_control(State(st): State<WebState>, Query(q): Query<ControlQuery>) -> Response {
    let cmd = match (q.auto, q.pump) {
        (Some(auto), None) => Command::SetAutoMode(auto),
        (None, Some(pump)) => Command::RequestPump(pump),
        _ => {
            let err =
                ControlError::InvalidCommand("expected exactly one of auto= or pump=".to_string());
            return (StatusCode::BAD_REQUEST, Json(json!({ "error": err.to_string() })))
                .into_response();
        }
    };

    let now = st.clock.now_ms();
    let (outcome, changed_config) = {
        let mut app = st.app.write().await;
        match app.controller.apply_command(cmd, now) {
            Ok(outcome) => {
                app.actuate(&outcome.events);
                let cfg = outcome
                    .config_changed
                    .then(|| app.controller.config().clone());
                (outcome, cfg)
            }
            Err(e) => {
                let code = match e {
                    ControlError::InvalidCommand(_) => StatusCode::BAD_REQUEST,
                    _ => StatusCode::CONFLICT,
                };
                return (code, Json(json!({ "error": e.to_string() }))).into_response();
            }
        }
    };

    // Persistence is best-effort; a failed save never fails the command.
    if let Some(cfg) = changed_config {
        if let Err(e) = config::save(&cfg, &st.config_path) {
            warn!("config save failed: {e:#}");
        }
    }

    for ev in outcome.events {
        let _ = st.push.send(ev);
    }

    Json(json!({ "status": "ok" })).into_response()
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve(state: WebState) -> Result<()> {
    let port: u16 = env::var("WEB_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind web port {port}"))?;

    info!(%addr, "web ui listening");

    axum::serve(listener, router(state))
        .await
        .context("web server error")
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SystemConfig;
    use crate::sensor::SensorFault;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::util::ServiceExt;

    fn test_state() -> WebState {
        test_state_with(SystemConfig::default())
    }

    fn test_state_with(config: SystemConfig) -> WebState {
        let controller = Controller::new(config, 0);
        let pump = PumpRelay::new(17, true).unwrap();
        let (push, _) = broadcast::channel(32);
        let config_path = std::env::temp_dir()
            .join("plant-monitor-web-test.toml")
            .to_str()
            .unwrap()
            .to_string();
        WebState {
            app: Arc::new(RwLock::new(App { controller, pump })),
            push,
            clock: Clock::new(),
            config_path,
        }
    }

    async fn get_json(state: WebState, uri: &str) -> (StatusCode, serde_json::Value) {
        let resp = router(state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    // -- Index ------------------------------------------------------------

    #[tokio::test]
    async fn index_serves_html() {
        let resp = router(test_state())
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/html"));
    }

    // -- Status -----------------------------------------------------------

    #[tokio::test]
    async fn status_returns_snapshot() {
        let (status, json) = get_json(test_state(), "/api/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["pump_active"], false);
        assert_eq!(json["auto_mode"], true);
        assert_eq!(json["sensor_error"], false);
        assert_eq!(json["system_ready"], false);
        assert_eq!(json["state"], "idle");
    }

    // -- Events -----------------------------------------------------------

    #[tokio::test]
    async fn events_returns_ring_newest_first() {
        let state = test_state();
        {
            let mut app = state.app.write().await;
            assert!(app.controller.state().events.is_empty());
            app.controller
                .apply_command(Command::SetAutoMode(false), 100)
                .unwrap();
        }
        let (status, json) = get_json(state, "/api/events").await;
        assert_eq!(status, StatusCode::OK);
        let events = json.as_array().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["kind"], "mode");
        assert!(events[0]["detail"].as_str().unwrap().contains("disabled"));
    }

    // -- Control: auto toggle ---------------------------------------------

    #[tokio::test]
    async fn control_auto_off_applies_and_reports_ok() {
        let state = test_state();
        let (status, json) = get_json(state.clone(), "/api/control?auto=false").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");

        let app = state.app.read().await;
        assert!(!app.controller.state().auto_mode);
    }

    #[tokio::test]
    async fn control_auto_broadcasts_push_event() {
        let state = test_state();
        let mut rx = state.push.subscribe();
        let (status, _) = get_json(state, "/api/control?auto=false").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(rx.try_recv().unwrap(), PushEvent::Auto(false));
    }

    // -- Control: pump ----------------------------------------------------

    #[tokio::test]
    async fn control_pump_on_starts_pump() {
        let state = test_state();
        let (status, _) = get_json(state.clone(), "/api/control?pump=true").await;
        assert_eq!(status, StatusCode::OK);

        let app = state.app.read().await;
        assert!(app.controller.state().pump_active);
        #[cfg(not(feature = "gpio"))]
        assert!(app.pump.on, "relay must follow the state machine");
    }

    #[tokio::test]
    async fn control_pump_off_stops_pump() {
        let state = test_state();
        let (status, _) = get_json(state.clone(), "/api/control?pump=true").await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = get_json(state.clone(), "/api/control?pump=false").await;
        assert_eq!(status, StatusCode::OK);

        let app = state.app.read().await;
        assert!(!app.controller.state().pump_active);
        #[cfg(not(feature = "gpio"))]
        assert!(!app.pump.on);
    }

    #[tokio::test]
    async fn control_pump_refused_during_cooldown() {
        let state = test_state();
        let (_, _) = get_json(state.clone(), "/api/control?pump=true").await;
        let (_, _) = get_json(state.clone(), "/api/control?pump=false").await;

        // Cooldown just started; an immediate restart must be refused.
        let (status, json) = get_json(state.clone(), "/api/control?pump=true").await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(json["error"].as_str().unwrap().contains("cooldown"));

        let app = state.app.read().await;
        assert!(!app.controller.state().pump_active);
    }

    #[tokio::test]
    async fn control_pump_rejected_in_fault_state() {
        let state = test_state();
        {
            let mut app = state.app.write().await;
            for t in 1..=3 {
                app.controller.tick(t * 1000, Err(SensorFault::ReadFailed));
            }
        }

        let (status, json) = get_json(state, "/api/control?pump=true").await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(json["error"].as_str().unwrap().contains("fault"));
    }

    // -- Control: malformed input -----------------------------------------

    #[tokio::test]
    async fn control_with_no_fields_rejected() {
        let (status, json) = get_json(test_state(), "/api/control").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].as_str().unwrap().contains("exactly one"));
    }

    #[tokio::test]
    async fn control_with_both_fields_rejected() {
        let state = test_state();
        let (status, _) = get_json(state.clone(), "/api/control?auto=true&pump=true").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        // State unchanged.
        let app = state.app.read().await;
        assert!(!app.controller.state().pump_active);
        assert!(app.controller.state().auto_mode);
    }

    #[tokio::test]
    async fn control_with_garbage_value_rejected() {
        let resp = router(test_state())
            .oneshot(
                Request::builder()
                    .uri("/api/control?pump=banana")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    // -- SSE stream -------------------------------------------------------

    #[tokio::test]
    async fn stream_responds_with_event_stream_content_type() {
        let resp = router(test_state())
            .oneshot(
                Request::builder()
                    .uri("/api/stream")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream"));
    }
}
