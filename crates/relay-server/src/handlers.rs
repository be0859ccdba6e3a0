//! HTTP handlers for Relay server.
//!
//! This module maps the command URL shapes and request bodies onto
//! [`Command`]s for the bridge, and routes upgrades to the peer and
//! listener handlers.

use crate::config::Config;
use crate::events::{self, sse_handler};
use crate::metrics;
use crate::socket::upgrade_peer;
use crate::tls;
use anyhow::Result;
use axum::{
    body::Bytes,
    extract::{ws::WebSocketUpgrade, Path, Query, State},
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use relay_protocol::{Channel, Command, JoinRequest};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tenvis_relay_core::{Bridge, BridgeConfig};
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Body of `GET /`.
pub const BANNER: &str = "Relay API Server";

/// Shared server state.
pub struct AppState {
    /// The command bridge.
    pub bridge: Bridge,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let bridge_config = BridgeConfig {
            callback_timeout: config.bridge.callback_timeout(),
        };

        Self {
            bridge: Bridge::with_config(bridge_config),
            config,
        }
    }
}

/// Request body errors.
#[derive(Debug, Error)]
pub enum BodyError {
    /// The body is not valid JSON.
    #[error("Invalid JSON body: {0}")]
    Json(#[from] serde_json::Error),

    /// The JSON body is neither an object nor an array.
    #[error("JSON body must be an object or an array")]
    NotStructured,
}

impl IntoResponse for BodyError {
    fn into_response(self) -> Response {
        metrics::record_error("body");
        (StatusCode::BAD_REQUEST, self.to_string()).into_response()
    }
}

/// The `?channel=` query parameter.
#[derive(Debug, Default, Deserialize)]
pub struct ChannelQuery {
    channel: Option<String>,
}

impl ChannelQuery {
    /// The requested channel, defaulting to 1 when absent or empty.
    ///
    /// `None` when a value was given but does not start with a number.
    #[must_use]
    pub fn channel(&self) -> Option<Channel> {
        match self.channel.as_deref() {
            None | Some("") => Some(Channel::DEFAULT),
            Some(raw) => Channel::parse_lenient(raw),
        }
    }
}

/// Run the HTTP server, plus the TLS listener when configured.
///
/// # Errors
///
/// Returns an error if the plain listener fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    events::spawn_keepalive(
        Arc::clone(state.bridge.registry()),
        config.listeners.ping_interval(),
    );

    let app = build_router(state);

    if let Some((cert_path, key_path)) = config.tls.pem_files() {
        match tls::load_tls_config(cert_path, key_path).await {
            Ok(tls_config) => {
                let addr = config.tls_bind_addr()?;
                let app = app.clone();
                info!("Relay TLS server listening on {}", addr);
                tokio::spawn(async move {
                    if let Err(e) = axum_server::bind_rustls(addr, tls_config)
                        .serve(app.into_make_service())
                        .await
                    {
                        error!(error = %e, "TLS server stopped");
                    }
                });
            }
            Err(e) => error!(error = %e, "Failed to load TLS certificate"),
        }
    } else if config.tls.enabled {
        warn!("TLS enabled but certificate or key path is missing");
    }

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Relay server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the HTTP router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(root_handler))
        .route("/sse/:room", get(sse_handler))
        .route("/join/*path", get(join_handler))
        .route(
            "/:room",
            get(room_handler).post(room_body_handler).put(room_body_handler),
        )
        .route(
            "/:room/:action",
            get(path_command_handler)
                .post(action_body_handler)
                .put(action_body_handler),
        )
        .route("/:room/:action/:target", get(path_command_handler))
        .route("/:room/:action/:target/:value", get(path_command_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Submit a command and record its outcome.
async fn dispatch(
    state: &AppState,
    room: &str,
    channel: Option<Channel>,
    command: Command,
) -> String {
    let start = Instant::now();
    let result = state.bridge.submit(room, channel, command).await;
    metrics::record_command(&result, start.elapsed().as_secs_f64());
    result
}

/// Build a command from `room/action[/a[/b]]` path segments.
///
/// Returns `None` when the segment count is out of range.
#[must_use]
pub fn path_command(segments: &[String]) -> Option<(&str, Command)> {
    match segments {
        [room, action] => Some((room.as_str(), Command::from_path(action.as_str(), None, None))),
        [room, action, first] => Some((
            room.as_str(),
            Command::from_path(action.as_str(), Some(first.clone()), None),
        )),
        [room, action, first, second] => Some((
            room.as_str(),
            Command::from_path(action.as_str(), Some(first.clone()), Some(second.clone())),
        )),
        _ => None,
    }
}

/// Decode a POST/PUT body by content type.
///
/// Form bodies become an object of strings; JSON bodies must be an object
/// or an array; anything else is an empty object.
///
/// # Errors
///
/// Returns an error for malformed or scalar JSON.
pub fn parse_body(headers: &HeaderMap, body: &[u8]) -> Result<Value, BodyError> {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if content_type.starts_with("application/x-www-form-urlencoded") {
        let fields: Map<String, Value> = url::form_urlencoded::parse(body)
            .map(|(k, v)| (k.into_owned(), Value::String(v.into_owned())))
            .collect();
        return Ok(Value::Object(fields));
    }

    if content_type.starts_with("application/json") && !body.is_empty() {
        return match serde_json::from_slice(body)? {
            value @ (Value::Object(_) | Value::Array(_)) => Ok(value),
            _ => Err(BodyError::NotStructured),
        };
    }

    Ok(Value::Object(Map::new()))
}

async fn root_handler(
    ws: Option<WebSocketUpgrade>,
    State(state): State<Arc<AppState>>,
) -> Response {
    match ws {
        Some(ws) => upgrade_peer(ws, state, None),
        None => BANNER.into_response(),
    }
}

async fn room_handler(
    ws: Option<WebSocketUpgrade>,
    Path(room): Path<String>,
    Query(query): Query<ChannelQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    if let Some(ws) = ws {
        return upgrade_peer(ws, state, None);
    }
    dispatch(&state, &room, query.channel(), Command::details())
        .await
        .into_response()
}

async fn path_command_handler(
    ws: Option<WebSocketUpgrade>,
    Path(segments): Path<Vec<String>>,
    Query(query): Query<ChannelQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    if let Some(ws) = ws {
        return upgrade_peer(ws, state, None);
    }
    match path_command(&segments) {
        Some((room, command)) => dispatch(&state, room, query.channel(), command)
            .await
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn join_handler(
    ws: Option<WebSocketUpgrade>,
    Path(path): Path<String>,
    Query(query): Query<ChannelQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    if let Some(ws) = ws {
        return upgrade_peer(ws, state, JoinRequest::from_path(&path));
    }

    // Without an upgrade, `join` is just a room name.
    let segments: Vec<String> = std::iter::once("join")
        .chain(path.trim_start_matches('/').split('/'))
        .map(str::to_string)
        .collect();
    match path_command(&segments) {
        Some((room, command)) => dispatch(&state, room, query.channel(), command)
            .await
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn room_body_handler(
    Path(room): Path<String>,
    Query(query): Query<ChannelQuery>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<String, BodyError> {
    let body = parse_body(&headers, &body)?;
    Ok(dispatch(&state, &room, query.channel(), Command::from_body(body)).await)
}

async fn action_body_handler(
    Path((room, action)): Path<(String, String)>,
    Query(query): Query<ChannelQuery>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<String, BodyError> {
    let body = parse_body(&headers, &body)?;
    Ok(dispatch(&state, &room, query.channel(), Command::keyed(action, body)).await)
}
