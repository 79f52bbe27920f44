use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use clap::Parser;
use compositor::{CompositorController, ObsConnector};
use futures::{SinkExt, StreamExt};
use mixer::{MixerController, VoicemeeterConnector};
use relay::api::{health, item_visibility, list_scenes, set_item_visibility, strip_gain};
use shared::{
    domain::{ItemVisibility, SceneDescriptor, StripGain},
    error::{ApiError, ErrorCode},
    protocol::{ClientRequest, HealthReport, SceneItemState, SetItemVisibilityRequest},
};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{debug, info, warn, Level};
use tracing_subscriber::EnvFilter;

mod app_state;
mod config;

use app_state::AppState;
use config::{load_settings, Settings};

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ApiError>)>;

/// Relays OBS and Voicemeeter control to browser clients.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// TOML settings file; missing means defaults.
    #[arg(long, default_value = "remocon.toml")]
    config: PathBuf,
    /// Start without attempting the initial device connections.
    #[arg(long)]
    no_connect: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let settings = load_settings(&args.config)?;
    let (compositor, mixer) = build_controllers(&settings);

    if args.no_connect {
        info!("skipping initial device connections");
    } else {
        connect_devices(&compositor, mixer.as_deref()).await;
    }

    let state = AppState::new(compositor, mixer, settings.gain_broadcast);
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = settings.bind_addr.parse()?;
    info!(%addr, obs_url = %settings.obs_url, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_controllers(
    settings: &Settings,
) -> (Arc<CompositorController>, Option<Arc<MixerController>>) {
    let compositor = Arc::new(CompositorController::new(ObsConnector::new(
        settings.obs_url.clone(),
        settings.obs_password.clone(),
    )));
    let mixer = settings.mixer_enabled.then(|| {
        Arc::new(MixerController::new(VoicemeeterConnector::new(
            settings.mixer_library_path.clone(),
            settings.mixer_poll_interval(),
        )))
    });
    (compositor, mixer)
}

async fn connect_devices(compositor: &CompositorController, mixer: Option<&MixerController>) {
    let mixer_connect = async {
        match mixer {
            Some(mixer) => Some(mixer.connect(false).await),
            None => None,
        }
    };
    let (compositor_up, mixer_up) = tokio::join!(compositor.connect(false), mixer_connect);
    if !compositor_up {
        warn!("compositor unavailable at startup; clients can request a reconnect");
    }
    if mixer_up == Some(false) {
        warn!("mixer unavailable at startup; clients can request a reconnect");
    }
}

fn build_router(state: Arc<AppState>) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    Router::new()
        .route("/api", get(index))
        .route("/api/health", get(http_health))
        .route("/api/obs/scenes", get(http_list_scenes))
        .route(
            "/api/obs/scenes/:scene/items/:item",
            get(http_item_visibility).put(http_set_item_visibility),
        )
        .route("/api/mixer/strips/:strip_index/gain", get(http_strip_gain))
        .route("/ws", get(ws_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(trace_layer)
}

fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn reject(error: ApiError) -> (StatusCode, Json<ApiError>) {
    (status_for(error.code), Json(error))
}

async fn index() -> &'static str {
    "ok"
}

async fn http_health(State(state): State<Arc<AppState>>) -> ApiResult<HealthReport> {
    health(&state.api).await.map(Json).map_err(reject)
}

async fn http_list_scenes(State(state): State<Arc<AppState>>) -> Json<Vec<SceneDescriptor>> {
    Json(list_scenes(&state.api).await)
}

async fn http_item_visibility(
    State(state): State<Arc<AppState>>,
    Path((scene, item)): Path<(String, String)>,
) -> ApiResult<SceneItemState> {
    let visibility = item_visibility(&state.api, &scene, &item)
        .await
        .map_err(reject)?;
    Ok(Json(SceneItemState {
        scene_name: scene,
        item_name: item,
        enabled: visibility == ItemVisibility::Enabled,
    }))
}

async fn http_set_item_visibility(
    State(state): State<Arc<AppState>>,
    Path((scene, item)): Path<(String, String)>,
    Json(req): Json<SetItemVisibilityRequest>,
) -> ApiResult<SceneItemState> {
    set_item_visibility(&state.api, &scene, &item, req.enabled)
        .await
        .map_err(reject)?;
    Ok(Json(SceneItemState {
        scene_name: scene,
        item_name: item,
        enabled: req.enabled,
    }))
}

async fn http_strip_gain(
    State(state): State<Arc<AppState>>,
    Path(strip_index): Path<u32>,
) -> ApiResult<StripGain> {
    strip_gain(&state.api, strip_index)
        .await
        .map(Json)
        .map_err(reject)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws_connection(state, socket))
}

async fn ws_connection(state: Arc<AppState>, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let mut session = state.hub.attach_client();
    let client = session.id();

    // The session lives in the send task; aborting it detaches the client.
    let send_task = tokio::spawn(async move {
        while let Some(event) = session.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(v) => v,
                Err(error) => {
                    warn!(%error, "failed to encode server event");
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = receiver.next().await {
        match message {
            Message::Text(text) => match serde_json::from_str::<ClientRequest>(&text) {
                // Own task per request: a device call may never return.
                Ok(request) => {
                    let state = Arc::clone(&state);
                    tokio::spawn(async move { state.hub.handle_request(client, request).await });
                }
                Err(error) => warn!(client = client.0, %error, "skipping malformed client frame"),
            },
            Message::Close(_) => break,
            _ => debug!(client = client.0, "ignoring non-text frame"),
        }
    }

    send_task.abort();
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
