use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures_util::{Sink, SinkExt, StreamExt};
use rust_embed::RustEmbed;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_graceful_shutdown::SubsystemHandle;
use tower_http::cors::CorsLayer;

use sondetrack_core::session::{ArchiveEntry, Station};

use crate::view::{EventView, MapEvent};
use crate::Session;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(RustEmbed)]
#[folder = "web/"]
struct Assets;

#[derive(Clone)]
struct WebState {
    session: Session,
    shutdown_tx: broadcast::Sender<()>,
}

pub struct Web {
    state: WebState,
}

impl Web {
    pub fn new(session: Session) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Web {
            state: WebState {
                session,
                shutdown_tx,
            },
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(index))
            .route("/sondehub", get(index))
            .route("/get_version", get(get_version))
            .route("/get_config", get(get_config))
            .route("/get_telemetry_archive", get(get_telemetry_archive))
            .route("/follow", get(get_follow).post(set_follow))
            .route("/ws", get(ws_handler))
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    pub async fn run(self, subsys: SubsystemHandle) -> Result<(), io::Error> {
        let port = self.state.session.args.port;
        let listener = TcpListener::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)).await?;
        log::info!("Starting HTTP web server on port {}", port);

        let shutdown_tx = self.state.shutdown_tx.clone();
        axum::serve(listener, self.router().into_make_service())
            .with_graceful_shutdown(async move {
                subsys.on_shutdown_requested().await;
                // Open WebSockets would keep the server alive otherwise
                let _ = shutdown_tx.send(());
            })
            .await
    }
}

// The map page, applying the events of /ws
async fn index() -> Response {
    match Assets::get("index.html") {
        Some(file) => Html(file.data.into_owned()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn get_version() -> &'static str {
    VERSION
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
struct ConfigResponse {
    station: Option<Station>,
    host: String,
    region: String,
    topic: String,
    replay: bool,
    max_age_minutes: Option<u64>,
}

async fn get_config(State(state): State<WebState>) -> Json<ConfigResponse> {
    let args = &state.session.args;
    Json(ConfigResponse {
        station: args.station(),
        host: args.host.clone(),
        region: args.region.clone(),
        topic: args.topic.clone(),
        replay: !args.replay.is_empty(),
        max_age_minutes: args.max_age_minutes,
    })
}

async fn get_telemetry_archive(State(state): State<WebState>) -> Json<BTreeMap<String, ArchiveEntry>> {
    Json(state.session.tracker.read().unwrap().archive())
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
struct FollowState {
    following: Option<String>,
    auto_follow: bool,
}

/// Partial update; `"following": null` stops following, a missing key leaves it alone
#[derive(Deserialize, Debug, Default)]
struct FollowRequest {
    #[serde(default, deserialize_with = "present")]
    following: Option<Option<String>>,
    #[serde(default)]
    auto_follow: Option<bool>,
}

fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

async fn get_follow(State(state): State<WebState>) -> Json<FollowState> {
    let tracker = state.session.tracker.read().unwrap();
    Json(FollowState {
        following: tracker.following().map(str::to_string),
        auto_follow: tracker.auto_follow(),
    })
}

async fn set_follow(State(state): State<WebState>, Json(request): Json<FollowRequest>) -> Response {
    let session = &state.session;
    let mut events = Vec::new();

    let result = {
        let mut tracker = session.tracker.write().unwrap();
        if let Some(auto_follow) = request.auto_follow {
            tracker.set_auto_follow(auto_follow);
        }
        let changed = match request.following {
            Some(id) if !tracker.set_following(id.as_deref()) => {
                Err(format!("unknown sonde '{}'", id.unwrap_or_default()))
            }
            Some(_) => Ok(true),
            None => Ok(false),
        };
        if let Ok(true) = changed {
            events.push(MapEvent::RefreshTable {
                rows: tracker.table_rows(),
            });
            if tracker.auto_follow() {
                if let Some(track) = tracker.following().and_then(|id| tracker.get(id)) {
                    events.push(MapEvent::PanTo {
                        lat: track.marker.lat,
                        lon: track.marker.lon,
                    });
                }
            }
        }
        changed.map(|_| FollowState {
            following: tracker.following().map(str::to_string),
            auto_follow: tracker.auto_follow(),
        })
    };

    match result {
        Ok(follow) => {
            log::debug!("follow state now {:?}", follow);
            for event in events {
                session.emit(event);
            }
            Json(follow).into_response()
        }
        Err(message) => {
            log::warn!("follow request rejected: {}", message);
            (StatusCode::NOT_FOUND, message).into_response()
        }
    }
}

async fn ws_handler(State(state): State<WebState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Events that rebuild the current map on a fresh client, and the receiver
/// for everything after them
///
/// Both are taken under the tracker lock so no change falls in between.
/// A pending alert goes first.
fn snapshot(session: &Session) -> (Vec<MapEvent>, broadcast::Receiver<MapEvent>) {
    let tracker = session.tracker.read().unwrap();
    let rx = session.subscribe();
    let mut events = Vec::new();
    if let Some(message) = session.last_alert() {
        events.push(MapEvent::Alert { message });
    }
    tracker.redraw(&mut EventView::new(|e| events.push(e)));
    (events, rx)
}

async fn handle_socket(socket: WebSocket, state: WebState) {
    let (mut sender, mut receiver) = socket.split();
    let mut shutdown_rx = state.shutdown_tx.subscribe();
    let (snapshot, mut events) = snapshot(&state.session);

    log::debug!("ws: new client, {} snapshot events", snapshot.len());
    for event in snapshot {
        if send_event(&mut sender, &event).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            },
            r = events.recv() => {
                match r {
                    Ok(event) => {
                        if send_event(&mut sender, &event).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        log::warn!("ws: client lagging, {} map events dropped", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            },
            m = receiver.next() => {
                match m {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            },
        }
    }
    log::debug!("ws: client gone");
}

async fn send_event<S>(sender: &mut S, event: &MapEvent) -> Result<(), axum::Error>
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    match serde_json::to_string(event) {
        Ok(json) => sender.send(Message::Text(json.into())).await,
        Err(e) => {
            log::error!("ws: cannot serialise {:?}: {}", event, e);
            Ok(())
        }
    }
}
