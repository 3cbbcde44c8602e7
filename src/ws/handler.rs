//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::{MatchHandle, PlayerInput};
use crate::util::rate_limit::PeerRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, ServerMsg, PROTOCOL_VERSION};

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Stable id so a dropped peer can take its seat back
    pub user_id: Option<Uuid>,
    pub name: Option<String>,
    /// Client protocol version
    pub v: Option<u32>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    if let Some(v) = query.v.filter(|v| *v != PROTOCOL_VERSION) {
        warn!(client_version = v, server_version = PROTOCOL_VERSION, "Protocol version mismatch");
        return (
            StatusCode::BAD_REQUEST,
            format!("protocol version {v} not supported, server speaks {PROTOCOL_VERSION}"),
        )
            .into_response();
    }

    let user_id = query.user_id.unwrap_or_else(Uuid::new_v4);
    let display_name = query
        .name
        .map(|n| n.trim().chars().take(32).collect::<String>())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| format!("Player_{}", &user_id.simple().to_string()[..8]));

    ws.on_upgrade(move |socket| handle_socket(socket, user_id, display_name, state))
}

/// Match this connection is seated at
struct Seating {
    handle: MatchHandle,
    forwarder: JoinHandle<()>,
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, user_id: Uuid, display_name: String, state: AppState) {
    info!(user_id = %user_id, name = %display_name, "New WebSocket connection");

    let (ws_sink, mut ws_stream) = socket.split();
    let (out_tx, out_rx) = mpsc::channel::<ServerMsg>(256);
    let writer = tokio::spawn(write_loop(user_id, ws_sink, out_rx));

    let welcome = ServerMsg::Welcome {
        user_id,
        protocol_version: PROTOCOL_VERSION,
        server_time: unix_millis(),
    };
    if out_tx.send(welcome).await.is_err() {
        error!(user_id = %user_id, "Failed to queue welcome");
        return;
    }

    let rate_limiter = PeerRateLimiter::new();
    let mut seating: Option<Seating> = None;
    let (unseat_tx, mut unseat_rx) = mpsc::channel::<Uuid>(4);

    // Reader loop: WebSocket -> match task
    loop {
        let result = tokio::select! {
            frame = ws_stream.next() => match frame {
                Some(result) => result,
                None => break,
            },
            Some(match_id) = unseat_rx.recv() => {
                if seating.as_ref().is_some_and(|s| s.handle.id == match_id) {
                    if let Some(seat) = seating.take() {
                        info!(user_id = %user_id, match_id = %match_id, "Not seated, match released");
                        leave_match(seat, user_id, &display_name).await;
                    }
                }
                continue;
            }
        };

        let text = match result {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(_)) => {
                warn!(user_id = %user_id, "Received binary message, ignoring");
                continue;
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(Message::Close(_)) => {
                info!(user_id = %user_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(user_id = %user_id, error = %e, "WebSocket error");
                break;
            }
        };

        let msg = match serde_json::from_str::<ClientMsg>(&text) {
            Ok(msg) => msg,
            Err(e) => {
                if serde_json::from_str::<ServerMsg>(&text).is_ok() {
                    warn!(user_id = %user_id, "Peer sent an authoritative message, dropping");
                } else {
                    warn!(user_id = %user_id, error = %e, "Failed to parse client message");
                }
                continue;
            }
        };

        if !rate_limiter.allow(&msg) {
            warn!(user_id = %user_id, "Rate limited client message");
            continue;
        }

        if let ClientMsg::JoinMatch { match_id } = &msg {
            if seating.is_none() {
                let handle = state
                    .match_registry
                    .find_or_spawn(*match_id, &state.config.match_settings());
                let forwarder = tokio::spawn(forward_events(
                    user_id,
                    handle.id,
                    handle.events_tx.subscribe(),
                    out_tx.clone(),
                    unseat_tx.clone(),
                ));
                info!(user_id = %user_id, match_id = %handle.id, "Joining match");
                seating = Some(Seating { handle, forwarder });
            }
        }

        let Some(seat) = &seating else {
            let _ = out_tx
                .send(ServerMsg::Rejected {
                    user_id,
                    code: "not_seated".to_string(),
                    message: "join a match first".to_string(),
                })
                .await;
            continue;
        };

        let input = PlayerInput {
            user_id,
            display_name: display_name.clone(),
            msg,
            received_at: unix_millis(),
        };
        if seat.handle.input_tx.send(input).await.is_err() {
            debug!(user_id = %user_id, "Input channel closed");
            break;
        }
    }

    // Signal disconnect to the match task
    if let Some(seat) = seating {
        leave_match(seat, user_id, &display_name).await;
    }
    writer.abort();

    info!(user_id = %user_id, "WebSocket connection closed");
}

/// Tell the match task this peer is gone and stop forwarding its events
async fn leave_match(seat: Seating, user_id: Uuid, display_name: &str) {
    let _ = seat
        .handle
        .input_tx
        .send(PlayerInput {
            user_id,
            display_name: display_name.to_string(),
            msg: ClientMsg::LeaveMatch,
            received_at: unix_millis(),
        })
        .await;
    seat.forwarder.abort();
}

/// A refusal that means this peer holds no seat at the match
fn unseats(msg: &ServerMsg, user_id: Uuid) -> bool {
    matches!(
        msg,
        ServerMsg::Rejected { user_id: to, code, .. }
            if *to == user_id && (code == "table_full" || code == "match_over")
    )
}

/// Match broadcast -> this peer's outgoing queue, dropping messages
/// addressed to someone else
async fn forward_events(
    user_id: Uuid,
    match_id: Uuid,
    mut events_rx: broadcast::Receiver<ServerMsg>,
    out_tx: mpsc::Sender<ServerMsg>,
    unseat_tx: mpsc::Sender<Uuid>,
) {
    loop {
        match events_rx.recv().await {
            Ok(msg) => {
                if !msg.is_for(user_id) {
                    continue;
                }
                let unseated = unseats(&msg, user_id);
                if out_tx.send(msg).await.is_err() {
                    break;
                }
                if unseated {
                    let _ = unseat_tx.send(match_id).await;
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(user_id = %user_id, lagged_count = n, "Client lagged, skipping {} events", n);
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!(user_id = %user_id, "Match channel closed");
                break;
            }
        }
    }
}

async fn write_loop(
    user_id: Uuid,
    mut ws_sink: futures::stream::SplitSink<WebSocket, Message>,
    mut out_rx: mpsc::Receiver<ServerMsg>,
) {
    while let Some(msg) = out_rx.recv().await {
        if let Err(e) = send_msg(&mut ws_sink, &msg).await {
            debug!(user_id = %user_id, error = %e, "WebSocket send failed");
            break;
        }
    }
}

/// Send a message over WebSocket
async fn send_msg(
    sink: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &ServerMsg,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
