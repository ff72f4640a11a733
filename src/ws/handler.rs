use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::engine::{EngineConn, Frame};
use super::registry::RoomRegistry;
use super::session::Session;

// Close codes sent to rejected or force-closed clients.
const INVALID_PATH: u16 = 4000;
const SERVER_ERROR: u16 = 1011;
const GOING_AWAY: u16 = 1001;

const INVALID_PATH_REASON: &str = "Invalid path. Use /board/<boardId>";

/// Entry point for every path the API router does not claim. WebSocket
/// upgrades are routed to a room by board id; anything else gets a plain
/// 404, matching the original sync server's catch-all.
pub async fn ws_entry(
    State(registry): State<Arc<RoomRegistry>>,
    uri: Uri,
    ws: Option<WebSocketUpgrade>,
) -> Response {
    let Some(ws) = ws else {
        return (StatusCode::NOT_FOUND, "Not found").into_response();
    };

    match parse_board_path(uri.path()) {
        Some(board_id) => {
            let session = Session::new(board_id);
            info!(
                "Client connected: {} -> room {}",
                session.session_id, session.board_id
            );
            ws.on_upgrade(move |socket| handle_socket(socket, session, registry))
        }
        None => ws.on_upgrade(|socket| reject(socket, INVALID_PATH, INVALID_PATH_REASON)),
    }
}

/// Extract the board id from a connection path of the form
/// `/board/<boardId>`. Empty segments are filtered out first; trailing
/// segments beyond the board id are tolerated.
fn parse_board_path(path: &str) -> Option<&str> {
    let mut segments = path.split('/').filter(|s| !s.is_empty());
    match (segments.next(), segments.next()) {
        (Some("board"), Some(board_id)) => Some(board_id),
        _ => None,
    }
}

/// Complete the handshake only to close the socket with a specific code and
/// reason, the way the original server rejects bad connections.
async fn reject(mut socket: WebSocket, code: u16, reason: &'static str) {
    warn!("Rejecting connection: {}", reason);
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })))
        .await;
}

async fn handle_socket(socket: WebSocket, session: Session, registry: Arc<RoomRegistry>) {
    let room = match registry.attach(&session).await {
        Ok(room) => room,
        Err(e) => {
            error!("Failed to open room {}: {}", session.board_id, e);
            reject(socket, SERVER_ERROR, "Failed to open room").await;
            return;
        }
    };

    let conn = room.engine().connect(session.session_id);
    relay(socket, &session, conn).await;

    registry.detach(&room, session.session_id).await;
    info!(
        "Client disconnected: {} from room {}",
        session.session_id, session.board_id
    );
}

/// Pump frames between one client's transport and its room engine until the
/// peer disconnects, the transport faults, or the room shuts down. Payloads
/// pass through untouched.
async fn relay(socket: WebSocket, session: &Session, mut conn: EngineConn) {
    let (mut sender, mut receiver) = socket.split();

    // The room may have been torn down between attach and here.
    if *conn.shutdown.borrow() {
        let _ = sender
            .send(Message::Close(Some(CloseFrame {
                code: GOING_AWAY,
                reason: "Room closed".into(),
            })))
            .await;
        return;
    }

    loop {
        tokio::select! {
            incoming = receiver.next() => match incoming {
                Some(Ok(msg @ (Message::Text(_) | Message::Binary(_)))) => {
                    // No subscribers just means nobody else is in the room.
                    let _ = conn.inbound.send(Frame {
                        sender: session.session_id,
                        payload: msg,
                    });
                }
                // axum answers pings itself.
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    // Transport fault counts as an ordinary disconnect.
                    debug!("Transport error for session {}: {}", session.session_id, e);
                    break;
                }
            },
            outgoing = conn.outbound.recv() => match outgoing {
                Ok(frame) => {
                    // Skip our own frames to prevent echo.
                    if frame.sender == session.session_id {
                        continue;
                    }
                    if sender.send(frame.payload).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Session {} lagged, dropped {} frames", session.session_id, n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = conn.shutdown.changed() => {
                // Room is closing underneath us; force-close the transport.
                let _ = sender
                    .send(Message::Close(Some(CloseFrame {
                        code: GOING_AWAY,
                        reason: "Room closed".into(),
                    })))
                    .await;
                break;
            }
        }
    }
}
