use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::ControlError;
use crate::profile::Profile;
use crate::protocol::{ClientMessage, ServerEvent};
use crate::registry::Registration;
use crate::session::Session;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    #[serde(default)]
    token: Option<String>,
}

/// WebSocket upgrade handler. The token is resolved before upgrading so an
/// unknown credential never gets a session.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<TokenQuery>,
    State(state): State<AppState>,
) -> Response {
    let token = query.token.unwrap_or_default();
    match state.resolver().resolve(&token) {
        Some(profile) => ws.on_upgrade(move |socket| handle_socket(socket, state, profile)),
        None => {
            warn!("rejected websocket connection with unknown token");
            ControlError::Unauthorized("invalid token".into()).into_response()
        }
    }
}

async fn handle_socket(socket: WebSocket, state: AppState, profile: Profile) {
    let Registration {
        session,
        mut receiver,
    } = state
        .registry()
        .register(profile, state.desktop().screen_size());
    let session_id = session.id().to_string();
    let (mut sender, mut stream) = socket.split();

    info!(
        session_id = %session_id,
        admin = profile.is_admin,
        can_host = profile.can_host,
        "session connected"
    );

    // Drains the session queue onto the socket in enqueue order.
    let writer_id = session_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(event) = receiver.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(err) => {
                    warn!(session_id = %writer_id, event = event.name(), error = %err, "failed to encode event");
                    continue;
                }
            };
            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
        debug!(session_id = %writer_id, "writer task ended");
    });

    while let Some(frame) = stream.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => {
                warn!(session_id = %session_id, error = %err, "websocket read failed");
                break;
            }
        };

        match frame {
            Message::Text(text) => handle_text(&state, &session, &text),
            Message::Binary(data) => match String::from_utf8(data) {
                Ok(text) => handle_text(&state, &session, &text),
                Err(_) => {
                    session.send(ServerEvent::error("binary frame is not valid utf-8"));
                }
            },
            Message::Close(_) => {
                debug!(session_id = %session_id, "close frame received");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    state.registry().remove(&session_id);
    writer.abort();
    info!(session_id = %session_id, "session disconnected");
}

fn handle_text(state: &AppState, session: &Session, text: &str) {
    let message = match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => message,
        Err(err) => {
            warn!(session_id = %session.id(), error = %err, "failed to parse client message");
            session.send(ServerEvent::error(format!("Invalid message format: {err}")));
            return;
        }
    };

    let kind = message.name();
    if let Err(err) = state.dispatcher().dispatch(session, message) {
        debug!(session_id = %session.id(), message = kind, error = %err, "message rejected");
        session.send(ServerEvent::error(err.to_string()));
    }
}
