//! `GET {websocket.path}` upgrade.

use std::collections::HashMap;

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use herald_core::RegistrationError;
use tracing::{info, warn};

use super::session::run_ws_session;
use crate::auth::credentials_from_request;
use crate::push::CloseReason;
use crate::server::AppState;

/// Upgrade the request and run a duplex session.
///
/// Identity is resolved before the upgrade. A rejected caller is still
/// upgraded, then closed with `1008 policy violation` and never registered.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let credentials = credentials_from_request(&headers, &query, &state.config.token_query_param);
    let ws = ws.max_message_size(state.config.websocket.max_message_size);

    match state.resolver.resolve(&credentials) {
        Ok(identity) => {
            let lifecycle = state.duplex.clone();
            ws.on_upgrade(move |socket| run_ws_session(socket, identity, lifecycle))
        }
        Err(error) => {
            info!(%error, "websocket connection rejected");
            ws.on_upgrade(move |socket| reject(socket, error))
        }
    }
}

async fn reject(mut socket: WebSocket, error: RegistrationError) {
    let reason = CloseReason::PolicyViolation;
    let frame = CloseFrame {
        code: reason.code(),
        reason: Utf8Bytes::from_static(reason.as_str()),
    };
    if let Err(e) = socket.send(Message::Close(Some(frame))).await {
        warn!(rejected_for = %error, error = %e, "close frame not sent");
    }
}
