use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{ConnectInfo, FromRequest, Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use clash_core::error::SessionError;
use clash_core::net::messages::{ClientEvent, ConnectedMsg, ServerEvent, UserConnectedMsg};
use clash_core::net::protocol::{MAX_MESSAGE_SIZE, decode_client_event};
use clash_core::player::ConnectionId;

use crate::dispatch::{connection_closed, handle_event};
use crate::rate_limit::FrameRateLimiter;
use crate::state::{AppState, ConnectionGuard, IpConnectionGuard};

/// Optional identity supplied on the upgrade URL, equivalent to sending
/// `userConnected` as the first frame.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WsParams {
    user_id: Option<String>,
    username: Option<String>,
}

pub async fn ws_handler(
    State(state): State<AppState>,
    request: axum::extract::Request,
) -> Result<axum::response::Response, StatusCode> {
    let max_ws = state.config.limits.max_ws_connections;
    let current = state.ws_connection_count.load(Ordering::Relaxed);
    if current >= max_ws {
        tracing::warn!(current, max = max_ws, "WS connection limit reached");
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    let ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip())
        .unwrap_or(std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST));
    let max_per_ip = state.config.limits.max_ws_per_ip;
    let Some(ip_guard) =
        IpConnectionGuard::try_acquire(ip, Arc::clone(&state.ws_per_ip), max_per_ip)
    else {
        tracing::warn!(%ip, max_per_ip, "Per-IP WS connection limit reached");
        return Err(StatusCode::TOO_MANY_REQUESTS);
    };

    let params = Query::<WsParams>::try_from_uri(request.uri())
        .map(|Query(p)| p)
        .unwrap_or_default();

    let ws = WebSocketUpgrade::from_request(request, &state)
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?;

    Ok(ws
        .max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_socket(socket, state, params, ip_guard))
        .into_response())
}

async fn handle_socket(
    socket: WebSocket,
    state: AppState,
    params: WsParams,
    _ip_guard: IpConnectionGuard,
) {
    let _guard = ConnectionGuard::new(Arc::clone(&state.ws_connection_count));
    let (ws_sender, mut ws_receiver) = socket.split();

    let (tx, rx) = mpsc::channel::<Arc<str>>(state.config.limits.connection_message_buffer);
    let conn = state.registry.connect(tx);
    spawn_writer(ws_sender, rx);
    tracing::info!(connection = %conn, "WebSocket connected");

    state.registry.send(
        conn,
        &ServerEvent::Connected(ConnectedMsg {
            connection_id: conn,
            user_id: None,
        }),
    );
    if let Some(user_id) = params.user_id {
        let event = ClientEvent::UserConnected(UserConnectedMsg {
            user_id,
            username: params.username,
        });
        handle_event(&state, conn, event).await;
    }

    read_loop(&mut ws_receiver, &state, conn).await;

    connection_closed(&state, conn).await;
}

/// Drain the connection's outbound queue into the socket. Ends when the
/// registry drops the sender or the socket fails.
fn spawn_writer(
    mut ws_sender: futures::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Arc<str>>,
) {
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if ws_sender
                .send(Message::Text(frame.to_string().into()))
                .await
                .is_err()
            {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });
}

async fn read_loop(
    ws_receiver: &mut futures::stream::SplitStream<WebSocket>,
    state: &AppState,
    conn: ConnectionId,
) {
    let mut rate_limiter = FrameRateLimiter::new(state.config.limits.ws_rate_limit_per_sec);

    while let Some(Ok(msg)) = ws_receiver.next().await {
        let text = match &msg {
            Message::Text(t) => t.as_str(),
            Message::Binary(d) => match std::str::from_utf8(d) {
                Ok(t) => t,
                Err(_) => continue,
            },
            Message::Close(_) => break,
            _ => continue,
        };

        if !rate_limiter.allow() {
            tracing::warn!(connection = %conn, "Rate limited");
            let err = SessionError::RateLimited;
            state
                .registry
                .send(conn, &ServerEvent::error(err.code(), err.to_string(), None));
            continue;
        }

        match decode_client_event(text) {
            Ok(event) => handle_event(state, conn, event).await,
            Err(e) => {
                tracing::debug!(connection = %conn, error = %e, "Undecodable frame");
                let err = SessionError::InvalidRequest(e.to_string());
                state
                    .registry
                    .send(conn, &ServerEvent::error(err.code(), err.to_string(), None));
            },
        }
    }
}
