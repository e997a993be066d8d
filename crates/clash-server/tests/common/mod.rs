use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use clash_core::net::messages::{ClientEvent, ServerEvent};
use clash_core::net::protocol::{decode_server_event, encode_client_event};

use clash_server::config::{AuthFileConfig, ServerConfig};
use clash_server::{build_app, spawn_maintenance};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    _shutdown: tokio::task::JoinHandle<()>,
}

/// Defaults with an instant, reproducible bot.
pub fn test_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.bot.move_delay_ms = 0;
    config.bot.seed = Some(7);
    config
}

impl TestServer {
    /// Start a test server with no auth.
    pub async fn new() -> Self {
        Self::from_config(test_config()).await
    }

    /// Start a test server that requires a bearer token on the REST API.
    pub async fn with_auth(token: &str) -> Self {
        let config = ServerConfig {
            auth: AuthFileConfig {
                bearer_token: Some(token.to_string()),
            },
            ..test_config()
        };
        Self::from_config(config).await
    }

    pub async fn from_config(config: ServerConfig) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (app, state) = build_app(config);
        spawn_maintenance(state);

        let handle = tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });

        // Give the server a moment to start accepting
        tokio::time::sleep(Duration::from_millis(20)).await;

        Self {
            addr,
            _shutdown: handle,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }
}

/// Connect an anonymous client and consume its `connected` greeting.
pub async fn ws_connect(url: &str) -> WsStream {
    let (mut stream, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    match ws_read_event(&mut stream).await {
        ServerEvent::Connected(c) => assert!(c.user_id.is_none()),
        other => panic!("Expected connected, got: {other:?}"),
    }
    stream
}

/// Connect and identify as `user_id` via the upgrade query string.
pub async fn ws_connect_as(server: &TestServer, user_id: &str) -> WsStream {
    let url = format!("{}?userId={user_id}&username={user_id}", server.ws_url());
    let (mut stream, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    ws_expect(&mut stream, |e| {
        matches!(
            e,
            ServerEvent::Connected(c)
                if c.user_id.as_ref().is_some_and(|u| u.as_str() == user_id)
        )
    })
    .await;
    stream
}

pub async fn ws_send(stream: &mut WsStream, event: &ClientEvent) {
    let encoded = encode_client_event(event).unwrap();
    stream.send(Message::Text(encoded.into())).await.unwrap();
}

/// Send a raw JSON frame, for wire-format tests.
pub async fn ws_send_json(stream: &mut WsStream, value: serde_json::Value) {
    stream
        .send(Message::Text(value.to_string().into()))
        .await
        .unwrap();
}

/// Read the next server event (5s timeout).
pub async fn ws_read_event(stream: &mut WsStream) -> ServerEvent {
    let deadline = Duration::from_secs(5);
    tokio::time::timeout(deadline, async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => return decode_server_event(text.as_str()).unwrap(),
                Some(Ok(Message::Close(_))) => panic!("WebSocket closed unexpectedly"),
                Some(Err(e)) => panic!("WebSocket error: {e}"),
                None => panic!("WebSocket stream ended"),
                _ => continue,
            }
        }
    })
    .await
    .expect("Timed out waiting for WebSocket message")
}

/// Try to read an event, returning None on timeout.
pub async fn ws_try_read_event(stream: &mut WsStream, timeout_ms: u64) -> Option<ServerEvent> {
    let deadline = Duration::from_millis(timeout_ms);
    tokio::time::timeout(deadline, async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return decode_server_event(text.as_str()).unwrap();
                },
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                    panic!("WebSocket error or closed")
                },
                _ => continue,
            }
        }
    })
    .await
    .ok()
}

/// Read events until one matches, discarding the rest.
pub async fn ws_expect(stream: &mut WsStream, pred: impl Fn(&ServerEvent) -> bool) -> ServerEvent {
    loop {
        let event = ws_read_event(stream).await;
        if pred(&event) {
            return event;
        }
    }
}
