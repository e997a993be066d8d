use std::sync::atomic::Ordering;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::Serialize;

use clash_core::net::protocol::PROTOCOL_VERSION;

use crate::state::AppState;

/// Structured health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub protocol: u8,
    pub connections: ConnectionInfo,
    pub rooms: RoomInfo,
}

#[derive(Serialize)]
pub struct ConnectionInfo {
    pub websocket: usize,
    pub online_users: usize,
}

#[derive(Serialize)]
pub struct RoomInfo {
    pub total: usize,
    pub active: usize,
}

/// Structured health check endpoint. Returns server status, connection counts,
/// and room info as JSON.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let ws = state.ws_connection_count.load(Ordering::Relaxed);
    let stats = state.rooms.read().await.stats();

    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        protocol: PROTOCOL_VERSION,
        connections: ConnectionInfo {
            websocket: ws,
            online_users: state.registry.online_user_count(),
        },
        rooms: RoomInfo {
            total: stats.rooms,
            active: stats.active,
        },
    })
}

/// Readiness check: at least one game must be registered.
pub async fn readiness_check(State(state): State<AppState>) -> (StatusCode, &'static str) {
    if state.games.available_games() == 0 {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            "not ready: no games registered",
        );
    }
    (StatusCode::OK, "ready")
}
