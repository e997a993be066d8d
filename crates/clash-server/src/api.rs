use axum::extract::{Path, Query, State};
use axum::response::Json;
use serde::{Deserialize, Serialize};

use clash_core::chat::{ChatMessage, ThreadKey};
use clash_core::game_registry::GameKind;
use clash_core::player::UserId;

use crate::error::AppError;
use crate::room_manager::RoomStats;
use crate::state::AppState;

/// Status response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub rooms: RoomStats,
    pub connections: usize,
    pub online_users: usize,
    pub matchmaking_pending: usize,
    pub chat_threads: usize,
    pub chat_messages: usize,
    pub games: Vec<GameKind>,
    pub uptime_secs: u64,
}

/// GET /api/v1/status: room, presence, matchmaking and chat counters.
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let matchmaking_pending = state.matchmaking.lock().await.len();
    let rooms = state.rooms.read().await.stats();

    Json(StatusResponse {
        rooms,
        connections: state.registry.connection_count(),
        online_users: state.registry.online_user_count(),
        matchmaking_pending,
        chat_threads: state.chat.thread_count(),
        chat_messages: state.chat.message_count(),
        games: state.games.kinds(),
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    pub user_a: String,
    pub user_b: String,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    pub thread_key: String,
    pub messages: Vec<ChatMessage>,
    pub has_more: bool,
}

fn parse_user(raw: &str) -> Result<UserId, AppError> {
    UserId::parse(raw).ok_or_else(|| AppError::BadRequest(format!("invalid user id {raw:?}")))
}

/// GET /api/v1/chat/history: the newest `limit` messages between two users,
/// oldest first.
pub async fn get_chat_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, AppError> {
    let a = parse_user(&query.user_a)?;
    let b = parse_user(&query.user_b)?;
    if a == b {
        return Err(AppError::BadRequest("users must differ".to_string()));
    }
    let cap = state.config.chat.history_page_limit;
    let limit = query.limit.unwrap_or(cap).min(cap);

    let page = state.chat.history(&a, &b, limit);
    Ok(Json(HistoryResponse {
        thread_key: ThreadKey::derive(&a, &b).to_string(),
        messages: page.messages,
        has_more: page.has_more,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceResponse {
    pub user_id: UserId,
    pub online: bool,
}

/// GET /api/v1/presence/{user_id}
pub async fn get_presence(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<PresenceResponse>, AppError> {
    let user = parse_user(&user_id)?;
    let online = state.registry.is_online(&user);
    Ok(Json(PresenceResponse {
        user_id: user,
        online,
    }))
}
