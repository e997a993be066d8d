use std::sync::Arc;
use std::time::Instant;

use uuid::Uuid;

use clash_core::chat::{MessageStatus, ThreadKey};
use clash_core::error::SessionError;
use clash_core::game_registry::GameKind;
use clash_core::game_trait::{Difficulty, TurnBasedGame};
use clash_core::net::messages::{
    ChatHistoryMsg, ChatHistoryRequestMsg, ClientEvent, ConnectedMsg, MatchmakingCancelledMsg,
    MatchmakingQueuedMsg, OnlineStatusMsg, SendChatMsg, ServerEvent, StartBotGameMsg,
};
use clash_core::player::{ConnectionId, Identity, Seat, UserId};

use crate::bot::schedule_bot_turn;
use crate::matchmaking::{EnqueueOutcome, MatchRequest};
use crate::room_manager::{SharedRoom, lock_room};
use crate::session::{Assignment, Effects, RoomSession};
use crate::state::AppState;

const MAX_USERNAME_LEN: usize = 32;

/// Handle one decoded client event. Failures are reported to the
/// originating connection only, as `errorMessage`.
pub async fn handle_event(state: &AppState, conn: ConnectionId, event: ClientEvent) {
    let name = event.name();
    let room_code = event_room_code(&event);
    if let Err(err) = dispatch(state, conn, event).await {
        tracing::debug!(
            connection = %conn,
            event = name,
            code = err.code(),
            "Request rejected: {err}"
        );
        report(state, conn, &err, room_code);
    }
}

fn report(state: &AppState, conn: ConnectionId, err: &SessionError, room_code: Option<String>) {
    state
        .registry
        .send(conn, &ServerEvent::error(err.code(), err.to_string(), room_code));
}

fn event_room_code(event: &ClientEvent) -> Option<String> {
    match event {
        ClientEvent::JoinRoom(m) => Some(m.room_code.clone()),
        ClientEvent::JoinGameRoom(m) => Some(m.room_code.clone()),
        ClientEvent::JoinChessRoom(m)
        | ClientEvent::ResetGame(m)
        | ClientEvent::ResetChessGame(m)
        | ClientEvent::Resign(m)
        | ClientEvent::LeaveRoom(m) => Some(m.room_code.clone()),
        ClientEvent::Move(m) | ClientEvent::ChessMove(m) => Some(m.room_code.clone()),
        ClientEvent::TicTacToeMove(m) => Some(m.room_code.clone()),
        _ => None,
    }
}

async fn dispatch(
    state: &AppState,
    conn: ConnectionId,
    event: ClientEvent,
) -> Result<(), SessionError> {
    match event {
        ClientEvent::UserConnected(m) => identify(state, conn, &m.user_id, m.username).await,
        ClientEvent::CreateRoom(m) => {
            create_room(state, conn, m.game_type.unwrap_or(GameKind::TicTacToe)).await
        },
        ClientEvent::CreateChessRoom {} => create_room(state, conn, GameKind::Chess).await,
        ClientEvent::JoinRoom(m) => join_room(state, conn, &m.room_code, m.game_type).await,
        ClientEvent::JoinChessRoom(m) => {
            join_room(state, conn, &m.room_code, Some(GameKind::Chess)).await
        },
        ClientEvent::JoinGameRoom(m) => {
            rejoin_room(state, conn, &m.room_code, m.session_token.as_deref()).await
        },
        ClientEvent::FindRandom(m) => {
            find_random(state, conn, m.game_type.unwrap_or(GameKind::TicTacToe)).await
        },
        ClientEvent::FindRandomChessMatch {} => find_random(state, conn, GameKind::Chess).await,
        ClientEvent::CancelRandom(m) => cancel_random(state, conn, m.game_type).await,
        ClientEvent::StartBotGame(m) => start_bot_game(state, conn, m).await,
        ClientEvent::Move(m) => play_move(state, conn, &m.room_code, &m.mv, None).await,
        ClientEvent::ChessMove(m) => {
            play_move(state, conn, &m.room_code, &m.mv, Some(GameKind::Chess)).await
        },
        ClientEvent::TicTacToeMove(m) => {
            play_move(
                state,
                conn,
                &m.room_code,
                &m.index,
                Some(GameKind::TicTacToe),
            )
            .await
        },
        ClientEvent::ResetGame(m) => room_op(state, conn, &m.room_code, |r| r.reset(conn)).await,
        ClientEvent::ResetChessGame(m) => {
            room_op(state, conn, &m.room_code, |r| {
                expect_kind(r, GameKind::Chess)?;
                r.reset(conn)
            })
            .await
        },
        ClientEvent::Resign(m) => room_op(state, conn, &m.room_code, |r| r.resign(conn)).await,
        ClientEvent::LeaveRoom(m) => room_op(state, conn, &m.room_code, |r| r.leave(conn)).await,
        ClientEvent::Message(m) => send_chat(state, conn, m),
        ClientEvent::MessageDelivered(m) => {
            acknowledge(state, conn, m.message_id, MessageStatus::Delivered)
        },
        ClientEvent::MessageRead(m) => {
            acknowledge(state, conn, m.message_id, MessageStatus::Read)
        },
        ClientEvent::CheckOnline(m) => check_online(state, conn, &m.friend_id),
        ClientEvent::ChatHistory(m) => chat_history(state, conn, m),
    }
}

/// Run the queued follow-ups of a room operation: bot replies, disconnect
/// grace timers and eviction.
pub(crate) fn follow_up(state: &AppState, room: &SharedRoom, fx: Effects) {
    if let Some(epoch) = fx.bot_turn {
        schedule_bot_turn(state.clone(), Arc::clone(room), epoch);
    }
    if let Some((seat, deadline)) = fx.grace_timer {
        schedule_forfeit(state.clone(), Arc::clone(room), seat, deadline);
    }
    if fx.evict {
        let code = lock_room(room).code().to_string();
        let state = state.clone();
        tokio::spawn(async move {
            state.rooms.write().await.evict_if_abandoned(&code);
        });
    }
}

fn schedule_forfeit(state: AppState, room: SharedRoom, seat: Seat, deadline: Instant) {
    tokio::spawn(async move {
        tokio::time::sleep_until(deadline.into()).await;
        let fx = {
            let mut session = lock_room(&room);
            let fx = session.forfeit_expired(seat, Instant::now());
            let _ = state.registry.deliver(&fx.outbound);
            fx
        };
        follow_up(&state, &room, fx);
    });
}

/// Apply `op` for `conn` under the room lock and deliver its events before
/// the lock is released, so every participant sees the room's events in one
/// order. An event too large to send is reported back to `conn`.
fn run_locked(
    state: &AppState,
    conn: ConnectionId,
    room: &SharedRoom,
    op: impl FnOnce(&mut RoomSession) -> Result<Effects, SessionError>,
) -> Result<Effects, SessionError> {
    let mut session = lock_room(room);
    let fx = op(&mut session)?;
    if let Err(e) = state.registry.deliver(&fx.outbound) {
        let err = SessionError::PayloadTooLarge(e.to_string());
        report(state, conn, &err, Some(session.code().to_string()));
    }
    Ok(fx)
}

async fn find_room(state: &AppState, raw_code: &str) -> Result<SharedRoom, SessionError> {
    state
        .rooms
        .read()
        .await
        .get(raw_code)
        .ok_or(SessionError::RoomNotFound)
}

async fn room_op(
    state: &AppState,
    conn: ConnectionId,
    raw_code: &str,
    op: impl FnOnce(&mut RoomSession) -> Result<Effects, SessionError>,
) -> Result<(), SessionError> {
    let room = find_room(state, raw_code).await?;
    let fx = run_locked(state, conn, &room, op)?;
    follow_up(state, &room, fx);
    Ok(())
}

fn expect_kind(room: &RoomSession, expected: GameKind) -> Result<(), SessionError> {
    if room.kind() != expected {
        return Err(SessionError::GameKindMismatch {
            expected,
            found: room.kind(),
        });
    }
    Ok(())
}

fn unavailable(kind: GameKind) -> SessionError {
    SessionError::InvalidRequest(format!("{} is not available", kind.as_str()))
}

fn create_game(state: &AppState, kind: GameKind) -> Result<Box<dyn TurnBasedGame>, SessionError> {
    state.games.create(kind).ok_or_else(|| unavailable(kind))
}

fn identity_of(state: &AppState, conn: ConnectionId) -> Identity {
    state.registry.identity(conn).unwrap_or_default()
}

fn require_user(state: &AppState, conn: ConnectionId) -> Result<(UserId, Identity), SessionError> {
    let identity = identity_of(state, conn);
    let user = identity
        .user_id
        .clone()
        .ok_or(SessionError::Unauthenticated)?;
    Ok((user, identity))
}

fn parse_user(raw: &str, field: &str) -> Result<UserId, SessionError> {
    UserId::parse(raw).ok_or_else(|| SessionError::InvalidRequest(format!("invalid {field}")))
}

fn clean_username(raw: Option<String>) -> Option<String> {
    raw.map(|name| name.trim().to_string()).filter(|name| {
        !name.is_empty()
            && name.chars().count() <= MAX_USERNAME_LEN
            && !name.chars().any(char::is_control)
    })
}

/// Bind a user identity to the connection and flush chat held for them.
async fn identify(
    state: &AppState,
    conn: ConnectionId,
    raw_user_id: &str,
    username: Option<String>,
) -> Result<(), SessionError> {
    let user = parse_user(raw_user_id, "userId")?;
    let Some(registration) = state
        .registry
        .register(conn, user.clone(), clean_username(username))
    else {
        return Ok(());
    };
    if registration.previous.is_some() {
        // Requests queued under the old identity must not pair this user.
        state.matchmaking.lock().await.cancel_connection(conn);
    }
    tracing::info!(
        connection = %conn,
        user = %user,
        came_online = registration.came_online,
        "User identified"
    );
    state.registry.send(
        conn,
        &ServerEvent::Connected(ConnectedMsg {
            connection_id: conn,
            user_id: Some(user.clone()),
        }),
    );
    state.chat.deliver_pending(&user, &state.registry);
    Ok(())
}

async fn create_room(
    state: &AppState,
    conn: ConnectionId,
    kind: GameKind,
) -> Result<(), SessionError> {
    let identity = identity_of(state, conn);
    let game = create_game(state, kind)?;

    let mut rooms = state.rooms.write().await;
    let (code, room) = rooms.create_room(game, state.session_settings());
    rooms.bind(conn, &code);
    let fx = run_locked(state, conn, &room, |r| {
        r.join(&identity, conn, Assignment::Created)
            .map(|(_, fx)| fx)
    })?;
    drop(rooms);

    tracing::info!(room = %code, game = kind.as_str(), connection = %conn, "Room created");
    follow_up(state, &room, fx);
    Ok(())
}

async fn join_room(
    state: &AppState,
    conn: ConnectionId,
    raw_code: &str,
    expected: Option<GameKind>,
) -> Result<(), SessionError> {
    let identity = identity_of(state, conn);
    let mut rooms = state.rooms.write().await;
    let room = rooms.get(raw_code).ok_or(SessionError::RoomNotFound)?;
    let mut code = String::new();
    let fx = run_locked(state, conn, &room, |r| {
        if let Some(expected) = expected {
            expect_kind(r, expected)?;
        }
        code = r.code().to_string();
        r.join(&identity, conn, Assignment::Joined).map(|(_, fx)| fx)
    })?;
    rooms.bind(conn, &code);
    drop(rooms);

    tracing::info!(room = %code, connection = %conn, "Joined room");
    follow_up(state, &room, fx);
    Ok(())
}

async fn rejoin_room(
    state: &AppState,
    conn: ConnectionId,
    raw_code: &str,
    token: Option<&str>,
) -> Result<(), SessionError> {
    let identity = identity_of(state, conn);
    let mut rooms = state.rooms.write().await;
    let room = rooms.get(raw_code).ok_or(SessionError::RoomNotFound)?;
    let mut code = String::new();
    let fx = run_locked(state, conn, &room, |r| {
        code = r.code().to_string();
        r.rejoin(&identity, conn, token).map(|(_, fx)| fx)
    })?;
    rooms.bind(conn, &code);
    drop(rooms);

    tracing::info!(room = %code, connection = %conn, "Rejoined room");
    follow_up(state, &room, fx);
    Ok(())
}

/// Queue for a stranger, or pair with the earliest compatible request. The
/// matchmaking lock is held until both participants are seated.
async fn find_random(
    state: &AppState,
    conn: ConnectionId,
    kind: GameKind,
) -> Result<(), SessionError> {
    let (user, identity) = require_user(state, conn)?;
    if !state.games.is_available(kind) {
        return Err(unavailable(kind));
    }

    let mut queue = state.matchmaking.lock().await;
    let request = MatchRequest {
        user_id: user,
        username: identity.username,
        connection: conn,
        kind,
        enqueued_at: Instant::now(),
    };
    let registry = Arc::clone(&state.registry);
    let (waiting, arriving) = match queue.enqueue(request, |c| registry.is_connected(c)) {
        EnqueueOutcome::Queued { position } | EnqueueOutcome::AlreadyQueued { position } => {
            state.registry.send(
                conn,
                &ServerEvent::MatchmakingQueued(MatchmakingQueuedMsg {
                    game_type: kind,
                    position,
                }),
            );
            return Ok(());
        },
        EnqueueOutcome::Paired { waiting, arriving } => (waiting, arriving),
    };
    // A paired user stops waiting for any other game.
    queue.cancel(&waiting.user_id, None);
    queue.cancel(&arriving.user_id, None);

    let game = create_game(state, kind)?;
    let mut rooms = state.rooms.write().await;
    let (code, room) = rooms.create_room(game, state.session_settings());
    rooms.bind(waiting.connection, &code);
    rooms.bind(arriving.connection, &code);
    let fx = run_locked(state, conn, &room, |r| {
        let mut fx = Effects::default();
        for request in [&waiting, &arriving] {
            let identity = Identity::user(request.user_id.clone(), request.username.clone());
            let (_, more) = r.join(&identity, request.connection, Assignment::RandomMatch)?;
            fx.merge(more);
        }
        Ok(fx)
    })?;
    drop(rooms);
    drop(queue);

    tracing::info!(
        room = %code,
        game = kind.as_str(),
        first = %waiting.user_id,
        second = %arriving.user_id,
        "Random match paired"
    );
    follow_up(state, &room, fx);
    Ok(())
}

async fn cancel_random(
    state: &AppState,
    conn: ConnectionId,
    kind: Option<GameKind>,
) -> Result<(), SessionError> {
    let (user, _) = require_user(state, conn)?;
    let cancelled = state.matchmaking.lock().await.cancel(&user, kind);
    if cancelled.is_empty() {
        state.registry.send(
            conn,
            &ServerEvent::MatchmakingCancelled(MatchmakingCancelledMsg {
                game_type: kind.unwrap_or(GameKind::TicTacToe),
                reason: "not queued".to_string(),
            }),
        );
    }
    for request in cancelled {
        state.registry.send(
            conn,
            &ServerEvent::MatchmakingCancelled(MatchmakingCancelledMsg {
                game_type: request.kind,
                reason: "cancelled".to_string(),
            }),
        );
    }
    Ok(())
}

async fn start_bot_game(
    state: &AppState,
    conn: ConnectionId,
    msg: StartBotGameMsg,
) -> Result<(), SessionError> {
    let identity = identity_of(state, conn);
    let kind = msg.game_type.unwrap_or(GameKind::Chess);
    let difficulty = match msg.difficulty.as_deref() {
        None => Difficulty::Easy,
        Some(label) => Difficulty::from_str_opt(label).ok_or_else(|| {
            SessionError::InvalidRequest(format!("unknown difficulty {label:?}"))
        })?,
    };
    if !state.games.supports_bot(kind) {
        return Err(SessionError::InvalidRequest(format!(
            "no bot available for {}",
            kind.as_str()
        )));
    }
    let game = create_game(state, kind)?;

    let mut rooms = state.rooms.write().await;
    let (code, room) = rooms.create_room(game, state.session_settings());
    rooms.bind(conn, &code);
    let fx = run_locked(state, conn, &room, |r| {
        r.seat_bot(Seat::Second, difficulty)?;
        r.join(&identity, conn, Assignment::BotGame).map(|(_, fx)| fx)
    })?;
    drop(rooms);

    tracing::info!(room = %code, game = kind.as_str(), ?difficulty, "Bot game started");
    follow_up(state, &room, fx);
    Ok(())
}

async fn play_move(
    state: &AppState,
    conn: ConnectionId,
    raw_code: &str,
    descriptor: &serde_json::Value,
    expected: Option<GameKind>,
) -> Result<(), SessionError> {
    room_op(state, conn, raw_code, |r| {
        if let Some(expected) = expected {
            expect_kind(r, expected)?;
        }
        r.apply_move(conn, descriptor)
    })
    .await
}

fn send_chat(
    state: &AppState,
    conn: ConnectionId,
    msg: SendChatMsg,
) -> Result<(), SessionError> {
    let (user, identity) = require_user(state, conn)?;
    let receiver = parse_user(&msg.to, "recipient")?;
    let sender_name = identity.username.or_else(|| clean_username(msg.sender));
    state
        .chat
        .send(&user, sender_name, receiver, &msg.text, &state.registry)?;
    Ok(())
}

fn acknowledge(
    state: &AppState,
    conn: ConnectionId,
    message_id: Uuid,
    status: MessageStatus,
) -> Result<(), SessionError> {
    let (user, _) = require_user(state, conn)?;
    state
        .chat
        .acknowledge(message_id, &user, status, &state.registry)
}

/// Answer with the friend's presence and keep the connection informed of
/// later changes.
fn check_online(
    state: &AppState,
    conn: ConnectionId,
    raw_friend: &str,
) -> Result<(), SessionError> {
    let friend = parse_user(raw_friend, "friendId")?;
    state.registry.watch(conn, &friend);
    let online = state.registry.is_online(&friend);
    state.registry.send(
        conn,
        &ServerEvent::OnlineStatus(OnlineStatusMsg {
            friend_id: friend,
            online,
        }),
    );
    Ok(())
}

fn chat_history(
    state: &AppState,
    conn: ConnectionId,
    msg: ChatHistoryRequestMsg,
) -> Result<(), SessionError> {
    let (user, _) = require_user(state, conn)?;
    let peer = parse_user(&msg.with_user, "withUser")?;
    let cap = state.config.chat.history_page_limit;
    let limit = msg.limit.unwrap_or(cap).min(cap);

    let thread_key = ThreadKey::derive(&user, &peer).to_string();
    state.chat.with_history(&user, &peer, limit, |page| {
        state.registry.send(
            conn,
            &ServerEvent::ChatHistory(ChatHistoryMsg {
                thread_key,
                with_user: peer.clone(),
                messages: page.messages,
                has_more: page.has_more,
            }),
        );
    });
    Ok(())
}

/// Tear down everything tied to a closed connection: its identity, its
/// match requests and its seats.
pub async fn connection_closed(state: &AppState, conn: ConnectionId) {
    let identity = state.registry.unregister(conn);
    let withdrawn = state.matchmaking.lock().await.cancel_connection(conn);
    let rooms = state.rooms.write().await.forget_connection(conn);
    for room in &rooms {
        let fx = {
            let mut session = lock_room(room);
            let fx = session.disconnect(conn);
            let _ = state.registry.deliver(&fx.outbound);
            fx
        };
        follow_up(state, room, fx);
    }
    tracing::info!(
        connection = %conn,
        user = ?identity.and_then(|i| i.user_id),
        rooms = rooms.len(),
        match_requests = withdrawn.len(),
        "Connection closed"
    );
}
