use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::chat::{ChatMessage, MessageStatus};
use crate::game_registry::GameKind;
use crate::game_trait::{Difficulty, GameOutcome};
use crate::player::{ConnectionId, Seat, UserId};
use crate::room::RoomStatus;

/// Events a client may send. Wire form: `{"event": "<name>", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    UserConnected(UserConnectedMsg),
    CreateRoom(CreateRoomMsg),
    CreateChessRoom {},
    JoinRoom(JoinRoomMsg),
    JoinChessRoom(RoomRefMsg),
    JoinGameRoom(JoinGameRoomMsg),
    FindRandom(FindRandomMsg),
    FindRandomChessMatch {},
    CancelRandom(CancelRandomMsg),
    StartBotGame(StartBotGameMsg),
    Move(MoveMsg),
    TicTacToeMove(TicTacToeMoveMsg),
    ChessMove(MoveMsg),
    ResetGame(RoomRefMsg),
    ResetChessGame(RoomRefMsg),
    Resign(RoomRefMsg),
    LeaveRoom(RoomRefMsg),
    Message(SendChatMsg),
    MessageDelivered(MessageRefMsg),
    MessageRead(MessageRefMsg),
    CheckOnline(CheckOnlineMsg),
    ChatHistory(ChatHistoryRequestMsg),
}

impl ClientEvent {
    /// Wire name, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::UserConnected(_) => "userConnected",
            Self::CreateRoom(_) => "createRoom",
            Self::CreateChessRoom {} => "createChessRoom",
            Self::JoinRoom(_) => "joinRoom",
            Self::JoinChessRoom(_) => "joinChessRoom",
            Self::JoinGameRoom(_) => "joinGameRoom",
            Self::FindRandom(_) => "findRandom",
            Self::FindRandomChessMatch {} => "findRandomChessMatch",
            Self::CancelRandom(_) => "cancelRandom",
            Self::StartBotGame(_) => "startBotGame",
            Self::Move(_) => "move",
            Self::TicTacToeMove(_) => "ticTacToeMove",
            Self::ChessMove(_) => "chessMove",
            Self::ResetGame(_) => "resetGame",
            Self::ResetChessGame(_) => "resetChessGame",
            Self::Resign(_) => "resign",
            Self::LeaveRoom(_) => "leaveRoom",
            Self::Message(_) => "message",
            Self::MessageDelivered(_) => "messageDelivered",
            Self::MessageRead(_) => "messageRead",
            Self::CheckOnline(_) => "checkOnline",
            Self::ChatHistory(_) => "chatHistory",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserConnectedMsg {
    pub user_id: String,
    pub username: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomMsg {
    /// Defaults to tic-tac-toe when omitted.
    pub game_type: Option<GameKind>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomMsg {
    pub room_code: String,
    pub game_type: Option<GameKind>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinGameRoomMsg {
    pub room_code: String,
    pub session_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRefMsg {
    pub room_code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindRandomMsg {
    /// Defaults to tic-tac-toe when omitted.
    pub game_type: Option<GameKind>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelRandomMsg {
    pub game_type: Option<GameKind>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartBotGameMsg {
    /// Free-form label; unknown labels are rejected.
    pub difficulty: Option<String>,
    pub game_type: Option<GameKind>,
}

/// A move whose payload is interpreted by the room's game. Kept as raw JSON
/// so malformed payloads surface as illegal moves rather than decode errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveMsg {
    pub room_code: String,
    #[serde(rename = "move", default)]
    pub mv: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicTacToeMoveMsg {
    pub room_code: String,
    #[serde(default)]
    pub index: serde_json::Value,
    /// The symbol the client believes it plays. Ignored: the server seats.
    pub player: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendChatMsg {
    pub to: String,
    pub text: String,
    /// Display name the client attaches; the bound identity wins if present.
    pub sender: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRefMsg {
    pub message_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckOnlineMsg {
    pub friend_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatHistoryRequestMsg {
    pub with_user: String,
    pub limit: Option<usize>,
}

/// Events the server sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    Connected(ConnectedMsg),
    RoomCreated(RoomAssignmentMsg),
    RoomJoined(RoomAssignmentMsg),
    RandomMatchFound(RoomAssignmentMsg),
    BotGameStarted(RoomAssignmentMsg),
    MatchmakingQueued(MatchmakingQueuedMsg),
    MatchmakingCancelled(MatchmakingCancelledMsg),
    AssignColor(AssignColorMsg),
    AssignSymbol(AssignSymbolMsg),
    StartGame(GameStateMsg),
    TicTacToeMove(GameMoveMsg),
    ChessMove(GameMoveMsg),
    GameMove(GameMoveMsg),
    GameOver(GameOverMsg),
    ResetGame(GameStateMsg),
    RoomState(GameStateMsg),
    PlayerDisconnected(SeatNoticeMsg),
    PlayerReconnected(SeatNoticeMsg),
    PlayerLeft(SeatNoticeMsg),
    ErrorMessage(ErrorMsg),
    Message(ChatMessage),
    MessageSent(ChatMessage),
    MessageDelivered(MessageStatusMsg),
    MessageRead(MessageStatusMsg),
    OnlineStatus(OnlineStatusMsg),
    ChatHistory(ChatHistoryMsg),
}

impl ServerEvent {
    /// Build the per-game move broadcast (`ticTacToeMove`, `chessMove`, or
    /// `gameMove` for custom rooms).
    pub fn game_move(kind: GameKind, msg: GameMoveMsg) -> Self {
        match kind {
            GameKind::TicTacToe => Self::TicTacToeMove(msg),
            GameKind::Chess => Self::ChessMove(msg),
            GameKind::Custom => Self::GameMove(msg),
        }
    }

    /// The seat-assignment notice for a game kind (`assignSymbol` for
    /// tic-tac-toe, `assignColor` otherwise).
    pub fn seat_assignment(kind: GameKind, room_code: &str, seat: Seat) -> Self {
        let label = kind.seat_label(seat).to_string();
        match kind {
            GameKind::TicTacToe => Self::AssignSymbol(AssignSymbolMsg {
                room_code: room_code.to_string(),
                symbol: label,
            }),
            GameKind::Chess | GameKind::Custom => Self::AssignColor(AssignColorMsg {
                room_code: room_code.to_string(),
                color: label,
            }),
        }
    }

    pub fn error(code: &str, message: impl Into<String>, room_code: Option<String>) -> Self {
        Self::ErrorMessage(ErrorMsg {
            code: code.to_string(),
            message: message.into(),
            room_code,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedMsg {
    pub connection_id: ConnectionId,
    pub user_id: Option<UserId>,
}

/// Tells a participant which room and seat it now holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomAssignmentMsg {
    pub room_code: String,
    pub game_type: GameKind,
    pub seat: Seat,
    /// `X`/`O` or `white`/`black`.
    pub color: String,
    /// Lets the holder re-attach from another connection with `joinGameRoom`.
    pub session_token: String,
    pub opponent: Option<String>,
    pub difficulty: Option<Difficulty>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchmakingQueuedMsg {
    pub game_type: GameKind,
    /// 1-based position among requests for the same game kind.
    pub position: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchmakingCancelledMsg {
    pub game_type: GameKind,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignColorMsg {
    pub room_code: String,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignSymbolMsg {
    pub room_code: String,
    pub symbol: String,
}

/// Public view of one seat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatInfo {
    pub seat: Seat,
    pub label: String,
    pub user_id: Option<UserId>,
    pub username: Option<String>,
    pub connected: bool,
    pub is_bot: bool,
}

/// Full room view, sent on start, reset and re-attach.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStateMsg {
    pub room_code: String,
    pub game_type: GameKind,
    pub status: RoomStatus,
    /// Label of the seat due to move.
    pub turn: Option<String>,
    pub ply: usize,
    pub players: Vec<SeatInfo>,
    pub outcome: Option<GameOutcome>,
    pub state: serde_json::Value,
}

/// Broadcast after an accepted move. Game-specific fields (`board`, `index`,
/// `fen`, `san`, ...) are flattened in from the game's snapshot and the
/// normalized move.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameMoveMsg {
    pub room_code: String,
    /// Label of the seat that moved.
    pub player: String,
    pub notation: String,
    pub ply: usize,
    pub turn: Option<String>,
    pub status: RoomStatus,
    #[serde(flatten)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameOverMsg {
    pub room_code: String,
    pub outcome: GameOutcome,
    /// Label of the winning seat, `None` on a draw.
    pub winner: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatNoticeMsg {
    pub room_code: String,
    pub player: String,
    pub message: String,
    pub grace_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorMsg {
    pub code: String,
    pub message: String,
    pub room_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageStatusMsg {
    pub message_id: Uuid,
    pub thread_key: String,
    pub status: MessageStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineStatusMsg {
    pub friend_id: UserId,
    pub online: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatHistoryMsg {
    pub thread_key: String,
    pub with_user: UserId,
    pub messages: Vec<ChatMessage>,
    /// Older messages exist beyond this page.
    #[serde(default)]
    pub has_more: bool,
}
