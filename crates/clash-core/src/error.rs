use crate::game_registry::GameKind;
use crate::game_trait::MoveError;

/// Recoverable errors surfaced to the connection that caused them.
///
/// These are never broadcast to the rest of a room.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("room not found")]
    RoomNotFound,
    #[error("room is full")]
    RoomFull,
    #[error("room hosts {found}, not {expected}")]
    GameKindMismatch { expected: GameKind, found: GameKind },
    #[error("not your turn")]
    NotYourTurn,
    #[error("illegal move: {0}")]
    IllegalMove(String),
    #[error("game already finished")]
    GameAlreadyFinished,
    #[error("opponent disconnected")]
    OpponentDisconnected,
    #[error("identify with userConnected first")]
    Unauthenticated,
    #[error("waiting for an opponent")]
    RoomNotActive,
    #[error("game still in progress")]
    GameNotFinished,
    #[error("you are not seated in this room")]
    NotInRoom,
    #[error("message not found")]
    MessageNotFound,
    #[error("only the recipient can update this message")]
    NotMessageRecipient,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("rate limited")]
    RateLimited,
    #[error("reply could not be delivered: {0}")]
    PayloadTooLarge(String),
}

impl SessionError {
    /// Stable identifier sent in `errorMessage.code`.
    pub fn code(&self) -> &'static str {
        match self {
            Self::RoomNotFound => "RoomNotFound",
            Self::RoomFull => "RoomFull",
            Self::GameKindMismatch { .. } => "GameKindMismatch",
            Self::NotYourTurn => "NotYourTurn",
            Self::IllegalMove(_) => "IllegalMove",
            Self::GameAlreadyFinished => "GameAlreadyFinished",
            Self::OpponentDisconnected => "OpponentDisconnected",
            Self::Unauthenticated => "Unauthenticated",
            Self::RoomNotActive => "RoomNotActive",
            Self::GameNotFinished => "GameNotFinished",
            Self::NotInRoom => "NotInRoom",
            Self::MessageNotFound => "MessageNotFound",
            Self::NotMessageRecipient => "NotMessageRecipient",
            Self::InvalidRequest(_) => "InvalidRequest",
            Self::RateLimited => "RateLimited",
            Self::PayloadTooLarge(_) => "PayloadTooLarge",
        }
    }
}

impl From<MoveError> for SessionError {
    fn from(e: MoveError) -> Self {
        match e {
            MoveError::NotYourTurn => Self::NotYourTurn,
            MoveError::IllegalMove(reason) => Self::IllegalMove(reason),
            MoveError::GameAlreadyFinished => Self::GameAlreadyFinished,
        }
    }
}
