use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::game_registry::GameKind;
use crate::player::Seat;

/// Core trait every turn-based game hosted in a room implements.
///
/// The room session owns seating, lifecycle and delivery; the game only
/// validates moves, tracks whose turn it is and detects terminal positions.
/// Implementations must treat every move descriptor as untrusted input: a
/// rejected move leaves the state exactly as it was.
pub trait TurnBasedGame: Send + Sync {
    /// Which game this is.
    fn kind(&self) -> GameKind;

    /// Reinitialize to the starting position. [`Seat::First`] moves first.
    fn reset(&mut self);

    /// Seat due to move, or `None` once the game has reached a terminal state.
    fn turn(&self) -> Option<Seat>;

    /// Validate and apply a move for `seat`.
    fn apply_move(
        &mut self,
        seat: Seat,
        descriptor: &serde_json::Value,
    ) -> Result<AppliedMove, MoveError>;

    /// Natural end of the game (win by rules or draw), if reached.
    fn outcome(&self) -> Option<GameOutcome>;

    /// Client-facing view of the state (board, turn, history).
    fn snapshot(&self) -> serde_json::Value;

    /// Canonical binary encoding of the authoritative state. Two states are
    /// equal exactly when their encodings are byte-identical.
    fn serialize_state(&self) -> Vec<u8>;

    /// Number of moves accepted since the last reset.
    fn move_count(&self) -> usize;

    /// Pick a legal move for the side to move. Returns `None` only when the
    /// game is over. The result must be accepted by [`TurnBasedGame::apply_move`].
    fn bot_move(&self, difficulty: Difficulty, settings: &BotSettings) -> Option<serde_json::Value>;

    /// Clone into a new box, used to run bot searches off the room lock.
    fn clone_box(&self) -> Box<dyn TurnBasedGame>;
}

/// A move that was accepted by the game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedMove {
    pub seat: Seat,
    /// Human-readable notation (`"4"` for a tic-tac-toe cell, SAN for chess).
    pub notation: String,
    /// Normalized descriptor that would replay this move.
    pub descriptor: serde_json::Value,
}

/// How a game ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameOutcome {
    /// `None` for a draw.
    pub winner: Option<Seat>,
    pub reason: EndReason,
}

impl GameOutcome {
    pub fn win(winner: Seat, reason: EndReason) -> Self {
        Self {
            winner: Some(winner),
            reason,
        }
    }

    pub fn draw(reason: EndReason) -> Self {
        Self {
            winner: None,
            reason,
        }
    }

    pub fn is_draw(&self) -> bool {
        self.winner.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EndReason {
    ThreeInARow,
    BoardFull,
    Checkmate,
    Stalemate,
    InsufficientMaterial,
    ThreefoldRepetition,
    FiftyMoveRule,
    Resignation,
    Forfeit,
}

/// Why a move was rejected by the game rules.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MoveError {
    #[error("not your turn")]
    NotYourTurn,
    #[error("illegal move: {0}")]
    IllegalMove(String),
    #[error("game already finished")]
    GameAlreadyFinished,
}

/// Bot strength label passed through by the client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    #[default]
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "easy" => Some(Self::Easy),
            "medium" | "normal" => Some(Self::Medium),
            "hard" => Some(Self::Hard),
            _ => None,
        }
    }
}

/// Search limits for bot move selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotSettings {
    pub medium_depth: u8,
    pub hard_depth: u8,
    /// Seed for the move-selection RNG. `None` uses OS entropy.
    pub seed: Option<u64>,
}

impl BotSettings {
    /// RNG for one move selection: seeded when a seed is configured.
    pub fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        }
    }
}

impl Default for BotSettings {
    fn default() -> Self {
        Self {
            medium_depth: 2,
            hard_depth: 3,
            seed: None,
        }
    }
}

/// Generates the `TurnBasedGame` methods that are identical across games:
/// `serialize_state`, `outcome`, `move_count` and `clone_box`.
///
/// Requires the implementing struct to be `Clone` and to have a `state:
/// $StateType` field, with `$StateType: Serialize` carrying
/// `outcome: Option<GameOutcome>` and `history: Vec<_>` fields.
#[macro_export]
macro_rules! turn_based_game_boilerplate {
    (state_type: $StateType:ty) => {
        fn serialize_state(&self) -> Vec<u8> {
            rmp_serde::to_vec(&self.state).unwrap_or_default()
        }

        fn outcome(&self) -> Option<$crate::game_trait::GameOutcome> {
            self.state.outcome
        }

        fn move_count(&self) -> usize {
            self.state.history.len()
        }

        fn clone_box(&self) -> Box<dyn $crate::game_trait::TurnBasedGame> {
            Box::new(self.clone())
        }
    };
}
