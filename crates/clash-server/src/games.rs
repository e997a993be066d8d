use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use clash_core::game_registry::GameKind;
use clash_core::game_trait::{
    AppliedMove, BotSettings, Difficulty, GameOutcome, MoveError, TurnBasedGame,
};
use clash_core::player::Seat;
use clash_core::turn_based_game_boilerplate;

/// Largest serialized move a custom room relays.
pub const MAX_CUSTOM_MOVE_BYTES: usize = 4 * 1024;

/// Moves of a custom game included in its snapshot, newest last.
pub const SNAPSHOT_HISTORY_LEN: usize = 64;

type GameFactory = fn() -> Box<dyn TurnBasedGame>;

/// Registry of game factories available to rooms.
pub struct ServerGameRegistry {
    factories: HashMap<GameKind, GameFactory>,
}

impl Default for ServerGameRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerGameRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register_defaults();
        registry
    }

    fn register_defaults(&mut self) {
        #[cfg(feature = "tictactoe")]
        self.factories.insert(GameKind::TicTacToe, || {
            Box::new(clash_tictactoe::TicTacToe::new())
        });
        #[cfg(feature = "chess")]
        self.factories
            .insert(GameKind::Chess, || Box::new(clash_chess::Chess::new()));
        self.factories
            .insert(GameKind::Custom, || Box::new(CustomGame::new()));
    }

    pub fn create(&self, kind: GameKind) -> Option<Box<dyn TurnBasedGame>> {
        self.factories.get(&kind).map(|f| f())
    }

    pub fn is_available(&self, kind: GameKind) -> bool {
        self.factories.contains_key(&kind)
    }

    /// Registered kinds in declaration order.
    pub fn kinds(&self) -> Vec<GameKind> {
        GameKind::ALL
            .into_iter()
            .filter(|k| self.factories.contains_key(k))
            .collect()
    }

    /// Return the number of registered game types.
    pub fn available_games(&self) -> usize {
        self.factories.len()
    }

    /// Custom rooms have no rules for a bot to follow.
    pub fn supports_bot(&self, kind: GameKind) -> bool {
        kind != GameKind::Custom && self.is_available(kind)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomState {
    pub turn: Seat,
    pub history: Vec<serde_json::Value>,
    /// Never set by the game itself; custom games end by resignation or
    /// forfeit, which the room records.
    pub outcome: Option<GameOutcome>,
}

impl Default for CustomState {
    fn default() -> Self {
        Self {
            turn: Seat::First,
            history: Vec::new(),
            outcome: None,
        }
    }
}

/// Turn-order-only relay: any non-null JSON move is accepted from the seat on
/// move and echoed to both participants.
#[derive(Debug, Clone, Default)]
pub struct CustomGame {
    state: CustomState,
}

impl CustomGame {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TurnBasedGame for CustomGame {
    turn_based_game_boilerplate!(state_type: CustomState);

    fn kind(&self) -> GameKind {
        GameKind::Custom
    }

    fn reset(&mut self) {
        self.state = CustomState::default();
    }

    fn turn(&self) -> Option<Seat> {
        match self.state.outcome {
            Some(_) => None,
            None => Some(self.state.turn),
        }
    }

    fn apply_move(
        &mut self,
        seat: Seat,
        descriptor: &serde_json::Value,
    ) -> Result<AppliedMove, MoveError> {
        if self.state.outcome.is_some() {
            return Err(MoveError::GameAlreadyFinished);
        }
        if seat != self.state.turn {
            return Err(MoveError::NotYourTurn);
        }
        if descriptor.is_null() {
            return Err(MoveError::IllegalMove("move is required".to_string()));
        }
        let notation = descriptor.to_string();
        if notation.len() > MAX_CUSTOM_MOVE_BYTES {
            return Err(MoveError::IllegalMove(format!(
                "move exceeds {MAX_CUSTOM_MOVE_BYTES} bytes"
            )));
        }

        self.state.history.push(descriptor.clone());
        self.state.turn = seat.other();
        Ok(AppliedMove {
            seat,
            notation,
            descriptor: serde_json::json!({ "move": descriptor }),
        })
    }

    fn snapshot(&self) -> serde_json::Value {
        let history = &self.state.history;
        let recent = &history[history.len().saturating_sub(SNAPSHOT_HISTORY_LEN)..];
        serde_json::json!({
            "history": recent,
            "moveCount": history.len(),
        })
    }

    fn bot_move(
        &self,
        _difficulty: Difficulty,
        _settings: &BotSettings,
    ) -> Option<serde_json::Value> {
        None
    }
}
