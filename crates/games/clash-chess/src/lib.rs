pub mod board;
pub mod bot;
pub mod movegen;
pub mod san;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use clash_core::game_registry::GameKind;
use clash_core::game_trait::{
    AppliedMove, BotSettings, Difficulty, EndReason, GameOutcome, MoveError, TurnBasedGame,
};
use clash_core::player::Seat;
use clash_core::turn_based_game_boilerplate;

use board::{Color, FenError, PieceKind, Position};
use movegen::{in_check, legal_moves};

/// Half-moves without a capture or pawn move that end the game.
pub const FIFTY_MOVE_PLIES: u32 = 100;

/// Serializable chess state. The FEN plus the move list fully determine the
/// game, including repetition history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChessState {
    pub start_fen: String,
    pub fen: String,
    /// Moves in SAN.
    pub history: Vec<String>,
    pub outcome: Option<GameOutcome>,
}

#[derive(Debug, Clone)]
pub struct Chess {
    state: ChessState,
    start: Position,
    position: Position,
    /// Occurrences of each position, keyed by FEN without move counters.
    seen: HashMap<String, u8>,
}

impl Default for Chess {
    fn default() -> Self {
        Self::from_position(Position::starting())
    }
}

impl Chess {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an arbitrary legal position.
    pub fn from_fen(fen: &str) -> Result<Self, FenError> {
        Ok(Self::from_position(Position::from_fen(fen)?))
    }

    fn from_position(start: Position) -> Self {
        let fen = start.to_fen();
        let mut game = Self {
            state: ChessState {
                start_fen: fen.clone(),
                fen,
                history: Vec::new(),
                outcome: None,
            },
            position: start.clone(),
            start,
            seen: HashMap::new(),
        };
        game.seen.insert(game.position.placement_key(), 1);
        game.state.outcome = game.detect_outcome(0);
        game
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    pub fn fen(&self) -> &str {
        &self.state.fen
    }

    /// Terminal state of the current position. `repeats` is how often it has
    /// now occurred.
    fn detect_outcome(&self, repeats: u8) -> Option<GameOutcome> {
        let pos = &self.position;
        if legal_moves(pos).is_empty() {
            return Some(if in_check(pos, pos.side_to_move) {
                GameOutcome::win(pos.side_to_move.opposite().seat(), EndReason::Checkmate)
            } else {
                GameOutcome::draw(EndReason::Stalemate)
            });
        }
        if insufficient_material(pos) {
            return Some(GameOutcome::draw(EndReason::InsufficientMaterial));
        }
        if repeats >= 3 {
            return Some(GameOutcome::draw(EndReason::ThreefoldRepetition));
        }
        if pos.halfmove_clock >= FIFTY_MOVE_PLIES {
            return Some(GameOutcome::draw(EndReason::FiftyMoveRule));
        }
        None
    }
}

/// Neither side can mate: bare kings, a single minor piece, or bishops that
/// all stand on one square color.
pub fn insufficient_material(pos: &Position) -> bool {
    let mut minors = Vec::new();
    for (sq, piece) in pos.pieces() {
        match piece.kind {
            PieceKind::King => {},
            PieceKind::Knight | PieceKind::Bishop => minors.push((sq, piece.kind)),
            PieceKind::Pawn | PieceKind::Rook | PieceKind::Queen => return false,
        }
    }
    match minors.as_slice() {
        [] | [_] => true,
        all => {
            all.iter().all(|(_, kind)| *kind == PieceKind::Bishop)
                && all
                    .iter()
                    .map(|(sq, _)| (sq.file() + sq.rank()) % 2)
                    .collect::<std::collections::HashSet<_>>()
                    .len()
                    == 1
        },
    }
}

fn color_label(color: Color) -> &'static str {
    GameKind::Chess.seat_label(color.seat())
}

impl TurnBasedGame for Chess {
    turn_based_game_boilerplate!(state_type: ChessState);

    fn kind(&self) -> GameKind {
        GameKind::Chess
    }

    fn reset(&mut self) {
        *self = Self::from_position(self.start.clone());
    }

    fn turn(&self) -> Option<Seat> {
        match self.state.outcome {
            Some(_) => None,
            None => Some(self.position.side_to_move.seat()),
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
        if Color::from_seat(seat) != self.position.side_to_move {
            return Err(MoveError::NotYourTurn);
        }
        let mv = san::parse_move(&self.position, descriptor)?;
        let notation = san::to_san(&self.position, mv);

        self.position.make_move(mv);
        self.state.fen = self.position.to_fen();
        self.state.history.push(notation.clone());
        let repeats = {
            let count = self.seen.entry(self.position.placement_key()).or_insert(0);
            *count = count.saturating_add(1);
            *count
        };
        self.state.outcome = self.detect_outcome(repeats);

        let mut descriptor = serde_json::json!({
            "san": notation,
            "from": mv.from.to_string(),
            "to": mv.to.to_string(),
        });
        if let Some(kind) = mv.promotion {
            let letter = kind.letter().to_ascii_lowercase().to_string();
            descriptor["promotion"] = serde_json::json!(letter);
        }
        Ok(AppliedMove {
            seat,
            notation,
            descriptor,
        })
    }

    fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "fen": self.state.fen,
            "turn": self.turn().map(|seat| color_label(Color::from_seat(seat))),
            "inCheck": in_check(&self.position, self.position.side_to_move),
            "history": self.state.history,
        })
    }

    fn bot_move(
        &self,
        difficulty: Difficulty,
        settings: &BotSettings,
    ) -> Option<serde_json::Value> {
        if self.state.outcome.is_some() {
            return None;
        }
        let mut rng = settings.rng();
        bot::choose_move(&self.position, difficulty, settings, &mut rng)
            .map(|mv| serde_json::json!(mv.to_uci()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clash_core::test_helpers;
    use proptest::prelude::*;

    fn play(game: &mut Chess, moves: &[&str]) {
        for mv in moves {
            let seat = game.turn().unwrap();
            game.apply_move(seat, &serde_json::json!(mv))
                .unwrap_or_else(|e| panic!("{mv}: {e}"));
        }
    }

    #[test]
    fn contract_fresh_game_starts_with_first_seat() {
        test_helpers::contract_fresh_game_starts_with_first_seat(&Chess::new());
    }

    #[test]
    fn contract_legal_move_advances_turn() {
        let mut game = Chess::new();
        test_helpers::contract_legal_move_advances_turn(&mut game, &serde_json::json!("e4"));
    }

    #[test]
    fn contract_out_of_turn_is_rejected() {
        test_helpers::contract_out_of_turn_is_rejected(&mut Chess::new(), &serde_json::json!("e4"));
    }

    #[test]
    fn contract_garbage_is_illegal() {
        test_helpers::contract_garbage_is_illegal(&mut Chess::new());
    }

    #[test]
    fn contract_reset_restores_initial_state() {
        test_helpers::contract_reset_restores_initial_state(
            &mut Chess::new(),
            &serde_json::json!({"from": "g1", "to": "f3"}),
        );
    }

    #[test]
    fn contract_clone_is_independent() {
        test_helpers::contract_clone_is_independent(&mut Chess::new(), &serde_json::json!("d2d4"));
    }

    #[test]
    fn contract_bot_moves_are_legal() {
        test_helpers::contract_bot_moves_are_legal(&mut Chess::new(), 6);
    }

    #[test]
    fn contract_finished_game_rejects_moves() {
        let mut game = Chess::new();
        play(&mut game, &["f3", "e5", "g4", "Qh4#"]);
        test_helpers::contract_finished_game_rejects_moves(&mut game);
    }

    #[test]
    fn fools_mate_is_checkmate_for_black() {
        let mut game = Chess::new();
        play(&mut game, &["f3", "e5", "g4", "Qh4#"]);
        assert_eq!(
            game.outcome(),
            Some(GameOutcome::win(Seat::Second, EndReason::Checkmate))
        );
        assert_eq!(game.state.history.last().map(String::as_str), Some("Qh4#"));
    }

    #[test]
    fn black_cannot_move_first_and_board_is_unchanged() {
        let mut game = Chess::new();
        let before = game.fen().to_string();
        assert_eq!(
            game.apply_move(Seat::Second, &serde_json::json!("e5")),
            Err(MoveError::NotYourTurn)
        );
        assert_eq!(game.fen(), before);
    }

    #[test]
    fn stalemate_is_a_draw() {
        let mut game = Chess::from_fen("7k/8/6Q1/8/8/8/8/K7 w - - 0 1").unwrap();
        play(&mut game, &["Qf7"]);
        assert_eq!(game.outcome(), Some(GameOutcome::draw(EndReason::Stalemate)));
    }

    #[test]
    fn capturing_last_piece_is_insufficient_material() {
        let mut game = Chess::from_fen("4k3/8/8/8/8/8/4r3/4K3 w - - 0 1").unwrap();
        play(&mut game, &["Kxe2"]);
        assert_eq!(
            game.outcome(),
            Some(GameOutcome::draw(EndReason::InsufficientMaterial))
        );
    }

    #[test]
    fn insufficient_material_cases() {
        let check = |fen: &str| insufficient_material(&Position::from_fen(fen).unwrap());
        assert!(check("4k3/8/8/8/8/8/8/4K3 w - - 0 1"));
        assert!(check("4k3/8/8/8/8/8/8/3NK3 w - - 0 1"));
        // Bishops on c1 and f8 share dark squares.
        assert!(check("4kb2/8/8/8/8/8/8/2B1K3 w - - 0 1"));
        assert!(!check("4k3/8/8/8/8/8/8/2BBK3 w - - 0 1"));
        assert!(!check("4k3/8/8/8/8/8/8/2NNK3 w - - 0 1"));
        assert!(!check("4k3/p7/8/8/8/8/8/4K3 w - - 0 1"));
    }

    #[test]
    fn threefold_repetition_draws_automatically() {
        let mut game = Chess::new();
        play(
            &mut game,
            &["Nf3", "Nf6", "Ng1", "Ng8", "Nf3", "Nf6", "Ng1"],
        );
        assert!(game.outcome().is_none());
        play(&mut game, &["Ng8"]);
        assert_eq!(
            game.outcome(),
            Some(GameOutcome::draw(EndReason::ThreefoldRepetition))
        );
    }

    #[test]
    fn fifty_move_rule_draws_automatically() {
        let mut game = Chess::from_fen("4k3/8/8/8/8/8/8/R3K3 w - - 99 80").unwrap();
        play(&mut game, &["Ra2"]);
        assert_eq!(game.outcome(), Some(GameOutcome::draw(EndReason::FiftyMoveRule)));
    }

    #[test]
    fn applied_move_reports_san_and_squares() {
        let mut game = Chess::new();
        let applied = game.apply_move(Seat::First, &serde_json::json!("g1f3")).unwrap();
        assert_eq!(applied.notation, "Nf3");
        assert_eq!(applied.descriptor["from"], "g1");
        assert_eq!(applied.descriptor["to"], "f3");
        let snap = game.snapshot();
        assert_eq!(snap["turn"], "black");
        assert_eq!(
            snap["fen"],
            "rnbqkbnr/pppppppp/8/8/8/5N2/PPPPPPPP/RNBQKB1R b KQkq - 1 1"
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn random_playouts_never_leave_own_king_in_check(
            choices in proptest::collection::vec(0usize..256, 1..40)
        ) {
            let mut game = Chess::new();
            for choice in choices {
                let Some(seat) = game.turn() else { break };
                let moves = legal_moves(game.position());
                let mv = moves[choice % moves.len()];
                let mover = game.position().side_to_move;
                game.apply_move(seat, &serde_json::json!(mv.to_uci())).unwrap();
                prop_assert!(!in_check(game.position(), mover));
            }
        }

        #[test]
        fn rejected_moves_preserve_state(text in "[a-hKQRBNOx1-8=+-]{1,6}") {
            let mut game = Chess::new();
            let before = game.serialize_state();
            if game.apply_move(Seat::First, &serde_json::json!(text)).is_err() {
                prop_assert_eq!(before, game.serialize_state());
            }
        }
    }
}
