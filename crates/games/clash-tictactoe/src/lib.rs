pub mod bot;

use serde::{Deserialize, Serialize};

use clash_core::game_registry::GameKind;
use clash_core::game_trait::{
    AppliedMove, BotSettings, Difficulty, EndReason, GameOutcome, MoveError, TurnBasedGame,
};
use clash_core::player::Seat;
use clash_core::turn_based_game_boilerplate;

/// The eight lines that win the game.
pub const WINNING_LINES: [[usize; 3]; 8] = [
    [0, 1, 2],
    [3, 4, 5],
    [6, 7, 8],
    [0, 3, 6],
    [1, 4, 7],
    [2, 5, 8],
    [0, 4, 8],
    [2, 4, 6],
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mark {
    X,
    O,
}

impl Mark {
    pub fn for_seat(seat: Seat) -> Self {
        match seat {
            Seat::First => Mark::X,
            Seat::Second => Mark::O,
        }
    }

    pub fn seat(self) -> Seat {
        match self {
            Mark::X => Seat::First,
            Mark::O => Seat::Second,
        }
    }
}

pub type Board = [Option<Mark>; 9];

/// Authoritative tic-tac-toe state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicTacToeState {
    pub board: Board,
    pub turn: Seat,
    /// Cell indices in play order.
    pub history: Vec<u8>,
    pub outcome: Option<GameOutcome>,
    pub winning_line: Option<[usize; 3]>,
}

impl Default for TicTacToeState {
    fn default() -> Self {
        Self {
            board: [None; 9],
            turn: Seat::First,
            history: Vec::new(),
            outcome: None,
            winning_line: None,
        }
    }
}

/// Line completed by `mark`, if any.
pub fn winning_line(board: &Board, mark: Mark) -> Option<[usize; 3]> {
    WINNING_LINES
        .into_iter()
        .find(|line| line.iter().all(|&i| board[i] == Some(mark)))
}

pub fn empty_cells(board: &Board) -> Vec<usize> {
    (0..9).filter(|&i| board[i].is_none()).collect()
}

/// Accepts a bare cell index (`4`) or `{"index": 4}`.
fn parse_index(descriptor: &serde_json::Value) -> Result<usize, MoveError> {
    let raw = match descriptor {
        serde_json::Value::Object(map) => map.get("index").unwrap_or(&serde_json::Value::Null),
        other => other,
    };
    let index = raw
        .as_u64()
        .ok_or_else(|| MoveError::IllegalMove(format!("cell must be 0..8, got {raw}")))?;
    if index > 8 {
        return Err(MoveError::IllegalMove(format!("cell {index} is off the board")));
    }
    Ok(index as usize)
}

#[derive(Debug, Clone, Default)]
pub struct TicTacToe {
    state: TicTacToeState,
}

impl TicTacToe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &TicTacToeState {
        &self.state
    }
}

impl TurnBasedGame for TicTacToe {
    turn_based_game_boilerplate!(state_type: TicTacToeState);

    fn kind(&self) -> GameKind {
        GameKind::TicTacToe
    }

    fn reset(&mut self) {
        self.state = TicTacToeState::default();
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
        let index = parse_index(descriptor)?;
        if self.state.board[index].is_some() {
            return Err(MoveError::IllegalMove(format!("cell {index} is taken")));
        }

        let mark = Mark::for_seat(seat);
        self.state.board[index] = Some(mark);
        self.state.history.push(index as u8);
        if let Some(line) = winning_line(&self.state.board, mark) {
            self.state.winning_line = Some(line);
            self.state.outcome = Some(GameOutcome::win(seat, EndReason::ThreeInARow));
        } else if self.state.board.iter().all(Option::is_some) {
            self.state.outcome = Some(GameOutcome::draw(EndReason::BoardFull));
        }
        self.state.turn = seat.other();

        Ok(AppliedMove {
            seat,
            notation: index.to_string(),
            descriptor: serde_json::json!({ "index": index }),
        })
    }

    fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "board": self.state.board,
            "turn": self.turn().map(Mark::for_seat),
            "history": self.state.history,
            "winningLine": self.state.winning_line,
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
        let mark = Mark::for_seat(self.state.turn);
        let mut rng = settings.rng();
        bot::choose_cell(&self.state.board, mark, difficulty, &mut rng)
            .map(|index| serde_json::json!({ "index": index }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clash_core::test_helpers;
    use proptest::prelude::*;

    fn play(game: &mut TicTacToe, cells: &[usize]) {
        for &cell in cells {
            let seat = game.turn().unwrap();
            game.apply_move(seat, &serde_json::json!(cell)).unwrap();
        }
    }

    #[test]
    fn contract_fresh_game_starts_with_first_seat() {
        test_helpers::contract_fresh_game_starts_with_first_seat(&TicTacToe::new());
    }

    #[test]
    fn contract_legal_move_advances_turn() {
        let mut game = TicTacToe::new();
        test_helpers::contract_legal_move_advances_turn(&mut game, &serde_json::json!(4));
    }

    #[test]
    fn contract_out_of_turn_is_rejected() {
        let mut game = TicTacToe::new();
        test_helpers::contract_out_of_turn_is_rejected(&mut game, &serde_json::json!(4));
    }

    #[test]
    fn contract_garbage_is_illegal() {
        test_helpers::contract_garbage_is_illegal(&mut TicTacToe::new());
    }

    #[test]
    fn contract_reset_restores_initial_state() {
        test_helpers::contract_reset_restores_initial_state(
            &mut TicTacToe::new(),
            &serde_json::json!({"index": 0}),
        );
    }

    #[test]
    fn contract_clone_is_independent() {
        test_helpers::contract_clone_is_independent(&mut TicTacToe::new(), &serde_json::json!(8));
    }

    #[test]
    fn contract_bot_moves_are_legal() {
        test_helpers::contract_bot_moves_are_legal(&mut TicTacToe::new(), 9);
    }

    #[test]
    fn contract_finished_game_rejects_moves() {
        let mut game = TicTacToe::new();
        play(&mut game, &[0, 3, 1, 4, 2]);
        test_helpers::contract_finished_game_rejects_moves(&mut game);
    }

    #[test]
    fn top_row_wins_for_x() {
        let mut game = TicTacToe::new();
        play(&mut game, &[0, 3, 1, 4, 2]);
        assert_eq!(
            game.outcome(),
            Some(GameOutcome::win(Seat::First, EndReason::ThreeInARow))
        );
        assert_eq!(game.state().winning_line, Some([0, 1, 2]));
        assert_eq!(game.turn(), None);
    }

    #[test]
    fn full_board_without_line_is_draw() {
        let mut game = TicTacToe::new();
        // X O X / X O O / O X X
        play(&mut game, &[0, 1, 2, 4, 3, 5, 7, 6, 8]);
        assert_eq!(game.outcome(), Some(GameOutcome::draw(EndReason::BoardFull)));
    }

    #[test]
    fn win_on_last_cell_is_not_a_draw() {
        let mut game = TicTacToe::new();
        // X O X / O O X / O X X, the ninth mark completes 2-5-8.
        play(&mut game, &[0, 1, 2, 3, 5, 4, 7, 6, 8]);
        assert_eq!(
            game.outcome(),
            Some(GameOutcome::win(Seat::First, EndReason::ThreeInARow))
        );
        assert_eq!(game.state().winning_line, Some([2, 5, 8]));
    }

    #[test]
    fn occupied_cell_is_illegal_and_state_unchanged() {
        let mut game = TicTacToe::new();
        play(&mut game, &[4]);
        let before = game.serialize_state();
        let err = game.apply_move(Seat::Second, &serde_json::json!(4)).unwrap_err();
        assert!(matches!(err, MoveError::IllegalMove(_)));
        assert_eq!(before, game.serialize_state());
        assert_eq!(game.turn(), Some(Seat::Second));
    }

    #[test]
    fn out_of_range_and_non_numeric_cells_are_illegal() {
        let mut game = TicTacToe::new();
        for bad in [
            serde_json::json!(9),
            serde_json::json!("not a number"),
            serde_json::json!(1.5),
            serde_json::json!({"index": "4"}),
        ] {
            assert!(matches!(
                game.apply_move(Seat::First, &bad),
                Err(MoveError::IllegalMove(_))
            ));
        }
        assert_eq!(game.move_count(), 0);
    }

    #[test]
    fn snapshot_uses_x_and_o() {
        let mut game = TicTacToe::new();
        play(&mut game, &[4]);
        let snap = game.snapshot();
        assert_eq!(snap["board"][4], "X");
        assert!(snap["board"][0].is_null());
        assert_eq!(snap["turn"], "O");
    }

    proptest! {
        #[test]
        fn random_sequences_keep_marks_balanced(
            cells in proptest::collection::vec(0usize..12, 0..20)
        ) {
            let mut game = TicTacToe::new();
            for cell in cells {
                let Some(seat) = game.turn() else { break };
                let before = game.serialize_state();
                if game.apply_move(seat, &serde_json::json!(cell)).is_err() {
                    prop_assert_eq!(before, game.serialize_state());
                }
            }
            let board = game.state().board;
            let xs = board.iter().filter(|c| **c == Some(Mark::X)).count();
            let os = board.iter().filter(|c| **c == Some(Mark::O)).count();
            prop_assert!(xs == os || xs == os + 1);
            prop_assert_eq!(xs + os, game.move_count());
        }
    }
}
