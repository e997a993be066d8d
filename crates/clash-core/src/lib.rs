pub mod chat;
pub mod error;
pub mod game_registry;
pub mod game_trait;
pub mod net;
pub mod player;
pub mod room;
pub mod time;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers {
    use crate::game_trait::{BotSettings, Difficulty, MoveError, TurnBasedGame};
    use crate::player::Seat;

    /// Bot settings with a fixed seed so tests are reproducible.
    pub fn seeded_settings(seed: u64) -> BotSettings {
        BotSettings {
            seed: Some(seed),
            ..BotSettings::default()
        }
    }

    /// Let the bot play both sides until the game ends or `max_plies` is hit.
    /// Returns the number of moves played.
    pub fn play_out_with_bots(
        game: &mut dyn TurnBasedGame,
        difficulty: Difficulty,
        max_plies: usize,
    ) -> usize {
        let settings = seeded_settings(7);
        let mut played = 0;
        while let Some(seat) = game.turn() {
            if played >= max_plies {
                break;
            }
            let mv = game
                .bot_move(difficulty, &settings)
                .expect("bot must move while the game is running");
            game.apply_move(seat, &mv)
                .unwrap_or_else(|e| panic!("bot move {mv} rejected: {e}"));
            played += 1;
        }
        played
    }

    // ================================================================
    // Game Trait Contract Tests
    // ================================================================
    // Every TurnBasedGame implementation must pass these. Game crates call
    // them from their own #[cfg(test)] modules with a fresh game and one
    // legal opening move for the first seat.

    /// A fresh game is running, First is on move, nothing has been played.
    pub fn contract_fresh_game_starts_with_first_seat(game: &dyn TurnBasedGame) {
        assert_eq!(game.turn(), Some(Seat::First), "First must open the game");
        assert!(game.outcome().is_none(), "fresh game must not be over");
        assert_eq!(game.move_count(), 0);
        assert!(
            !game.serialize_state().is_empty(),
            "serialize_state() must return non-empty bytes"
        );
    }

    /// A legal move changes the state, counts, and hands the turn over.
    pub fn contract_legal_move_advances_turn(
        game: &mut dyn TurnBasedGame,
        opening: &serde_json::Value,
    ) {
        let before = game.serialize_state();
        let applied = game
            .apply_move(Seat::First, opening)
            .unwrap_or_else(|e| panic!("opening {opening} rejected: {e}"));
        assert_eq!(applied.seat, Seat::First);
        assert!(!applied.notation.is_empty(), "notation must be filled in");
        assert_ne!(before, game.serialize_state(), "state must change");
        assert_eq!(game.move_count(), 1);
        assert_eq!(game.turn(), Some(Seat::Second));
    }

    /// Moving out of turn is rejected and leaves the state byte-identical.
    pub fn contract_out_of_turn_is_rejected(
        game: &mut dyn TurnBasedGame,
        opening: &serde_json::Value,
    ) {
        let before = game.serialize_state();
        let err = game.apply_move(Seat::Second, opening).unwrap_err();
        assert_eq!(err, MoveError::NotYourTurn);
        assert_eq!(before, game.serialize_state(), "rejected move mutated state");
    }

    /// Garbage descriptors are illegal moves and leave the state unchanged.
    pub fn contract_garbage_is_illegal(game: &mut dyn TurnBasedGame) {
        let before = game.serialize_state();
        for garbage in [
            serde_json::Value::Null,
            serde_json::json!("zz9"),
            serde_json::json!({"nonsense": true}),
            serde_json::json!([1, 2, 3]),
            serde_json::json!(-1),
        ] {
            let seat = game.turn().unwrap_or(Seat::First);
            match game.apply_move(seat, &garbage) {
                Err(MoveError::IllegalMove(_)) => {},
                other => panic!("{garbage} should be illegal, got {other:?}"),
            }
        }
        assert_eq!(before, game.serialize_state(), "rejected move mutated state");
    }

    /// reset() returns to a state byte-identical to a fresh game.
    pub fn contract_reset_restores_initial_state(
        game: &mut dyn TurnBasedGame,
        opening: &serde_json::Value,
    ) {
        let initial = game.serialize_state();
        game.apply_move(Seat::First, opening)
            .unwrap_or_else(|e| panic!("opening {opening} rejected: {e}"));
        game.reset();
        assert_eq!(initial, game.serialize_state());
        assert_eq!(game.turn(), Some(Seat::First));
        assert_eq!(game.move_count(), 0);
    }

    /// clone_box() yields an independent copy.
    pub fn contract_clone_is_independent(
        game: &mut dyn TurnBasedGame,
        opening: &serde_json::Value,
    ) {
        let copy = game.clone_box();
        game.apply_move(Seat::First, opening)
            .unwrap_or_else(|e| panic!("opening {opening} rejected: {e}"));
        assert_ne!(copy.serialize_state(), game.serialize_state());
        assert_eq!(copy.move_count(), 0);
    }

    /// Bots at every difficulty only ever produce moves the game accepts.
    pub fn contract_bot_moves_are_legal(game: &mut dyn TurnBasedGame, max_plies: usize) {
        for difficulty in [Difficulty::Easy, Difficulty::Medium, Difficulty::Hard] {
            game.reset();
            play_out_with_bots(game, difficulty, max_plies);
        }
        game.reset();
    }

    /// Once the game is over every further move is rejected.
    pub fn contract_finished_game_rejects_moves(game: &mut dyn TurnBasedGame) {
        assert!(game.outcome().is_some(), "game must be over for this check");
        assert_eq!(game.turn(), None);
        let before = game.serialize_state();
        for seat in Seat::ALL {
            assert_eq!(
                game.apply_move(seat, &serde_json::json!(0)).unwrap_err(),
                MoveError::GameAlreadyFinished
            );
        }
        assert_eq!(before, game.serialize_state());
        assert!(game.bot_move(Difficulty::Easy, &BotSettings::default()).is_none());
    }
}
