use std::time::Duration;

use crate::dispatch::follow_up;
use crate::room_manager::{SharedRoom, lock_room};
use crate::session::BotJob;
use crate::state::AppState;

/// Let the bot reply in `room` once the configured delay has passed. The
/// search runs on the blocking pool against a copy of the game; its move is
/// applied only if the room is still at `epoch`.
pub fn schedule_bot_turn(state: AppState, room: SharedRoom, epoch: u64) {
    tokio::spawn(run_bot_turn(state, room, epoch));
}

async fn run_bot_turn(state: AppState, room: SharedRoom, epoch: u64) {
    let delay = Duration::from_millis(state.config.bot.move_delay_ms);
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let Some(BotJob {
        game,
        difficulty,
        epoch,
    }) = lock_room(&room).bot_job(epoch)
    else {
        tracing::debug!(epoch, "Bot turn is stale, skipping search");
        return;
    };

    let settings = state.config.bot.settings();
    let searched = tokio::task::spawn_blocking(move || game.bot_move(difficulty, &settings)).await;
    let descriptor = match searched {
        Ok(Some(descriptor)) => descriptor,
        Ok(None) => {
            tracing::debug!(epoch, "Bot found no move");
            return;
        },
        Err(e) => {
            tracing::error!(error = %e, "Bot search task failed");
            return;
        },
    };

    let applied = {
        let mut session = lock_room(&room);
        let result = session.apply_bot_move(epoch, &descriptor);
        if let Ok(fx) = &result {
            let _ = state.registry.deliver(&fx.outbound);
        }
        result
    };
    match applied {
        Ok(fx) => follow_up(&state, &room, fx),
        Err(e) => {
            tracing::warn!(error = %e, move_descriptor = %descriptor, "Bot move rejected");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use crate::config::ServerConfig;
    use crate::presence::tests::{drain, make_sender};
    use crate::session::Assignment;
    use clash_core::game_registry::GameKind;
    use clash_core::game_trait::Difficulty;
    use clash_core::net::messages::ServerEvent;
    use clash_core::player::{Identity, Seat, UserId};

    fn bot_state() -> AppState {
        let mut config = ServerConfig::default();
        config.bot.move_delay_ms = 0;
        config.bot.seed = Some(3);
        AppState::new(config)
    }

    #[tokio::test]
    async fn bot_replies_after_human_move() {
        let state = bot_state();
        let (tx, mut rx) = make_sender();
        let conn = state.registry.connect(tx);
        let game = state.games.create(GameKind::TicTacToe).unwrap();
        let (_, room) = state
            .rooms
            .write()
            .await
            .create_room(game, state.session_settings());

        let epoch = {
            let mut r = lock_room(&room);
            r.seat_bot(Seat::Second, Difficulty::Hard).unwrap();
            let identity = Identity::user(UserId::new("alice"), None);
            r.join(&identity, conn, Assignment::BotGame).unwrap();
            r.apply_move(conn, &serde_json::json!(0)).unwrap().bot_turn.unwrap()
        };
        drain(&mut rx);

        schedule_bot_turn(state.clone(), Arc::clone(&room), epoch);
        let mut replied = false;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if lock_room(&room).state_msg().ply == 2 {
                replied = true;
                break;
            }
        }
        assert!(replied, "bot never moved");
        let events = drain(&mut rx);
        assert!(
            events
                .iter()
                .any(|e| matches!(e, ServerEvent::TicTacToeMove(m) if m.player == "O"))
        );
    }

    #[tokio::test]
    async fn stale_bot_turn_is_ignored() {
        let state = bot_state();
        let (tx, _rx) = make_sender();
        let conn = state.registry.connect(tx);
        let game = state.games.create(GameKind::TicTacToe).unwrap();
        let (_, room) = state
            .rooms
            .write()
            .await
            .create_room(game, state.session_settings());
        let epoch = {
            let mut r = lock_room(&room);
            r.seat_bot(Seat::Second, Difficulty::Easy).unwrap();
            r.join(&Identity::anonymous(), conn, Assignment::BotGame).unwrap();
            let epoch = r.apply_move(conn, &serde_json::json!(4)).unwrap().bot_turn.unwrap();
            r.resign(conn).unwrap();
            epoch
        };

        run_bot_turn(state.clone(), Arc::clone(&room), epoch).await;
        assert_eq!(lock_room(&room).state_msg().ply, 1);
    }
}
