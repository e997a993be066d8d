use std::time::{Duration, Instant};

use uuid::Uuid;

use clash_core::error::SessionError;
use clash_core::game_registry::GameKind;
use clash_core::game_trait::{AppliedMove, Difficulty, EndReason, GameOutcome, TurnBasedGame};
use clash_core::net::messages::{
    GameMoveMsg, GameOverMsg, GameStateMsg, RoomAssignmentMsg, SeatInfo, SeatNoticeMsg,
    ServerEvent,
};
use clash_core::player::{ConnectionId, Identity, Seat, UserId};
use clash_core::room::RoomStatus;

use crate::presence::Outbound;

/// Envelope fields of a move broadcast that game details may not override.
const RESERVED_MOVE_FIELDS: [&str; 6] = ["roomCode", "player", "notation", "ply", "turn", "status"];

/// Snapshot fields that grow with the game. Move broadcasts leave them out;
/// `roomState` carries the full view.
const CUMULATIVE_SNAPSHOT_FIELDS: [&str; 1] = ["history"];

/// Who holds a seat.
#[derive(Debug, Clone)]
pub struct SeatHolder {
    pub user_id: Option<UserId>,
    pub username: Option<String>,
    /// The connection bound to this seat; `None` while disconnected.
    pub connection: Option<ConnectionId>,
    /// Lets an anonymous holder re-attach from a new connection.
    pub session_token: String,
    pub is_bot: bool,
    pub disconnected_at: Option<Instant>,
}

impl SeatHolder {
    fn human(identity: &Identity, connection: ConnectionId) -> Self {
        Self {
            user_id: identity.user_id.clone(),
            username: identity.username.clone(),
            connection: Some(connection),
            session_token: Uuid::new_v4().to_string(),
            is_bot: false,
            disconnected_at: None,
        }
    }

    fn bot(difficulty: Difficulty) -> Self {
        let level = match difficulty {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        };
        Self {
            user_id: None,
            username: Some(format!("Bot ({level})")),
            connection: None,
            session_token: Uuid::new_v4().to_string(),
            is_bot: true,
            disconnected_at: None,
        }
    }

    /// Bots are always present; humans while a connection is bound.
    pub fn is_present(&self) -> bool {
        self.is_bot || self.connection.is_some()
    }

    /// Absent for at least `grace` as of `now`.
    fn absent_for(&self, now: Instant, grace: Duration) -> bool {
        !self.is_present()
            && self
                .disconnected_at
                .is_some_and(|t| now.saturating_duration_since(t) >= grace)
    }

    fn display_name(&self) -> Option<String> {
        self.username
            .clone()
            .or_else(|| self.user_id.as_ref().map(UserId::to_string))
    }
}

/// Which room-assignment event a newly seated participant receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assignment {
    Created,
    Joined,
    RandomMatch,
    BotGame,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub disconnect_grace: Duration,
    /// Swap seats on reset so the other participant moves first.
    pub alternate_first_mover: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            disconnect_grace: Duration::from_secs(30),
            alternate_first_mover: true,
        }
    }
}

/// Side effects of a room operation.
///
/// `outbound` must be handed to the registry before the room lock is
/// released so every participant observes events in state order. The other
/// fields ask the caller to schedule work that must not run under the lock.
#[derive(Debug, Default)]
pub struct Effects {
    pub outbound: Vec<Outbound>,
    /// The bot is on move; carries the epoch the search is valid for.
    pub bot_turn: Option<u64>,
    /// Forfeit `seat` at the deadline unless it has come back by then.
    pub grace_timer: Option<(Seat, Instant)>,
    /// Nobody is left to play; drop the room.
    pub evict: bool,
}

impl Effects {
    /// Append the effects of a later operation on the same room.
    pub fn merge(&mut self, later: Effects) {
        self.outbound.extend(later.outbound);
        if later.bot_turn.is_some() {
            self.bot_turn = later.bot_turn;
        }
        if later.grace_timer.is_some() {
            self.grace_timer = later.grace_timer;
        }
        self.evict |= later.evict;
    }
}

/// A bot search request, detached from the room so it can run off the lock.
pub struct BotJob {
    pub game: Box<dyn TurnBasedGame>,
    pub difficulty: Difficulty,
    pub epoch: u64,
}

/// One two-seat room: seating, lifecycle, turn enforcement and delivery
/// decisions. Purely synchronous; callers serialize access with a lock.
pub struct RoomSession {
    code: String,
    kind: GameKind,
    status: RoomStatus,
    seats: [Option<SeatHolder>; 2],
    game: Box<dyn TurnBasedGame>,
    /// Final result, including resignations and forfeits the game itself
    /// does not know about.
    outcome: Option<GameOutcome>,
    bot_difficulty: Option<Difficulty>,
    /// Bumped on every state change. Timers and bot searches compare it to
    /// detect that the room moved on without them.
    epoch: u64,
    settings: SessionSettings,
    last_activity: Instant,
    finished_at: Option<Instant>,
}

impl RoomSession {
    pub fn new(code: String, game: Box<dyn TurnBasedGame>, settings: SessionSettings) -> Self {
        Self {
            code,
            kind: game.kind(),
            status: RoomStatus::Waiting,
            seats: [None, None],
            game,
            outcome: None,
            bot_difficulty: None,
            epoch: 0,
            settings,
            last_activity: Instant::now(),
            finished_at: None,
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn kind(&self) -> GameKind {
        self.kind
    }

    pub fn status(&self) -> RoomStatus {
        self.status
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn outcome(&self) -> Option<GameOutcome> {
        self.outcome
    }

    pub fn holder(&self, seat: Seat) -> Option<&SeatHolder> {
        self.seats[seat.index()].as_ref()
    }

    pub fn seat_of(&self, connection: ConnectionId) -> Option<Seat> {
        Seat::ALL
            .into_iter()
            .find(|s| self.holder(*s).is_some_and(|h| h.connection == Some(connection)))
    }

    fn seat_of_user(&self, user: &UserId) -> Option<Seat> {
        Seat::ALL
            .into_iter()
            .find(|s| self.holder(*s).is_some_and(|h| h.user_id.as_ref() == Some(user)))
    }

    fn seat_of_token(&self, token: &str) -> Option<Seat> {
        Seat::ALL
            .into_iter()
            .find(|s| self.holder(*s).is_some_and(|h| !h.is_bot && h.session_token == token))
    }

    pub fn occupied(&self) -> usize {
        self.seats.iter().flatten().count()
    }

    fn has_bot(&self) -> bool {
        self.seats.iter().flatten().any(|h| h.is_bot)
    }

    /// At least one human seat has a live connection.
    pub fn has_present_human(&self) -> bool {
        self.seats
            .iter()
            .flatten()
            .any(|h| !h.is_bot && h.connection.is_some())
    }

    /// Whether the sweeper may drop this room at `now`.
    pub fn is_expired(&self, now: Instant, idle_timeout: Duration, retention: Duration) -> bool {
        match self.status {
            RoomStatus::Waiting => {
                !self.has_present_human()
                    || now.saturating_duration_since(self.last_activity) >= idle_timeout
            },
            RoomStatus::Finished => {
                !self.has_present_human()
                    || self
                        .finished_at
                        .is_some_and(|t| now.saturating_duration_since(t) >= retention)
            },
            RoomStatus::Active => {
                (!self.has_present_human() && !self.has_bot())
                    || self.seats.iter().flatten().any(|h| {
                        h.absent_for(now, self.settings.disconnect_grace + retention)
                    })
            },
        }
    }

    fn touch(&mut self) {
        self.epoch += 1;
        self.last_activity = Instant::now();
    }

    fn label(&self, seat: Seat) -> String {
        self.kind.seat_label(seat).to_string()
    }

    fn to_seat(&self, seat: Seat, event: ServerEvent) -> Option<Outbound> {
        let connection = self.holder(seat)?.connection?;
        Some(Outbound::connection(connection, event))
    }

    fn broadcast(&self, out: &mut Vec<Outbound>, event: &ServerEvent) {
        for seat in Seat::ALL {
            if let Some(o) = self.to_seat(seat, event.clone()) {
                out.push(o);
            }
        }
    }

    fn notice(&self, seat: Seat, message: String, grace_secs: Option<u64>) -> SeatNoticeMsg {
        SeatNoticeMsg {
            room_code: self.code.clone(),
            player: self.label(seat),
            message,
            grace_secs,
        }
    }

    /// Full view of the room.
    pub fn state_msg(&self) -> GameStateMsg {
        let players = Seat::ALL
            .into_iter()
            .filter_map(|seat| {
                self.holder(seat).map(|h| SeatInfo {
                    seat,
                    label: self.label(seat),
                    user_id: h.user_id.clone(),
                    username: h.username.clone(),
                    connected: h.is_present(),
                    is_bot: h.is_bot,
                })
            })
            .collect();
        GameStateMsg {
            room_code: self.code.clone(),
            game_type: self.kind,
            status: self.status,
            turn: match self.status {
                RoomStatus::Active => self.game.turn().map(|s| self.label(s)),
                _ => None,
            },
            ply: self.game.move_count(),
            players,
            outcome: self.outcome,
            state: self.game.snapshot(),
        }
    }

    fn assignment(&self, seat: Seat, notice: Assignment) -> Option<ServerEvent> {
        let holder = self.holder(seat)?;
        let msg = RoomAssignmentMsg {
            room_code: self.code.clone(),
            game_type: self.kind,
            seat,
            color: self.label(seat),
            session_token: holder.session_token.clone(),
            opponent: self.holder(seat.other()).and_then(SeatHolder::display_name),
            difficulty: self.bot_difficulty,
        };
        Some(match notice {
            Assignment::Created => ServerEvent::RoomCreated(msg),
            Assignment::Joined => ServerEvent::RoomJoined(msg),
            Assignment::RandomMatch => ServerEvent::RandomMatchFound(msg),
            Assignment::BotGame => ServerEvent::BotGameStarted(msg),
        })
    }

    /// Put a bot in `seat`. Done before the human joins so the start
    /// sequence runs once both seats are filled.
    pub fn seat_bot(&mut self, seat: Seat, difficulty: Difficulty) -> Result<(), SessionError> {
        if self.seats[seat.index()].is_some() {
            return Err(SessionError::RoomFull);
        }
        self.seats[seat.index()] = Some(SeatHolder::bot(difficulty));
        self.bot_difficulty = Some(difficulty);
        Ok(())
    }

    /// Seat a participant. A user (or connection) that already holds a seat
    /// is re-bound to it instead.
    pub fn join(
        &mut self,
        identity: &Identity,
        connection: ConnectionId,
        notice: Assignment,
    ) -> Result<(Seat, Effects), SessionError> {
        let existing = identity
            .user_id
            .as_ref()
            .and_then(|u| self.seat_of_user(u))
            .or_else(|| self.seat_of(connection));
        if let Some(seat) = existing {
            return Ok((seat, self.rebind(seat, connection, identity, Some(notice))));
        }

        let seat = Seat::ALL
            .into_iter()
            .find(|s| self.seats[s.index()].is_none())
            .ok_or(SessionError::RoomFull)?;
        self.seats[seat.index()] = Some(SeatHolder::human(identity, connection));
        self.touch();

        let mut fx = Effects::default();
        if let Some(event) = self.assignment(seat, notice) {
            fx.outbound.push(Outbound::connection(connection, event));
        }
        fx.outbound.push(Outbound::connection(
            connection,
            ServerEvent::seat_assignment(self.kind, &self.code, seat),
        ));
        if self.occupied() == 2 {
            self.start(&mut fx);
        }
        Ok((seat, fx))
    }

    /// Attach a connection to the seat owned by the same user, or by the
    /// holder of `token`. Falls back to a plain join when neither matches.
    pub fn rejoin(
        &mut self,
        identity: &Identity,
        connection: ConnectionId,
        token: Option<&str>,
    ) -> Result<(Seat, Effects), SessionError> {
        let seat = identity
            .user_id
            .as_ref()
            .and_then(|u| self.seat_of_user(u))
            .or_else(|| token.and_then(|t| self.seat_of_token(t)))
            .or_else(|| self.seat_of(connection));
        match seat {
            Some(seat) => Ok((seat, self.rebind(seat, connection, identity, None))),
            None => self.join(identity, connection, Assignment::Joined),
        }
    }

    fn rebind(
        &mut self,
        seat: Seat,
        connection: ConnectionId,
        identity: &Identity,
        notice: Option<Assignment>,
    ) -> Effects {
        let mut was_absent = false;
        if let Some(holder) = self.seats[seat.index()].as_mut() {
            was_absent = holder.connection.is_none();
            holder.connection = Some(connection);
            holder.disconnected_at = None;
            if holder.user_id.is_none() {
                holder.user_id = identity.user_id.clone();
            }
            if identity.username.is_some() {
                holder.username = identity.username.clone();
            }
        }
        self.touch();

        let mut fx = Effects::default();
        if let Some(event) = notice.and_then(|n| self.assignment(seat, n)) {
            fx.outbound.push(Outbound::connection(connection, event));
        }
        fx.outbound.push(Outbound::connection(
            connection,
            ServerEvent::seat_assignment(self.kind, &self.code, seat),
        ));
        fx.outbound.push(Outbound::connection(
            connection,
            ServerEvent::RoomState(self.state_msg()),
        ));
        if was_absent {
            let notice = self.notice(seat, format!("{} reconnected", self.label(seat)), None);
            if let Some(o) = self.to_seat(seat.other(), ServerEvent::PlayerReconnected(notice)) {
                fx.outbound.push(o);
            }
        }
        self.schedule_bot(&mut fx);
        fx
    }

    fn start(&mut self, fx: &mut Effects) {
        self.game.reset();
        self.outcome = None;
        self.finished_at = None;
        self.status = RoomStatus::Active;
        self.touch();
        let event = ServerEvent::StartGame(self.state_msg());
        self.broadcast(&mut fx.outbound, &event);
        self.schedule_bot(fx);
    }

    fn schedule_bot(&self, fx: &mut Effects) {
        if self.status == RoomStatus::Active
            && let Some(seat) = self.game.turn()
            && self.holder(seat).is_some_and(|h| h.is_bot)
        {
            fx.bot_turn = Some(self.epoch);
        }
    }

    fn finish(&mut self, outcome: GameOutcome, fx: &mut Effects) {
        self.outcome = Some(outcome);
        self.status = RoomStatus::Finished;
        self.finished_at = Some(Instant::now());
        self.touch();
        let event = ServerEvent::GameOver(GameOverMsg {
            room_code: self.code.clone(),
            outcome,
            winner: outcome.winner.map(|s| self.label(s)),
        });
        self.broadcast(&mut fx.outbound, &event);
    }

    fn move_msg(&self, applied: &AppliedMove) -> GameMoveMsg {
        let mut details = serde_json::Map::new();
        if let serde_json::Value::Object(snapshot) = self.game.snapshot() {
            details.extend(snapshot);
        }
        if let serde_json::Value::Object(descriptor) = &applied.descriptor {
            details.extend(descriptor.clone());
        }
        details.retain(|k, _| {
            !RESERVED_MOVE_FIELDS.contains(&k.as_str())
                && !CUMULATIVE_SNAPSHOT_FIELDS.contains(&k.as_str())
        });
        GameMoveMsg {
            room_code: self.code.clone(),
            player: self.label(applied.seat),
            notation: applied.notation.clone(),
            ply: self.game.move_count(),
            turn: self.game.turn().map(|s| self.label(s)),
            status: if self.game.outcome().is_some() {
                RoomStatus::Finished
            } else {
                RoomStatus::Active
            },
            details,
        }
    }

    fn play(
        &mut self,
        seat: Seat,
        descriptor: &serde_json::Value,
    ) -> Result<Effects, SessionError> {
        match self.status {
            RoomStatus::Waiting => return Err(SessionError::RoomNotActive),
            RoomStatus::Finished => return Err(SessionError::GameAlreadyFinished),
            RoomStatus::Active => {},
        }
        if self.game.turn() != Some(seat) {
            return Err(SessionError::NotYourTurn);
        }
        if !self
            .holder(seat.other())
            .is_some_and(SeatHolder::is_present)
        {
            return Err(SessionError::OpponentDisconnected);
        }

        let applied = self.game.apply_move(seat, descriptor)?;
        self.touch();

        let mut fx = Effects::default();
        let event = ServerEvent::game_move(self.kind, self.move_msg(&applied));
        self.broadcast(&mut fx.outbound, &event);
        match self.game.outcome() {
            Some(outcome) => self.finish(outcome, &mut fx),
            None => self.schedule_bot(&mut fx),
        }
        Ok(fx)
    }

    /// Validate and apply a move from the participant on `connection`.
    pub fn apply_move(
        &mut self,
        connection: ConnectionId,
        descriptor: &serde_json::Value,
    ) -> Result<Effects, SessionError> {
        let seat = self.seat_of(connection).ok_or(SessionError::NotInRoom)?;
        self.play(seat, descriptor)
    }

    /// Snapshot the game for a bot search, if the bot is still on move at
    /// `epoch`.
    pub fn bot_job(&self, epoch: u64) -> Option<BotJob> {
        if epoch != self.epoch || self.status != RoomStatus::Active {
            return None;
        }
        let seat = self.game.turn()?;
        if !self.holder(seat)?.is_bot {
            return None;
        }
        Some(BotJob {
            game: self.game.clone_box(),
            difficulty: self.bot_difficulty.unwrap_or_default(),
            epoch,
        })
    }

    /// Apply a bot's move computed at `epoch`. Stale results are discarded.
    pub fn apply_bot_move(
        &mut self,
        epoch: u64,
        descriptor: &serde_json::Value,
    ) -> Result<Effects, SessionError> {
        if epoch != self.epoch || self.status != RoomStatus::Active {
            return Ok(Effects::default());
        }
        let Some(seat) = self.game.turn() else {
            return Ok(Effects::default());
        };
        if !self.holder(seat).is_some_and(|h| h.is_bot) {
            return Ok(Effects::default());
        }
        self.play(seat, descriptor)
    }

    /// Restart a finished game. Seats swap first when alternation is on.
    pub fn reset(&mut self, connection: ConnectionId) -> Result<Effects, SessionError> {
        let seat = self.seat_of(connection).ok_or(SessionError::NotInRoom)?;
        match self.status {
            RoomStatus::Waiting => return Err(SessionError::RoomNotActive),
            RoomStatus::Active => return Err(SessionError::GameNotFinished),
            RoomStatus::Finished => {},
        }
        if !self
            .holder(seat.other())
            .is_some_and(SeatHolder::is_present)
        {
            return Err(SessionError::OpponentDisconnected);
        }

        if self.settings.alternate_first_mover {
            self.seats.swap(0, 1);
        }
        self.game.reset();
        self.outcome = None;
        self.finished_at = None;
        self.status = RoomStatus::Active;
        self.touch();

        let mut fx = Effects::default();
        let state = self.state_msg();
        for seat in Seat::ALL {
            let assign = ServerEvent::seat_assignment(self.kind, &self.code, seat);
            if let Some(o) = self.to_seat(seat, assign) {
                fx.outbound.push(o);
            }
            if let Some(o) = self.to_seat(seat, ServerEvent::ResetGame(state.clone())) {
                fx.outbound.push(o);
            }
        }
        self.schedule_bot(&mut fx);
        Ok(fx)
    }

    /// Concede an active game.
    pub fn resign(&mut self, connection: ConnectionId) -> Result<Effects, SessionError> {
        let seat = self.seat_of(connection).ok_or(SessionError::NotInRoom)?;
        match self.status {
            RoomStatus::Waiting => return Err(SessionError::RoomNotActive),
            RoomStatus::Finished => return Err(SessionError::GameAlreadyFinished),
            RoomStatus::Active => {},
        }
        let mut fx = Effects::default();
        self.finish(
            GameOutcome::win(seat.other(), EndReason::Resignation),
            &mut fx,
        );
        Ok(fx)
    }

    /// Give up the seat. An active game is forfeited; a remaining human
    /// takes the first seat and goes back to waiting for a new opponent.
    pub fn leave(&mut self, connection: ConnectionId) -> Result<Effects, SessionError> {
        let seat = self.seat_of(connection).ok_or(SessionError::NotInRoom)?;
        let mut fx = Effects::default();
        if self.status == RoomStatus::Active {
            self.finish(GameOutcome::win(seat.other(), EndReason::Forfeit), &mut fx);
        }
        self.seats[seat.index()] = None;
        self.touch();

        let notice = self.notice(seat, format!("{} left the room", self.label(seat)), None);
        if let Some(o) = self.to_seat(seat.other(), ServerEvent::PlayerLeft(notice)) {
            fx.outbound.push(o);
        }

        if !self.has_present_human() {
            fx.evict = true;
            return Ok(fx);
        }
        self.game.reset();
        self.outcome = None;
        self.finished_at = None;
        self.status = RoomStatus::Waiting;
        if seat == Seat::First {
            self.seats.swap(0, 1);
            let assign = ServerEvent::seat_assignment(self.kind, &self.code, Seat::First);
            if let Some(o) = self.to_seat(Seat::First, assign) {
                fx.outbound.push(o);
            }
        }
        Ok(fx)
    }

    /// The connection dropped. Starts the grace period in an active game;
    /// asks for eviction once nobody can come back to play.
    pub fn disconnect(&mut self, connection: ConnectionId) -> Effects {
        let mut fx = Effects::default();
        let Some(seat) = self.seat_of(connection) else {
            return fx;
        };
        let now = Instant::now();
        if let Some(holder) = self.seats[seat.index()].as_mut() {
            holder.connection = None;
            holder.disconnected_at = Some(now);
        }
        self.touch();

        let active = self.status == RoomStatus::Active;
        if !self.has_present_human() && !(active && self.has_bot()) {
            fx.evict = true;
            return fx;
        }

        if !active {
            let notice = self.notice(seat, format!("{} disconnected", self.label(seat)), None);
            if let Some(o) = self.to_seat(seat.other(), ServerEvent::PlayerDisconnected(notice)) {
                fx.outbound.push(o);
            }
            return fx;
        }

        if self.settings.disconnect_grace.is_zero() {
            self.finish(GameOutcome::win(seat.other(), EndReason::Forfeit), &mut fx);
            if !self.has_present_human() {
                fx.evict = true;
            }
            return fx;
        }

        let grace_secs = self.settings.disconnect_grace.as_secs();
        let notice = self.notice(
            seat,
            format!("{} disconnected", self.label(seat)),
            Some(grace_secs),
        );
        if let Some(o) = self.to_seat(seat.other(), ServerEvent::PlayerDisconnected(notice)) {
            fx.outbound.push(o);
        }
        fx.grace_timer = Some((seat, now + self.settings.disconnect_grace));
        fx
    }

    /// A grace timer for `seat` fired at `now`. Forfeits only if the seat has
    /// been absent for the whole grace period; a seat that came back, or
    /// dropped again later, is left alone.
    pub fn forfeit_expired(&mut self, seat: Seat, now: Instant) -> Effects {
        let mut fx = Effects::default();
        let grace = self.settings.disconnect_grace;
        if self.status != RoomStatus::Active
            || !self.holder(seat).is_some_and(|h| h.absent_for(now, grace))
        {
            return fx;
        }
        self.finish(GameOutcome::win(seat.other(), EndReason::Forfeit), &mut fx);
        if !self.has_present_human() {
            fx.evict = true;
        }
        fx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::games::ServerGameRegistry;
    use crate::presence::Recipient;
    use clash_core::net::protocol;
    use serde_json::json;

    const A: ConnectionId = ConnectionId(1);
    const B: ConnectionId = ConnectionId(2);

    fn room(kind: GameKind) -> RoomSession {
        room_with(kind, SessionSettings::default())
    }

    fn room_with(kind: GameKind, settings: SessionSettings) -> RoomSession {
        let game = ServerGameRegistry::new().create(kind).unwrap();
        RoomSession::new("AB2C".to_string(), game, settings)
    }

    fn user(name: &str) -> Identity {
        Identity::user(UserId::new(name), Some(name.to_uppercase()))
    }

    fn seated(kind: GameKind) -> RoomSession {
        let mut r = room(kind);
        r.join(&user("alice"), A, Assignment::Created).unwrap();
        r.join(&user("bob"), B, Assignment::Joined).unwrap();
        r
    }

    fn events_for(fx: &Effects, id: ConnectionId) -> Vec<&ServerEvent> {
        fx.outbound
            .iter()
            .filter(|o| o.to == Recipient::Connection(id))
            .map(|o| &o.event)
            .collect()
    }

    #[test]
    fn second_join_starts_game() {
        let mut r = room(GameKind::TicTacToe);
        let (seat, fx) = r.join(&user("alice"), A, Assignment::Created).unwrap();
        assert_eq!(seat, Seat::First);
        assert_eq!(r.status(), RoomStatus::Waiting);
        let events = events_for(&fx, A);
        assert!(matches!(events[0], ServerEvent::RoomCreated(m) if m.color == "X"));
        assert!(matches!(events[1], ServerEvent::AssignSymbol(m) if m.symbol == "X"));

        let (seat, fx) = r.join(&user("bob"), B, Assignment::Joined).unwrap();
        assert_eq!(seat, Seat::Second);
        assert_eq!(r.status(), RoomStatus::Active);
        let events = events_for(&fx, B);
        assert!(matches!(
            events[0],
            ServerEvent::RoomJoined(m) if m.opponent.as_deref() == Some("ALICE")
        ));
        assert!(matches!(events[1], ServerEvent::AssignSymbol(m) if m.symbol == "O"));
        assert!(matches!(events[2], ServerEvent::StartGame(_)));
        assert!(matches!(events_for(&fx, A)[0], ServerEvent::StartGame(_)));
    }

    #[test]
    fn third_participant_is_rejected() {
        let mut r = seated(GameKind::Chess);
        let err = r
            .join(&user("carol"), ConnectionId(3), Assignment::Joined)
            .unwrap_err();
        assert_eq!(err, SessionError::RoomFull);
    }

    #[test]
    fn same_user_rejoining_keeps_seat() {
        let mut r = seated(GameKind::Chess);
        let (seat, fx) = r
            .join(&user("alice"), ConnectionId(9), Assignment::Joined)
            .unwrap();
        assert_eq!(seat, Seat::First);
        assert_eq!(r.seat_of(ConnectionId(9)), Some(Seat::First));
        assert_eq!(r.seat_of(A), None);
        assert!(
            events_for(&fx, ConnectionId(9))
                .iter()
                .any(|e| matches!(e, ServerEvent::RoomState(_)))
        );
    }

    #[test]
    fn moves_are_broadcast_in_order() {
        let mut r = seated(GameKind::TicTacToe);
        let fx = r.apply_move(A, &json!(4)).unwrap();
        for id in [A, B] {
            match events_for(&fx, id)[0] {
                ServerEvent::TicTacToeMove(m) => {
                    assert_eq!(m.player, "X");
                    assert_eq!(m.details["index"], 4);
                    assert_eq!(m.turn.as_deref(), Some("O"));
                    assert_eq!(m.ply, 1);
                },
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(r.apply_move(A, &json!(0)).unwrap_err(), SessionError::NotYourTurn);
        r.apply_move(B, &json!(0)).unwrap();
    }

    #[test]
    fn rejected_move_leaves_state_unchanged() {
        let mut r = seated(GameKind::Chess);
        let before = r.state_msg();
        assert_eq!(r.apply_move(B, &json!("e5")).unwrap_err(), SessionError::NotYourTurn);
        assert!(matches!(
            r.apply_move(A, &json!("Ke2")),
            Err(SessionError::IllegalMove(_))
        ));
        assert_eq!(r.state_msg(), before);
        assert_eq!(
            r.apply_move(ConnectionId(7), &json!("e4")).unwrap_err(),
            SessionError::NotInRoom
        );
    }

    #[test]
    fn move_in_waiting_room_is_rejected() {
        let mut r = room(GameKind::TicTacToe);
        r.join(&user("alice"), A, Assignment::Created).unwrap();
        assert_eq!(r.apply_move(A, &json!(0)).unwrap_err(), SessionError::RoomNotActive);
    }

    fn win_for_x(r: &mut RoomSession) -> Effects {
        r.apply_move(A, &json!(0)).unwrap();
        r.apply_move(B, &json!(3)).unwrap();
        r.apply_move(A, &json!(1)).unwrap();
        r.apply_move(B, &json!(4)).unwrap();
        r.apply_move(A, &json!(2)).unwrap()
    }

    #[test]
    fn winning_move_finishes_room() {
        let mut r = seated(GameKind::TicTacToe);
        let fx = win_for_x(&mut r);
        assert_eq!(r.status(), RoomStatus::Finished);
        let events = events_for(&fx, B);
        assert!(matches!(
            events[0],
            ServerEvent::TicTacToeMove(m) if m.status == RoomStatus::Finished
        ));
        match events[1] {
            ServerEvent::GameOver(over) => {
                assert_eq!(over.winner.as_deref(), Some("X"));
                assert_eq!(over.outcome.reason, EndReason::ThreeInARow);
            },
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            r.apply_move(B, &json!(8)).unwrap_err(),
            SessionError::GameAlreadyFinished
        );
    }

    #[test]
    fn reset_swaps_seats_and_restarts() {
        let mut r = seated(GameKind::TicTacToe);
        assert_eq!(r.reset(A).unwrap_err(), SessionError::GameNotFinished);
        win_for_x(&mut r);

        let fx = r.reset(B).unwrap();
        assert_eq!(r.status(), RoomStatus::Active);
        assert_eq!(r.seat_of(B), Some(Seat::First));
        assert_eq!(r.seat_of(A), Some(Seat::Second));
        let events = events_for(&fx, B);
        assert!(matches!(events[0], ServerEvent::AssignSymbol(m) if m.symbol == "X"));
        assert!(matches!(events[1], ServerEvent::ResetGame(s) if s.ply == 0));
        r.apply_move(B, &json!(4)).unwrap();
    }

    #[test]
    fn reset_without_alternation_keeps_seats() {
        let mut r = room_with(
            GameKind::TicTacToe,
            SessionSettings {
                alternate_first_mover: false,
                ..SessionSettings::default()
            },
        );
        r.join(&user("alice"), A, Assignment::Created).unwrap();
        r.join(&user("bob"), B, Assignment::Joined).unwrap();
        win_for_x(&mut r);
        r.reset(A).unwrap();
        assert_eq!(r.seat_of(A), Some(Seat::First));
    }

    #[test]
    fn resign_awards_the_opponent() {
        let mut r = seated(GameKind::Chess);
        let fx = r.resign(B).unwrap();
        let outcome = r.outcome().unwrap();
        assert_eq!(outcome.winner, Some(Seat::First));
        assert_eq!(outcome.reason, EndReason::Resignation);
        assert!(matches!(
            events_for(&fx, A)[0],
            ServerEvent::GameOver(m) if m.winner.as_deref() == Some("white")
        ));
        assert_eq!(r.resign(A).unwrap_err(), SessionError::GameAlreadyFinished);
    }

    #[test]
    fn leave_forfeits_and_returns_to_waiting() {
        let mut r = seated(GameKind::TicTacToe);
        r.apply_move(A, &json!(4)).unwrap();
        let fx = r.leave(A).unwrap();
        assert!(!fx.evict);
        assert_eq!(r.status(), RoomStatus::Waiting);
        assert_eq!(r.occupied(), 1);
        let events = events_for(&fx, B);
        assert!(matches!(
            events[0],
            ServerEvent::GameOver(m) if m.outcome.reason == EndReason::Forfeit
        ));
        assert!(matches!(events[1], ServerEvent::PlayerLeft(_)));
        assert!(matches!(events[2], ServerEvent::AssignSymbol(m) if m.symbol == "X"));
        assert_eq!(r.seat_of(B), Some(Seat::First));

        let (seat, _) = r
            .join(&user("carol"), ConnectionId(3), Assignment::Joined)
            .unwrap();
        assert_eq!(seat, Seat::Second);
        assert_eq!(r.status(), RoomStatus::Active);
        r.apply_move(B, &json!(0)).unwrap();
    }

    #[test]
    fn second_seat_leaving_keeps_creator_first() {
        let mut r = seated(GameKind::Chess);
        let fx = r.leave(B).unwrap();
        assert_eq!(r.seat_of(A), Some(Seat::First));
        assert!(
            !events_for(&fx, A)
                .iter()
                .any(|e| matches!(e, ServerEvent::AssignColor(_)))
        );
    }

    #[test]
    fn last_leaver_evicts() {
        let mut r = room(GameKind::Chess);
        r.join(&user("alice"), A, Assignment::Created).unwrap();
        assert!(r.leave(A).unwrap().evict);
    }

    #[test]
    fn disconnect_starts_grace_and_blocks_moves() {
        let mut r = seated(GameKind::Chess);
        let fx = r.disconnect(B);
        let (seat, deadline) = fx.grace_timer.unwrap();
        assert_eq!(seat, Seat::Second);
        assert!(matches!(
            events_for(&fx, A)[0],
            ServerEvent::PlayerDisconnected(m) if m.grace_secs == Some(30)
        ));
        assert_eq!(
            r.apply_move(A, &json!("e4")).unwrap_err(),
            SessionError::OpponentDisconnected
        );

        let fx = r.forfeit_expired(seat, deadline - Duration::from_secs(1));
        assert!(fx.outbound.is_empty());
        assert_eq!(r.status(), RoomStatus::Active);

        let fx = r.forfeit_expired(seat, deadline);
        assert!(!fx.evict);
        assert_eq!(r.status(), RoomStatus::Finished);
        assert_eq!(r.outcome().unwrap().reason, EndReason::Forfeit);
        assert_eq!(r.outcome().unwrap().winner, Some(Seat::First));
    }

    #[test]
    fn rejoin_within_grace_cancels_forfeit() {
        let mut r = seated(GameKind::TicTacToe);
        r.apply_move(A, &json!(4)).unwrap();
        let (seat, deadline) = r.disconnect(B).grace_timer.unwrap();
        let (rejoined, fx) = r.rejoin(&user("bob"), ConnectionId(5), None).unwrap();
        assert_eq!(rejoined, Seat::Second);
        assert!(matches!(events_for(&fx, A)[0], ServerEvent::PlayerReconnected(_)));
        match events_for(&fx, ConnectionId(5))[1] {
            ServerEvent::RoomState(state) => assert_eq!(state.ply, 1),
            other => panic!("unexpected {other:?}"),
        }

        let fx = r.forfeit_expired(seat, deadline);
        assert!(fx.outbound.is_empty());
        assert_eq!(r.status(), RoomStatus::Active);
        r.apply_move(ConnectionId(5), &json!(0)).unwrap();
    }

    #[test]
    fn present_player_reattaching_keeps_forfeit_armed() {
        let mut r = seated(GameKind::TicTacToe);
        r.apply_move(A, &json!(4)).unwrap();
        let (seat, deadline) = r.disconnect(B).grace_timer.unwrap();

        // Alice opens the game page on a new connection during the grace period.
        let (rejoined, _) = r.rejoin(&user("alice"), ConnectionId(9), None).unwrap();
        assert_eq!(rejoined, Seat::First);
        r.join(&user("alice"), ConnectionId(10), Assignment::Joined)
            .unwrap();

        let fx = r.forfeit_expired(seat, deadline);
        assert_eq!(r.status(), RoomStatus::Finished);
        assert_eq!(r.outcome().unwrap().winner, Some(Seat::First));
        assert!(matches!(
            events_for(&fx, ConnectionId(10))[0],
            ServerEvent::GameOver(m) if m.outcome.reason == EndReason::Forfeit
        ));
    }

    #[test]
    fn earlier_timer_ignores_a_later_disconnect() {
        let mut r = seated(GameKind::Chess);
        let (seat, first_deadline) = r.disconnect(B).grace_timer.unwrap();
        r.rejoin(&user("bob"), ConnectionId(5), None).unwrap();
        r.apply_move(A, &json!("e4")).unwrap();
        let (_, second_deadline) = r.disconnect(ConnectionId(5)).grace_timer.unwrap();

        assert!(second_deadline >= first_deadline);
        let grace = SessionSettings::default().disconnect_grace;
        r.forfeit_expired(seat, second_deadline - grace);
        assert_eq!(r.status(), RoomStatus::Active);
        r.forfeit_expired(seat, second_deadline);
        assert_eq!(r.status(), RoomStatus::Finished);
    }

    #[test]
    fn anonymous_rejoin_uses_session_token() {
        let mut r = room(GameKind::TicTacToe);
        let (_, fx) = r
            .join(&Identity::anonymous(), A, Assignment::Created)
            .unwrap();
        let token = match events_for(&fx, A)[0] {
            ServerEvent::RoomCreated(m) => m.session_token.clone(),
            other => panic!("unexpected {other:?}"),
        };
        r.join(&Identity::anonymous(), B, Assignment::Joined).unwrap();
        r.disconnect(A);

        let (seat, _) = r
            .rejoin(&Identity::anonymous(), ConnectionId(8), Some(&token))
            .unwrap();
        assert_eq!(seat, Seat::First);
        assert!(r.holder(Seat::First).unwrap().is_present());
    }

    #[test]
    fn both_gone_evicts_silently() {
        let mut r = seated(GameKind::Chess);
        assert!(!r.disconnect(A).evict);
        let fx = r.disconnect(B);
        assert!(fx.evict);
        assert!(fx.outbound.is_empty());
    }

    #[test]
    fn zero_grace_forfeits_immediately() {
        let mut r = room_with(
            GameKind::TicTacToe,
            SessionSettings {
                disconnect_grace: Duration::ZERO,
                ..SessionSettings::default()
            },
        );
        r.join(&user("alice"), A, Assignment::Created).unwrap();
        r.join(&user("bob"), B, Assignment::Joined).unwrap();
        let fx = r.disconnect(A);
        assert!(fx.grace_timer.is_none());
        assert_eq!(r.outcome().unwrap().winner, Some(Seat::Second));
    }

    #[test]
    fn bot_moves_only_at_current_epoch() {
        let mut r = room(GameKind::TicTacToe);
        r.seat_bot(Seat::Second, Difficulty::Easy).unwrap();
        let (_, fx) = r.join(&user("alice"), A, Assignment::BotGame).unwrap();
        assert!(fx.bot_turn.is_none());
        assert!(matches!(
            events_for(&fx, A)[0],
            ServerEvent::BotGameStarted(m) if m.difficulty == Some(Difficulty::Easy)
        ));

        let fx = r.apply_move(A, &json!(4)).unwrap();
        let epoch = fx.bot_turn.unwrap();
        let job = r.bot_job(epoch).unwrap();
        let mv = job
            .game
            .bot_move(job.difficulty, &clash_core::test_helpers::seeded_settings(1))
            .unwrap();

        assert!(r.apply_bot_move(epoch + 1, &mv).unwrap().outbound.is_empty());
        let fx = r.apply_bot_move(epoch, &mv).unwrap();
        assert!(matches!(events_for(&fx, A)[0], ServerEvent::TicTacToeMove(m) if m.player == "O"));
        assert!(r.bot_job(epoch).is_none());
    }

    #[test]
    fn bot_opens_after_swap() {
        let mut r = room(GameKind::TicTacToe);
        r.seat_bot(Seat::Second, Difficulty::Hard).unwrap();
        r.join(&user("alice"), A, Assignment::BotGame).unwrap();
        r.resign(A).unwrap();
        let fx = r.reset(A).unwrap();
        assert_eq!(r.seat_of(A), Some(Seat::Second));
        assert_eq!(fx.bot_turn, Some(r.epoch()));
    }

    #[test]
    fn expiry_rules() {
        let idle = Duration::from_secs(600);
        let retention = Duration::from_secs(120);
        let mut r = room(GameKind::TicTacToe);
        r.join(&user("alice"), A, Assignment::Created).unwrap();
        let now = Instant::now();
        assert!(!r.is_expired(now, idle, retention));
        assert!(r.is_expired(now + idle, idle, retention));

        r.join(&user("bob"), B, Assignment::Joined).unwrap();
        assert!(!r.is_expired(Instant::now() + idle * 10, idle, retention));
        r.resign(A).unwrap();
        assert!(r.is_expired(Instant::now() + retention, idle, retention));
    }

    #[test]
    fn active_room_with_long_absent_seat_expires() {
        let idle = Duration::from_secs(600);
        let retention = Duration::from_secs(120);
        let grace = SessionSettings::default().disconnect_grace;
        let mut r = seated(GameKind::TicTacToe);
        r.disconnect(B);
        let now = Instant::now();
        assert!(!r.is_expired(now, idle, retention));
        assert!(r.is_expired(now + grace + retention, idle, retention));
    }

    #[test]
    fn move_broadcast_leaves_out_history() {
        let mut r = seated(GameKind::Custom);
        let big = "x".repeat(3000);
        for i in 0..12 {
            let conn = if i % 2 == 0 { A } else { B };
            let fx = r.apply_move(conn, &json!({ "payload": big })).unwrap();
            match events_for(&fx, A)[0] {
                ServerEvent::GameMove(m) => {
                    assert_eq!(m.ply, i + 1);
                    assert!(!m.details.contains_key("history"));
                    let frame = protocol::encode_server_event(&fx.outbound[0].event).unwrap();
                    assert!(frame.len() < 2 * protocol::MAX_MESSAGE_SIZE);
                },
                other => panic!("unexpected {other:?}"),
            }
        }
        assert!(r.state_msg().state["history"].is_array());
    }
}
