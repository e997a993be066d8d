use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use clash_core::game_registry::GameKind;
use clash_core::player::{ConnectionId, UserId};

/// A pending request to be paired with a stranger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchRequest {
    pub user_id: UserId,
    pub username: Option<String>,
    /// Where the match notice goes. Updated when the user re-queues from a
    /// newer connection.
    pub connection: ConnectionId,
    pub kind: GameKind,
    pub enqueued_at: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Waiting; 1-based position among requests for the same kind.
    Queued { position: usize },
    /// The user already had a request for this kind; nothing changed
    /// except the connection to notify.
    AlreadyQueued { position: usize },
    /// Paired with the earliest compatible request. `waiting` takes the
    /// first seat.
    Paired {
        waiting: MatchRequest,
        arriving: MatchRequest,
    },
}

/// FIFO queues of match requests, one per game kind.
///
/// Pairing happens on enqueue, so a queue never holds two requests from
/// different users at once.
#[derive(Debug, Default)]
pub struct MatchmakingQueue {
    queues: HashMap<GameKind, VecDeque<MatchRequest>>,
}

impl MatchmakingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a request or pair it with the earliest compatible one.
    /// Requests whose connection fails `is_live` are discarded on the way.
    pub fn enqueue(
        &mut self,
        request: MatchRequest,
        is_live: impl Fn(ConnectionId) -> bool,
    ) -> EnqueueOutcome {
        let queue = self.queues.entry(request.kind).or_default();

        if let Some(idx) = queue.iter().position(|r| r.user_id == request.user_id) {
            queue[idx].connection = request.connection;
            queue[idx].username = request.username;
            return EnqueueOutcome::AlreadyQueued { position: idx + 1 };
        }

        queue.retain(|r| {
            let live = is_live(r.connection);
            if !live {
                tracing::debug!(user = %r.user_id, "Dropping match request from closed connection");
            }
            live
        });

        match queue.pop_front() {
            Some(waiting) => EnqueueOutcome::Paired {
                waiting,
                arriving: request,
            },
            None => {
                queue.push_back(request);
                EnqueueOutcome::Queued {
                    position: queue.len(),
                }
            },
        }
    }

    /// Withdraw the user's requests, for one kind or all of them.
    pub fn cancel(&mut self, user: &UserId, kind: Option<GameKind>) -> Vec<MatchRequest> {
        self.take_where(|r| &r.user_id == user && kind.is_none_or(|k| r.kind == k))
    }

    /// Withdraw every request that would notify `connection`.
    pub fn cancel_connection(&mut self, connection: ConnectionId) -> Vec<MatchRequest> {
        self.take_where(|r| r.connection == connection)
    }

    /// Withdraw requests older than `ttl`.
    pub fn expire(&mut self, now: Instant, ttl: Duration) -> Vec<MatchRequest> {
        self.take_where(|r| now.saturating_duration_since(r.enqueued_at) >= ttl)
    }

    fn take_where(&mut self, pred: impl Fn(&MatchRequest) -> bool) -> Vec<MatchRequest> {
        let mut taken = Vec::new();
        for queue in self.queues.values_mut() {
            let (out, keep): (VecDeque<_>, VecDeque<_>) = queue.drain(..).partition(|r| pred(r));
            *queue = keep;
            taken.extend(out);
        }
        self.queues.retain(|_, q| !q.is_empty());
        taken
    }

    /// Total pending requests.
    pub fn len(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pending(&self, kind: GameKind) -> usize {
        self.queues.get(&kind).map_or(0, VecDeque::len)
    }
}
