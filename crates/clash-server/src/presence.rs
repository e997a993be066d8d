use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use clash_core::net::messages::{OnlineStatusMsg, ServerEvent};
use clash_core::net::protocol::{ProtocolError, encode_server_event};
use clash_core::player::{ConnectionId, Identity, UserId};

/// Outbound queue of one connection. Frames are pre-encoded JSON text shared
/// between recipients.
pub type ConnectionSender = mpsc::Sender<Arc<str>>;

/// Where an outbound event goes.
#[derive(Debug, Clone, PartialEq)]
pub enum Recipient {
    Connection(ConnectionId),
    /// Every live connection of the user.
    User(UserId),
}

/// An event produced by a state change, waiting to be handed to the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub to: Recipient,
    pub event: ServerEvent,
}

impl Outbound {
    pub fn connection(id: ConnectionId, event: ServerEvent) -> Self {
        Self {
            to: Recipient::Connection(id),
            event,
        }
    }

    pub fn user(id: UserId, event: ServerEvent) -> Self {
        Self {
            to: Recipient::User(id),
            event,
        }
    }
}

struct ConnectionEntry {
    identity: Identity,
    sender: ConnectionSender,
    connected_at: Instant,
}

#[derive(Default)]
struct Presence {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    /// Live connections per user in registration order; the last one is the
    /// canonical delivery target.
    by_user: HashMap<UserId, Vec<ConnectionId>>,
    /// Connections that asked to hear about a user's presence changes.
    watchers: HashMap<UserId, HashSet<ConnectionId>>,
}

impl Presence {
    fn notify_watchers(&self, user: &UserId, online: bool) {
        let Some(watchers) = self.watchers.get(user) else {
            return;
        };
        let event = ServerEvent::OnlineStatus(OnlineStatusMsg {
            friend_id: user.clone(),
            online,
        });
        let Ok(frame) = encode(&event) else {
            return;
        };
        for id in watchers {
            if let Some(entry) = self.connections.get(id) {
                push(*id, &entry.sender, &frame);
            }
        }
    }

    /// Drop `id` from its user's connection list, reporting whether the user
    /// went offline.
    fn detach(&mut self, user: &UserId, id: ConnectionId) -> bool {
        let Some(list) = self.by_user.get_mut(user) else {
            return false;
        };
        list.retain(|c| *c != id);
        if list.is_empty() {
            self.by_user.remove(user);
            true
        } else {
            false
        }
    }
}

/// Outcome of binding an identity to a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    /// The user had no live connection before this one.
    pub came_online: bool,
    /// A different user this connection was bound to before.
    pub previous: Option<UserId>,
}

/// Tracks live connections, the identity bound to each and which users are
/// online. All delivery goes through here.
///
/// Its lock is a leaf: callers may hold room or chat locks while sending, but
/// nothing is ever locked from inside the registry.
pub struct ConnectionRegistry {
    inner: Mutex<Presence>,
    next_id: AtomicU64,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Presence::default()),
            next_id: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Presence> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new, not yet identified connection.
    pub fn connect(&self, sender: ConnectionSender) -> ConnectionId {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().connections.insert(
            id,
            ConnectionEntry {
                identity: Identity::anonymous(),
                sender,
                connected_at: Instant::now(),
            },
        );
        id
    }

    /// Bind `user_id` to the connection. Re-binding the same user only
    /// refreshes the display name. Returns `None` for an unknown connection.
    pub fn register(
        &self,
        id: ConnectionId,
        user_id: UserId,
        username: Option<String>,
    ) -> Option<Registration> {
        let mut presence = self.lock();
        let previous = {
            let entry = presence.connections.get_mut(&id)?;
            let previous = entry.identity.user_id.clone();
            entry.identity = Identity::user(user_id.clone(), username);
            previous
        };

        if previous.as_ref() == Some(&user_id) {
            return Some(Registration {
                came_online: false,
                previous: None,
            });
        }

        if let Some(old) = &previous
            && presence.detach(old, id)
        {
            presence.notify_watchers(old, false);
        }

        let list = presence.by_user.entry(user_id.clone()).or_default();
        let came_online = list.is_empty();
        list.push(id);
        if came_online {
            presence.notify_watchers(&user_id, true);
        }

        Some(Registration {
            came_online,
            previous,
        })
    }

    /// Remove a connection. Dropping its sender ends the writer task.
    pub fn unregister(&self, id: ConnectionId) -> Option<Identity> {
        let mut presence = self.lock();
        let entry = presence.connections.remove(&id)?;
        for watchers in presence.watchers.values_mut() {
            watchers.remove(&id);
        }
        presence.watchers.retain(|_, w| !w.is_empty());

        if let Some(user) = &entry.identity.user_id
            && presence.detach(user, id)
        {
            presence.notify_watchers(user, false);
        }

        tracing::debug!(
            connection = %id,
            lifetime_ms = entry.connected_at.elapsed().as_millis() as u64,
            "Connection unregistered"
        );
        Some(entry.identity)
    }

    pub fn identity(&self, id: ConnectionId) -> Option<Identity> {
        self.lock().connections.get(&id).map(|e| e.identity.clone())
    }

    pub fn is_connected(&self, id: ConnectionId) -> bool {
        self.lock().connections.contains_key(&id)
    }

    pub fn is_online(&self, user: &UserId) -> bool {
        self.lock().by_user.contains_key(user)
    }

    /// Most recently registered connection of the user.
    pub fn canonical_connection(&self, user: &UserId) -> Option<ConnectionId> {
        self.lock()
            .by_user
            .get(user)
            .and_then(|list| list.last().copied())
    }

    /// Subscribe `watcher` to online/offline changes of `user`.
    pub fn watch(&self, watcher: ConnectionId, user: &UserId) {
        let mut presence = self.lock();
        if presence.connections.contains_key(&watcher) {
            presence
                .watchers
                .entry(user.clone())
                .or_default()
                .insert(watcher);
        }
    }

    /// Queue an event on one connection. Returns whether it was handed off.
    pub fn send(&self, id: ConnectionId, event: &ServerEvent) -> bool {
        encode(event).is_ok_and(|frame| self.send_frame(id, &frame))
    }

    /// Queue an event on every live connection of a user. Returns how many
    /// connections accepted it.
    pub fn send_to_user(&self, user: &UserId, event: &ServerEvent) -> usize {
        encode(event).map_or(0, |frame| self.send_frame_to_user(user, &frame))
    }

    fn send_frame(&self, id: ConnectionId, frame: &Arc<str>) -> bool {
        self.lock()
            .connections
            .get(&id)
            .is_some_and(|entry| push(id, &entry.sender, frame))
    }

    fn send_frame_to_user(&self, user: &UserId, frame: &Arc<str>) -> usize {
        let presence = self.lock();
        let Some(list) = presence.by_user.get(user) else {
            return 0;
        };
        list.iter()
            .filter(|id| {
                presence
                    .connections
                    .get(*id)
                    .is_some_and(|entry| push(**id, &entry.sender, frame))
            })
            .count()
    }

    /// Hand a batch of events to their recipients, in order. An event that
    /// cannot be encoded is skipped and the rest still go out; the first
    /// such failure is returned so the caller can tell whoever caused it.
    pub fn deliver(&self, outbound: &[Outbound]) -> Result<(), ProtocolError> {
        let mut failure = None;
        for out in outbound {
            let frame = match encode(&out.event) {
                Ok(frame) => frame,
                Err(e) => {
                    failure.get_or_insert(e);
                    continue;
                },
            };
            match &out.to {
                Recipient::Connection(id) => {
                    self.send_frame(*id, &frame);
                },
                Recipient::User(user) => {
                    self.send_frame_to_user(user, &frame);
                },
            }
        }
        failure.map_or(Ok(()), Err)
    }

    pub fn connection_count(&self) -> usize {
        self.lock().connections.len()
    }

    pub fn online_user_count(&self) -> usize {
        self.lock().by_user.len()
    }
}

fn encode(event: &ServerEvent) -> Result<Arc<str>, ProtocolError> {
    encode_server_event(event).map(Arc::from).map_err(|e| {
        tracing::warn!(error = %e, "Failed to encode server event");
        e
    })
}

fn push(id: ConnectionId, sender: &ConnectionSender, frame: &Arc<str>) -> bool {
    match sender.try_send(Arc::clone(frame)) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            tracing::warn!(connection = %id, "Outbound queue full, dropping frame");
            false
        },
        Err(TrySendError::Closed(_)) => {
            tracing::debug!(connection = %id, "Outbound queue closed");
            false
        },
    }
}
