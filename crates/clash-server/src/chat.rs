use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use uuid::Uuid;

use clash_core::chat::{ChatMessage, MessageStatus, ThreadKey};
use clash_core::error::SessionError;
use clash_core::net::messages::{MessageStatusMsg, ServerEvent};
use clash_core::net::protocol::MAX_OUTBOUND_SIZE;
use clash_core::player::UserId;
use clash_core::time::timestamp_now_ms;

use crate::presence::ConnectionRegistry;

/// Encoded bytes of messages one history page may carry, leaving room for
/// the event envelope.
pub const HISTORY_PAGE_BYTES: usize = MAX_OUTBOUND_SIZE - 4 * 1024;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One direct-message thread. Appends, status changes and the deliveries
/// they cause all happen under its lock, so both participants observe the
/// thread in one order.
#[derive(Default)]
struct ChatThread {
    messages: Vec<ChatMessage>,
    /// Messages still `sent`, per receiver.
    undelivered: HashMap<UserId, usize>,
}

impl ChatThread {
    fn undelivered_to(&self, user: &UserId) -> usize {
        self.undelivered.get(user).copied().unwrap_or(0)
    }

    fn delivered_to(&mut self, user: &UserId, count: usize) {
        if let Some(n) = self.undelivered.get_mut(user) {
            *n = n.saturating_sub(count);
            if *n == 0 {
                self.undelivered.remove(user);
            }
        }
    }

    /// Push every message still `sent` to `user`, oldest first. Stops at the
    /// first one the registry cannot hand off.
    fn flush(&mut self, user: &UserId, registry: &ConnectionRegistry) -> usize {
        if self.undelivered_to(user) == 0 {
            return 0;
        }
        let mut delivered = 0;
        for msg in self
            .messages
            .iter_mut()
            .filter(|m| &m.receiver == user && m.status == MessageStatus::Sent)
        {
            if registry.send_to_user(user, &ServerEvent::Message(msg.clone())) == 0 {
                break;
            }
            msg.advance(MessageStatus::Delivered);
            registry.send_to_user(&msg.sender, &ServerEvent::MessageDelivered(status_notice(msg)));
            delivered += 1;
        }
        self.delivered_to(user, delivered);
        delivered
    }

    /// The newest messages that fit both `limit` and `max_bytes`.
    fn page(&self, limit: usize, max_bytes: usize) -> HistoryPage {
        let floor = self.messages.len().saturating_sub(limit);
        let mut start = self.messages.len();
        let mut budget = max_bytes;
        while start > floor {
            let size = serde_json::to_string(&self.messages[start - 1])
                .map_or(usize::MAX, |text| text.len() + 1);
            if size > budget {
                break;
            }
            budget -= size;
            start -= 1;
        }
        HistoryPage {
            messages: self.messages[start..].to_vec(),
            has_more: start > 0,
        }
    }
}

type SharedThread = Arc<Mutex<ChatThread>>;

fn status_notice(msg: &ChatMessage) -> MessageStatusMsg {
    MessageStatusMsg {
        message_id: msg.message_id,
        thread_key: msg.thread_key.clone(),
        status: msg.status,
    }
}

/// A page of a thread, oldest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryPage {
    pub messages: Vec<ChatMessage>,
    /// Older messages exist beyond this page.
    pub has_more: bool,
}

/// Direct-message threads with delivery tracking.
///
/// Each thread sits behind its own lock; the maps here are only held long
/// enough to find a thread. Lock order: a thread, then `index` or `pending`,
/// then the registry.
pub struct ChatRelay {
    threads: Mutex<HashMap<ThreadKey, SharedThread>>,
    /// Message id to its thread and position in it.
    index: Mutex<HashMap<Uuid, (ThreadKey, usize)>>,
    /// Threads that may hold messages still `sent` to each receiver.
    pending: Mutex<HashMap<UserId, Vec<ThreadKey>>>,
    max_len: usize,
}

impl ChatRelay {
    pub fn new(max_len: usize) -> Self {
        Self {
            threads: Mutex::new(HashMap::new()),
            index: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            max_len,
        }
    }

    fn thread(&self, key: &ThreadKey) -> SharedThread {
        Arc::clone(lock(&self.threads).entry(key.clone()).or_default())
    }

    fn existing_thread(&self, key: &ThreadKey) -> Option<SharedThread> {
        lock(&self.threads).get(key).map(Arc::clone)
    }

    fn mark_pending(&self, receiver: &UserId, key: &ThreadKey) {
        let mut pending = lock(&self.pending);
        let keys = pending.entry(receiver.clone()).or_default();
        if !keys.contains(key) {
            keys.push(key.clone());
        }
    }

    /// Append a message and try to hand it to the receiver. The sender's
    /// connections get the stored copy back as `messageSent`.
    pub fn send(
        &self,
        sender: &UserId,
        sender_name: Option<String>,
        receiver: UserId,
        text: &str,
        registry: &ConnectionRegistry,
    ) -> Result<ChatMessage, SessionError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SessionError::InvalidRequest("message text is empty".into()));
        }
        if text.chars().count() > self.max_len {
            return Err(SessionError::InvalidRequest(format!(
                "message exceeds {} characters",
                self.max_len
            )));
        }
        if &receiver == sender {
            return Err(SessionError::InvalidRequest(
                "cannot message yourself".into(),
            ));
        }

        let key = ThreadKey::derive(sender, &receiver);
        let mut msg = ChatMessage {
            message_id: Uuid::new_v4(),
            thread_key: key.to_string(),
            sender: sender.clone(),
            sender_name,
            receiver: receiver.clone(),
            text: text.to_string(),
            status: MessageStatus::Sent,
            created_at: timestamp_now_ms(),
        };

        let shared = self.thread(&key);
        let mut thread = lock(&shared);
        if registry.is_online(&receiver) {
            thread.flush(&receiver, registry);
        }
        let pos = thread.messages.len();
        lock(&self.index).insert(msg.message_id, (key.clone(), pos));

        // Live hand-off only once nothing older is waiting for the receiver.
        if thread.undelivered_to(&receiver) == 0
            && registry.send_to_user(&receiver, &ServerEvent::Message(msg.clone())) > 0
        {
            msg.advance(MessageStatus::Delivered);
            thread.messages.push(msg.clone());
            registry.send_to_user(sender, &ServerEvent::MessageSent(msg.clone()));
        } else {
            thread.messages.push(msg.clone());
            *thread.undelivered.entry(receiver.clone()).or_default() += 1;
            self.mark_pending(&receiver, &key);
            registry.send_to_user(sender, &ServerEvent::MessageSent(msg.clone()));
            // The receiver may have registered after the first check, with
            // its pending flush already past this thread.
            if registry.is_online(&receiver) {
                thread.flush(&receiver, registry);
            }
        }
        tracing::debug!(
            message = %msg.message_id,
            status = ?thread.messages[pos].status,
            "Chat message stored"
        );
        Ok(thread.messages[pos].clone())
    }

    /// Move a message forward to `status` on behalf of its receiver and tell
    /// the sender. Repeats and backward moves are accepted silently.
    pub fn acknowledge(
        &self,
        id: Uuid,
        reader: &UserId,
        status: MessageStatus,
        registry: &ConnectionRegistry,
    ) -> Result<(), SessionError> {
        let (key, pos) = lock(&self.index)
            .get(&id)
            .cloned()
            .ok_or(SessionError::MessageNotFound)?;
        let shared = self
            .existing_thread(&key)
            .ok_or(SessionError::MessageNotFound)?;
        let mut thread = lock(&shared);
        let msg = thread
            .messages
            .get_mut(pos)
            .ok_or(SessionError::MessageNotFound)?;
        if &msg.receiver != reader {
            return Err(SessionError::NotMessageRecipient);
        }
        let was_sent = msg.status == MessageStatus::Sent;
        if !msg.advance(status) {
            return Ok(());
        }
        let sender = msg.sender.clone();
        let notice = status_notice(msg);
        if was_sent {
            thread.delivered_to(reader, 1);
        }
        let event = match status {
            MessageStatus::Read => ServerEvent::MessageRead(notice),
            _ => ServerEvent::MessageDelivered(notice),
        };
        registry.send_to_user(&sender, &event);
        Ok(())
    }

    /// Push every message still `sent` to a user who just came online.
    /// Returns how many were delivered.
    pub fn deliver_pending(&self, user: &UserId, registry: &ConnectionRegistry) -> usize {
        let Some(keys) = lock(&self.pending).remove(user) else {
            return 0;
        };
        let mut delivered = 0;
        for key in keys {
            let Some(shared) = self.existing_thread(&key) else {
                continue;
            };
            let mut thread = lock(&shared);
            delivered += thread.flush(user, registry);
            if thread.undelivered_to(user) > 0 {
                self.mark_pending(user, &key);
            }
        }
        if delivered > 0 {
            tracing::debug!(user = %user, delivered, "Delivered pending chat messages");
        }
        delivered
    }

    /// Run `f` on the newest page of the thread between two users while the
    /// thread is locked, so a reply built from it is not overtaken by a newer
    /// message. The page holds at most `limit` messages and
    /// [`HISTORY_PAGE_BYTES`] of them encoded.
    pub fn with_history<R>(
        &self,
        a: &UserId,
        b: &UserId,
        limit: usize,
        f: impl FnOnce(HistoryPage) -> R,
    ) -> R {
        match self.existing_thread(&ThreadKey::derive(a, b)) {
            Some(shared) => {
                let thread = lock(&shared);
                f(thread.page(limit, HISTORY_PAGE_BYTES))
            },
            None => f(HistoryPage::default()),
        }
    }

    /// The newest page of the thread between two users.
    pub fn history(&self, a: &UserId, b: &UserId, limit: usize) -> HistoryPage {
        self.with_history(a, b, limit, |page| page)
    }

    pub fn get(&self, id: &Uuid) -> Option<ChatMessage> {
        let (key, pos) = lock(&self.index).get(id).cloned()?;
        let shared = self.existing_thread(&key)?;
        let thread = lock(&shared);
        thread.messages.get(pos).cloned()
    }

    pub fn thread_count(&self) -> usize {
        lock(&self.threads).len()
    }

    pub fn message_count(&self) -> usize {
        lock(&self.index).len()
    }
}
