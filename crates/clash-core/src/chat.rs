use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::player::UserId;

/// Identifier of a direct-message thread between two users.
///
/// Built from the ordered pair so that `(a, b)` and `(b, a)` produce the same
/// key. Equality compares the pair itself, not the rendered string, so ids
/// containing the separator cannot collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadKey {
    low: UserId,
    high: UserId,
}

impl ThreadKey {
    pub fn derive(a: &UserId, b: &UserId) -> Self {
        if a <= b {
            Self {
                low: a.clone(),
                high: b.clone(),
            }
        } else {
            Self {
                low: b.clone(),
                high: a.clone(),
            }
        }
    }

    pub fn involves(&self, user: &UserId) -> bool {
        &self.low == user || &self.high == user
    }

    /// The participant that is not `user`, if `user` is in this thread.
    pub fn peer_of(&self, user: &UserId) -> Option<&UserId> {
        if &self.low == user {
            Some(&self.high)
        } else if &self.high == user {
            Some(&self.low)
        } else {
            None
        }
    }
}

impl fmt::Display for ThreadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.low, self.high)
    }
}

/// Delivery state of a message. Ordered: a status only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
}

/// A direct message inside a thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub message_id: Uuid,
    /// Rendered [`ThreadKey`].
    pub thread_key: String,
    pub sender: UserId,
    pub sender_name: Option<String>,
    pub receiver: UserId,
    pub text: String,
    pub status: MessageStatus,
    /// Milliseconds since the Unix epoch.
    pub created_at: u64,
}

impl ChatMessage {
    /// Move the status forward to `next`. Returns `true` if it changed;
    /// requests to stay or move backwards are ignored.
    pub fn advance(&mut self, next: MessageStatus) -> bool {
        if next > self.status {
            self.status = next;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn message() -> ChatMessage {
        let a = UserId::new("alice");
        let b = UserId::new("bob");
        ChatMessage {
            message_id: Uuid::new_v4(),
            thread_key: ThreadKey::derive(&a, &b).to_string(),
            sender: a,
            sender_name: Some("Alice".into()),
            receiver: b,
            text: "hi".into(),
            status: MessageStatus::Sent,
            created_at: 0,
        }
    }

    #[test]
    fn key_renders_sorted_pair() {
        let key = ThreadKey::derive(&UserId::new("zed"), &UserId::new("amy"));
        assert_eq!(key.to_string(), "amy_zed");
    }

    #[test]
    fn separator_in_ids_does_not_collide() {
        let k1 = ThreadKey::derive(&UserId::new("a_b"), &UserId::new("c"));
        let k2 = ThreadKey::derive(&UserId::new("a"), &UserId::new("b_c"));
        assert_ne!(k1, k2);
    }

    #[test]
    fn peer_lookup() {
        let a = UserId::new("a");
        let b = UserId::new("b");
        let key = ThreadKey::derive(&a, &b);
        assert_eq!(key.peer_of(&a), Some(&b));
        assert_eq!(key.peer_of(&b), Some(&a));
        assert_eq!(key.peer_of(&UserId::new("c")), None);
    }

    #[test]
    fn status_only_moves_forward() {
        let mut msg = message();
        assert!(msg.advance(MessageStatus::Delivered));
        assert!(msg.advance(MessageStatus::Read));
        assert!(!msg.advance(MessageStatus::Read));
        assert!(!msg.advance(MessageStatus::Delivered));
        assert_eq!(msg.status, MessageStatus::Read);
    }

    #[test]
    fn read_may_skip_delivered() {
        let mut msg = message();
        assert!(msg.advance(MessageStatus::Read));
        assert_eq!(msg.status, MessageStatus::Read);
    }

    proptest! {
        #[test]
        fn derivation_is_symmetric(a in "[a-z0-9_]{1,12}", b in "[a-z0-9_]{1,12}") {
            let (a, b) = (UserId::new(a), UserId::new(b));
            prop_assert_eq!(ThreadKey::derive(&a, &b), ThreadKey::derive(&b, &a));
            prop_assert_eq!(
                ThreadKey::derive(&a, &b).to_string(),
                ThreadKey::derive(&b, &a).to_string()
            );
        }
    }
}
