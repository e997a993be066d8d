use rand::Rng;
use serde::{Deserialize, Serialize};

/// Length of a room code. The web client only submits 4-character codes.
pub const ROOM_CODE_LEN: usize = 4;

/// Alphabet for room codes: uppercase letters and digits without the easily
/// confused `0 O 1 I`.
pub const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Lifecycle of a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    /// Created, one seat still empty.
    Waiting,
    /// Both seats filled, turns being taken.
    Active,
    /// Terminal condition reached; kept briefly for late reconnects.
    Finished,
}

impl RoomStatus {
    /// Whether `self -> next` is an allowed lifecycle step. `Finished -> Active`
    /// is the explicit reset; `Active -> Waiting` and `Finished -> Waiting`
    /// happen when a participant leaves.
    pub fn can_transition_to(self, next: RoomStatus) -> bool {
        matches!(
            (self, next),
            (RoomStatus::Waiting, RoomStatus::Active)
                | (RoomStatus::Active, RoomStatus::Finished)
                | (RoomStatus::Active, RoomStatus::Waiting)
                | (RoomStatus::Finished, RoomStatus::Active)
                | (RoomStatus::Finished, RoomStatus::Waiting)
        )
    }
}

/// Generate a random room code using the thread-local RNG.
pub fn generate_room_code() -> String {
    generate_room_code_with(&mut rand::rng())
}

/// Generate a random room code from the given RNG.
pub fn generate_room_code_with<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..ROOM_CODE_LEN)
        .map(|_| {
            let idx = rng.random_range(0..ROOM_CODE_ALPHABET.len());
            ROOM_CODE_ALPHABET[idx] as char
        })
        .collect()
}

/// Canonical form of a user-typed code (trimmed, uppercased), or `None` if it
/// can never name a room.
pub fn normalize_room_code(raw: &str) -> Option<String> {
    let code = raw.trim().to_ascii_uppercase();
    is_valid_room_code(&code).then_some(code)
}

/// Check that a code has the right length and only alphabet characters.
pub fn is_valid_room_code(code: &str) -> bool {
    code.len() == ROOM_CODE_LEN && code.bytes().all(|b| ROOM_CODE_ALPHABET.contains(&b))
}
