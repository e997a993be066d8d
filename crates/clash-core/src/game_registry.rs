use std::fmt;

use serde::{Deserialize, Serialize};

use crate::player::Seat;

/// The kinds of game a room can host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameKind {
    #[serde(alias = "tic-tac-toe", alias = "ticTacToe")]
    TicTacToe,
    Chess,
    Custom,
}

impl GameKind {
    pub const ALL: [GameKind; 3] = [GameKind::TicTacToe, GameKind::Chess, GameKind::Custom];

    /// Parse the labels the web client sends (`"tictactoe"`, `"chess"`, ...).
    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tictactoe" | "tic-tac-toe" => Some(Self::TicTacToe),
            "chess" => Some(Self::Chess),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::TicTacToe => "tictactoe",
            Self::Chess => "chess",
            Self::Custom => "custom",
        }
    }

    /// Client-facing name of a seat: `X`/`O` for tic-tac-toe, `white`/`black`
    /// for chess.
    pub fn seat_label(self, seat: Seat) -> &'static str {
        match (self, seat) {
            (Self::TicTacToe, Seat::First) => "X",
            (Self::TicTacToe, Seat::Second) => "O",
            (Self::Chess, Seat::First) => "white",
            (Self::Chess, Seat::Second) => "black",
            (Self::Custom, Seat::First) => "first",
            (Self::Custom, Seat::Second) => "second",
        }
    }

    /// Inverse of [`GameKind::seat_label`], case-insensitive.
    pub fn seat_from_label(self, label: &str) -> Option<Seat> {
        Seat::ALL
            .into_iter()
            .find(|&seat| self.seat_label(seat).eq_ignore_ascii_case(label.trim()))
    }
}

impl fmt::Display for GameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_client_labels() {
        assert_eq!(GameKind::from_str_opt("tictactoe"), Some(GameKind::TicTacToe));
        assert_eq!(GameKind::from_str_opt("Chess"), Some(GameKind::Chess));
        assert_eq!(GameKind::from_str_opt("checkers"), None);
    }

    #[test]
    fn labels_roundtrip() {
        for kind in GameKind::ALL {
            for seat in Seat::ALL {
                assert_eq!(kind.seat_from_label(kind.seat_label(seat)), Some(seat));
            }
        }
        assert_eq!(GameKind::Chess.seat_from_label("WHITE"), Some(Seat::First));
    }

    #[test]
    fn serde_uses_lowercase_names() {
        let json = serde_json::to_string(&GameKind::TicTacToe).unwrap();
        assert_eq!(json, "\"tictactoe\"");
        let kind: GameKind = serde_json::from_str("\"tic-tac-toe\"").unwrap();
        assert_eq!(kind, GameKind::TicTacToe);
    }
}
