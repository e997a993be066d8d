use clash_core::game_trait::MoveError;

use crate::board::{PieceKind, Position, Square};
use crate::movegen::{Move, MoveKind, in_check, legal_moves};

/// Standard algebraic notation for a legal move, with `+`/`#` suffix.
pub fn to_san(pos: &Position, mv: Move) -> String {
    let legal = legal_moves(pos);
    san_with(pos, mv, &legal)
}

fn san_with(pos: &Position, mv: Move, legal: &[Move]) -> String {
    let mut san = match mv.kind {
        MoveKind::CastleKingSide => "O-O".to_string(),
        MoveKind::CastleQueenSide => "O-O-O".to_string(),
        _ => {
            let Some(piece) = pos.piece_at(mv.from) else {
                return mv.to_uci();
            };
            let capture = pos.piece_at(mv.to).is_some() || mv.kind == MoveKind::EnPassant;
            let mut s = String::new();
            if piece.kind == PieceKind::Pawn {
                if capture {
                    s.push(mv.from.file_char());
                }
            } else {
                s.push(piece.kind.letter());
                let rivals: Vec<Square> = legal
                    .iter()
                    .filter(|m| m.to == mv.to && m.from != mv.from)
                    .filter(|m| pos.piece_at(m.from).is_some_and(|p| p.kind == piece.kind))
                    .map(|m| m.from)
                    .collect();
                if !rivals.is_empty() {
                    if rivals.iter().all(|r| r.file() != mv.from.file()) {
                        s.push(mv.from.file_char());
                    } else if rivals.iter().all(|r| r.rank() != mv.from.rank()) {
                        s.push(mv.from.rank_char());
                    } else {
                        s.push(mv.from.file_char());
                        s.push(mv.from.rank_char());
                    }
                }
            }
            if capture {
                s.push('x');
            }
            s.push_str(&mv.to.to_string());
            if let Some(kind) = mv.promotion {
                s.push('=');
                s.push(kind.letter());
            }
            s
        },
    };

    let mut next = pos.clone();
    next.make_move(mv);
    if in_check(&next, next.side_to_move) {
        san.push(if legal_moves(&next).is_empty() { '#' } else { '+' });
    }
    san
}

/// Comparison form: no check marks, annotations, `=` or `x`, and zeros read
/// as castling letters.
fn normalize(raw: &str) -> String {
    raw.trim()
        .trim_end_matches(['+', '#', '!', '?'])
        .replace("e.p.", "")
        .replace('0', "O")
        .chars()
        .filter(|c| !matches!(c, '=' | 'x' | ' '))
        .collect()
}

fn illegal(text: impl std::fmt::Display) -> MoveError {
    MoveError::IllegalMove(format!("{text} is not a legal move here"))
}

fn parse_promotion(raw: Option<&str>) -> Result<Option<PieceKind>, MoveError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => {
            let kind = match s.to_ascii_lowercase().as_str() {
                "q" | "queen" => PieceKind::Queen,
                "r" | "rook" => PieceKind::Rook,
                "b" | "bishop" => PieceKind::Bishop,
                "n" | "knight" => PieceKind::Knight,
                _ => return Err(MoveError::IllegalMove(format!("unknown promotion {s}"))),
            };
            Ok(Some(kind))
        },
    }
}

/// Match a from/to pair against the legal moves. A promotion left out
/// defaults to a queen.
fn by_coordinates(
    legal: &[Move],
    from: Square,
    to: Square,
    promotion: Option<PieceKind>,
) -> Option<Move> {
    let wanted = |m: &&Move| m.from == from && m.to == to;
    match promotion {
        Some(kind) => legal
            .iter()
            .filter(wanted)
            .find(|m| m.promotion == Some(kind))
            .copied(),
        None => legal
            .iter()
            .filter(wanted)
            .find(|m| m.promotion.is_none() || m.promotion == Some(PieceKind::Queen))
            .copied(),
    }
}

fn parse_text(pos: &Position, text: &str, legal: &[Move]) -> Result<Move, MoveError> {
    let trimmed = text.trim();
    if trimmed.is_empty() || !trimmed.is_ascii() {
        return Err(illegal(format!("{text:?}")));
    }

    if (4..=5).contains(&trimmed.len())
        && let (Some(from), Some(to)) =
            (Square::parse(&trimmed[0..2]), Square::parse(&trimmed[2..4]))
    {
        let promotion = parse_promotion(trimmed.get(4..5))?;
        if let Some(mv) = by_coordinates(legal, from, to, promotion) {
            return Ok(mv);
        }
    }

    let wanted = normalize(trimmed);
    legal
        .iter()
        .copied()
        .find(|&mv| normalize(&san_with(pos, mv, legal)) == wanted)
        .ok_or_else(|| illegal(trimmed))
}

/// Resolve a client move descriptor: SAN (`"Nf3"`), coordinates (`"g1f3"`),
/// `{"san": ...}` or `{"from", "to", "promotion"?}`.
pub fn parse_move(pos: &Position, descriptor: &serde_json::Value) -> Result<Move, MoveError> {
    let legal = legal_moves(pos);
    match descriptor {
        serde_json::Value::String(text) => parse_text(pos, text, &legal),
        serde_json::Value::Object(map) => {
            if let Some(text) = map.get("san").and_then(|v| v.as_str()) {
                return parse_text(pos, text, &legal);
            }
            let square = |key: &str| map.get(key).and_then(|v| v.as_str()).and_then(Square::parse);
            let (Some(from), Some(to)) = (square("from"), square("to")) else {
                return Err(MoveError::IllegalMove(
                    "expected SAN or from/to squares".to_string(),
                ));
            };
            let promotion = parse_promotion(map.get("promotion").and_then(|v| v.as_str()))?;
            by_coordinates(&legal, from, to, promotion)
                .ok_or_else(|| illegal(format!("{from}{to}")))
        },
        other => Err(MoveError::IllegalMove(format!(
            "expected SAN or from/to squares, got {other}"
        ))),
    }
}
