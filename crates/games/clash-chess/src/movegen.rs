use crate::board::{Color, Piece, PieceKind, Position, Square};

const KNIGHT_STEPS: [(i8, i8); 8] = [
    (1, 2),
    (2, 1),
    (2, -1),
    (1, -2),
    (-1, -2),
    (-2, -1),
    (-2, 1),
    (-1, 2),
];
const KING_STEPS: [(i8, i8); 8] = [
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
];
const ROOK_DIRS: [(i8, i8); 4] = [(1, 0), (-1, 0), (0, 1), (0, -1)];
const BISHOP_DIRS: [(i8, i8); 4] = [(1, 1), (1, -1), (-1, 1), (-1, -1)];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MoveKind {
    Normal,
    DoublePush,
    EnPassant,
    CastleKingSide,
    CastleQueenSide,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Move {
    pub from: Square,
    pub to: Square,
    pub promotion: Option<PieceKind>,
    pub kind: MoveKind,
}

impl Move {
    fn new(from: Square, to: Square) -> Self {
        Self {
            from,
            to,
            promotion: None,
            kind: MoveKind::Normal,
        }
    }

    /// Coordinate notation, e.g. `e2e4` or `e7e8q`.
    pub fn to_uci(self) -> String {
        let mut s = format!("{}{}", self.from, self.to);
        if let Some(kind) = self.promotion {
            s.push(kind.letter().to_ascii_lowercase());
        }
        s
    }

    pub fn is_castle(self) -> bool {
        matches!(self.kind, MoveKind::CastleKingSide | MoveKind::CastleQueenSide)
    }
}

/// Whether any piece of `by` attacks `target`.
pub fn is_square_attacked(pos: &Position, target: Square, by: Color) -> bool {
    let holds = |sq: Option<Square>, kinds: &[PieceKind]| {
        sq.and_then(|s| pos.piece_at(s))
            .is_some_and(|p| p.color == by && kinds.contains(&p.kind))
    };

    // A pawn of `by` attacks diagonally forward, so look one rank behind.
    let back = -by.forward();
    if holds(target.offset(-1, back), &[PieceKind::Pawn])
        || holds(target.offset(1, back), &[PieceKind::Pawn])
    {
        return true;
    }
    if KNIGHT_STEPS
        .iter()
        .any(|&(df, dr)| holds(target.offset(df, dr), &[PieceKind::Knight]))
    {
        return true;
    }
    if KING_STEPS
        .iter()
        .any(|&(df, dr)| holds(target.offset(df, dr), &[PieceKind::King]))
    {
        return true;
    }
    let slider_hits = |dirs: &[(i8, i8)], kinds: &[PieceKind]| {
        dirs.iter().any(|&(df, dr)| {
            let mut cur = target.offset(df, dr);
            while let Some(sq) = cur {
                if let Some(piece) = pos.piece_at(sq) {
                    return piece.color == by && kinds.contains(&piece.kind);
                }
                cur = sq.offset(df, dr);
            }
            false
        })
    };
    slider_hits(&ROOK_DIRS, &[PieceKind::Rook, PieceKind::Queen])
        || slider_hits(&BISHOP_DIRS, &[PieceKind::Bishop, PieceKind::Queen])
}

pub fn in_check(pos: &Position, color: Color) -> bool {
    pos.king_square(color)
        .is_some_and(|king| is_square_attacked(pos, king, color.opposite()))
}

/// All legal moves for the side to move.
pub fn legal_moves(pos: &Position) -> Vec<Move> {
    let mover = pos.side_to_move;
    pseudo_legal_moves(pos)
        .into_iter()
        .filter(|&mv| {
            let mut next = pos.clone();
            next.make_move(mv);
            !in_check(&next, mover)
        })
        .collect()
}

fn pseudo_legal_moves(pos: &Position) -> Vec<Move> {
    let us = pos.side_to_move;
    let mut moves = Vec::with_capacity(48);
    for (from, piece) in pos.pieces().filter(|(_, p)| p.color == us) {
        match piece.kind {
            PieceKind::Pawn => pawn_moves(pos, from, us, &mut moves),
            PieceKind::Knight => step_moves(pos, from, us, &KNIGHT_STEPS, &mut moves),
            PieceKind::King => {
                step_moves(pos, from, us, &KING_STEPS, &mut moves);
                castle_moves(pos, from, us, &mut moves);
            },
            PieceKind::Bishop => slide_moves(pos, from, us, &BISHOP_DIRS, &mut moves),
            PieceKind::Rook => slide_moves(pos, from, us, &ROOK_DIRS, &mut moves),
            PieceKind::Queen => {
                slide_moves(pos, from, us, &BISHOP_DIRS, &mut moves);
                slide_moves(pos, from, us, &ROOK_DIRS, &mut moves);
            },
        }
    }
    moves
}

fn push_pawn_move(from: Square, to: Square, us: Color, moves: &mut Vec<Move>) {
    if to.rank() == us.opposite().back_rank() {
        for kind in PieceKind::PROMOTIONS {
            moves.push(Move {
                promotion: Some(kind),
                ..Move::new(from, to)
            });
        }
    } else {
        moves.push(Move::new(from, to));
    }
}

fn pawn_moves(pos: &Position, from: Square, us: Color, moves: &mut Vec<Move>) {
    let dir = us.forward();
    if let Some(one) = from.offset(0, dir)
        && pos.piece_at(one).is_none()
    {
        push_pawn_move(from, one, us, moves);
        let start_rank = match us {
            Color::White => 1,
            Color::Black => 6,
        };
        if from.rank() == start_rank
            && let Some(two) = one.offset(0, dir)
            && pos.piece_at(two).is_none()
        {
            moves.push(Move {
                kind: MoveKind::DoublePush,
                ..Move::new(from, two)
            });
        }
    }
    for df in [-1, 1] {
        let Some(to) = from.offset(df, dir) else {
            continue;
        };
        match pos.piece_at(to) {
            Some(target) if target.color != us => push_pawn_move(from, to, us, moves),
            None if pos.en_passant == Some(to) => moves.push(Move {
                kind: MoveKind::EnPassant,
                ..Move::new(from, to)
            }),
            _ => {},
        }
    }
}

fn step_moves(
    pos: &Position,
    from: Square,
    us: Color,
    steps: &[(i8, i8)],
    moves: &mut Vec<Move>,
) {
    for &(df, dr) in steps {
        if let Some(to) = from.offset(df, dr)
            && pos.piece_at(to).is_none_or(|p| p.color != us)
        {
            moves.push(Move::new(from, to));
        }
    }
}

fn slide_moves(
    pos: &Position,
    from: Square,
    us: Color,
    dirs: &[(i8, i8)],
    moves: &mut Vec<Move>,
) {
    for &(df, dr) in dirs {
        let mut cur = from.offset(df, dr);
        while let Some(to) = cur {
            match pos.piece_at(to) {
                None => moves.push(Move::new(from, to)),
                Some(p) => {
                    if p.color != us {
                        moves.push(Move::new(from, to));
                    }
                    break;
                },
            }
            cur = to.offset(df, dr);
        }
    }
}

fn castle_moves(pos: &Position, from: Square, us: Color, moves: &mut Vec<Move>) {
    let rank = us.back_rank();
    if Square::new(4, rank) != Some(from) || is_square_attacked(pos, from, us.opposite()) {
        return;
    }
    let rook = Some(Piece::new(us, PieceKind::Rook));
    let empty = |files: &[u8]| {
        files
            .iter()
            .all(|&f| Square::new(f, rank).is_some_and(|sq| pos.piece_at(sq).is_none()))
    };
    let safe = |files: &[u8]| {
        files.iter().all(|&f| {
            Square::new(f, rank).is_some_and(|sq| !is_square_attacked(pos, sq, us.opposite()))
        })
    };

    if pos.castling.king_side(us)
        && Square::new(7, rank).and_then(|sq| pos.piece_at(sq)) == rook
        && empty(&[5, 6])
        && safe(&[5, 6])
        && let Some(to) = Square::new(6, rank)
    {
        moves.push(Move {
            kind: MoveKind::CastleKingSide,
            ..Move::new(from, to)
        });
    }
    if pos.castling.queen_side(us)
        && Square::new(0, rank).and_then(|sq| pos.piece_at(sq)) == rook
        && empty(&[1, 2, 3])
        && safe(&[2, 3])
        && let Some(to) = Square::new(2, rank)
    {
        moves.push(Move {
            kind: MoveKind::CastleQueenSide,
            ..Move::new(from, to)
        });
    }
}

impl Position {
    /// Play `mv` without legality checks. Returns the captured piece.
    pub fn make_move(&mut self, mv: Move) -> Option<Piece> {
        let Some(mut piece) = self.piece_at(mv.from) else {
            return None;
        };
        let us = piece.color;
        let mut captured = self.piece_at(mv.to);

        if mv.kind == MoveKind::EnPassant
            && let Some(victim) = Square::new(mv.to.file(), mv.from.rank())
        {
            captured = self.piece_at(victim);
            self.set_piece(victim, None);
        }
        if let Some(kind) = mv.promotion {
            piece.kind = kind;
        }
        self.set_piece(mv.from, None);
        self.set_piece(mv.to, Some(piece));

        let rank = us.back_rank();
        let rook_hop = match mv.kind {
            MoveKind::CastleKingSide => Some((7, 5)),
            MoveKind::CastleQueenSide => Some((0, 3)),
            _ => None,
        };
        if let Some((rook_from, rook_to)) = rook_hop
            && let (Some(rf), Some(rt)) = (Square::new(rook_from, rank), Square::new(rook_to, rank))
        {
            let rook = self.piece_at(rf);
            self.set_piece(rf, None);
            self.set_piece(rt, rook);
        }

        if piece.kind == PieceKind::King {
            self.castling.clear(us);
        }
        self.castling.touch(mv.from);
        self.castling.touch(mv.to);

        self.en_passant = None;
        if mv.kind == MoveKind::DoublePush {
            let enemy_pawn = Some(Piece::new(us.opposite(), PieceKind::Pawn));
            let capturable = [-1, 1].into_iter().any(|df| {
                mv.to
                    .offset(df, 0)
                    .is_some_and(|sq| self.piece_at(sq) == enemy_pawn)
            });
            if capturable {
                self.en_passant = mv.from.offset(0, us.forward());
            }
        }

        let was_pawn = self.piece_at(mv.to).is_some_and(|p| p.kind == PieceKind::Pawn)
            || mv.promotion.is_some();
        if was_pawn || captured.is_some() {
            self.halfmove_clock = 0;
        } else {
            self.halfmove_clock += 1;
        }
        if us == Color::Black {
            self.fullmove_number += 1;
        }
        self.side_to_move = us.opposite();
        captured
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::STARTING_FEN;

    fn perft(pos: &Position, depth: u32) -> u64 {
        if depth == 0 {
            return 1;
        }
        legal_moves(pos)
            .into_iter()
            .map(|mv| {
                let mut next = pos.clone();
                next.make_move(mv);
                perft(&next, depth - 1)
            })
            .sum()
    }

    fn find(pos: &Position, uci: &str) -> Move {
        legal_moves(pos)
            .into_iter()
            .find(|m| m.to_uci() == uci)
            .unwrap_or_else(|| panic!("{uci} not legal"))
    }

    #[test]
    fn perft_from_start() {
        let pos = Position::from_fen(STARTING_FEN).unwrap();
        assert_eq!(perft(&pos, 1), 20);
        assert_eq!(perft(&pos, 2), 400);
        assert_eq!(perft(&pos, 3), 8_902);
    }

    #[test]
    fn perft_kiwipete() {
        let pos = Position::from_fen(
            "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
        )
        .unwrap();
        assert_eq!(perft(&pos, 1), 48);
        assert_eq!(perft(&pos, 2), 2_039);
    }

    #[test]
    fn perft_endgame_with_en_passant_pins() {
        let pos = Position::from_fen("8/2p5/3p4/KP5r/1R3p1k/8/4P1P1/8 w - - 0 1").unwrap();
        assert_eq!(perft(&pos, 1), 14);
        assert_eq!(perft(&pos, 2), 191);
        assert_eq!(perft(&pos, 3), 2_812);
    }

    #[test]
    fn double_push_sets_en_passant_only_when_capturable() {
        let mut pos = Position::starting();
        pos.make_move(find(&pos, "e2e4"));
        assert_eq!(pos.en_passant, None);
        assert_eq!(
            pos.to_fen(),
            "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1"
        );

        let mut pos =
            Position::from_fen("rnbqkbnr/pppppppp/8/4P3/8/8/PPPP1PPP/RNBQKBNR b KQkq - 0 2")
                .unwrap();
        pos.make_move(find(&pos, "d7d5"));
        assert_eq!(pos.en_passant, Square::parse("d6"));
        let ep = find(&pos, "e5d6");
        assert_eq!(ep.kind, MoveKind::EnPassant);
        let captured = pos.make_move(ep);
        assert_eq!(captured, Some(Piece::new(Color::Black, PieceKind::Pawn)));
        assert_eq!(pos.piece_at(Square::parse("d5").unwrap()), None);
    }

    #[test]
    fn castling_moves_rook_and_clears_rights() {
        let mut pos = Position::from_fen("r3k2r/8/8/8/8/8/8/R3K2R w KQkq - 0 1").unwrap();
        pos.make_move(find(&pos, "e1g1"));
        assert_eq!(
            pos.piece_at(Square::parse("f1").unwrap()),
            Some(Piece::new(Color::White, PieceKind::Rook))
        );
        assert!(!pos.castling.white_king && !pos.castling.white_queen);
        pos.make_move(find(&pos, "e8c8"));
        assert_eq!(
            pos.piece_at(Square::parse("d8").unwrap()),
            Some(Piece::new(Color::Black, PieceKind::Rook))
        );
        assert_eq!(pos.castling, crate::board::CastlingRights::NONE);
    }

    #[test]
    fn cannot_castle_through_attack() {
        // Black rook on f8 covers f1.
        let pos = Position::from_fen("4kr2/8/8/8/8/8/8/4K2R w K - 0 1").unwrap();
        assert!(legal_moves(&pos).iter().all(|m| !m.is_castle()));
    }

    #[test]
    fn pinned_piece_cannot_move() {
        let pos = Position::from_fen("4k3/4r3/8/8/8/8/4B3/4K3 w - - 0 1").unwrap();
        let e2 = Square::parse("e2").unwrap();
        assert!(legal_moves(&pos).iter().all(|m| m.from != e2));
    }

    #[test]
    fn promotion_offers_four_pieces() {
        let pos = Position::from_fen("8/P6k/8/8/8/8/8/K7 w - - 0 1").unwrap();
        let promos: Vec<_> = legal_moves(&pos)
            .into_iter()
            .filter(|m| m.promotion.is_some())
            .collect();
        assert_eq!(promos.len(), 4);
    }
}
