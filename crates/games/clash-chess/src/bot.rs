use rand::Rng;
use rand::seq::{IndexedRandom, SliceRandom};

use clash_core::game_trait::{BotSettings, Difficulty};

use crate::board::{Color, PieceKind, Position};
use crate::movegen::{Move, in_check, legal_moves};

const INF: i32 = 1_000_000;
const MATE: i32 = 100_000;

// Piece-square tables from White's point of view, a8 first.
#[rustfmt::skip]
const PAWN_TABLE: [i32; 64] = [
     0,  0,  0,  0,  0,  0,  0,  0,
    50, 50, 50, 50, 50, 50, 50, 50,
    10, 10, 20, 30, 30, 20, 10, 10,
     5,  5, 10, 25, 25, 10,  5,  5,
     0,  0,  0, 20, 20,  0,  0,  0,
     5, -5,-10,  0,  0,-10, -5,  5,
     5, 10, 10,-20,-20, 10, 10,  5,
     0,  0,  0,  0,  0,  0,  0,  0,
];
#[rustfmt::skip]
const KNIGHT_TABLE: [i32; 64] = [
    -50,-40,-30,-30,-30,-30,-40,-50,
    -40,-20,  0,  0,  0,  0,-20,-40,
    -30,  0, 10, 15, 15, 10,  0,-30,
    -30,  5, 15, 20, 20, 15,  5,-30,
    -30,  0, 15, 20, 20, 15,  0,-30,
    -30,  5, 10, 15, 15, 10,  5,-30,
    -40,-20,  0,  5,  5,  0,-20,-40,
    -50,-40,-30,-30,-30,-30,-40,-50,
];
#[rustfmt::skip]
const BISHOP_TABLE: [i32; 64] = [
    -20,-10,-10,-10,-10,-10,-10,-20,
    -10,  0,  0,  0,  0,  0,  0,-10,
    -10,  0,  5, 10, 10,  5,  0,-10,
    -10,  5,  5, 10, 10,  5,  5,-10,
    -10,  0, 10, 10, 10, 10,  0,-10,
    -10, 10, 10, 10, 10, 10, 10,-10,
    -10,  5,  0,  0,  0,  0,  5,-10,
    -20,-10,-10,-10,-10,-10,-10,-20,
];
#[rustfmt::skip]
const ROOK_TABLE: [i32; 64] = [
     0,  0,  0,  0,  0,  0,  0,  0,
     5, 10, 10, 10, 10, 10, 10,  5,
    -5,  0,  0,  0,  0,  0,  0, -5,
    -5,  0,  0,  0,  0,  0,  0, -5,
    -5,  0,  0,  0,  0,  0,  0, -5,
    -5,  0,  0,  0,  0,  0,  0, -5,
    -5,  0,  0,  0,  0,  0,  0, -5,
     0,  0,  0,  5,  5,  0,  0,  0,
];
#[rustfmt::skip]
const QUEEN_TABLE: [i32; 64] = [
    -20,-10,-10, -5, -5,-10,-10,-20,
    -10,  0,  0,  0,  0,  0,  0,-10,
    -10,  0,  5,  5,  5,  5,  0,-10,
     -5,  0,  5,  5,  5,  5,  0, -5,
      0,  0,  5,  5,  5,  5,  0, -5,
    -10,  5,  5,  5,  5,  5,  0,-10,
    -10,  0,  5,  0,  0,  0,  0,-10,
    -20,-10,-10, -5, -5,-10,-10,-20,
];
#[rustfmt::skip]
const KING_TABLE: [i32; 64] = [
    -30,-40,-40,-50,-50,-40,-40,-30,
    -30,-40,-40,-50,-50,-40,-40,-30,
    -30,-40,-40,-50,-50,-40,-40,-30,
    -30,-40,-40,-50,-50,-40,-40,-30,
    -20,-30,-30,-40,-40,-30,-30,-20,
    -10,-20,-20,-20,-20,-20,-20,-10,
     20, 20,  0,  0,  0,  0, 20, 20,
     20, 30, 10,  0,  0, 10, 30, 20,
];

type Eval = fn(&Position) -> i32;

/// Pick a legal move for the side to move. `None` only when there is none.
pub fn choose_move<R: Rng + ?Sized>(
    pos: &Position,
    difficulty: Difficulty,
    settings: &BotSettings,
    rng: &mut R,
) -> Option<Move> {
    let moves = legal_moves(pos);
    if moves.is_empty() {
        return None;
    }
    match difficulty {
        Difficulty::Easy => moves.choose(rng).copied(),
        Difficulty::Medium => {
            let depth = settings.medium_depth.max(1);
            let scored: Vec<(Move, i32)> = moves
                .into_iter()
                .map(|mv| {
                    let mut next = pos.clone();
                    next.make_move(mv);
                    (mv, -negamax(&next, depth - 1, 1, material))
                })
                .collect();
            pick_best(&scored, rng)
        },
        Difficulty::Hard => {
            let depth = settings.hard_depth.max(1);
            let mut ordered = moves;
            ordered.shuffle(rng);
            order_moves(pos, &mut ordered);
            let mut best = -INF;
            let mut scored = Vec::with_capacity(ordered.len());
            for mv in ordered {
                let mut next = pos.clone();
                next.make_move(mv);
                // Window just below the best so far keeps equal scores exact.
                let score =
                    -alpha_beta(&next, depth - 1, -INF, -(best - 1), 1, material_and_position);
                best = best.max(score);
                scored.push((mv, score));
            }
            pick_best(&scored, rng)
        },
    }
}

fn pick_best<R: Rng + ?Sized>(scored: &[(Move, i32)], rng: &mut R) -> Option<Move> {
    let best = scored.iter().map(|(_, s)| *s).max()?;
    let top: Vec<Move> = scored
        .iter()
        .filter(|(_, s)| *s == best)
        .map(|(m, _)| *m)
        .collect();
    top.choose(rng).copied()
}

/// Score of a position with no moves left, from the side to move's view.
fn terminal_score(pos: &Position, ply: i32) -> i32 {
    if in_check(pos, pos.side_to_move) {
        -MATE + ply
    } else {
        0
    }
}

fn relative(pos: &Position, eval: Eval) -> i32 {
    match pos.side_to_move {
        Color::White => eval(pos),
        Color::Black => -eval(pos),
    }
}

fn negamax(pos: &Position, depth: u8, ply: i32, eval: Eval) -> i32 {
    let moves = legal_moves(pos);
    if moves.is_empty() {
        return terminal_score(pos, ply);
    }
    if depth == 0 {
        return relative(pos, eval);
    }
    moves
        .into_iter()
        .map(|mv| {
            let mut next = pos.clone();
            next.make_move(mv);
            -negamax(&next, depth - 1, ply + 1, eval)
        })
        .max()
        .unwrap_or(0)
}

fn alpha_beta(pos: &Position, depth: u8, mut alpha: i32, beta: i32, ply: i32, eval: Eval) -> i32 {
    let mut moves = legal_moves(pos);
    if moves.is_empty() {
        return terminal_score(pos, ply);
    }
    if depth == 0 {
        return relative(pos, eval);
    }
    order_moves(pos, &mut moves);
    for mv in moves {
        let mut next = pos.clone();
        next.make_move(mv);
        let score = -alpha_beta(&next, depth - 1, -beta, -alpha, ply + 1, eval);
        if score >= beta {
            return beta;
        }
        alpha = alpha.max(score);
    }
    alpha
}

/// Captures first, most valuable victim by least valuable attacker, then
/// promotions.
fn order_moves(pos: &Position, moves: &mut [Move]) {
    moves.sort_by_key(|mv| {
        let victim = pos.piece_at(mv.to).map_or(0, |p| p.kind.value());
        let attacker = pos.piece_at(mv.from).map_or(0, |p| p.kind.value());
        let promo = mv.promotion.map_or(0, PieceKind::value);
        let capture = if victim > 0 { victim * 10 - attacker } else { 0 };
        -(capture + promo)
    });
}

/// Material balance, positive when White is ahead.
pub fn material(pos: &Position) -> i32 {
    pos.pieces()
        .map(|(_, p)| match p.color {
            Color::White => p.kind.value(),
            Color::Black => -p.kind.value(),
        })
        .sum()
}

/// Material plus piece-square bonuses, positive when White is ahead.
pub fn material_and_position(pos: &Position) -> i32 {
    pos.pieces()
        .map(|(sq, p)| {
            let index = match p.color {
                Color::White => (7 - sq.rank() as usize) * 8 + sq.file() as usize,
                Color::Black => sq.rank() as usize * 8 + sq.file() as usize,
            };
            let table = match p.kind {
                PieceKind::Pawn => &PAWN_TABLE,
                PieceKind::Knight => &KNIGHT_TABLE,
                PieceKind::Bishop => &BISHOP_TABLE,
                PieceKind::Rook => &ROOK_TABLE,
                PieceKind::Queen => &QUEEN_TABLE,
                PieceKind::King => &KING_TABLE,
            };
            let score = p.kind.value() + table[index];
            match p.color {
                Color::White => score,
                Color::Black => -score,
            }
        })
        .sum()
}
