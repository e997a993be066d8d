use rand::Rng;
use rand::seq::IndexedRandom;

use clash_core::game_trait::Difficulty;

use crate::{Board, Mark, empty_cells, winning_line};

const CENTER: usize = 4;
const CORNERS: [usize; 4] = [0, 2, 6, 8];

/// Pick a cell for `mark`. `None` only when the board is full.
pub fn choose_cell<R: Rng + ?Sized>(
    board: &Board,
    mark: Mark,
    difficulty: Difficulty,
    rng: &mut R,
) -> Option<usize> {
    let open = empty_cells(board);
    if open.is_empty() {
        return None;
    }
    match difficulty {
        Difficulty::Easy => open.choose(rng).copied(),
        Difficulty::Medium => Some(heuristic_cell(board, mark, &open, rng)),
        Difficulty::Hard => Some(best_cell(board, mark, &open, rng)),
    }
}

/// Win if possible, otherwise block, otherwise center, otherwise a corner.
fn heuristic_cell<R: Rng + ?Sized>(
    board: &Board,
    mark: Mark,
    open: &[usize],
    rng: &mut R,
) -> usize {
    let opponent = other(mark);
    if let Some(cell) = completing_cell(board, mark, open) {
        return cell;
    }
    if let Some(cell) = completing_cell(board, opponent, open) {
        return cell;
    }
    if board[CENTER].is_none() {
        return CENTER;
    }
    let corners: Vec<usize> = CORNERS
        .into_iter()
        .filter(|c| board[*c].is_none())
        .collect();
    corners
        .choose(rng)
        .or_else(|| open.choose(rng))
        .copied()
        .unwrap_or(open[0])
}

fn completing_cell(board: &Board, mark: Mark, open: &[usize]) -> Option<usize> {
    open.iter().copied().find(|&cell| {
        let mut next = *board;
        next[cell] = Some(mark);
        winning_line(&next, mark).is_some()
    })
}

/// Full minimax. Ties between equally good cells are broken at random.
fn best_cell<R: Rng + ?Sized>(board: &Board, mark: Mark, open: &[usize], rng: &mut R) -> usize {
    let mut best_score = i32::MIN;
    let mut best = Vec::new();
    for &cell in open {
        let mut next = *board;
        next[cell] = Some(mark);
        let score = -negamax(&next, other(mark), 1);
        if score > best_score {
            best_score = score;
            best.clear();
        }
        if score == best_score {
            best.push(cell);
        }
    }
    best.choose(rng).copied().unwrap_or(open[0])
}

/// Score for the side to move (`to_move`). Faster wins score higher.
fn negamax(board: &Board, to_move: Mark, depth: i32) -> i32 {
    if winning_line(board, other(to_move)).is_some() {
        return depth - 10;
    }
    let open = empty_cells(board);
    if open.is_empty() {
        return 0;
    }
    open.into_iter()
        .map(|cell| {
            let mut next = *board;
            next[cell] = Some(to_move);
            -negamax(&next, other(to_move), depth + 1)
        })
        .max()
        .unwrap_or(0)
}

fn other(mark: Mark) -> Mark {
    match mark {
        Mark::X => Mark::O,
        Mark::O => Mark::X,
    }
}
