//! Iterative-deepening alpha-beta search: aspiration windows, null-move and
//! futility pruning, late-move reductions, singular extensions, and MultiPV,
//! built on the shared transposition table and staged move ordering.

pub mod quiescence;
pub mod threading;

use crate::basetypes::*;
use crate::chess_move::Move;
use crate::eval::Evaluator;
use crate::move_order::{CounterMoves, HistoryTable, Killers, MovePicker};
use crate::position::movegen::{generate_evasions, generate_pseudo_legal_moves, is_legal};
use crate::position::Position;
use crate::tt::{Bound, PackedMove, TTEntry, Tt};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

pub const MAX_DEPTH: i32 = 63;

const R_FUT: i32 = 7;
const FUT_D: i32 = 6;
const LMR_THRESHOLD: usize = 3;
const MIN_SINGULAR_DEPTH: i32 = 8;
const SINGULAR_MARGIN: i32 = 50;

fn reverse_futility_margin(depth: i32) -> i32 {
    85 * depth
}

fn futility_margin(depth: i32) -> i32 {
    100 + 90 * depth
}

fn late_move_pruning_count(depth: i32, improving: bool) -> usize {
    let base = 3 + depth * depth;
    let capped = if improving { base } else { base / 2 };
    capped.max(1) as usize
}

/// `LMR_TABLE[depth][move_index]`, precomputed once: `floor(0.5 + ln(d)*ln(i)/2.5)`,
/// with every row for `d < 3` zeroed (too shallow to reduce).
fn lmr_reduction(depth: i32, move_index: usize) -> i32 {
    if depth < 3 || move_index < LMR_THRESHOLD {
        return 0;
    }
    let d = depth as f64;
    let i = move_index as f64;
    (0.5 + d.ln() * i.ln() / 2.5).floor() as i32
}

/// Where a node sits in the principal-variation tree, threaded through the
/// recursion so pruning that's only sound off the PV (reverse futility,
/// null-move, late-move/futility pruning) can tell the difference, and so
/// LMR can tell a believed-cut node from a believed-all node.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum NodeType {
    Root,
    Pv,
    NonPv,
}

impl NodeType {
    fn is_pv(self) -> bool {
        !matches!(self, NodeType::NonPv)
    }
}

/// Per-call mutable search state: counters and heuristics tables that
/// persist across the whole iterative-deepening run but not across a new
/// `begin_search`.
pub struct SearchContext<'a> {
    pub tt: &'a Tt,
    pub evaluator: &'a Evaluator,
    pub history: HistoryTable,
    pub killers: Killers,
    pub counter_moves: CounterMoves,
    pub nodes: AtomicU64,
    pub stop: &'a AtomicBool,
    /// Static eval recorded per ply, used to compute the `improving` flag:
    /// the position is improving if the side to move's static eval rose
    /// since its own previous turn (two plies back).
    eval_history: [i32; MAX_PLY],
    /// Root moves this search must not consider, used by MultiPV to find
    /// the second/third/... best line by re-searching with every better
    /// line found so far excluded. Empty for a normal single-PV search.
    pub excluded_root_moves: Vec<Move>,
}

impl<'a> SearchContext<'a> {
    pub fn new(tt: &'a Tt, evaluator: &'a Evaluator, stop: &'a AtomicBool) -> SearchContext<'a> {
        SearchContext {
            tt,
            evaluator,
            history: HistoryTable::new(),
            killers: Killers::new(),
            counter_moves: CounterMoves::new(),
            nodes: AtomicU64::new(0),
            stop,
            eval_history: [0; MAX_PLY],
            excluded_root_moves: Vec::new(),
        }
    }
}

/// Runs a fixed-depth alpha-beta search rooted at `pos` and returns the
/// score from the side-to-move's perspective. `pos` is restored to its
/// original state before returning.
pub fn alpha_beta(
    ctx: &mut SearchContext,
    pos: &mut Position,
    mut alpha: i32,
    beta: i32,
    depth: i32,
    ply: u32,
    last_move: Option<Move>,
    node: NodeType,
    cut_node: bool,
) -> i32 {
    ctx.nodes.fetch_add(1, Ordering::Relaxed);
    if ctx.stop.load(Ordering::Acquire) {
        return alpha;
    }

    if depth <= 0 {
        return crate::search::quiescence::quiescence(pos, alpha, beta, ply, 0, ctx.evaluator, &ctx.nodes, ctx.stop);
    }

    if ply > 0 && (pos.is_draw_by_rule() || pos.is_insufficient_material()) {
        return 0;
    }

    // Mate distance pruning: no sequence at this ply can beat a mate found closer to the root.
    let mate_in_ply = MATE_SCORE - ply as i32;
    let alpha = alpha.max(-mate_in_ply);
    let beta = beta.min(mate_in_ply);
    if alpha >= beta {
        return alpha;
    }
    let mut alpha = alpha;

    let in_check = pos.in_check();
    let key = pos.hash();

    let mut tt_move: Option<Move> = None;
    let mut tt_entry: Option<TTEntry> = None;
    if let Some(entry) = ctx.tt.probe(key, ply) {
        if let Some(packed) = entry.mv {
            tt_move = resolve_tt_move(pos, packed);
        }
        if node != NodeType::Root && entry.depth as i32 >= depth {
            match entry.bound {
                Bound::Exact => return entry.value as i32,
                Bound::Lower if entry.value as i32 >= beta => return entry.value as i32,
                Bound::Upper if (entry.value as i32) <= alpha => return entry.value as i32,
                _ => {}
            }
        }
        tt_entry = Some(entry);
    }

    let static_eval = if in_check { -MATE_SCORE + ply as i32 } else { ctx.evaluator.evaluate(pos) };
    let ply_idx = (ply as usize).min(MAX_PLY - 1);
    let improving = !in_check && ply_idx >= 2 && static_eval > ctx.eval_history[ply_idx - 2];
    ctx.eval_history[ply_idx] = static_eval;

    let non_pv = node == NodeType::NonPv;

    if non_pv && !in_check && depth < R_FUT && beta.abs() < MATE_IN_MAX_PLY {
        if static_eval - reverse_futility_margin(depth) >= beta {
            return static_eval;
        }
    }

    if non_pv && !in_check && depth >= 3 && beta.abs() < MATE_IN_MAX_PLY && pos.has_non_pawn_material(pos.to_move()) {
        let r = 2 + depth / 4;
        let prev_ep = pos.make_null_move();
        let score = -alpha_beta(ctx, pos, -beta, -beta + 1, depth - 1 - r, ply + 1, None, NodeType::NonPv, true);
        pos.unmake_null_move(prev_ep);
        if score >= beta {
            return beta;
        }
    }

    if tt_move.is_none() && depth >= 4 {
        // Internal iterative deepening: a shallow search to populate a move
        // to try first when the table has nothing for this node.
        alpha_beta(ctx, pos, alpha, beta, depth - 2, ply, last_move, node, cut_node);
        if let Some(entry) = ctx.tt.probe(key, ply) {
            if let Some(packed) = entry.mv {
                tt_move = resolve_tt_move(pos, packed);
            }
        }
    }

    let killers = ctx.killers.get(ply as usize);
    let counter_move = last_move.and_then(|m| ctx.counter_moves.get(m.piece(), m.to_square()));
    let picker = MovePicker::new(pos, in_check, tt_move, killers, counter_move, &ctx.history);

    let mut best_score = -MATE_SCORE;
    let mut best_move: Option<Move> = None;
    let mut move_index = 0usize;
    let mut tried_quiets: Vec<Move> = Vec::new();
    let original_alpha = alpha;
    let mut any_legal_move = false;

    for m in picker {
        if !is_legal(pos, m) {
            continue;
        }
        any_legal_move = true;
        if ply == 0 && ctx.excluded_root_moves.contains(&m) {
            continue;
        }

        let mut extension = 0;
        if depth >= MIN_SINGULAR_DEPTH && move_index == 0 && Some(m) == tt_move {
            if let Some(entry) = tt_entry {
                let tt_value = entry.value as i32;
                if entry.bound == Bound::Lower && entry.depth as i32 >= depth - 3 && tt_value.abs() < MATE_IN_MAX_PLY {
                    let reduced_beta = tt_value - SINGULAR_MARGIN;
                    pos.make_move(m);
                    let verify = -alpha_beta(
                        ctx,
                        pos,
                        -reduced_beta - 1,
                        -reduced_beta,
                        depth / 2,
                        ply + 1,
                        Some(m),
                        NodeType::NonPv,
                        true,
                    );
                    pos.unmake_move(m);
                    if verify < reduced_beta {
                        extension = if depth >= 12 { 2 } else { 1 };
                    }
                }
            }
        }

        if non_pv && !in_check && !m.is_capture() && move_index >= late_move_pruning_count(depth, improving) && depth <= FUT_D {
            move_index += 1;
            continue;
        }

        if non_pv && !in_check && !m.is_capture() && depth <= FUT_D && static_eval + futility_margin(depth) <= alpha && best_move.is_some() {
            move_index += 1;
            continue;
        }

        pos.make_move(m);
        let child_in_check = pos.in_check();
        if child_in_check {
            extension = (extension + 1).min(2);
        }
        let new_depth = depth - 1 + extension;

        let child_node = if node.is_pv() { NodeType::Pv } else { NodeType::NonPv };

        let score = if move_index == 0 {
            -alpha_beta(ctx, pos, -beta, -alpha, new_depth, ply + 1, Some(m), child_node, false)
        } else {
            let mut reduction = if !m.is_capture() && !child_in_check { lmr_reduction(depth, move_index) } else { 0 };
            if reduction > 0 {
                if improving {
                    reduction -= 1;
                }
                if node.is_pv() {
                    reduction -= 1;
                }
                if cut_node {
                    reduction += 1;
                }
                reduction = reduction.clamp(0, (new_depth - 1).max(0));
            }
            let reduced_depth = (new_depth - reduction).max(0);
            let mut s = -alpha_beta(ctx, pos, -alpha - 1, -alpha, reduced_depth, ply + 1, Some(m), NodeType::NonPv, !cut_node);
            if s > alpha && reduction > 0 {
                s = -alpha_beta(ctx, pos, -alpha - 1, -alpha, new_depth, ply + 1, Some(m), NodeType::NonPv, !cut_node);
            }
            if s > alpha && s < beta && node.is_pv() {
                s = -alpha_beta(ctx, pos, -beta, -alpha, new_depth, ply + 1, Some(m), NodeType::Pv, false);
            }
            s
        };
        pos.unmake_move(m);

        if !m.is_capture() {
            tried_quiets.push(m);
        }

        if score > best_score {
            best_score = score;
            best_move = Some(m);
        }
        if score > alpha {
            alpha = score;
        }
        if alpha >= beta {
            if !m.is_capture() {
                ctx.killers.update(ply as usize, m);
                ctx.history.update(m.color(), m, &tried_quiets, depth);
                if let Some(prev) = last_move {
                    ctx.counter_moves.update(prev.piece(), prev.to_square(), m);
                }
            }
            break;
        }
        move_index += 1;
    }

    if best_move.is_none() {
        if ply == 0 && any_legal_move {
            // Every legal root move is in ctx.excluded_root_moves: MultiPV
            // asked for more lines than the position has, not a genuine
            // mate/stalemate. The caller is expected to cap multipv at the
            // root's legal move count before reaching this state.
            return 0;
        }
        return if in_check { -MATE_SCORE + ply as i32 } else { 0 };
    }

    let bound = if best_score <= original_alpha {
        Bound::Upper
    } else if best_score >= beta {
        Bound::Lower
    } else {
        Bound::Exact
    };
    let packed = best_move.and_then(PackedMove::from_move);
    ctx.tt.store(key, ply, packed, best_score, depth.min(127) as i8, bound);

    best_score
}

fn resolve_tt_move(pos: &Position, packed: PackedMove) -> Option<Move> {
    let mut list = crate::chess_move::MoveList::new();
    if pos.in_check() {
        generate_evasions(pos, &mut list);
    } else {
        generate_pseudo_legal_moves(pos, &mut list);
    }
    packed.resolve(&list)
}

/// Drives iterative deepening with aspiration windows, widening on
/// fail-high/fail-low until the bound is no longer hit or the window has
/// opened to full width. `on_depth(depth, score, best_move, nodes_so_far)`
/// is invoked once after each depth completes (not on a depth abandoned
/// mid-search by the stop flag), so a caller can emit progress without
/// waiting for the whole iterative-deepening run to finish.
pub fn search_iterative(
    ctx: &mut SearchContext,
    pos: &mut Position,
    max_depth: i32,
    mut on_depth: impl FnMut(i32, i32, Option<Move>, u64),
) -> (i32, Option<Move>) {
    let mut score = 0;
    let mut best_move = None;

    for depth in 1..=max_depth {
        if ctx.stop.load(Ordering::Acquire) {
            break;
        }
        let mut window = if depth <= 4 { MATE_SCORE } else { 25 };
        let mut alpha = if depth <= 4 { -MATE_SCORE } else { score - window };
        let mut beta = if depth <= 4 { MATE_SCORE } else { score + window };

        loop {
            let value = alpha_beta(ctx, pos, alpha, beta, depth, 0, None, NodeType::Root, false);
            if ctx.stop.load(Ordering::Acquire) {
                break;
            }
            if value <= alpha {
                window = (window + 3 * window / 8).min(1_000_000);
                alpha = (value - window).max(-MATE_SCORE);
            } else if value >= beta {
                window = (window + 3 * window / 8).min(1_000_000);
                beta = (value + window).min(MATE_SCORE);
            } else {
                score = value;
                break;
            }
        }

        if ctx.stop.load(Ordering::Acquire) {
            break;
        }

        if let Some(entry) = ctx.tt.probe(pos.hash(), 0) {
            if let Some(packed) = entry.mv {
                best_move = resolve_tt_move(pos, packed);
            }
        }

        on_depth(depth, score, best_move, ctx.nodes.load(Ordering::Relaxed));
    }

    (score, best_move)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::Weights;

    #[test]
    fn test_finds_mate_in_one() {
        let mut pos = Position::from_fen("6k1/5ppp/8/8/8/8/8/R5K1 w - - 0 1").unwrap();
        let evaluator = Evaluator::new(Weights::default());
        let tt = Tt::new(1);
        let stop = AtomicBool::new(false);
        let mut ctx = SearchContext::new(&tt, &evaluator, &stop);
        let (score, best_move) = search_iterative(&mut ctx, &mut pos, 3, |_, _, _, _| {});
        assert!(score >= MATE_SCORE - MAX_PLY as i32, "expected mate score, got {score}");
        assert!(best_move.is_some());
    }

    #[test]
    fn test_prefers_winning_material() {
        let mut pos = Position::from_fen("4k3/8/8/3p4/4P3/8/8/4K3 w - - 0 1").unwrap();
        let evaluator = Evaluator::new(Weights::default());
        let tt = Tt::new(1);
        let stop = AtomicBool::new(false);
        let mut ctx = SearchContext::new(&tt, &evaluator, &stop);
        let (score, _) = search_iterative(&mut ctx, &mut pos, 4, |_, _, _, _| {});
        assert!(score > 0);
    }

    #[test]
    fn test_stalemate_scores_as_draw() {
        let mut pos = Position::from_fen("7k/5Q2/6K1/8/8/8/8/8 b - - 0 1").unwrap();
        let evaluator = Evaluator::new(Weights::default());
        let tt = Tt::new(1);
        let stop = AtomicBool::new(false);
        let mut ctx = SearchContext::new(&tt, &evaluator, &stop);
        let score = alpha_beta(&mut ctx, &mut pos, -MATE_SCORE, MATE_SCORE, 1, 0, None, NodeType::Root, false);
        assert_eq!(score, 0);
    }

    #[test]
    fn test_position_restored_after_search() {
        let mut pos = Position::from_fen("r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1").unwrap();
        let fen_before = pos.to_fen();
        let evaluator = Evaluator::new(Weights::default());
        let tt = Tt::new(1);
        let stop = AtomicBool::new(false);
        let mut ctx = SearchContext::new(&tt, &evaluator, &stop);
        search_iterative(&mut ctx, &mut pos, 3, |_, _, _, _| {});
        assert_eq!(pos.to_fen(), fen_before);
    }

    // Invariant 5: alpha_beta always returns a score in [-MATE_SCORE,
    // MATE_SCORE], across a small corpus of seed positions crossed with
    // search depth.
    proptest::proptest! {
        #[test]
        fn prop_alpha_beta_score_is_mate_bounded(seed_index in 0usize..4, depth in 1i32..4) {
            const SEEDS: [&str; 4] = [
                "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
                "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
                "6k1/5ppp/8/8/8/8/8/R5K1 w - - 0 1",
                "7k/5Q2/6K1/8/8/8/8/8 b - - 0 1",
            ];
            let mut pos = Position::from_fen(SEEDS[seed_index]).unwrap();
            let evaluator = Evaluator::new(Weights::default());
            let tt = Tt::new(1);
            let stop = AtomicBool::new(false);
            let mut ctx = SearchContext::new(&tt, &evaluator, &stop);
            let score = alpha_beta(&mut ctx, &mut pos, -MATE_SCORE, MATE_SCORE, depth, 0, None, NodeType::Root, false);
            proptest::prop_assert!(score >= -MATE_SCORE && score <= MATE_SCORE);
        }
    }
}
