//! Pseudo-legal and legal move generation, perft, and the specialized
//! capture/evasion/check generators used by search and quiescence.
//!
//! "Pseudo-legal" means every placement rule is respected except that the
//! side to move's king may be left in check; [`is_legal`] (or one of the
//! `generate_legal_*` wrappers) filters those out incrementally, without
//! playing the move, using the king's destination square and the position's
//! pin bitboard.

use super::Position;
use crate::basetypes::*;
use crate::bitsets::*;
use crate::board_geometry::GEOMETRY;
use crate::castling_rights::{CASTLE_KINGSIDE, CASTLE_QUEENSIDE};
use crate::chess_move::*;

const PROMOTION_PIECES: [PieceType; 4] = [QUEEN, ROOK, BISHOP, KNIGHT];

/// Appends every pseudo-legal move in `pos` to `list`.
pub fn generate_pseudo_legal_moves(pos: &Position, list: &mut MoveList) {
    generate_pawn_moves_filtered(pos, list, false);
    for &piece in &[KNIGHT, BISHOP, ROOK, QUEEN, KING] {
        generate_piece_moves_filtered(pos, piece, list, false);
    }
    generate_castling_moves(pos, list);
}

/// Appends only pseudo-legal captures and promotions (including quiet
/// promotions, which quiescence search treats as tactically noisy).
pub fn generate_captures(pos: &Position, list: &mut MoveList) {
    generate_pawn_moves_filtered(pos, list, true);
    for &piece in &[KNIGHT, BISHOP, ROOK, QUEEN, KING] {
        generate_piece_moves_filtered(pos, piece, list, true);
    }
}

/// Appends pseudo-legal non-capturing, non-promoting moves that give check.
/// Used by quiescence search to extend one extra ply before cutting off.
pub fn generate_checks(pos: &mut Position, list: &mut MoveList) {
    let mut quiet = MoveList::new();
    generate_pseudo_legal_moves(pos, &mut quiet);
    let us = pos.to_move();
    let them = opposite(us);
    for &m in quiet.iter() {
        if m.is_capture() || m.flag() == MOVE_PROMOTION {
            continue;
        }
        pos.make_move(m);
        let gives_check = pos.is_square_attacked(pos.king_square(them), us);
        pos.unmake_move(m);
        if gives_check && is_legal(pos, m) {
            list.push(m);
        }
    }
}

/// Appends pseudo-legal moves that escape check: all king moves, plus (if
/// exactly one checker) captures of the checker and interpositions on the
/// line between the checker and the king. In double check only king moves
/// are generated, since no single move can deal with both checkers.
pub fn generate_evasions(pos: &Position, list: &mut MoveList) {
    generate_piece_moves_filtered(pos, KING, list, false);

    let us = pos.to_move();
    let checkers = pos.checkers();
    if pop_count(checkers) != 1 {
        return;
    }
    let king_sq = pos.king_square(us);
    let checker_sq = bitscan_forward(checkers);
    let checker_piece = pos.piece_at(checker_sq).map(|(p, _)| p).unwrap();
    let target = if matches!(checker_piece, ROOK | BISHOP | QUEEN) {
        GEOMETRY.between_bb[king_sq][checker_sq] | bb(checker_sq)
    } else {
        bb(checker_sq)
    };

    let mut candidates = MoveList::new();
    generate_pawn_moves_filtered(pos, &mut candidates, false);
    for &piece in &[KNIGHT, BISHOP, ROOK, QUEEN] {
        generate_piece_moves_filtered(pos, piece, &mut candidates, false);
    }
    for &m in candidates.iter() {
        let escapes = if m.flag() == MOVE_ENPASSANT {
            let captured_sq = square(file(m.to_square()), rank(m.from_square()));
            captured_sq == checker_sq
        } else {
            bb(m.to_square()) & target != 0
        };
        if escapes {
            list.push(m);
        }
    }
}

/// Tests whether `m` leaves the mover's own king in check, without playing
/// it. `m` must be pseudo-legal. Three cases:
///
/// - The king itself is moving: the destination must not be attacked once
///   the king has vacated its origin square (a slider's attack along the
///   vacated square must now reach through to the destination).
/// - An en passant capture: removing both the capturing and captured pawn
///   from the same rank can expose a discovered check a plain pin bitboard
///   doesn't model, so that occupancy change is checked directly.
/// - Anything else: legal unless the moving piece is pinned to its own
///   king and the move leaves the pin line.
pub fn is_legal(pos: &Position, m: Move) -> bool {
    let us = m.color();
    let them = opposite(us);
    let king_sq = pos.king_square(us);
    let from = m.from_square();
    let to = m.to_square();

    if from == king_sq {
        let occ_after = (pos.occupied() & !bb(from)) | bb(to);
        return !pos.is_square_attacked_with_occupancy(to, them, occ_after);
    }

    if m.flag() == MOVE_ENPASSANT {
        let captured_sq = square(file(to), rank(from));
        let occ_after = (pos.occupied() & !bb(from) & !bb(captured_sq)) | bb(to);
        return !pos.is_square_attacked_with_occupancy(king_sq, them, occ_after);
    }

    let pinned = pos.pinned();
    if pinned & bb(from) == 0 {
        return true;
    }
    GEOMETRY.line_bb[king_sq][from] & bb(to) != 0
}

/// Appends every fully legal move in `pos` to `list`.
pub fn generate_legal_moves(pos: &mut Position, list: &mut MoveList) {
    let mut pseudo = MoveList::new();
    if pos.in_check() {
        generate_evasions(pos, &mut pseudo);
    } else {
        generate_pseudo_legal_moves(pos, &mut pseudo);
    }
    for &m in pseudo.iter() {
        if is_legal(pos, m) {
            list.push(m);
        }
    }
}

/// Counts the leaf nodes of the full legal game tree to `depth` plies.
/// Used by the test suite to cross-check move generation against known
/// perft values for a handful of reference positions.
pub fn perft(pos: &mut Position, depth: u32) -> u64 {
    if depth == 0 {
        return 1;
    }
    let mut moves = MoveList::new();
    generate_legal_moves(pos, &mut moves);
    if depth == 1 {
        return moves.len() as u64;
    }
    let mut nodes = 0u64;
    for &m in moves.iter() {
        pos.make_move(m);
        nodes += perft(pos, depth - 1);
        pos.unmake_move(m);
    }
    nodes
}

fn generate_piece_moves_filtered(pos: &Position, piece: PieceType, list: &mut MoveList, captures_only: bool) {
    let us = pos.to_move();
    let own = pos.color_bb()[us];
    let occupied = pos.occupied();
    let enemy = pos.color_bb()[opposite(us)];
    for from in BitboardIter(pos.piece_type_bb()[piece] & own) {
        let attacks = GEOMETRY.piece_attacks_from(occupied, piece, from, us);
        let mut targets = attacks & !own;
        if captures_only {
            targets &= enemy;
        }
        for to in BitboardIter(targets) {
            let captured = pos.piece_at(to).map(|(p, _)| p).unwrap_or(NO_PIECE);
            list.push(Move::new(us, piece, from, to, MOVE_NORMAL, captured, 0));
        }
    }
}

fn generate_pawn_moves_filtered(pos: &Position, list: &mut MoveList, captures_only: bool) {
    let us = pos.to_move();
    let them = opposite(us);
    let own_pawns = pos.piece_type_bb()[PAWN] & pos.color_bb()[us];
    let occupied = pos.occupied();
    let enemy = pos.color_bb()[them];
    let (push_dir, start_rank, promo_rank): (i32, Rank, Rank) =
        if us == WHITE { (8, RANK_2, RANK_8) } else { (-8, RANK_7, RANK_1) };

    for from in BitboardIter(own_pawns) {
        let from_rank = rank(from);

        let one_step = (from as i32 + push_dir) as Square;
        if bb(one_step) & occupied == 0 {
            let promotes = rank(one_step) == promo_rank;
            if !captures_only || promotes {
                push_pawn_move(list, us, from, one_step, promo_rank, NO_PIECE);
            }
            if !captures_only && from_rank == start_rank {
                let two_step = (from as i32 + 2 * push_dir) as Square;
                if bb(two_step) & occupied == 0 {
                    list.push(Move::new(us, PAWN, from, two_step, MOVE_DOUBLE_PUSH, NO_PIECE, 0));
                }
            }
        }

        let attacks = GEOMETRY.pawn_attacks[us][from];
        for to in BitboardIter(attacks & enemy) {
            let captured = pos.piece_at(to).map(|(p, _)| p).unwrap_or(NO_PIECE);
            push_pawn_move(list, us, from, to, promo_rank, captured);
        }

        if pos.en_passant_file() < 8 {
            let ep_rank = if us == WHITE { RANK_6 } else { RANK_3 };
            let ep_sq = square(pos.en_passant_file(), ep_rank);
            if attacks & bb(ep_sq) != 0 {
                list.push(Move::new(us, PAWN, from, ep_sq, MOVE_ENPASSANT, NO_PIECE, 0));
            }
        }
    }
}

fn push_pawn_move(list: &mut MoveList, us: Color, from: Square, to: Square, promo_rank: Rank, captured: PieceType) {
    if rank(to) == promo_rank {
        for &promo in &PROMOTION_PIECES {
            list.push(Move::new(us, PAWN, from, to, MOVE_PROMOTION, captured, Move::promotion_code_from_piece(promo)));
        }
    } else {
        list.push(Move::new(us, PAWN, from, to, MOVE_NORMAL, captured, 0));
    }
}

fn generate_castling_moves(pos: &Position, list: &mut MoveList) {
    let us = pos.to_move();
    let them = opposite(us);
    if pos.in_check() {
        return;
    }
    let occupied = pos.occupied();

    let (king_from, kingside_to, kingside_empty, kingside_safe) = if us == WHITE {
        (4usize, 6usize, bb(5) | bb(6), [4usize, 5, 6])
    } else {
        (60usize, 62usize, bb(61) | bb(62), [60usize, 61, 62])
    };
    if pos.castling().can_castle(us, CASTLE_KINGSIDE)
        && occupied & kingside_empty == 0
        && kingside_safe.iter().all(|&sq| !pos.is_square_attacked(sq, them))
    {
        list.push(Move::new(us, KING, king_from, kingside_to, MOVE_CASTLING, NO_PIECE, 0));
    }

    let (queenside_to, queenside_empty, queenside_safe) = if us == WHITE {
        (2usize, bb(1) | bb(2) | bb(3), [4usize, 3, 2])
    } else {
        (58usize, bb(57) | bb(58) | bb(59), [60usize, 59, 58])
    };
    if pos.castling().can_castle(us, CASTLE_QUEENSIDE)
        && occupied & queenside_empty == 0
        && queenside_safe.iter().all(|&sq| !pos.is_square_attacked(sq, them))
    {
        list.push(Move::new(us, KING, king_from, queenside_to, MOVE_CASTLING, NO_PIECE, 0));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_position_move_count() {
        let mut pos = Position::start_position();
        let mut moves = MoveList::new();
        generate_legal_moves(&mut pos, &mut moves);
        assert_eq!(moves.len(), 20);
    }

    #[test]
    fn test_perft_start_position_shallow() {
        let mut pos = Position::start_position();
        assert_eq!(perft(&mut pos, 1), 20);
        assert_eq!(perft(&mut pos, 2), 400);
        assert_eq!(perft(&mut pos, 3), 8902);
    }

    #[test]
    #[ignore] // slow: exercises the full magic attack tables to depth 4-6
    fn test_perft_start_position_deep() {
        let mut pos = Position::start_position();
        assert_eq!(perft(&mut pos, 4), 197281);
        assert_eq!(perft(&mut pos, 5), 4865609);
        assert_eq!(perft(&mut pos, 6), 119060324);
    }

    #[test]
    #[ignore] // slow
    fn test_perft_kiwipete() {
        let mut pos =
            Position::from_fen("r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1").unwrap();
        assert_eq!(perft(&mut pos, 3), 97862);
    }

    #[test]
    #[ignore] // slow
    fn test_perft_position_three() {
        let mut pos = Position::from_fen("8/2p5/3p4/KP5r/1R3p1k/8/4P1P1/8 w - - 0 1").unwrap();
        assert_eq!(perft(&mut pos, 4), 422333);
    }

    #[test]
    fn test_en_passant_generated() {
        let mut pos = Position::from_fen("4k3/8/8/8/3pP3/8/8/4K3 b - e3 0 1").unwrap();
        let mut moves = MoveList::new();
        generate_legal_moves(&mut pos, &mut moves);
        assert!(moves
            .iter()
            .any(|m| m.flag() == MOVE_ENPASSANT && m.from_square() == square(FILE_D, RANK_4)));
    }

    #[test]
    fn test_castling_generated_when_clear() {
        let mut pos = Position::from_fen("r3k2r/8/8/8/8/8/8/R3K2R w KQkq - 0 1").unwrap();
        let mut moves = MoveList::new();
        generate_legal_moves(&mut pos, &mut moves);
        let castles: Vec<&Move> = moves.iter().filter(|m| m.flag() == MOVE_CASTLING).collect();
        assert_eq!(castles.len(), 2);
    }

    #[test]
    fn test_castling_blocked_by_check() {
        // Black rook on e-file pins the castling path through check.
        let mut pos = Position::from_fen("4r3/8/8/8/8/8/8/R3K2R w KQ - 0 1").unwrap();
        let mut moves = MoveList::new();
        generate_legal_moves(&mut pos, &mut moves);
        assert!(!moves.iter().any(|m| m.flag() == MOVE_CASTLING));
    }

    #[test]
    fn test_check_evasion_restricts_to_escapes() {
        // White king on e1 in check from a rook on e8; only moves that
        // block on the e-file, capture the rook, or move the king survive.
        let mut pos = Position::from_fen("4r1k1/8/8/8/8/8/8/4K3 w - - 0 1").unwrap();
        assert!(pos.in_check());
        let mut moves = MoveList::new();
        generate_legal_moves(&mut pos, &mut moves);
        for &m in moves.iter() {
            pos.make_move(m);
            let still_in_check = pos.is_square_attacked(pos.king_square(WHITE), BLACK);
            pos.unmake_move(m);
            assert!(!still_in_check);
        }
    }

    #[test]
    fn test_pinned_piece_cannot_move_off_line() {
        // White bishop on d2 is pinned by the black bishop on a5 against
        // the white king on e1; moving it off the a5-e1 diagonal is illegal.
        let mut pos = Position::from_fen("4k3/8/8/b7/8/8/3B4/4K3 w - - 0 1").unwrap();
        let mut moves = MoveList::new();
        generate_legal_moves(&mut pos, &mut moves);
        assert!(!moves
            .iter()
            .any(|m| m.from_square() == square(FILE_D, RANK_2) && m.to_square() == square(FILE_D, RANK_3)));
    }
}
