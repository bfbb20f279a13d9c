//! Look-up tables for calculating incremental Zobrist hashes.

use crate::basetypes::*;
use lazy_static::lazy_static;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Random 64-bit constants used to build a position's Zobrist key.
///
/// Populated once from a fixed seed so that keys are reproducible across
/// runs of the same binary (required for perft cross-checks and for the
/// `tests/` scenario fixtures, which hard-code expected perft counts that
/// do not depend on a particular seed but do depend on the table being
/// stable within one process).
pub struct ZobristArrays {
    pub to_move: u64,
    pub pieces: [[[u64; 64]; 6]; 2],
    pub castling: [u64; 16],

    /// Only indices `0..8` are meaningful; the rest stay zero so that
    /// `NO_ENPASSANT_FILE` (8) can index this array without a branch.
    pub en_passant: [u64; 16],

    /// Derived from `pieces`, for the rook's jump during castling.
    pub castling_rook_move: [[u64; 2]; 2],
}

impl ZobristArrays {
    fn new() -> ZobristArrays {
        let mut rng = StdRng::seed_from_u64(0x5A6F_6272_6973_7421);

        let to_move = rng.gen();
        let mut pieces = [[[0u64; 64]; 6]; 2];
        let mut castling = [0u64; 16];
        let mut en_passant = [0u64; 16];

        for color in 0..2 {
            for piece in 0..6 {
                for square in 0..64 {
                    pieces[color][piece][square] = rng.gen();
                }
            }
        }
        for value in castling.iter_mut() {
            *value = rng.gen();
        }
        for file in 0..8 {
            en_passant[file] = rng.gen();
        }

        let mut castling_rook_move = [[0u64; 2]; 2];
        castling_rook_move[WHITE][0] = pieces[WHITE][ROOK][0] ^ pieces[WHITE][ROOK][3]; // a1-d1, kingside index 0 reused below
        castling_rook_move[WHITE][1] = pieces[WHITE][ROOK][7] ^ pieces[WHITE][ROOK][5]; // h1-f1
        castling_rook_move[BLACK][0] = pieces[BLACK][ROOK][56] ^ pieces[BLACK][ROOK][59]; // a8-d8
        castling_rook_move[BLACK][1] = pieces[BLACK][ROOK][63] ^ pieces[BLACK][ROOK][61]; // h8-f8

        ZobristArrays {
            to_move,
            pieces,
            castling,
            en_passant,
            castling_rook_move,
        }
    }
}

lazy_static! {
    pub static ref ZOBRIST: ZobristArrays = ZobristArrays::new();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distinct_keys() {
        assert_ne!(ZOBRIST.pieces[WHITE][PAWN][0], ZOBRIST.pieces[WHITE][PAWN][1]);
        assert_ne!(ZOBRIST.pieces[WHITE][PAWN][0], ZOBRIST.pieces[BLACK][PAWN][0]);
        assert_ne!(ZOBRIST.to_move, 0);
    }

    #[test]
    fn test_stable_across_calls() {
        let a = ZOBRIST.pieces[WHITE][KING][4];
        let b = ZOBRIST.pieces[WHITE][KING][4];
        assert_eq!(a, b);
    }
}
