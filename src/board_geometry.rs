//! Attack tables: knight/king/pawn attacks, the `between` table, and magic
//! bitboards for sliding-piece attacks.
//!
//! All tables are built once, lazily, behind [`lazy_static`] and are
//! read-only afterwards. Sliding attacks use the classic magic-bitboard
//! technique: a collision-free multiplier is searched for at start-up for
//! each square, and flat attack tables are indexed by `(occupancy & mask)
//! * magic >> shift`.

use crate::basetypes::*;
use crate::bitsets::*;
use lazy_static::lazy_static;
use rand::rngs::SmallRng;
use rand::{RngCore, SeedableRng};

const ROOK_DELTAS: [(i8, i8); 4] = [(0, 1), (1, 0), (0, -1), (-1, 0)];
const BISHOP_DELTAS: [(i8, i8); 4] = [(1, 1), (1, -1), (-1, 1), (-1, -1)];

/// Sum over all squares of `2^(relevant rook occupancy bits on that square)`.
const ROOK_TABLE_SIZE: usize = 102_400;
/// Sum over all squares of `2^(relevant bishop occupancy bits on that square)`.
const BISHOP_TABLE_SIZE: usize = 5_248;

pub struct BoardGeometry {
    pub knight_attacks: [Bitboard; 64],
    pub king_attacks: [Bitboard; 64],
    pub pawn_attacks: [[Bitboard; 64]; 2],
    pub between_bb: [[Bitboard; 64]; 64],
    pub line_bb: [[Bitboard; 64]; 64],

    rook_masks: [Bitboard; 64],
    bishop_masks: [Bitboard; 64],
    rook_magics: [u64; 64],
    bishop_magics: [u64; 64],
    rook_shifts: [u32; 64],
    bishop_shifts: [u32; 64],
    rook_offsets: [usize; 64],
    bishop_offsets: [usize; 64],
    rook_attacks: Vec<Bitboard>,
    bishop_attacks: Vec<Bitboard>,
}

impl BoardGeometry {
    fn new() -> BoardGeometry {
        let mut knight_attacks = [0u64; 64];
        let mut king_attacks = [0u64; 64];
        let mut pawn_attacks = [[0u64; 64]; 2];
        let mut between_bb = [[0u64; 64]; 64];
        let mut line_bb = [[0u64; 64]; 64];

        for sq in 0..64 {
            knight_attacks[sq] = leaper_attacks(sq, &KNIGHT_DELTAS);
            king_attacks[sq] = leaper_attacks(sq, &KING_DELTAS);
            pawn_attacks[WHITE][sq] = leaper_attacks(sq, &[(1, 1), (1, -1)]);
            pawn_attacks[BLACK][sq] = leaper_attacks(sq, &[(-1, 1), (-1, -1)]);
        }

        for from in 0..64 {
            for to in 0..64 {
                if from == to {
                    continue;
                }
                if let Some((between, line)) = ray_between(from, to) {
                    between_bb[from][to] = between;
                    line_bb[from][to] = line;
                }
            }
        }

        let rook_masks: [Bitboard; 64] =
            core::array::from_fn(|sq| relevant_occupancy_mask(sq, &ROOK_DELTAS));
        let bishop_masks: [Bitboard; 64] =
            core::array::from_fn(|sq| relevant_occupancy_mask(sq, &BISHOP_DELTAS));

        let mut rook_magics = [0u64; 64];
        let mut bishop_magics = [0u64; 64];
        let mut rook_shifts = [0u32; 64];
        let mut bishop_shifts = [0u32; 64];
        let mut rook_offsets = [0usize; 64];
        let mut bishop_offsets = [0usize; 64];
        let mut rook_attacks = vec![0u64; ROOK_TABLE_SIZE];
        let mut bishop_attacks = vec![0u64; BISHOP_TABLE_SIZE];

        let mut rng = SmallRng::seed_from_u64(0xD10FA_u64);
        let mut rook_offset = 0usize;
        for sq in 0..64 {
            let mask = rook_masks[sq];
            let (magic, shift) = find_magic(sq, mask, &ROOK_DELTAS, &mut rng, &mut rook_attacks[rook_offset..], None);
            rook_magics[sq] = magic;
            rook_shifts[sq] = shift;
            rook_offsets[sq] = rook_offset;
            rook_offset += 1 << (64 - shift);
        }
        debug_assert_eq!(rook_offset, ROOK_TABLE_SIZE);

        let mut bishop_offset = 0usize;
        for sq in 0..64 {
            let mask = bishop_masks[sq];
            let (magic, shift) = find_magic(sq, mask, &BISHOP_DELTAS, &mut rng, &mut bishop_attacks[bishop_offset..], None);
            bishop_magics[sq] = magic;
            bishop_shifts[sq] = shift;
            bishop_offsets[sq] = bishop_offset;
            bishop_offset += 1 << (64 - shift);
        }
        debug_assert_eq!(bishop_offset, BISHOP_TABLE_SIZE);

        BoardGeometry {
            knight_attacks,
            king_attacks,
            pawn_attacks,
            between_bb,
            line_bb,
            rook_masks,
            bishop_masks,
            rook_magics,
            bishop_magics,
            rook_shifts,
            bishop_shifts,
            rook_offsets,
            bishop_offsets,
            rook_attacks,
            bishop_attacks,
        }
    }

    #[inline]
    fn rook_index(&self, sq: Square, occupied: Bitboard) -> usize {
        let masked = occupied & self.rook_masks[sq];
        self.rook_offsets[sq] + ((masked.wrapping_mul(self.rook_magics[sq])) >> self.rook_shifts[sq]) as usize
    }

    #[inline]
    fn bishop_index(&self, sq: Square, occupied: Bitboard) -> usize {
        let masked = occupied & self.bishop_masks[sq];
        self.bishop_offsets[sq] + ((masked.wrapping_mul(self.bishop_magics[sq])) >> self.bishop_shifts[sq]) as usize
    }

    #[inline]
    pub fn rook_attacks(&self, sq: Square, occupied: Bitboard) -> Bitboard {
        self.rook_attacks[self.rook_index(sq, occupied)]
    }

    #[inline]
    pub fn bishop_attacks(&self, sq: Square, occupied: Bitboard) -> Bitboard {
        self.bishop_attacks[self.bishop_index(sq, occupied)]
    }

    #[inline]
    pub fn queen_attacks(&self, sq: Square, occupied: Bitboard) -> Bitboard {
        self.rook_attacks(sq, occupied) | self.bishop_attacks(sq, occupied)
    }

    /// Dispatches to the right attack table for `piece` (king/knight/pawn
    /// are occupancy-independent; sliders consult `occupied`). `PAWN` here
    /// means "pawn capture attacks for `color`", since pushes are not
    /// attacks.
    #[inline]
    pub fn piece_attacks_from(&self, occupied: Bitboard, piece: PieceType, sq: Square, color: Color) -> Bitboard {
        match piece {
            KING => self.king_attacks[sq],
            KNIGHT => self.knight_attacks[sq],
            ROOK => self.rook_attacks(sq, occupied),
            BISHOP => self.bishop_attacks(sq, occupied),
            QUEEN => self.queen_attacks(sq, occupied),
            PAWN => self.pawn_attacks[color][sq],
            _ => 0,
        }
    }
}

lazy_static! {
    pub static ref GEOMETRY: BoardGeometry = BoardGeometry::new();
}

/// Returns all pieces of `color` that attack `square`, given per-piece-type
/// occupancy bitboards and the total board occupancy. Pure function, as
/// required by the attack-table contract.
#[allow(clippy::too_many_arguments)]
#[inline]
pub fn attacks_to(
    geometry: &BoardGeometry,
    piece_type_bb: &[Bitboard; 6],
    color_bb: &[Bitboard; 2],
    occupied: Bitboard,
    square: Square,
    by_color: Color,
) -> Bitboard {
    let occ_by_color = color_bb[by_color];
    (geometry.rook_attacks(square, occupied) & occ_by_color & (piece_type_bb[ROOK] | piece_type_bb[QUEEN]))
        | (geometry.bishop_attacks(square, occupied) & occ_by_color & (piece_type_bb[BISHOP] | piece_type_bb[QUEEN]))
        | (geometry.knight_attacks[square] & occ_by_color & piece_type_bb[KNIGHT])
        | (geometry.king_attacks[square] & occ_by_color & piece_type_bb[KING])
        | (geometry.pawn_attacks[1 ^ by_color][square] & occ_by_color & piece_type_bb[PAWN])
}

#[inline]
pub fn is_attacked(
    geometry: &BoardGeometry,
    piece_type_bb: &[Bitboard; 6],
    color_bb: &[Bitboard; 2],
    occupied: Bitboard,
    square: Square,
    by_color: Color,
) -> bool {
    attacks_to(geometry, piece_type_bb, color_bb, occupied, square, by_color) != 0
}

const KNIGHT_DELTAS: [(i8, i8); 8] = [
    (1, 2), (2, 1), (2, -1), (1, -2), (-1, -2), (-2, -1), (-2, 1), (-1, 2),
];
const KING_DELTAS: [(i8, i8); 8] = [
    (1, 0), (1, 1), (0, 1), (-1, 1), (-1, 0), (-1, -1), (0, -1), (1, -1),
];

fn leaper_attacks(sq: usize, deltas: &[(i8, i8)]) -> Bitboard {
    let from_rank = (sq / 8) as i8;
    let from_file = (sq % 8) as i8;
    let mut bb = 0u64;
    for &(dr, df) in deltas {
        let r = from_rank + dr;
        let f = from_file + df;
        if (0..8).contains(&r) && (0..8).contains(&f) {
            bb |= 1u64 << (r * 8 + f);
        }
    }
    bb
}

/// Returns `(between, line)`: the squares strictly between `from` and `to`
/// (empty if they do not share a rank/file/diagonal), and the full line
/// through both squares extended to the board edges (used for pin
/// detection), if they share a line.
fn ray_between(from: usize, to: usize) -> Option<(Bitboard, Bitboard)> {
    let fr = (from / 8) as i8;
    let ff = (from % 8) as i8;
    let tr = (to / 8) as i8;
    let tf = (to % 8) as i8;
    let dr = (tr - fr).signum();
    let df = (tf - ff).signum();
    if dr == 0 && df == 0 {
        return None;
    }
    let same_rank = dr == 0;
    let same_file = df == 0;
    let same_diag = (tr - fr).abs() == (tf - ff).abs();
    if !(same_rank || same_file || same_diag) {
        return None;
    }
    let mut between = 0u64;
    let mut r = fr + dr;
    let mut f = ff + df;
    while (r, f) != (tr, tf) {
        between |= 1u64 << (r * 8 + f);
        r += dr;
        f += df;
    }
    let mut line = 1u64 << from | 1u64 << to | between;
    let (mut r2, mut f2) = (fr, ff);
    loop {
        let nr = r2 - dr;
        let nf = f2 - df;
        if !(0..8).contains(&nr) || !(0..8).contains(&nf) {
            break;
        }
        line |= 1u64 << (nr * 8 + nf);
        r2 = nr;
        f2 = nf;
    }
    let (mut r3, mut f3) = (tr, tf);
    loop {
        let nr = r3 + dr;
        let nf = f3 + df;
        if !(0..8).contains(&nr) || !(0..8).contains(&nf) {
            break;
        }
        line |= 1u64 << (nr * 8 + nf);
        r3 = nr;
        f3 = nf;
    }
    Some((between, line))
}

fn relevant_occupancy_mask(sq: usize, deltas: &[(i8, i8)]) -> Bitboard {
    let fr = (sq / 8) as i8;
    let ff = (sq % 8) as i8;
    let mut mask = 0u64;
    for &(dr, df) in deltas {
        let mut r = fr + dr;
        let mut f = ff + df;
        while (1..=6).contains(&r) && (1..=6).contains(&f) {
            mask |= 1u64 << (r * 8 + f);
            r += dr;
            f += df;
        }
    }
    mask
}

fn sliding_attack(sq: usize, deltas: &[(i8, i8)], occupancy: Bitboard) -> Bitboard {
    let fr = (sq / 8) as i8;
    let ff = (sq % 8) as i8;
    let mut attacks = 0u64;
    for &(dr, df) in deltas {
        let mut r = fr + dr;
        let mut f = ff + df;
        while (0..8).contains(&r) && (0..8).contains(&f) {
            let s = (r * 8 + f) as usize;
            attacks |= 1u64 << s;
            if occupancy & (1u64 << s) != 0 {
                break;
            }
            r += dr;
            f += df;
        }
    }
    attacks
}

fn enumerate_occupancies(mask: Bitboard) -> Vec<Bitboard> {
    let bits = pop_count(mask);
    let squares: Vec<Square> = BitboardIter(mask).collect();
    let mut out = Vec::with_capacity(1 << bits);
    for subset in 0..(1usize << bits) {
        let mut occ = 0u64;
        for (i, &s) in squares.iter().enumerate() {
            if subset & (1 << i) != 0 {
                occ |= 1u64 << s;
            }
        }
        out.push(occ);
    }
    out
}

fn sparse_random(rng: &mut SmallRng) -> u64 {
    rng.next_u64() & rng.next_u64() & rng.next_u64()
}

/// Searches for a collision-free magic multiplier for `sq` and writes the
/// resulting attack table into `table` (which must have room for
/// `2^(64-shift)` entries starting at index 0). Returns `(magic, shift)`.
fn find_magic(
    sq: usize,
    mask: Bitboard,
    deltas: &[(i8, i8)],
    rng: &mut SmallRng,
    table: &mut [Bitboard],
    _unused: Option<()>,
) -> (u64, u32) {
    let bits = pop_count(mask);
    let shift = (64 - bits) as u32;
    let occupancies = enumerate_occupancies(mask);
    let attacks: Vec<Bitboard> = occupancies.iter().map(|&occ| sliding_attack(sq, deltas, occ)).collect();
    let size = 1usize << bits;

    loop {
        let magic = sparse_random(rng);
        if (mask.wrapping_mul(magic) & 0xFF00_0000_0000_0000).count_ones() < 6 {
            continue;
        }
        let mut used = vec![None; size];
        let mut ok = true;
        for (i, &occ) in occupancies.iter().enumerate() {
            let idx = ((occ.wrapping_mul(magic)) >> shift) as usize;
            match used[idx] {
                None => used[idx] = Some(attacks[i]),
                Some(existing) if existing == attacks[i] => {}
                _ => {
                    ok = false;
                    break;
                }
            }
        }
        if !ok {
            continue;
        }
        for i in 0..size {
            table[i] = used[i].unwrap_or(0);
        }
        return (magic, shift);
    }
}
