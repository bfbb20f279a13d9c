//! Static position evaluation: a classical, hand-written term-based
//! evaluator blended by game phase, optionally fused with an NNUE network.
//!
//! The evaluator is a plain value owned by whichever worker is searching;
//! it carries no shared mutable state, so each worker gets its own and no
//! synchronization is needed between them.

pub mod nnue;

use crate::basetypes::*;
use crate::bitsets::*;
use crate::board_geometry::GEOMETRY;
use crate::position::Position;
use nnue::Network;

/// Game-phase weight contributed by one instance of each piece type,
/// indexed `[KING, QUEEN, ROOK, BISHOP, KNIGHT, PAWN]`. Kings and pawns
/// contribute nothing; the starting position's total is `24`.
const PHASE_WEIGHT: [i32; 6] = [0, 4, 2, 1, 1, 0];
const MAX_PHASE: i32 = 24;

/// Every tunable coefficient the evaluator reads, separated from the
/// `Evaluator` itself so an external tuner could supply an alternate set.
#[derive(Clone)]
pub struct Weights {
    pub material_mg: [i32; 6],
    pub material_eg: [i32; 6],
    pub piece_square_mg: [[i32; 64]; 6],
    pub piece_square_eg: [[i32; 64]; 6],
    pub mobility_mg: [i32; 6],
    pub mobility_eg: [i32; 6],
    pub king_safety_mg: i32,
    pub king_storm_penalty: i32,
    /// Per-attacker weight on a king-zone square, indexed like
    /// [`PHASE_WEIGHT`]: `[KING, QUEEN, ROOK, BISHOP, KNIGHT, PAWN]`.
    pub king_attacker_weight: [i32; 6],
    pub king_weak_square_penalty: i32,
    pub doubled_pawn_penalty: i32,
    pub isolated_pawn_penalty: i32,
    pub passed_pawn_bonus_mg: i32,
    pub passed_pawn_bonus_eg: i32,
    pub tempo_bonus: i32,
    pub contempt: i32,
}

impl Default for Weights {
    fn default() -> Weights {
        Weights {
            material_mg: [0, 900, 500, 330, 320, 100],
            material_eg: [0, 950, 525, 340, 300, 120],
            piece_square_mg: [[0; 64]; 6],
            piece_square_eg: [[0; 64]; 6],
            mobility_mg: [0, 2, 3, 3, 4, 0],
            mobility_eg: [0, 4, 2, 2, 2, 0],
            king_safety_mg: 8,
            king_storm_penalty: 12,
            king_attacker_weight: [0, 20, 10, 8, 8, 4],
            king_weak_square_penalty: 6,
            doubled_pawn_penalty: 10,
            isolated_pawn_penalty: 12,
            passed_pawn_bonus_mg: 10,
            passed_pawn_bonus_eg: 30,
            tempo_bonus: 10,
            contempt: 0,
        }
    }
}

/// Computes `phase`, `material+positional` scores, and fuses an optional
/// NNUE network on top. Cheap to construct; build a fresh one whenever
/// contempt or the loaded network changes.
pub struct Evaluator {
    weights: Weights,
    network: Option<Network>,
}

impl Evaluator {
    pub fn new(weights: Weights) -> Evaluator {
        Evaluator { weights, network: None }
    }

    pub fn with_network(weights: Weights, network: Network) -> Evaluator {
        Evaluator { weights, network: Some(network) }
    }

    pub fn weights(&self) -> &Weights {
        &self.weights
    }

    pub fn has_network(&self) -> bool {
        self.network.is_some()
    }

    /// Loads an NNUE network from `path`, replacing any previously loaded
    /// one. On error the evaluator keeps evaluating classically (§7:
    /// degraded-mode recoverable, never a hard failure).
    pub fn load_nnue(&mut self, path: &str) -> Result<(), crate::error::NetworkError> {
        self.network = Some(nnue::Network::load_file(path)?);
        Ok(())
    }

    pub fn unload_nnue(&mut self) {
        self.network = None;
    }

    /// Returns the static evaluation from the side-to-move's perspective,
    /// in centipawns, clamped well clear of mate scores.
    pub fn evaluate(&self, pos: &Position) -> i32 {
        let phase = self.phase(pos);
        let classical = self.classical_score(pos, phase);
        let raw = match &self.network {
            Some(net) => {
                let nnue_score = net.forward(pos);
                let w = nnue_weight(phase);
                (classical * (MAX_PHASE - w) + nnue_score * w) / MAX_PHASE
            }
            None => classical,
        };
        let with_tempo = raw + self.weights.tempo_bonus;
        self.apply_contempt(with_tempo, with_tempo > 0)
    }

    fn phase(&self, pos: &Position) -> i32 {
        let mut phase = 0;
        for piece in [QUEEN, ROOK, BISHOP, KNIGHT] {
            let count = pop_count(pos.piece_type_bb()[piece]) as i32;
            phase += count * PHASE_WEIGHT[piece];
        }
        phase.min(MAX_PHASE)
    }

    fn classical_score(&self, pos: &Position, phase: i32) -> i32 {
        let us = pos.to_move();
        let them = opposite(us);
        let (mg_us, eg_us) = self.side_score(pos, us);
        let (mg_them, eg_them) = self.side_score(pos, them);
        let mg = mg_us - mg_them;
        let eg = eg_us - eg_them;
        (mg * phase + eg * (MAX_PHASE - phase)) / MAX_PHASE
    }

    fn side_score(&self, pos: &Position, color: Color) -> (i32, i32) {
        let mut mg = 0;
        let mut eg = 0;
        let own = pos.color_bb()[color];
        let occupied = pos.occupied();

        for piece in 0..6 {
            for sq in BitboardIter(pos.piece_type_bb()[piece] & own) {
                let psq = if color == WHITE { sq } else { mirror_square(sq) };
                mg += self.weights.material_mg[piece] + self.weights.piece_square_mg[piece][psq];
                eg += self.weights.material_eg[piece] + self.weights.piece_square_eg[piece][psq];
                if piece != KING && piece != PAWN {
                    let attacks = GEOMETRY.piece_attacks_from(occupied, piece, sq, color);
                    let mobility = pop_count(attacks & !own) as i32;
                    mg += mobility * self.weights.mobility_mg[piece];
                    eg += mobility * self.weights.mobility_eg[piece];
                }
            }
        }

        let (pawn_mg, pawn_eg) = self.pawn_structure(pos, color);
        mg += pawn_mg;
        eg += pawn_eg;

        let king_sq = pos.king_square(color);
        let them = opposite(color);
        let shield = king_shield_bb(color, king_sq) & pos.piece_type_bb()[PAWN] & own;
        mg += pop_count(shield) as i32 * self.weights.king_safety_mg;

        let enemy_pawns = pos.piece_type_bb()[PAWN] & pos.color_bb()[them];
        let storming = pop_count(pawn_storm_bb(color, king_sq) & enemy_pawns) as i32;
        mg -= storming * self.weights.king_storm_penalty;

        let king_zone = GEOMETRY.king_attacks[king_sq] | bb(king_sq);
        let mut attacker_weight = 0;
        let mut attacker_count = 0;
        for sq in BitboardIter(king_zone) {
            for attacker_sq in BitboardIter(pos.attackers_of(sq, them)) {
                if let Some((piece, _)) = pos.piece_at(attacker_sq) {
                    attacker_weight += self.weights.king_attacker_weight[piece];
                    attacker_count += 1;
                }
            }
        }
        if attacker_count > 1 {
            attacker_weight *= 2;
        }
        mg -= attacker_weight;

        let weak_squares = king_zone & !pawn_defended_bb(pos, color);
        mg -= pop_count(weak_squares) as i32 * self.weights.king_weak_square_penalty;

        (mg, eg)
    }

    fn pawn_structure(&self, pos: &Position, color: Color) -> (i32, i32) {
        let pawns = pos.piece_type_bb()[PAWN] & pos.color_bb()[color];
        let enemy_pawns = pos.piece_type_bb()[PAWN] & pos.color_bb()[opposite(color)];
        let mut mg = 0;
        let mut eg = 0;
        for f in 0..8 {
            let count = pop_count(pawns & file_bb(f));
            if count > 1 {
                mg -= self.weights.doubled_pawn_penalty * (count as i32 - 1);
                eg -= self.weights.doubled_pawn_penalty * (count as i32 - 1);
            }
            if count > 0 {
                let neighbor_files = adjacent_files_bb(f);
                if pawns & neighbor_files == 0 {
                    mg -= self.weights.isolated_pawn_penalty;
                    eg -= self.weights.isolated_pawn_penalty;
                }
            }
        }
        for sq in BitboardIter(pawns) {
            if is_passed_pawn(sq, color, enemy_pawns) {
                let advancement = if color == WHITE { rank(sq) } else { 7 - rank(sq) };
                mg += self.weights.passed_pawn_bonus_mg + advancement as i32 * 2;
                eg += self.weights.passed_pawn_bonus_eg + advancement as i32 * 6;
            }
        }
        (mg, eg)
    }

    /// Contempt nudges the score away from a draw when the position is
    /// roughly balanced, reflecting a preference to keep playing rather
    /// than take a repetition. The winning side gets `+c` (avoid the draw),
    /// the losing side gets `-c` (seek it); suppressed once the score
    /// leaves the "close to equal" window or is already mate-range, since
    /// contempt has no useful meaning once the outcome is effectively
    /// decided.
    fn apply_contempt(&self, raw: i32, we_are_winning: bool) -> i32 {
        let c = self.weights.contempt.clamp(-100, 100);
        if c == 0 || raw.abs() >= MATE_IN_MAX_PLY || raw.abs() >= 200 {
            return raw;
        }
        raw + if we_are_winning { c } else { -c }
    }
}

fn nnue_weight(phase: i32) -> i32 {
    MAX_PHASE - phase
}

fn mirror_square(sq: Square) -> Square {
    square(file(sq), 7 - rank(sq))
}

fn king_shield_bb(color: Color, king_sq: Square) -> Bitboard {
    let f = file(king_sq) as i32;
    let r = rank(king_sq) as i32;
    let shield_rank = if color == WHITE { r + 1 } else { r - 1 };
    if !(0..8).contains(&shield_rank) {
        return 0;
    }
    let mut bits = 0u64;
    for df in -1..=1 {
        let nf = f + df;
        if (0..8).contains(&nf) {
            bits |= bb(square(nf as File, shield_rank as Rank));
        }
    }
    bits
}

/// Squares on the files bordering the king's own, two and three ranks
/// further out, where an advancing enemy pawn first threatens to crack the
/// shelter open.
fn pawn_storm_bb(color: Color, king_sq: Square) -> Bitboard {
    let f = file(king_sq) as i32;
    let r = rank(king_sq) as i32;
    let (r1, r2) = if color == WHITE { (r + 2, r + 3) } else { (r - 2, r - 3) };
    let mut bits = 0u64;
    for rr in [r1, r2] {
        if !(0..8).contains(&rr) {
            continue;
        }
        for df in -1..=1 {
            let nf = f + df;
            if (0..8).contains(&nf) {
                bits |= bb(square(nf as File, rr as Rank));
            }
        }
    }
    bits
}

fn pawn_defended_bb(pos: &Position, color: Color) -> Bitboard {
    let mut bits = 0u64;
    for sq in BitboardIter(pos.piece_type_bb()[PAWN] & pos.color_bb()[color]) {
        bits |= GEOMETRY.piece_attacks_from(0, PAWN, sq, color);
    }
    bits
}

fn adjacent_files_bb(f: File) -> Bitboard {
    let mut bits = 0u64;
    if f > 0 {
        bits |= file_bb(f - 1);
    }
    if f < 7 {
        bits |= file_bb(f + 1);
    }
    bits
}

fn is_passed_pawn(sq: Square, color: Color, enemy_pawns: Bitboard) -> bool {
    let f = file(sq);
    let r = rank(sq) as i32;
    let files = file_bb(f) | adjacent_files_bb(f);
    let ahead = if color == WHITE {
        (r + 1..8).fold(0u64, |acc, rr| acc | rank_bb(rr as Rank))
    } else {
        (0..r).fold(0u64, |acc, rr| acc | rank_bb(rr as Rank))
    };
    enemy_pawns & files & ahead == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_position_is_near_zero() {
        let pos = Position::start_position();
        let eval = Evaluator::new(Weights::default());
        let score = eval.evaluate(&pos);
        assert!(score.abs() < 50, "expected near-symmetric eval, got {score}");
    }

    #[test]
    fn test_extra_queen_is_strongly_favored() {
        let pos = Position::from_fen("4k3/8/8/8/8/8/8/3QK3 w - - 0 1").unwrap();
        let eval = Evaluator::new(Weights::default());
        let score = eval.evaluate(&pos);
        assert!(score > 500, "expected a large material edge, got {score}");
    }

    #[test]
    fn test_contempt_pushes_balanced_score_away_from_draw() {
        let pos = Position::start_position();
        let mut weights = Weights::default();
        weights.contempt = 30;
        let eval = Evaluator::new(weights);
        let score = eval.evaluate(&pos);
        let mut neutral_weights = Weights::default();
        neutral_weights.contempt = 0;
        let neutral = Evaluator::new(neutral_weights).evaluate(&pos);
        assert_eq!(score, neutral + 30);
    }

    #[test]
    fn test_contempt_suppressed_outside_balanced_window() {
        let pos = Position::from_fen("4k3/8/8/8/8/8/8/3QK3 w - - 0 1").unwrap();
        let mut weights = Weights::default();
        weights.contempt = 30;
        let eval = Evaluator::new(weights.clone());
        let mut zero_contempt = weights;
        zero_contempt.contempt = 0;
        let eval_zero = Evaluator::new(zero_contempt);
        assert_eq!(eval.evaluate(&pos), eval_zero.evaluate(&pos));
    }
}
