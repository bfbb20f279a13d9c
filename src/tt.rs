//! The shared transposition table: clustered entries, generation-based
//! replacement, and xor-trick validation of racy writes.
//!
//! Entries are written without per-entry locking (§5 of the concurrency
//! model: lock-free, racy writes are acceptable as long as a torn read is
//! detected). Each slot is two `AtomicU64` words padded out to 32 bytes:
//! `data` (the packed move/value/depth/bound/generation) and `key_xor_data`
//! (the full zobrist key XORed with `data` at write time). A reader
//! recombines them (`key_xor_data ^ data`) and accepts the entry only if
//! that reproduces the position's own key. Two independent atomics can
//! still tear relative to each other under a racing writer -- that's
//! exactly the case this guards against: the recombination then lands on
//! neither writer's key and the probe rejects it, rather than handing back
//! a move or score that belongs to a different position.

use crate::basetypes::*;
use crate::chess_move::{Move, MoveList};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

pub const CLUSTER_SIZE: usize = 3;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum Bound {
    None = 0,
    Exact = 1,
    Lower = 2,
    Upper = 3,
}

impl Bound {
    fn from_u8(v: u8) -> Bound {
        match v & 0b11 {
            1 => Bound::Exact,
            2 => Bound::Lower,
            3 => Bound::Upper,
            _ => Bound::None,
        }
    }
}

/// A from/to/promotion-only encoding of a move, enough for the caller to
/// find the matching pseudo-legal `Move` (with its full flag/captured-piece
/// metadata) by scanning a freshly generated `MoveList`. The TT never
/// stores or hands back a `Move` directly -- a racy read must never be
/// trusted without this re-validation step.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct PackedMove {
    pub from: Square,
    pub to: Square,
    pub promotion_code: u32,
}

impl PackedMove {
    /// Narrows a full `Move` down to the from/to/promotion bits the TT
    /// stores. Returns `None` for the null move.
    pub fn from_move(m: Move) -> Option<PackedMove> {
        if m.is_null() {
            return None;
        }
        Some(PackedMove { from: m.from_square(), to: m.to_square(), promotion_code: m.promotion_code() })
    }

    fn from_bits(bits: u16) -> Option<PackedMove> {
        if bits == 0xffff {
            return None;
        }
        Some(PackedMove {
            from: (bits & 0x3f) as Square,
            to: ((bits >> 6) & 0x3f) as Square,
            promotion_code: ((bits >> 12) & 0b11) as u32,
        })
    }

    /// Finds the pseudo-legal move in `candidates` this entry refers to, if
    /// any (the TT move may be stale: from a position that transposed away,
    /// or corrupted by a torn read the xor check didn't catch).
    pub fn resolve(&self, candidates: &MoveList) -> Option<Move> {
        candidates
            .iter()
            .find(|m| m.from_square() == self.from && m.to_square() == self.to && m.promotion_code() == self.promotion_code)
            .copied()
    }
}

/// One transposition-table record, as handed back by `probe`. The on-disk
/// (in-slot) packing carries no key field of its own -- see `TTSlot`.
#[derive(Clone, Copy, Debug)]
pub struct TTEntry {
    pub mv: Option<PackedMove>,
    pub value: i16,
    pub depth: i8,
    pub bound: Bound,
    pub generation: u8,
}

impl TTEntry {
    fn is_empty(&self) -> bool {
        self.bound == Bound::None
    }

    fn priority(&self, current_generation: u8) -> i32 {
        self.depth as i32 - (current_generation.wrapping_sub(self.generation) as i32) * 4
    }

    fn pack_data(&self) -> u64 {
        let mv_bits = match self.mv {
            Some(pm) => (pm.from as u64) | ((pm.to as u64) << 6) | ((pm.promotion_code as u64) << 12),
            None => 0xffff,
        };
        mv_bits
            | ((self.value as u16 as u64) << 16)
            | ((self.depth as u8 as u64) << 32)
            | ((self.bound as u64) << 40)
            | ((self.generation as u64) << 42)
    }

    fn unpack_data(data: u64) -> TTEntry {
        let mv_bits = (data & 0xffff) as u16;
        let value = ((data >> 16) & 0xffff) as u16 as i16;
        let depth = ((data >> 32) & 0xff) as u8 as i8;
        let bound = Bound::from_u8(((data >> 40) & 0b11) as u8);
        let generation = ((data >> 42) & 0x3f) as u8;
        TTEntry { mv: PackedMove::from_bits(mv_bits), value, depth, bound, generation }
    }
}

/// One cluster slot, padded to 32 bytes. `key_xor_data` and `data` are
/// written and read as two separate atomics -- see the module doc comment
/// for why that's exactly what the xor trick needs to guard against.
#[repr(C)]
struct TTSlot {
    key_xor_data: AtomicU64,
    data: AtomicU64,
    _pad: [u64; 2],
}

impl TTSlot {
    fn new() -> TTSlot {
        TTSlot { key_xor_data: AtomicU64::new(0), data: AtomicU64::new(0), _pad: [0; 2] }
    }

    /// Loads both words and returns the entry together with the key it
    /// recombines to, so the caller can compare against the key it's
    /// actually looking for.
    fn load(&self) -> (u64, TTEntry) {
        let data = self.data.load(Ordering::Relaxed);
        let key_xor_data = self.key_xor_data.load(Ordering::Relaxed);
        (key_xor_data ^ data, TTEntry::unpack_data(data))
    }

    fn store(&self, key: u64, entry: &TTEntry) {
        let data = entry.pack_data();
        self.data.store(data, Ordering::Relaxed);
        self.key_xor_data.store(key ^ data, Ordering::Relaxed);
    }
}

struct Cluster {
    slots: [TTSlot; CLUSTER_SIZE],
}

/// The shared transposition table. Cloned `Arc<Tt>` handles are held by
/// every worker; all methods take `&self` and rely on the xor-trick for
/// safety under concurrent access, matching the lock-free discipline the
/// concurrency model requires.
pub struct Tt {
    clusters: Vec<Cluster>,
    generation: AtomicU8,
}

impl Tt {
    /// Allocates a table sized (in megabytes) to at least `size_mb`,
    /// rounded down to the nearest power-of-two cluster count.
    pub fn new(size_mb: usize) -> Tt {
        let bytes = size_mb.max(1) * 1024 * 1024;
        let cluster_count = (bytes / std::mem::size_of::<TTSlot>() / CLUSTER_SIZE).max(1).next_power_of_two() >> 1;
        let cluster_count = cluster_count.max(1);
        let clusters = (0..cluster_count)
            .map(|_| Cluster { slots: [TTSlot::new(), TTSlot::new(), TTSlot::new()] })
            .collect();
        Tt { clusters, generation: AtomicU8::new(0) }
    }

    #[inline]
    fn index(&self, key: u64) -> usize {
        (key as usize) & (self.clusters.len() - 1)
    }

    /// Clears all entries and advances the generation. Called at the start
    /// of a new game (not between moves of the same game, where stale
    /// entries are still useful and aged out naturally).
    pub fn clear(&self) {
        for cluster in &self.clusters {
            for slot in &cluster.slots {
                slot.data.store(0, Ordering::Relaxed);
                slot.key_xor_data.store(0, Ordering::Relaxed);
            }
        }
        self.generation.store(0, Ordering::Relaxed);
    }

    pub fn new_search(&self) {
        self.generation.fetch_add(1, Ordering::Relaxed);
    }

    /// Looks up `key`, undoing the mate-score ply bias for `ply`. Returns
    /// `None` on a miss or a rejected torn read: the xor-recombined key
    /// must match exactly, or the entry is treated as absent.
    pub fn probe(&self, key: u64, ply: u32) -> Option<TTEntry> {
        let cluster = &self.clusters[self.index(key)];
        for slot in &cluster.slots {
            let (recovered_key, entry) = slot.load();
            if !entry.is_empty() && recovered_key == key {
                let mut entry = entry;
                entry.generation = self.generation.load(Ordering::Relaxed);
                let mut value = entry.value as i32;
                value = unbias_mate_score(value, ply);
                entry.value = value.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
                return Some(entry);
            }
        }
        None
    }

    /// Stores a result for `key`. `mv` is preserved across a depth-driven
    /// overwrite when the incoming store carries no move and the existing
    /// entry still matches the key (the original's "always preserve a best
    /// move if available").
    #[allow(clippy::too_many_arguments)]
    pub fn store(&self, key: u64, ply: u32, mv: Option<PackedMove>, value: i32, depth: i8, bound: Bound) {
        let cluster = &self.clusters[self.index(key)];
        let current_generation = self.generation.load(Ordering::Relaxed);
        let value = bias_mate_score(value, ply).clamp(i16::MIN as i32, i16::MAX as i32) as i16;

        let mut victim_idx = 0usize;
        let mut victim_priority = i32::MAX;
        for (i, slot) in cluster.slots.iter().enumerate() {
            let (recovered_key, existing) = slot.load();
            if existing.is_empty() || recovered_key == key {
                victim_idx = i;
                victim_priority = i32::MIN;
                break;
            }
            let p = existing.priority(current_generation);
            if p < victim_priority {
                victim_priority = p;
                victim_idx = i;
            }
        }

        let slot = &cluster.slots[victim_idx];
        let (existing_key, existing) = slot.load();
        let mv = match mv {
            Some(pm) => Some(pm),
            None if !existing.is_empty() && existing_key == key => existing.mv,
            None => None,
        };
        let entry = TTEntry { mv, value, depth, bound, generation: current_generation };
        slot.store(key, &entry);
    }

    /// Per-mille occupancy of the table, sampled at 1000 deterministic
    /// cluster indices (or all clusters, if the table is smaller than
    /// that).
    pub fn hashfull(&self) -> u32 {
        let current_generation = self.generation.load(Ordering::Relaxed);
        let samples = self.clusters.len().min(1000);
        let mut used = 0u32;
        for i in 0..samples {
            let idx = i * self.clusters.len() / samples.max(1);
            for slot in &self.clusters[idx].slots {
                let (_, entry) = slot.load();
                if !entry.is_empty() && entry.generation == current_generation {
                    used += 1;
                }
            }
        }
        used * 1000 / (samples as u32 * CLUSTER_SIZE as u32)
    }
}

fn bias_mate_score(value: i32, ply: u32) -> i32 {
    if value >= MATE_IN_MAX_PLY {
        value + ply as i32
    } else if value <= -MATE_IN_MAX_PLY {
        value - ply as i32
    } else {
        value
    }
}

fn unbias_mate_score(value: i32, ply: u32) -> i32 {
    if value >= MATE_IN_MAX_PLY {
        value - ply as i32
    } else if value <= -MATE_IN_MAX_PLY {
        value + ply as i32
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_and_probe_roundtrip() {
        let tt = Tt::new(1);
        let key = 0x1234_5678_9abc_def0;
        let mv = PackedMove { from: 12, to: 28, promotion_code: 0 };
        tt.store(key, 0, Some(mv), 150, 6, Bound::Exact);
        let entry = tt.probe(key, 0).expect("probe should find the stored entry");
        assert_eq!(entry.value, 150);
        assert_eq!(entry.depth, 6);
        assert_eq!(entry.bound, Bound::Exact);
        assert_eq!(entry.mv, Some(mv));
    }

    #[test]
    fn test_probe_miss_on_different_key() {
        let tt = Tt::new(1);
        tt.store(1, 0, None, 10, 3, Bound::Upper);
        assert!(tt.probe(2, 0).is_none());
    }

    #[test]
    fn test_mate_score_ply_bias_roundtrip() {
        let tt = Tt::new(1);
        let key = 42;
        let mate_in_3 = MATE_SCORE - 3;
        tt.store(key, 5, None, mate_in_3, 10, Bound::Exact);
        let entry = tt.probe(key, 5).unwrap();
        assert_eq!(entry.value as i32, mate_in_3);
    }

    #[test]
    fn test_torn_write_detected_by_key_mismatch() {
        // Simulates a racing writer: overwrite the same slot with a
        // different key's packed bits, then probe with the original key.
        let tt = Tt::new(1);
        let key_a = 0x0001_0000_0000_0000u64;
        let key_b = 0x0002_0000_0000_0000u64;
        // Force both keys into the same cluster for this tiny table.
        tt.store(key_a, 0, None, 10, 4, Bound::Exact);
        tt.store(key_b, 0, None, 20, 4, Bound::Exact);
        let probe_a = tt.probe(key_a, 0);
        // key_a may have been evicted by key_b (different recovered key,
        // different cluster slot priority) -- either a clean miss or the original
        // value, never key_b's value under key_a.
        if let Some(e) = probe_a {
            assert_eq!(e.value, 10);
        }
    }

    #[test]
    fn test_preserves_move_when_overwrite_carries_none() {
        let tt = Tt::new(1);
        let key = 7;
        let mv = PackedMove { from: 4, to: 20, promotion_code: 0 };
        tt.store(key, 0, Some(mv), 5, 2, Bound::Upper);
        tt.store(key, 0, None, 8, 4, Bound::Exact);
        let entry = tt.probe(key, 0).unwrap();
        assert_eq!(entry.mv, Some(mv));
    }

    #[test]
    fn test_xor_trick_rejects_a_genuinely_torn_slot() {
        // Write a well-formed entry, then desynchronize the two words the
        // way an interleaved racing writer would: only `data` changes,
        // `key_xor_data` is left recombining to neither key.
        let tt = Tt::new(1);
        let key = 0x55aa_0000_0000_0000u64;
        tt.store(key, 0, None, 77, 5, Bound::Exact);
        let cluster = &tt.clusters[tt.index(key)];
        let slot = cluster.slots.iter().find(|s| s.load().0 == key).expect("entry should be present");
        slot.data.store(slot.data.load(Ordering::Relaxed) ^ 0xdead_beef, Ordering::Relaxed);
        assert!(tt.probe(key, 0).is_none(), "a torn slot must never be handed back as a hit");
    }

    #[test]
    fn test_hashfull_starts_at_zero() {
        let tt = Tt::new(1);
        assert_eq!(tt.hashfull(), 0);
    }
}
