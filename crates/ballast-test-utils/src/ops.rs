//! Seeded operation streams for model-based buffer tests.
//!
//! The same seed always yields the same stream, so a failing run can be
//! replayed from the seed printed by the test.

use rand_chacha::rand_core::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// One mutation to apply to a buffer and to its `Vec` model.
///
/// Index operands are raw; consumers reduce them modulo the current length
/// and skip the op when the buffer is empty.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ListOp {
    Add(u32),
    AddRange(Vec<u32>),
    Set { index: usize, value: u32 },
    RemoveSwapBack(usize),
    RemoveAt(usize),
    Clear,
    /// Requested extra capacity above the current length.
    Reserve(usize),
    TrimExcess,
}

/// Generate `count` operations from `seed`.
///
/// Adds dominate so that buffers grow through several doublings.
pub fn op_stream(seed: u64, count: usize) -> Vec<ListOp> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..count).map(|_| next_op(&mut rng)).collect()
}

fn next_op(rng: &mut ChaCha8Rng) -> ListOp {
    let raw = rng.next_u32();
    match rng.next_u32() % 20 {
        0..=8 => ListOp::Add(raw),
        9..=10 => {
            let n = (raw % 12) as usize;
            ListOp::AddRange((0..n).map(|_| rng.next_u32()).collect())
        }
        11..=12 => ListOp::Set {
            index: raw as usize,
            value: rng.next_u32(),
        },
        13..=14 => ListOp::RemoveSwapBack(raw as usize),
        15 => ListOp::RemoveAt(raw as usize),
        16 => ListOp::Clear,
        17..=18 => ListOp::Reserve((raw % 64) as usize),
        _ => ListOp::TrimExcess,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_stream() {
        assert_eq!(op_stream(7, 200), op_stream(7, 200));
    }

    #[test]
    fn different_seeds_diverge() {
        assert_ne!(op_stream(1, 200), op_stream(2, 200));
    }

    #[test]
    fn stream_is_add_heavy() {
        let ops = op_stream(42, 1000);
        let adds = ops
            .iter()
            .filter(|op| matches!(op, ListOp::Add(_) | ListOp::AddRange(_)))
            .count();
        assert!(adds > 400, "only {adds} adds");
    }
}
