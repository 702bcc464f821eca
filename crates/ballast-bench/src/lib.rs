//! Benchmark fixtures for the Ballast native buffer framework.
//!
//! - [`filled_list`]: a list of `n` sequential values on the labeled heap
//! - [`BENCH_SIZES`]: element counts shared by the list and allocator benches

#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

use ballast_alloc::{LabeledHeap, NoLeakCheck};
use ballast_buffer::NativeList;
use ballast_core::{AllocatorLabel, BufferError};

/// List type used by the benches: labeled heap, no leak tracking.
pub type BenchList<T> = NativeList<T, LabeledHeap, NoLeakCheck>;

/// Element counts exercised by parameterised benches.
pub const BENCH_SIZES: [usize; 3] = [1_000, 10_000, 100_000];

/// A list holding `0..n`, with capacity exactly `n`.
pub fn filled_list(n: usize) -> Result<BenchList<u64>, BufferError> {
    let mut list = BenchList::new_in(n, LabeledHeap::new(AllocatorLabel::Persistent))?;
    list.extend(0..n as u64);
    Ok(list)
}
