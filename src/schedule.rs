//! Chunk arithmetic and randomized send order.
//!
//! Every send pass, including every retransmission pass, draws a fresh
//! permutation of all part indices. Nothing is remembered between passes, so a
//! retransmission re-sends the whole file rather than only the parts the peer
//! is missing. That costs bandwidth on lossy links and is kept as-is until the
//! control protocol can name missing parts.

use rand::seq::SliceRandom;
use std::ops::Range;

/// Number of parts needed to carry `file_size` bytes in `chunk_size` chunks.
///
/// An empty file still produces one (empty) part so the peer sees a transfer.
///
/// # Panics
///
/// Panics if `chunk_size` is zero. [`Config::validate`](crate::Config::validate)
/// rejects that before any scheduling happens.
///
/// # Examples
///
/// ```
/// use udpbench::schedule::part_count;
///
/// assert_eq!(part_count(1000, 300), 4);
/// assert_eq!(part_count(900, 300), 3);
/// ```
pub fn part_count(file_size: u64, chunk_size: u64) -> u64 {
    assert!(chunk_size > 0, "chunk size must be positive");
    file_size.div_ceil(chunk_size).max(1)
}

/// A uniformly random permutation of `0..part_count`.
pub fn schedule_order(part_count: u64) -> Vec<u64> {
    let mut order: Vec<u64> = (0..part_count).collect();
    order.shuffle(&mut rand::thread_rng());
    order
}

/// Byte range of part `index` within a file of `file_size` bytes.
///
/// The final part holds whatever remains and may be shorter than a chunk.
pub fn part_range(index: u64, chunk_size: usize, file_size: usize) -> Range<usize> {
    let start = (index as usize).saturating_mul(chunk_size).min(file_size);
    let end = start.saturating_add(chunk_size).min(file_size);
    start..end
}
