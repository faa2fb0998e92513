// Licensed under the MIT License
// Copyright (c) 2025 Sijo Saju <sijo.saju@outlook.com>

//! Chunk planner
//!
//! Partitions `[0, size)` into contiguous byte ranges, one per stream.
//! Small files are planned with fewer chunks so no chunk falls under the
//! 1 MiB floor; the final chunk absorbs any division remainder.

use crate::constants::MIN_CHUNK_SIZE;

/// One planned byte range. `end` is inclusive, matching the HTTP
/// `Range: bytes=start-end` form the workers send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpec {
    /// Chunk index, 0-based; also the part-file suffix
    pub index: usize,
    /// First byte of the range
    pub start: u64,
    /// Last byte of the range, inclusive
    pub end: u64,
}

impl ChunkSpec {
    /// Number of bytes this chunk covers
    pub fn byte_len(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// Plan chunks for a file of `size` bytes across up to `target_streams`.
///
/// Uses exactly `target_streams` chunks unless the file is too small, in
/// which case the count shrinks to `max(1, size / MIN_CHUNK_SIZE)`.
/// Returns an empty plan for a zero-size file.
pub fn plan_chunks(size: u64, target_streams: usize) -> Vec<ChunkSpec> {
    if size == 0 {
        return Vec::new();
    }

    let target = target_streams.max(1) as u64;
    let count = if size < MIN_CHUNK_SIZE * target {
        (size / MIN_CHUNK_SIZE).max(1)
    } else {
        target
    };

    let chunk_size = size / count;
    (0..count)
        .map(|i| {
            let start = i * chunk_size;
            let end = if i == count - 1 {
                size - 1
            } else {
                (i + 1) * chunk_size - 1
            };
            ChunkSpec {
                index: i as usize,
                start,
                end,
            }
        })
        .collect()
}
