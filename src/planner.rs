//! Chunk planning.
//!
//! Files over the configured chunk size are split into ordered, contiguous sub-ranges.
//! Splitting is purely size-driven: we never look at the audio itself (no silence detection),
//! so boundaries land wherever the arithmetic puts them and the last chunk absorbs the
//! rounding remainder.
//!
//! Split chunks are re-encoded before they reach the engine, so the limit applies to the
//! re-encoded payload ([`PayloadRate`]) rather than to the source file's own byte rate.

use serde::Serialize;

use crate::{Error, Result};

/// What the planner needs to know about one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanInput<'a> {
    /// Identifier copied into every produced chunk.
    pub file_id: &'a str,
    pub size_bytes: u64,
    pub duration_ms: u64,
    /// Size of the audio once a split chunk is re-encoded for the engine.
    pub payload: PayloadRate,
}

/// Byte cost of a re-encoded chunk: a fixed per-chunk overhead plus a constant byte rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadRate {
    pub bytes_per_second: u64,
    pub overhead_bytes: u64,
}

impl PayloadRate {
    /// Upper bound on the payload size of a chunk lasting `duration_ms`.
    pub fn bytes_for(&self, duration_ms: u64) -> u64 {
        let body = u128::from(duration_ms) * u128::from(self.bytes_per_second) / 1000;
        u64::try_from(body)
            .unwrap_or(u64::MAX)
            .saturating_add(self.overhead_bytes)
    }
}

/// One bounded sub-range of a file: the unit of work sent to the engine.
///
/// Time and byte ranges are half-open (`start..end`). Chunks are ephemeral values and never
/// persisted on their own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chunk {
    pub file_id: String,
    pub index: usize,
    pub start_ms: u64,
    pub end_ms: u64,
    pub start_byte: u64,
    pub end_byte: u64,
}

impl Chunk {
    pub fn duration_ms(&self) -> u64 {
        self.end_ms - self.start_ms
    }

    pub fn size_bytes(&self) -> u64 {
        self.end_byte - self.start_byte
    }

    /// Offset of this chunk inside its file, in seconds.
    pub fn offset_seconds(&self) -> f64 {
        self.start_ms as f64 / 1000.0
    }

    /// Length of this chunk, in seconds.
    pub fn duration_seconds(&self) -> f64 {
        self.duration_ms() as f64 / 1000.0
    }
}

/// Plan the chunks for one file.
///
/// Policy:
/// - at or below `max_chunk_size_bytes` → exactly one chunk spanning the whole file
/// - above it → chunks of equal nominal duration, each no longer than
///   [`duration_ceiling_ms`], so every re-encoded payload stays within the byte limit
/// - the chunk count never exceeds the duration in milliseconds, so no chunk is empty
///
/// Fails with a planning error when the reported size or duration is zero, or when the limit
/// cannot hold even one millisecond of re-encoded audio.
pub fn plan_chunks(input: &PlanInput<'_>, max_chunk_size_bytes: u64) -> Result<Vec<Chunk>> {
    if input.size_bytes == 0 {
        return Err(Error::planning(format!(
            "'{}' reports a size of zero bytes",
            input.file_id
        )));
    }
    if input.duration_ms == 0 {
        return Err(Error::planning(format!(
            "'{}' reports a duration of zero",
            input.file_id
        )));
    }
    if max_chunk_size_bytes == 0 {
        return Err(Error::planning("maximum chunk size must be greater than zero"));
    }

    let count = match duration_ceiling_ms(input, max_chunk_size_bytes) {
        None => 1,
        Some(0) => {
            return Err(Error::planning(format!(
                "a {max_chunk_size_bytes} byte chunk cannot hold any audio of '{}'",
                input.file_id
            )));
        }
        Some(ceiling) => input.duration_ms.div_ceil(ceiling).max(1),
    };

    let chunks = (0..count)
        .map(|i| Chunk {
            file_id: input.file_id.to_owned(),
            index: i as usize,
            start_ms: boundary(input.duration_ms, i, count),
            end_ms: boundary(input.duration_ms, i + 1, count),
            start_byte: boundary(input.size_bytes, i, count),
            end_byte: boundary(input.size_bytes, i + 1, count),
        })
        .collect();

    Ok(chunks)
}

/// The longest chunk, in milliseconds, whose re-encoded payload fits the byte limit.
///
/// Returns `None` when the file fits in one chunk as-is.
pub fn duration_ceiling_ms(input: &PlanInput<'_>, max_chunk_size_bytes: u64) -> Option<u64> {
    if input.size_bytes <= max_chunk_size_bytes {
        return None;
    }
    let budget = max_chunk_size_bytes.saturating_sub(input.payload.overhead_bytes);
    let ceiling = u128::from(budget) * 1000 / u128::from(input.payload.bytes_per_second.max(1));
    Some(u64::try_from(ceiling).unwrap_or(u64::MAX))
}

/// `total * i / count` without overflow; `boundary(total, count, count) == total`.
fn boundary(total: u64, i: u64, count: u64) -> u64 {
    (u128::from(total) * u128::from(i) / u128::from(count)) as u64
}
