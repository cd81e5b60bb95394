//! Transcript data structures and chunk merging.

use serde::{Deserialize, Serialize};

use crate::planner::Chunk;
use crate::{Error, Result};

/// Language reported when the engine could not tell.
pub const UNKNOWN_LANGUAGE: &str = "unknown";

/// A timestamped stretch of speech, relative to the start of the file it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start_seconds: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
    pub text: String,
}

/// Engine output for one chunk, or the merged output for one file.
///
/// Once produced this value is never mutated; the merged form is what gets persisted as the
/// `<file>_transcription.json` artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionResult {
    pub transcription: String,

    #[serde(default = "unknown_language")]
    pub language: String,

    #[serde(default)]
    pub speakers: Vec<String>,

    #[serde(default)]
    pub summary: String,

    #[serde(default)]
    pub key_topics: Vec<String>,

    #[serde(default)]
    pub segments: Vec<Segment>,

    /// Wall-clock seconds spent in engine calls.
    #[serde(default)]
    pub processing_time_seconds: f64,

    /// Engine/model identifier that produced the transcript.
    #[serde(default)]
    pub model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size_bytes: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_chunks: Option<usize>,
}

fn unknown_language() -> String {
    UNKNOWN_LANGUAGE.to_owned()
}

impl TranscriptionResult {
    /// A result carrying only raw text, used when the engine reply has no structure.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            transcription: text.into(),
            language: unknown_language(),
            speakers: Vec::new(),
            summary: String::new(),
            key_topics: Vec::new(),
            segments: Vec::new(),
            processing_time_seconds: 0.0,
            model: String::new(),
            file_name: None,
            file_size_bytes: None,
            num_chunks: None,
        }
    }
}

/// Merge per-chunk results into one file-level result.
///
/// `parts` pairs every planned chunk with its engine result. Parts may arrive in any order;
/// we sort by chunk index so the merge is always order-preserving.
///
/// Merge policy:
/// - transcription: chunk texts joined with a single space, in chunk order
/// - language: the first chunk's language that is not `unknown`
/// - speakers: union, first-seen order
/// - summary / key topics: taken from the first chunk that has any (no re-summarizing)
/// - segments: each chunk's segments sorted by start, clamped to the chunk's duration, then
///   shifted by the chunk's offset inside the file
/// - processing time: summed
pub fn merge_chunks(mut parts: Vec<(Chunk, TranscriptionResult)>) -> Result<TranscriptionResult> {
    if parts.is_empty() {
        return Err(Error::msg("cannot merge an empty chunk list"));
    }

    parts.sort_by_key(|(chunk, _)| chunk.index);
    let num_chunks = parts.len();

    let mut texts = Vec::with_capacity(num_chunks);
    let mut language: Option<String> = None;
    let mut speakers: Vec<String> = Vec::new();
    let mut summary = String::new();
    let mut key_topics: Vec<String> = Vec::new();
    let mut segments = Vec::new();
    let mut processing_time_seconds = 0.0;
    let mut model = String::new();

    for (chunk, part) in parts {
        let text = part.transcription.trim();
        if !text.is_empty() {
            texts.push(text.to_owned());
        }

        if language.is_none() && part.language != UNKNOWN_LANGUAGE && !part.language.is_empty() {
            language = Some(part.language.clone());
        }

        for speaker in part.speakers {
            if !speakers.contains(&speaker) {
                speakers.push(speaker);
            }
        }

        if summary.is_empty() && !part.summary.trim().is_empty() {
            summary = part.summary;
        }
        if key_topics.is_empty() && !part.key_topics.is_empty() {
            key_topics = part.key_topics;
        }

        segments.extend(offset_segments(part.segments, &chunk));
        processing_time_seconds += part.processing_time_seconds;

        if model.is_empty() {
            model = part.model;
        }
    }

    Ok(TranscriptionResult {
        transcription: texts.join(" "),
        language: language.unwrap_or_else(unknown_language),
        speakers,
        summary,
        key_topics,
        segments,
        processing_time_seconds,
        model,
        file_name: None,
        file_size_bytes: None,
        num_chunks: Some(num_chunks),
    })
}

/// Re-base one chunk's segments onto the file timeline.
fn offset_segments(mut segments: Vec<Segment>, chunk: &Chunk) -> Vec<Segment> {
    let offset = chunk.offset_seconds();
    let limit = chunk.duration_seconds();

    segments.sort_by(|a, b| a.start_seconds.total_cmp(&b.start_seconds));

    for seg in &mut segments {
        seg.start_seconds = seg.start_seconds.clamp(0.0, limit) + offset;
        seg.end_seconds = seg
            .end_seconds
            .map(|end| end.clamp(0.0, limit) + offset)
            .map(|end| end.max(seg.start_seconds));
    }

    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(index: usize, start_ms: u64, end_ms: u64) -> Chunk {
        Chunk {
            file_id: "talk.mp3".to_owned(),
            index,
            start_ms,
            end_ms,
            start_byte: 0,
            end_byte: 1,
        }
    }

    fn part(text: &str, speakers: &[&str], segments: &[(f64, &str)]) -> TranscriptionResult {
        TranscriptionResult {
            speakers: speakers.iter().map(|s| (*s).to_owned()).collect(),
            segments: segments
                .iter()
                .map(|(start, text)| Segment {
                    start_seconds: *start,
                    end_seconds: None,
                    speaker: None,
                    text: (*text).to_owned(),
                })
                .collect(),
            processing_time_seconds: 1.5,
            model: "engine-v1".to_owned(),
            ..TranscriptionResult::from_text(text)
        }
    }

    #[test]
    fn merge_preserves_chunk_order_regardless_of_arrival() -> anyhow::Result<()> {
        let parts = vec![
            (chunk(2, 20_000, 30_000), part("three", &[], &[])),
            (chunk(0, 0, 10_000), part("one", &[], &[])),
            (chunk(1, 10_000, 20_000), part("two", &[], &[])),
        ];

        let merged = merge_chunks(parts)?;
        assert_eq!(merged.transcription, "one two three");
        assert_eq!(merged.num_chunks, Some(3));
        assert!((merged.processing_time_seconds - 4.5).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn merge_offsets_segments_monotonically() -> anyhow::Result<()> {
        let parts = vec![
            (chunk(0, 0, 30_000), part("a", &[], &[(0.0, "a0"), (12.0, "a1")])),
            (chunk(1, 30_000, 60_000), part("b", &[], &[(25.0, "b1"), (2.0, "b0")])),
        ];

        let merged = merge_chunks(parts)?;
        let starts: Vec<f64> = merged.segments.iter().map(|s| s.start_seconds).collect();
        assert_eq!(starts, vec![0.0, 12.0, 32.0, 55.0]);
        assert!(starts.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(merged.segments[2].text, "b0");
        Ok(())
    }

    #[test]
    fn merge_clamps_segments_that_overrun_their_chunk() -> anyhow::Result<()> {
        let parts = vec![
            (chunk(0, 0, 10_000), part("a", &[], &[(14.0, "late")])),
            (chunk(1, 10_000, 20_000), part("b", &[], &[(0.5, "early")])),
        ];

        let merged = merge_chunks(parts)?;
        assert_eq!(merged.segments[0].start_seconds, 10.0);
        assert_eq!(merged.segments[1].start_seconds, 10.5);
        Ok(())
    }

    #[test]
    fn merge_unions_speakers_and_keeps_first_summary() -> anyhow::Result<()> {
        let mut first = part("a", &["Speaker 1"], &[]);
        first.language = UNKNOWN_LANGUAGE.to_owned();
        let mut second = part("b", &["Speaker 2", "Speaker 1"], &[]);
        second.summary = "A planning call.".to_owned();
        second.key_topics = vec!["budget".to_owned()];
        second.language = "English".to_owned();
        let mut third = part("c", &["Speaker 3"], &[]);
        third.summary = "Ignored.".to_owned();

        let merged = merge_chunks(vec![
            (chunk(0, 0, 1_000), first),
            (chunk(1, 1_000, 2_000), second),
            (chunk(2, 2_000, 3_000), third),
        ])?;

        assert_eq!(merged.speakers, vec!["Speaker 1", "Speaker 2", "Speaker 3"]);
        assert_eq!(merged.summary, "A planning call.");
        assert_eq!(merged.key_topics, vec!["budget"]);
        assert_eq!(merged.language, "English");
        Ok(())
    }

    #[test]
    fn merge_rejects_empty_input() {
        assert!(merge_chunks(Vec::new()).is_err());
    }

    #[test]
    fn deserializes_minimal_artifact() -> anyhow::Result<()> {
        let parsed: TranscriptionResult = serde_json::from_str(r#"{"transcription":"hi"}"#)?;
        assert_eq!(parsed.language, UNKNOWN_LANGUAGE);
        assert!(parsed.segments.is_empty());
        Ok(())
    }
}
