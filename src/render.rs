//! Human-readable transcript documents.
//!
//! Rendering is pure formatting: every decision (what to include, in which order) has already
//! been made by the time a result reaches this module. Timestamps are never written to
//! the rendered text; they live only in the JSON artifact.

use std::fmt::Write as _;

use chrono::{DateTime, Local};

use crate::transcript::TranscriptionResult;

/// Column width used for wrapping and rules.
pub const LINE_WIDTH: usize = 80;

/// Sentences per paragraph in the transcript body.
const SENTENCES_PER_PARAGRAPH: usize = 5;

/// One entry of the combined document.
#[derive(Debug, Clone)]
pub enum CombinedEntry<'a> {
    /// A file that produced (or reused) a rendered document.
    Document { file_name: &'a str, text: &'a str },

    /// A file that failed; only its name and error are listed.
    Failed { file_name: &'a str, error: &'a str },
}

/// Render the per-file transcript document (`<file>_transcript.txt`).
pub fn render_document(
    result: &TranscriptionResult,
    file_name: &str,
    rendered_at: DateTime<Local>,
) -> String {
    let mut out = String::new();

    heavy_rule(&mut out);
    line(&mut out, "AUDIO TRANSCRIPTION");
    heavy_rule(&mut out);
    line(&mut out, "");

    line(&mut out, &format!("File: {file_name}"));
    line(
        &mut out,
        &format!("Date: {}", rendered_at.format("%Y-%m-%d %H:%M:%S")),
    );
    line(&mut out, &format!("Language: {}", result.language));
    if !result.speakers.is_empty() {
        line(&mut out, &format!("Speakers: {}", result.speakers.join(", ")));
    }
    let model = if result.model.is_empty() {
        "unknown"
    } else {
        result.model.as_str()
    };
    line(&mut out, &format!("Transcribed by: {model}"));
    line(
        &mut out,
        &format!(
            "Processing time: {:.2} seconds",
            result.processing_time_seconds
        ),
    );
    line(&mut out, "");

    if !result.summary.trim().is_empty() {
        light_rule(&mut out);
        line(&mut out, "SUMMARY");
        light_rule(&mut out);
        line(&mut out, "");
        line(&mut out, &wrap_text(&result.summary, LINE_WIDTH));
        line(&mut out, "");
    }

    if !result.key_topics.is_empty() {
        light_rule(&mut out);
        line(&mut out, "KEY TOPICS");
        light_rule(&mut out);
        line(&mut out, "");
        for topic in &result.key_topics {
            line(&mut out, &format!("• {topic}"));
        }
        line(&mut out, "");
    }

    heavy_rule(&mut out);
    line(&mut out, "FULL TRANSCRIPT");
    heavy_rule(&mut out);
    line(&mut out, "");
    line(&mut out, &format_paragraphs(&result.transcription, LINE_WIDTH));
    line(&mut out, "");

    light_rule(&mut out);
    line(&mut out, "End of Transcript");
    light_rule(&mut out);

    out
}

/// Render the job-level combined document (`combined_transcript.txt`).
///
/// The output depends only on `entries`, so regenerating it from the same artifacts yields the
/// same bytes.
pub fn render_combined(entries: &[CombinedEntry<'_>]) -> String {
    let mut out = String::new();

    heavy_rule(&mut out);
    line(&mut out, "COMBINED AUDIO TRANSCRIPTION");
    heavy_rule(&mut out);
    line(&mut out, "");
    line(&mut out, &format!("Total files: {}", entries.len()));
    line(&mut out, "");

    let mut failures = Vec::new();
    for (idx, entry) in entries.iter().enumerate() {
        match entry {
            CombinedEntry::Document { file_name, text } => {
                line(&mut out, "");
                heavy_rule(&mut out);
                line(&mut out, &format!("FILE {}: {file_name}", idx + 1));
                heavy_rule(&mut out);
                line(&mut out, "");
                line(&mut out, text.trim_end());
            }
            CombinedEntry::Failed { file_name, error } => {
                failures.push((idx + 1, *file_name, *error));
            }
        }
    }

    if !failures.is_empty() {
        line(&mut out, "");
        light_rule(&mut out);
        line(&mut out, "FAILED FILES");
        light_rule(&mut out);
        line(&mut out, "");
        for (number, file_name, error) in failures {
            line(&mut out, &format!("FILE {number}: {file_name}: {error}"));
        }
    }

    line(&mut out, "");
    heavy_rule(&mut out);
    line(&mut out, "END OF COMBINED TRANSCRIPT");
    heavy_rule(&mut out);

    out
}

/// Greedy word wrap. Words longer than `width` get a line of their own.
pub fn wrap_text(text: &str, width: usize) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        if current.is_empty() {
            current.push_str(word);
        } else if current.chars().count() + 1 + word.chars().count() <= width {
            current.push(' ');
            current.push_str(word);
        } else {
            lines.push(std::mem::take(&mut current));
            current.push_str(word);
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }

    lines.join("\n")
}

/// Split a transcript into wrapped paragraphs of a few sentences each.
pub fn format_paragraphs(text: &str, width: usize) -> String {
    let mut paragraphs = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for sentence in split_sentences(text) {
        current.push(sentence);
        if current.len() >= SENTENCES_PER_PARAGRAPH {
            paragraphs.push(wrap_text(&current.join(" "), width));
            current.clear();
        }
    }
    if !current.is_empty() {
        paragraphs.push(wrap_text(&current.join(" "), width));
    }

    paragraphs.join("\n\n")
}

/// Sentence boundaries are `.`, `?` or `!` followed by whitespace.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut prev_terminal = false;

    for (pos, ch) in text.char_indices() {
        if prev_terminal && ch.is_whitespace() {
            let sentence = text[start..pos].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = pos;
        }
        prev_terminal = matches!(ch, '.' | '?' | '!');
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

fn line(out: &mut String, text: &str) {
    let _ = writeln!(out, "{text}");
}

fn heavy_rule(out: &mut String) {
    line(out, &"=".repeat(LINE_WIDTH));
}

fn light_rule(out: &mut String) {
    line(out, &"-".repeat(LINE_WIDTH));
}
