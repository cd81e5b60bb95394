//! The external transcription engine seam.
//!
//! The engine is opaque, rate-limited and billable. We only ever:
//! - hand it one chunk of audio at a time
//! - parse whatever it answers into a `TranscriptionResult`
//!
//! There are no retries: a failed chunk fails its whole file.

use std::future::Future;

use serde::Deserialize;

use crate::Result;
use crate::transcript::{Segment, TranscriptionResult, UNKNOWN_LANGUAGE};

/// One engine call: a chunk of audio plus enough context to label it.
#[derive(Debug, Clone)]
pub struct EngineRequest {
    pub file_name: String,
    pub chunk_index: usize,
    pub chunk_count: usize,
    pub audio: Vec<u8>,
    pub mime_type: &'static str,
    /// Nominal duration of this chunk, in seconds.
    pub target_chunk_seconds: f64,
}

/// Pluggable transcription engine used by the pipeline.
///
/// Implementations return chunk-relative segment timestamps; the pipeline re-bases them onto
/// the file timeline when merging.
pub trait TranscriptionEngine: Send + Sync + 'static {
    /// Identifier recorded in every result this engine produces.
    fn model_id(&self) -> &str;

    /// Transcribe one chunk.
    ///
    /// Every failure (transport, timeout, quota rejection) is reported as an engine error
    /// whose message is surfaced to callers verbatim.
    fn transcribe(
        &self,
        request: EngineRequest,
    ) -> impl Future<Output = Result<TranscriptionResult>> + Send;
}

/// Wire shape of an engine reply.
#[derive(Debug, Deserialize)]
struct WireReply {
    #[serde(default)]
    transcription: String,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    speakers: Vec<String>,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    key_topics: Vec<String>,
    #[serde(default)]
    timestamps: Vec<WireSegment>,
}

#[derive(Debug, Deserialize)]
struct WireSegment {
    time: WireTime,
    #[serde(default)]
    end: Option<WireTime>,
    #[serde(default)]
    speaker: Option<String>,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireTime {
    Seconds(f64),
    Clock(String),
}

impl WireTime {
    fn seconds(&self) -> Option<f64> {
        match self {
            Self::Seconds(s) => Some(*s),
            Self::Clock(raw) => parse_clock(raw),
        }
    }
}

/// Parse an engine reply body.
///
/// We accept the structured JSON shape (optionally wrapped in a Markdown code fence). Anything
/// that does not parse is kept as raw transcription text with an unknown language, so a chatty
/// engine reply still yields a usable transcript.
pub fn parse_reply(body: &str) -> TranscriptionResult {
    let stripped = strip_code_fence(body);

    let Ok(wire) = serde_json::from_str::<WireReply>(stripped) else {
        return TranscriptionResult::from_text(body.trim());
    };

    let segments = wire
        .timestamps
        .into_iter()
        .filter_map(|seg| {
            let start_seconds = seg.time.seconds()?;
            Some(Segment {
                start_seconds,
                end_seconds: seg.end.as_ref().and_then(WireTime::seconds),
                speaker: seg.speaker,
                text: seg.text,
            })
        })
        .collect();

    TranscriptionResult {
        language: wire
            .language
            .filter(|lang| !lang.trim().is_empty())
            .unwrap_or_else(|| UNKNOWN_LANGUAGE.to_owned()),
        speakers: wire.speakers,
        summary: wire.summary,
        key_topics: wire.key_topics,
        segments,
        ..TranscriptionResult::from_text(wire.transcription)
    }
}

fn strip_code_fence(body: &str) -> &str {
    let mut text = body.trim();
    if let Some(rest) = text.strip_prefix("```json") {
        text = rest;
    } else if let Some(rest) = text.strip_prefix("```") {
        text = rest;
    }
    if let Some(rest) = text.strip_suffix("```") {
        text = rest;
    }
    text.trim()
}

/// Parse `SS`, `MM:SS` or `HH:MM:SS` (fractional seconds allowed) into seconds.
fn parse_clock(raw: &str) -> Option<f64> {
    let parts: Vec<&str> = raw.trim().split(':').collect();
    if parts.is_empty() || parts.len() > 3 {
        return None;
    }

    let mut total = 0.0;
    for part in &parts {
        let value: f64 = part.trim().parse().ok()?;
        if value < 0.0 {
            return None;
        }
        total = total * 60.0 + value;
    }
    Some(total)
}

#[cfg(feature = "http-engine")]
pub use http::{HttpEngine, HttpEngineConfig};

#[cfg(feature = "http-engine")]
mod http {
    use std::time::{Duration, Instant};

    use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
    use tracing::debug;

    use super::{EngineRequest, TranscriptionEngine, parse_reply};
    use crate::transcript::TranscriptionResult;
    use crate::{Error, Result};

    /// Connection settings for [`HttpEngine`].
    #[derive(Debug, Clone)]
    pub struct HttpEngineConfig {
        /// URL the audio bytes are POSTed to.
        pub endpoint: String,
        pub api_key: Option<String>,
        pub model: String,
        /// Upper bound on one engine call, upload included.
        pub timeout: Duration,
    }

    /// A remote engine reached over HTTP.
    ///
    /// Each chunk is one `POST` whose body is the raw audio. Chunk metadata travels in
    /// `X-Scrivener-*` headers so the body stays a plain audio payload.
    pub struct HttpEngine {
        client: reqwest::Client,
        config: HttpEngineConfig,
    }

    impl HttpEngine {
        pub fn new(config: HttpEngineConfig) -> Result<Self> {
            let client = reqwest::Client::builder()
                .timeout(config.timeout)
                .build()
                .map_err(|err| Error::msg(format!("failed to build engine client: {err}")))?;
            Ok(Self { client, config })
        }
    }

    impl TranscriptionEngine for HttpEngine {
        fn model_id(&self) -> &str {
            &self.config.model
        }

        async fn transcribe(&self, request: EngineRequest) -> Result<TranscriptionResult> {
            let started = Instant::now();

            let mut builder = self
                .client
                .post(&self.config.endpoint)
                .header(CONTENT_TYPE, request.mime_type)
                .header("X-Scrivener-Model", &self.config.model)
                .header("X-Scrivener-File", &request.file_name)
                .header("X-Scrivener-Chunk-Index", request.chunk_index.to_string())
                .header("X-Scrivener-Chunk-Count", request.chunk_count.to_string())
                .header(
                    "X-Scrivener-Chunk-Seconds",
                    format!("{:.3}", request.target_chunk_seconds),
                );
            if let Some(key) = &self.config.api_key {
                builder = builder.header(AUTHORIZATION, format!("Bearer {key}"));
            }

            let response = builder
                .body(request.audio)
                .send()
                .await
                .map_err(|err| Error::engine(format!("engine request failed: {err}")))?;

            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|err| Error::engine(format!("failed to read engine reply: {err}")))?;

            if !status.is_success() {
                return Err(Error::engine(format!(
                    "engine returned {status}: {}",
                    body.trim()
                )));
            }

            debug!(
                file = %request.file_name,
                chunk = request.chunk_index,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "engine call finished"
            );

            Ok(parse_reply(&body))
        }
    }
}
