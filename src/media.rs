//! Media inspection and chunk cutting built on Symphonia and hound.
//!
//! Responsibilities:
//! - Probe a file for its size and duration (the Chunk Planner's inputs)
//! - Cut a file into planned chunks, one mono WAV per chunk, in a single decode pass
//!
//! Both entry points are blocking; async callers should run them on the blocking pool.
//! Failures here mean the file's audio could not be read, so they surface as planning errors.

use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow, bail};
use hound::{SampleFormat, WavSpec, WavWriter};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, Packet, Track};
use symphonia::core::io::{MediaSourceStream, MediaSourceStreamOptions};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::planner::{Chunk, PayloadRate};
use crate::{Error, Result};

/// Header size of the 16-bit PCM WAV files hound writes.
const WAV_HEADER_BYTES: u64 = 44;

const CHUNK_BYTES_PER_FRAME: u64 = 2;

/// What we learned about one audio file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioInfo {
    pub size_bytes: u64,
    pub duration_ms: u64,
    pub sample_rate: u32,
    pub channels: usize,
}

impl AudioInfo {
    /// Byte cost of the chunk files [`cut_chunks`] writes for this audio.
    ///
    /// The overhead covers the header plus two milliseconds of frames: one for boundary
    /// rounding and one for the sub-millisecond tail the probed duration drops.
    pub fn chunk_payload(&self) -> PayloadRate {
        let bytes_per_second = u64::from(self.sample_rate) * CHUNK_BYTES_PER_FRAME;
        PayloadRate {
            bytes_per_second,
            overhead_bytes: WAV_HEADER_BYTES + 2 * bytes_per_second.div_ceil(1000),
        }
    }
}

/// Probe a file's size and duration.
///
/// Duration comes from the container's frame count when it has one; otherwise we walk the
/// packets and sum their durations.
pub fn probe(path: &Path) -> Result<AudioInfo> {
    inspect(path).map_err(|err| Error::planning(format!("{}: {err:#}", path.display())))
}

/// Decode `path` once and write every planned chunk as a mono 16-bit WAV under `dir`.
///
/// Output files are named `chunk_<index>.wav` and returned in chunk order. The last chunk also
/// receives any frames past the planned end (container durations are rarely frame-exact).
pub fn cut_chunks(path: &Path, chunks: &[Chunk], dir: &Path) -> Result<Vec<PathBuf>> {
    cut(path, chunks, dir).map_err(|err| {
        Error::planning(format!("failed to cut '{}': {err:#}", path.display()))
    })
}

/// MIME type to send alongside raw file bytes, keyed by extension.
pub fn mime_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());

    match ext.as_deref() {
        Some("wav") => "audio/wav",
        Some("m4a") => "audio/m4a",
        Some("aac") => "audio/aac",
        Some("ogg") => "audio/ogg",
        Some("flac") => "audio/flac",
        Some("opus") => "audio/opus",
        Some("wma") => "audio/x-ms-wma",
        // MP3 is the most common case and the fallback for unknown extensions.
        _ => "audio/mpeg",
    }
}

fn inspect(path: &Path) -> anyhow::Result<AudioInfo> {
    let size_bytes = std::fs::metadata(path)
        .with_context(|| format!("failed to stat '{}'", path.display()))?
        .len();

    let (mut format, track) = open_default_track(path)?;

    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| anyhow!("audio track has no sample rate"))?;
    let channels = track
        .codec_params
        .channels
        .map(|c| c.count())
        .unwrap_or(1);

    let duration_ms = match track.codec_params.n_frames {
        Some(frames) if frames > 0 => frames_to_ms(frames, sample_rate),
        _ => sum_packet_durations_ms(&mut format, &track, sample_rate)?,
    };

    Ok(AudioInfo {
        size_bytes,
        duration_ms,
        sample_rate,
        channels,
    })
}

fn cut(path: &Path, chunks: &[Chunk], dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    if chunks.is_empty() {
        bail!("no chunks to cut");
    }

    let (mut format, track) = open_default_track(path)?;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| anyhow!("audio track has no sample rate"))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| anyhow!(e))
        .context("failed to create decoder for audio track")?;

    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    // Frame ranges per chunk; the last one is open-ended.
    let last = chunks.len() - 1;
    let ends: Vec<u64> = chunks
        .iter()
        .enumerate()
        .map(|(i, c)| {
            if i == last {
                u64::MAX
            } else {
                ms_to_frames(c.end_ms, sample_rate)
            }
        })
        .collect();

    let mut paths = Vec::with_capacity(chunks.len());
    let mut writers = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        let out = dir.join(format!("chunk_{}.wav", chunk.index));
        let writer = WavWriter::create(&out, spec)
            .with_context(|| format!("failed to create '{}'", out.display()))?;
        paths.push(out);
        writers.push(writer);
    }

    let mut sample_buf: Option<SampleBuffer<f32>> = None;
    let mut frame_pos: u64 = 0;
    let mut cursor = 0usize;

    while let Some(packet) = next_packet(&mut format)? {
        if packet.track_id() != track.id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(buf) => buf,
            // Recoverable: corrupted frame, but decoding can continue.
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(SymphoniaError::IoError(_)) => break,
            Err(e) => return Err(anyhow!(e)).context("decoder failure"),
        };

        let decoded_spec = *decoded.spec();
        let channels = decoded_spec.channels.count();
        if channels == 0 {
            bail!("decoded audio had zero channels");
        }

        let needed = decoded.capacity() * channels;
        if sample_buf.as_ref().is_none_or(|buf| buf.capacity() < needed) {
            sample_buf = Some(SampleBuffer::<f32>::new(
                decoded.capacity() as u64,
                decoded_spec,
            ));
        }
        let buf = sample_buf
            .as_mut()
            .ok_or_else(|| anyhow!("sample buffer not initialized"))?;
        buf.copy_interleaved_ref(decoded);

        for frame in buf.samples().chunks(channels) {
            while frame_pos >= ends[cursor] {
                cursor += 1;
            }
            let mono = frame.iter().sum::<f32>() / channels as f32;
            writers[cursor]
                .write_sample(to_pcm16(mono))
                .context("failed to write chunk sample")?;
            frame_pos += 1;
        }
    }

    for writer in writers {
        writer.finalize().context("failed to finalize chunk WAV")?;
    }

    Ok(paths)
}

/// Open a file and pick its default audio track.
///
/// Track selection policy:
/// - choose the first track that looks decodable (codec != NULL)
/// - and has a known sample rate
fn open_default_track(path: &Path) -> anyhow::Result<(Box<dyn FormatReader>, Track)> {
    let file =
        File::open(path).with_context(|| format!("failed to open '{}'", path.display()))?;

    let mss = MediaSourceStream::new(
        Box::new(file),
        MediaSourceStreamOptions {
            // Symphonia expects a power-of-two buffer > 32KiB for good probing behavior.
            buffer_len: 256 * 1024,
        },
    );

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|ext| ext.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| anyhow!(e))
        .context("failed to probe media stream")?;

    let format = probed.format;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL && t.codec_params.sample_rate.is_some())
        .cloned()
        .ok_or_else(|| anyhow!("no audio track found"))?;

    Ok((format, track))
}

/// Read the next packet, treating IO errors as "end of stream".
fn next_packet(format: &mut Box<dyn FormatReader>) -> anyhow::Result<Option<Packet>> {
    match format.next_packet() {
        Ok(p) => Ok(Some(p)),
        Err(SymphoniaError::IoError(_)) => Ok(None),
        Err(e) => Err(anyhow!(e)).context("failed reading packet"),
    }
}

fn sum_packet_durations_ms(
    format: &mut Box<dyn FormatReader>,
    track: &Track,
    sample_rate: u32,
) -> anyhow::Result<u64> {
    let mut total_ts: u64 = 0;
    while let Some(packet) = next_packet(format)? {
        if packet.track_id() == track.id {
            total_ts += packet.dur;
        }
    }

    let ms = match track.codec_params.time_base {
        Some(tb) => {
            let time = tb.calc_time(total_ts);
            time.seconds * 1000 + (time.frac * 1000.0).round() as u64
        }
        None => frames_to_ms(total_ts, sample_rate),
    };
    Ok(ms)
}

fn frames_to_ms(frames: u64, sample_rate: u32) -> u64 {
    (u128::from(frames) * 1000 / u128::from(sample_rate.max(1))) as u64
}

fn ms_to_frames(ms: u64, sample_rate: u32) -> u64 {
    (u128::from(ms) * u128::from(sample_rate) / 1000) as u64
}

fn to_pcm16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16
}
