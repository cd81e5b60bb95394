use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use scrivener::artifacts::{self, ArtifactPaths};
use scrivener::{
    EngineRequest, ErrorKind, FileState, JobRequest, JobResults, JobStatus, LocalFolderSource,
    PipelineConfig, Segment, TranscriptionEngine, TranscriptionResult, TranscriptionService,
};

const SAMPLE_RATE: u32 = 16_000;

#[derive(Default)]
struct EngineStats {
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    requests: Mutex<Vec<(String, usize, usize, &'static str)>>,
    payload_sizes: Mutex<Vec<usize>>,
}

/// Deterministic stand-in for the remote engine.
///
/// Answers `"<stem> chunk <index>."` with one segment half a second into the chunk.
struct FakeEngine {
    stats: Arc<EngineStats>,
    delay: Duration,
    fail_file: Option<String>,
}

impl FakeEngine {
    fn new(stats: &Arc<EngineStats>) -> Self {
        Self {
            stats: Arc::clone(stats),
            delay: Duration::from_millis(5),
            fail_file: None,
        }
    }
}

impl TranscriptionEngine for FakeEngine {
    fn model_id(&self) -> &str {
        "fake-model"
    }

    async fn transcribe(&self, request: EngineRequest) -> scrivener::Result<TranscriptionResult> {
        let now = self.stats.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.stats.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.stats.calls.fetch_add(1, Ordering::SeqCst);

        if let Ok(mut requests) = self.stats.requests.lock() {
            requests.push((
                request.file_name.clone(),
                request.chunk_index,
                request.chunk_count,
                request.mime_type,
            ));
        }
        if let Ok(mut sizes) = self.stats.payload_sizes.lock() {
            sizes.push(request.audio.len());
        }

        if self.fail_file.as_deref() == Some(request.file_name.as_str()) {
            return Err(scrivener::Error::Engine(format!(
                "429 Too Many Requests: quota exhausted for {}",
                request.file_name
            )));
        }

        let stem = request
            .file_name
            .split('.')
            .next()
            .unwrap_or_default()
            .to_owned();
        let text = format!("{stem} chunk {}.", request.chunk_index);
        Ok(TranscriptionResult {
            language: "English".to_owned(),
            speakers: vec!["Speaker 1".to_owned()],
            segments: vec![Segment {
                start_seconds: 0.5,
                end_seconds: None,
                speaker: Some("Speaker 1".to_owned()),
                text: text.clone(),
            }],
            ..TranscriptionResult::from_text(text)
        })
    }
}

fn write_wav(path: &Path, seconds: u32) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for i in 0..SAMPLE_RATE * seconds {
        let sample = ((i % 100) as i16 - 50) * 200;
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(())
}

/// 8-bit mono audio: half the bytes per frame of the 16-bit chunks the worker cuts.
fn write_narrow_wav(path: &Path, sample_rate: u32, seconds: u32) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 8,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for i in 0..sample_rate * seconds {
        writer.write_sample((i % 64) as i8 - 32)?;
    }
    writer.finalize()?;
    Ok(())
}

struct Fixture {
    root: tempfile::TempDir,
}

impl Fixture {
    fn new(files: &[&str]) -> anyhow::Result<Self> {
        let root = tempfile::tempdir()?;
        for name in files {
            write_wav(&root.path().join("audio").join(name), 1)?;
        }
        Ok(Self { root })
    }

    fn folder(&self) -> PathBuf {
        self.root.path().join("audio")
    }

    fn output_dir(&self) -> PathBuf {
        self.root.path().join("out")
    }

    fn scratch_dir(&self) -> PathBuf {
        self.root.path().join("scratch")
    }

    fn config(&self) -> PipelineConfig {
        PipelineConfig {
            temp_dir: self.scratch_dir(),
            output_root: self.root.path().join("jobs"),
            ..PipelineConfig::default()
        }
    }

    fn request(&self) -> JobRequest {
        let mut request = JobRequest::new(self.folder().to_string_lossy());
        request.output_dir = Some(self.output_dir());
        request
    }

    fn service(
        &self,
        engine: FakeEngine,
        config: PipelineConfig,
    ) -> anyhow::Result<TranscriptionService<FakeEngine, LocalFolderSource>> {
        let source = LocalFolderSource::new(&config);
        Ok(TranscriptionService::new(engine, source, config)?)
    }
}

async fn run_job(
    service: &TranscriptionService<FakeEngine, LocalFolderSource>,
    request: JobRequest,
) -> anyhow::Result<JobResults> {
    let submitted = service.submit(request).await?;
    let job_id = submitted.snapshot.job_id;
    submitted.task.await?;
    Ok(service.results(job_id)?)
}

#[tokio::test]
async fn rerun_skips_every_file_and_keeps_the_combined_document() -> anyhow::Result<()> {
    let fixture = Fixture::new(&["a.wav", "b.wav", "c.wav"])?;
    let stats = Arc::new(EngineStats::default());
    let service = fixture.service(FakeEngine::new(&stats), fixture.config())?;

    let first = run_job(&service, fixture.request()).await?;
    assert_eq!(first.status, JobStatus::Completed);
    assert_eq!(first.successful, 3);
    let combined_path = first
        .combined_document
        .clone()
        .ok_or_else(|| anyhow::anyhow!("combined document missing"))?;
    let combined = std::fs::read(&combined_path)?;
    assert_eq!(stats.calls.load(Ordering::SeqCst), 3);

    let second = run_job(&service, fixture.request()).await?;
    assert_eq!(second.status, JobStatus::Completed);
    assert_eq!(second.skipped, 3);
    assert!(second.files.iter().all(|f| f.state == FileState::Skipped));
    assert_eq!(stats.calls.load(Ordering::SeqCst), 3);
    assert_eq!(std::fs::read(&combined_path)?, combined);
    Ok(())
}

#[tokio::test]
async fn one_failing_file_makes_the_job_partial() -> anyhow::Result<()> {
    let fixture = Fixture::new(&["a.wav", "b.wav", "c.wav"])?;
    let stats = Arc::new(EngineStats::default());
    let engine = FakeEngine {
        fail_file: Some("b.wav".to_owned()),
        ..FakeEngine::new(&stats)
    };
    let service = fixture.service(engine, fixture.config())?;

    let results = run_job(&service, fixture.request()).await?;
    assert_eq!(results.status, JobStatus::Partial);
    assert_eq!(results.successful, 2);
    assert_eq!(results.failed, 1);

    let states: Vec<FileState> = results.files.iter().map(|f| f.state).collect();
    assert_eq!(
        states,
        vec![FileState::Succeeded, FileState::Failed, FileState::Succeeded]
    );
    let error = results.files[1]
        .error
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("missing error for b.wav"))?;
    assert_eq!(error.kind, ErrorKind::Engine);
    assert_eq!(
        error.message,
        "429 Too Many Requests: quota exhausted for b.wav"
    );

    let combined = std::fs::read_to_string(fixture.output_dir().join("combined_transcript.txt"))?;
    assert!(combined.contains("a chunk 0."));
    assert!(combined.contains("c chunk 0."));
    assert!(!combined.contains("b chunk 0."));
    assert!(combined.contains("FAILED FILES"));
    assert!(combined.contains("b.wav: 429 Too Many Requests"));
    assert!(!fixture.output_dir().join("b_transcription.json").exists());
    Ok(())
}

#[tokio::test]
async fn concurrent_files_never_exceed_the_limit() -> anyhow::Result<()> {
    let fixture = Fixture::new(&["1.wav", "2.wav", "3.wav", "4.wav", "5.wav"])?;
    let stats = Arc::new(EngineStats::default());
    let engine = FakeEngine {
        delay: Duration::from_millis(60),
        ..FakeEngine::new(&stats)
    };
    let config = PipelineConfig {
        max_concurrent_files: 2,
        ..fixture.config()
    };
    let service = fixture.service(engine, config)?;

    let results = run_job(&service, fixture.request()).await?;
    assert_eq!(results.status, JobStatus::Completed);
    assert_eq!(stats.calls.load(Ordering::SeqCst), 5);
    let peak = stats.peak.load(Ordering::SeqCst);
    assert!((1..=2).contains(&peak), "peak concurrency was {peak}");
    Ok(())
}

#[tokio::test]
async fn processed_count_only_moves_forward() -> anyhow::Result<()> {
    let fixture = Fixture::new(&["a.wav", "b.wav", "c.wav", "d.wav"])?;
    let stats = Arc::new(EngineStats::default());
    let engine = FakeEngine {
        delay: Duration::from_millis(20),
        ..FakeEngine::new(&stats)
    };
    let config = PipelineConfig {
        max_concurrent_files: 1,
        ..fixture.config()
    };
    let service = fixture.service(engine, config)?;

    let submitted = service.submit(fixture.request()).await?;
    let job_id = submitted.snapshot.job_id;
    assert_eq!(submitted.snapshot.total_files, 4);

    let mut seen = vec![submitted.snapshot.processed_files];
    while !submitted.task.is_finished() {
        let snapshot = service.status(job_id)?;
        assert!(snapshot.processed_files <= snapshot.total_files);
        seen.push(snapshot.processed_files);
        tokio::time::sleep(Duration::from_millis(3)).await;
    }
    submitted.task.await?;

    let last = service.status(job_id)?;
    seen.push(last.processed_files);
    assert!(seen.windows(2).all(|pair| pair[0] <= pair[1]), "{seen:?}");
    assert_eq!(last.processed_files, 4);
    assert!(last.status.is_terminal());
    Ok(())
}

#[tokio::test]
async fn large_files_are_split_and_merged_in_order() -> anyhow::Result<()> {
    let fixture = Fixture::new(&[])?;
    write_wav(&fixture.folder().join("long.wav"), 3)?;

    let stats = Arc::new(EngineStats::default());
    // Three seconds of 16 kHz mono 16-bit audio is ~96 KB.
    let config = PipelineConfig {
        max_chunk_size_bytes: 40_000,
        ..fixture.config()
    };
    let service = fixture.service(FakeEngine::new(&stats), config)?;

    let results = run_job(&service, fixture.request()).await?;
    assert_eq!(results.status, JobStatus::Completed);

    let merged = results.files[0]
        .result
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("missing result"))?;
    assert_eq!(
        merged.transcription,
        "long chunk 0. long chunk 1. long chunk 2."
    );
    assert_eq!(merged.num_chunks, Some(3));
    assert_eq!(merged.model, "fake-model");
    assert_eq!(merged.speakers, vec!["Speaker 1"]);

    let starts: Vec<f64> = merged.segments.iter().map(|s| s.start_seconds).collect();
    assert_eq!(starts.len(), 3);
    assert!(starts.windows(2).all(|pair| pair[0] <= pair[1]), "{starts:?}");
    assert!((starts[2] - 2.5).abs() < 1e-6, "{starts:?}");

    let requests = stats
        .requests
        .lock()
        .map_err(|_| anyhow::anyhow!("poisoned"))?
        .clone();
    let indices: Vec<usize> = requests.iter().map(|r| r.1).collect();
    assert_eq!(indices, vec![0, 1, 2]);
    assert!(requests.iter().all(|r| r.2 == 3 && r.3 == "audio/wav"));

    let sizes = stats
        .payload_sizes
        .lock()
        .map_err(|_| anyhow::anyhow!("poisoned"))?
        .clone();
    assert!(sizes.iter().all(|&size| size <= 40_000), "{sizes:?}");
    Ok(())
}

#[tokio::test]
async fn re_encoded_chunks_never_exceed_the_chunk_limit() -> anyhow::Result<()> {
    let fixture = Fixture::new(&[])?;
    // Four seconds at 8 kHz, 8-bit: 32,044 bytes on disk, 64,000 bytes once re-encoded.
    write_narrow_wav(&fixture.folder().join("narrow.wav"), 8_000, 4)?;

    let stats = Arc::new(EngineStats::default());
    let config = PipelineConfig {
        max_chunk_size_bytes: 10_000,
        ..fixture.config()
    };
    let service = fixture.service(FakeEngine::new(&stats), config)?;

    let results = run_job(&service, fixture.request()).await?;
    assert_eq!(results.status, JobStatus::Completed);

    let sizes = stats
        .payload_sizes
        .lock()
        .map_err(|_| anyhow::anyhow!("poisoned"))?
        .clone();
    assert!(sizes.len() > 4, "{sizes:?}");
    assert!(sizes.iter().all(|&size| size <= 10_000), "{sizes:?}");

    let merged = results.files[0]
        .result
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("missing result"))?;
    assert_eq!(merged.num_chunks, Some(sizes.len()));
    Ok(())
}

#[tokio::test]
async fn files_sharing_artifact_names_are_not_silently_skipped() -> anyhow::Result<()> {
    let fixture = Fixture::new(&["a/talk.wav", "b/talk.wav", "talk.mp3"])?;
    let stats = Arc::new(EngineStats::default());
    let config = PipelineConfig {
        max_concurrent_files: 1,
        ..fixture.config()
    };
    let service = fixture.service(FakeEngine::new(&stats), config)?;

    let results = run_job(&service, fixture.request()).await?;
    let outcomes: Vec<(&str, FileState)> = results
        .files
        .iter()
        .map(|f| (f.path.as_str(), f.state))
        .collect();
    assert_eq!(
        outcomes,
        vec![
            ("a/talk.wav", FileState::Succeeded),
            ("b/talk.wav", FileState::Failed),
            ("talk.mp3", FileState::Failed),
        ]
    );
    assert_eq!(results.status, JobStatus::Partial);
    assert_eq!(stats.calls.load(Ordering::SeqCst), 1);

    for report in &results.files[1..] {
        let error = report
            .error
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("missing error for {}", report.path))?;
        assert_eq!(error.kind, ErrorKind::Artifact);
        assert!(error.message.contains("a/talk.wav"), "{}", error.message);
    }

    // A rerun skips the owner and keeps rejecting the others.
    let rerun = run_job(&service, fixture.request()).await?;
    let states: Vec<FileState> = rerun.files.iter().map(|f| f.state).collect();
    assert_eq!(
        states,
        vec![FileState::Skipped, FileState::Failed, FileState::Failed]
    );
    assert_eq!(stats.calls.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn existing_artifacts_skip_the_engine() -> anyhow::Result<()> {
    let fixture = Fixture::new(&["x.wav", "y.wav"])?;
    let cached = TranscriptionResult::from_text("cached words.");
    let x = ArtifactPaths::for_source(&fixture.output_dir(), "x.wav");
    artifacts::persist(&x, &cached, "x.wav").await?;

    // A JSON artifact without its text artifact is not complete.
    let y = ArtifactPaths::for_source(&fixture.output_dir(), "y.wav");
    artifacts::persist(&y, &cached, "y.wav").await?;
    std::fs::remove_file(&y.text)?;

    let stats = Arc::new(EngineStats::default());
    let service = fixture.service(FakeEngine::new(&stats), fixture.config())?;
    let results = run_job(&service, fixture.request()).await?;

    assert_eq!(results.files[0].state, FileState::Skipped);
    assert_eq!(
        results.files[0].result.as_deref(),
        Some(&cached),
        "skipped file should carry the cached result"
    );
    assert_eq!(results.files[1].state, FileState::Succeeded);
    assert_eq!(stats.calls.load(Ordering::SeqCst), 1);

    let combined = std::fs::read_to_string(fixture.output_dir().join("combined_transcript.txt"))?;
    assert!(combined.contains("cached words."));
    assert!(combined.contains("y chunk 0."));
    Ok(())
}

#[tokio::test]
async fn missing_folder_fails_at_submission() -> anyhow::Result<()> {
    let fixture = Fixture::new(&[])?;
    let stats = Arc::new(EngineStats::default());
    let service = fixture.service(FakeEngine::new(&stats), fixture.config())?;

    let mut request = fixture.request();
    request.folder = fixture.root.path().join("nope").to_string_lossy().into_owned();
    let err = service.submit(request).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Discovery);

    let jobs = service.list();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::Failed);
    assert_eq!(jobs[0].processed_files, 0);
    Ok(())
}

#[tokio::test]
async fn scratch_space_is_released_after_each_file() -> anyhow::Result<()> {
    let fixture = Fixture::new(&["a.wav", "b.wav"])?;
    let stats = Arc::new(EngineStats::default());
    let engine = FakeEngine {
        fail_file: Some("b.wav".to_owned()),
        ..FakeEngine::new(&stats)
    };
    let service = fixture.service(engine, fixture.config())?;

    run_job(&service, fixture.request()).await?;
    let leftovers = std::fs::read_dir(fixture.scratch_dir())?.count();
    assert_eq!(leftovers, 0);
    Ok(())
}

#[tokio::test]
async fn oversized_files_fail_before_the_engine() -> anyhow::Result<()> {
    let fixture = Fixture::new(&["big.wav"])?;
    let stats = Arc::new(EngineStats::default());
    let service = fixture.service(FakeEngine::new(&stats), fixture.config())?;

    let mut request = fixture.request();
    request.max_file_size_bytes = Some(1_000);
    let results = run_job(&service, request).await?;

    assert_eq!(results.status, JobStatus::Failed);
    let error = results.files[0]
        .error
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("missing error"))?;
    assert_eq!(error.kind, ErrorKind::Planning);
    assert!(error.message.contains("1000 byte limit"));
    assert_eq!(stats.calls.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn empty_folder_completes_and_can_be_evicted() -> anyhow::Result<()> {
    let fixture = Fixture::new(&[])?;
    std::fs::create_dir_all(fixture.folder())?;
    let stats = Arc::new(EngineStats::default());
    let service = fixture.service(FakeEngine::new(&stats), fixture.config())?;

    let submitted = service.submit(fixture.request()).await?;
    let job_id = submitted.snapshot.job_id;
    assert_eq!(submitted.snapshot.status, JobStatus::Completed);
    submitted.task.await?;

    let results = service.results(job_id)?;
    assert_eq!(results.total_files, 0);
    assert!(fixture.output_dir().join("combined_transcript.txt").is_file());

    service.evict(job_id)?;
    assert_eq!(service.status(job_id).unwrap_err().kind(), ErrorKind::Internal);
    assert!(service.list().is_empty());
    Ok(())
}

#[tokio::test]
async fn default_output_dir_is_keyed_by_job_id() -> anyhow::Result<()> {
    let fixture = Fixture::new(&["a.wav"])?;
    let stats = Arc::new(EngineStats::default());
    let config = fixture.config();
    let output_root = config.output_root.clone();
    let service = fixture.service(FakeEngine::new(&stats), config)?;

    let request = JobRequest::new(fixture.folder().to_string_lossy());
    let results = run_job(&service, request).await?;

    let expected = output_root.join(results.job_id.to_string());
    assert_eq!(results.output_dir, expected);
    assert!(expected.join("a_transcription.json").is_file());
    assert!(expected.join("a_transcript.txt").is_file());
    Ok(())
}
