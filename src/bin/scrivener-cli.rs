use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;

use scrivener::cli::{EngineArgs, PipelineArgs};
use scrivener::{HttpEngine, JobRequest, JobStatus, LocalFolderSource, TranscriptionService};

#[tokio::main]
async fn main() -> Result<()> {
    scrivener::init_logging();
    let params = Params::parse();

    let config = params
        .pipeline
        .to_config()
        .context("invalid pipeline configuration")?;
    let engine =
        HttpEngine::new(params.engine.to_config()).context("failed to build engine client")?;
    let source = LocalFolderSource::new(&config);
    let service = TranscriptionService::new(engine, source, config)?;

    let mut request = JobRequest::new(params.folder.to_string_lossy());
    request.recursive = !params.no_recursive;
    request.output_dir = params.output;

    let submitted = service.submit(request).await?;
    let job_id = submitted.snapshot.job_id;
    submitted.task.await.context("job task failed")?;

    let results = service.results(job_id)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    serde_json::to_writer_pretty(&mut out, &results)?;
    writeln!(out)?;

    if results.status == JobStatus::Failed {
        bail!("every file failed");
    }
    Ok(())
}

#[derive(Parser, Debug)]
#[command(name = "scrivener")]
#[command(about = "Transcribe every recording in a folder")]
struct Params {
    /// Folder containing the recordings.
    #[arg(short = 'f', long = "folder")]
    folder: PathBuf,

    /// Output directory. Defaults to `<output-root>/<job id>`.
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Only transcribe files directly inside the folder.
    #[arg(long = "no-recursive", default_value_t = false)]
    no_recursive: bool,

    #[command(flatten)]
    engine: EngineArgs,

    #[command(flatten)]
    pipeline: PipelineArgs,
}
