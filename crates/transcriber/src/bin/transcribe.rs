use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use stemscore_domain::{ExportFormat, JsonExporter, ResultExporter, TextSummary};
use stemscore_notation::AbcExporter;
use stemscore_transcriber::{
    AnalysisRunner, GridResolution, TranscriptionConfig, TranscriptionJob, TranscriptionPipeline,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Transcribe a recording into per-instrument notation", long_about = None)]
struct Cli {
    /// Path to the audio file to transcribe
    input: PathBuf,
    /// YAML configuration file; defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Rhythmic grid notes are snapped to (quarter, eighth, sixteenth, ...)
    #[arg(short, long)]
    grid: Option<GridResolution>,
    /// Overall analysis budget in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,
    /// Print ABC notation instead of JSON
    #[arg(long, conflicts_with = "summary")]
    abc: bool,
    /// Print a plain-text summary instead of JSON
    #[arg(long)]
    summary: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => TranscriptionConfig::load(path)?,
        None => TranscriptionConfig::default(),
    };
    if let Some(grid) = cli.grid {
        config.quantizer.grid = grid;
    }

    let divisions = config.quantizer.grid.divisions_per_whole();
    let pipeline = TranscriptionPipeline::new(config)?;
    let mut runner = AnalysisRunner::new(Arc::new(pipeline));
    if let Some(ms) = cli.timeout_ms {
        runner = runner.with_timeout(Duration::from_millis(ms));
    }

    let job = TranscriptionJob::from_path(&cli.input)?;
    let result = runner.run(job, CancellationToken::new()).await?;

    let bytes = if cli.abc {
        AbcExporter::for_grid(divisions).export(&result, ExportFormat::Abc)?
    } else if cli.summary {
        TextSummary.export(&result, ExportFormat::Text)?
    } else {
        JsonExporter.export(&result, ExportFormat::Json)?
    };
    println!("{}", String::from_utf8_lossy(&bytes));
    Ok(())
}
