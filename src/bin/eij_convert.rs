// eij_convert - batch .8ij to PNG converter
// Splits 12-bit JPEG frame containers into 8-bit PNG frames, in parallel

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use eij_convert::writer::ensure_dir;
use eij_convert::{
    convert_file, discover_jobs, run_batch, BatchConfig, BatchJob, BatchSummary, InProcessRunner,
    JobRunner, OutputFormat, ScalingPolicy, SubprocessRunner,
};

#[derive(Parser)]
#[command(
    name = "eij_convert",
    version,
    about = "Convert .8ij 12-bit JPEG containers to 8-bit PNG frames"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Convert a container, or every container under a directory, in parallel
    Convert(ConvertArgs),
    /// Convert a single container in this process
    Extract(ExtractArgs),
}

#[derive(Args)]
struct ConvertArgs {
    /// Input .8ij file or directory
    input: PathBuf,

    /// Output directory for frames
    output: PathBuf,

    /// Brightness scaling method
    #[arg(long, value_enum, default_value_t = ScalingPolicy::Linear)]
    scaling: ScalingPolicy,

    /// Mirror the input directory structure in the output
    #[arg(long)]
    preserve_structure: bool,

    /// Number of parallel workers
    #[arg(long, default_value_t = 6)]
    workers: usize,

    /// Per-file timeout in seconds
    #[arg(long, default_value_t = 3600)]
    timeout_secs: u64,

    /// Output image format
    #[arg(long, value_enum, default_value_t = OutputFormat::Png)]
    format: OutputFormat,

    /// Convert on worker threads instead of child processes (no hard kill on timeout)
    #[arg(long)]
    in_process: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Args)]
struct ExtractArgs {
    /// Input .8ij file
    input: PathBuf,

    /// Output directory for frames
    output: PathBuf,

    /// Brightness scaling method
    #[arg(long, value_enum, default_value_t = ScalingPolicy::Linear)]
    scaling: ScalingPolicy,

    /// Output image format
    #[arg(long, value_enum, default_value_t = OutputFormat::Png)]
    format: OutputFormat,

    /// Print the file summary as JSON on stdout
    #[arg(long)]
    json: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_level))
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    match cli.command {
        Command::Convert(args) => {
            init_logging(args.verbose);
            let code = convert(args).await?;
            // Abandoned in-process conversions must not hold up exit
            std::process::exit(code);
        }
        Command::Extract(args) => {
            init_logging(args.verbose);
            extract(args)
        }
    }
}

async fn convert(args: ConvertArgs) -> Result<i32> {
    info!("🔍 Scanning for .8ij files in {}", args.input.display());
    let jobs = discover_jobs(
        &args.input,
        &args.output,
        args.scaling,
        args.format,
        args.preserve_structure,
    )
    .with_context(|| format!("Failed to scan {}", args.input.display()))?;

    if jobs.is_empty() {
        warn!("❌ No .8ij files found in {}", args.input.display());
        return Ok(0);
    }

    info!("📁 Found {} .8ij files", jobs.len());
    info!("📊 Scaling method: {}", args.scaling);

    ensure_dir(&args.output)
        .with_context(|| format!("Failed to create output directory {}", args.output.display()))?;

    let runner: Arc<dyn JobRunner> = if args.in_process {
        Arc::new(InProcessRunner)
    } else {
        Arc::new(
            SubprocessRunner::current_exe()
                .context("Failed to locate converter executable")?
                .verbose(args.verbose),
        )
    };

    let config = BatchConfig {
        workers: args.workers,
        timeout: Duration::from_secs(args.timeout_secs),
    };
    let summary = run_batch(jobs, &config, runner).await;
    report(&summary, &args.output);

    Ok(summary.exit_code())
}

fn report(summary: &BatchSummary, output: &std::path::Path) {
    info!("{}", "=".repeat(50));
    info!("🏁 Conversion Complete!");
    info!("✅ Successful: {}", summary.succeeded);
    info!("❌ Failed: {}", summary.failed);
    if summary.timed_out > 0 {
        info!("⏰ Timed out: {}", summary.timed_out);
    }
    info!("🖼️  Total frames extracted: {}", summary.total_frames);
    if summary.frames_failed > 0 {
        info!("⚠️  Frames skipped: {}", summary.frames_failed);
    }
    info!("⏱️  Total time: {:.1} minutes", summary.elapsed().as_secs_f64() / 60.0);
    info!("📈 Average: {:.1} seconds per file", summary.average_per_file().as_secs_f64());
    info!("📂 Output saved to: {}", output.display());
    info!("{}", "=".repeat(50));
}

fn extract(args: ExtractArgs) -> Result<ExitCode> {
    let job = BatchJob::new(&args.input, &args.output, args.scaling).with_format(args.format);
    let summary = convert_file(&job)
        .with_context(|| format!("Failed to convert {}", args.input.display()))?;

    if args.json {
        println!("{}", serde_json::to_string(&summary).context("Failed to serialize summary")?);
    }

    Ok(if summary.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
