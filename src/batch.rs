//! Parallel batch conversion
//!
//! A fixed pool of worker tasks pulls jobs from a bounded queue and pushes
//! results onto a channel drained by the coordinator. Workers share
//! nothing but the queue; each job is bounded by a wall-clock timeout.
//!
//! ## Job lifecycle
//!
//! `Queued -> Running -> {Succeeded, Failed, TimedOut}`
//!
//! Two runners are provided:
//!
//! - [`SubprocessRunner`] converts each file in a child process that is
//!   killed on timeout. A crash or hang never touches the coordinator.
//! - [`InProcessRunner`] converts on the blocking thread pool. A timed-out
//!   conversion is abandoned and keeps its thread until it returns.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use crate::container::CONTAINER_EXTENSION;
use crate::depth::ScalingPolicy;
use crate::error::{ConvertError, Result};
use crate::metrics::{BatchSummary, Timer};
use crate::pipeline::{convert_file, BatchJob, FileSummary};
use crate::writer::OutputFormat;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed | JobStatus::TimedOut)
    }
}

/// Outcome of one job, produced exactly once
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    pub input_file: PathBuf,
    pub status: JobStatus,
    pub frames_extracted: u64,
    pub frames_failed: u64,
    pub error_detail: Option<String>,
    pub elapsed_ms: u64,
}

impl BatchResult {
    pub fn success(&self) -> bool {
        self.status == JobStatus::Succeeded
    }

    fn from_summary(summary: FileSummary, elapsed_ms: u64) -> Self {
        let status = if summary.is_success() {
            JobStatus::Succeeded
        } else {
            JobStatus::Failed
        };
        Self {
            error_detail: summary.failure_detail(),
            frames_extracted: summary.frames_written,
            frames_failed: summary.frames_failed(),
            input_file: summary.input_file,
            status,
            elapsed_ms,
        }
    }

    fn failed(job: &BatchJob, status: JobStatus, detail: String, elapsed_ms: u64) -> Self {
        Self {
            input_file: job.input_file.clone(),
            status,
            frames_extracted: 0,
            frames_failed: 0,
            error_detail: Some(detail),
            elapsed_ms,
        }
    }
}

/// Executes one conversion job
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, job: &BatchJob) -> Result<FileSummary>;
}

/// Runs the pipeline on tokio's blocking pool
#[derive(Debug, Default, Clone)]
pub struct InProcessRunner;

#[async_trait]
impl JobRunner for InProcessRunner {
    async fn run(&self, job: &BatchJob) -> Result<FileSummary> {
        let job = job.clone();
        tokio::task::spawn_blocking(move || convert_file(&job))
            .await
            .map_err(|e| ConvertError::Worker(format!("conversion task failed: {}", e)))?
    }
}

/// Runs `<program> extract --json` per job and reads back the file summary
#[derive(Debug, Clone)]
pub struct SubprocessRunner {
    program: PathBuf,
    verbose: bool,
}

impl SubprocessRunner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            verbose: false,
        }
    }

    /// Re-invoke the running executable
    pub fn current_exe() -> Result<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

#[async_trait]
impl JobRunner for SubprocessRunner {
    async fn run(&self, job: &BatchJob) -> Result<FileSummary> {
        let mut cmd = Command::new(&self.program);
        cmd.arg("extract")
            .arg(&job.input_file)
            .arg(&job.output_directory)
            .args(["--scaling", job.scaling_policy.as_str()])
            .args(["--format", job.output_format.extension()])
            .arg("--json")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if self.verbose {
            cmd.arg("--verbose");
        }

        let output = cmd
            .output()
            .await
            .map_err(|e| {
                ConvertError::Worker(format!("failed to launch {}: {}", self.program.display(), e))
            })?;

        match serde_json::from_slice::<FileSummary>(&output.stdout) {
            Ok(summary) => Ok(summary),
            Err(e) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
                Err(ConvertError::Worker(format!(
                    "worker exited with {} and no report ({}): {}",
                    output.status,
                    e,
                    tail.into_iter().rev().collect::<Vec<_>>().join(" | ")
                )))
            }
        }
    }
}

pub struct BatchConfig {
    pub workers: usize,
    /// Wall-clock limit per job
    pub timeout: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            workers: 6,
            timeout: Duration::from_secs(3600),
        }
    }
}

fn is_container(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case(CONTAINER_EXTENSION))
        .unwrap_or(false)
}

fn collect_containers(dir: &Path, found: &mut Vec<PathBuf>) -> std::io::Result<()> {
    let mut entries = std::fs::read_dir(dir)?.collect::<std::io::Result<Vec<_>>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            collect_containers(&path, found)?;
        } else if path.is_file() && is_container(&path) {
            found.push(path);
        }
    }
    Ok(())
}

/// Build jobs for `input`, which may be a single container or a directory
/// searched recursively.
///
/// With `preserve_structure`, a container at `input/a/b/x.8ij` writes to
/// `output/a/b/`; otherwise every job writes straight into `output`.
pub fn discover_jobs(
    input: &Path,
    output: &Path,
    policy: ScalingPolicy,
    format: OutputFormat,
    preserve_structure: bool,
) -> Result<Vec<BatchJob>> {
    if input.is_file() {
        return Ok(vec![BatchJob::new(input, output, policy).with_format(format)]);
    }
    if !input.is_dir() {
        return Err(ConvertError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} is not a valid file or directory", input.display()),
        )));
    }

    let mut files = Vec::new();
    collect_containers(input, &mut files)?;

    Ok(files
        .into_iter()
        .map(|file| {
            let out_dir = match (preserve_structure, file.strip_prefix(input)) {
                (true, Ok(rel)) => match rel.parent().filter(|p| !p.as_os_str().is_empty()) {
                    Some(parent) => output.join(parent),
                    None => output.to_path_buf(),
                },
                _ => output.to_path_buf(),
            };
            BatchJob::new(file, out_dir, policy).with_format(format)
        })
        .collect())
}

async fn run_job(
    worker: usize,
    runner: &dyn JobRunner,
    job: &BatchJob,
    limit: Duration,
) -> BatchResult {
    let timer = Timer::new();
    let name = display_name(&job.input_file);
    debug!("[worker {}] {:?}: {}", worker, JobStatus::Running, job.input_file.display());
    info!("[worker {}] Starting: {}", worker, name);

    match tokio::time::timeout(limit, runner.run(job)).await {
        Ok(Ok(summary)) => {
            let result = BatchResult::from_summary(summary, timer.elapsed_ms());
            if result.success() {
                info!(
                    "[worker {}] ✅ Completed: {} ({} frames)",
                    worker, name, result.frames_extracted
                );
            } else {
                warn!("[worker {}] ❌ Failed: {}", worker, name);
            }
            result
        }
        Ok(Err(e)) => {
            warn!("[worker {}] 💥 Error: {} - {}", worker, name, e);
            BatchResult::failed(job, JobStatus::Failed, e.to_string(), timer.elapsed_ms())
        }
        Err(_) => {
            warn!("[worker {}] ⏰ Timeout: {} after {:?}", worker, name, limit);
            BatchResult::failed(
                job,
                JobStatus::TimedOut,
                format!("timed out after {}s", limit.as_secs_f64()),
                timer.elapsed_ms(),
            )
        }
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Run every job on a pool of `config.workers` workers and aggregate the
/// results as they complete.
pub async fn run_batch(
    jobs: Vec<BatchJob>,
    config: &BatchConfig,
    runner: Arc<dyn JobRunner>,
) -> BatchSummary {
    let total = jobs.len();
    let mut summary = BatchSummary::new(total);
    if total == 0 {
        return summary;
    }

    let workers = config.workers.clamp(1, total);
    let timer = Timer::new();
    info!("🚀 Using {} parallel workers for {} files", workers, total);

    let (job_tx, job_rx) = mpsc::channel::<BatchJob>(workers);
    let job_rx = Arc::new(Mutex::new(job_rx));
    let (result_tx, mut result_rx) = mpsc::channel::<BatchResult>(workers);

    let mut handles = Vec::with_capacity(workers);
    for worker in 0..workers {
        let job_rx = Arc::clone(&job_rx);
        let result_tx = result_tx.clone();
        let runner = Arc::clone(&runner);
        let limit = config.timeout;
        handles.push(tokio::spawn(async move {
            loop {
                let next = job_rx.lock().await.recv().await;
                let Some(job) = next else { break };
                let result = run_job(worker, runner.as_ref(), &job, limit).await;
                if result_tx.send(result).await.is_err() {
                    break;
                }
            }
        }));
    }
    drop(result_tx);

    let feeder = tokio::spawn(async move {
        for job in jobs {
            debug!("{:?}: {}", JobStatus::Queued, job.input_file.display());
            if job_tx.send(job).await.is_err() {
                break;
            }
        }
    });

    while let Some(result) = result_rx.recv().await {
        debug_assert!(result.status.is_terminal());
        if let Some(detail) = result.error_detail.as_deref().filter(|_| !result.success()) {
            info!("   Error details: {}", detail);
        }
        summary.record(&result);

        let eta = summary.eta(timer.elapsed(), workers);
        info!(
            "📊 Progress: {}/{} ({} ✅, {} ❌) | ETA: {:.1} min",
            summary.processed(),
            total,
            summary.succeeded,
            summary.unsuccessful(),
            eta.as_secs_f64() / 60.0
        );
    }

    if let Err(e) = feeder.await {
        error!("Job feeder failed: {}", e);
    }
    for handle in handles {
        if let Err(e) = handle.await {
            error!("Worker task failed: {}", e);
        }
    }

    let lost = summary.total_files.saturating_sub(summary.processed());
    if lost > 0 {
        error!("{} jobs produced no result", lost);
        summary.failed += lost;
    }

    summary.elapsed_ms = timer.elapsed_ms();
    summary
}
