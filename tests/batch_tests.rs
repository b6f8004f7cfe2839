//! Batch orchestration over real containers

mod common;

use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{flat_gray_12, png_files, write_container};
use eij_convert::{
    discover_jobs, run_batch, BatchConfig, BatchJob, FileSummary, InProcessRunner, JobRunner,
    OutputFormat, Result, ScalingPolicy, SubprocessRunner,
};
use tempfile::TempDir;

const CLI: &str = env!("CARGO_BIN_EXE_eij_convert");

/// Converts in-process, but never finishes files named `slow.8ij`
struct StallingRunner;

#[async_trait]
impl JobRunner for StallingRunner {
    async fn run(&self, job: &BatchJob) -> Result<FileSummary> {
        if job.stem() == "slow" {
            tokio::time::sleep(Duration::from_secs(600)).await;
        }
        InProcessRunner.run(job).await
    }
}

fn frames(count: u32) -> Vec<(u32, Vec<u8>)> {
    (0..count).map(|i| (i, flat_gray_12(8, 8, 500 + i as u16))).collect()
}

#[tokio::test]
async fn test_timeout_isolated_to_one_file() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("in");
    for i in 0..9 {
        write_container(&input.join(format!("file_{}.8ij", i)), &frames(2));
    }
    write_container(&input.join("slow.8ij"), &frames(5));

    let jobs = discover_jobs(
        &input,
        &dir.path().join("out"),
        ScalingPolicy::Linear,
        OutputFormat::Png,
        false,
    )
    .unwrap();
    assert_eq!(jobs.len(), 10);

    let config = BatchConfig {
        workers: 4,
        timeout: Duration::from_secs(2),
    };
    let summary = run_batch(jobs, &config, Arc::new(StallingRunner)).await;

    assert_eq!(summary.total_files, 10);
    assert_eq!(summary.succeeded, 9);
    assert_eq!(summary.timed_out, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.total_frames, 18);
    assert_eq!(summary.exit_code(), 1);
}

/// Worker wrapper that hangs in a real child process on `slow` inputs
#[cfg(unix)]
fn hanging_worker(dir: &Path) -> std::path::PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let script = dir.join("worker.sh");
    let body = format!(
        "#!/bin/sh\ncase \"$2\" in */slow.8ij) exec sleep 300 ;; esac\nexec \"{}\" \"$@\"\n",
        CLI
    );
    std::fs::write(&script, body).unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
    script
}

#[cfg(unix)]
#[tokio::test]
async fn test_subprocess_timeout_kills_hung_worker() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("in");
    for i in 0..3 {
        write_container(&input.join(format!("ok_{}.8ij", i)), &frames(2));
    }
    write_container(&input.join("slow.8ij"), &frames(4));

    let jobs = discover_jobs(
        &input,
        &dir.path().join("out"),
        ScalingPolicy::Linear,
        OutputFormat::Png,
        false,
    )
    .unwrap();
    let config = BatchConfig {
        workers: 2,
        timeout: Duration::from_secs(1),
    };
    let runner = Arc::new(SubprocessRunner::new(hanging_worker(dir.path())));

    let started = std::time::Instant::now();
    let summary = run_batch(jobs, &config, runner).await;

    assert!(started.elapsed() < Duration::from_secs(60));
    assert_eq!(summary.timed_out, 1);
    assert_eq!(summary.succeeded, 3);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.total_frames, 6);
}

#[tokio::test]
async fn test_preserved_structure_end_to_end() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("in");
    let output = dir.path().join("out");
    write_container(&input.join("top.8ij"), &frames(1));
    write_container(&input.join("day1/cam/a.8ij"), &frames(2));

    let jobs =
        discover_jobs(&input, &output, ScalingPolicy::Auto, OutputFormat::Png, true).unwrap();
    let summary = run_batch(jobs, &BatchConfig::default(), Arc::new(InProcessRunner)).await;

    assert!(summary.is_success());
    assert_eq!(summary.total_frames, 3);
    assert_eq!(png_files(&output), vec!["top_frame_000000.png"]);
    assert_eq!(
        png_files(&output.join("day1/cam")),
        vec!["a_frame_000000.png", "a_frame_000001.png"]
    );
}

#[tokio::test]
async fn test_subprocess_runner_reports_summary() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("sub.8ij");
    write_container(&input, &frames(3));

    let job = BatchJob::new(&input, dir.path().join("out"), ScalingPolicy::Percentile);
    let summary = SubprocessRunner::new(CLI).run(&job).await.unwrap();

    assert_eq!(summary.frames_attempted, 3);
    assert_eq!(summary.frames_written, 3);
    assert!(summary.is_success());
    assert_eq!(png_files(&job.output_directory).len(), 3);
}

#[tokio::test]
async fn test_subprocess_runner_missing_program() {
    let dir = TempDir::new().unwrap();
    let job = BatchJob::new(dir.path().join("x.8ij"), dir.path(), ScalingPolicy::Linear);
    let runner = SubprocessRunner::new(dir.path().join("no-such-binary"));
    assert!(runner.run(&job).await.is_err());
}

fn run_cli(args: &[&Path]) -> std::process::Output {
    Command::new(CLI)
        .arg("convert")
        .args(args)
        .args(["--workers", "2"])
        .output()
        .unwrap()
}

#[test]
fn test_cli_exit_status() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("in");
    let output = dir.path().join("out");
    write_container(&input.join("a.8ij"), &frames(2));
    write_container(&input.join("b.8ij"), &frames(1));

    let ok = run_cli(&[&input, &output]);
    assert!(ok.status.success(), "{}", String::from_utf8_lossy(&ok.stderr));
    assert_eq!(png_files(&output).len(), 3);

    std::fs::write(input.join("c.8ij"), b"not a container at all").unwrap();
    let bad = run_cli(&[&input, &output]);
    assert_eq!(bad.status.code(), Some(1));
}

#[test]
fn test_cli_no_inputs_is_success() {
    let dir = TempDir::new().unwrap();
    let out = run_cli(&[dir.path(), &dir.path().join("out")]);
    assert!(out.status.success());
}
