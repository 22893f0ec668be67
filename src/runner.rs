//! Asynchronous subprocess runner with elapsed-time enforcement.
//!
//! All three build-pipeline stages go through [`run`]. The call itself never
//! fails: spawn errors, crashes, and timeouts are all reported through the
//! exit code so the orchestrator has a single channel to interpret.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::process::Command;

/// Synthetic exit code for a child that exceeded its time cap.
pub const TIMEOUT_EXIT_CODE: i32 = -2;

/// Exit code reported when the child could not be spawned or was killed by
/// a signal.
pub const FAILURE_EXIT_CODE: i32 = -1;

/// Initial poll delay while waiting for the child to exit.
const POLL_START: Duration = Duration::from_millis(50);

/// Poll delay cap.
const POLL_CAP: Duration = Duration::from_millis(1000);

/// How long to wait for the output pipes to reach EOF after the child
/// terminated. Only relevant when a killed child leaves orphans behind.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Outcome of one subprocess run.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub exit_code: i32,
    pub elapsed_seconds: f64,
    /// stdout and stderr, merged.
    pub output: String,
}

impl RunResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn timed_out(&self) -> bool {
        self.exit_code == TIMEOUT_EXIT_CODE
    }
}

/// Run `binary` with `args` in `workdir`, capped at `timeout`.
///
/// The child is polled with exponential backoff starting at 50 ms and
/// capped at 1 s, yielding between polls so concurrent requests and the
/// poller stay responsive. On timeout the child is force-killed and the
/// exit code is set to [`TIMEOUT_EXIT_CODE`]. The merged output stream is
/// drained fully after termination either way.
pub async fn run(binary: &Path, args: &[String], workdir: &Path, timeout: Duration) -> RunResult {
    let start = Instant::now();

    let mut child = match Command::new(binary)
        .args(args)
        .current_dir(workdir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(c) => c,
        Err(e) => {
            return RunResult {
                exit_code: FAILURE_EXIT_CODE,
                elapsed_seconds: start.elapsed().as_secs_f64(),
                output: format!("failed to start {}: {}", binary.display(), e),
            };
        }
    };

    // Drain both pipes incrementally into a shared buffer so a chatty
    // child never blocks on a full pipe while we poll its exit state, and
    // so the output captured up to a kill survives even when an orphaned
    // grandchild keeps the pipe open.
    let captured = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let out_task = tokio::spawn(drain(child.stdout.take(), captured.clone()));
    let err_task = tokio::spawn(drain(child.stderr.take(), captured.clone()));

    let mut delay = POLL_START;
    let exit_code = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status.code().unwrap_or(FAILURE_EXIT_CODE),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = %e, "wait on child failed");
                let _ = child.kill().await;
                break FAILURE_EXIT_CODE;
            }
        }
        if start.elapsed() >= timeout {
            if let Err(e) = child.kill().await {
                tracing::warn!(error = %e, "failed to kill timed-out child");
            }
            break TIMEOUT_EXIT_CODE;
        }
        tokio::time::sleep(delay).await;
        delay = std::cmp::min(delay * 2, POLL_CAP);
    };

    // Drain fully after a natural exit; after a kill, grandchildren may
    // still hold the pipe write end, so the wait is bounded.
    let join = async {
        let _ = out_task.await;
        let _ = err_task.await;
    };
    if tokio::time::timeout(DRAIN_GRACE, join).await.is_err() {
        tracing::debug!(binary = %binary.display(), "output pipe held open past exit");
    }

    let merged = captured.lock().unwrap_or_else(|e| e.into_inner()).clone();
    RunResult {
        exit_code,
        elapsed_seconds: start.elapsed().as_secs_f64(),
        output: String::from_utf8_lossy(&merged).into_owned(),
    }
}

/// Copy a pipe into the shared capture buffer until EOF.
async fn drain<R: tokio::io::AsyncRead + Unpin>(
    pipe: Option<R>,
    captured: std::sync::Arc<std::sync::Mutex<Vec<u8>>>,
) {
    let Some(mut pipe) = pipe else { return };
    let mut chunk = [0u8; 4096];
    loop {
        match pipe.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let mut buf = captured.lock().unwrap_or_else(|e| e.into_inner());
                buf.extend_from_slice(&chunk[..n]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn sh() -> PathBuf {
        PathBuf::from("/bin/sh")
    }

    fn args(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    #[tokio::test]
    async fn test_run_captures_merged_output() {
        let dir = tempfile::tempdir().unwrap();
        let result = run(
            &sh(),
            &args("echo out; echo err 1>&2"),
            dir.path(),
            Duration::from_secs(5),
        )
        .await;
        assert_eq!(result.exit_code, 0);
        assert!(result.output.contains("out"));
        assert!(result.output.contains("err"));
    }

    #[tokio::test]
    async fn test_run_reports_nonzero_exit() {
        let dir = tempfile::tempdir().unwrap();
        let result = run(&sh(), &args("exit 3"), dir.path(), Duration::from_secs(5)).await;
        assert_eq!(result.exit_code, 3);
    }

    #[tokio::test]
    async fn test_run_kills_on_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let start = Instant::now();
        let result = run(
            &sh(),
            &args("echo before; sleep 30; echo after"),
            dir.path(),
            Duration::from_millis(300),
        )
        .await;
        assert_eq!(result.exit_code, TIMEOUT_EXIT_CODE);
        assert!(result.timed_out());
        // Output up to the kill is retained, nothing after.
        assert!(result.output.contains("before"));
        assert!(!result.output.contains("after"));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_run_missing_binary_does_not_fail_call() {
        let dir = tempfile::tempdir().unwrap();
        let result = run(
            Path::new("/nonexistent/never-a-binary"),
            &[],
            dir.path(),
            Duration::from_secs(1),
        )
        .await;
        assert_eq!(result.exit_code, FAILURE_EXIT_CODE);
        assert!(result.output.contains("failed to start"));
    }

    #[tokio::test]
    async fn test_run_uses_workdir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "here").unwrap();
        let result = run(
            &sh(),
            &args("cat marker.txt"),
            dir.path(),
            Duration::from_secs(5),
        )
        .await;
        assert_eq!(result.exit_code, 0);
        assert!(result.output.contains("here"));
    }
}
