//! clamscan execution bounded by the invocation deadline.

use crate::config::ClamscanConfig;
use crate::status::ScanStatus;
use async_trait::async_trait;
use std::io;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// How long to keep collecting output after the engine has exited.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Outcome of one scan attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// The engine exited within its budget.
    Verdict(ScanStatus),
    /// The engine was still running when the budget ran out and was killed.
    TimedOut,
}

/// Error from running the scan engine.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("failed to start scan engine: {0}")]
    Spawn(#[source] io::Error),
    #[error("failed waiting for scan engine: {0}")]
    Wait(#[source] io::Error),
}

/// A malware scanner that inspects a local file.
#[async_trait]
pub trait ScanEngine: Send + Sync + 'static {
    /// Scan `path`, giving up after `budget`.
    async fn scan(&self, path: &Path, budget: Duration) -> Result<ScanOutcome, ScanError>;
}

/// Runs the `clamscan` command-line scanner.
#[derive(Debug, Clone)]
pub struct ClamscanEngine {
    config: ClamscanConfig,
    max_bytes: u64,
}

impl ClamscanEngine {
    /// `max_bytes` is passed to clamscan as both file and scan size limit.
    pub fn new(config: ClamscanConfig, max_bytes: u64) -> Self {
        Self { config, max_bytes }
    }

    /// Build the clamscan invocation for `path`.
    pub fn command(&self, path: &Path) -> Command {
        let mut cmd = Command::new(&self.config.executable);
        if self.config.verbose {
            cmd.arg("-v");
        }
        cmd.arg(format!("--database={}", self.config.database_dir.display()))
            .arg("--stdout")
            .arg(format!("--max-filesize={}", self.max_bytes))
            .arg(format!("--max-scansize={}", self.max_bytes))
            .arg("-r")
            .arg(format!("--tempdir={}", self.config.temp_dir.display()))
            .arg(path);
        cmd
    }
}

#[async_trait]
impl ScanEngine for ClamscanEngine {
    async fn scan(&self, path: &Path, budget: Duration) -> Result<ScanOutcome, ScanError> {
        if budget.is_zero() {
            error!(path = %path.display(), "No time left to run clamscan");
            return Ok(ScanOutcome::TimedOut);
        }

        info!(
            path = %path.display(),
            budget_ms = budget.as_millis() as u64,
            "Running clamscan"
        );

        let start = Instant::now();
        let outcome = match run_bounded(self.command(path), budget).await? {
            ProcessOutcome::Exited { code, output } => {
                debug!(output = %output, "clamscan output");
                ScanOutcome::Verdict(ScanStatus::from_exit_code(code))
            }
            ProcessOutcome::TimedOut { output } => {
                debug!(output = %output, "clamscan output before timeout");
                error!(
                    path = %path.display(),
                    budget_ms = budget.as_millis() as u64,
                    "clamscan process timed out"
                );
                ScanOutcome::TimedOut
            }
        };

        debug!(
            path = %path.display(),
            scan_time_ms = start.elapsed().as_millis() as u64,
            outcome = ?outcome,
            "clamscan finished"
        );
        Ok(outcome)
    }
}

/// How a bounded child process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The process exited. `code` is `None` when it was ended by a signal.
    Exited { code: Option<i32>, output: String },
    /// The process overran its budget and was killed.
    TimedOut { output: String },
}

/// Run `cmd` to completion or until `budget` elapses.
///
/// stdout and stderr are drained concurrently into one transcript so the
/// child never stalls on a full pipe. On timeout the child is killed and
/// reaped before returning.
pub async fn run_bounded(mut cmd: Command, budget: Duration) -> Result<ProcessOutcome, ScanError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(ScanError::Spawn)?;

    let (tx, rx) = mpsc::unbounded_channel();
    let mut forwarders = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        forwarders.push(tokio::spawn(forward_lines(stdout, tx.clone())));
    }
    if let Some(stderr) = child.stderr.take() {
        forwarders.push(tokio::spawn(forward_lines(stderr, tx.clone())));
    }
    drop(tx);
    let mut collector = tokio::spawn(collect_lines(rx));

    match timeout(budget, child.wait()).await {
        Ok(Ok(status)) => {
            let output = match timeout(DRAIN_GRACE, &mut collector).await {
                Ok(Ok(output)) => output,
                _ => {
                    abort_all(&forwarders);
                    collector.abort();
                    String::new()
                }
            };
            Ok(ProcessOutcome::Exited {
                code: status.code(),
                output,
            })
        }
        Ok(Err(e)) => {
            abort_all(&forwarders);
            collector.abort();
            Err(ScanError::Wait(e))
        }
        Err(_) => {
            if let Err(e) = child.kill().await {
                warn!(error = %e, "Failed to kill timed out process");
            }
            // Descendants may still hold the pipes open; stop reading them.
            abort_all(&forwarders);
            let output = match timeout(Duration::from_millis(100), &mut collector).await {
                Ok(Ok(output)) => output,
                _ => {
                    collector.abort();
                    String::new()
                }
            };
            Ok(ProcessOutcome::TimedOut { output })
        }
    }
}

async fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf).trim_end().to_string();
                if tx.send(line).is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!(error = %e, "Stopped reading process output");
                break;
            }
        }
    }
}

async fn collect_lines(mut rx: mpsc::UnboundedReceiver<String>) -> String {
    let mut output = String::new();
    while let Some(line) = rx.recv().await {
        output.push_str(&line);
        output.push('\n');
    }
    output
}

fn abort_all(handles: &[JoinHandle<()>]) {
    for handle in handles {
        handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsStr;
    use std::path::PathBuf;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    fn config(executable: &str) -> ClamscanConfig {
        ClamscanConfig {
            executable: PathBuf::from(executable),
            database_dir: PathBuf::from("/var/task/clamav_defs"),
            temp_dir: PathBuf::from("/tmp"),
            verbose: true,
            safety_margin_ms: 10_000,
        }
    }

    #[test]
    fn test_clamscan_command_line() {
        let engine = ClamscanEngine::new(config("clamscan"), 100_000_000);
        let cmd = engine.command(Path::new("/tmp/eicar.txt"));
        let std_cmd = cmd.as_std();
        assert_eq!(std_cmd.get_program(), OsStr::new("clamscan"));
        let args: Vec<&OsStr> = std_cmd.get_args().collect();
        assert_eq!(
            args,
            vec![
                "-v",
                "--database=/var/task/clamav_defs",
                "--stdout",
                "--max-filesize=100000000",
                "--max-scansize=100000000",
                "-r",
                "--tempdir=/tmp",
                "/tmp/eicar.txt",
            ]
        );
    }

    #[test]
    fn test_clamscan_command_line_quiet() {
        let mut cfg = config("/usr/bin/clamscan");
        cfg.verbose = false;
        let engine = ClamscanEngine::new(cfg, 40_000_000);
        let cmd = engine.command(Path::new("/tmp/a.bin"));
        let args: Vec<&OsStr> = cmd.as_std().get_args().collect();
        assert_eq!(args[0], "--database=/var/task/clamav_defs");
        assert!(args.contains(&OsStr::new("--max-filesize=40000000")));
    }

    #[tokio::test]
    async fn test_run_bounded_exit_codes() {
        for (script, expected) in [("exit 0", 0), ("exit 1", 1), ("exit 2", 2)] {
            let outcome = run_bounded(sh(script), Duration::from_secs(10)).await.unwrap();
            match outcome {
                ProcessOutcome::Exited { code, .. } => assert_eq!(code, Some(expected)),
                other => panic!("unexpected outcome {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_run_bounded_merges_output() {
        let outcome = run_bounded(sh("echo to-stdout; echo to-stderr >&2"), Duration::from_secs(10))
            .await
            .unwrap();
        match outcome {
            ProcessOutcome::Exited { code, output } => {
                assert_eq!(code, Some(0));
                assert!(output.contains("to-stdout"));
                assert!(output.contains("to-stderr"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_run_bounded_drains_large_output() {
        // Far more than a pipe buffer on both streams.
        let script = "i=0; while [ $i -lt 20000 ]; do echo line-$i; echo err-$i >&2; i=$((i+1)); done; exit 1";
        let outcome = run_bounded(sh(script), Duration::from_secs(30)).await.unwrap();
        match outcome {
            ProcessOutcome::Exited { code, output } => {
                assert_eq!(code, Some(1));
                assert!(output.contains("line-19999"));
                assert!(output.contains("err-19999"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_run_bounded_kills_on_timeout() {
        let start = Instant::now();
        let outcome = run_bounded(sh("exec sleep 30"), Duration::from_millis(200))
            .await
            .unwrap();
        assert!(matches!(outcome, ProcessOutcome::TimedOut { .. }));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_run_bounded_spawn_failure() {
        let cmd = Command::new("/nonexistent/clamscan-binary");
        let result = run_bounded(cmd, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(ScanError::Spawn(_))));
    }

    #[tokio::test]
    async fn test_engine_maps_exit_status() {
        // `true` and `false` ignore the clamscan arguments.
        let clean = ClamscanEngine::new(config("true"), 1024);
        assert_eq!(
            clean.scan(Path::new("/tmp/x"), Duration::from_secs(10)).await.unwrap(),
            ScanOutcome::Verdict(ScanStatus::Clean)
        );

        let infected = ClamscanEngine::new(config("false"), 1024);
        assert_eq!(
            infected.scan(Path::new("/tmp/x"), Duration::from_secs(10)).await.unwrap(),
            ScanOutcome::Verdict(ScanStatus::Infected)
        );
    }

    #[tokio::test]
    async fn test_engine_zero_budget_does_not_spawn() {
        let engine = ClamscanEngine::new(config("/nonexistent/clamscan-binary"), 1024);
        let outcome = engine.scan(Path::new("/tmp/x"), Duration::ZERO).await.unwrap();
        assert_eq!(outcome, ScanOutcome::TimedOut);
    }

    #[tokio::test]
    async fn test_engine_missing_executable() {
        let engine = ClamscanEngine::new(config("/nonexistent/clamscan-binary"), 1024);
        let result = engine.scan(Path::new("/tmp/x"), Duration::from_secs(1)).await;
        assert!(matches!(result, Err(ScanError::Spawn(_))));
    }
}
