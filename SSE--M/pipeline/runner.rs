use std::{
    path::{Path, PathBuf},
    process::Stdio,
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};
use tokio::{process::Command, time::timeout};
use tracing::debug;

use crate::errors::PipelineError;

/// Captured result of one engine execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    /// Standard output followed by standard error.
    pub output: String,
    /// Child process id.
    pub pid: Option<u32>,
    /// Exit code, recorded for diagnostics only.
    pub exit_code: Option<i32>,
    /// Wall-clock time between spawn and exit.
    pub elapsed_ms: u64,
}

/// Launches the external engine and collects its output.
#[derive(Debug, Clone)]
pub struct SimulationRunner {
    program: PathBuf,
    timeout: Option<Duration>,
}

impl SimulationRunner {
    /// Creates a runner for the given engine binary.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            timeout: None,
        }
    }

    /// Kills the engine if it runs longer than `limit`.
    #[must_use]
    pub fn with_timeout(mut self, limit: Option<Duration>) -> Self {
        self.timeout = limit;
        self
    }

    /// Engine binary.
    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Runs the engine with no arguments inside `work_dir`, which must hold its input file.
    ///
    /// The exit code is not interpreted; a silent non-zero exit yields an empty output.
    pub async fn run(&self, work_dir: &Path) -> Result<RunResult, PipelineError> {
        let mut command = Command::new(&self.program);
        command
            .current_dir(work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command.spawn().map_err(|err| PipelineError::Launch {
            program: self.program.clone(),
            message: err.to_string(),
        })?;
        let pid = child.id();
        debug!(?pid, program = %self.program.display(), "engine spawned");

        let start = Instant::now();
        // Dropping the wait future on timeout drops the child, which kills it.
        let waited = match self.timeout {
            Some(limit) => timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| PipelineError::Timeout { pid, after: limit })?,
            None => child.wait_with_output().await,
        };
        let output = waited.map_err(|err| PipelineError::Capture {
            pid,
            message: err.to_string(),
        })?;
        let elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        debug!(?pid, code = ?output.status.code(), elapsed_ms, "engine exited");

        Ok(RunResult {
            output: combine_output(&output.stdout, &output.stderr),
            pid,
            exit_code: output.status.code(),
            elapsed_ms,
        })
    }
}

fn combine_output(stdout: &[u8], stderr: &[u8]) -> String {
    let mut text = String::from_utf8_lossy(stdout).into_owned();
    if !stderr.is_empty() {
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&String::from_utf8_lossy(stderr));
    }
    text
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::tempdir;

    /// Writes an executable POSIX shell script standing in for the engine.
    #[cfg(unix)]
    pub(crate) fn fake_engine(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("fake-sse");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    #[test]
    fn stderr_follows_stdout() {
        assert_eq!(combine_output(b"line", b"STOP\n"), "line\nSTOP\n");
        assert_eq!(combine_output(b"", b"STOP"), "STOP");
        assert_eq!(combine_output(b"ok\n", b""), "ok\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn captures_combined_output_from_work_dir() {
        let bin = tempdir().unwrap();
        let work = tempdir().unwrap();
        std::fs::write(work.path().join("evolve.in"), "1.0 0.02 10.0\n").unwrap();
        let engine = fake_engine(bin.path(), "cat evolve.in\necho 'warning' >&2\nexit 3");
        let result = SimulationRunner::new(engine).run(work.path()).await.unwrap();
        assert_eq!(result.output, "1.0 0.02 10.0\nwarning\n");
        assert_eq!(result.exit_code, Some(3));
        assert!(result.pid.is_some());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn silent_failure_is_an_empty_result() {
        let bin = tempdir().unwrap();
        let engine = fake_engine(bin.path(), "exit 1");
        let result = SimulationRunner::new(engine).run(bin.path()).await.unwrap();
        assert_eq!(result.output, "");
        assert_eq!(result.exit_code, Some(1));
    }

    #[tokio::test]
    async fn missing_binary_is_a_launch_error() {
        let dir = tempdir().unwrap();
        let err = SimulationRunner::new(dir.path().join("no-such-engine"))
            .run(dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Launch { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_executable_binary_is_a_launch_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sse");
        std::fs::write(&path, "not a program").unwrap();
        let err = SimulationRunner::new(&path).run(dir.path()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Launch { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn hung_engine_times_out() {
        let bin = tempdir().unwrap();
        let engine = fake_engine(bin.path(), "exec sleep 30");
        let err = SimulationRunner::new(engine)
            .with_timeout(Some(Duration::from_millis(200)))
            .run(bin.path())
            .await
            .unwrap_err();
        match err {
            PipelineError::Timeout { pid, after } => {
                assert!(pid.is_some());
                assert_eq!(after, Duration::from_millis(200));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn sequential_runs_are_independent() {
        let bin = tempdir().unwrap();
        let work = tempdir().unwrap();
        let engine = fake_engine(bin.path(), "read mass z t < evolve.in\necho \"mass=$mass\"");
        let runner = SimulationRunner::new(engine);

        std::fs::write(work.path().join("evolve.in"), "1.0 0.02 10.0\n").unwrap();
        let first = runner.run(work.path()).await.unwrap();
        std::fs::write(work.path().join("evolve.in"), "8.0 0.02 10.0\n").unwrap();
        let second = runner.run(work.path()).await.unwrap();

        assert_eq!(first.output, "mass=1.0\n");
        assert_eq!(second.output, "mass=8.0\n");
    }
}
