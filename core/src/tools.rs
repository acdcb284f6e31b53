use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExternalToolError {
    #[error("can't spawn {tool}: {source}")]
    Spawn {
        tool: &'static str,
        source: std::io::Error,
    },

    #[error("{tool} exited with status {code}: {stderr}")]
    NonZeroExit {
        tool: &'static str,
        code: i32,
        stderr: String,
    },

    #[error("{tool} did not finish within {seconds}s and was killed")]
    Timeout { tool: &'static str, seconds: u64 },

    #[error("io error while driving {tool}: {source}")]
    Io {
        tool: &'static str,
        source: std::io::Error,
    },
}

/// Spawns the platform tools as child processes with a hard per-call
/// timeout; a timed-out child is force-killed. Program paths default to
/// the bare names so an SDK on `PATH` just works.
#[derive(Debug, Clone)]
pub struct ToolRunner {
    pub zipalign_program: PathBuf,
    pub apksigner_program: PathBuf,
    pub aapt2_program: PathBuf,

    pub zipalign_timeout: Duration,
    pub apksigner_timeout: Duration,
    pub aapt2_timeout: Duration,
}

impl Default for ToolRunner {
    fn default() -> Self {
        ToolRunner {
            zipalign_program: PathBuf::from("zipalign"),
            apksigner_program: PathBuf::from("apksigner"),
            aapt2_program: PathBuf::from("aapt2"),
            zipalign_timeout: Duration::from_secs(60),
            apksigner_timeout: Duration::from_secs(120),
            aapt2_timeout: Duration::from_secs(60),
        }
    }
}

impl ToolRunner {
    /// `zipalign -f 4 <input> <output>`
    pub fn zipalign(&self, input: &Path, output: &Path) -> Result<(), ExternalToolError> {
        let mut command = Command::new(&self.zipalign_program);
        command.arg("-f").arg("4").arg(input).arg(output);
        run_with_timeout("zipalign", command, self.zipalign_timeout)
    }

    /// `apksigner sign [extra args] <apk>`; key material comes from the
    /// caller-provided arguments or the tool's own environment.
    pub fn apksigner_sign(
        &self,
        apk: &Path,
        extra_args: &[String],
    ) -> Result<(), ExternalToolError> {
        let mut command = Command::new(&self.apksigner_program);
        command.arg("sign");
        command.args(extra_args);
        command.arg(apk);
        run_with_timeout("apksigner", command, self.apksigner_timeout)
    }

    /// Optional static validation. A missing binary is not an error;
    /// obfuscated resources routinely fail aapt2's stricter checks, so
    /// this never blocks a commit either.
    pub fn aapt2_validate(&self, apk: &Path) -> Option<Result<(), ExternalToolError>> {
        let mut command = Command::new(&self.aapt2_program);
        command.arg("dump").arg("badging").arg(apk);

        match run_with_timeout("aapt2", command, self.aapt2_timeout) {
            Err(ExternalToolError::Spawn { .. }) => {
                debug!("aapt2 not available, static validation skipped");
                None
            }
            result => Some(result),
        }
    }
}

fn run_with_timeout(
    tool: &'static str,
    mut command: Command,
    timeout: Duration,
) -> Result<(), ExternalToolError> {
    command.stdin(Stdio::null());
    command.stdout(Stdio::null());
    command.stderr(Stdio::piped());

    debug!("running {command:?} (timeout {timeout:?})");
    let mut child = command
        .spawn()
        .map_err(|source| ExternalToolError::Spawn { tool, source })?;

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child
            .try_wait()
            .map_err(|source| ExternalToolError::Io { tool, source })?
        {
            Some(status) => break status,
            None if Instant::now() >= deadline => {
                warn!("{tool} timed out, killing");
                let _ = child.kill();
                let _ = child.wait();
                return Err(ExternalToolError::Timeout {
                    tool,
                    seconds: timeout.as_secs(),
                });
            }
            None => std::thread::sleep(Duration::from_millis(50)),
        }
    };

    if status.success() {
        info!("{tool} finished successfully");
        return Ok(());
    }

    let stderr = child
        .stderr
        .take()
        .and_then(|mut pipe| {
            use std::io::Read;
            let mut buf = String::new();
            pipe.read_to_string(&mut buf).ok().map(|_| buf)
        })
        .unwrap_or_default();

    Err(ExternalToolError::NonZeroExit {
        tool,
        code: status.code().unwrap_or(-1),
        stderr: stderr.chars().take(2048).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_binary_is_a_spawn_error() {
        let mut command = Command::new("definitely-not-a-real-tool-3b1f");
        command.arg("x");
        assert!(matches!(
            run_with_timeout("zipalign", command, Duration::from_secs(1)),
            Err(ExternalToolError::Spawn { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn nonzero_exit_carries_stderr() {
        let mut command = Command::new("sh");
        command.arg("-c").arg("echo boom >&2; exit 3");

        match run_with_timeout("apksigner", command, Duration::from_secs(5)) {
            Err(ExternalToolError::NonZeroExit { code: 3, stderr, .. }) => {
                assert!(stderr.contains("boom"));
            }
            other => panic!("expected NonZeroExit, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn hung_child_is_killed_on_timeout() {
        let mut command = Command::new("sleep");
        command.arg("30");

        let started = Instant::now();
        let result = run_with_timeout("zipalign", command, Duration::from_millis(200));

        assert!(matches!(result, Err(ExternalToolError::Timeout { .. })));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn aapt2_absence_is_not_an_error() {
        let runner = ToolRunner {
            aapt2_program: PathBuf::from("/nonexistent/aapt2-3b1f"),
            ..ToolRunner::default()
        };

        assert!(runner.aapt2_validate(Path::new("whatever.apk")).is_none());
    }
}
