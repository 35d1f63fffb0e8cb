// SPDX-FileCopyrightText: 2026 TII (SSRC) and the Ghaf contributors
// SPDX-License-Identifier: Apache-2.0

//! Bounded execution of privileged OS utilities.
//!
//! The protection mechanisms shell out to system tools (`udevadm`,
//! `blockdev`, `chmod`). Every invocation carries a wall-clock bound; a
//! command that exceeds it is killed and reported as a timeout so the
//! caller's attempt sequence keeps moving.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;

// =============================================================================
// Types
// =============================================================================

/// Command to run: program, arguments, optional stdin, wall-clock bound.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub stdin: Option<String>,
    pub timeout: Duration,
}

impl CommandSpec {
    #[must_use]
    pub fn new(program: &str, args: &[&str], timeout: Duration) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(ToString::to_string).collect(),
            stdin: None,
            timeout,
        }
    }

    /// Feed `input` to the child's stdin and close the pipe.
    #[must_use]
    pub fn with_stdin(mut self, input: &str) -> Self {
        self.stdin = Some(input.to_string());
        self
    }

    /// Single-line rendering for log messages.
    #[must_use]
    pub fn display_line(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// Captured result of a completed command.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    /// Process exit code; -1 when terminated by a signal.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    /// True when the command exited zero.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// First stderr line, else first stdout line, for compact log details.
    #[must_use]
    pub fn brief(&self) -> &str {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.lines().next().unwrap_or(stderr);
        }
        let stdout = self.stdout.trim();
        stdout.lines().next().unwrap_or(stdout)
    }
}

/// Why a command produced no [`ExecOutput`].
#[derive(Debug, Error)]
pub enum ExecError {
    /// The command exceeded its wall-clock bound and was killed.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    /// The command could not be started or its pipes failed.
    #[error("failed to run: {0}")]
    Io(#[from] std::io::Error),
}

// =============================================================================
// Runner
// =============================================================================

/// Executor seam for the protection mechanisms.
///
/// The contract is deliberately thin: run the command, enforce the bound,
/// report exit status and output. Callers decide what an unconfirmed
/// command means; an error here never aborts their sequence.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, spec: &CommandSpec) -> Result<ExecOutput, ExecError>;
}

/// Runner spawning real processes on the host.
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<ExecOutput, ExecError> {
        debug!("exec: {}", spec.display_line());

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let capture = async {
            let mut child = command.spawn()?;
            if let Some(input) = &spec.stdin {
                if let Some(mut pipe) = child.stdin.take() {
                    pipe.write_all(input.as_bytes()).await?;
                    pipe.shutdown().await?;
                }
            }
            child.wait_with_output().await
        };

        // kill_on_drop reaps the child when the timeout wins the race.
        let output = timeout(spec.timeout, capture)
            .await
            .map_err(|_| ExecError::Timeout(spec.timeout))??;

        Ok(ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const TEST_TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn echo_captures_stdout() {
        let spec = CommandSpec::new("echo", &["hello"], TEST_TIMEOUT);
        let output = SystemRunner.run(&spec).await.unwrap();

        assert_eq!(output.exit_code, 0);
        assert!(output.success());
        assert_eq!(output.stdout, "hello\n");
        assert!(output.stderr.is_empty());
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported() {
        let spec = CommandSpec::new("false", &[], TEST_TIMEOUT);
        let output = SystemRunner.run(&spec).await.unwrap();

        assert_eq!(output.exit_code, 1);
        assert!(!output.success());
    }

    #[tokio::test]
    async fn stderr_is_captured() {
        let spec = CommandSpec::new("sh", &["-c", "echo oops >&2; exit 3"], TEST_TIMEOUT);
        let output = SystemRunner.run(&spec).await.unwrap();

        assert_eq!(output.exit_code, 3);
        assert_eq!(output.stderr, "oops\n");
        assert_eq!(output.brief(), "oops");
    }

    #[tokio::test]
    async fn stdin_is_piped_through() {
        let spec = CommandSpec::new("cat", &[], TEST_TIMEOUT).with_stdin("ping\n");
        let output = SystemRunner.run(&spec).await.unwrap();

        assert!(output.success());
        assert_eq!(output.stdout, "ping\n");
    }

    #[tokio::test]
    async fn slow_command_times_out() {
        let spec = CommandSpec::new("sleep", &["5"], Duration::from_millis(50));
        let result = SystemRunner.run(&spec).await;

        assert_matches!(result, Err(ExecError::Timeout(_)));
    }

    #[tokio::test]
    async fn missing_program_is_io_error() {
        let spec = CommandSpec::new("definitely-not-a-command", &[], TEST_TIMEOUT);
        let result = SystemRunner.run(&spec).await;

        assert_matches!(result, Err(ExecError::Io(_)));
    }

    #[test]
    fn display_line_joins_args() {
        let spec = CommandSpec::new("blockdev", &["--setro", "/dev/sdb1"], TEST_TIMEOUT);
        assert_eq!(spec.display_line(), "blockdev --setro /dev/sdb1");

        let bare = CommandSpec::new("udevadm", &[], TEST_TIMEOUT);
        assert_eq!(bare.display_line(), "udevadm");
    }

    #[test]
    fn brief_prefers_stderr_first_line() {
        let output = ExecOutput {
            exit_code: 1,
            stdout: "ignored\n".to_string(),
            stderr: "first\nsecond\n".to_string(),
        };
        assert_eq!(output.brief(), "first");

        let quiet = ExecOutput {
            exit_code: 0,
            stdout: "only stdout\n".to_string(),
            stderr: String::new(),
        };
        assert_eq!(quiet.brief(), "only stdout");
    }
}
