//! C1 — local command execution: explicit argv, no shell, streaming
//! combined stdout+stderr, timeout with a SIGTERM-then-SIGKILL grace period.

use async_trait::async_trait;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use paasdeploy_core::error::{Error, Result};
use paasdeploy_core::executor::{
    CommandExecutor, CommandOutput, CommandSpec, KILL_GRACE, LogLine, LogStream,
};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc::Sender;
use tracing::warn;

/// Bounded tail kept for [`CommandOutput::output_tail`] when the caller used
/// `run` rather than `run_streamed`.
const OUTPUT_TAIL_LINES: usize = 200;

/// Runs local OS processes via `tokio::process::Command`. Every argument is
/// passed as a distinct `OsStr`; nothing is ever joined into a shell string.
pub struct LocalExecutor;

impl LocalExecutor {
    pub fn new() -> Self {
        Self
    }

    fn build_command(spec: &CommandSpec) -> Command {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args);
        for (k, v) in &spec.env {
            cmd.env(k, v);
        }
        if let Some(dir) = &spec.workdir {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd
    }

    async fn terminate(mut child: tokio::process::Child) {
        if let Some(id) = child.id() {
            let _ = signal::kill(Pid::from_raw(id as i32), Signal::SIGTERM);
        }
        tokio::select! {
            _ = child.wait() => {}
            _ = tokio::time::sleep(KILL_GRACE) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
            }
        }
    }
}

impl Default for LocalExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandExecutor for LocalExecutor {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let (tx, mut rx) = tokio::sync::mpsc::channel(256);
        let collector = tokio::spawn(async move {
            let mut tail = std::collections::VecDeque::with_capacity(OUTPUT_TAIL_LINES);
            while let Some(line) = rx.recv().await {
                if tail.len() == OUTPUT_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line.text);
            }
            tail.into_iter().collect::<Vec<_>>().join("\n")
        });

        let exit_code = self.run_streamed_inner(spec, tx).await?;
        let output_tail = collector.await.unwrap_or_default();

        if exit_code != 0 {
            return Err(Error::Unavailable(format!(
                "{} exited with code {exit_code}",
                spec.program
            )));
        }

        Ok(CommandOutput {
            exit_code,
            output_tail,
        })
    }

    async fn run_streamed(
        &self,
        spec: &CommandSpec,
        sink: Sender<LogLine>,
    ) -> Result<CommandOutput> {
        let exit_code = self.run_streamed_inner(spec, sink).await?;
        Ok(CommandOutput {
            exit_code,
            output_tail: String::new(),
        })
    }
}

impl LocalExecutor {
    async fn run_streamed_inner(&self, spec: &CommandSpec, sink: Sender<LogLine>) -> Result<i32> {
        let mut cmd = Self::build_command(spec);
        let mut child = cmd
            .spawn()
            .map_err(|e| Error::Unavailable(format!("spawn {}: {e}", spec.program)))?;

        let stdout = child.stdout.take().expect("piped stdout");
        let stderr = child.stderr.take().expect("piped stderr");

        let stdout_sink = sink.clone();
        let stdout_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let _ = stdout_sink
                    .send(LogLine {
                        stream: LogStream::Stdout,
                        text: line,
                    })
                    .await;
            }
        });

        let stderr_sink = sink.clone();
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let _ = stderr_sink
                    .send(LogLine {
                        stream: LogStream::Stderr,
                        text: line,
                    })
                    .await;
            }
        });

        let wait_result = match spec.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, child.wait()).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(program = %spec.program, "command timed out, sending SIGTERM");
                    Self::terminate(child).await;
                    let _ = stdout_task.await;
                    let _ = stderr_task.await;
                    return Err(Error::Timeout(format!("{} timed out", spec.program)));
                }
            },
            None => child.wait().await,
        };

        let _ = stdout_task.await;
        let _ = stderr_task.await;

        let status = wait_result.map_err(|e| Error::Unavailable(e.to_string()))?;
        Ok(status.code().unwrap_or(-1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paasdeploy_core::executor::CommandSpec;

    #[tokio::test]
    async fn runs_and_captures_exit_code() {
        let exec = LocalExecutor::new();
        let spec = CommandSpec::new("true", Vec::<String>::new());
        let output = exec.run(&spec).await.unwrap();
        assert_eq!(output.exit_code, 0);
    }

    #[tokio::test]
    async fn nonzero_exit_is_an_error() {
        let exec = LocalExecutor::new();
        let spec = CommandSpec::new("false", Vec::<String>::new());
        assert!(exec.run(&spec).await.is_err());
    }

    #[tokio::test]
    async fn streams_stdout_lines() {
        let exec = LocalExecutor::new();
        let spec = CommandSpec::new("echo", ["hello", "world"]);
        let (tx, mut rx) = tokio::sync::mpsc::channel(16);
        exec.run_streamed(&spec, tx).await.unwrap();
        let line = rx.recv().await.unwrap();
        assert_eq!(line.text, "hello world");
    }

    #[tokio::test]
    async fn timeout_kills_long_running_process() {
        let exec = LocalExecutor::new();
        let mut spec = CommandSpec::new("sleep", ["5"]);
        spec.timeout = Some(std::time::Duration::from_millis(100));
        let (tx, _rx) = tokio::sync::mpsc::channel(16);
        let result = exec.run_streamed(&spec, tx).await;
        assert!(matches!(result, Err(Error::Timeout(_))));
    }
}
