//! C1 — Command Executor: run a local OS command via explicit argv, no
//! shell. The container build/run concern (part of C5's BUILD/RELEASE) is a
//! separate seam in `paasdeploy-executor::container`.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::Result;

/// A line of combined stdout+stderr output, tagged by stream.
#[derive(Debug, Clone)]
pub struct LogLine {
    pub stream: LogStream,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
}

/// A request to run a local program. Constructed only from an explicit
/// program name and argument vector — there is no constructor that accepts a
/// single command-line string, by design: string-composed shell commands are
/// forbidden everywhere in this codebase (§9).
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub workdir: Option<PathBuf>,
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            env: HashMap::new(),
            workdir: None,
            timeout: None,
        }
    }

    pub fn with_workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Grace period between SIGTERM and SIGKILL once a timeout fires.
pub const KILL_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    /// Tail of combined output, bounded by the implementation (not the full
    /// transcript — callers that need every line use `run_streamed`).
    pub output_tail: String,
}

/// Runs local OS commands. Every implementation must reject shell
/// metacharacter interpretation by construction: `program` is exec'd
/// directly, `args` passed as a vector, never concatenated into a string.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run to completion, capturing a bounded tail of output.
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;

    /// Run to completion, streaming each line to `sink` as it flushes.
    async fn run_streamed(
        &self,
        spec: &CommandSpec,
        sink: tokio::sync::mpsc::Sender<LogLine>,
    ) -> Result<CommandOutput>;
}
