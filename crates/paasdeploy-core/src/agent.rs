//! C3 — Remote Agent RPC Client: typed calls to a remote agent over a
//! mutually-authenticated TLS channel. Implemented with `tonic`+`rustls` in
//! `paasdeploy-agent-client`; this trait is the seam the deploy worker and
//! health monitor depend on.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::Result;
use crate::event::ContainerStats;
use crate::id::ResourceId;

/// Retry policy for idempotent, read-only agent calls only (C3).
/// Mutating calls (`ExecuteDeploy`, `StopContainer`, ...) are never retried
/// by the client — a retried mutating call could duplicate a side effect.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base: Duration,
    pub factor: u32,
    pub max: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(100),
            factor: 2,
            max: Duration::from_secs(2),
            max_attempts: 3,
        }
    }
}

impl RetryPolicy {
    /// Delay before the given retry attempt (0-indexed), capped at `max`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let scaled = self.base.saturating_mul(self.factor.saturating_pow(attempt));
        scaled.min(self.max)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemInfo {
    pub os: String,
    pub arch: String,
    pub container_runtime_version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSpec {
    pub name: String,
    pub image_tag: String,
    pub port: u16,
    pub host_port: u16,
    pub env: HashMap<String, String>,
    pub memory_limit: Option<String>,
    pub cpu_limit: Option<String>,
    pub domains: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeSpec {
    pub dockerfile: String,
    pub build_context: String,
    pub build_args: HashMap<String, String>,
    pub target_stage: Option<String>,
}

/// One phase of the remote deploy pipeline, mirroring C5's local states so
/// the worker can multiplex a remote stream into the same event shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployPhase {
    Clone,
    Config,
    Build,
    Release,
    Health,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeployProgressMessage {
    Phase {
        phase: DeployPhase,
    },
    Log {
        phase: DeployPhase,
        line: String,
    },
    Finished {
        ok: bool,
        error_text: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum ContainerState {
    Running,
    Stopped,
    Missing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerActionResult {
    pub before: ContainerState,
    pub after: ContainerState,
}

/// A streamed log line from `GetContainerLogs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentLogLine {
    pub timestamp: DateTime<Utc>,
    pub line: String,
}

/// Client-side view of the agent RPC contract (C3). Every
/// method carries an implicit per-call deadline set by the implementation's
/// configured `AGENT_CALL_TIMEOUT`.
#[async_trait]
pub trait AgentClient: Send + Sync {
    async fn heartbeat(&self, node_id: ResourceId) -> Result<(String, SystemInfo)>;

    async fn execute_deploy(
        &self,
        deployment_id: ResourceId,
        app: AppSpec,
        runtime: RuntimeSpec,
        commit_sha: &str,
    ) -> Result<BoxStream<'static, Result<DeployProgressMessage>>>;

    async fn stop_container(&self, app_name: &str) -> Result<ContainerActionResult>;
    async fn start_container(&self, app_name: &str) -> Result<ContainerActionResult>;
    async fn restart_container(&self, app_name: &str) -> Result<ContainerActionResult>;

    async fn get_container_logs(
        &self,
        app_name: &str,
        tail_lines: u32,
        follow: bool,
    ) -> Result<BoxStream<'static, Result<AgentLogLine>>>;

    async fn get_container_stats(
        &self,
        app_name: &str,
    ) -> Result<BoxStream<'static, Result<ContainerStats>>>;
}
