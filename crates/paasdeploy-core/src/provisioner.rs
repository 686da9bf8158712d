//! C7 — Provisioner: SSH-driven idempotent node setup state machine, built
//! on named-step/status/result types so each provisioning run's progress is
//! independently inspectable and the whole sequence is safe to re-run from
//! any prior failure.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::id::ResourceId;

/// The ten named, idempotent steps of node provisioning, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionStep {
    SshConnect,
    RemoteEnv,
    DockerCheck,
    DockerInstall,
    DockerStart,
    DockerNetwork,
    ProxyInstall,
    AgentCerts,
    AgentBinary,
    SystemdUnit,
    AwaitOnline,
}

impl ProvisionStep {
    pub const ORDER: [ProvisionStep; 11] = [
        ProvisionStep::SshConnect,
        ProvisionStep::RemoteEnv,
        ProvisionStep::DockerCheck,
        ProvisionStep::DockerInstall,
        ProvisionStep::DockerStart,
        ProvisionStep::DockerNetwork,
        ProvisionStep::ProxyInstall,
        ProvisionStep::AgentCerts,
        ProvisionStep::AgentBinary,
        ProvisionStep::SystemdUnit,
        ProvisionStep::AwaitOnline,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ProvisionStep::SshConnect => "ssh_connect",
            ProvisionStep::RemoteEnv => "remote_env",
            ProvisionStep::DockerCheck => "docker_check",
            ProvisionStep::DockerInstall => "docker_install",
            ProvisionStep::DockerStart => "docker_start",
            ProvisionStep::DockerNetwork => "docker_network",
            ProvisionStep::ProxyInstall => "proxy_install",
            ProvisionStep::AgentCerts => "agent_certs",
            ProvisionStep::AgentBinary => "agent_binary",
            ProvisionStep::SystemdUnit => "systemd_unit",
            ProvisionStep::AwaitOnline => "await_online",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepOutcome {
    /// Step performed work.
    Applied,
    /// Step found the desired state already present and made no change.
    Skipped,
}

/// Typed provisioning failure reason (C7). The first failing
/// step's reason becomes the node's terminal error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProvisionError {
    #[error("ssh error at step {step:?}: {message}")]
    Ssh { step: ProvisionStep, message: String },
    #[error("privilege escalation failed at step {step:?}: {message}")]
    Privilege { step: ProvisionStep, message: String },
    #[error("container runtime install failed: {message}")]
    RuntimeInstall { message: String },
    #[error("reverse proxy install failed: {message}")]
    ProxyInstall { message: String },
    #[error("agent install failed: {message}")]
    AgentInstall { message: String },
    #[error("timed out waiting for agent to come online")]
    AwaitOnline,
}

#[derive(Debug, Clone)]
pub struct ProvisionResult {
    pub steps_applied: Vec<(ProvisionStep, StepOutcome)>,
}

#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Runs the full step sequence against `node_id`, publishing a
    /// `ProvisionStep`/`ProvisionLog` event per step and a final
    /// `ProvisionCompleted`/`ProvisionFailed` event. Safe to re-run after any
    /// prior failure (each step checks current state before mutating).
    async fn provision(&self, node_id: ResourceId) -> std::result::Result<ProvisionResult, ProvisionError>;

    /// Mirror path: stop unit, delete unit file, remove agent dir. Does not
    /// remove the container runtime or reverse proxy, which may be shared.
    async fn deprovision(&self, node_id: ResourceId) -> Result<()>;
}
