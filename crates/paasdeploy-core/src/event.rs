//! Events published through the event bus (C8): ephemeral, not persisted
//! beyond the replay ring.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::ResourceId;

/// A deploy healthcheck attempt result, carried in [`EventPayload::Health`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub status_code: Option<u16>,
    pub ok: bool,
    pub attempt: u32,
}

/// Container resource usage sample, carried in [`EventPayload::Stats`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerStats {
    pub cpu_percent: f64,
    pub mem_bytes: u64,
    pub mem_limit_bytes: u64,
    pub net_rx_bytes: u64,
    pub net_tx_bytes: u64,
}

/// Status of one provisioning step; mirrors [`crate::provisioner::StepStatus`]
/// but kept independent so the event payload doesn't require pulling in the
/// whole provisioner trait module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProvisionStepStatus {
    Running,
    Skipped,
    Verified,
    Succeeded,
    Failed,
}

/// The typed payload of an [`Event`]. Tag names match the SSE event-name
/// families in §6 (`deploy`, `log`, `health`, `stats`,
/// `provision`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    Running {
        deployment_id: ResourceId,
        application_id: ResourceId,
    },
    Success {
        deployment_id: ResourceId,
        application_id: ResourceId,
        message: Option<String>,
    },
    Failed {
        deployment_id: ResourceId,
        application_id: ResourceId,
        message: Option<String>,
    },
    Cancelled {
        deployment_id: ResourceId,
        application_id: ResourceId,
        message: Option<String>,
    },
    Log {
        deployment_id: ResourceId,
        application_id: ResourceId,
        message: String,
    },
    Health {
        application_id: ResourceId,
        healthy: bool,
        result: HealthCheckResult,
    },
    Stats {
        application_id: ResourceId,
        stats: ContainerStats,
    },
    ProvisionStep {
        node_id: ResourceId,
        step: String,
        status: ProvisionStepStatus,
        message: Option<String>,
    },
    ProvisionLog {
        node_id: ResourceId,
        message: String,
    },
    ProvisionCompleted {
        node_id: ResourceId,
    },
    ProvisionFailed {
        node_id: ResourceId,
        reason: String,
        message: String,
    },
}

impl EventPayload {
    /// The SSE event-name family this payload renders under.
    pub fn event_name(&self) -> &'static str {
        match self {
            EventPayload::Running { .. }
            | EventPayload::Success { .. }
            | EventPayload::Failed { .. }
            | EventPayload::Cancelled { .. } => "deploy",
            EventPayload::Log { .. } => "log",
            EventPayload::Health { .. } => "health",
            EventPayload::Stats { .. } => "stats",
            EventPayload::ProvisionStep { .. }
            | EventPayload::ProvisionLog { .. }
            | EventPayload::ProvisionCompleted { .. }
            | EventPayload::ProvisionFailed { .. } => "provision",
        }
    }
}

/// A fully-stamped event as it travels through the bus: the payload plus a
/// server-assigned timestamp and monotonic sequence number (unique within a
/// process lifetime, used by subscribers to detect gaps from drops).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}
