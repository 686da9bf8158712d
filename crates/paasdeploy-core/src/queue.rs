//! C4 — Deploy Queue: a crash-safe multi-producer/multi-consumer queue with
//! per-application exclusivity. Storage-agnostic by design (§9):
//! the trait never exposes whether a relational store or an in-memory
//! structure backs it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::deployment::{Deployment, DeploymentStatus};
use crate::error::Result;
use crate::id::ResourceId;

/// Final fields written by `Complete`.
#[derive(Debug, Clone)]
pub struct CompleteFields {
    pub status: DeploymentStatus,
    pub current_image_tag: Option<String>,
    pub error_message: Option<String>,
}

#[async_trait]
pub trait DeployQueue: Send + Sync {
    /// Atomic insert with status=Pending. Fails with `ErrDeployInProgress` if
    /// the application already has a Running deployment and the caller asked
    /// for exclusivity, or `ErrQueueFull` if more than the configured max
    /// pending deploys already exist for this application.
    async fn enqueue(&self, deployment: Deployment) -> Result<ResourceId>;

    /// Returns the oldest Pending deployment whose application has no
    /// deployment currently Running, atomically transitioning it to Running
    /// with `started_at = now` and `worker_id = worker_id`. Returns `Ok(None)`
    /// if no deployment qualifies right now.
    async fn claim_next(&self, worker_id: &str) -> Result<Option<Deployment>>;

    async fn complete(&self, deployment_id: ResourceId, fields: CompleteFields) -> Result<()>;

    /// Crash recovery: any deployment Running with `started_at < stale_before`
    /// is returned to Pending. Called on engine start with
    /// `stale_before = now - 2 * heartbeat_interval`.
    async fn requeue_orphans(&self, stale_before: DateTime<Utc>) -> Result<u64>;

    /// If Pending, marks Cancelled in place. If Running, the queue records
    /// the cancellation request; the owning worker observes it on its next
    /// cooperative check and writes Cancelled on exit.
    async fn cancel(&self, deployment_id: ResourceId) -> Result<()>;

    /// Polled by the worker loop between phases; `true` once `cancel` has
    /// been requested for a Running deployment.
    async fn is_cancel_requested(&self, deployment_id: ResourceId) -> Result<bool>;
}
