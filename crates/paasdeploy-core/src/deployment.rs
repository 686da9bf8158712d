//! Deployment: a single attempt to build and release a specific commit of an
//! application.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::ResourceId;

/// Status of a [`Deployment`]. Ordering in this enum matters only for the
/// "started_at set iff status >= Running" invariant below; it is not used for
/// `Ord`/`PartialOrd` derivation since status transitions are not a total
/// order over all variants (a pending deploy can only move to Running or
/// Cancelled, never directly to Success/Failed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Pending,
    Running,
    Success,
    Failed,
    Cancelled,
}

impl DeploymentStatus {
    /// Terminal states are immutable once written.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeploymentStatus::Success | DeploymentStatus::Failed | DeploymentStatus::Cancelled
        )
    }
}

impl std::fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DeploymentStatus::Pending => "pending",
            DeploymentStatus::Running => "running",
            DeploymentStatus::Success => "success",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// A single deploy attempt. Invariants (enforced by the queue/worker, not by
/// this struct alone): at most one `Running` deployment exists per
/// application at any instant; `started_at` is set iff status != Pending;
/// `finished_at` is set iff `status.is_terminal()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    pub id: ResourceId,
    pub application_id: ResourceId,
    pub commit_sha: String,
    pub commit_message: Option<String>,
    pub status: DeploymentStatus,
    pub previous_image_tag: Option<String>,
    pub current_image_tag: Option<String>,
    /// Worker that currently holds this deployment, set when claimed and
    /// checked by `RequeueOrphans` crash recovery.
    pub worker_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    /// Accumulated log text; authoritative copy lives on the backend even
    /// for remote deploys, appended as agent stream events arrive.
    pub log: String,
}

impl Deployment {
    pub fn new(application_id: ResourceId, commit_sha: String, commit_message: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: ResourceId::new(),
            application_id,
            commit_sha,
            commit_message,
            status: DeploymentStatus::Pending,
            previous_image_tag: None,
            current_image_tag: None,
            worker_id: None,
            created_at: now,
            started_at: None,
            finished_at: None,
            error_message: None,
            log: String::new(),
        }
    }

    /// Short commit identifier used in image tags (`app:<short-commit>`).
    pub fn short_sha(&self) -> &str {
        &self.commit_sha[..self.commit_sha.len().min(12)]
    }

    pub fn image_tag(&self, app_name: &str) -> String {
        format!("{app_name}:{}", self.short_sha())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_deployment_is_pending_with_no_timestamps() {
        let d = Deployment::new(ResourceId::new(), "abc123def456789".into(), None);
        assert_eq!(d.status, DeploymentStatus::Pending);
        assert!(d.started_at.is_none());
        assert!(d.finished_at.is_none());
    }

    #[test]
    fn short_sha_truncates_to_twelve_chars() {
        let d = Deployment::new(ResourceId::new(), "abcdef0123456789".into(), None);
        assert_eq!(d.short_sha(), "abcdef012345");
    }

    #[test]
    fn terminal_statuses() {
        assert!(DeploymentStatus::Success.is_terminal());
        assert!(DeploymentStatus::Failed.is_terminal());
        assert!(DeploymentStatus::Cancelled.is_terminal());
        assert!(!DeploymentStatus::Pending.is_terminal());
        assert!(!DeploymentStatus::Running.is_terminal());
    }
}
