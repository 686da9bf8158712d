//! Application: a deployable unit mapping a source repository to a running
//! container.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::ResourceId;

/// Lifecycle status of an [`Application`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplicationStatus {
    Active,
    Deleted,
}

impl std::fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApplicationStatus::Active => write!(f, "active"),
            ApplicationStatus::Deleted => write!(f, "deleted"),
        }
    }
}

/// A deployable unit: a source repository bound to an optional remote node,
/// deployed by the pipeline in [`crate::error`]'s terms end-to-end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
    pub id: ResourceId,
    pub owner_id: ResourceId,
    /// Unique per owner.
    pub name: String,
    pub repo_url: String,
    pub branch: String,
    /// Subdirectory within the repository to build from; "" means repo root.
    pub working_dir: String,
    /// Remote node this application deploys to; `None` means local mode.
    pub node_id: Option<ResourceId>,
    pub status: ApplicationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Application {
    /// Working copy directory for this application, rooted under the
    /// configured data root — one directory per application id, owned
    /// exclusively by whichever worker currently holds the per-app queue
    /// exclusivity for it.
    pub fn working_copy_path(&self, data_root: &std::path::Path) -> std::path::PathBuf {
        data_root.join("repos").join(self.id.to_string())
    }

    pub fn is_active(&self) -> bool {
        matches!(self.status, ApplicationStatus::Active)
    }
}

/// Input to create a new application; validated by the adapter before
/// reaching the repository layer.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateApplicationInput {
    pub owner_id: ResourceId,
    pub name: String,
    pub repo_url: String,
    pub branch: String,
    pub working_dir: String,
    pub node_id: Option<ResourceId>,
}
