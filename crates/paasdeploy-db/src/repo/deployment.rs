//! Deployment repository: basic CRUD reads/writes over the `deployments`
//! table. Claim/requeue/cancel semantics (C4) live in `paasdeploy-queue`,
//! which issues its own SQL against the same table — this repo is the
//! read-path/creation seam used by the HTTP adapter and CLI.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use paasdeploy_core::ResourceId;
use paasdeploy_core::deployment::{Deployment, DeploymentStatus};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{DbError, DbResult};

#[derive(Debug, Clone, sqlx::FromRow)]
struct DeploymentRow {
    id: Uuid,
    application_id: Uuid,
    commit_sha: String,
    commit_message: Option<String>,
    status: String,
    previous_image_tag: Option<String>,
    current_image_tag: Option<String>,
    worker_id: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
    log: String,
}

impl From<DeploymentRow> for Deployment {
    fn from(row: DeploymentRow) -> Self {
        Deployment {
            id: row.id.into(),
            application_id: row.application_id.into(),
            commit_sha: row.commit_sha,
            commit_message: row.commit_message,
            status: parse_status(&row.status),
            previous_image_tag: row.previous_image_tag,
            current_image_tag: row.current_image_tag,
            worker_id: row.worker_id,
            created_at: row.created_at,
            started_at: row.started_at,
            finished_at: row.finished_at,
            error_message: row.error_message,
            log: row.log,
        }
    }
}

fn parse_status(s: &str) -> DeploymentStatus {
    match s {
        "running" => DeploymentStatus::Running,
        "success" => DeploymentStatus::Success,
        "failed" => DeploymentStatus::Failed,
        "cancelled" => DeploymentStatus::Cancelled,
        _ => DeploymentStatus::Pending,
    }
}

#[async_trait]
pub trait DeploymentRepo: Send + Sync {
    async fn get(&self, id: ResourceId) -> DbResult<Deployment>;
    async fn list_by_application(&self, application_id: ResourceId, limit: i64) -> DbResult<Vec<Deployment>>;
    async fn append_log(&self, id: ResourceId, text: &str) -> DbResult<()>;
}

pub struct PgDeploymentRepo {
    pool: PgPool,
}

impl PgDeploymentRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeploymentRepo for PgDeploymentRepo {
    async fn get(&self, id: ResourceId) -> DbResult<Deployment> {
        let row = sqlx::query_as::<_, DeploymentRow>("SELECT * FROM deployments WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("deployment {id}")))?;

        Ok(row.into())
    }

    async fn list_by_application(
        &self,
        application_id: ResourceId,
        limit: i64,
    ) -> DbResult<Vec<Deployment>> {
        let rows = sqlx::query_as::<_, DeploymentRow>(
            "SELECT * FROM deployments WHERE application_id = $1 ORDER BY created_at DESC LIMIT $2",
        )
        .bind(application_id.as_uuid())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn append_log(&self, id: ResourceId, text: &str) -> DbResult<()> {
        sqlx::query("UPDATE deployments SET log = log || $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(text)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_status_defaults_to_pending() {
        assert_eq!(parse_status("garbage"), DeploymentStatus::Pending);
        assert_eq!(parse_status("running"), DeploymentStatus::Running);
        assert_eq!(parse_status("success"), DeploymentStatus::Success);
    }
}
