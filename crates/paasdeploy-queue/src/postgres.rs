//! Postgres-backed `DeployQueue`: a locking read that selects the oldest
//! pending deployment for an application with no running deployment,
//! skipping already-locked rows.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use paasdeploy_core::ResourceId;
use paasdeploy_core::deployment::{Deployment, DeploymentStatus};
use paasdeploy_core::error::{Error, Result};
use paasdeploy_core::queue::{CompleteFields, DeployQueue};
use sqlx::PgPool;
use uuid::Uuid;

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

fn status_str(status: DeploymentStatus) -> &'static str {
    match status {
        DeploymentStatus::Pending => "pending",
        DeploymentStatus::Running => "running",
        DeploymentStatus::Success => "success",
        DeploymentStatus::Failed => "failed",
        DeploymentStatus::Cancelled => "cancelled",
    }
}

fn map_sqlx(e: sqlx::Error) -> Error {
    Error::Unavailable(e.to_string())
}

pub struct PgDeployQueue {
    pool: PgPool,
    /// Back-pressure limit: an application may have at most this many
    /// Pending deployments at once (C6, default 3).
    max_pending_per_app: i64,
}

impl PgDeployQueue {
    pub fn new(pool: PgPool, max_pending_per_app: usize) -> Self {
        Self {
            pool,
            max_pending_per_app: max_pending_per_app as i64,
        }
    }
}

#[async_trait]
impl DeployQueue for PgDeployQueue {
    async fn enqueue(&self, deployment: Deployment) -> Result<ResourceId> {
        let running: i64 = sqlx::query_scalar(
            "SELECT count(*) FROM deployments WHERE application_id = $1 AND status = 'running'",
        )
        .bind(deployment.application_id.as_uuid())
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx)?;

        if running > 0 {
            return Err(Error::DeployInProgress(format!(
                "application {} already has a running deployment",
                deployment.application_id
            )));
        }

        let pending: i64 = sqlx::query_scalar(
            "SELECT count(*) FROM deployments WHERE application_id = $1 AND status = 'pending'",
        )
        .bind(deployment.application_id.as_uuid())
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx)?;

        if pending >= self.max_pending_per_app {
            return Err(Error::QueueFull(format!(
                "application {} already has {pending} pending deployments",
                deployment.application_id
            )));
        }

        sqlx::query(
            r#"
            INSERT INTO deployments
                (id, application_id, commit_sha, commit_message, status,
                 previous_image_tag, created_at, log)
            VALUES ($1, $2, $3, $4, 'pending', $5, $6, '')
            "#,
        )
        .bind(deployment.id.as_uuid())
        .bind(deployment.application_id.as_uuid())
        .bind(&deployment.commit_sha)
        .bind(&deployment.commit_message)
        .bind(&deployment.previous_image_tag)
        .bind(deployment.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        Ok(deployment.id)
    }

    async fn claim_next(&self, worker_id: &str) -> Result<Option<Deployment>> {
        let row = sqlx::query_as::<_, DeploymentRow>(
            r#"
            UPDATE deployments
            SET status = 'running', started_at = now(), worker_id = $1
            WHERE id = (
                SELECT id FROM deployments d
                WHERE d.status = 'pending'
                  AND NOT EXISTS (
                      SELECT 1 FROM deployments r
                      WHERE r.application_id = d.application_id
                        AND r.status = 'running'
                  )
                ORDER BY d.created_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;

        Ok(row.map(Into::into))
    }

    async fn complete(&self, deployment_id: ResourceId, fields: CompleteFields) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE deployments
            SET status = $2, current_image_tag = $3, error_message = $4, finished_at = now()
            WHERE id = $1
            "#,
        )
        .bind(deployment_id.as_uuid())
        .bind(status_str(fields.status))
        .bind(&fields.current_image_tag)
        .bind(&fields.error_message)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        Ok(())
    }

    async fn requeue_orphans(&self, stale_before: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE deployments
            SET status = 'pending', worker_id = NULL, started_at = NULL
            WHERE status = 'running' AND started_at < $1
            "#,
        )
        .bind(stale_before)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        Ok(result.rows_affected())
    }

    async fn cancel(&self, deployment_id: ResourceId) -> Result<()> {
        let result = sqlx::query(
            "UPDATE deployments SET status = 'cancelled', finished_at = now() WHERE id = $1 AND status = 'pending'",
        )
        .bind(deployment_id.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        sqlx::query(
            "UPDATE deployments SET cancel_requested = TRUE WHERE id = $1 AND status = 'running'",
        )
        .bind(deployment_id.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        Ok(())
    }

    async fn is_cancel_requested(&self, deployment_id: ResourceId) -> Result<bool> {
        let requested: Option<bool> = sqlx::query_scalar(
            "SELECT cancel_requested FROM deployments WHERE id = $1",
        )
        .bind(deployment_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;

        Ok(requested.unwrap_or(false))
    }
}
