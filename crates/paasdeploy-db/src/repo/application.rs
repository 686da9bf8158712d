//! Application repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use paasdeploy_core::ResourceId;
use paasdeploy_core::application::{Application, ApplicationStatus, CreateApplicationInput};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{DbError, DbResult};

#[derive(Debug, Clone, sqlx::FromRow)]
struct ApplicationRow {
    id: Uuid,
    owner_id: Uuid,
    name: String,
    repo_url: String,
    branch: String,
    working_dir: String,
    node_id: Option<Uuid>,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ApplicationRow> for Application {
    fn from(row: ApplicationRow) -> Self {
        Application {
            id: row.id.into(),
            owner_id: row.owner_id.into(),
            name: row.name,
            repo_url: row.repo_url,
            branch: row.branch,
            working_dir: row.working_dir,
            node_id: row.node_id.map(ResourceId::from),
            status: match row.status.as_str() {
                "deleted" => ApplicationStatus::Deleted,
                _ => ApplicationStatus::Active,
            },
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[async_trait]
pub trait ApplicationRepo: Send + Sync {
    async fn create(&self, input: CreateApplicationInput) -> DbResult<Application>;
    async fn get(&self, id: ResourceId) -> DbResult<Application>;
    /// Unique per owner; used to reject duplicate display names (§3).
    async fn get_by_owner_and_name(&self, owner_id: ResourceId, name: &str) -> DbResult<Option<Application>>;
    async fn list_by_owner(&self, owner_id: ResourceId) -> DbResult<Vec<Application>>;
    async fn update_node_binding(&self, id: ResourceId, node_id: Option<ResourceId>) -> DbResult<()>;
    /// Soft-delete; cascades to deployments but not to nodes (§3).
    async fn soft_delete(&self, id: ResourceId) -> DbResult<()>;
}

pub struct PgApplicationRepo {
    pool: PgPool,
}

impl PgApplicationRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ApplicationRepo for PgApplicationRepo {
    async fn create(&self, input: CreateApplicationInput) -> DbResult<Application> {
        let existing = self
            .get_by_owner_and_name(input.owner_id, &input.name)
            .await?;
        if existing.is_some() {
            return Err(DbError::AlreadyExists(format!(
                "application {} for owner {}",
                input.name, input.owner_id
            )));
        }

        let row = sqlx::query_as::<_, ApplicationRow>(
            r#"
            INSERT INTO applications (
                id, owner_id, name, repo_url, branch, working_dir, node_id,
                status, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'active', NOW(), NOW())
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(input.owner_id.as_uuid())
        .bind(&input.name)
        .bind(&input.repo_url)
        .bind(&input.branch)
        .bind(&input.working_dir)
        .bind(input.node_id.map(|n| *n.as_uuid()))
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn get(&self, id: ResourceId) -> DbResult<Application> {
        let row = sqlx::query_as::<_, ApplicationRow>("SELECT * FROM applications WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("application {id}")))?;

        Ok(row.into())
    }

    async fn get_by_owner_and_name(
        &self,
        owner_id: ResourceId,
        name: &str,
    ) -> DbResult<Option<Application>> {
        let row = sqlx::query_as::<_, ApplicationRow>(
            "SELECT * FROM applications WHERE owner_id = $1 AND name = $2 AND status != 'deleted'",
        )
        .bind(owner_id.as_uuid())
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn list_by_owner(&self, owner_id: ResourceId) -> DbResult<Vec<Application>> {
        let rows = sqlx::query_as::<_, ApplicationRow>(
            "SELECT * FROM applications WHERE owner_id = $1 AND status != 'deleted' ORDER BY name",
        )
        .bind(owner_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn update_node_binding(&self, id: ResourceId, node_id: Option<ResourceId>) -> DbResult<()> {
        sqlx::query("UPDATE applications SET node_id = $2, updated_at = NOW() WHERE id = $1")
            .bind(id.as_uuid())
            .bind(node_id.map(|n| *n.as_uuid()))
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn soft_delete(&self, id: ResourceId) -> DbResult<()> {
        sqlx::query(
            "UPDATE applications SET status = 'deleted', updated_at = NOW() WHERE id = $1",
        )
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_maps_active_status_by_default() {
        let row = ApplicationRow {
            id: Uuid::now_v7(),
            owner_id: Uuid::now_v7(),
            name: "hello".into(),
            repo_url: "https://example.com/hello.git".into(),
            branch: "main".into(),
            working_dir: String::new(),
            node_id: None,
            status: "active".into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let app: Application = row.into();
        assert!(app.is_active());
    }
}
