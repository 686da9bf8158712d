//! Node repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use paasdeploy_core::ResourceId;
use paasdeploy_core::node::{EncryptedBlob, Node, NodeCredentials, NodeStatus};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{DbError, DbResult};

#[derive(Debug, Clone, sqlx::FromRow)]
struct NodeRow {
    id: Uuid,
    owner_id: Uuid,
    name: String,
    host: String,
    ssh_port: i32,
    ssh_user: String,
    private_key_nonce: Option<Vec<u8>>,
    private_key_ciphertext: Option<Vec<u8>>,
    password_nonce: Option<Vec<u8>>,
    password_ciphertext: Option<Vec<u8>>,
    acme_email: Option<String>,
    status: String,
    host_key_fingerprint: Option<String>,
    agent_version: Option<String>,
    last_heartbeat: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<NodeRow> for Node {
    fn from(row: NodeRow) -> Self {
        Node {
            id: row.id.into(),
            owner_id: row.owner_id.into(),
            name: row.name,
            host: row.host,
            ssh_port: row.ssh_port as u16,
            ssh_user: row.ssh_user,
            credentials: NodeCredentials {
                private_key: match (row.private_key_nonce, row.private_key_ciphertext) {
                    (Some(nonce), Some(ciphertext)) => Some(EncryptedBlob { nonce, ciphertext }),
                    _ => None,
                },
                password: match (row.password_nonce, row.password_ciphertext) {
                    (Some(nonce), Some(ciphertext)) => Some(EncryptedBlob { nonce, ciphertext }),
                    _ => None,
                },
            },
            acme_email: row.acme_email,
            status: parse_status(&row.status),
            host_key_fingerprint: row.host_key_fingerprint,
            agent_version: row.agent_version,
            last_heartbeat: row.last_heartbeat,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

fn parse_status(s: &str) -> NodeStatus {
    match s {
        "provisioning" => NodeStatus::Provisioning,
        "online" => NodeStatus::Online,
        "error" => NodeStatus::Error,
        "offline" => NodeStatus::Offline,
        _ => NodeStatus::Pending,
    }
}

/// Input to register a new node; credentials arrive already encrypted by the
/// adapter layer (never in plaintext past the HTTP handler boundary).
pub struct CreateNodeInput {
    pub owner_id: ResourceId,
    pub name: String,
    pub host: String,
    pub ssh_port: u16,
    pub ssh_user: String,
    pub credentials: NodeCredentials,
    pub acme_email: Option<String>,
}

#[async_trait]
pub trait NodeRepo: Send + Sync {
    async fn create(&self, input: CreateNodeInput) -> DbResult<Node>;
    async fn get(&self, id: ResourceId) -> DbResult<Node>;
    async fn list_by_owner(&self, owner_id: ResourceId) -> DbResult<Vec<Node>>;
    async fn list_online(&self) -> DbResult<Vec<Node>>;
    async fn set_status(&self, id: ResourceId, status: NodeStatus) -> DbResult<()>;
    async fn pin_host_key(&self, id: ResourceId, fingerprint: &str) -> DbResult<()>;
    async fn record_heartbeat(&self, id: ResourceId, agent_version: &str) -> DbResult<()>;
}

pub struct PgNodeRepo {
    pool: PgPool,
}

impl PgNodeRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NodeRepo for PgNodeRepo {
    async fn create(&self, input: CreateNodeInput) -> DbResult<Node> {
        let row = sqlx::query_as::<_, NodeRow>(
            r#"
            INSERT INTO nodes (
                id, owner_id, name, host, ssh_port, ssh_user,
                private_key_nonce, private_key_ciphertext,
                password_nonce, password_ciphertext,
                acme_email, status, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, 'pending', NOW(), NOW())
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(input.owner_id.as_uuid())
        .bind(&input.name)
        .bind(&input.host)
        .bind(input.ssh_port as i32)
        .bind(&input.ssh_user)
        .bind(input.credentials.private_key.as_ref().map(|b| b.nonce.clone()))
        .bind(input.credentials.private_key.as_ref().map(|b| b.ciphertext.clone()))
        .bind(input.credentials.password.as_ref().map(|b| b.nonce.clone()))
        .bind(input.credentials.password.as_ref().map(|b| b.ciphertext.clone()))
        .bind(&input.acme_email)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn get(&self, id: ResourceId) -> DbResult<Node> {
        let row = sqlx::query_as::<_, NodeRow>("SELECT * FROM nodes WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("node {id}")))?;

        Ok(row.into())
    }

    async fn list_by_owner(&self, owner_id: ResourceId) -> DbResult<Vec<Node>> {
        let rows = sqlx::query_as::<_, NodeRow>(
            "SELECT * FROM nodes WHERE owner_id = $1 ORDER BY name",
        )
        .bind(owner_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn list_online(&self) -> DbResult<Vec<Node>> {
        let rows = sqlx::query_as::<_, NodeRow>("SELECT * FROM nodes WHERE status = 'online'")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn set_status(&self, id: ResourceId, status: NodeStatus) -> DbResult<()> {
        sqlx::query("UPDATE nodes SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(id.as_uuid())
            .bind(status.to_string())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn pin_host_key(&self, id: ResourceId, fingerprint: &str) -> DbResult<()> {
        sqlx::query(
            "UPDATE nodes SET host_key_fingerprint = $2, updated_at = NOW() WHERE id = $1 AND host_key_fingerprint IS NULL",
        )
        .bind(id.as_uuid())
        .bind(fingerprint)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn record_heartbeat(&self, id: ResourceId, agent_version: &str) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE nodes SET
                last_heartbeat = NOW(),
                agent_version = $2,
                status = CASE WHEN status = 'offline' THEN 'online' ELSE status END,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(agent_version)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_status_round_trips_known_values() {
        assert_eq!(parse_status("online"), NodeStatus::Online);
        assert_eq!(parse_status("error"), NodeStatus::Error);
        assert_eq!(parse_status("unknown-garbage"), NodeStatus::Pending);
    }
}
