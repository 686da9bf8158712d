//! Node registration, listing and deprovisioning. Credentials are sealed
//! with the server's master key on the way in and never echoed back out
//! (§3: "credential blob is never returned in responses or
//! logs").

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use chrono::{DateTime, Utc};
use paasdeploy_core::ResourceId;
use paasdeploy_core::node::{Node, NodeCredentials, NodeStatus};
use paasdeploy_db::CreateNodeInput;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiResult;
use crate::owner::{owner_id_from_headers, require_owner};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(register_node).get(list_nodes))
        .route("/{id}", get(get_node).delete(deprovision_node))
}

#[derive(Debug, Serialize)]
struct NodeResponse {
    id: ResourceId,
    owner_id: ResourceId,
    name: String,
    host: String,
    ssh_port: u16,
    ssh_user: String,
    acme_email: Option<String>,
    status: NodeStatus,
    host_key_fingerprint: Option<String>,
    agent_version: Option<String>,
    last_heartbeat: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<Node> for NodeResponse {
    fn from(node: Node) -> Self {
        Self {
            id: node.id,
            owner_id: node.owner_id,
            name: node.name,
            host: node.host,
            ssh_port: node.ssh_port,
            ssh_user: node.ssh_user,
            acme_email: node.acme_email,
            status: node.status,
            host_key_fingerprint: node.host_key_fingerprint,
            agent_version: node.agent_version,
            last_heartbeat: node.last_heartbeat,
            created_at: node.created_at,
            updated_at: node.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RegisterNodeRequest {
    name: String,
    host: String,
    #[serde(default = "default_ssh_port")]
    ssh_port: u16,
    #[serde(default = "default_ssh_user")]
    ssh_user: String,
    #[serde(default)]
    private_key: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    acme_email: Option<String>,
}

fn default_ssh_port() -> u16 {
    22
}

fn default_ssh_user() -> String {
    "root".to_string()
}

async fn register_node(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<RegisterNodeRequest>,
) -> ApiResult<(StatusCode, Json<NodeResponse>)> {
    let owner_id = owner_id_from_headers(&headers)?;
    if req.private_key.is_none() && req.password.is_none() {
        return Err(paasdeploy_core::Error::InvalidInput(
            "at least one of private_key or password is required".to_string(),
        )
        .into());
    }

    let credentials = NodeCredentials {
        private_key: req.private_key.map(|pk| state.master_key.seal(pk.as_bytes())).transpose()?,
        password: req.password.map(|pw| state.master_key.seal(pw.as_bytes())).transpose()?,
    };

    let node = state
        .nodes
        .create(CreateNodeInput {
            owner_id,
            name: req.name,
            host: req.host,
            ssh_port: req.ssh_port,
            ssh_user: req.ssh_user,
            credentials,
            acme_email: req.acme_email,
        })
        .await?;

    let provisioner = state.provisioner.clone();
    let ca = state.ca.clone();
    let agent_clients = state.agent_clients.clone();
    let node_id = node.id;
    let node_host = node.host.clone();
    tokio::spawn(async move {
        match provisioner.provision(node_id).await {
            Ok(_) => match ca.issue_leaf(node_id) {
                Ok((client_cert_pem, client_key_pem)) => {
                    agent_clients
                        .register(
                            node_id,
                            paasdeploy_agent_client::AgentTlsMaterial {
                                ca_pem: ca.ca_pem().as_bytes().to_vec(),
                                client_cert_pem,
                                client_key_pem,
                                domain_name: format!("node-{node_id}.paasdeploy.internal"),
                            },
                        )
                        .await;
                }
                Err(err) => tracing::warn!(%node_id, %err, "failed to issue agent client certificate"),
            },
            Err(err) => tracing::warn!(%node_id, host = %node_host, %err, "node provisioning failed"),
        }
    });

    Ok((StatusCode::CREATED, Json(node.into())))
}

async fn list_nodes(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Json<Vec<NodeResponse>>> {
    let owner_id = owner_id_from_headers(&headers)?;
    let nodes = state.nodes.list_by_owner(owner_id).await?;
    Ok(Json(nodes.into_iter().map(NodeResponse::from).collect()))
}

async fn get_node(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<ResourceId>,
) -> ApiResult<Json<NodeResponse>> {
    let owner_id = owner_id_from_headers(&headers)?;
    let node = state.nodes.get(id).await?;
    require_owner(owner_id, node.owner_id)?;
    Ok(Json(node.into()))
}

async fn deprovision_node(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<ResourceId>,
) -> ApiResult<StatusCode> {
    let owner_id = owner_id_from_headers(&headers)?;
    let node = state.nodes.get(id).await?;
    require_owner(owner_id, node.owner_id)?;
    state.provisioner.deprovision(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
