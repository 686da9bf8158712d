//! Application CRUD and the deploy-trigger endpoint.

use axum::Json;
use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use paasdeploy_core::ResourceId;
use paasdeploy_core::application::{Application, CreateApplicationInput};
use paasdeploy_core::deployment::Deployment;
use serde::Deserialize;

use crate::AppState;
use crate::error::{ApiError, ApiResult};
use crate::owner::{owner_id_from_headers, require_owner};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_application).get(list_applications))
        .route("/{id}", get(get_application).delete(delete_application))
        .route("/{id}/deploy", post(trigger_deploy))
        .route("/{id}/deployments", get(list_deployments))
}

#[derive(Debug, Deserialize)]
struct CreateApplicationRequest {
    name: String,
    repo_url: String,
    #[serde(default = "default_branch")]
    branch: String,
    #[serde(default)]
    working_dir: String,
    #[serde(default)]
    node_id: Option<ResourceId>,
}

fn default_branch() -> String {
    "main".to_string()
}

async fn create_application(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateApplicationRequest>,
) -> ApiResult<(StatusCode, Json<Application>)> {
    let owner_id = owner_id_from_headers(&headers)?;
    if req.name.trim().is_empty() {
        return Err(paasdeploy_core::Error::InvalidInput("name must not be empty".to_string()).into());
    }

    let app = state
        .applications
        .create(CreateApplicationInput {
            owner_id,
            name: req.name,
            repo_url: req.repo_url,
            branch: req.branch,
            working_dir: req.working_dir,
            node_id: req.node_id,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(app)))
}

async fn list_applications(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Json<Vec<Application>>> {
    let owner_id = owner_id_from_headers(&headers)?;
    let apps = state.applications.list_by_owner(owner_id).await?;
    Ok(Json(apps))
}

async fn get_application(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<ResourceId>,
) -> ApiResult<Json<Application>> {
    let owner_id = owner_id_from_headers(&headers)?;
    let app = state.applications.get(id).await?;
    require_owner(owner_id, app.owner_id)?;
    Ok(Json(app))
}

async fn delete_application(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<ResourceId>,
) -> ApiResult<StatusCode> {
    let owner_id = owner_id_from_headers(&headers)?;
    let app = state.applications.get(id).await?;
    require_owner(owner_id, app.owner_id)?;
    state.applications.soft_delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct DeployRequest {
    commit_sha: String,
    #[serde(default)]
    commit_message: Option<String>,
}

async fn trigger_deploy(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<ResourceId>,
    Json(req): Json<DeployRequest>,
) -> ApiResult<(StatusCode, Json<Deployment>)> {
    let owner_id = owner_id_from_headers(&headers)?;
    let app = state.applications.get(id).await?;
    require_owner(owner_id, app.owner_id)?;
    if !app.is_active() {
        return Err(paasdeploy_core::Error::InvalidInput("application is deleted".to_string()).into());
    }

    let deployment = Deployment::new(app.id, req.commit_sha, req.commit_message);
    let deployment_id = state.queue.enqueue(deployment).await?;
    let deployment = state.deployments.get(deployment_id).await.map_err(ApiError::from)?;
    Ok((StatusCode::ACCEPTED, Json(deployment)))
}

#[derive(Debug, Deserialize)]
struct ListDeploymentsQuery {
    #[serde(default = "default_limit")]
    limit: i64,
}

fn default_limit() -> i64 {
    20
}

async fn list_deployments(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<ResourceId>,
    Query(query): Query<ListDeploymentsQuery>,
) -> ApiResult<Json<Vec<Deployment>>> {
    let owner_id = owner_id_from_headers(&headers)?;
    let app = state.applications.get(id).await?;
    require_owner(owner_id, app.owner_id)?;
    let deployments = state.deployments.list_by_application(id, query.limit).await?;
    Ok(Json(deployments))
}
