//! Deployment lookup and cancellation. Deployments have no owner of their
//! own — ownership is checked via the application they belong to.

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use paasdeploy_core::ResourceId;
use paasdeploy_core::deployment::Deployment;

use crate::AppState;
use crate::error::ApiResult;
use crate::owner::{owner_id_from_headers, require_owner};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{id}", get(get_deployment))
        .route("/{id}/cancel", post(cancel_deployment))
}

async fn get_deployment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<ResourceId>,
) -> ApiResult<Json<Deployment>> {
    let owner_id = owner_id_from_headers(&headers)?;
    let deployment = state.deployments.get(id).await?;
    let app = state.applications.get(deployment.application_id).await?;
    require_owner(owner_id, app.owner_id)?;
    Ok(Json(deployment))
}

async fn cancel_deployment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<ResourceId>,
) -> ApiResult<StatusCode> {
    let owner_id = owner_id_from_headers(&headers)?;
    let deployment = state.deployments.get(id).await?;
    let app = state.applications.get(deployment.application_id).await?;
    require_owner(owner_id, app.owner_id)?;
    state.queue.cancel(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
