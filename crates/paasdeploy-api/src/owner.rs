//! Per-user ownership check (§1 non-goal: "multi-tenant
//! isolation beyond per-user ownership checks"). Full authentication is an
//! adapter concern this crate doesn't implement; callers are trusted to
//! supply their own identity in the `x-owner-id` header, and every handler
//! that touches an owned resource verifies it against the stored owner.

use axum::http::HeaderMap;
use paasdeploy_core::ResourceId;

use crate::error::ApiError;

pub fn owner_id_from_headers(headers: &HeaderMap) -> Result<ResourceId, ApiError> {
    let header = headers.get("x-owner-id").ok_or_else(|| {
        ApiError::from(paasdeploy_core::Error::InvalidInput("missing x-owner-id header".to_string()))
    })?;
    let raw = header.to_str().map_err(|_| {
        ApiError::from(paasdeploy_core::Error::InvalidInput("x-owner-id header is not valid UTF-8".to_string()))
    })?;
    raw.parse().map_err(|_| {
        ApiError::from(paasdeploy_core::Error::InvalidInput("x-owner-id is not a valid id".to_string()))
    })
}

pub fn require_owner(owner_id: ResourceId, resource_owner_id: ResourceId) -> Result<(), ApiError> {
    if owner_id != resource_owner_id {
        return Err(paasdeploy_core::Error::Forbidden("not the owner of this resource".to_string()).into());
    }
    Ok(())
}
