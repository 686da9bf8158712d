//! Thin REST client over the control plane's HTTP adapter. Every call sends
//! the operator's `x-owner-id` header; the server enforces ownership on the
//! other side (`paasdeploy-api::owner`).

use anyhow::{Context, Result, bail};
use paasdeploy_core::ResourceId;
use serde::Serialize;
use serde_json::Value;

#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
    base_url: String,
    owner_id: ResourceId,
}

impl Client {
    pub fn new(base_url: String, owner_id: ResourceId) -> Self {
        Self { http: reqwest::Client::new(), base_url, owner_id }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{path}", self.base_url.trim_end_matches('/'))
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        bail!("server returned {status}: {body}");
    }

    pub async fn get(&self, path: &str) -> Result<Value> {
        let resp = self
            .http
            .get(self.url(path))
            .header("x-owner-id", self.owner_id.to_string())
            .send()
            .await
            .with_context(|| format!("GET {path}"))?;
        Self::check(resp).await?.json().await.context("decoding response body")
    }

    pub async fn post<B: Serialize>(&self, path: &str, body: &B) -> Result<Value> {
        let resp = self
            .http
            .post(self.url(path))
            .header("x-owner-id", self.owner_id.to_string())
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {path}"))?;
        Self::check(resp).await?.json().await.context("decoding response body")
    }

    /// POST a request whose success response has no body (e.g. 204).
    pub async fn post_no_content(&self, path: &str) -> Result<()> {
        let resp = self
            .http
            .post(self.url(path))
            .header("x-owner-id", self.owner_id.to_string())
            .send()
            .await
            .with_context(|| format!("POST {path}"))?;
        Self::check(resp).await?;
        Ok(())
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        let resp = self
            .http
            .delete(self.url(path))
            .header("x-owner-id", self.owner_id.to_string())
            .send()
            .await
            .with_context(|| format!("DELETE {path}"))?;
        Self::check(resp).await?;
        Ok(())
    }

    /// Raw byte stream of the `/api/v1/events` SSE endpoint; the caller
    /// parses frames (see `commands::events`).
    pub async fn event_stream(&self) -> Result<reqwest::Response> {
        let resp = self
            .http
            .get(self.url("/events"))
            .header("x-owner-id", self.owner_id.to_string())
            .header("accept", "text/event-stream")
            .send()
            .await
            .context("GET /events")?;
        Self::check(resp).await
    }
}
