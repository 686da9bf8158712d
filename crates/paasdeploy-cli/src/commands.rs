//! Command implementations: each takes a [`Client`] plus its own arguments
//! and prints a human-readable summary. All JSON shapes mirror the
//! `paasdeploy-core` domain types returned by the API.

use anyhow::Result;
use futures::StreamExt;
use paasdeploy_core::ResourceId;
use serde_json::{Value, json};

use crate::client::Client;

pub async fn create_application(
    client: &Client,
    name: &str,
    repo_url: &str,
    branch: &str,
    working_dir: &str,
    node_id: Option<ResourceId>,
) -> Result<()> {
    let body = json!({
        "name": name,
        "repo_url": repo_url,
        "branch": branch,
        "working_dir": working_dir,
        "node_id": node_id,
    });
    let app = client.post("/applications", &body).await?;
    print_json(&app);
    Ok(())
}

pub async fn list_applications(client: &Client) -> Result<()> {
    let apps = client.get("/applications").await?;
    print_json(&apps);
    Ok(())
}

pub async fn get_application(client: &Client, id: ResourceId) -> Result<()> {
    let app = client.get(&format!("/applications/{id}")).await?;
    print_json(&app);
    Ok(())
}

pub async fn delete_application(client: &Client, id: ResourceId) -> Result<()> {
    client.delete(&format!("/applications/{id}")).await?;
    println!("application {id} deleted");
    Ok(())
}

/// Enqueue a deploy for `commit_sha` and print the resulting (PENDING)
/// deployment. The deploy queue and dispatcher pick it up asynchronously;
/// use `deployment get`/`events tail` to watch it progress.
pub async fn deploy(client: &Client, app_id: ResourceId, commit_sha: &str, message: Option<&str>) -> Result<()> {
    let body = json!({ "commit_sha": commit_sha, "commit_message": message });
    let deployment = client.post(&format!("/applications/{app_id}/deploy"), &body).await?;
    print_json(&deployment);
    Ok(())
}

pub async fn list_deployments(client: &Client, app_id: ResourceId, limit: i64) -> Result<()> {
    let deployments = client.get(&format!("/applications/{app_id}/deployments?limit={limit}")).await?;
    print_json(&deployments);
    Ok(())
}

pub async fn get_deployment(client: &Client, id: ResourceId) -> Result<()> {
    let deployment = client.get(&format!("/deployments/{id}")).await?;
    print_json(&deployment);
    Ok(())
}

pub async fn cancel_deployment(client: &Client, id: ResourceId) -> Result<()> {
    client.post_no_content(&format!("/deployments/{id}/cancel")).await?;
    println!("cancel requested for deployment {id}");
    Ok(())
}

/// Register a node, which kicks off provisioning (§4.7) on the server in the
/// background. The node starts in `pending` and transitions through
/// `provisioning` to `online`/`error`; poll `node get` or `events tail` to
/// watch it.
pub async fn register_node(
    client: &Client,
    name: &str,
    host: &str,
    ssh_port: u16,
    ssh_user: &str,
    private_key: Option<String>,
    password: Option<String>,
    acme_email: Option<&str>,
) -> Result<()> {
    let body = json!({
        "name": name,
        "host": host,
        "ssh_port": ssh_port,
        "ssh_user": ssh_user,
        "private_key": private_key,
        "password": password,
        "acme_email": acme_email,
    });
    let node = client.post("/nodes", &body).await?;
    print_json(&node);
    Ok(())
}

pub async fn list_nodes(client: &Client) -> Result<()> {
    let nodes = client.get("/nodes").await?;
    print_json(&nodes);
    Ok(())
}

pub async fn get_node(client: &Client, id: ResourceId) -> Result<()> {
    let node = client.get(&format!("/nodes/{id}")).await?;
    print_json(&node);
    Ok(())
}

pub async fn deprovision_node(client: &Client, id: ResourceId) -> Result<()> {
    client.delete(&format!("/nodes/{id}")).await?;
    println!("node {id} deprovisioning");
    Ok(())
}

/// Tail the live SSE event stream, printing one line per frame as
/// `<event-name> <json-data>`. Runs until the connection closes or the
/// process is interrupted.
pub async fn tail_events(client: &Client) -> Result<()> {
    let resp = client.event_stream().await?;
    let mut bytes = resp.bytes_stream();
    let mut buf = String::new();
    let mut current_event: Option<String> = None;

    while let Some(chunk) = bytes.next().await {
        let chunk = chunk?;
        buf.push_str(&String::from_utf8_lossy(&chunk));

        while let Some(pos) = buf.find('\n') {
            let line = buf[..pos].trim_end_matches('\r').to_string();
            buf.drain(..=pos);

            if line.is_empty() {
                current_event = None;
                continue;
            }
            if let Some(name) = line.strip_prefix("event:") {
                current_event = Some(name.trim().to_string());
            } else if let Some(data) = line.strip_prefix("data:") {
                let name = current_event.as_deref().unwrap_or("message");
                println!("{name} {}", data.trim());
            }
        }
    }
    Ok(())
}

fn print_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{s}"),
        Err(_) => println!("{value}"),
    }
}
