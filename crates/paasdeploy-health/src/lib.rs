//! C9 — Health/Heartbeat Monitor: two independent periodic loops.
//!
//! `NodeHealthMonitor` polls every ONLINE node's agent for liveness; three
//! consecutive failures flips the node to `Offline`. `AppHealthMonitor` polls
//! each registered application's HTTP healthcheck endpoint directly — the
//! same probe works whether the application runs locally or on a remote
//! node, since both are reached over the node's public address.
//!
//! Both loops are driven by `tokio::time::interval`, the way the rest of
//! this workspace schedules recurring work.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use paasdeploy_agent_client::AgentTlsMaterial;
use paasdeploy_core::agent::AgentClient;
use paasdeploy_core::event::{EventPayload, HealthCheckResult};
use paasdeploy_core::eventbus::BoxEventBus;
use paasdeploy_core::id::ResourceId;
use paasdeploy_core::node::{Node, NodeStatus};
use paasdeploy_db::NodeRepo;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
pub const DEFAULT_APP_PROBE_INTERVAL: Duration = Duration::from_secs(10);
pub const CONSECUTIVE_FAILURE_THRESHOLD: u32 = 3;
const AGENT_CALL_DEADLINE: Duration = Duration::from_secs(5);

/// Builds a connected [`AgentClient`] for a node on demand. A real
/// implementation looks up the node's agent TLS material (leaf cert issued
/// during provisioning) and dials its gRPC endpoint; kept as a seam so the
/// monitor is testable against a fake client that never touches the network.
#[async_trait]
pub trait AgentClientFactory: Send + Sync {
    async fn connect(&self, node: &Node) -> paasdeploy_core::Result<Arc<dyn AgentClient>>;
}

/// Looks up each node's pinned TLS material from an in-memory map populated
/// by the provisioner's `agent_certs` step, and dials fresh each call —
/// heartbeats are infrequent enough that connection reuse isn't worth the
/// complexity here.
pub struct TonicAgentClientFactory {
    tls_material: RwLock<HashMap<ResourceId, AgentTlsMaterial>>,
}

impl TonicAgentClientFactory {
    pub fn new() -> Self {
        Self { tls_material: RwLock::new(HashMap::new()) }
    }

    pub async fn register(&self, node_id: ResourceId, material: AgentTlsMaterial) {
        self.tls_material.write().await.insert(node_id, material);
    }
}

impl Default for TonicAgentClientFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentClientFactory for TonicAgentClientFactory {
    async fn connect(&self, node: &Node) -> paasdeploy_core::Result<Arc<dyn AgentClient>> {
        let material = self
            .tls_material
            .read()
            .await
            .get(&node.id)
            .cloned()
            .ok_or_else(|| paasdeploy_core::Error::NotFound(format!("no agent TLS material for node {}", node.id)))?;

        let endpoint = format!("https://{}:7443", node.host);
        let client = paasdeploy_agent_client::TonicAgentClient::connect(&endpoint, &material, AGENT_CALL_DEADLINE).await?;
        Ok(Arc::new(client))
    }
}

/// Periodic liveness check over every ONLINE node.
pub struct NodeHealthMonitor {
    node_repo: Arc<dyn NodeRepo>,
    clients: Arc<dyn AgentClientFactory>,
    interval: Duration,
    failure_counts: Mutex<HashMap<ResourceId, u32>>,
}

impl NodeHealthMonitor {
    pub fn new(node_repo: Arc<dyn NodeRepo>, clients: Arc<dyn AgentClientFactory>, interval: Duration) -> Self {
        Self { node_repo, clients, interval, failure_counts: Mutex::new(HashMap::new()) }
    }

    /// Runs until the returned future is dropped/cancelled; intended to be
    /// spawned as its own task for the lifetime of the process.
    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            self.check_once().await;
        }
    }

    pub async fn check_once(&self) {
        let nodes = match self.node_repo.list_online().await {
            Ok(nodes) => nodes,
            Err(e) => {
                warn!(error = %e, "failed to list online nodes for health check");
                return;
            }
        };

        for node in nodes {
            self.check_node(&node).await;
        }
    }

    async fn check_node(&self, node: &Node) {
        let outcome = match self.clients.connect(node).await {
            Ok(client) => tokio::time::timeout(AGENT_CALL_DEADLINE, client.heartbeat(node.id)).await,
            Err(e) => {
                warn!(node_id = %node.id, error = %e, "could not connect to agent");
                Ok(Err(e))
            }
        };

        let succeeded = matches!(outcome, Ok(Ok(_)));

        let mut counts = self.failure_counts.lock().await;
        if succeeded {
            counts.remove(&node.id);
            let _ = self.node_repo.record_heartbeat(node.id, "").await;
            return;
        }

        let count = counts.entry(node.id).or_insert(0);
        *count += 1;
        warn!(node_id = %node.id, consecutive_failures = *count, "node heartbeat failed");

        if *count >= CONSECUTIVE_FAILURE_THRESHOLD {
            info!(node_id = %node.id, "marking node offline after repeated heartbeat failures");
            let _ = self.node_repo.set_status(node.id, NodeStatus::Offline).await;
        }
    }
}

/// An application's HTTP healthcheck target, registered by the deploy worker
/// once a release succeeds and deregistered when the application stops or is
/// deleted.
#[derive(Debug, Clone)]
pub struct AppHealthTarget {
    pub application_id: ResourceId,
    pub base_url: String,
    pub path: String,
    pub timeout: Duration,
}

/// Periodic HTTP healthcheck probe over every registered application.
pub struct AppHealthMonitor {
    http: reqwest::Client,
    events: BoxEventBus,
    interval: Duration,
    targets: RwLock<HashMap<ResourceId, AppHealthTarget>>,
    failure_counts: Mutex<HashMap<ResourceId, u32>>,
    last_healthy: Mutex<HashMap<ResourceId, bool>>,
}

impl AppHealthMonitor {
    pub fn new(events: BoxEventBus, interval: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            events,
            interval,
            targets: RwLock::new(HashMap::new()),
            failure_counts: Mutex::new(HashMap::new()),
            last_healthy: Mutex::new(HashMap::new()),
        }
    }

    pub async fn register(&self, target: AppHealthTarget) {
        self.targets.write().await.insert(target.application_id, target);
    }

    pub async fn deregister(&self, application_id: ResourceId) {
        self.targets.write().await.remove(&application_id);
        self.failure_counts.lock().await.remove(&application_id);
        self.last_healthy.lock().await.remove(&application_id);
    }

    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            self.check_once().await;
        }
    }

    pub async fn check_once(&self) {
        let targets: Vec<AppHealthTarget> = self.targets.read().await.values().cloned().collect();
        for target in targets {
            self.check_target(&target).await;
        }
    }

    async fn check_target(&self, target: &AppHealthTarget) {
        let url = format!("{}{}", target.base_url.trim_end_matches('/'), target.path);
        let response = self.http.get(&url).timeout(target.timeout).send().await;

        let (ok, status_code) = match response {
            Ok(resp) => (resp.status().is_success(), Some(resp.status().as_u16())),
            Err(_) => (false, None),
        };

        let mut counts = self.failure_counts.lock().await;
        let attempt = if ok {
            counts.remove(&target.application_id);
            1
        } else {
            let count = counts.entry(target.application_id).or_insert(0);
            *count += 1;
            *count
        };
        drop(counts);

        let healthy = ok || attempt < CONSECUTIVE_FAILURE_THRESHOLD;
        let mut last = self.last_healthy.lock().await;
        let changed = last.get(&target.application_id).copied() != Some(healthy);
        last.insert(target.application_id, healthy);
        drop(last);

        if changed {
            self.events
                .publish(EventPayload::Health {
                    application_id: target.application_id,
                    healthy,
                    result: HealthCheckResult { status_code, ok, attempt },
                })
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paasdeploy_core::eventbus::SubscriberId;

    struct NullBus;

    #[async_trait]
    impl paasdeploy_core::eventbus::EventBus for NullBus {
        async fn publish(&self, _payload: EventPayload) {}
        async fn subscribe(&self) -> (SubscriberId, tokio::sync::mpsc::Receiver<paasdeploy_core::event::Event>) {
            let (_tx, rx) = tokio::sync::mpsc::channel(1);
            (SubscriberId(0), rx)
        }
        async fn unsubscribe(&self, _id: SubscriberId) {}
    }

    #[tokio::test]
    async fn app_monitor_flips_to_unhealthy_only_after_threshold_failures() {
        let monitor = AppHealthMonitor::new(Arc::new(NullBus), Duration::from_secs(1));
        let app_id = ResourceId::new();
        monitor
            .register(AppHealthTarget {
                application_id: app_id,
                base_url: "http://127.0.0.1:1".to_string(),
                path: "/health".to_string(),
                timeout: Duration::from_millis(50),
            })
            .await;

        for _ in 0..CONSECUTIVE_FAILURE_THRESHOLD - 1 {
            monitor.check_once().await;
        }
        assert_eq!(*monitor.last_healthy.lock().await.get(&app_id).unwrap(), true);

        monitor.check_once().await;
        assert_eq!(*monitor.last_healthy.lock().await.get(&app_id).unwrap(), false);
    }

    #[tokio::test]
    async fn deregister_clears_all_tracked_state() {
        let monitor = AppHealthMonitor::new(Arc::new(NullBus), Duration::from_secs(1));
        let app_id = ResourceId::new();
        monitor
            .register(AppHealthTarget {
                application_id: app_id,
                base_url: "http://127.0.0.1:1".to_string(),
                path: "/health".to_string(),
                timeout: Duration::from_millis(50),
            })
            .await;
        monitor.deregister(app_id).await;
        assert!(monitor.targets.read().await.is_empty());
    }
}
