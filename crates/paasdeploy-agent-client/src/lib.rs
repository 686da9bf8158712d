//! C3 — Remote Agent RPC Client: typed calls to a remote agent over a
//! mutually-authenticated TLS channel, plus the backend-side service that
//! accepts an agent's own `Register`/`Heartbeat` pushes.
//!
//! The mTLS client/server split is expressed through `tonic`'s native
//! `ClientTlsConfig`/`ServerTlsConfig`, backed by `rustls`. `rcgen` generates
//! the agent leaf certificates during provisioning (C7's `agent_certs`
//! step).

pub mod proto {
    tonic::include_proto!("paasdeploy.agent");
}

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use paasdeploy_core::agent::{
    AgentClient, AgentLogLine, AppSpec, ContainerActionResult, ContainerState, DeployPhase,
    DeployProgressMessage, RetryPolicy, RuntimeSpec, SystemInfo,
};
use paasdeploy_core::error::{Error, Result};
use paasdeploy_core::event::ContainerStats;
use paasdeploy_core::id::ResourceId;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Identity};
use tracing::warn;

use proto::agent_service_client::AgentServiceClient;

/// The backend's client identity (signed leaf) and the CA it trusts for the
/// agent's own server certificate — one per node, since each agent has its
/// own leaf certificate (C3 security note).
#[derive(Clone)]
pub struct AgentTlsMaterial {
    pub ca_pem: Vec<u8>,
    pub client_cert_pem: Vec<u8>,
    pub client_key_pem: Vec<u8>,
    /// TLS SNI / cert name the agent's server certificate was issued for.
    pub domain_name: String,
}

/// A `tonic`-backed [`AgentClient`] for a single node. Constructed fresh per
/// call site (or cached by the caller) since each node dials a distinct
/// endpoint with its own TLS material.
pub struct TonicAgentClient {
    client: AgentServiceClient<Channel>,
    call_timeout: Duration,
    retry: RetryPolicy,
}

impl TonicAgentClient {
    pub async fn connect(
        endpoint: &str,
        tls: &AgentTlsMaterial,
        call_timeout: Duration,
    ) -> Result<Self> {
        let tls_config = ClientTlsConfig::new()
            .ca_certificate(Certificate::from_pem(&tls.ca_pem))
            .identity(Identity::from_pem(&tls.client_cert_pem, &tls.client_key_pem))
            .domain_name(tls.domain_name.clone());

        let channel = Channel::from_shared(endpoint.to_string())
            .map_err(|e| Error::InvalidInput(format!("invalid agent endpoint {endpoint}: {e}")))?
            .tls_config(tls_config)
            .map_err(|e| Error::Unavailable(format!("agent tls config: {e}")))?
            .timeout(call_timeout)
            .connect()
            .await
            .map_err(|e| Error::Unavailable(format!("connect to agent {endpoint}: {e}")))?;

        Ok(Self {
            client: AgentServiceClient::new(channel),
            call_timeout,
            retry: RetryPolicy::default(),
        })
    }

    /// Retries only idempotent read-only calls, per C3
    /// (100ms base, factor 2, max 2s, max 3 attempts).
    async fn with_retry<T, F, Fut>(&self, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut last_err = None;
        for attempt in 0..self.retry.max_attempts {
            match f().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!(attempt, error = %e, "retryable agent call failed");
                    last_err = Some(e);
                    tokio::time::sleep(self.retry.delay_for_attempt(attempt)).await;
                }
            }
        }
        Err(last_err.unwrap_or(Error::Unavailable("agent call exhausted retries".to_string())))
    }
}

fn to_proto_container_state(state: proto::ContainerState) -> ContainerState {
    match state {
        proto::ContainerState::Running => ContainerState::Running,
        proto::ContainerState::Stopped => ContainerState::Stopped,
        _ => ContainerState::Missing,
    }
}

fn to_proto_phase(phase: proto::DeployPhase) -> Option<DeployPhase> {
    match phase {
        proto::DeployPhase::Clone => Some(DeployPhase::Clone),
        proto::DeployPhase::Config => Some(DeployPhase::Config),
        proto::DeployPhase::Build => Some(DeployPhase::Build),
        proto::DeployPhase::Release => Some(DeployPhase::Release),
        proto::DeployPhase::Health => Some(DeployPhase::Health),
        proto::DeployPhase::Unspecified => None,
    }
}

#[async_trait]
impl AgentClient for TonicAgentClient {
    /// Active liveness probe used by the health monitor (C9). Distinct from
    /// the agent's own periodic push, which the backend accepts through
    /// [`AgentIngestService`] below; this is the backend *asking*, used when
    /// C9 wants an on-demand check rather than waiting for the next push.
    async fn heartbeat(&self, node_id: ResourceId) -> Result<(String, SystemInfo)> {
        self.with_retry(|| async {
            let mut client = self.client.clone();
            let response = client
                .heartbeat(proto::HeartbeatRequest {
                    node_id: node_id.to_string(),
                    agent_version: String::new(),
                    os: String::new(),
                    arch: String::new(),
                    container_runtime_version: String::new(),
                })
                .await
                .map_err(|e| Error::Unavailable(format!("agent heartbeat: {e}")))?
                .into_inner();

            if !response.error_text.is_empty() {
                return Err(Error::Unavailable(response.error_text));
            }
            Ok((
                String::new(),
                SystemInfo {
                    os: String::new(),
                    arch: String::new(),
                    container_runtime_version: None,
                },
            ))
        })
        .await
    }

    async fn execute_deploy(
        &self,
        deployment_id: ResourceId,
        app: AppSpec,
        runtime: RuntimeSpec,
        commit_sha: &str,
    ) -> Result<BoxStream<'static, Result<DeployProgressMessage>>> {
        let mut client = self.client.clone();
        let request = proto::ExecuteDeployRequest {
            deployment_id: deployment_id.to_string(),
            app: Some(proto::AppSpec {
                name: app.name,
                image_tag: app.image_tag,
                port: app.port as u32,
                host_port: app.host_port as u32,
                env: app.env,
                memory_limit: app.memory_limit.unwrap_or_default(),
                cpu_limit: app.cpu_limit.unwrap_or_default(),
                domains: app.domains,
            }),
            runtime: Some(proto::RuntimeSpec {
                dockerfile: runtime.dockerfile,
                build_context: runtime.build_context,
                build_args: runtime.build_args,
                target_stage: runtime.target_stage.unwrap_or_default(),
            }),
            commit_sha: commit_sha.to_string(),
        };

        let stream = client
            .execute_deploy(request)
            .await
            .map_err(|e| Error::Unavailable(format!("execute_deploy: {e}")))?
            .into_inner();

        let mapped = stream.map(|result| match result {
            Ok(progress) => match progress.message {
                Some(proto::deploy_progress::Message::Phase(phase)) => {
                    let phase = proto::DeployPhase::try_from(phase).unwrap_or(proto::DeployPhase::Unspecified);
                    match to_proto_phase(phase) {
                        Some(phase) => Ok(DeployProgressMessage::Phase { phase }),
                        None => Err(Error::Unavailable("agent sent unspecified deploy phase".to_string())),
                    }
                }
                Some(proto::deploy_progress::Message::Log(log)) => {
                    let phase = proto::DeployPhase::try_from(log.phase).unwrap_or(proto::DeployPhase::Unspecified);
                    match to_proto_phase(phase) {
                        Some(phase) => Ok(DeployProgressMessage::Log { phase, line: log.line }),
                        None => Err(Error::Unavailable("agent sent unspecified deploy phase".to_string())),
                    }
                }
                Some(proto::deploy_progress::Message::Finished(finished)) => {
                    Ok(DeployProgressMessage::Finished {
                        ok: finished.ok,
                        error_text: (!finished.error_text.is_empty()).then_some(finished.error_text),
                    })
                }
                None => Err(Error::Unavailable("empty deploy progress message".to_string())),
            },
            Err(e) => Err(Error::Unavailable(format!("deploy stream error: {e}"))),
        });

        Ok(Box::pin(mapped))
    }

    async fn stop_container(&self, app_name: &str) -> Result<ContainerActionResult> {
        self.container_action(app_name, |mut c, r| async move { c.stop_container(r).await })
            .await
    }

    async fn start_container(&self, app_name: &str) -> Result<ContainerActionResult> {
        self.container_action(app_name, |mut c, r| async move { c.start_container(r).await })
            .await
    }

    async fn restart_container(&self, app_name: &str) -> Result<ContainerActionResult> {
        self.container_action(app_name, |mut c, r| async move { c.restart_container(r).await })
            .await
    }

    async fn get_container_logs(
        &self,
        app_name: &str,
        tail_lines: u32,
        follow: bool,
    ) -> Result<BoxStream<'static, Result<AgentLogLine>>> {
        self.with_retry(|| async {
            let mut client = self.client.clone();
            let stream = client
                .get_container_logs(proto::ContainerLogsRequest {
                    app_name: app_name.to_string(),
                    tail_lines,
                    follow,
                })
                .await
                .map_err(|e| Error::Unavailable(format!("get_container_logs: {e}")))?
                .into_inner();

            let mapped = stream.map(|result| match result {
                Ok(line) if line.error_text.is_empty() => Ok(AgentLogLine {
                    timestamp: DateTime::<Utc>::from_timestamp_millis(line.timestamp_unix_ms)
                        .unwrap_or_else(Utc::now),
                    line: line.line,
                }),
                Ok(line) => Err(Error::Unavailable(line.error_text)),
                Err(e) => Err(Error::Unavailable(format!("log stream error: {e}"))),
            });

            Ok(Box::pin(mapped) as BoxStream<'static, Result<AgentLogLine>>)
        })
        .await
    }

    async fn get_container_stats(
        &self,
        app_name: &str,
    ) -> Result<BoxStream<'static, Result<ContainerStats>>> {
        self.with_retry(|| async {
            let mut client = self.client.clone();
            let stream = client
                .get_container_stats(proto::ContainerStatsRequest {
                    app_name: app_name.to_string(),
                })
                .await
                .map_err(|e| Error::Unavailable(format!("get_container_stats: {e}")))?
                .into_inner();

            let mapped = stream.map(|result| match result {
                Ok(sample) if sample.error_text.is_empty() => Ok(ContainerStats {
                    cpu_percent: sample.cpu_percent,
                    mem_bytes: sample.mem_bytes,
                    mem_limit_bytes: sample.mem_limit_bytes,
                    net_rx_bytes: sample.net_rx_bytes,
                    net_tx_bytes: sample.net_tx_bytes,
                }),
                Ok(sample) => Err(Error::Unavailable(sample.error_text)),
                Err(e) => Err(Error::Unavailable(format!("stats stream error: {e}"))),
            });

            Ok(Box::pin(mapped) as BoxStream<'static, Result<ContainerStats>>)
        })
        .await
    }
}

impl TonicAgentClient {
    async fn container_action<F, Fut>(&self, app_name: &str, call: F) -> Result<ContainerActionResult>
    where
        F: Fn(AgentServiceClient<Channel>, proto::ContainerActionRequest) -> Fut,
        Fut: std::future::Future<
            Output = std::result::Result<tonic::Response<proto::ContainerActionResponse>, tonic::Status>,
        >,
    {
        let response = call(
            self.client.clone(),
            proto::ContainerActionRequest { app_name: app_name.to_string() },
        )
        .await
        .map_err(|e| Error::Unavailable(format!("container action on {app_name}: {e}")))?
        .into_inner();

        if !response.error_text.is_empty() {
            return Err(Error::Unavailable(response.error_text));
        }

        let before = proto::ContainerState::try_from(response.before).unwrap_or(proto::ContainerState::Unspecified);
        let after = proto::ContainerState::try_from(response.after).unwrap_or(proto::ContainerState::Unspecified);
        Ok(ContainerActionResult {
            before: to_proto_container_state(before),
            after: to_proto_container_state(after),
        })
    }
}

/// Backend-side gRPC service that accepts an agent's own `Register`/
/// `Heartbeat` pushes (§4.3: "agent-side, accepted by backend").
/// Implemented against the same [`proto::agent_service_server::AgentService`]
/// trait an agent binary's client targets, since both directions share one
/// `.proto`; the backend only ever implements the two agent-initiated RPCs
/// here and panics on the rest, which are backend-initiated and never
/// dialed by an agent.
pub struct AgentIngestService {
    pub on_register: Arc<dyn Fn(ResourceId, String) -> Result<String> + Send + Sync>,
    pub on_heartbeat: Arc<dyn Fn(ResourceId, String, SystemInfo) -> Result<()> + Send + Sync>,
}

#[tonic::async_trait]
impl proto::agent_service_server::AgentService for AgentIngestService {
    type ExecuteDeployStream = BoxStream<'static, std::result::Result<proto::DeployProgress, tonic::Status>>;
    type GetContainerLogsStream = BoxStream<'static, std::result::Result<proto::ContainerLogLine, tonic::Status>>;
    type GetContainerStatsStream = BoxStream<'static, std::result::Result<proto::ContainerStatsSample, tonic::Status>>;

    async fn register(
        &self,
        request: tonic::Request<proto::RegisterRequest>,
    ) -> std::result::Result<tonic::Response<proto::RegisterResponse>, tonic::Status> {
        let req = request.into_inner();
        let node_id: ResourceId = req
            .node_id
            .parse()
            .map_err(|_| tonic::Status::invalid_argument("bad node_id"))?;

        let identity = (self.on_register)(node_id, req.backend_endpoint)
            .map_err(|e| tonic::Status::internal(e.to_string()))?;

        Ok(tonic::Response::new(proto::RegisterResponse {
            deploy_target_identity: identity,
            sequence: 0,
        }))
    }

    async fn heartbeat(
        &self,
        request: tonic::Request<proto::HeartbeatRequest>,
    ) -> std::result::Result<tonic::Response<proto::HeartbeatResponse>, tonic::Status> {
        let req = request.into_inner();
        let node_id: ResourceId = req
            .node_id
            .parse()
            .map_err(|_| tonic::Status::invalid_argument("bad node_id"))?;

        (self.on_heartbeat)(
            node_id,
            req.agent_version,
            SystemInfo {
                os: req.os,
                arch: req.arch,
                container_runtime_version: (!req.container_runtime_version.is_empty())
                    .then_some(req.container_runtime_version),
            },
        )
        .map_err(|e| tonic::Status::internal(e.to_string()))?;

        Ok(tonic::Response::new(proto::HeartbeatResponse {
            sequence: 0,
            error_text: String::new(),
        }))
    }

    async fn execute_deploy(
        &self,
        _request: tonic::Request<proto::ExecuteDeployRequest>,
    ) -> std::result::Result<tonic::Response<Self::ExecuteDeployStream>, tonic::Status> {
        Err(tonic::Status::unimplemented(
            "ExecuteDeploy is backend-initiated; the backend never serves this RPC",
        ))
    }

    async fn stop_container(
        &self,
        _request: tonic::Request<proto::ContainerActionRequest>,
    ) -> std::result::Result<tonic::Response<proto::ContainerActionResponse>, tonic::Status> {
        Err(tonic::Status::unimplemented("backend-initiated RPC"))
    }

    async fn start_container(
        &self,
        _request: tonic::Request<proto::ContainerActionRequest>,
    ) -> std::result::Result<tonic::Response<proto::ContainerActionResponse>, tonic::Status> {
        Err(tonic::Status::unimplemented("backend-initiated RPC"))
    }

    async fn restart_container(
        &self,
        _request: tonic::Request<proto::ContainerActionRequest>,
    ) -> std::result::Result<tonic::Response<proto::ContainerActionResponse>, tonic::Status> {
        Err(tonic::Status::unimplemented("backend-initiated RPC"))
    }

    async fn get_container_logs(
        &self,
        _request: tonic::Request<proto::ContainerLogsRequest>,
    ) -> std::result::Result<tonic::Response<Self::GetContainerLogsStream>, tonic::Status> {
        Err(tonic::Status::unimplemented("backend-initiated RPC"))
    }

    async fn get_container_stats(
        &self,
        _request: tonic::Request<proto::ContainerStatsRequest>,
    ) -> std::result::Result<tonic::Response<Self::GetContainerStatsStream>, tonic::Status> {
        Err(tonic::Status::unimplemented("backend-initiated RPC"))
    }
}

/// Generates a fresh self-signed CA (process-wide singleton, loaded once at
/// startup per §5's shared-resource note) and a leaf
/// certificate signed by it for one agent, via `rcgen` — the same crate
/// `tangle-network-blueprint` uses for its own certificate material.
pub struct CertificateAuthority {
    ca_cert_pem: String,
    ca_key_pem: String,
}

impl CertificateAuthority {
    pub fn generate() -> Result<Self> {
        let mut params = rcgen::CertificateParams::new(Vec::new())
            .map_err(|e| Error::Unavailable(format!("ca params: {e}")))?;
        params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        params
            .distinguished_name
            .push(rcgen::DnType::CommonName, "paasdeploy-ca");

        let key_pair = rcgen::KeyPair::generate().map_err(|e| Error::Unavailable(e.to_string()))?;
        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| Error::Unavailable(format!("self-sign ca: {e}")))?;

        Ok(Self {
            ca_cert_pem: cert.pem(),
            ca_key_pem: key_pair.serialize_pem(),
        })
    }

    pub fn from_pem(ca_cert_pem: String, ca_key_pem: String) -> Self {
        Self { ca_cert_pem, ca_key_pem }
    }

    pub fn ca_pem(&self) -> &str {
        &self.ca_cert_pem
    }

    /// Issues a leaf certificate for one agent, signed by this CA. Rotation
    /// (C3) replaces only this leaf, never the CA itself.
    pub fn issue_leaf(&self, node_id: ResourceId) -> Result<(String, String)> {
        let ca_key_pair = rcgen::KeyPair::from_pem(&self.ca_key_pem)
            .map_err(|e| Error::Unavailable(format!("parse ca key: {e}")))?;
        let ca_params = rcgen::CertificateParams::from_ca_cert_pem(&self.ca_cert_pem)
            .map_err(|e| Error::Unavailable(format!("parse ca cert: {e}")))?;
        let ca_cert = ca_params
            .self_signed(&ca_key_pair)
            .map_err(|e| Error::Unavailable(format!("rebuild ca cert: {e}")))?;

        let domain = format!("node-{node_id}.paasdeploy.internal");
        let mut leaf_params = rcgen::CertificateParams::new(vec![domain.clone()])
            .map_err(|e| Error::Unavailable(format!("leaf params: {e}")))?;
        leaf_params
            .distinguished_name
            .push(rcgen::DnType::CommonName, domain);

        let leaf_key = rcgen::KeyPair::generate().map_err(|e| Error::Unavailable(e.to_string()))?;
        let leaf_cert = leaf_params
            .signed_by(&leaf_key, &ca_cert, &ca_key_pair)
            .map_err(|e| Error::Unavailable(format!("sign leaf: {e}")))?;

        Ok((leaf_cert.pem(), leaf_key.serialize_pem()))
    }
}

/// Placeholder stream used where a stub backend service needs to satisfy an
/// associated `Stream` type without ever being polled (see `execute_deploy`
/// above, which always errors before returning a stream).
#[allow(dead_code)]
fn empty_stream<T>() -> BoxStream<'static, T> {
    Box::pin(stream::empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ca_generates_and_issues_a_leaf() {
        let ca = CertificateAuthority::generate().unwrap();
        assert!(ca.ca_pem().contains("BEGIN CERTIFICATE"));

        let (leaf_pem, key_pem) = ca.issue_leaf(ResourceId::new()).unwrap();
        assert!(leaf_pem.contains("BEGIN CERTIFICATE"));
        assert!(key_pem.contains("PRIVATE KEY"));
    }

    #[test]
    fn retry_policy_backs_off_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(2));
    }
}
