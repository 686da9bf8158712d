//! C7 — Provisioner: drives the ten named idempotent steps that turn a
//! freshly-registered [`Node`] into one the deploy engine can target, over
//! [`paasdeploy_ssh`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use paasdeploy_agent_client::CertificateAuthority;
use paasdeploy_core::crypto::MasterKey;
use paasdeploy_core::event::{EventPayload, ProvisionStepStatus};
use paasdeploy_core::eventbus::BoxEventBus;
use paasdeploy_core::id::ResourceId;
use paasdeploy_core::node::{Node, NodeStatus};
use paasdeploy_core::provisioner::{
    ProvisionError, ProvisionResult, ProvisionStep, Provisioner, StepOutcome,
};
use paasdeploy_core::ssh::{CommandResult, HostKeyPolicy, SshAuth, SshDialOptions, SshDialer, SshSession};
use paasdeploy_db::NodeRepo;

const STEP_TIMEOUT: Duration = Duration::from_secs(60);
const AGENT_ONLINE_POLL_INTERVAL: Duration = Duration::from_secs(2);
const AGENT_ONLINE_TIMEOUT: Duration = Duration::from_secs(120);
const AGENT_GRPC_PORT: u16 = 7443;

/// Everything a single provisioning run needs, wired from outside so the
/// provisioner stays unit-testable against a mock [`SshSession`].
pub struct SshProvisioner {
    node_repo: Arc<dyn NodeRepo>,
    dialer: Arc<dyn SshDialer>,
    events: BoxEventBus,
    master_key: Arc<MasterKey>,
    ca: Arc<CertificateAuthority>,
    /// The proxy host/port the node's agent should report back to once
    /// online — written into the systemd unit's `ExecStart` line.
    backend_endpoint: String,
}

impl SshProvisioner {
    pub fn new(
        node_repo: Arc<dyn NodeRepo>,
        dialer: Arc<dyn SshDialer>,
        events: BoxEventBus,
        master_key: Arc<MasterKey>,
        ca: Arc<CertificateAuthority>,
        backend_endpoint: String,
    ) -> Self {
        Self { node_repo, dialer, events, master_key, ca, backend_endpoint }
    }

    async fn dial(&self, node: &Node) -> Result<Box<dyn SshSession>, ProvisionError> {
        let mut auth = Vec::new();
        if let Some(blob) = &node.credentials.private_key {
            let pem = self
                .master_key
                .open(blob)
                .map_err(|e| ssh_err(ProvisionStep::SshConnect, e))?;
            auth.push(SshAuth::PrivateKey { pem, passphrase: None });
        }
        if let Some(blob) = &node.credentials.password {
            let password = self
                .master_key
                .open(blob)
                .map_err(|e| ssh_err(ProvisionStep::SshConnect, e))?;
            auth.push(SshAuth::Password { password: String::from_utf8_lossy(&password).into_owned() });
        }

        let host_key_policy = match &node.host_key_fingerprint {
            Some(fp) => HostKeyPolicy::Strict { pinned_fingerprint: fp.clone() },
            None => HostKeyPolicy::TrustOnFirstUse { pinned_fingerprint: None },
        };

        let opts = SshDialOptions {
            host: node.host.clone(),
            port: node.ssh_port,
            user: node.ssh_user.clone(),
            auth,
            host_key_policy,
            dial_timeout: Duration::from_secs(30),
        };

        self.dialer.dial(&opts).await.map_err(|e| ssh_err(ProvisionStep::SshConnect, e))
    }

    async fn begin_step(&self, node_id: ResourceId, step: ProvisionStep) {
        self.events
            .publish(EventPayload::ProvisionStep {
                node_id,
                step: step.name().to_string(),
                status: ProvisionStepStatus::Running,
                message: None,
            })
            .await;
    }

    async fn finish_step(&self, node_id: ResourceId, step: ProvisionStep, outcome: &Result<StepOutcome, ProvisionError>) {
        let status = match outcome {
            Ok(StepOutcome::Applied) => ProvisionStepStatus::Succeeded,
            Ok(StepOutcome::Skipped) => ProvisionStepStatus::Skipped,
            Err(_) => ProvisionStepStatus::Failed,
        };
        let message = outcome.as_ref().err().map(|e| e.to_string());
        self.events
            .publish(EventPayload::ProvisionStep { node_id, step: step.name().to_string(), status, message })
            .await;
    }

    async fn log(&self, node_id: ResourceId, message: impl Into<String>) {
        self.events.publish(EventPayload::ProvisionLog { node_id, message: message.into() }).await;
    }
}

fn ssh_err(step: ProvisionStep, e: impl ToString) -> ProvisionError {
    ProvisionError::Ssh { step, message: e.to_string() }
}

async fn run(session: &dyn SshSession, argv: &[&str]) -> paasdeploy_core::Result<CommandResult> {
    session.run(argv, STEP_TIMEOUT).await
}

fn ok_contains(result: &CommandResult, needle: &str) -> bool {
    result.exit_code == 0 && result.output.contains(needle)
}

#[async_trait]
impl Provisioner for SshProvisioner {
    async fn provision(&self, node_id: ResourceId) -> Result<ProvisionResult, ProvisionError> {
        let node = self
            .node_repo
            .get(node_id)
            .await
            .map_err(|e| ssh_err(ProvisionStep::SshConnect, e))?;

        let _ = self.node_repo.set_status(node_id, NodeStatus::Provisioning).await;

        let mut steps_applied = Vec::new();
        let result = self.provision_inner(&node, &mut steps_applied).await;

        match &result {
            Ok(()) => {
                let _ = self.node_repo.set_status(node_id, NodeStatus::Online).await;
                self.events.publish(EventPayload::ProvisionCompleted { node_id }).await;
            }
            Err(e) => {
                let _ = self.node_repo.set_status(node_id, NodeStatus::Error).await;
                self.events
                    .publish(EventPayload::ProvisionFailed { node_id, reason: format!("{e:?}"), message: e.to_string() })
                    .await;
            }
        }

        result.map(|()| ProvisionResult { steps_applied })
    }

    async fn deprovision(&self, node_id: ResourceId) -> paasdeploy_core::Result<()> {
        let node = self.node_repo.get(node_id).await?;
        let session = self
            .dial(&node)
            .await
            .map_err(|e| paasdeploy_core::Error::Unavailable(e.to_string()))?;

        self.log(node_id, "stopping paasdeploy-agent unit").await;
        let _ = run(session.as_ref(), &["sudo", "-n", "systemctl", "stop", "paasdeploy-agent"]).await;
        let _ = run(session.as_ref(), &["sudo", "-n", "systemctl", "disable", "paasdeploy-agent"]).await;
        let _ = run(session.as_ref(), &["sudo", "-n", "rm", "-f", "/etc/systemd/system/paasdeploy-agent.service"]).await;
        let _ = run(session.as_ref(), &["sudo", "-n", "rm", "-rf", "/opt/paasdeploy-agent"]).await;

        session.close().await.ok();
        let _ = self.node_repo.set_status(node_id, NodeStatus::Offline).await;
        Ok(())
    }
}

impl SshProvisioner {
    async fn provision_inner(
        &self,
        node: &Node,
        steps_applied: &mut Vec<(ProvisionStep, StepOutcome)>,
    ) -> Result<(), ProvisionError> {
        let node_id = node.id;
        let session = self.dial(node).await?;
        steps_applied.push((ProvisionStep::SshConnect, StepOutcome::Applied));
        self.finish_step(node_id, ProvisionStep::SshConnect, &Ok(StepOutcome::Applied)).await;

        if node.host_key_fingerprint.is_none() {
            let _ = self.node_repo.pin_host_key(node_id, session.host_key_fingerprint()).await;
        }

        self.step(node_id, ProvisionStep::RemoteEnv, steps_applied, self.remote_env(session.as_ref(), node_id)).await?;
        self.step(node_id, ProvisionStep::DockerCheck, steps_applied, self.docker_check(session.as_ref())).await?;

        let docker_already_present =
            matches!(steps_applied.last(), Some((ProvisionStep::DockerCheck, StepOutcome::Skipped)));
        if !docker_already_present {
            self.step(node_id, ProvisionStep::DockerInstall, steps_applied, self.docker_install(session.as_ref(), node_id))
                .await?;
        }

        self.step(node_id, ProvisionStep::DockerStart, steps_applied, self.docker_start(session.as_ref())).await?;
        self.step(node_id, ProvisionStep::DockerNetwork, steps_applied, self.docker_network(session.as_ref())).await?;
        self.step(node_id, ProvisionStep::ProxyInstall, steps_applied, self.proxy_install(session.as_ref())).await?;
        self.step(node_id, ProvisionStep::AgentCerts, steps_applied, self.agent_certs(session.as_ref(), node_id)).await?;
        self.step(node_id, ProvisionStep::AgentBinary, steps_applied, self.agent_binary(session.as_ref(), node_id))
            .await?;
        self.step(node_id, ProvisionStep::SystemdUnit, steps_applied, self.systemd_unit(session.as_ref())).await?;
        self.step(node_id, ProvisionStep::AwaitOnline, steps_applied, self.await_online(session.as_ref())).await?;

        session.close().await.map_err(|e| ssh_err(ProvisionStep::AwaitOnline, e))?;
        Ok(())
    }

    /// Runs one step, publishing `Running` before and `Succeeded`/`Skipped`/
    /// `Failed` after, and records the outcome on success.
    async fn step(
        &self,
        node_id: ResourceId,
        step: ProvisionStep,
        steps_applied: &mut Vec<(ProvisionStep, StepOutcome)>,
        fut: impl std::future::Future<Output = Result<StepOutcome, ProvisionError>>,
    ) -> Result<(), ProvisionError> {
        self.begin_step(node_id, step).await;
        let outcome = fut.await;
        self.finish_step(node_id, step, &outcome).await;
        let outcome = outcome?;
        steps_applied.push((step, outcome));
        Ok(())
    }

    async fn remote_env(&self, s: &dyn SshSession, node_id: ResourceId) -> Result<StepOutcome, ProvisionError> {
        self.log(node_id, "probing remote OS/arch").await;
        let uname = run(s, &["uname", "-s"]).await.map_err(|e| ssh_err(ProvisionStep::RemoteEnv, e))?;
        if !uname.output.to_lowercase().contains("linux") {
            return Err(ssh_err(ProvisionStep::RemoteEnv, format!("unsupported remote OS: {}", uname.output.trim())));
        }
        Ok(StepOutcome::Applied)
    }

    async fn docker_check(&self, s: &dyn SshSession) -> Result<StepOutcome, ProvisionError> {
        match run(s, &["sh", "-c", "command -v docker"]).await {
            Ok(result) if result.exit_code == 0 => Ok(StepOutcome::Skipped),
            _ => Ok(StepOutcome::Applied),
        }
    }

    async fn docker_install(&self, s: &dyn SshSession, node_id: ResourceId) -> Result<StepOutcome, ProvisionError> {
        self.log(node_id, "installing docker via get.docker.com").await;
        let install = run(s, &["sh", "-c", "curl -fsSL https://get.docker.com | sudo -n sh"])
            .await
            .map_err(|e| ProvisionError::RuntimeInstall { message: e.to_string() })?;
        if install.exit_code != 0 {
            return Err(ProvisionError::RuntimeInstall { message: install.output });
        }
        Ok(StepOutcome::Applied)
    }

    async fn docker_start(&self, s: &dyn SshSession) -> Result<StepOutcome, ProvisionError> {
        let status = run(s, &["sudo", "-n", "systemctl", "is-active", "docker"]).await;
        if matches!(&status, Ok(r) if ok_contains(r, "active")) {
            return Ok(StepOutcome::Skipped);
        }
        let enable = run(s, &["sudo", "-n", "systemctl", "enable", "--now", "docker"])
            .await
            .map_err(|e| ProvisionError::RuntimeInstall { message: e.to_string() })?;
        if enable.exit_code != 0 {
            return Err(ProvisionError::RuntimeInstall { message: enable.output });
        }
        Ok(StepOutcome::Applied)
    }

    async fn docker_network(&self, s: &dyn SshSession) -> Result<StepOutcome, ProvisionError> {
        let inspect = run(s, &["docker", "network", "inspect", "paasdeploy"]).await;
        if matches!(&inspect, Ok(r) if r.exit_code == 0) {
            return Ok(StepOutcome::Skipped);
        }
        let create = run(s, &["docker", "network", "create", "paasdeploy"])
            .await
            .map_err(|e| ProvisionError::RuntimeInstall { message: e.to_string() })?;
        if create.exit_code != 0 {
            return Err(ProvisionError::RuntimeInstall { message: create.output });
        }
        Ok(StepOutcome::Applied)
    }

    async fn proxy_install(&self, s: &dyn SshSession) -> Result<StepOutcome, ProvisionError> {
        let running = run(s, &["docker", "inspect", "-f", "{{.State.Running}}", "paasdeploy-proxy"]).await;
        if matches!(&running, Ok(r) if ok_contains(r, "true")) {
            return Ok(StepOutcome::Skipped);
        }
        let run_proxy = run(
            s,
            &[
                "docker", "run", "-d", "--name", "paasdeploy-proxy", "--network", "paasdeploy",
                "--restart", "unless-stopped", "-p", "80:80", "-p", "443:443", "caddy:2-alpine",
            ],
        )
        .await
        .map_err(|e| ProvisionError::ProxyInstall { message: e.to_string() })?;
        if run_proxy.exit_code != 0 {
            return Err(ProvisionError::ProxyInstall { message: run_proxy.output });
        }
        Ok(StepOutcome::Applied)
    }

    async fn agent_certs(&self, s: &dyn SshSession, node_id: ResourceId) -> Result<StepOutcome, ProvisionError> {
        self.log(node_id, "issuing agent leaf certificate").await;
        let (leaf_pem, key_pem) = self
            .ca
            .issue_leaf(node_id)
            .map_err(|e| ProvisionError::AgentInstall { message: e.to_string() })?;

        s.run(&["sudo", "-n", "mkdir", "-p", "/opt/paasdeploy-agent/tls"], STEP_TIMEOUT)
            .await
            .map_err(|e| ProvisionError::AgentInstall { message: e.to_string() })?;
        s.upload(self.ca.ca_pem().as_bytes(), "/opt/paasdeploy-agent/tls/ca.pem", 0o644)
            .await
            .map_err(|e| ProvisionError::AgentInstall { message: e.to_string() })?;
        s.upload(leaf_pem.as_bytes(), "/opt/paasdeploy-agent/tls/agent.pem", 0o644)
            .await
            .map_err(|e| ProvisionError::AgentInstall { message: e.to_string() })?;
        s.upload(key_pem.as_bytes(), "/opt/paasdeploy-agent/tls/agent-key.pem", 0o600)
            .await
            .map_err(|e| ProvisionError::AgentInstall { message: e.to_string() })?;
        Ok(StepOutcome::Applied)
    }

    async fn agent_binary(&self, s: &dyn SshSession, node_id: ResourceId) -> Result<StepOutcome, ProvisionError> {
        let present = run(s, &["sh", "-c", "test -x /opt/paasdeploy-agent/bin/paasdeploy-agent"]).await;
        if matches!(&present, Ok(r) if r.exit_code == 0) {
            return Ok(StepOutcome::Skipped);
        }
        self.log(node_id, "fetching agent binary release").await;
        s.run(&["sudo", "-n", "mkdir", "-p", "/opt/paasdeploy-agent/bin"], STEP_TIMEOUT)
            .await
            .map_err(|e| ProvisionError::AgentInstall { message: e.to_string() })?;
        let fetch = run(
            s,
            &[
                "sh", "-c",
                "curl -fsSL https://dl.paasdeploy.internal/agent/latest/paasdeploy-agent -o /opt/paasdeploy-agent/bin/paasdeploy-agent && chmod 755 /opt/paasdeploy-agent/bin/paasdeploy-agent",
            ],
        )
        .await
        .map_err(|e| ProvisionError::AgentInstall { message: e.to_string() })?;
        if fetch.exit_code != 0 {
            return Err(ProvisionError::AgentInstall { message: fetch.output });
        }
        Ok(StepOutcome::Applied)
    }

    async fn systemd_unit(&self, s: &dyn SshSession) -> Result<StepOutcome, ProvisionError> {
        let unit = format!(
            "[Unit]\nDescription=paasdeploy remote agent\nAfter=network.target docker.service\n\n[Service]\nExecStart=/opt/paasdeploy-agent/bin/paasdeploy-agent --tls-dir /opt/paasdeploy-agent/tls --backend {}\nRestart=always\nRestartSec=2\n\n[Install]\nWantedBy=multi-user.target\n",
            self.backend_endpoint,
        );
        s.upload(unit.as_bytes(), "/etc/systemd/system/paasdeploy-agent.service.tmp", 0o644)
            .await
            .map_err(|e| ProvisionError::AgentInstall { message: e.to_string() })?;
        let install = run(
            s,
            &[
                "sudo", "-n", "sh", "-c",
                "mv /etc/systemd/system/paasdeploy-agent.service.tmp /etc/systemd/system/paasdeploy-agent.service && systemctl daemon-reload && systemctl enable --now paasdeploy-agent",
            ],
        )
        .await
        .map_err(|e| ProvisionError::AgentInstall { message: e.to_string() })?;
        if install.exit_code != 0 {
            return Err(ProvisionError::AgentInstall { message: install.output });
        }
        Ok(StepOutcome::Applied)
    }

    async fn await_online(&self, s: &dyn SshSession) -> Result<StepOutcome, ProvisionError> {
        let deadline = tokio::time::Instant::now() + AGENT_ONLINE_TIMEOUT;
        loop {
            let probe = run(s, &["sh", "-c", &format!("curl -fsSk https://127.0.0.1:{AGENT_GRPC_PORT}/healthz")]).await;
            if matches!(&probe, Ok(r) if r.exit_code == 0) {
                return Ok(StepOutcome::Applied);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(ProvisionError::AwaitOnline);
            }
            tokio::time::sleep(AGENT_ONLINE_POLL_INTERVAL).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_contains_checks_both_exit_code_and_needle() {
        let ok = CommandResult { exit_code: 0, output: "active".to_string() };
        let failed = CommandResult { exit_code: 1, output: "active".to_string() };
        assert!(ok_contains(&ok, "active"));
        assert!(!ok_contains(&failed, "active"));
    }

    #[test]
    fn step_order_matches_the_spec_sequence() {
        assert_eq!(ProvisionStep::ORDER[0], ProvisionStep::SshConnect);
        assert_eq!(ProvisionStep::ORDER[10], ProvisionStep::AwaitOnline);
    }
}
