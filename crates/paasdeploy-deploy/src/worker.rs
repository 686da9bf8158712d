//! Deploy worker: executes one deployment end-to-end, emitting progress
//! events through the bus and respecting cooperative cancellation.
//!
//! Pipeline (local mode): INIT -> CLONE -> CONFIG -> BUILD -> RELEASE ->
//! HEALTH -> FINALIZE (success | rollback -> failed). Remote mode delegates
//! CLONE..HEALTH to the node's agent over `AgentClient::execute_deploy` and
//! multiplexes the returned stream into the same event shapes; the pipeline
//! state machine itself stays authoritative on the backend either way.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{info, warn};

use paasdeploy_config::app_config::AppConfig;
use paasdeploy_config::variables::DeployContext;
use paasdeploy_core::agent::{AppSpec, DeployProgressMessage, RuntimeSpec};
use paasdeploy_core::application::Application;
use paasdeploy_core::deployment::{Deployment, DeploymentStatus};
use paasdeploy_core::error::{Error, Result};
use paasdeploy_core::event::EventPayload;
use paasdeploy_core::eventbus::BoxEventBus;
use paasdeploy_core::executor::{CommandExecutor, CommandSpec, LogLine};
use paasdeploy_core::id::ResourceId;
use paasdeploy_core::queue::{CompleteFields, DeployQueue};
use paasdeploy_db::{ApplicationRepo, DeploymentRepo, NodeRepo};
use paasdeploy_executor::container::{ContainerRuntime, HealthProbeOutcome, ReleaseSpec};
use paasdeploy_health::{AgentClientFactory, AppHealthMonitor, AppHealthTarget};

/// Bounded channel capacity for a phase's log sink; the collector task
/// drains it into both the event bus and the deployment's persisted log.
const LOG_CHANNEL_CAPACITY: usize = 256;

/// A transient infrastructure failure is retried exactly once with fresh
/// state before the phase gives up (C5).
const TRANSIENT_RETRY_ATTEMPTS: u32 = 2;

/// Collaborators a worker needs to run one deployment to completion, local
/// or remote. Constructed once per worker and shared (wrapped in `Arc`) by
/// the engine's worker pool.
pub struct DeployWorker {
    pub worker_id: String,
    pub queue: Arc<dyn DeployQueue>,
    pub events: BoxEventBus,
    pub applications: Arc<dyn ApplicationRepo>,
    pub deployments: Arc<dyn DeploymentRepo>,
    pub nodes: Arc<dyn NodeRepo>,
    pub executor: Arc<dyn CommandExecutor>,
    pub containers: Arc<ContainerRuntime>,
    pub agent_clients: Arc<dyn AgentClientFactory>,
    pub app_health: Arc<AppHealthMonitor>,
    pub data_root: PathBuf,
}

impl DeployWorker {
    /// Runs `deployment` (already claimed, status Running) to a terminal
    /// state, writing the result through `queue.complete` and publishing the
    /// matching terminal event. Never panics on a pipeline failure — every
    /// error path ends in a `Failed`/`Cancelled` completion.
    pub async fn execute(&self, mut deployment: Deployment) {
        let deployment_id = deployment.id;
        let application = match self.applications.get(deployment.application_id).await {
            Ok(app) => app,
            Err(e) => {
                self.finish_failed(&deployment, format!("load application: {e}")).await;
                return;
            }
        };

        deployment.previous_image_tag = self.last_success_image_tag(&application).await;
        let image_tag = deployment.image_tag(&application.name);

        self.events
            .publish(EventPayload::Running {
                deployment_id,
                application_id: application.id,
            })
            .await;

        let outcome = if let Some(node_id) = application.node_id {
            self.run_remote(&deployment, &application, node_id, &image_tag).await
        } else {
            self.run_local(&deployment, &application, &image_tag).await
        };

        match outcome {
            Ok(()) => self.finish_success(&deployment, &application, &image_tag).await,
            Err(PipelineError::Cancelled) => self.finish_cancelled(&deployment).await,
            Err(PipelineError::NoRollback(reason)) => {
                self.finish_failed(&deployment, reason).await;
            }
            Err(PipelineError::Rollback(reason)) => {
                self.rollback_and_fail(&deployment, &application, reason).await;
            }
        }
    }

    async fn cancel_requested(&self, deployment_id: ResourceId) -> bool {
        matches!(self.queue.is_cancel_requested(deployment_id).await, Ok(true))
    }

    // ---- local-mode pipeline --------------------------------------------

    async fn run_local(
        &self,
        deployment: &Deployment,
        application: &Application,
        image_tag: &str,
    ) -> std::result::Result<(), PipelineError> {
        if self.cancel_requested(deployment.id).await {
            return Err(PipelineError::Cancelled);
        }

        // CLONE
        let working_dir = application.working_copy_path(&self.data_root);
        self.clone_or_update(deployment, application, &working_dir)
            .await
            .map_err(|e| PipelineError::NoRollback(format!("clone: {e}")))?;

        if self.cancel_requested(deployment.id).await {
            return Err(PipelineError::Cancelled);
        }

        // CONFIG
        let config = self
            .read_config(application, &working_dir)
            .await
            .map_err(|e| PipelineError::NoRollback(format!("config: {e}")))?;

        if self.cancel_requested(deployment.id).await {
            return Err(PipelineError::Cancelled);
        }

        // BUILD
        self.build(deployment, application, &working_dir, image_tag, &config)
            .await
            .map_err(|e| PipelineError::NoRollback(format!("build: {e}")))?;

        if self.cancel_requested(deployment.id).await {
            self.containers
                .stop_and_remove(&ContainerRuntime::container_name(&application.name))
                .await;
            return Err(PipelineError::Cancelled);
        }

        // RELEASE
        let release_spec = self.build_release_spec(deployment, application, image_tag, &config);
        self.containers
            .release(&release_spec)
            .await
            .map_err(|e| PipelineError::Rollback(format!("release: {e}")))?;

        if self.cancel_requested(deployment.id).await {
            self.containers.stop_and_remove(&release_spec.container_name).await;
            return Err(PipelineError::Cancelled);
        }

        // HEALTH — probed through the container's name on the shared proxy
        // network, the same path production traffic takes (the
        // answer to the "inside the reverse-proxy network" open question).
        let base_url = format!(
            "http://{}:{}",
            release_spec.container_name, release_spec.container_port
        );
        self.probe_until_healthy(&base_url, &config)
            .await
            .map_err(|e| PipelineError::Rollback(format!("health: {e}")))?;

        self.app_health
            .register(AppHealthTarget {
                application_id: application.id,
                base_url,
                path: config.healthcheck.path.clone(),
                timeout: config
                    .healthcheck
                    .timeout_duration()
                    .unwrap_or(Duration::from_secs(2)),
            })
            .await;

        Ok(())
    }

    async fn clone_or_update(
        &self,
        deployment: &Deployment,
        application: &Application,
        working_dir: &Path,
    ) -> Result<()> {
        let exists = tokio::fs::metadata(working_dir.join(".git")).await.is_ok();
        if !exists {
            tokio::fs::create_dir_all(working_dir.parent().unwrap_or(working_dir))
                .await
                .map_err(|e| Error::Unavailable(format!("create working copy parent: {e}")))?;
            self.run_logged(
                deployment,
                CommandSpec::new(
                    "git",
                    [
                        "clone".to_string(),
                        application.repo_url.clone(),
                        working_dir.display().to_string(),
                    ],
                )
                .with_timeout(Duration::from_secs(300)),
            )
            .await?;
        } else {
            self.run_logged(
                deployment,
                CommandSpec::new(
                    "git",
                    [
                        "-C".to_string(),
                        working_dir.display().to_string(),
                        "fetch".to_string(),
                        "origin".to_string(),
                    ],
                )
                .with_timeout(Duration::from_secs(120)),
            )
            .await?;
        }

        self.run_logged(
            deployment,
            CommandSpec::new(
                "git",
                [
                    "-C".to_string(),
                    working_dir.display().to_string(),
                    "reset".to_string(),
                    "--hard".to_string(),
                    deployment.commit_sha.clone(),
                ],
            )
            .with_timeout(Duration::from_secs(30)),
        )
        .await?;

        Ok(())
    }

    async fn read_config(&self, application: &Application, working_dir: &Path) -> Result<AppConfig> {
        let config_path = working_dir.join(&application.working_dir).join("paasdeploy.json");
        let text = tokio::fs::read_to_string(&config_path)
            .await
            .map_err(|e| Error::InvalidInput(format!("read {}: {e}", config_path.display())))?;
        AppConfig::parse(&text).map_err(|e| Error::InvalidInput(e.to_string()))
    }

    async fn build(
        &self,
        deployment: &Deployment,
        application: &Application,
        working_dir: &Path,
        image_tag: &str,
        config: &AppConfig,
    ) -> Result<()> {
        let (tx, rx) = mpsc::channel::<LogLine>(LOG_CHANNEL_CAPACITY);
        let collector = self.spawn_log_collector(deployment.id, application.id, rx);

        let result = self.containers.build_image(working_dir, image_tag, config, tx).await;
        let _ = collector.await;
        result
    }

    fn build_release_spec(
        &self,
        deployment: &Deployment,
        application: &Application,
        image_tag: &str,
        config: &AppConfig,
    ) -> ReleaseSpec {
        let ctx = DeployContext::with_commit(
            &deployment.commit_sha,
            deployment.commit_message.as_deref(),
            &application.branch,
        );
        ReleaseSpec {
            container_name: ContainerRuntime::container_name(&application.name),
            image_tag: image_tag.to_string(),
            host_port: config.effective_host_port(),
            container_port: config.port,
            env: ctx.interpolate_map(&config.env),
            memory_limit: config.resources.memory.clone(),
            cpu_limit: config.resources.cpu.clone(),
            domains: config.domains.clone(),
        }
    }

    /// HEALTH policy: wait `startPeriod`, then probe every `interval`; any
    /// 2xx is healthy immediately, `retries` consecutive non-2xx fails.
    async fn probe_until_healthy(&self, base_url: &str, config: &AppConfig) -> Result<()> {
        let interval = config
            .healthcheck
            .interval_duration()
            .map_err(|e| Error::InvalidInput(e.to_string()))?;
        let timeout = config
            .healthcheck
            .timeout_duration()
            .map_err(|e| Error::InvalidInput(e.to_string()))?;
        let start_period = config
            .healthcheck
            .start_period_duration()
            .map_err(|e| Error::InvalidInput(e.to_string()))?;

        tokio::time::sleep(start_period).await;

        let mut consecutive_failures = 0u32;
        loop {
            match self
                .containers
                .probe_health(base_url, &config.healthcheck.path, timeout)
                .await
            {
                HealthProbeOutcome::Healthy => return Ok(()),
                HealthProbeOutcome::Unhealthy => {
                    consecutive_failures += 1;
                    if consecutive_failures >= config.healthcheck.retries {
                        return Err(Error::Unavailable(format!(
                            "healthcheck did not pass after {consecutive_failures} attempts"
                        )));
                    }
                    tokio::time::sleep(interval).await;
                }
            }
        }
    }

    fn spawn_log_collector(
        &self,
        deployment_id: ResourceId,
        application_id: ResourceId,
        mut rx: mpsc::Receiver<LogLine>,
    ) -> tokio::task::JoinHandle<()> {
        let events = self.events.clone();
        let deployments = self.deployments.clone();
        tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                let _ = deployments.append_log(deployment_id, &format!("{}\n", line.text)).await;
                events
                    .publish(EventPayload::Log {
                        deployment_id,
                        application_id,
                        message: line.text,
                    })
                    .await;
            }
        })
    }

    async fn run_logged(&self, deployment: &Deployment, spec: CommandSpec) -> Result<()> {
        let (tx, rx) = mpsc::channel::<LogLine>(LOG_CHANNEL_CAPACITY);
        let collector = self.spawn_log_collector(deployment.id, deployment.application_id, rx);
        let result = self.executor.run_streamed(&spec, tx).await;
        let _ = collector.await;
        result.map(|_| ())
    }

    // ---- remote-mode pipeline --------------------------------------------

    async fn run_remote(
        &self,
        deployment: &Deployment,
        application: &Application,
        node_id: ResourceId,
        image_tag: &str,
    ) -> std::result::Result<(), PipelineError> {
        let node = self
            .nodes
            .get(node_id)
            .await
            .map_err(|e| PipelineError::NoRollback(format!("load node: {e}")))?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.run_remote_once(deployment, application, &node, image_tag).await {
                Ok(()) => return Ok(()),
                Err(PipelineError::Cancelled) => return Err(PipelineError::Cancelled),
                Err(err) if attempt < TRANSIENT_RETRY_ATTEMPTS && is_transient(&err) => {
                    warn!(deployment_id = %deployment.id, attempt, "transient remote deploy error, retrying once");
                    continue;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn run_remote_once(
        &self,
        deployment: &Deployment,
        application: &Application,
        node: &paasdeploy_core::node::Node,
        image_tag: &str,
    ) -> std::result::Result<(), PipelineError> {
        let client = self
            .agent_clients
            .connect(node)
            .await
            .map_err(|e| PipelineError::NoRollback(format!("connect to agent: {e}")))?;

        let app_spec = AppSpec {
            name: application.name.clone(),
            image_tag: image_tag.to_string(),
            port: 8080,
            host_port: 8080,
            env: Default::default(),
            memory_limit: None,
            cpu_limit: None,
            domains: Vec::new(),
        };
        let runtime_spec = RuntimeSpec {
            dockerfile: "Dockerfile".to_string(),
            build_context: ".".to_string(),
            build_args: Default::default(),
            target_stage: None,
        };

        let mut stream = client
            .execute_deploy(deployment.id, app_spec, runtime_spec, &deployment.commit_sha)
            .await
            .map_err(|e| PipelineError::NoRollback(format!("execute_deploy: {e}")))?;

        while let Some(message) = stream.next().await {
            if self.cancel_requested(deployment.id).await {
                return Err(PipelineError::Cancelled);
            }
            match message.map_err(|e| PipelineError::Rollback(format!("agent stream: {e}")))? {
                DeployProgressMessage::Phase { phase } => {
                    info!(deployment_id = %deployment.id, ?phase, "remote deploy phase");
                }
                DeployProgressMessage::Log { line, .. } => {
                    let _ = self.deployments.append_log(deployment.id, &format!("{line}\n")).await;
                    self.events
                        .publish(EventPayload::Log {
                            deployment_id: deployment.id,
                            application_id: application.id,
                            message: line,
                        })
                        .await;
                }
                DeployProgressMessage::Finished { ok, error_text } => {
                    if ok {
                        return Ok(());
                    }
                    return Err(PipelineError::Rollback(
                        error_text.unwrap_or_else(|| "remote deploy failed".to_string()),
                    ));
                }
            }
        }

        Err(PipelineError::Rollback(
            "agent stream ended without a FINISHED message".to_string(),
        ))
    }

    // ---- finalize / rollback ----------------------------------------------

    async fn last_success_image_tag(&self, application: &Application) -> Option<String> {
        let history = self.deployments.list_by_application(application.id, 50).await.ok()?;
        history
            .into_iter()
            .find(|d| d.status == DeploymentStatus::Success)
            .and_then(|d| d.current_image_tag)
    }

    async fn finish_success(&self, deployment: &Deployment, application: &Application, image_tag: &str) {
        let fields = CompleteFields {
            status: DeploymentStatus::Success,
            current_image_tag: Some(image_tag.to_string()),
            error_message: None,
        };
        if let Err(e) = self.queue.complete(deployment.id, fields).await {
            warn!(deployment_id = %deployment.id, error = %e, "failed to record deployment success");
        }
        self.events
            .publish(EventPayload::Success {
                deployment_id: deployment.id,
                application_id: application.id,
                message: None,
            })
            .await;
    }

    async fn finish_failed(&self, deployment: &Deployment, reason: String) {
        let fields = CompleteFields {
            status: DeploymentStatus::Failed,
            current_image_tag: None,
            error_message: Some(reason.clone()),
        };
        if let Err(e) = self.queue.complete(deployment.id, fields).await {
            warn!(deployment_id = %deployment.id, error = %e, "failed to record deployment failure");
        }
        self.events
            .publish(EventPayload::Failed {
                deployment_id: deployment.id,
                application_id: deployment.application_id,
                message: Some(reason),
            })
            .await;
    }

    async fn finish_cancelled(&self, deployment: &Deployment) {
        let fields = CompleteFields {
            status: DeploymentStatus::Cancelled,
            current_image_tag: None,
            error_message: None,
        };
        if let Err(e) = self.queue.complete(deployment.id, fields).await {
            warn!(deployment_id = %deployment.id, error = %e, "failed to record deployment cancellation");
        }
        self.events
            .publish(EventPayload::Cancelled {
                deployment_id: deployment.id,
                application_id: deployment.application_id,
                message: None,
            })
            .await;
    }

    /// Rollback path: if a `previous_image_tag` exists, restart the old
    /// container and re-probe health best-effort before writing FAILED. A
    /// rollback failure never overwrites the original error; it is appended
    /// as a note (§7).
    async fn rollback_and_fail(&self, deployment: &Deployment, application: &Application, reason: String) {
        let mut message = reason;
        if let Some(previous_tag) = &deployment.previous_image_tag {
            info!(deployment_id = %deployment.id, previous_tag, "rolling back to previous image");
            let container_name = ContainerRuntime::container_name(&application.name);
            let rollback_spec = ReleaseSpec {
                container_name: container_name.clone(),
                image_tag: previous_tag.clone(),
                host_port: 8080,
                container_port: 8080,
                env: Default::default(),
                memory_limit: None,
                cpu_limit: None,
                domains: Vec::new(),
            };
            match self.containers.release(&rollback_spec).await {
                Ok(()) => {
                    let base_url = format!("http://{container_name}:{}", rollback_spec.container_port);
                    let outcome = self
                        .containers
                        .probe_health(&base_url, "/health", Duration::from_secs(2))
                        .await;
                    if !matches!(outcome, HealthProbeOutcome::Healthy) {
                        message = format!("{message} (rollback: previous image did not become healthy)");
                    }
                }
                Err(e) => {
                    message = format!("{message} (rollback failed: {e})");
                }
            }
        }
        self.finish_failed(deployment, message).await;
    }
}

/// Failure shape driving the rollback decision, per C5 step 7.
enum PipelineError {
    /// Failed before an image existed; nothing to roll back to (e.g. CLONE,
    /// CONFIG, or BUILD failure on an application's first deployment).
    NoRollback(String),
    /// Failed after a release was attempted; roll back to
    /// `previous_image_tag` if one is set.
    Rollback(String),
    Cancelled,
}

fn is_transient(err: &PipelineError) -> bool {
    match err {
        PipelineError::Rollback(msg) | PipelineError::NoRollback(msg) => {
            msg.contains("agent stream") || msg.contains("connect to agent")
        }
        PipelineError::Cancelled => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_detection_matches_connection_errors() {
        assert!(is_transient(&PipelineError::NoRollback("connect to agent: timeout".into())));
        assert!(is_transient(&PipelineError::Rollback("agent stream: reset".into())));
        assert!(!is_transient(&PipelineError::NoRollback("build: RUN false".into())));
    }
}
