//! Container build/release/health-probe support for C5's BUILD, RELEASE and
//! HEALTH phases (local-mode deploy pipeline).

use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions, WaitContainerOptions,
};
use bollard::image::BuildImageOptions;
use bollard::models::HostConfig;
use futures::StreamExt;
use paasdeploy_config::app_config::{AppConfig, BuildSpec};
use paasdeploy_core::error::{Error, Result};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc::Sender;
use tracing::{info, warn};

use paasdeploy_core::executor::{LogLine, LogStream};

/// Network all application containers and the reverse proxy share.
pub const PROXY_NETWORK: &str = "paasdeploy";

/// Everything RELEASE needs to start a new container for an application,
/// already merged with `paasdeploy.json` defaults and interpolated env.
#[derive(Debug, Clone)]
pub struct ReleaseSpec {
    pub container_name: String,
    pub image_tag: String,
    pub host_port: u16,
    pub container_port: u16,
    pub env: HashMap<String, String>,
    pub memory_limit: Option<String>,
    pub cpu_limit: Option<String>,
    pub domains: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthProbeOutcome {
    Healthy,
    Unhealthy,
}

/// Thin wrapper over a `bollard::Docker` client for the BUILD/RELEASE/HEALTH
/// phases. Doesn't implement `CommandExecutor`: image build and container
/// lifecycle are a distinct seam from C1's local-process execution (the
/// BUILD phase streams logs from the daemon, not from a local child process).
pub struct ContainerRuntime {
    docker: Docker,
    http: reqwest::Client,
}

impl ContainerRuntime {
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| Error::Unavailable(format!("connect to docker: {e}")))?;
        Ok(Self {
            docker,
            http: reqwest::Client::builder()
                .build()
                .map_err(|e| Error::Unavailable(e.to_string()))?,
        })
    }

    pub fn with_client(docker: Docker) -> Self {
        Self {
            docker,
            http: reqwest::Client::new(),
        }
    }

    pub fn container_name(app_name: &str) -> String {
        format!("paasdeploy-{app_name}")
    }

    /// BUILD phase: build an image tagged `app:<short-commit>` from the
    /// working copy, streaming build log lines to `sink`.
    pub async fn build_image(
        &self,
        working_dir: &std::path::Path,
        image_tag: &str,
        config: &AppConfig,
        sink: Sender<LogLine>,
    ) -> Result<()> {
        let (dockerfile, context, args, target) = match &config.build {
            BuildSpec::Dockerfile {
                dockerfile,
                context,
                args,
                target,
            } => (dockerfile.clone(), context.clone(), args.clone(), target.clone()),
            BuildSpec::Buildpack { context, args } => {
                // No native buildpack support in bollard; a Dockerfile is
                // still required at the context root for local-mode builds.
                ("Dockerfile".to_string(), context.clone(), args.clone(), None)
            }
        };

        let build_dir = working_dir.join(&context);
        let tar = build_context_tar(&build_dir)?;

        let buildargs: HashMap<&str, &str> = args
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        let options = BuildImageOptions {
            dockerfile: dockerfile.as_str(),
            t: image_tag,
            buildargs,
            rm: true,
            target: target.as_deref().unwrap_or_default(),
            ..Default::default()
        };

        let mut stream = self.docker.build_image(options, None, Some(tar.into()));
        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(stream_line) = info.stream {
                        let _ = sink
                            .send(LogLine {
                                stream: LogStream::Stdout,
                                text: stream_line.trim_end().to_string(),
                            })
                            .await;
                    }
                    if let Some(error) = info.error {
                        let _ = sink
                            .send(LogLine {
                                stream: LogStream::Stderr,
                                text: error.clone(),
                            })
                            .await;
                        return Err(Error::Unavailable(format!("image build failed: {error}")));
                    }
                }
                Err(e) => {
                    return Err(Error::Unavailable(format!("image build failed: {e}")));
                }
            }
        }

        Ok(())
    }

    /// RELEASE phase: stop+remove the old container (if any), start a new
    /// one attached to the shared proxy network.
    pub async fn release(&self, spec: &ReleaseSpec) -> Result<()> {
        self.stop_and_remove(&spec.container_name).await;

        let env: Vec<String> = spec
            .env
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();

        let mut labels = HashMap::new();
        labels.insert("paasdeploy.managed".to_string(), "true".to_string());
        if !spec.domains.is_empty() {
            labels.insert("paasdeploy.domains".to_string(), spec.domains.join(","));
        }

        let port_bindings = bollard::models::PortBinding {
            host_ip: None,
            host_port: Some(spec.host_port.to_string()),
        };
        let mut port_map = HashMap::new();
        port_map.insert(
            format!("{}/tcp", spec.container_port),
            Some(vec![port_bindings]),
        );

        let host_config = HostConfig {
            port_bindings: Some(port_map),
            network_mode: Some(PROXY_NETWORK.to_string()),
            memory: spec.memory_limit.as_deref().and_then(parse_memory_bytes),
            nano_cpus: spec.cpu_limit.as_deref().and_then(parse_cpu_nanos),
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image_tag.clone()),
            env: Some(env),
            labels: Some(labels),
            host_config: Some(host_config),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let create_options = CreateContainerOptions {
            name: spec.container_name.clone(),
            platform: None,
        };

        info!(container = %spec.container_name, image = %spec.image_tag, "creating release container");
        self.docker
            .create_container(Some(create_options), config)
            .await
            .map_err(|e| Error::Unavailable(format!("create container: {e}")))?;

        self.docker
            .start_container(&spec.container_name, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| Error::Unavailable(format!("start container: {e}")))?;

        Ok(())
    }

    /// Best-effort cleanup of a partially-created container (cancellation,
    /// rollback). Errors are swallowed: there's nothing further to do.
    pub async fn stop_and_remove(&self, container_name: &str) {
        let _ = self
            .docker
            .stop_container(container_name, Some(StopContainerOptions { t: 10 }))
            .await;
        let _ = self
            .docker
            .remove_container(
                container_name,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await;
    }

    pub async fn wait_exited(&self, container_name: &str) -> Result<i64> {
        let mut stream = self.docker.wait_container(
            container_name,
            Some(WaitContainerOptions {
                condition: "not-running",
            }),
        );
        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            Some(Err(e)) => Err(Error::Unavailable(format!("wait container: {e}"))),
            None => Ok(0),
        }
    }

    pub fn stream_logs(&self, container_name: &str) -> impl futures::Stream<Item = LogLine> + '_ {
        let options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            ..Default::default()
        };
        self.docker
            .logs(container_name, Some(options))
            .filter_map(|result| async move {
                match result {
                    Ok(LogOutput::StdOut { message }) => Some(LogLine {
                        stream: LogStream::Stdout,
                        text: String::from_utf8_lossy(&message).trim_end().to_string(),
                    }),
                    Ok(LogOutput::StdErr { message }) => Some(LogLine {
                        stream: LogStream::Stderr,
                        text: String::from_utf8_lossy(&message).trim_end().to_string(),
                    }),
                    Ok(_) => None,
                    Err(e) => {
                        warn!(error = %e, "log stream error");
                        None
                    }
                }
            })
    }

    /// HEALTH phase: single probe attempt against the healthcheck endpoint.
    /// Any 2xx is healthy; anything else (including a connection error) is
    /// not. Caller owns the interval/retries/startPeriod policy.
    pub async fn probe_health(
        &self,
        base_url: &str,
        path: &str,
        timeout: Duration,
    ) -> HealthProbeOutcome {
        let url = format!("{}{}", base_url.trim_end_matches('/'), path);
        match self.http.get(&url).timeout(timeout).send().await {
            Ok(resp) if resp.status().is_success() => HealthProbeOutcome::Healthy,
            _ => HealthProbeOutcome::Unhealthy,
        }
    }
}

/// Converts a `paasdeploy.json` `resources.cpu` value (fractional CPU count,
/// e.g. `"0.5"` or `"2"`) into `HostConfig.nano_cpus`.
fn parse_cpu_nanos(s: &str) -> Option<i64> {
    let cpus: f64 = s.trim().parse().ok()?;
    if cpus <= 0.0 {
        return None;
    }
    Some((cpus * 1_000_000_000.0).round() as i64)
}

fn parse_memory_bytes(s: &str) -> Option<i64> {
    let s = s.trim();
    let split_at = s.find(|c: char| !c.is_ascii_digit())?;
    let (num, unit) = s.split_at(split_at);
    let value: i64 = num.parse().ok()?;
    match unit.to_ascii_lowercase().as_str() {
        "" | "b" => Some(value),
        "k" | "kb" => Some(value * 1024),
        "m" | "mb" => Some(value * 1024 * 1024),
        "g" | "gb" => Some(value * 1024 * 1024 * 1024),
        _ => None,
    }
}

/// Builds an in-memory tar archive of the build context directory for
/// `bollard::Docker::build_image`, which takes the context as a tar stream
/// rather than a path.
fn build_context_tar(dir: &std::path::Path) -> Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    builder
        .append_dir_all(".", dir)
        .map_err(|e| Error::Unavailable(format!("build context {}: {e}", dir.display())))?;
    builder
        .into_inner()
        .map_err(|e| Error::Unavailable(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_name_is_namespaced() {
        assert_eq!(ContainerRuntime::container_name("hello"), "paasdeploy-hello");
    }

    #[test]
    fn parses_memory_suffixes() {
        assert_eq!(parse_memory_bytes("512m"), Some(512 * 1024 * 1024));
        assert_eq!(parse_memory_bytes("2g"), Some(2 * 1024 * 1024 * 1024));
        assert_eq!(parse_memory_bytes("100"), Some(100));
        assert_eq!(parse_memory_bytes("bogus"), None);
    }

    #[test]
    fn parses_cpu_fractions_into_nanocpus() {
        assert_eq!(parse_cpu_nanos("0.5"), Some(500_000_000));
        assert_eq!(parse_cpu_nanos("2"), Some(2_000_000_000));
        assert_eq!(parse_cpu_nanos("0"), None);
        assert_eq!(parse_cpu_nanos("bogus"), None);
    }
}
