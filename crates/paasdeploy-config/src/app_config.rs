//! `paasdeploy.json` parsing (§6): the repo-relative config file
//! C5's CONFIG phase reads and merges with defaults.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::{ConfigError, ConfigResult};

fn default_port() -> u16 {
    8080
}

fn default_healthcheck_path() -> String {
    "/health".to_string()
}

fn default_interval() -> String {
    "10s".to_string()
}

fn default_timeout() -> String {
    "2s".to_string()
}

fn default_retries() -> u32 {
    3
}

fn default_start_period() -> String {
    "10s".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BuildSpec {
    Dockerfile {
        #[serde(default = "default_dockerfile")]
        dockerfile: String,
        #[serde(default = "default_context")]
        context: String,
        #[serde(default)]
        args: HashMap<String, String>,
        target: Option<String>,
    },
    Buildpack {
        #[serde(default = "default_context")]
        context: String,
        #[serde(default)]
        args: HashMap<String, String>,
    },
}

fn default_dockerfile() -> String {
    "Dockerfile".to_string()
}

fn default_context() -> String {
    ".".to_string()
}

impl Default for BuildSpec {
    fn default() -> Self {
        BuildSpec::Dockerfile {
            dockerfile: default_dockerfile(),
            context: default_context(),
            args: HashMap::new(),
            target: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthcheckSpec {
    #[serde(default = "default_healthcheck_path")]
    pub path: String,
    #[serde(default = "default_interval")]
    pub interval: String,
    #[serde(default = "default_timeout")]
    pub timeout: String,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_start_period")]
    pub start_period: String,
}

impl Default for HealthcheckSpec {
    fn default() -> Self {
        Self {
            path: default_healthcheck_path(),
            interval: default_interval(),
            timeout: default_timeout(),
            retries: default_retries(),
            start_period: default_start_period(),
        }
    }
}

impl HealthcheckSpec {
    pub fn interval_duration(&self) -> ConfigResult<Duration> {
        parse_duration(&self.interval)
    }

    pub fn timeout_duration(&self) -> ConfigResult<Duration> {
        parse_duration(&self.timeout)
    }

    pub fn start_period_duration(&self) -> ConfigResult<Duration> {
        parse_duration(&self.start_period)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ResourceLimits {
    pub memory: Option<String>,
    pub cpu: Option<String>,
}

/// The parsed, defaulted form of `paasdeploy.json` (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    pub name: String,
    #[serde(default)]
    pub build: BuildSpec,
    #[serde(default)]
    pub healthcheck: HealthcheckSpec,
    #[serde(default = "default_port")]
    pub port: u16,
    pub host_port: Option<u16>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub resources: ResourceLimits,
    #[serde(default)]
    pub domains: Vec<String>,
}

impl AppConfig {
    /// Parse `paasdeploy.json`, applying the defaults named in §6
    /// (port=8080, hostPort=port, healthcheck path=/health).
    pub fn parse(text: &str) -> ConfigResult<Self> {
        let mut cfg: AppConfig = serde_json::from_str(text)?;
        if cfg.name.trim().is_empty() {
            return Err(ConfigError::MissingField("name".to_string()));
        }
        if cfg.host_port.is_none() {
            cfg.host_port = Some(cfg.port);
        }
        Ok(cfg)
    }

    pub fn effective_host_port(&self) -> u16 {
        self.host_port.unwrap_or(self.port)
    }
}

/// Parses a small subset of Go-style duration strings (`"10s"`, `"500ms"`,
/// `"2m"`) used by the healthcheck fields; no fractional units.
pub fn parse_duration(s: &str) -> ConfigResult<Duration> {
    let s = s.trim();
    let split_at = s
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| ConfigError::InvalidDuration(s.to_string()))?;
    let (num, unit) = s.split_at(split_at);
    let value: u64 = num
        .parse()
        .map_err(|_| ConfigError::InvalidDuration(s.to_string()))?;
    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        _ => Err(ConfigError::InvalidDuration(s.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_port_and_host_port_and_healthcheck() {
        let cfg = AppConfig::parse(r#"{"name": "hello"}"#).unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.effective_host_port(), 8080);
        assert_eq!(cfg.healthcheck.path, "/health");
        assert_eq!(cfg.healthcheck.retries, 3);
    }

    #[test]
    fn host_port_defaults_to_port_when_absent() {
        let cfg = AppConfig::parse(r#"{"name": "hello", "port": 3000}"#).unwrap();
        assert_eq!(cfg.effective_host_port(), 3000);
    }

    #[test]
    fn explicit_host_port_overrides_default() {
        let cfg =
            AppConfig::parse(r#"{"name": "hello", "port": 3000, "hostPort": 443}"#).unwrap();
        assert_eq!(cfg.effective_host_port(), 443);
    }

    #[test]
    fn missing_name_is_fatal() {
        assert!(AppConfig::parse(r#"{"port": 3000}"#).is_err());
    }

    #[test]
    fn parses_dockerfile_build_args_and_domains() {
        let cfg = AppConfig::parse(
            r#"{
                "name": "api",
                "build": {"type": "dockerfile", "dockerfile": "Dockerfile.prod", "args": {"FOO": "bar"}},
                "domains": ["api.example.com"]
            }"#,
        )
        .unwrap();
        match cfg.build {
            BuildSpec::Dockerfile { dockerfile, args, .. } => {
                assert_eq!(dockerfile, "Dockerfile.prod");
                assert_eq!(args.get("FOO"), Some(&"bar".to_string()));
            }
            other => panic!("expected Dockerfile build spec, got {other:?}"),
        }
        assert_eq!(cfg.domains, vec!["api.example.com".to_string()]);
    }

    #[test]
    fn duration_parsing() {
        assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert!(parse_duration("10x").is_err());
    }
}
