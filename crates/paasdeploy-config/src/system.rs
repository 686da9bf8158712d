//! Process-level configuration (§6): the CLI/environment
//! variables consumed by the core, loaded once into a `SystemConfig` at
//! startup.

use std::path::PathBuf;
use std::time::Duration;

use crate::{ConfigError, ConfigResult};

/// Typed, defaulted view over the environment variables named in §6.
#[derive(Debug, Clone)]
pub struct SystemConfig {
    pub queue_poll_min_interval: Duration,
    pub queue_poll_max_interval: Duration,
    pub worker_count: usize,
    pub heartbeat_interval: Duration,
    pub agent_call_timeout: Duration,
    pub deploy_ring_size: usize,
    pub data_root: PathBuf,
    /// Raw base64; decoded by the crate that derives the symmetric key
    /// (`paasdeploy-db`'s credential/CA encryption), kept opaque here so this
    /// config type never itself touches key material.
    pub ca_master_key_b64: String,
    /// Back-pressure cap on pending deploys per application (§4.6); not an
    /// env var in the own list but named inline in the back-pressure
    /// contract, so it is given a typed default here rather than sprinkled
    /// as a magic number through the dispatcher.
    pub max_pending_per_app: usize,
}

impl SystemConfig {
    /// Load from the process environment, applying §6's defaults for
    /// anything unset. Fails only if `DATA_ROOT`/`CA_MASTER_KEY` are unset or
    /// a numeric/duration variable is present but unparseable.
    pub fn from_env() -> ConfigResult<Self> {
        Ok(Self {
            queue_poll_min_interval: env_duration_ms("QUEUE_POLL_MIN_INTERVAL", 100)?,
            queue_poll_max_interval: env_duration_ms("QUEUE_POLL_MAX_INTERVAL", 2_000)?,
            worker_count: env_usize("WORKER_COUNT", 4)?,
            heartbeat_interval: env_duration_secs("HEARTBEAT_INTERVAL", 15)?,
            agent_call_timeout: env_duration_secs("AGENT_CALL_TIMEOUT", 5)?,
            deploy_ring_size: env_usize("DEPLOY_RING_SIZE", 100)?,
            data_root: PathBuf::from(
                std::env::var("DATA_ROOT")
                    .map_err(|_| ConfigError::MissingField("DATA_ROOT".to_string()))?,
            ),
            ca_master_key_b64: std::env::var("CA_MASTER_KEY")
                .map_err(|_| ConfigError::MissingField("CA_MASTER_KEY".to_string()))?,
            max_pending_per_app: env_usize("MAX_PENDING_PER_APP", 3)?,
        })
    }
}

fn env_usize(name: &str, default: usize) -> ConfigResult<usize> {
    match std::env::var(name) {
        Ok(v) => v.parse().map_err(|_| ConfigError::InvalidValue {
            field: name.to_string(),
            message: format!("{v:?} is not a valid integer"),
        }),
        Err(_) => Ok(default),
    }
}

fn env_duration_ms(name: &str, default_ms: u64) -> ConfigResult<Duration> {
    match std::env::var(name) {
        Ok(v) => v
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| ConfigError::InvalidValue {
                field: name.to_string(),
                message: format!("{v:?} is not a valid millisecond count"),
            }),
        Err(_) => Ok(Duration::from_millis(default_ms)),
    }
}

fn env_duration_secs(name: &str, default_secs: u64) -> ConfigResult<Duration> {
    match std::env::var(name) {
        Ok(v) => v
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| ConfigError::InvalidValue {
                field: name.to_string(),
                message: format!("{v:?} is not a valid second count"),
            }),
        Err(_) => Ok(Duration::from_secs(default_secs)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_variable_falls_back_to_default() {
        assert_eq!(env_usize("PAASDEPLOY_TEST_UNSET_VAR", 4).unwrap(), 4);
        assert_eq!(
            env_duration_secs("PAASDEPLOY_TEST_UNSET_VAR", 15).unwrap(),
            Duration::from_secs(15)
        );
    }
}
