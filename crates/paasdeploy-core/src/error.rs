//! Sentinel error taxonomy shared by every layer of the control plane.
//!
//! Failures are classified by cause, not by subsystem: a repository, an SSH
//! session, and an agent RPC call all fail into the same set of kinds so that
//! adapters (HTTP, CLI) map exactly one taxonomy onto their surface instead of
//! each handler inventing its own status mapping.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("deploy already in progress: {0}")]
    DeployInProgress(String),

    #[error("no deploy available")]
    NoDeployAvailable,

    #[error("queue full: {0}")]
    QueueFull(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("cancelled")]
    Cancelled,

    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl Error {
    /// Short machine-stable tag for this error's kind, used in log fields and
    /// HTTP error bodies without leaking the human-readable message shape.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "not_found",
            Error::AlreadyExists(_) => "already_exists",
            Error::InvalidInput(_) => "invalid_input",
            Error::Forbidden(_) => "forbidden",
            Error::DeployInProgress(_) => "deploy_in_progress",
            Error::NoDeployAvailable => "no_deploy_available",
            Error::QueueFull(_) => "queue_full",
            Error::Timeout(_) => "timeout",
            Error::Cancelled => "cancelled",
            Error::Unavailable(_) => "unavailable",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
