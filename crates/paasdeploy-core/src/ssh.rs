//! C2 — SSH Session: dial/authenticate to a remote host, run commands,
//! upload files. Implemented against `russh` in `paasdeploy-ssh`; this trait
//! is the seam so the provisioner and remote-deploy delegation can be unit
//! tested against a mock session.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;
use crate::executor::LogLine;

/// Host-key verification policy. MVP accepts any host key on first contact
/// and pins the fingerprint on the node record (trust-on-first-use);
/// `Strict` requires a match against an already-pinned fingerprint.
#[derive(Debug, Clone)]
pub enum HostKeyPolicy {
    TrustOnFirstUse { pinned_fingerprint: Option<String> },
    Strict { pinned_fingerprint: String },
}

#[derive(Debug, Clone)]
pub enum SshAuth {
    PrivateKey { pem: Vec<u8>, passphrase: Option<String> },
    Password { password: String },
}

#[derive(Debug, Clone)]
pub struct SshDialOptions {
    pub host: String,
    pub port: u16,
    pub user: String,
    /// Tried in order; key before password per C2.
    pub auth: Vec<SshAuth>,
    pub host_key_policy: HostKeyPolicy,
    pub dial_timeout: Duration,
}

impl Default for SshDialOptions {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 22,
            user: String::new(),
            auth: Vec::new(),
            host_key_policy: HostKeyPolicy::TrustOnFirstUse {
                pinned_fingerprint: None,
            },
            dial_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: i32,
    pub output: String,
}

/// An authenticated connection to a single remote host. `close` is
/// idempotent and must release the underlying resource before returning.
#[async_trait]
pub trait SshSession: Send + Sync {
    /// The host-key fingerprint observed/pinned for this connection.
    fn host_key_fingerprint(&self) -> &str;

    async fn run(&self, cmd: &[&str], timeout: Duration) -> Result<CommandResult>;

    async fn run_streamed(
        &self,
        cmd: &[&str],
        timeout: Duration,
        sink: tokio::sync::mpsc::Sender<LogLine>,
    ) -> Result<CommandResult>;

    /// Write-temp-then-rename atomic upload of `data` to `remote_path` with
    /// the given POSIX file mode.
    async fn upload(&self, data: &[u8], remote_path: &str, mode: u32) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Factory seam so the provisioner and worker depend on "dial a session",
/// not on a concrete `russh` client, keeping them mockable.
#[async_trait]
pub trait SshDialer: Send + Sync {
    async fn dial(&self, opts: &SshDialOptions) -> Result<Box<dyn SshSession>>;
}
