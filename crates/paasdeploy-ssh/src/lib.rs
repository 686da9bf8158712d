//! C2 — SSH Session implementation, built on `russh`'s async client API.
//!
//! The trait seam (`SshSession`/`SshDialer`) lives in `paasdeploy-core::ssh`;
//! this crate is the only place that links against `russh`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use paasdeploy_core::error::{Error, Result};
use paasdeploy_core::executor::{LogLine, LogStream};
use paasdeploy_core::ssh::{CommandResult, HostKeyPolicy, SshAuth, SshDialOptions, SshDialer, SshSession};
use russh::client::{Config, Handle, Msg};
use russh::keys::{PrivateKeyWithHashAlg, decode_secret_key};
use russh::{Channel, ChannelMsg};
use sha2::{Digest, Sha256};
use tokio::sync::mpsc::Sender;
use tracing::{info, warn};

/// `russh::client::Handler` that implements the trust-on-first-use host-key
/// policy: the first fingerprint seen is accepted and reported back to the
/// caller (who pins it on the `Node` record); a `Strict` policy compares
/// against an already-pinned fingerprint and refuses any mismatch.
struct TofuHandler {
    policy: HostKeyPolicy,
    observed_fingerprint: Arc<std::sync::Mutex<Option<String>>>,
}

fn fingerprint(key: &russh::keys::PublicKey) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.to_bytes());
    format!("SHA256:{}", BASE64.encode(hasher.finalize()))
}

impl russh::client::Handler for TofuHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        let seen = fingerprint(server_public_key);
        *self.observed_fingerprint.lock().unwrap() = Some(seen.clone());

        match &self.policy {
            HostKeyPolicy::TrustOnFirstUse { pinned_fingerprint } => match pinned_fingerprint {
                None => {
                    info!(fingerprint = %seen, "pinning host key on first contact (TOFU)");
                    Ok(true)
                }
                Some(pinned) => Ok(pinned == &seen),
            },
            HostKeyPolicy::Strict { pinned_fingerprint } => {
                if pinned_fingerprint != &seen {
                    warn!(expected = %pinned_fingerprint, got = %seen, "host key mismatch under strict policy");
                }
                Ok(pinned_fingerprint == &seen)
            }
        }
    }
}

/// An authenticated `russh` session. Every `Run`/`Upload` call opens its own
/// channel on the shared connection; `close` tears down the connection
/// itself and is safe to call more than once.
pub struct RusshSession {
    handle: tokio::sync::Mutex<Option<Handle<TofuHandler>>>,
    fingerprint: String,
    privileged_prefix: Option<Vec<String>>,
}

impl RusshSession {
    async fn open_channel(&self) -> Result<Channel<Msg>> {
        let guard = self.handle.lock().await;
        let handle = guard
            .as_ref()
            .ok_or_else(|| Error::Unavailable("ssh session is closed".to_string()))?;
        handle
            .channel_open_session()
            .await
            .map_err(|e| Error::Unavailable(format!("ssh channel open: {e}")))
    }

    fn full_argv<'a>(&'a self, cmd: &'a [&'a str]) -> Vec<&'a str> {
        match &self.privileged_prefix {
            Some(prefix) if requires_privilege(cmd) => prefix
                .iter()
                .map(String::as_str)
                .chain(cmd.iter().copied())
                .collect(),
            _ => cmd.to_vec(),
        }
    }
}

/// Steps that the provisioner marks as privilege-requiring; everything else
/// runs as the dialed user. Kept narrow and explicit rather than escalating
/// by default (C2 privilege-escalation contract).
fn requires_privilege(cmd: &[&str]) -> bool {
    matches!(cmd.first().copied(), Some("apt-get") | Some("systemctl") | Some("sh") if cmd.len() > 1)
}

/// Quotes a single argv element for transmission as part of a remote command
/// line. SSH exec channels take one command string; this is the *only* place
/// in the codebase argv elements are joined into a string, and it happens at
/// the transport boundary, never at the call site (§9).
fn quote_arg(arg: &str) -> String {
    if arg.chars().all(|c| c.is_ascii_alphanumeric() || "-_./:=@".contains(c)) {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', "'\\''"))
    }
}

fn join_argv(argv: &[&str]) -> String {
    argv.iter().map(|a| quote_arg(a)).collect::<Vec<_>>().join(" ")
}

#[async_trait]
impl SshSession for RusshSession {
    fn host_key_fingerprint(&self) -> &str {
        &self.fingerprint
    }

    async fn run(&self, cmd: &[&str], timeout: Duration) -> Result<CommandResult> {
        let argv = self.full_argv(cmd);
        let command_line = join_argv(&argv);
        let mut channel = self.open_channel().await?;

        channel
            .exec(true, command_line.as_bytes())
            .await
            .map_err(|e| Error::Unavailable(format!("ssh exec: {e}")))?;

        let mut output = Vec::new();
        let mut exit_code = -1i32;

        let result = tokio::time::timeout(timeout, async {
            loop {
                match channel.wait().await {
                    Some(ChannelMsg::Data { data }) | Some(ChannelMsg::ExtendedData { data, .. }) => {
                        output.extend_from_slice(&data);
                    }
                    Some(ChannelMsg::ExitStatus { exit_status }) => {
                        exit_code = exit_status as i32;
                    }
                    Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => break,
                    _ => {}
                }
            }
        })
        .await;

        if result.is_err() {
            return Err(Error::Timeout(format!("ssh command timed out: {command_line}")));
        }

        Ok(CommandResult {
            exit_code,
            output: String::from_utf8_lossy(&output).to_string(),
        })
    }

    async fn run_streamed(
        &self,
        cmd: &[&str],
        timeout: Duration,
        sink: Sender<LogLine>,
    ) -> Result<CommandResult> {
        let argv = self.full_argv(cmd);
        let command_line = join_argv(&argv);
        let mut channel = self.open_channel().await?;

        channel
            .exec(true, command_line.as_bytes())
            .await
            .map_err(|e| Error::Unavailable(format!("ssh exec: {e}")))?;

        let mut exit_code = -1i32;
        let mut tail = Vec::new();

        let result = tokio::time::timeout(timeout, async {
            loop {
                match channel.wait().await {
                    Some(ChannelMsg::Data { data }) => {
                        let line = String::from_utf8_lossy(&data).to_string();
                        tail.extend_from_slice(&data);
                        let _ = sink.send(LogLine { stream: LogStream::Stdout, text: line }).await;
                    }
                    Some(ChannelMsg::ExtendedData { data, .. }) => {
                        let line = String::from_utf8_lossy(&data).to_string();
                        let _ = sink.send(LogLine { stream: LogStream::Stderr, text: line }).await;
                    }
                    Some(ChannelMsg::ExitStatus { exit_status }) => {
                        exit_code = exit_status as i32;
                    }
                    Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => break,
                    _ => {}
                }
            }
        })
        .await;

        if result.is_err() {
            return Err(Error::Timeout(format!("ssh command timed out: {command_line}")));
        }

        Ok(CommandResult {
            exit_code,
            output: String::from_utf8_lossy(&tail).to_string(),
        })
    }

    async fn upload(&self, data: &[u8], remote_path: &str, mode: u32) -> Result<()> {
        let channel = self.open_channel().await?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| Error::Unavailable(format!("sftp subsystem: {e}")))?;

        let sftp = russh_sftp::client::SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| Error::Unavailable(format!("sftp handshake: {e}")))?;

        let tmp_path = format!("{remote_path}.tmp-{}", uuid::Uuid::now_v7());

        {
            use russh_sftp::protocol::OpenFlags;
            use tokio::io::AsyncWriteExt;

            let mut file = sftp
                .open_with_flags(
                    &tmp_path,
                    OpenFlags::CREATE | OpenFlags::TRUNCATE | OpenFlags::WRITE,
                )
                .await
                .map_err(|e| Error::Unavailable(format!("sftp open {tmp_path}: {e}")))?;
            file.write_all(data)
                .await
                .map_err(|e| Error::Unavailable(format!("sftp write {tmp_path}: {e}")))?;
            file.flush()
                .await
                .map_err(|e| Error::Unavailable(format!("sftp flush {tmp_path}: {e}")))?;
            file.shutdown()
                .await
                .map_err(|e| Error::Unavailable(format!("sftp close {tmp_path}: {e}")))?;
        }

        sftp.set_metadata(
            &tmp_path,
            russh_sftp::protocol::FileAttributes {
                permissions: Some(mode),
                ..Default::default()
            },
        )
        .await
        .map_err(|e| Error::Unavailable(format!("sftp chmod {tmp_path}: {e}")))?;

        sftp.rename(&tmp_path, remote_path)
            .await
            .map_err(|e| Error::Unavailable(format!("sftp rename {tmp_path} -> {remote_path}: {e}")))?;

        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut guard = self.handle.lock().await;
        if let Some(handle) = guard.take() {
            let _ = handle
                .disconnect(russh::Disconnect::ByApplication, "", "")
                .await;
        }
        Ok(())
    }
}

/// Dials real `russh` connections. One instance is shared across the
/// provisioner and any remote-mode deploy delegation.
#[derive(Default)]
pub struct RusshDialer {
    /// Non-interactive privilege-escalation prefix used when the dialed user
    /// is non-root and a step requires it (e.g. `["sudo", "-n"]`). `None`
    /// means the user is assumed to already have the privilege it needs.
    pub privileged_prefix: Option<Vec<String>>,
}

impl RusshDialer {
    pub fn new() -> Self {
        Self { privileged_prefix: None }
    }

    pub fn with_privileged_prefix(prefix: Vec<String>) -> Self {
        Self { privileged_prefix: Some(prefix) }
    }
}

#[async_trait]
impl SshDialer for RusshDialer {
    async fn dial(&self, opts: &SshDialOptions) -> Result<Box<dyn SshSession>> {
        let observed_fingerprint = Arc::new(std::sync::Mutex::new(None));
        let handler = TofuHandler {
            policy: opts.host_key_policy.clone(),
            observed_fingerprint: observed_fingerprint.clone(),
        };

        let config = Arc::new(Config {
            inactivity_timeout: Some(opts.dial_timeout),
            ..Default::default()
        });

        let addr = (opts.host.as_str(), opts.port);
        let mut handle = tokio::time::timeout(opts.dial_timeout, russh::client::connect(config, addr, handler))
            .await
            .map_err(|_| Error::Timeout(format!("ssh dial {}:{} timed out", opts.host, opts.port)))?
            .map_err(|e| Error::Unavailable(format!("ssh dial {}:{}: {e}", opts.host, opts.port)))?;

        let mut authenticated = false;
        let mut last_err = None;
        for auth in &opts.auth {
            let outcome = match auth {
                SshAuth::PrivateKey { pem, passphrase } => {
                    match decode_secret_key(
                        std::str::from_utf8(pem).unwrap_or_default(),
                        passphrase.as_deref(),
                    ) {
                        Ok(key) => {
                            let key = Arc::new(key);
                            handle
                                .authenticate_publickey(
                                    &opts.user,
                                    PrivateKeyWithHashAlg::new(key, None),
                                )
                                .await
                        }
                        Err(e) => {
                            last_err = Some(format!("decode private key: {e}"));
                            continue;
                        }
                    }
                }
                SshAuth::Password { password } => {
                    handle.authenticate_password(&opts.user, password).await
                }
            };

            match outcome {
                Ok(result) if result.success() => {
                    authenticated = true;
                    break;
                }
                Ok(_) => last_err = Some("rejected".to_string()),
                Err(e) => last_err = Some(e.to_string()),
            }
        }

        if !authenticated {
            return Err(Error::Unavailable(format!(
                "ssh auth to {}@{} failed: {}",
                opts.user,
                opts.host,
                last_err.unwrap_or_else(|| "no auth methods configured".to_string())
            )));
        }

        let fingerprint = observed_fingerprint
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_default();

        Ok(Box::new(RusshSession {
            handle: tokio::sync::Mutex::new(Some(handle)),
            fingerprint,
            privileged_prefix: self.privileged_prefix.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoting_passes_simple_args_through() {
        assert_eq!(quote_arg("docker"), "docker");
        assert_eq!(quote_arg("/usr/bin/docker"), "/usr/bin/docker");
    }

    #[test]
    fn quoting_escapes_shell_metacharacters() {
        assert_eq!(quote_arg("a b"), "'a b'");
        assert_eq!(quote_arg("it's"), "'it'\\''s'");
    }

    #[test]
    fn join_argv_quotes_each_element_independently() {
        assert_eq!(join_argv(&["echo", "hello world"]), "echo 'hello world'");
    }

    #[test]
    fn privileged_prefix_is_prepended_only_for_matching_commands() {
        let session = RusshSession {
            handle: tokio::sync::Mutex::new(None),
            fingerprint: String::new(),
            privileged_prefix: Some(vec!["sudo".to_string(), "-n".to_string()]),
        };
        assert_eq!(session.full_argv(&["systemctl", "start", "docker"]), vec!["sudo", "-n", "systemctl", "start", "docker"]);
        assert_eq!(session.full_argv(&["echo", "hi"]), vec!["echo", "hi"]);
    }

    #[tokio::test]
    async fn integration_dial_is_ignored_without_a_live_host() {
        // Exercises nothing beyond compilation without network access; a
        // real target is required to dial against. See
        // `paasdeploy-provisioner`'s `#[ignore]` integration tests for the
        // live-target-dependent coverage.
    }
}
