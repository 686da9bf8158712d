//! Node: a remote host target for deploys, brought online by the
//! provisioner (C7) and kept alive by the health monitor (C9).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::ResourceId;

/// Lifecycle status of a [`Node`], driven by the provision/heartbeat state
/// machine (§4.7, §4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Pending,
    Provisioning,
    Online,
    Error,
    Offline,
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NodeStatus::Pending => "pending",
            NodeStatus::Provisioning => "provisioning",
            NodeStatus::Online => "online",
            NodeStatus::Error => "error",
            NodeStatus::Offline => "offline",
        };
        write!(f, "{s}")
    }
}

/// An authenticated-encryption blob: ciphertext plus the nonce it was sealed
/// with. Never implements `Display`; `Debug` is redacted so a node can be
/// logged safely in full.
#[derive(Clone, Serialize, Deserialize)]
pub struct EncryptedBlob {
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

impl std::fmt::Debug for EncryptedBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedBlob")
            .field("nonce_len", &self.nonce.len())
            .field("ciphertext_len", &self.ciphertext.len())
            .finish()
    }
}

/// SSH credentials for a node, stored encrypted at rest. At least one of
/// `private_key` / `password` is present; key takes priority on dial
/// (C2).
#[derive(Clone, Serialize, Deserialize)]
pub struct NodeCredentials {
    pub private_key: Option<EncryptedBlob>,
    pub password: Option<EncryptedBlob>,
}

impl std::fmt::Debug for NodeCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeCredentials")
            .field("has_private_key", &self.private_key.is_some())
            .field("has_password", &self.password.is_some())
            .finish()
    }
}

/// A remote host provisioned to run applications for its owner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: ResourceId,
    pub owner_id: ResourceId,
    pub name: String,
    pub host: String,
    pub ssh_port: u16,
    pub ssh_user: String,
    pub credentials: NodeCredentials,
    pub acme_email: Option<String>,
    pub status: NodeStatus,
    /// Host-key fingerprint pinned on first contact (TOFU); `None` until the
    /// provisioner's `ssh_connect` step has dialed at least once.
    pub host_key_fingerprint: Option<String>,
    pub agent_version: Option<String>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Node {
    pub fn is_online(&self) -> bool {
        matches!(self.status, NodeStatus::Online)
    }
}
