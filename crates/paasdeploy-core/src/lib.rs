//! Core domain types and trait seams for the paasdeploy control plane.
//!
//! This crate contains:
//! - Resource identifiers and the sentinel error taxonomy (C10)
//! - Application, Deployment, Node domain records (§3)
//! - Event types published through the event bus (C8)
//! - Trait seams implemented by the other crates: `CommandExecutor` (C1),
//!   `SshSession`/`SshDialer` (C2), `AgentClient` (C3), `DeployQueue` (C4),
//!   `EventBus` (C8), `Provisioner` (C7)

pub mod agent;
pub mod application;
pub mod crypto;
pub mod deployment;
pub mod error;
pub mod event;
pub mod eventbus;
pub mod executor;
pub mod id;
pub mod node;
pub mod provisioner;
pub mod queue;
pub mod ssh;

pub use error::{Error, Result};
pub use id::ResourceId;
