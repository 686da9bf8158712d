//! Configuration for the paasdeploy control plane.
//!
//! This crate handles:
//! - `paasdeploy.json` parsing and defaulting (§6)
//! - Process-level `SystemConfig`, loaded from the environment at startup
//! - Variable interpolation for per-deploy environment values

pub mod app_config;
pub mod error;
pub mod system;
pub mod variables;

pub use app_config::AppConfig;
pub use error::{ConfigError, ConfigResult};
pub use system::SystemConfig;
pub use variables::DeployContext;
