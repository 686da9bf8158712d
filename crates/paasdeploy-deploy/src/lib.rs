//! Deploy worker and dispatcher: the clone-build-release-health pipeline and
//! the fixed-size worker pool that runs it against claimed deployments.

pub mod engine;
pub mod worker;

pub use engine::{DeployEngine, EngineConfig, EngineHandle};
pub use worker::DeployWorker;
