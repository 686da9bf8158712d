//! Repository traits and implementations.

pub mod application;
pub mod deployment;
pub mod node;

pub use application::{ApplicationRepo, PgApplicationRepo};
pub use deployment::{DeploymentRepo, PgDeploymentRepo};
pub use node::{NodeRepo, PgNodeRepo};
