//! Execution backends for the deploy worker (C5).
//!
//! - `local` — C1's `CommandExecutor`, local OS processes via explicit argv.
//! - `container` — image build and container release/health for the BUILD,
//!   RELEASE and HEALTH phases of the local-mode deploy pipeline.

pub mod container;
pub mod local;

pub use container::{ContainerRuntime, HealthProbeOutcome, ReleaseSpec};
pub use local::LocalExecutor;
