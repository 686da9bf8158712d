//! HTTP adapter for the paasdeploy control plane: REST CRUD over
//! applications/deployments/nodes plus the SSE event stream.

pub mod error;
pub mod owner;
pub mod routes;
pub mod state;

pub use state::AppState;
