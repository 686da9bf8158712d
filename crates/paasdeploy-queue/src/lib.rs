//! C4 — Deploy Queue implementations: a Postgres `SKIP LOCKED` backend for
//! production, and an in-memory backend satisfying the same
//! `paasdeploy_core::queue::DeployQueue` trait for unit tests — proving the
//! contract never leaks its backing store (§9).

pub mod memory;
pub mod postgres;

pub use memory::InMemoryDeployQueue;
pub use postgres::PgDeployQueue;
