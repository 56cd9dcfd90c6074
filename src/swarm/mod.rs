//! Docker Swarm observation.
//!
//! The operator never mutates the swarm; it only needs the read-side of the
//! Engine API, captured by the [`SwarmApi`] trait. [`DockerApi`] is the HTTP
//! implementation; tests substitute in-memory fakes.

mod client;
mod models;

pub use client::DockerApi;
pub use models::{Network, Node, Service, ServiceMode, Task};

use async_trait::async_trait;

use crate::error::Result;

/// Read-only access to the pieces of the orchestrator state the operator
/// observes: one service, its tasks, the node inventory, and the overlay
/// network the members live on.
#[async_trait]
pub trait SwarmApi: Send + Sync {
    /// Resolve a service by exact name. Errors if absent or ambiguous.
    async fn service(&self, name: &str) -> Result<Service>;

    /// All tasks of a service, regardless of state.
    async fn service_tasks(&self, service_id: &str) -> Result<Vec<Task>>;

    /// All swarm nodes with availability and status.
    async fn nodes(&self) -> Result<Vec<Node>>;

    /// Inspect an overlay network (IPAM/subnet information).
    async fn network(&self, name: &str) -> Result<Network>;
}
