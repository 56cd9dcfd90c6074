//! mongoswarm - a MongoDB replica set operator for Docker Swarm.
//!
//! The operator runs as a singleton service next to a MongoDB swarm service
//! and keeps the replica set configuration converged onto the service's
//! live task membership: it initiates fresh deployments, rewrites the
//! config when overlay IPs change, grows and shrinks the member list as
//! the service scales, and seeds the initial accounts exactly once.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Supervisor loop                        │
//! ├──────────────────────────────────────────────────────────────┤
//! │ observe (swarm) → probe (mongo) → classify → plan → apply    │
//! │        │               │             │          │            │
//! │  TopologyObserver  ClusterProber  classifier  planner        │
//! │        │               │                        │            │
//! │    SwarmApi        MongoAdmin              Actuator ──► rs.* │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every cycle is recomputed from scratch against two sources of truth:
//! the orchestrator's task list (what should exist) and each node's local
//! replica set view (what does exist). The external seams - [`swarm::SwarmApi`]
//! and [`mongo::MongoAdmin`] - are traits, so the whole engine runs against
//! in-memory fakes in tests.

pub mod actuator;
pub mod bootstrap;
pub mod classifier;
pub mod config;
pub mod error;
pub mod mongo;
pub mod observer;
pub mod planner;
pub mod prober;
pub mod retry;
pub mod shutdown;
pub mod supervisor;
pub mod swarm;
pub mod types;

pub use error::{OperatorError, Result};
pub use supervisor::Supervisor;
