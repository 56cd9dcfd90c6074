//! Core type definitions for the mongoswarm operator.
//!
//! This module contains the data model shared by every stage of a
//! reconciliation cycle:
//!
//! - [`NodeEndpoint`]: identity of one MongoDB instance (`ip:port`)
//! - [`ExpectedMemberSet`]: what the orchestrator says should exist
//! - [`ObservedNodeView`]: what one probe actually saw
//! - [`ReplicaSetConfig`] / [`MemberSpec`]: the document submitted to MongoDB
//! - [`ClusterState`]: the classifier's verdict
//! - [`Plan`] / [`PlanAction`]: what the actuator is asked to do
//!
//! Member sets are kept in `BTreeSet`/`BTreeMap` so every stage iterates in
//! a deterministic (IP-sorted) order.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::error::OperatorError;

// ============================================================================
// Endpoints and membership
// ============================================================================

/// Identity of a single MongoDB instance on the overlay network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeEndpoint {
    /// Overlay-network address of the task.
    pub ip: Ipv4Addr,
    /// MongoDB port, fixed per deployment.
    pub port: u16,
}

impl NodeEndpoint {
    pub fn new(ip: Ipv4Addr, port: u16) -> Self {
        Self { ip, port }
    }

    /// The `host` string MongoDB uses for this member.
    pub fn host(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

impl fmt::Display for NodeEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

impl FromStr for NodeEndpoint {
    type Err = OperatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ip, port) = s
            .split_once(':')
            .ok_or_else(|| OperatorError::Internal(format!("invalid endpoint: {s}")))?;
        let ip = ip
            .parse::<Ipv4Addr>()
            .map_err(|e| OperatorError::Internal(format!("invalid endpoint ip {ip}: {e}")))?;
        let port = port
            .parse::<u16>()
            .map_err(|e| OperatorError::Internal(format!("invalid endpoint port {port}: {e}")))?;
        Ok(Self { ip, port })
    }
}

/// The orchestrator's view of what the replica set should contain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpectedMemberSet {
    /// Endpoints of running, network-attached MongoDB tasks.
    pub members: BTreeSet<NodeEndpoint>,
    /// How many tasks the service should have once fully scheduled.
    pub expected_count: u32,
    /// Tasks still expected to appear (`expected_count - |members|`, floored).
    pub pending_count: u32,
}

impl ExpectedMemberSet {
    /// Member hosts as the `ip:port` strings MongoDB configs use.
    pub fn hosts(&self) -> BTreeSet<String> {
        self.members.iter().map(NodeEndpoint::host).collect()
    }

    /// True once every scheduled task is up and visible.
    pub fn is_complete(&self) -> bool {
        self.pending_count == 0
    }
}

// ============================================================================
// Observations
// ============================================================================

/// Probe classification for one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Server is up and has no replica set configuration.
    Uninitialized,
    /// Server is a member of a replica set and returned its config.
    Member,
    /// Server responded but is still starting or mid-transition.
    Transient,
    /// Connection or timeout failure.
    Unreachable,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeState::Uninitialized => "uninitialized",
            NodeState::Member => "member",
            NodeState::Transient => "transient",
            NodeState::Unreachable => "unreachable",
        };
        f.write_str(s)
    }
}

/// Everything one probe learned about one endpoint.
#[derive(Debug, Clone)]
pub struct ObservedNodeView {
    pub endpoint: NodeEndpoint,
    pub state: NodeState,
    /// Replica set name the node reports, if any.
    pub rs_name: Option<String>,
    /// `host` strings in the node's local copy of the config.
    pub configured_members: BTreeSet<String>,
    /// True when `hello` reported `isWritablePrimary`.
    pub is_primary: bool,
    /// Version of the node's local config, when it has one.
    pub config_version: Option<u64>,
    /// The node's full local config; the planner needs member ids.
    pub config: Option<ReplicaSetConfig>,
    /// Last probe error, for logging only.
    pub error: Option<String>,
}

impl ObservedNodeView {
    /// A view for a node the prober could not reach or classify further.
    pub fn unreachable(endpoint: NodeEndpoint, error: impl Into<String>) -> Self {
        Self {
            endpoint,
            state: NodeState::Unreachable,
            rs_name: None,
            configured_members: BTreeSet::new(),
            is_primary: false,
            config_version: None,
            config: None,
            error: Some(error.into()),
        }
    }
}

/// Observation map produced by one probe pass, keyed by endpoint.
pub type Observations = BTreeMap<NodeEndpoint, ObservedNodeView>;

// ============================================================================
// Replica set configuration
// ============================================================================

/// One member entry of a replica set configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberSpec {
    /// Member `_id`; unique, non-negative, never reused within a session.
    pub id: u32,
    /// `ip:port` the member is reachable on.
    pub host: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub votes: Option<i32>,
}

impl MemberSpec {
    pub fn new(id: u32, host: impl Into<String>) -> Self {
        Self {
            id,
            host: host.into(),
            priority: None,
            votes: None,
        }
    }

    /// IP portion of the member host.
    pub fn ip(&self) -> Option<Ipv4Addr> {
        self.host.split(':').next()?.parse().ok()
    }
}

/// The replica set configuration document the operator submits and reads back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicaSetConfig {
    /// Replica set name (`_id` in the wire document).
    pub name: String,
    /// Version; strictly increases on every applied reconfiguration.
    pub version: u64,
    /// Member list, unique by both `id` and `host`.
    pub members: Vec<MemberSpec>,
}

impl ReplicaSetConfig {
    /// Member hosts as a set.
    pub fn hosts(&self) -> BTreeSet<String> {
        self.members.iter().map(|m| m.host.clone()).collect()
    }

    /// Member ids currently in use.
    pub fn ids(&self) -> BTreeSet<u32> {
        self.members.iter().map(|m| m.id).collect()
    }
}

// ============================================================================
// Classification and planning
// ============================================================================

/// The classifier's reduction of one cycle's observations.
#[derive(Debug, Clone, PartialEq)]
pub enum ClusterState {
    /// Too many nodes transient/unreachable to act safely; defer.
    Unstable {
        transient: usize,
        unreachable: usize,
    },
    /// No configured members anywhere; a new replica set must be initiated.
    FreshDeploy {
        /// Uninitialized nodes available as initiation targets, IP-sorted.
        seeds: Vec<NodeEndpoint>,
    },
    /// Members carry configs referring to IPs that no longer exist.
    RedeployIpChange {
        /// Configured hosts with no backing task.
        stale_hosts: BTreeSet<String>,
        /// Running tasks present in no observed config.
        fresh: BTreeSet<NodeEndpoint>,
    },
    /// Configs agree but the member set grew or shrank.
    Scale {
        to_add: BTreeSet<NodeEndpoint>,
        to_remove: BTreeSet<String>,
    },
    /// Members disagree about the config; only a forced rewrite converges.
    SplitView { max_version: u64 },
    /// Configs agree and match the expected membership.
    SteadyState { primary: Option<NodeEndpoint> },
}

impl ClusterState {
    /// Short tag for log lines.
    pub fn tag(&self) -> &'static str {
        match self {
            ClusterState::Unstable { .. } => "unstable",
            ClusterState::FreshDeploy { .. } => "fresh-deploy",
            ClusterState::RedeployIpChange { .. } => "redeploy-ip-change",
            ClusterState::Scale { .. } => "scale",
            ClusterState::SplitView { .. } => "split-view",
            ClusterState::SteadyState { .. } => "steady-state",
        }
    }
}

/// What the actuator is asked to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanAction {
    Initiate,
    Reconfigure,
    ForceReconfigure,
    NoOp,
}

impl fmt::Display for PlanAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PlanAction::Initiate => "initiate",
            PlanAction::Reconfigure => "reconfigure",
            PlanAction::ForceReconfigure => "force-reconfigure",
            PlanAction::NoOp => "noop",
        };
        f.write_str(s)
    }
}

/// A concrete, applicable reconciliation step.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub action: PlanAction,
    /// Node the admin command is issued against; `None` for no-ops.
    pub target: Option<NodeEndpoint>,
    /// Config to submit; `None` for no-ops.
    pub config: Option<ReplicaSetConfig>,
}

impl Plan {
    pub fn noop() -> Self {
        Self {
            action: PlanAction::NoOp,
            target: None,
            config: None,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.action == PlanAction::NoOp
    }
}
