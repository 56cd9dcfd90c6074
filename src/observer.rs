//! Topology observation: what the swarm says the replica set should be.
//!
//! The orchestrator is the authority on *expected* membership; MongoDB is
//! the authority on *configured* membership. This module produces the
//! expected side: the set of overlay-network endpoints backed by running
//! tasks, plus how many tasks are still due to appear.

use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::error::Result;
use crate::swarm::SwarmApi;
use crate::types::{ExpectedMemberSet, NodeEndpoint};

/// Observes the MongoDB service through the orchestrator API.
pub struct TopologyObserver<'a, S: SwarmApi> {
    swarm: &'a S,
    settings: &'a Settings,
}

impl<'a, S: SwarmApi> TopologyObserver<'a, S> {
    pub fn new(swarm: &'a S, settings: &'a Settings) -> Self {
        Self { swarm, settings }
    }

    /// One observation pass.
    ///
    /// Members are the IPs of tasks that are running (desired and actual)
    /// and attached to the configured overlay network. The expected count
    /// is the service's declared replica count, or for global services the
    /// number of schedulable nodes the service has tasks assigned to.
    pub async fn observe(&self) -> Result<ExpectedMemberSet> {
        let service = self.swarm.service(&self.settings.mongo_service_name).await?;
        let tasks = self.swarm.service_tasks(&service.id).await?;
        let nodes = self.swarm.nodes().await?;

        let schedulable: BTreeSet<&str> = nodes
            .iter()
            .filter(|n| n.is_schedulable())
            .map(|n| n.id.as_str())
            .collect();

        let expected_count = if service.spec.mode.is_global() {
            // One task per assigned, schedulable node.
            let assigned: BTreeSet<&str> = tasks.iter().map(|t| t.node_id.as_str()).collect();
            assigned.intersection(&schedulable).count() as u32
        } else {
            service.spec.mode.replicas().unwrap_or(0) as u32
        };

        let mut members = BTreeSet::new();
        for task in tasks.iter().filter(|t| t.is_running()) {
            if !schedulable.contains(task.node_id.as_str()) {
                debug!(task = %task.id, node = %task.node_id, "skipping task on unschedulable node");
                continue;
            }
            match task.ip_on_network(&self.settings.overlay_network_name) {
                Some(ip) => {
                    members.insert(NodeEndpoint::new(ip, self.settings.mongo_port));
                }
                None => {
                    warn!(
                        task = %task.id,
                        network = %self.settings.overlay_network_name,
                        "running task has no address on the overlay network"
                    );
                }
            }
        }

        let pending_count = expected_count.saturating_sub(members.len() as u32);
        if pending_count > 0 {
            info!(
                expected = expected_count,
                visible = members.len(),
                pending = pending_count,
                "mongo tasks still starting"
            );
        }

        Ok(ExpectedMemberSet {
            members,
            expected_count,
            pending_count,
        })
    }
}
