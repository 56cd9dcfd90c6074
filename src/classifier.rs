//! State classification: reducing one cycle's observations to a verdict.
//!
//! Rules are evaluated in a fixed order, first match wins:
//!
//! 1. unstable - too many nodes transient/unreachable to act on
//! 2. fresh-deploy - nothing configured anywhere, quorum of blank nodes
//! 3. redeploy-ip-change - configs reference IPs that no longer exist while
//!    new IPs appear nowhere in any config (wholesale turnover)
//! 4. scale - configs agree but the member set grew or shrank
//! 5. split-view - members disagree about the config itself
//! 6. steady-state - configs agree and match the expected membership
//!
//! Anything that matches no rule is deferred like unstable: acting on a
//! partial picture risks writing a config that the next cycle undoes.

use std::collections::BTreeSet;
use tracing::debug;

use crate::types::{
    ClusterState, ExpectedMemberSet, NodeEndpoint, NodeState, Observations, ObservedNodeView,
};

/// Version skew between members tolerated as propagation lag rather than
/// treated as a split view.
const MINOR_VERSION_SKEW: u64 = 1;

/// Classify one cycle's observations.
pub fn classify(expected: &ExpectedMemberSet, observed: &Observations) -> ClusterState {
    let members: Vec<&ObservedNodeView> = observed
        .values()
        .filter(|v| v.state == NodeState::Member)
        .collect();
    let uninitialized: Vec<&ObservedNodeView> = observed
        .values()
        .filter(|v| v.state == NodeState::Uninitialized)
        .collect();
    let transient = count_state(observed, NodeState::Transient);
    let unreachable = count_state(observed, NodeState::Unreachable);

    // Rule 1: unstable. An empty expectation also defers: with no tasks
    // visible there is nothing safe to converge toward.
    if expected.members.is_empty() || transient + unreachable > expected.members.len() / 2 {
        return ClusterState::Unstable {
            transient,
            unreachable,
        };
    }

    // Rule 2: fresh deploy. No configs anywhere, a quorum of blank nodes,
    // and every scheduled task visible (a partially started deployment must
    // not trigger a premature initiate).
    let quorum = expected.members.len().div_ceil(2);
    if members.is_empty() && uninitialized.len() >= quorum && expected.is_complete() {
        let seeds = uninitialized.iter().map(|v| v.endpoint).collect();
        return ClusterState::FreshDeploy { seeds };
    }

    if !members.is_empty() {
        let expected_hosts = expected.hosts();
        let expected_ips: BTreeSet<_> = expected.members.iter().map(|e| e.ip).collect();

        // Hosts any member's config mentions.
        let union_hosts: BTreeSet<String> = members
            .iter()
            .flat_map(|v| v.configured_members.iter().cloned())
            .collect();

        // Rule 3: redeploy with IP turnover. Some configured host has no
        // backing task, and some task appears in no config at all.
        let stale_hosts: BTreeSet<String> = union_hosts
            .iter()
            .filter(|host| !host_ip_in(host, &expected_ips))
            .cloned()
            .collect();
        let fresh: BTreeSet<NodeEndpoint> = expected
            .members
            .iter()
            .filter(|e| !union_hosts.contains(&e.host()))
            .copied()
            .collect();

        if !stale_hosts.is_empty() && !fresh.is_empty() {
            debug!(stale = stale_hosts.len(), fresh = fresh.len(), "ip turnover detected");
            return ClusterState::RedeployIpChange { stale_hosts, fresh };
        }

        // Agreement: identical member sets, minor version skew at most.
        let first_set = &members[0].configured_members;
        let sets_agree = members.iter().all(|v| &v.configured_members == first_set);
        let versions: Vec<u64> = members.iter().filter_map(|v| v.config_version).collect();
        let max_version = versions.iter().copied().max().unwrap_or(0);
        let min_version = versions.iter().copied().min().unwrap_or(0);
        let versions_agree = max_version - min_version <= MINOR_VERSION_SKEW;

        // Rule 4: pure scale up or down against an agreed config.
        if sets_agree && versions_agree && *first_set != expected_hosts {
            let to_add: BTreeSet<NodeEndpoint> = expected
                .members
                .iter()
                .filter(|e| !first_set.contains(&e.host()))
                .copied()
                .collect();
            let to_remove: BTreeSet<String> = first_set
                .iter()
                .filter(|host| !expected_hosts.contains(*host))
                .cloned()
                .collect();
            return ClusterState::Scale { to_add, to_remove };
        }

        // Rule 5: split view.
        if !sets_agree || !versions_agree {
            return ClusterState::SplitView { max_version };
        }

        // Rule 6: steady state.
        let primary = members
            .iter()
            .find(|v| v.is_primary)
            .map(|v| v.endpoint);
        return ClusterState::SteadyState { primary };
    }

    // No members, but not enough blank nodes for a confident fresh deploy.
    debug!(
        uninitialized = uninitialized.len(),
        pending = expected.pending_count,
        "observations inconclusive, deferring"
    );
    ClusterState::Unstable {
        transient,
        unreachable,
    }
}

fn count_state(observed: &Observations, state: NodeState) -> usize {
    observed.values().filter(|v| v.state == state).count()
}

/// Does `host` (an `ip:port` string) refer to one of `ips`?
fn host_ip_in(host: &str, ips: &BTreeSet<std::net::Ipv4Addr>) -> bool {
    host.split(':')
        .next()
        .and_then(|ip| ip.parse().ok())
        .is_some_and(|ip| ips.contains(&ip))
}
