//! Plan generation: from a classified state to one applicable action.
//!
//! The planner is pure apart from the [`IdLedger`], which remembers every
//! member id dropped during this process's lifetime so ids are assigned
//! sparsely-ascending and never reused after removal. MongoDB remains the
//! authority on the ids currently in use; the ledger only forbids
//! resurrection.

use std::cmp::Reverse;
use std::collections::BTreeSet;
use tracing::debug;

use crate::types::{
    ClusterState, ExpectedMemberSet, MemberSpec, NodeEndpoint, NodeState, Observations, Plan,
    PlanAction, ReplicaSetConfig,
};

/// Member ids retired during this session.
#[derive(Debug, Default)]
pub struct IdLedger {
    retired: BTreeSet<u32>,
}

impl IdLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `id` as dropped; it will never be handed out again.
    pub fn retire(&mut self, id: u32) {
        self.retired.insert(id);
    }

    /// Smallest id not in `in_use` and never retired.
    pub fn next_free(&self, in_use: &BTreeSet<u32>) -> u32 {
        (0..)
            .find(|id| !in_use.contains(id) && !self.retired.contains(id))
            .expect("u32 id space exhausted")
    }

    pub fn retired(&self) -> &BTreeSet<u32> {
        &self.retired
    }
}

/// Map a classified state to a plan.
pub fn plan(
    state: &ClusterState,
    expected: &ExpectedMemberSet,
    observed: &Observations,
    ledger: &mut IdLedger,
    rs_name: &str,
) -> Plan {
    match state {
        ClusterState::SteadyState { .. } | ClusterState::Unstable { .. } => Plan::noop(),

        ClusterState::FreshDeploy { seeds } => {
            // Every expected member joins, ids by sorted-IP order.
            let members = expected
                .members
                .iter()
                .enumerate()
                .map(|(i, e)| MemberSpec::new(i as u32, e.host()))
                .collect();
            Plan {
                action: PlanAction::Initiate,
                target: seeds.first().copied(),
                config: Some(ReplicaSetConfig {
                    name: rs_name.to_string(),
                    version: 1,
                    members,
                }),
            }
        }

        ClusterState::Scale { to_add, to_remove } => {
            let Some(reference) = reference_config(observed) else {
                return Plan::noop();
            };

            let mut members: Vec<MemberSpec> = Vec::new();
            for member in &reference.members {
                if to_remove.contains(&member.host) {
                    ledger.retire(member.id);
                    debug!(id = member.id, host = %member.host, "retiring removed member id");
                } else {
                    members.push(member.clone());
                }
            }

            let mut in_use: BTreeSet<u32> = members.iter().map(|m| m.id).collect();
            for endpoint in to_add {
                let id = ledger.next_free(&in_use);
                in_use.insert(id);
                members.push(MemberSpec::new(id, endpoint.host()));
            }

            Plan {
                action: PlanAction::Reconfigure,
                target: select_target(observed),
                config: Some(ReplicaSetConfig {
                    name: rs_name.to_string(),
                    version: max_observed_version(observed) + 1,
                    members,
                }),
            }
        }

        ClusterState::RedeployIpChange { .. } | ClusterState::SplitView { .. } => {
            let Some(reference) = reference_config(observed) else {
                return Plan::noop();
            };

            // Pair old ids to new IPs in sort order to minimize churn; any
            // surplus gets a fresh id, any shortfall retires the leftovers.
            let mut old_members: Vec<&MemberSpec> = reference.members.iter().collect();
            old_members.sort_by(|a, b| a.host.cmp(&b.host));

            let mut members: Vec<MemberSpec> = Vec::new();
            let mut leftover = old_members.split_off(expected.members.len().min(old_members.len()));
            for (old, endpoint) in old_members.iter().zip(expected.members.iter()) {
                members.push(MemberSpec::new(old.id, endpoint.host()));
            }

            for old in leftover.drain(..) {
                ledger.retire(old.id);
            }

            let mut in_use: BTreeSet<u32> = members.iter().map(|m| m.id).collect();
            for endpoint in expected.members.iter().skip(members.len()) {
                let id = ledger.next_free(&in_use);
                in_use.insert(id);
                members.push(MemberSpec::new(id, endpoint.host()));
            }

            Plan {
                action: PlanAction::ForceReconfigure,
                target: select_target(observed),
                config: Some(ReplicaSetConfig {
                    name: rs_name.to_string(),
                    version: max_observed_version(observed) + 1,
                    members,
                }),
            }
        }
    }
}

/// Escalation plan for a steady-state set that cannot elect a primary:
/// resubmit the expected membership as a forced reconfiguration.
pub fn plan_primary_recovery(
    expected: &ExpectedMemberSet,
    observed: &Observations,
    rs_name: &str,
) -> Plan {
    let Some(reference) = reference_config(observed) else {
        return Plan::noop();
    };
    let expected_hosts = expected.hosts();
    Plan {
        action: PlanAction::ForceReconfigure,
        target: select_target(observed),
        config: Some(ReplicaSetConfig {
            name: rs_name.to_string(),
            version: max_observed_version(observed) + 1,
            members: reference
                .members
                .iter()
                .filter(|m| expected_hosts.contains(&m.host))
                .cloned()
                .collect(),
        }),
    }
}

/// Member to issue admin commands against: the primary if one is known,
/// otherwise the member with the highest config version, ties broken by
/// smallest IP.
pub fn select_target(observed: &Observations) -> Option<NodeEndpoint> {
    observed
        .values()
        .filter(|v| v.state == NodeState::Member)
        .max_by_key(|v| {
            (
                v.is_primary,
                v.config_version.unwrap_or(0),
                Reverse(v.endpoint),
            )
        })
        .map(|v| v.endpoint)
}

/// The config to base a rewrite on, taken from the same member a command
/// would target.
fn reference_config(observed: &Observations) -> Option<&ReplicaSetConfig> {
    let target = select_target(observed)?;
    observed.get(&target).and_then(|v| v.config.as_ref())
}

fn max_observed_version(observed: &Observations) -> u64 {
    observed
        .values()
        .filter(|v| v.state == NodeState::Member)
        .filter_map(|v| v.config_version)
        .max()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::classify;
    use crate::types::ObservedNodeView;

    fn ep(s: &str) -> NodeEndpoint {
        s.parse().unwrap()
    }

    fn expected(ips: &[&str]) -> ExpectedMemberSet {
        let members: BTreeSet<_> = ips.iter().map(|s| ep(&format!("{s}:27017"))).collect();
        ExpectedMemberSet {
            expected_count: members.len() as u32,
            pending_count: 0,
            members,
        }
    }

    fn member_with_ids(
        ip: &str,
        entries: &[(u32, &str)],
        version: u64,
        primary: bool,
    ) -> ObservedNodeView {
        let config = ReplicaSetConfig {
            name: "rs0".to_string(),
            version,
            members: entries
                .iter()
                .map(|(id, h)| MemberSpec::new(*id, format!("{h}:27017")))
                .collect(),
        };
        ObservedNodeView {
            endpoint: ep(&format!("{ip}:27017")),
            state: NodeState::Member,
            rs_name: Some("rs0".to_string()),
            configured_members: config.hosts(),
            is_primary: primary,
            config_version: Some(version),
            config: Some(config),
            error: None,
        }
    }

    fn uninitialized(ip: &str) -> ObservedNodeView {
        ObservedNodeView {
            endpoint: ep(&format!("{ip}:27017")),
            state: NodeState::Uninitialized,
            rs_name: None,
            configured_members: BTreeSet::new(),
            is_primary: false,
            config_version: None,
            config: None,
            error: None,
        }
    }

    fn observations(views: Vec<ObservedNodeView>) -> Observations {
        views.into_iter().map(|v| (v.endpoint, v)).collect()
    }

    #[test]
    fn test_fresh_deploy_plan() {
        let e = expected(&["10.0.0.4", "10.0.0.2", "10.0.0.3"]);
        let o = observations(vec![
            uninitialized("10.0.0.2"),
            uninitialized("10.0.0.3"),
            uninitialized("10.0.0.4"),
        ]);
        let state = classify(&e, &o);
        let mut ledger = IdLedger::new();
        let plan = plan(&state, &e, &o, &mut ledger, "rs0");

        assert_eq!(plan.action, PlanAction::Initiate);
        assert_eq!(plan.target, Some(ep("10.0.0.2:27017")));

        let config = plan.config.unwrap();
        assert_eq!(config.version, 1);
        let entries: Vec<(u32, String)> = config
            .members
            .iter()
            .map(|m| (m.id, m.host.clone()))
            .collect();
        // Ids follow sorted IP order.
        assert_eq!(
            entries,
            vec![
                (0, "10.0.0.2:27017".to_string()),
                (1, "10.0.0.3:27017".to_string()),
                (2, "10.0.0.4:27017".to_string()),
            ]
        );
    }

    #[test]
    fn test_scale_up_appends_next_free_id() {
        let e = expected(&["10.0.0.2", "10.0.0.3", "10.0.0.4", "10.0.0.5"]);
        let current = &[(0, "10.0.0.2"), (1, "10.0.0.3"), (2, "10.0.0.4")];
        let o = observations(vec![
            member_with_ids("10.0.0.2", current, 2, true),
            member_with_ids("10.0.0.3", current, 2, false),
            member_with_ids("10.0.0.4", current, 2, false),
            uninitialized("10.0.0.5"),
        ]);
        let state = classify(&e, &o);
        let mut ledger = IdLedger::new();
        let plan = plan(&state, &e, &o, &mut ledger, "rs0");

        assert_eq!(plan.action, PlanAction::Reconfigure);
        // Addressed at the primary.
        assert_eq!(plan.target, Some(ep("10.0.0.2:27017")));

        let config = plan.config.unwrap();
        assert_eq!(config.version, 3);
        assert_eq!(config.members.len(), 4);
        let added = config
            .members
            .iter()
            .find(|m| m.host == "10.0.0.5:27017")
            .unwrap();
        assert_eq!(added.id, 3);
    }

    #[test]
    fn test_scale_down_retires_ids() {
        let e = expected(&["10.0.0.2", "10.0.0.3"]);
        let current = &[(0, "10.0.0.2"), (1, "10.0.0.3"), (2, "10.0.0.4")];
        let o = observations(vec![
            member_with_ids("10.0.0.2", current, 5, true),
            member_with_ids("10.0.0.3", current, 5, false),
        ]);
        let state = classify(&e, &o);
        let mut ledger = IdLedger::new();
        let plan = plan(&state, &e, &o, &mut ledger, "rs0");

        let config = plan.config.unwrap();
        assert_eq!(config.members.len(), 2);
        assert!(ledger.retired().contains(&2));

        // A later addition must not resurrect the retired id.
        let in_use = BTreeSet::from([0, 1]);
        assert_eq!(ledger.next_free(&in_use), 3);
    }

    #[test]
    fn test_redeploy_pairs_old_ids_in_sort_order() {
        let e = expected(&["10.0.5.2", "10.0.5.3", "10.0.5.4"]);
        let old = &[(0, "10.0.0.2"), (1, "10.0.0.3"), (2, "10.0.0.4")];
        let o = observations(vec![
            member_with_ids("10.0.5.2", old, 7, false),
            member_with_ids("10.0.5.3", old, 7, false),
            member_with_ids("10.0.5.4", old, 7, false),
        ]);
        let state = classify(&e, &o);
        assert!(matches!(state, ClusterState::RedeployIpChange { .. }));

        let mut ledger = IdLedger::new();
        let plan = plan(&state, &e, &o, &mut ledger, "rs0");

        assert_eq!(plan.action, PlanAction::ForceReconfigure);
        let config = plan.config.unwrap();
        assert_eq!(config.version, 8);
        let entries: Vec<(u32, String)> = config
            .members
            .iter()
            .map(|m| (m.id, m.host.clone()))
            .collect();
        assert_eq!(
            entries,
            vec![
                (0, "10.0.5.2:27017".to_string()),
                (1, "10.0.5.3:27017".to_string()),
                (2, "10.0.5.4:27017".to_string()),
            ]
        );
    }

    #[test]
    fn test_redeploy_with_growth_allocates_new_ids() {
        let e = expected(&["10.0.5.2", "10.0.5.3", "10.0.5.4", "10.0.5.5"]);
        let old = &[(0, "10.0.0.2"), (1, "10.0.0.3"), (2, "10.0.0.4")];
        let o = observations(vec![
            member_with_ids("10.0.5.2", old, 3, false),
            member_with_ids("10.0.5.3", old, 3, false),
            member_with_ids("10.0.5.4", old, 3, false),
        ]);
        let state = classify(&e, &o);
        let mut ledger = IdLedger::new();
        let plan = plan(&state, &e, &o, &mut ledger, "rs0");

        let config = plan.config.unwrap();
        assert_eq!(config.members.len(), 4);
        assert_eq!(config.members[3].id, 3);
        assert_eq!(config.members[3].host, "10.0.5.5:27017");
    }

    #[test]
    fn test_target_prefers_primary_then_version_then_ip() {
        let o = observations(vec![
            member_with_ids("10.0.0.4", &[(0, "10.0.0.4")], 9, false),
            member_with_ids("10.0.0.2", &[(0, "10.0.0.2")], 3, true),
        ]);
        assert_eq!(select_target(&o), Some(ep("10.0.0.2:27017")));

        let o = observations(vec![
            member_with_ids("10.0.0.4", &[(0, "10.0.0.4")], 9, false),
            member_with_ids("10.0.0.2", &[(0, "10.0.0.2")], 3, false),
        ]);
        assert_eq!(select_target(&o), Some(ep("10.0.0.4:27017")));

        let o = observations(vec![
            member_with_ids("10.0.0.4", &[(0, "10.0.0.4")], 9, false),
            member_with_ids("10.0.0.2", &[(0, "10.0.0.2")], 9, false),
        ]);
        assert_eq!(select_target(&o), Some(ep("10.0.0.2:27017")));
    }

    #[test]
    fn test_steady_and_unstable_are_noops() {
        let e = expected(&["10.0.0.2"]);
        let o = Observations::new();
        let mut ledger = IdLedger::new();
        assert!(plan(
            &ClusterState::SteadyState { primary: None },
            &e,
            &o,
            &mut ledger,
            "rs0"
        )
        .is_noop());
        assert!(plan(
            &ClusterState::Unstable {
                transient: 0,
                unreachable: 3
            },
            &e,
            &o,
            &mut ledger,
            "rs0"
        )
        .is_noop());
    }

    #[test]
    fn test_primary_recovery_plan() {
        let hosts = &[(0, "10.0.0.2"), (1, "10.0.0.3")];
        let e = expected(&["10.0.0.2", "10.0.0.3"]);
        let o = observations(vec![
            member_with_ids("10.0.0.2", hosts, 4, false),
            member_with_ids("10.0.0.3", hosts, 4, false),
        ]);
        let plan = plan_primary_recovery(&e, &o, "rs0");
        assert_eq!(plan.action, PlanAction::ForceReconfigure);
        assert_eq!(plan.config.as_ref().unwrap().version, 5);
        assert_eq!(plan.config.unwrap().members.len(), 2);
    }
}
