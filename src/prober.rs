//! Cluster probing: what each MongoDB node says about itself.
//!
//! One probe per expected member, fanned out concurrently and joined before
//! classification. A probe classifies its node as uninitialized, member,
//! transient, or unreachable; transient nodes are re-checked with backoff
//! inside the same cycle before the classification is final.

use futures::future::join_all;
use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::config::{RootCredentials, Settings};
use crate::error::{code, OperatorError};
use crate::mongo::MongoAdmin;
use crate::retry::RetryPolicy;
use crate::types::{NodeEndpoint, NodeState, Observations, ObservedNodeView};

/// Deadline for the whole probe phase of a cycle.
const PROBE_PHASE_DEADLINE: Duration = Duration::from_secs(30);

/// Outcome of a single probe pass, before transient retries resolve.
struct RawProbe {
    view: ObservedNodeView,
    /// The node answered with `NotYetInitialized`: its config may simply
    /// not have loaded yet. Distinguishes "promote to uninitialized after
    /// retries" from transients that stay transient.
    config_not_loaded: bool,
}

/// Probes every candidate node concurrently.
pub struct ClusterProber<M: MongoAdmin> {
    admin: Arc<M>,
    settings: Arc<Settings>,
    /// Nodes already warned about expected pre-bootstrap auth failures.
    auth_warned: Mutex<HashSet<NodeEndpoint>>,
}

impl<M: MongoAdmin> ClusterProber<M> {
    pub fn new(admin: Arc<M>, settings: Arc<Settings>) -> Self {
        Self {
            admin,
            settings,
            auth_warned: Mutex::new(HashSet::new()),
        }
    }

    /// Probe all `members`. `authenticated` selects root-credentialed
    /// connections (used once account bootstrap has completed).
    pub async fn probe(
        &self,
        members: &BTreeSet<NodeEndpoint>,
        authenticated: bool,
    ) -> Observations {
        let probes = members
            .iter()
            .map(|&endpoint| async move {
                match timeout(PROBE_PHASE_DEADLINE, self.probe_node(endpoint, authenticated))
                    .await
                {
                    Ok(view) => view,
                    Err(_) => ObservedNodeView::unreachable(endpoint, "probe deadline exceeded"),
                }
            })
            .collect::<Vec<_>>();

        join_all(probes)
            .await
            .into_iter()
            .map(|view| (view.endpoint, view))
            .collect()
    }

    /// Probe one node, re-checking transient states with backoff.
    async fn probe_node(&self, endpoint: NodeEndpoint, authenticated: bool) -> ObservedNodeView {
        let policy = RetryPolicy::probe(self.settings.probe_retries);
        let mut raw = self.probe_once(endpoint, authenticated).await;
        let mut attempt = 1;

        while raw.view.state == NodeState::Transient && attempt < policy.max_attempts {
            let delay = policy.delay_for_attempt(attempt);
            debug!(endpoint = %endpoint, attempt, delay_ms = delay.as_millis() as u64,
                "node transient, re-checking");
            sleep(delay).await;
            attempt += 1;
            raw = self.probe_once(endpoint, authenticated).await;
        }

        // A node that still has no config after every re-check is not in a
        // startup race; it genuinely has nothing to load.
        if raw.view.state == NodeState::Transient && raw.config_not_loaded {
            debug!(endpoint = %endpoint, "still NotYetInitialized after retries, treating as uninitialized");
            raw.view.state = NodeState::Uninitialized;
        }

        raw.view
    }

    async fn probe_once(&self, endpoint: NodeEndpoint, authenticated: bool) -> RawProbe {
        let creds = authenticated.then_some(&self.settings.root);

        // `hello` is answered without authentication and carries primacy.
        let hello = match self.admin.hello(endpoint, None).await {
            Ok(hello) => hello,
            Err(e) => {
                debug!(endpoint = %endpoint, error = %e, "node unreachable");
                return RawProbe {
                    view: ObservedNodeView::unreachable(endpoint, e.to_string()),
                    config_not_loaded: false,
                };
            }
        };

        // A member that is starting or rolling back is transient even
        // though it would hand us a config.
        if let Ok(status) = self.admin.repl_set_get_status(endpoint, creds).await {
            if status.is_settling() {
                return self.transient(endpoint, &hello, "member state settling", false);
            }
        }

        match self.get_config(endpoint, creds).await {
            Ok(config) => {
                let view = ObservedNodeView {
                    endpoint,
                    state: NodeState::Member,
                    rs_name: Some(config.name.clone()),
                    configured_members: config.hosts(),
                    is_primary: hello.is_writable_primary,
                    config_version: Some(config.version),
                    config: Some(config),
                    error: None,
                };
                RawProbe {
                    view,
                    config_not_loaded: false,
                }
            }
            Err(e) if e.admin_code() == Some(code::NOT_YET_INITIALIZED) => {
                self.transient(endpoint, &hello, "no replica set config found on this node", true)
            }
            Err(e) if code::is_transient(e.admin_code()) => {
                self.transient(endpoint, &hello, e.to_string(), false)
            }
            Err(e) if code::is_auth(e.admin_code()) => {
                // Expected before bootstrap; warn once per node, not per cycle.
                let first = self
                    .auth_warned
                    .lock()
                    .expect("auth_warned lock")
                    .insert(endpoint);
                if first {
                    debug!(endpoint = %endpoint, error = %e,
                        "config not readable without auth yet (expected on new deployments)");
                }
                self.transient(endpoint, &hello, e.to_string(), false)
            }
            Err(e) => {
                warn!(endpoint = %endpoint, error = %e, "probe failed");
                RawProbe {
                    view: ObservedNodeView::unreachable(endpoint, e.to_string()),
                    config_not_loaded: false,
                }
            }
        }
    }

    /// Read the node's config, falling back to root credentials when an
    /// unauthenticated read is rejected (controller restart after a
    /// completed bootstrap).
    async fn get_config(
        &self,
        endpoint: NodeEndpoint,
        creds: Option<&RootCredentials>,
    ) -> crate::error::Result<crate::types::ReplicaSetConfig> {
        match self.admin.repl_set_get_config(endpoint, creds).await {
            Err(e) if creds.is_none() && code::is_auth(e.admin_code()) => {
                match self
                    .admin
                    .repl_set_get_config(endpoint, Some(&self.settings.root))
                    .await
                {
                    Ok(config) => Ok(config),
                    // Surface the original unauthenticated failure if the
                    // root account does not exist yet either.
                    Err(inner) if matches!(inner, OperatorError::Auth(_)) => Err(e),
                    Err(inner) if code::is_auth(inner.admin_code()) => Err(e),
                    Err(inner) => Err(inner),
                }
            }
            other => other,
        }
    }

    fn transient(
        &self,
        endpoint: NodeEndpoint,
        hello: &crate::mongo::HelloResponse,
        reason: impl Into<String>,
        config_not_loaded: bool,
    ) -> RawProbe {
        RawProbe {
            view: ObservedNodeView {
                endpoint,
                state: NodeState::Transient,
                rs_name: hello.set_name.clone(),
                configured_members: BTreeSet::new(),
                is_primary: hello.is_writable_primary,
                config_version: None,
                config: None,
                error: Some(reason.into()),
            },
            config_not_loaded,
        }
    }
}
