//! Plan application against the replica set.
//!
//! The actuator is the only component that mutates MongoDB state. Every
//! admin call is retried with exponential backoff inside the cycle; a
//! primary that steps down mid-reconfigure is re-discovered and the command
//! retried before falling back to a forced rewrite.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::error::{code, OperatorError};
use crate::mongo::MongoAdmin;
use crate::retry::RetryPolicy;
use crate::types::{ExpectedMemberSet, NodeEndpoint, Plan, PlanAction, ReplicaSetConfig};

/// How often `hello` is polled while waiting for an election.
const ELECTION_POLL_INTERVAL: Duration = Duration::from_secs(2);
/// Primary-loss retries before a plain reconfigure is escalated to force.
const PRIMARY_LOSS_RETRIES: u32 = 3;

/// Outcome of applying one plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActuatorResult {
    /// The plan took effect. `initiated` marks a successful `replSetInitiate`,
    /// after which account bootstrap must run; `primary` is the writable
    /// primary the actuator confirmed, when it waited for one.
    Applied {
        initiated: bool,
        primary: Option<NodeEndpoint>,
    },
    /// The plan failed in a way the next cycle can heal.
    RetryableFailure(String),
    /// MongoDB rejected the configuration; re-planning from fresh
    /// observations is required.
    FatalFailure(String),
}

/// Applies plans produced by the planner.
pub struct Actuator<M: MongoAdmin> {
    admin: Arc<M>,
    settings: Arc<Settings>,
    policy: RetryPolicy,
}

impl<M: MongoAdmin> Actuator<M> {
    pub fn new(admin: Arc<M>, settings: Arc<Settings>) -> Self {
        Self {
            admin,
            settings,
            policy: RetryPolicy::admin(),
        }
    }

    /// Apply `plan`. `authenticated` selects root-credentialed admin calls
    /// (required once account bootstrap has completed).
    pub async fn apply(
        &self,
        plan: &Plan,
        expected: &ExpectedMemberSet,
        authenticated: bool,
    ) -> ActuatorResult {
        match plan.action {
            PlanAction::NoOp => ActuatorResult::Applied {
                initiated: false,
                primary: None,
            },
            PlanAction::Initiate => self.initiate(plan, expected).await,
            PlanAction::Reconfigure => self.reconfigure(plan, expected, authenticated).await,
            PlanAction::ForceReconfigure => {
                self.force_reconfigure(plan, expected, authenticated).await
            }
        }
    }

    async fn initiate(&self, plan: &Plan, expected: &ExpectedMemberSet) -> ActuatorResult {
        let (Some(target), Some(config)) = (plan.target, plan.config.as_ref()) else {
            return ActuatorResult::FatalFailure("initiate plan without target or config".into());
        };

        info!(target = %target, members = config.members.len(), "initiating replica set");
        let result = self
            .policy
            .execute(|| self.admin.repl_set_initiate(target, config))
            .await;

        if let Err(e) = result {
            // Auth refusals here mean a previous deployment already
            // bootstrapped accounts; the next cycle observes configs through
            // credentials and plans a reconfiguration instead.
            if code::is_auth(e.admin_code()) {
                info!("initiate requires authentication, deferring to reconfiguration");
                return ActuatorResult::RetryableFailure(e.to_string());
            }
            return failure(e);
        }

        match self.wait_for_primary(expected).await {
            Some(primary) => {
                info!(primary = %primary, "replica set initiated");
                ActuatorResult::Applied {
                    initiated: true,
                    primary: Some(primary),
                }
            }
            None => ActuatorResult::RetryableFailure(
                "no primary elected after initiate".to_string(),
            ),
        }
    }

    async fn reconfigure(
        &self,
        plan: &Plan,
        expected: &ExpectedMemberSet,
        authenticated: bool,
    ) -> ActuatorResult {
        let Some(config) = plan.config.as_ref() else {
            return ActuatorResult::FatalFailure("reconfigure plan without config".into());
        };
        let mut target = match plan.target {
            Some(target) => target,
            None => return ActuatorResult::FatalFailure("reconfigure plan without target".into()),
        };

        for attempt in 1..=PRIMARY_LOSS_RETRIES {
            info!(target = %target, version = config.version, attempt, "reconfiguring replica set");
            match self
                .submit_reconfig(target, config, false, authenticated)
                .await
            {
                Ok(()) => {
                    self.verify_applied(target, config, true).await;
                    return ActuatorResult::Applied {
                        initiated: false,
                        primary: Some(target),
                    };
                }
                Err(e) if code::is_primary_loss(e.admin_code()) => {
                    warn!(target = %target, error = %e, "primary lost during reconfigure");
                    sleep(self.policy.delay_for_attempt(attempt)).await;
                    if let Some(primary) = self.find_primary(&expected.members).await {
                        target = primary;
                    }
                }
                Err(e) if e.is_retryable() => {
                    sleep(self.policy.delay_for_attempt(attempt)).await;
                }
                Err(e) => return failure(e),
            }
        }

        // The primary would not hold still; rewrite without its consent.
        warn!("plain reconfigure exhausted, escalating to force");
        self.force_reconfigure(plan, expected, authenticated).await
    }

    async fn force_reconfigure(
        &self,
        plan: &Plan,
        expected: &ExpectedMemberSet,
        authenticated: bool,
    ) -> ActuatorResult {
        let Some(config) = plan.config.as_ref() else {
            return ActuatorResult::FatalFailure("force reconfigure plan without config".into());
        };
        let Some(target) = plan.target else {
            return ActuatorResult::FatalFailure("force reconfigure plan without target".into());
        };

        info!(target = %target, version = config.version, "force reconfiguring replica set");
        let result = self
            .policy
            .execute(|| self.submit_reconfig(target, config, true, authenticated))
            .await;

        if let Err(e) = result {
            return failure(e);
        }

        // A forced rewrite dissolves the old majority; wait for the set to
        // elect again before reporting success.
        match self.wait_for_primary(expected).await {
            Some(primary) => {
                info!(primary = %primary, "election completed after force reconfigure");
                ActuatorResult::Applied {
                    initiated: false,
                    primary: Some(primary),
                }
            }
            None => ActuatorResult::RetryableFailure(
                "no primary elected after force reconfigure".to_string(),
            ),
        }
    }

    /// Submit a `replSetReconfig`, falling back to root credentials when an
    /// unauthenticated call is refused: the cluster was bootstrapped by a
    /// previous run of the controller.
    async fn submit_reconfig(
        &self,
        target: NodeEndpoint,
        config: &ReplicaSetConfig,
        force: bool,
        authenticated: bool,
    ) -> crate::error::Result<()> {
        let creds = authenticated.then_some(&self.settings.root);
        match self
            .admin
            .repl_set_reconfig(target, config, force, creds)
            .await
        {
            Err(e) if !authenticated && code::is_auth(e.admin_code()) => {
                debug!(target = %target, "reconfig requires auth, retrying with root credentials");
                self.admin
                    .repl_set_reconfig(target, config, force, Some(&self.settings.root))
                    .await
            }
            other => other,
        }
    }

    /// Poll `hello` across the expected members until one reports itself
    /// writable, bounded by the election timeout.
    pub async fn wait_for_primary(&self, expected: &ExpectedMemberSet) -> Option<NodeEndpoint> {
        let deadline = Instant::now() + self.settings.election_timeout;
        loop {
            if let Some(primary) = self.find_primary(&expected.members).await {
                return Some(primary);
            }
            if Instant::now() + ELECTION_POLL_INTERVAL > deadline {
                warn!(
                    timeout_secs = self.settings.election_timeout.as_secs(),
                    "no writable primary before election timeout"
                );
                return None;
            }
            debug!("no primary yet, waiting for election");
            sleep(ELECTION_POLL_INTERVAL).await;
        }
    }

    async fn find_primary(
        &self,
        members: &std::collections::BTreeSet<NodeEndpoint>,
    ) -> Option<NodeEndpoint> {
        for &endpoint in members {
            match self.admin.hello(endpoint, None).await {
                Ok(hello) if hello.is_writable_primary => return Some(endpoint),
                Ok(_) => {}
                Err(e) => debug!(endpoint = %endpoint, error = %e, "hello failed during election wait"),
            }
        }
        None
    }

    /// Read the config back and log divergence. Advisory only: the next
    /// cycle's observations are the real verification.
    async fn verify_applied(
        &self,
        target: NodeEndpoint,
        submitted: &ReplicaSetConfig,
        authenticated: bool,
    ) {
        let creds = authenticated.then_some(&self.settings.root);
        match self.admin.repl_set_get_config(target, creds).await {
            Ok(current) => {
                if current.hosts() != submitted.hosts() {
                    warn!(
                        submitted = submitted.members.len(),
                        current = current.members.len(),
                        "config read-back diverges from submitted members"
                    );
                } else {
                    debug!(version = current.version, "config read-back matches");
                }
            }
            Err(e) => debug!(error = %e, "config read-back failed"),
        }
    }
}

fn failure(e: OperatorError) -> ActuatorResult {
    match e {
        OperatorError::AdminFatal(f) => ActuatorResult::FatalFailure(f.to_string()),
        other => ActuatorResult::RetryableFailure(other.to_string()),
    }
}
