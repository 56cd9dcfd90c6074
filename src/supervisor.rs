//! The supervisor loop: observe, probe, classify, plan, apply, repeat.
//!
//! One sequential reconciler; cycles never overlap and every decision is
//! recomputed from fresh observations. The only state carried across
//! cycles is the bootstrap flag, the id ledger, the last known primary
//! (advisory), and the hysteresis counters for downscales and primary loss.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, warn};

use crate::actuator::{Actuator, ActuatorResult};
use crate::bootstrap::AccountBootstrapper;
use crate::classifier::classify;
use crate::config::Settings;
use crate::error::{OperatorError, Result};
use crate::mongo::MongoAdmin;
use crate::observer::TopologyObserver;
use crate::planner::{self, IdLedger};
use crate::prober::ClusterProber;
use crate::shutdown;
use crate::swarm::SwarmApi;
use crate::types::{ClusterState, ExpectedMemberSet, NodeEndpoint, Observations, Plan};

/// Pause between startup-gate attempts.
const STARTUP_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Drives reconciliation cycles at a fixed cadence.
pub struct Supervisor<S: SwarmApi, M: MongoAdmin> {
    swarm: S,
    settings: Arc<Settings>,
    prober: ClusterProber<M>,
    actuator: Actuator<M>,
    bootstrapper: AccountBootstrapper<M>,

    // State carried across cycles; everything else is recomputed from
    // fresh observations each pass.
    cycle: u64,
    bootstrap_done: bool,
    last_primary: Option<NodeEndpoint>,
    reconfig_attempts: u64,
    ledger: IdLedger,
    /// Consecutive cycles a removal-only scale has been observed.
    downscale_streak: u32,
    /// When a primaryless steady state was first seen, and for how many
    /// consecutive cycles.
    primaryless: Option<(Instant, u32)>,
}

impl<S: SwarmApi, M: MongoAdmin> Supervisor<S, M> {
    pub fn new(swarm: S, admin: Arc<M>, settings: Arc<Settings>) -> Self {
        Self {
            swarm,
            prober: ClusterProber::new(Arc::clone(&admin), Arc::clone(&settings)),
            actuator: Actuator::new(Arc::clone(&admin), Arc::clone(&settings)),
            bootstrapper: AccountBootstrapper::new(admin, Arc::clone(&settings)),
            settings,
            cycle: 0,
            bootstrap_done: false,
            last_primary: None,
            reconfig_attempts: 0,
            ledger: IdLedger::new(),
            downscale_streak: 0,
            primaryless: None,
        }
    }

    /// Run until `shutdown` flips. The in-flight cycle always completes.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        self.wait_for_service(&mut shutdown).await?;

        info!(
            interval_secs = self.settings.cycle_interval.as_secs(),
            "starting reconciliation loop"
        );

        while !*shutdown.borrow() {
            let deadline = self.settings.cycle_deadline();
            match timeout(deadline, self.run_cycle()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(cycle = self.cycle, error = %e, kind = error_kind(&e), "cycle failed"),
                Err(_) => warn!(
                    cycle = self.cycle,
                    deadline_secs = deadline.as_secs(),
                    "cycle deadline exceeded, abandoning"
                ),
            }

            tokio::select! {
                _ = sleep(self.settings.cycle_interval) => {}
                _ = shutdown::triggered(&mut shutdown) => break,
            }
        }

        info!(cycles = self.cycle, "supervisor stopped");
        Ok(())
    }

    /// One reconciliation cycle.
    pub async fn run_cycle(&mut self) -> Result<()> {
        self.cycle += 1;
        let cycle = self.cycle;

        let observer = TopologyObserver::new(&self.swarm, &self.settings);
        let expected = observer.observe().await?;
        debug!(
            cycle,
            members = expected.members.len(),
            pending = expected.pending_count,
            "observed expected membership"
        );

        let observed = self.prober.probe(&expected.members, self.bootstrap_done).await;
        let state = classify(&expected, &observed);

        info!(
            cycle,
            state = state.tag(),
            expected = expected.members.len(),
            "classified cluster state"
        );

        self.note_primary(&state);
        let plan = self.decide(&state, &expected, &observed);

        let applied_primary = if plan.is_noop() {
            None
        } else {
            info!(
                cycle,
                action = %plan.action,
                target = plan.target.map(|t| t.to_string()).unwrap_or_default(),
                version = plan.config.as_ref().map(|c| c.version).unwrap_or_default(),
                "applying plan"
            );
            self.reconfig_attempts += 1;
            self.apply(&plan, &expected).await
        };

        if !self.bootstrap_done {
            let primary = applied_primary.or(match state {
                ClusterState::SteadyState { primary } => primary,
                _ => None,
            });
            if let Some(primary) = primary {
                self.try_bootstrap(primary).await;
            }
        }

        Ok(())
    }

    /// Select the plan, applying supervisor-level hysteresis and
    /// escalation on top of the pure planner.
    fn decide(
        &mut self,
        state: &ClusterState,
        expected: &ExpectedMemberSet,
        observed: &Observations,
    ) -> Plan {
        // Removal-only scales wait out the hold: a node rebooting looks
        // identical to an intentional downscale for one observation.
        if let ClusterState::Scale { to_add, to_remove } = state {
            if to_add.is_empty() && !to_remove.is_empty() {
                self.downscale_streak += 1;
                if self.downscale_streak <= self.settings.downscale_hold_cycles {
                    info!(
                        streak = self.downscale_streak,
                        hold = self.settings.downscale_hold_cycles,
                        "holding removal-only scale for another cycle"
                    );
                    return Plan::noop();
                }
            } else {
                self.downscale_streak = 0;
            }
        } else {
            self.downscale_streak = 0;
        }

        // A steady set that cannot elect gets rewritten by force, but only
        // after the election timeout has elapsed across at least two cycles.
        if let ClusterState::SteadyState { primary: None } = state {
            if let Some((since, cycles)) = self.primaryless {
                if cycles >= 2 && since.elapsed() >= self.settings.election_timeout {
                    warn!(
                        cycles,
                        elapsed_secs = since.elapsed().as_secs(),
                        "no primary past election timeout, escalating to force reconfigure"
                    );
                    self.primaryless = None;
                    return planner::plan_primary_recovery(
                        expected,
                        observed,
                        &self.settings.replicaset_name,
                    );
                }
            }
            return Plan::noop();
        }

        planner::plan(
            state,
            expected,
            observed,
            &mut self.ledger,
            &self.settings.replicaset_name,
        )
    }

    /// Apply and digest the result. Returns the primary if the actuator
    /// confirmed one.
    async fn apply(&mut self, plan: &Plan, expected: &ExpectedMemberSet) -> Option<NodeEndpoint> {
        match self
            .actuator
            .apply(plan, expected, self.bootstrap_done)
            .await
        {
            ActuatorResult::Applied { initiated, primary } => {
                if let Some(primary) = primary {
                    self.last_primary = Some(primary);
                }
                if initiated {
                    debug!("initiate confirmed, bootstrap pending");
                }
                primary
            }
            ActuatorResult::RetryableFailure(reason) => {
                warn!(cycle = self.cycle, reason = %reason, "plan not applied, retrying next cycle");
                None
            }
            ActuatorResult::FatalFailure(reason) => {
                error!(cycle = self.cycle, reason = %reason, "plan rejected, re-planning next cycle");
                None
            }
        }
    }

    /// Track primary presence for logging and loss escalation.
    fn note_primary(&mut self, state: &ClusterState) {
        match state {
            ClusterState::SteadyState {
                primary: Some(primary),
            } => {
                if self.last_primary != Some(*primary) {
                    info!(primary = %primary.ip, "ReplicaSet Primary is: {}", primary.ip);
                }
                self.last_primary = Some(*primary);
                self.primaryless = None;
            }
            ClusterState::SteadyState { primary: None } => {
                let (since, cycles) = self
                    .primaryless
                    .unwrap_or((Instant::now(), 0));
                self.primaryless = Some((since, cycles + 1));
                warn!(
                    cycles = cycles + 1,
                    "steady member set but no writable primary"
                );
            }
            _ => self.primaryless = None,
        }
    }

    async fn try_bootstrap(&mut self, primary: NodeEndpoint) {
        match self.bootstrapper.run(primary).await {
            Ok(()) => {
                self.bootstrap_done = true;
            }
            Err(e) => {
                warn!(error = %e, kind = error_kind(&e), "account bootstrap incomplete, will retry");
            }
        }
    }

    /// Startup gate: wait until the service's tasks are all running, or
    /// give up so the orchestrator restarts the controller.
    async fn wait_for_service(&self, shutdown: &mut watch::Receiver<bool>) -> Result<()> {
        let observer = TopologyObserver::new(&self.swarm, &self.settings);
        let mut attempts = self.settings.startup_wait_attempts;

        // Resolve the overlay network up front; a typo here would otherwise
        // surface as an endless "no members" loop.
        match self.swarm.network(&self.settings.overlay_network_name).await {
            Ok(network) => info!(
                network = %self.settings.overlay_network_name,
                subnets = ?network.subnets(),
                "overlay network resolved"
            ),
            Err(e) => warn!(
                network = %self.settings.overlay_network_name,
                error = %e,
                "overlay network not inspectable yet"
            ),
        }

        info!(
            service = %self.settings.mongo_service_name,
            attempts,
            "waiting for mongo service tasks to start"
        );

        while attempts > 0 && !*shutdown.borrow() {
            tokio::select! {
                _ = sleep(STARTUP_POLL_INTERVAL) => {}
                _ = shutdown::triggered(&mut *shutdown) => return Ok(()),
            }

            match observer.observe().await {
                Ok(expected) if expected.is_complete() && !expected.members.is_empty() => {
                    info!(members = expected.members.len(), "mongo service is up");
                    return Ok(());
                }
                Ok(expected) => {
                    attempts -= 1;
                    info!(
                        running = expected.members.len(),
                        expected = expected.expected_count,
                        attempts_remaining = attempts,
                        "mongo service still starting"
                    );
                }
                Err(e) => {
                    attempts -= 1;
                    warn!(error = %e, attempts_remaining = attempts, "cannot observe mongo service yet");
                }
            }
        }

        if *shutdown.borrow() {
            return Ok(());
        }
        Err(OperatorError::Observe(format!(
            "mongo service {} did not come up within the startup window",
            self.settings.mongo_service_name
        )))
    }

    pub fn cycles_run(&self) -> u64 {
        self.cycle
    }

    pub fn bootstrap_completed(&self) -> bool {
        self.bootstrap_done
    }

    pub fn last_known_primary(&self) -> Option<NodeEndpoint> {
        self.last_primary
    }

    pub fn reconfiguration_attempts(&self) -> u64 {
        self.reconfig_attempts
    }
}

fn error_kind(e: &OperatorError) -> &'static str {
    match e {
        OperatorError::Config(_) | OperatorError::InvalidConfig { .. } => "config",
        OperatorError::Observe(_)
        | OperatorError::ServiceNotFound(_)
        | OperatorError::AmbiguousService(_) => "observe",
        OperatorError::Probe { .. } => "probe",
        OperatorError::AdminRetryable(_) => "admin-retryable",
        OperatorError::AdminFatal(_) => "admin-fatal",
        OperatorError::Bootstrap(_) => "bootstrap",
        OperatorError::Auth(_) => "auth",
        OperatorError::Timeout(_) => "timeout",
        OperatorError::NoPrimary => "no-primary",
        OperatorError::Wire(_) => "wire",
        OperatorError::Io(_) => "io",
        OperatorError::Http(_) => "http",
        OperatorError::Serialization(_) => "serialization",
        OperatorError::Internal(_) => "internal",
    }
}
