//! Configuration for the mongoswarm operator.
//!
//! All domain configuration comes from environment variables; a missing or
//! malformed variable is fatal at startup and nowhere else. Variable names
//! are matched case-insensitively, mirroring how the deployment scripts set
//! them.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{OperatorError, Result};

/// Environment variables without which the operator cannot run.
const REQUIRED_VARS: &[&str] = &[
    "OVERLAY_NETWORK_NAME",
    "MONGO_SERVICE_NAME",
    "REPLICASET_NAME",
    "MONGO_ROOT_USERNAME",
    "MONGO_ROOT_PASSWORD",
    "INITDB_DATABASE",
    "INITDB_USER",
    "INITDB_PASSWORD",
];

/// Root account credentials used for authenticated admin calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootCredentials {
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
}

/// Operator settings, resolved once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Overlay network member IPs are resolved on.
    pub overlay_network_name: String,
    /// Swarm service whose tasks are the MongoDB instances.
    pub mongo_service_name: String,
    /// Replica set name used in every submitted config.
    pub replicaset_name: String,
    /// Member port.
    pub mongo_port: u16,
    /// Root account created at bootstrap and used afterwards.
    pub root: RootCredentials,
    /// Application database seeded at bootstrap.
    pub initdb_database: String,
    /// Application user seeded at bootstrap.
    pub initdb_user: String,
    #[serde(skip_serializing)]
    pub initdb_password: String,
    /// Docker Engine API endpoint.
    pub docker_endpoint: String,
    /// Verbose logging toggle (`DEBUG=1`).
    pub debug: bool,
    /// Reconciliation cadence.
    pub cycle_interval: Duration,
    /// Maximum wait for a writable primary to emerge.
    pub election_timeout: Duration,
    /// Per-probe timeout.
    pub probe_timeout: Duration,
    /// Re-checks of a transient node within one cycle.
    pub probe_retries: u32,
    /// Extra consecutive cycles a member-count decrease must persist
    /// before a removal is applied. 0 disables the hold.
    pub downscale_hold_cycles: u32,
    /// Startup-gate attempts (10 s apart) waiting for the service.
    pub startup_wait_attempts: u32,
}

impl Settings {
    /// Resolve settings from the process environment.
    pub fn from_env() -> Result<Self> {
        let missing: Vec<&str> = REQUIRED_VARS
            .iter()
            .copied()
            .filter(|name| lookup(name).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(OperatorError::Config(format!(
                "missing required environment variables: {}",
                missing.join(", ")
            )));
        }

        let required =
            |name: &str| lookup(name).expect("required variables checked above");

        let settings = Self {
            overlay_network_name: required("OVERLAY_NETWORK_NAME"),
            mongo_service_name: required("MONGO_SERVICE_NAME"),
            replicaset_name: required("REPLICASET_NAME"),
            mongo_port: parse_var("MONGO_PORT", 27017)?,
            root: RootCredentials {
                username: required("MONGO_ROOT_USERNAME"),
                password: required("MONGO_ROOT_PASSWORD"),
            },
            initdb_database: required("INITDB_DATABASE"),
            initdb_user: required("INITDB_USER"),
            initdb_password: required("INITDB_PASSWORD"),
            docker_endpoint: docker_endpoint_from_env(),
            debug: lookup("DEBUG").as_deref() == Some("1"),
            cycle_interval: Duration::from_secs(parse_var("CYCLE_INTERVAL_SEC", 30u64)?),
            election_timeout: Duration::from_secs(parse_var("ELECTION_TIMEOUT_SEC", 60u64)?),
            probe_timeout: Duration::from_secs(parse_var("PROBE_TIMEOUT_SEC", 5u64)?),
            probe_retries: parse_var("PROBE_RETRIES", 3u32)?,
            downscale_hold_cycles: parse_var("DOWNSCALE_HOLD_CYCLES", 1u32)?,
            startup_wait_attempts: parse_var("STARTUP_WAIT_ATTEMPTS", 40u32)?,
        };

        settings.validate()?;
        Ok(settings)
    }

    /// Validate cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.mongo_port == 0 {
            return Err(OperatorError::InvalidConfig {
                field: "MONGO_PORT".to_string(),
                reason: "port must be non-zero".to_string(),
            });
        }
        if self.cycle_interval.is_zero() {
            return Err(OperatorError::InvalidConfig {
                field: "CYCLE_INTERVAL_SEC".to_string(),
                reason: "interval must be non-zero".to_string(),
            });
        }
        if self.replicaset_name.is_empty() {
            return Err(OperatorError::InvalidConfig {
                field: "REPLICASET_NAME".to_string(),
                reason: "name must be non-empty".to_string(),
            });
        }
        Ok(())
    }

    /// Overall deadline for one reconciliation cycle.
    pub fn cycle_deadline(&self) -> Duration {
        self.cycle_interval * 3
    }
}

/// Case-insensitive environment lookup.
fn lookup(name: &str) -> Option<String> {
    std::env::vars()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v)
}

fn parse_var<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|e| OperatorError::InvalidConfig {
            field: name.to_string(),
            reason: format!("{e}: {raw:?}"),
        }),
    }
}

/// `DOCKER_HOST`/`DOCKER_ENDPOINT` with `tcp://` normalized to `http://`.
fn docker_endpoint_from_env() -> String {
    let raw = lookup("DOCKER_ENDPOINT")
        .or_else(|| lookup("DOCKER_HOST"))
        .unwrap_or_else(|| "http://localhost:2375".to_string());
    match raw.strip_prefix("tcp://") {
        Some(rest) => format!("http://{rest}"),
        None => raw,
    }
}
