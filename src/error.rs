//! Error types for the mongoswarm operator.
//!
//! A single [`OperatorError`] enum covers the whole crate, organized around
//! how an error propagates rather than where it originated:
//!
//! - **Config**: invalid or missing configuration, fatal at startup
//! - **Observe**: orchestrator API failures, abandon the cycle and retry next
//! - **Probe**: per-node failures, reflected in the node's observed state
//! - **AdminRetryable / AdminFatal**: MongoDB admin command outcomes
//! - **Bootstrap**: account creation failures, retried on later cycles
//!
//! [`OperatorError::is_retryable`] is what the retry layer consults; nothing
//! else inspects variants to decide whether to try again.

use std::io;
use thiserror::Error;

/// Main error type for operator activities.
#[derive(Error, Debug)]
pub enum OperatorError {
    // Startup errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    // Orchestrator observation errors
    #[error("Swarm observation failed: {0}")]
    Observe(String),

    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("Ambiguous service name: {0}")]
    AmbiguousService(String),

    // Per-node probe errors
    #[error("Probe failed for {endpoint}: {reason}")]
    Probe { endpoint: String, reason: String },

    // MongoDB admin command errors
    #[error("Admin command failed (retryable): {0}")]
    AdminRetryable(AdminFailure),

    #[error("Admin command rejected: {0}")]
    AdminFatal(AdminFailure),

    #[error("Authentication failed: {0}")]
    Auth(String),

    // Account bootstrap errors
    #[error("Account bootstrap failed: {0}")]
    Bootstrap(String),

    // Infrastructure errors
    #[error("Operation timed out after {0}ms")]
    Timeout(u64),

    #[error("Wire protocol error: {0}")]
    Wire(String),

    #[error("No primary elected within the election timeout")]
    NoPrimary,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl OperatorError {
    /// Check if the operation that produced this error may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OperatorError::AdminRetryable(_)
                | OperatorError::Timeout(_)
                | OperatorError::NoPrimary
                | OperatorError::Observe(_)
                | OperatorError::Io(_)
                | OperatorError::Http(_)
        )
    }

    /// Server error code, if this error carries a MongoDB response.
    pub fn admin_code(&self) -> Option<i32> {
        match self {
            OperatorError::AdminRetryable(f) | OperatorError::AdminFatal(f) => f.code,
            _ => None,
        }
    }
}

impl From<serde_json::Error> for OperatorError {
    fn from(e: serde_json::Error) -> Self {
        OperatorError::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for OperatorError {
    fn from(e: reqwest::Error) -> Self {
        OperatorError::Http(e.to_string())
    }
}

/// A non-ok MongoDB command response: `{ok: 0, code, codeName, errmsg}`.
#[derive(Debug, Clone)]
pub struct AdminFailure {
    /// Numeric server error code, when present.
    pub code: Option<i32>,
    /// Symbolic code name, when present.
    pub code_name: Option<String>,
    /// Server error message.
    pub message: String,
}

impl std::fmt::Display for AdminFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.code, self.code_name.as_deref()) {
            (Some(code), Some(name)) => write!(f, "{} ({} {})", self.message, name, code),
            (Some(code), None) => write!(f, "{} (code {})", self.message, code),
            _ => write!(f, "{}", self.message),
        }
    }
}

impl AdminFailure {
    /// Wrap this failure in the right error variant for its code.
    pub fn into_error(self) -> OperatorError {
        if code::is_fatal(self.code) {
            OperatorError::AdminFatal(self)
        } else {
            OperatorError::AdminRetryable(self)
        }
    }
}

/// MongoDB server error codes the operator reacts to.
///
/// Only the codes that change control flow are named; everything else is
/// classified by the coarse predicates below.
pub mod code {
    /// `NotYetInitialized`: no replica set config received by this node yet.
    pub const NOT_YET_INITIALIZED: i32 = 94;
    /// `NodeNotFound`: the node is not in the config it was asked about.
    pub const NODE_NOT_FOUND: i32 = 74;
    /// `NotWritablePrimary` (legacy "not master").
    pub const NOT_WRITABLE_PRIMARY: i32 = 10107;
    /// `NotPrimaryOrSecondary`: member is starting up or rolling back.
    pub const NOT_PRIMARY_OR_SECONDARY: i32 = 13436;
    /// `PrimarySteppedDown`.
    pub const PRIMARY_STEPPED_DOWN: i32 = 189;
    /// `InterruptedDueToReplStateChange`.
    pub const INTERRUPTED_REPL_STATE_CHANGE: i32 = 11602;
    /// `Unauthorized`.
    pub const UNAUTHORIZED: i32 = 13;
    /// `AuthenticationFailed`.
    pub const AUTHENTICATION_FAILED: i32 = 18;
    /// Duplicate user on `createUser`.
    pub const USER_ALREADY_EXISTS: i32 = 51003;
    /// `DuplicateKey` on insert.
    pub const DUPLICATE_KEY: i32 = 11000;
    /// `InvalidReplicaSetConfig`.
    pub const INVALID_RS_CONFIG: i32 = 93;
    /// `NewReplicaSetConfigurationIncompatible`.
    pub const NEW_RS_CONFIG_INCOMPATIBLE: i32 = 103;
    /// `ConfigurationInProgress`.
    pub const CONFIGURATION_IN_PROGRESS: i32 = 109;
    /// `CurrentConfigNotCommittedYet`.
    pub const CONFIG_NOT_COMMITTED: i32 = 308;

    /// Codes indicating MongoDB is still settling into replica set
    /// membership; the prober treats these as transient.
    pub fn is_transient(code: Option<i32>) -> bool {
        matches!(
            code,
            Some(NOT_YET_INITIALIZED)
                | Some(NODE_NOT_FOUND)
                | Some(NOT_PRIMARY_OR_SECONDARY)
                | Some(INTERRUPTED_REPL_STATE_CHANGE)
        )
    }

    /// Codes meaning "this member cannot take the write, another can":
    /// the actuator re-probes for the primary and retries.
    pub fn is_primary_loss(code: Option<i32>) -> bool {
        matches!(
            code,
            Some(NOT_WRITABLE_PRIMARY)
                | Some(PRIMARY_STEPPED_DOWN)
                | Some(INTERRUPTED_REPL_STATE_CHANGE)
        )
    }

    /// Codes meaning the submitted configuration itself was rejected;
    /// retrying the same document cannot succeed.
    pub fn is_fatal(code: Option<i32>) -> bool {
        matches!(
            code,
            Some(INVALID_RS_CONFIG) | Some(NEW_RS_CONFIG_INCOMPATIBLE)
        )
    }

    /// Auth-related codes, expected before account bootstrap has run.
    pub fn is_auth(code: Option<i32>) -> bool {
        matches!(code, Some(UNAUTHORIZED) | Some(AUTHENTICATION_FAILED))
    }
}

/// Result type alias for operator activities.
pub type Result<T> = std::result::Result<T, OperatorError>;
