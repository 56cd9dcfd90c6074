//! MongoDB admin access.
//!
//! The operator consumes a handful of admin commands, captured by the
//! [`MongoAdmin`] trait: `hello`, `replSetGetStatus`, `replSetGetConfig`,
//! `replSetInitiate`, `replSetReconfig`, `createUser`, `insert`, and
//! `usersInfo`. [`WireAdmin`] is the production implementation (a direct
//! OP_MSG client); tests substitute an in-memory cluster.

pub mod document;
mod response;
mod scram;
mod wire;

mod client;

pub use client::WireAdmin;
pub use document::{Document, Value};
pub use response::{
    check_ok, config_from_document, config_to_document, member_state, HelloResponse,
    StatusResponse,
};

use async_trait::async_trait;

use crate::config::RootCredentials;
use crate::error::Result;
use crate::types::{NodeEndpoint, ReplicaSetConfig};

/// A role granted on user creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Role {
    pub role: String,
    /// Target database; `None` grants on the database the user is created in.
    pub db: Option<String>,
}

impl Role {
    pub fn root() -> Self {
        Self {
            role: "root".to_string(),
            db: None,
        }
    }

    pub fn read_write(db: impl Into<String>) -> Self {
        Self {
            role: "readWrite".to_string(),
            db: Some(db.into()),
        }
    }
}

/// The replica-set admin surface the operator drives.
///
/// Every call targets one endpoint directly. `creds` selects an
/// authenticated connection; `None` is used before account bootstrap (and
/// for `hello`, which servers answer unauthenticated).
#[async_trait]
pub trait MongoAdmin: Send + Sync {
    async fn hello(
        &self,
        endpoint: NodeEndpoint,
        creds: Option<&RootCredentials>,
    ) -> Result<HelloResponse>;

    async fn repl_set_get_status(
        &self,
        endpoint: NodeEndpoint,
        creds: Option<&RootCredentials>,
    ) -> Result<StatusResponse>;

    async fn repl_set_get_config(
        &self,
        endpoint: NodeEndpoint,
        creds: Option<&RootCredentials>,
    ) -> Result<ReplicaSetConfig>;

    /// `replSetInitiate` is only ever issued unauthenticated: it is the
    /// first write against a brand-new deployment.
    async fn repl_set_initiate(
        &self,
        endpoint: NodeEndpoint,
        config: &ReplicaSetConfig,
    ) -> Result<()>;

    async fn repl_set_reconfig(
        &self,
        endpoint: NodeEndpoint,
        config: &ReplicaSetConfig,
        force: bool,
        creds: Option<&RootCredentials>,
    ) -> Result<()>;

    async fn create_user(
        &self,
        endpoint: NodeEndpoint,
        db: &str,
        username: &str,
        password: &str,
        roles: &[Role],
        creds: Option<&RootCredentials>,
    ) -> Result<()>;

    /// Insert one document, creating collection and database as needed.
    async fn insert_document(
        &self,
        endpoint: NodeEndpoint,
        db: &str,
        collection: &str,
        document: Document,
        creds: Option<&RootCredentials>,
    ) -> Result<()>;

    /// Number of users in the `admin` database.
    async fn admin_user_count(
        &self,
        endpoint: NodeEndpoint,
        creds: Option<&RootCredentials>,
    ) -> Result<usize>;
}
