//! Account bootstrap: root user, application database, application user.
//!
//! Runs after the first successful initiate and is retried on later cycles
//! until it completes. Every step is idempotent: existing users and an
//! already-seeded database are no-ops, so a crash between steps heals on
//! the next attempt.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::Settings;
use crate::error::{code, OperatorError, Result};
use crate::mongo::{Document, MongoAdmin, Role};
use crate::types::NodeEndpoint;

/// Collection the seed document lands in, matching what downstream
/// applications expect to find in the initial database.
const SEED_COLLECTION: &str = "users";

/// Creates the administrative and application accounts.
pub struct AccountBootstrapper<M: MongoAdmin> {
    admin: Arc<M>,
    settings: Arc<Settings>,
}

impl<M: MongoAdmin> AccountBootstrapper<M> {
    pub fn new(admin: Arc<M>, settings: Arc<Settings>) -> Self {
        Self { admin, settings }
    }

    /// Run the bootstrap sequence against `primary`.
    ///
    /// Returns `Ok(())` once all accounts exist, whether or not this call
    /// created them.
    pub async fn run(&self, primary: NodeEndpoint) -> Result<()> {
        self.ensure_root(primary).await?;
        self.ensure_app_database(primary).await?;
        self.ensure_app_user(primary).await?;
        info!(
            user = %self.settings.initdb_user,
            database = %self.settings.initdb_database,
            "account bootstrap complete"
        );
        Ok(())
    }

    /// Create the root user through the localhost exception, unless users
    /// already exist.
    async fn ensure_root(&self, primary: NodeEndpoint) -> Result<()> {
        match self.admin.admin_user_count(primary, None).await {
            Ok(0) => {}
            Ok(count) => {
                debug!(count, "admin users already present, skipping root creation");
                return Ok(());
            }
            Err(e) if code::is_auth(e.admin_code()) || matches!(e, OperatorError::Auth(_)) => {
                // The exception has closed: accounts exist from a previous
                // deployment of this cluster.
                debug!("usersInfo requires auth, root account already provisioned");
                return Ok(());
            }
            Err(e) => return Err(OperatorError::Bootstrap(e.to_string())),
        }

        info!(user = %self.settings.root.username, "creating root user");
        match self
            .admin
            .create_user(
                primary,
                "admin",
                &self.settings.root.username,
                &self.settings.root.password,
                &[Role::root()],
                None,
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if user_already_exists(&e) => {
                debug!("root user already exists");
                Ok(())
            }
            Err(e) => Err(OperatorError::Bootstrap(format!("create root: {e}"))),
        }
    }

    /// Materialize the application database by inserting the seed document.
    async fn ensure_app_database(&self, primary: NodeEndpoint) -> Result<()> {
        let seed = Document::new()
            .push("_id", self.settings.initdb_user.as_str())
            .push("name", self.settings.initdb_user.as_str())
            .push("createdAt", Utc::now().to_rfc3339());

        match self
            .admin
            .insert_document(
                primary,
                &self.settings.initdb_database,
                SEED_COLLECTION,
                seed,
                Some(&self.settings.root),
            )
            .await
        {
            Ok(()) => {
                debug!(database = %self.settings.initdb_database, "seed document inserted");
                Ok(())
            }
            Err(e) if e.admin_code() == Some(code::DUPLICATE_KEY) => {
                debug!("database already seeded");
                Ok(())
            }
            Err(e) => Err(OperatorError::Bootstrap(format!("seed database: {e}"))),
        }
    }

    /// Create the application user with readWrite on the initial database.
    async fn ensure_app_user(&self, primary: NodeEndpoint) -> Result<()> {
        info!(
            user = %self.settings.initdb_user,
            database = %self.settings.initdb_database,
            "creating application user"
        );
        match self
            .admin
            .create_user(
                primary,
                &self.settings.initdb_database,
                &self.settings.initdb_user,
                &self.settings.initdb_password,
                &[Role::read_write(&self.settings.initdb_database)],
                Some(&self.settings.root),
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if user_already_exists(&e) => {
                debug!("application user already exists");
                Ok(())
            }
            Err(e) => Err(OperatorError::Bootstrap(format!("create app user: {e}"))),
        }
    }
}

fn user_already_exists(e: &OperatorError) -> bool {
    e.admin_code() == Some(code::USER_ALREADY_EXISTS)
}
