//! Production [`MongoAdmin`] implementation over the OP_MSG wire client.
//!
//! Connections are opened per call and dropped with it; the operator never
//! holds a client across cycles. Authentication, when requested, is a
//! SCRAM-SHA-256 conversation on the same connection before the command.

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use super::document::{Document, Value};
use super::response::{check_ok, config_from_document, config_to_document};
use super::scram::ScramClient;
use super::wire::Connection;
use super::{HelloResponse, MongoAdmin, Role, StatusResponse};
use crate::config::RootCredentials;
use crate::error::{OperatorError, Result};
use crate::types::{NodeEndpoint, ReplicaSetConfig};

/// Direct wire-protocol admin client.
#[derive(Debug, Clone)]
pub struct WireAdmin {
    op_timeout: Duration,
}

impl WireAdmin {
    pub fn new(op_timeout: Duration) -> Self {
        Self { op_timeout }
    }

    /// Open a connection, authenticating first when credentials are given.
    async fn connect(
        &self,
        endpoint: NodeEndpoint,
        creds: Option<&RootCredentials>,
    ) -> Result<Connection> {
        let mut conn = Connection::connect(endpoint, self.op_timeout).await?;
        if let Some(creds) = creds {
            authenticate(&mut conn, creds).await?;
        }
        Ok(conn)
    }

    /// One-shot command against `endpoint`.
    async fn run(
        &self,
        endpoint: NodeEndpoint,
        creds: Option<&RootCredentials>,
        command: Document,
    ) -> Result<Document> {
        let mut conn = self.connect(endpoint, creds).await?;
        let reply = conn.run_command(&command).await?;
        check_ok(reply)
    }
}

#[async_trait]
impl MongoAdmin for WireAdmin {
    async fn hello(
        &self,
        endpoint: NodeEndpoint,
        creds: Option<&RootCredentials>,
    ) -> Result<HelloResponse> {
        let command = Document::new().push("hello", 1i32).push("$db", "admin");
        let reply = self.run(endpoint, creds, command).await?;
        Ok(HelloResponse::from_document(&reply))
    }

    async fn repl_set_get_status(
        &self,
        endpoint: NodeEndpoint,
        creds: Option<&RootCredentials>,
    ) -> Result<StatusResponse> {
        let command = Document::new()
            .push("replSetGetStatus", 1i32)
            .push("$db", "admin");
        let reply = self.run(endpoint, creds, command).await?;
        Ok(StatusResponse::from_document(&reply))
    }

    async fn repl_set_get_config(
        &self,
        endpoint: NodeEndpoint,
        creds: Option<&RootCredentials>,
    ) -> Result<ReplicaSetConfig> {
        let command = Document::new()
            .push("replSetGetConfig", 1i32)
            .push("$db", "admin");
        let reply = self.run(endpoint, creds, command).await?;
        config_from_document(&reply)
    }

    async fn repl_set_initiate(
        &self,
        endpoint: NodeEndpoint,
        config: &ReplicaSetConfig,
    ) -> Result<()> {
        let command = Document::new()
            .push("replSetInitiate", config_to_document(config))
            .push("$db", "admin");
        debug!(endpoint = %endpoint, version = config.version, "replSetInitiate");
        self.run(endpoint, None, command).await?;
        Ok(())
    }

    async fn repl_set_reconfig(
        &self,
        endpoint: NodeEndpoint,
        config: &ReplicaSetConfig,
        force: bool,
        creds: Option<&RootCredentials>,
    ) -> Result<()> {
        let command = Document::new()
            .push("replSetReconfig", config_to_document(config))
            .push("force", force)
            .push("$db", "admin");
        debug!(endpoint = %endpoint, version = config.version, force, "replSetReconfig");
        self.run(endpoint, creds, command).await?;
        Ok(())
    }

    async fn create_user(
        &self,
        endpoint: NodeEndpoint,
        db: &str,
        username: &str,
        password: &str,
        roles: &[Role],
        creds: Option<&RootCredentials>,
    ) -> Result<()> {
        let roles: Vec<Value> = roles
            .iter()
            .map(|r| match &r.db {
                None => Value::from(r.role.as_str()),
                Some(db) => Value::Document(
                    Document::new()
                        .push("role", r.role.as_str())
                        .push("db", db.as_str()),
                ),
            })
            .collect();

        let command = Document::new()
            .push("createUser", username)
            .push("pwd", password)
            .push("roles", roles)
            .push("$db", db);
        self.run(endpoint, creds, command).await?;
        Ok(())
    }

    async fn insert_document(
        &self,
        endpoint: NodeEndpoint,
        db: &str,
        collection: &str,
        document: Document,
        creds: Option<&RootCredentials>,
    ) -> Result<()> {
        let command = Document::new()
            .push("insert", collection)
            .push("documents", vec![Value::Document(document)])
            .push("$db", db);
        self.run(endpoint, creds, command).await?;
        Ok(())
    }

    async fn admin_user_count(
        &self,
        endpoint: NodeEndpoint,
        creds: Option<&RootCredentials>,
    ) -> Result<usize> {
        let command = Document::new()
            .push("usersInfo", 1i32)
            .push("$db", "admin");
        let reply = self.run(endpoint, creds, command).await?;
        Ok(reply.get_array("users").map(|users| users.len()).unwrap_or(0))
    }
}

/// Run the SCRAM-SHA-256 conversation on `conn`.
async fn authenticate(conn: &mut Connection, creds: &RootCredentials) -> Result<()> {
    let mut scram = ScramClient::new(&creds.username, &creds.password);

    let start = Document::new()
        .push("saslStart", 1i32)
        .push("mechanism", "SCRAM-SHA-256")
        .push(
            "payload",
            Value::Binary {
                subtype: 0,
                bytes: scram.client_first().into_bytes(),
            },
        )
        .push("options", Document::new().push("skipEmptyExchange", true))
        .push("$db", "admin");

    let reply = check_ok(conn.run_command(&start).await?)?;
    let conversation_id = reply.get_i64("conversationId").unwrap_or(1);
    let server_first = payload_str(&reply)?;

    let client_final = scram.client_final(&server_first)?;
    let cont = Document::new()
        .push("saslContinue", 1i32)
        .push("conversationId", conversation_id as i32)
        .push(
            "payload",
            Value::Binary {
                subtype: 0,
                bytes: client_final.into_bytes(),
            },
        )
        .push("$db", "admin");

    let mut reply = check_ok(conn.run_command(&cont).await?)?;
    scram.verify_server_final(&payload_str(&reply)?)?;

    // Servers not honoring skipEmptyExchange need one empty round to close.
    while !reply.get_bool("done").unwrap_or(true) {
        let finish = Document::new()
            .push("saslContinue", 1i32)
            .push("conversationId", conversation_id as i32)
            .push(
                "payload",
                Value::Binary {
                    subtype: 0,
                    bytes: Vec::new(),
                },
            )
            .push("$db", "admin");
        reply = check_ok(conn.run_command(&finish).await?)?;
    }

    debug!(endpoint = %conn.endpoint(), user = %scram.username(), "authenticated");
    Ok(())
}

fn payload_str(reply: &Document) -> Result<String> {
    match reply.get("payload") {
        Some(Value::Binary { bytes, .. }) => String::from_utf8(bytes.clone())
            .map_err(|e| OperatorError::Auth(format!("non-utf8 sasl payload: {e}"))),
        Some(Value::String(s)) => Ok(s.clone()),
        _ => Err(OperatorError::Auth("sasl reply missing payload".into())),
    }
}
