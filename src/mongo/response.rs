//! Typed views of admin command responses.
//!
//! Responses are dynamic documents; these wrappers pull out the fields the
//! operator acts on and ignore everything else.

use super::document::{Document, Value};
use crate::error::{AdminFailure, OperatorError, Result};
use crate::types::{MemberSpec, ReplicaSetConfig};

/// Interpret a command reply: `ok: 1` passes the document through, anything
/// else becomes an [`AdminFailure`] carrying `code`/`codeName`/`errmsg`.
pub fn check_ok(reply: Document) -> Result<Document> {
    if reply.get_f64("ok") == Some(1.0) {
        return Ok(reply);
    }
    let failure = AdminFailure {
        code: reply.get_i64("code").map(|c| c as i32),
        code_name: reply.get_str("codeName").map(str::to_string),
        message: reply
            .get_str("errmsg")
            .unwrap_or("command returned ok: 0")
            .to_string(),
    };
    Err(failure.into_error())
}

/// Response to `hello`.
#[derive(Debug, Clone, Default)]
pub struct HelloResponse {
    /// This node accepts writes (it is the replica set primary).
    pub is_writable_primary: bool,
    /// Replica set name, absent on uninitialized nodes.
    pub set_name: Option<String>,
    /// `host:port` of the primary this node knows about, if any.
    pub primary: Option<String>,
    /// This node's own `host:port` as it appears in the config.
    pub me: Option<String>,
}

impl HelloResponse {
    pub fn from_document(doc: &Document) -> Self {
        Self {
            is_writable_primary: doc.get_bool("isWritablePrimary").unwrap_or(false),
            set_name: doc.get_str("setName").map(str::to_string),
            primary: doc.get_str("primary").map(str::to_string),
            me: doc.get_str("me").map(str::to_string),
        }
    }
}

/// Replica set member states from `replSetGetStatus.myState`.
pub mod member_state {
    pub const STARTUP: i64 = 0;
    pub const PRIMARY: i64 = 1;
    pub const SECONDARY: i64 = 2;
    pub const RECOVERING: i64 = 3;
    pub const STARTUP2: i64 = 5;
    pub const ROLLBACK: i64 = 9;

    /// States in which the member is present but not yet serving.
    pub fn is_settling(state: i64) -> bool {
        matches!(state, STARTUP | STARTUP2 | RECOVERING | ROLLBACK)
    }
}

/// Response to `replSetGetStatus`.
#[derive(Debug, Clone, Default)]
pub struct StatusResponse {
    pub set_name: Option<String>,
    /// This node's own member state.
    pub my_state: Option<i64>,
}

impl StatusResponse {
    pub fn from_document(doc: &Document) -> Self {
        Self {
            set_name: doc.get_str("set").map(str::to_string),
            my_state: doc.get_i64("myState"),
        }
    }

    pub fn is_settling(&self) -> bool {
        self.my_state.is_some_and(member_state::is_settling)
    }
}

/// Serialize a [`ReplicaSetConfig`] into the wire document
/// `replSetInitiate`/`replSetReconfig` expect.
pub fn config_to_document(config: &ReplicaSetConfig) -> Document {
    let members: Vec<Value> = config
        .members
        .iter()
        .map(|m| {
            let mut doc = Document::new()
                .push("_id", m.id as i32)
                .push("host", m.host.as_str());
            if let Some(priority) = m.priority {
                doc.insert("priority", priority);
            }
            if let Some(votes) = m.votes {
                doc.insert("votes", votes);
            }
            Value::Document(doc)
        })
        .collect();

    Document::new()
        .push("_id", config.name.as_str())
        .push("version", config.version as i64)
        .push("members", members)
}

/// Parse the `config` sub-document of a `replSetGetConfig` reply.
pub fn config_from_document(doc: &Document) -> Result<ReplicaSetConfig> {
    let config = doc
        .get_document("config")
        .ok_or_else(|| OperatorError::Wire("replSetGetConfig reply missing config".into()))?;

    let name = config
        .get_str("_id")
        .ok_or_else(|| OperatorError::Wire("replica set config missing _id".into()))?
        .to_string();
    let version = config
        .get_i64("version")
        .ok_or_else(|| OperatorError::Wire("replica set config missing version".into()))?
        as u64;

    let mut members = Vec::new();
    for value in config.get_array("members").unwrap_or(&[]) {
        let member = value
            .as_document()
            .ok_or_else(|| OperatorError::Wire("non-document member entry".into()))?;
        let id = member
            .get_i64("_id")
            .ok_or_else(|| OperatorError::Wire("member missing _id".into()))? as u32;
        let host = member
            .get_str("host")
            .ok_or_else(|| OperatorError::Wire("member missing host".into()))?
            .to_string();

        members.push(MemberSpec {
            id,
            host,
            priority: member.get_f64("priority"),
            votes: member.get_i64("votes").map(|v| v as i32),
        });
    }

    Ok(ReplicaSetConfig {
        name,
        version,
        members,
    })
}
