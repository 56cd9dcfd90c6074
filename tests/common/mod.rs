//! In-memory simulation of both external seams: a swarm task list and a
//! MongoDB cluster. The supervisor runs unmodified against these fakes, so
//! the scenarios exercise the real observe/probe/classify/plan/apply path.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mongoswarm::config::{RootCredentials, Settings};
use mongoswarm::error::{code, AdminFailure, OperatorError, Result};
use mongoswarm::mongo::{Document, HelloResponse, MongoAdmin, Role, StatusResponse};
use mongoswarm::swarm::{Network, Node, Service, SwarmApi, Task};
use mongoswarm::types::{NodeEndpoint, ReplicaSetConfig};

pub const PORT: u16 = 27017;

pub fn ep(ip: &str) -> NodeEndpoint {
    NodeEndpoint::new(ip.parse().unwrap(), PORT)
}

pub fn test_settings() -> Settings {
    Settings {
        overlay_network_name: "backend".to_string(),
        mongo_service_name: "mongo".to_string(),
        replicaset_name: "rs0".to_string(),
        mongo_port: PORT,
        root: RootCredentials {
            username: "root".to_string(),
            password: "rootpass".to_string(),
        },
        initdb_database: "myinitdatabase".to_string(),
        initdb_user: "mydbuser".to_string(),
        initdb_password: "mydbpass".to_string(),
        docker_endpoint: "http://localhost:2375".to_string(),
        debug: false,
        cycle_interval: Duration::from_secs(30),
        election_timeout: Duration::from_secs(60),
        probe_timeout: Duration::from_secs(1),
        probe_retries: 2,
        downscale_hold_cycles: 1,
        startup_wait_attempts: 3,
    }
}

// ============================================================================
// Swarm simulation
// ============================================================================

#[derive(Default)]
struct SwarmView {
    /// Tasks in running state, with overlay addresses.
    running: Vec<Ipv4Addr>,
    /// Tasks assigned but not yet running (count toward expected).
    starting: Vec<Ipv4Addr>,
}

/// A global-mode service: one task per node, expected count follows the
/// assigned schedulable nodes.
#[derive(Clone, Default)]
pub struct SimSwarm {
    view: Arc<Mutex<SwarmView>>,
}

impl SimSwarm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_running(&self, ips: &[&str]) {
        let mut view = self.view.lock().unwrap();
        view.running = ips.iter().map(|s| s.parse().unwrap()).collect();
    }

    pub fn set_starting(&self, ips: &[&str]) {
        let mut view = self.view.lock().unwrap();
        view.starting = ips.iter().map(|s| s.parse().unwrap()).collect();
    }
}

#[async_trait]
impl SwarmApi for SimSwarm {
    async fn service(&self, name: &str) -> Result<Service> {
        Ok(serde_json::from_value(serde_json::json!({
            "ID": "sim-service",
            "Spec": {"Name": name, "Mode": {"Global": {}}}
        }))
        .unwrap())
    }

    async fn service_tasks(&self, _service_id: &str) -> Result<Vec<Task>> {
        let view = self.view.lock().unwrap();
        let mut tasks = Vec::new();
        for (i, ip) in view.running.iter().enumerate() {
            tasks.push(serde_json::json!({
                "ID": format!("task-run-{i}"),
                "NodeID": format!("node-run-{i}"),
                "DesiredState": "running",
                "Status": {"State": "running"},
                "NetworksAttachments": [{
                    "Network": {"Spec": {"Name": "backend"}},
                    "Addresses": [format!("{ip}/24")]
                }]
            }));
        }
        for (i, ip) in view.starting.iter().enumerate() {
            tasks.push(serde_json::json!({
                "ID": format!("task-start-{i}"),
                "NodeID": format!("node-start-{i}"),
                "DesiredState": "running",
                "Status": {"State": "preparing"},
                "NetworksAttachments": [{
                    "Network": {"Spec": {"Name": "backend"}},
                    "Addresses": [format!("{ip}/24")]
                }]
            }));
        }
        Ok(serde_json::from_value(serde_json::Value::Array(tasks)).unwrap())
    }

    async fn nodes(&self) -> Result<Vec<Node>> {
        let view = self.view.lock().unwrap();
        let mut nodes = Vec::new();
        for i in 0..view.running.len() {
            nodes.push(serde_json::json!({
                "ID": format!("node-run-{i}"),
                "Spec": {"Availability": "active"},
                "Status": {"State": "ready"}
            }));
        }
        for i in 0..view.starting.len() {
            nodes.push(serde_json::json!({
                "ID": format!("node-start-{i}"),
                "Spec": {"Availability": "active"},
                "Status": {"State": "ready"}
            }));
        }
        Ok(serde_json::from_value(serde_json::Value::Array(nodes)).unwrap())
    }

    async fn network(&self, name: &str) -> Result<Network> {
        Ok(serde_json::from_value(serde_json::json!({
            "Id": "sim-network",
            "Name": name,
            "IPAM": {"Config": [{"Subnet": "10.0.0.0/16"}]}
        }))
        .unwrap())
    }
}

// ============================================================================
// MongoDB cluster simulation
// ============================================================================

#[derive(Clone)]
pub enum SimNode {
    /// Up, no replica set config (`NotYetInitialized` on config reads).
    Blank,
    /// Carries a local config.
    Member {
        config: ReplicaSetConfig,
        primary: bool,
    },
    /// Connection attempts fail.
    Down,
}

#[derive(Default)]
pub struct SimState {
    pub nodes: BTreeMap<NodeEndpoint, SimNode>,
    /// `(username, password)` pairs in the admin database.
    pub admin_users: Vec<(String, String)>,
    /// `(db, username)` application users.
    pub db_users: BTreeSet<(String, String)>,
    /// `(db, collection, _id)` of inserted documents.
    pub documents: BTreeSet<(String, String, String)>,
    pub initiate_count: u32,
    pub reconfig_count: u32,
    pub force_reconfig_count: u32,
}

/// Shared simulated cluster implementing [`MongoAdmin`].
#[derive(Clone, Default)]
pub struct SimCluster {
    state: Arc<Mutex<SimState>>,
}

impl SimCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_blank(&self, ip: &str) {
        self.state.lock().unwrap().nodes.insert(ep(ip), SimNode::Blank);
    }

    pub fn add_member(&self, ip: &str, config: ReplicaSetConfig, primary: bool) {
        self.state
            .lock()
            .unwrap()
            .nodes
            .insert(ep(ip), SimNode::Member { config, primary });
    }

    pub fn add_down(&self, ip: &str) {
        self.state.lock().unwrap().nodes.insert(ep(ip), SimNode::Down);
    }

    pub fn seed_root_user(&self, username: &str, password: &str) {
        self.state
            .lock()
            .unwrap()
            .admin_users
            .push((username.to_string(), password.to_string()));
    }

    pub fn with_state<T>(&self, f: impl FnOnce(&SimState) -> T) -> T {
        f(&self.state.lock().unwrap())
    }

    /// The config as seen by the given node, if it is a member.
    pub fn config_of(&self, ip: &str) -> Option<ReplicaSetConfig> {
        match self.state.lock().unwrap().nodes.get(&ep(ip)) {
            Some(SimNode::Member { config, .. }) => Some(config.clone()),
            _ => None,
        }
    }

    pub fn primary_ip(&self) -> Option<String> {
        self.state.lock().unwrap().nodes.iter().find_map(|(e, n)| {
            matches!(n, SimNode::Member { primary: true, .. }).then(|| e.ip.to_string())
        })
    }

    fn admin_error(code: i32, message: &str) -> OperatorError {
        AdminFailure {
            code: Some(code),
            code_name: None,
            message: message.to_string(),
        }
        .into_error()
    }

    fn connection_refused() -> OperatorError {
        OperatorError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "simulated node down",
        ))
    }

    fn node(state: &SimState, endpoint: NodeEndpoint) -> Result<SimNode> {
        match state.nodes.get(&endpoint) {
            None | Some(SimNode::Down) => Err(Self::connection_refused()),
            Some(node) => Ok(node.clone()),
        }
    }

    /// Commands beyond `hello` need either no users in the cluster yet, or
    /// valid root credentials.
    fn authorize(state: &SimState, creds: Option<&RootCredentials>) -> Result<()> {
        match creds {
            None => {
                if state.admin_users.is_empty() {
                    Ok(())
                } else {
                    Err(Self::admin_error(code::UNAUTHORIZED, "command requires authentication"))
                }
            }
            Some(creds) => {
                let valid = state
                    .admin_users
                    .iter()
                    .any(|(u, p)| u == &creds.username && p == &creds.password);
                if valid {
                    Ok(())
                } else {
                    Err(Self::admin_error(
                        code::AUTHENTICATION_FAILED,
                        "authentication failed",
                    ))
                }
            }
        }
    }

    /// Install `config` on every present node it names, and elect a primary
    /// among them.
    fn install_config(state: &mut SimState, config: &ReplicaSetConfig, preferred: NodeEndpoint) {
        let hosts = config.hosts();
        let current_primary = state.nodes.iter().find_map(|(e, n)| {
            matches!(n, SimNode::Member { primary: true, .. }).then_some(*e)
        });

        let primary = match current_primary {
            Some(p) if hosts.contains(&p.host()) => p,
            _ if hosts.contains(&preferred.host()) => preferred,
            _ => match hosts.iter().next() {
                Some(first) => first.parse().unwrap(),
                None => preferred,
            },
        };

        for (endpoint, node) in state.nodes.iter_mut() {
            if hosts.contains(&endpoint.host()) {
                *node = SimNode::Member {
                    config: config.clone(),
                    primary: *endpoint == primary,
                };
            }
        }
    }
}

#[async_trait]
impl MongoAdmin for SimCluster {
    async fn hello(
        &self,
        endpoint: NodeEndpoint,
        _creds: Option<&RootCredentials>,
    ) -> Result<HelloResponse> {
        let state = self.state.lock().unwrap();
        match Self::node(&state, endpoint)? {
            SimNode::Member { config, primary } => {
                let primary_host = state.nodes.iter().find_map(|(e, n)| {
                    matches!(n, SimNode::Member { primary: true, .. }).then(|| e.host())
                });
                Ok(HelloResponse {
                    is_writable_primary: primary,
                    set_name: Some(config.name.clone()),
                    primary: primary_host,
                    me: Some(endpoint.host()),
                })
            }
            _ => Ok(HelloResponse {
                is_writable_primary: false,
                set_name: None,
                primary: None,
                me: Some(endpoint.host()),
            }),
        }
    }

    async fn repl_set_get_status(
        &self,
        endpoint: NodeEndpoint,
        creds: Option<&RootCredentials>,
    ) -> Result<StatusResponse> {
        let state = self.state.lock().unwrap();
        match Self::node(&state, endpoint)? {
            SimNode::Member { config, primary } => {
                Self::authorize(&state, creds)?;
                Ok(StatusResponse {
                    set_name: Some(config.name),
                    my_state: Some(if primary { 1 } else { 2 }),
                })
            }
            _ => Err(Self::admin_error(
                code::NOT_YET_INITIALIZED,
                "no replset config has been received",
            )),
        }
    }

    async fn repl_set_get_config(
        &self,
        endpoint: NodeEndpoint,
        creds: Option<&RootCredentials>,
    ) -> Result<ReplicaSetConfig> {
        let state = self.state.lock().unwrap();
        match Self::node(&state, endpoint)? {
            SimNode::Member { config, .. } => {
                Self::authorize(&state, creds)?;
                Ok(config)
            }
            _ => Err(Self::admin_error(
                code::NOT_YET_INITIALIZED,
                "no replset config has been received",
            )),
        }
    }

    async fn repl_set_initiate(
        &self,
        endpoint: NodeEndpoint,
        config: &ReplicaSetConfig,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if !state.admin_users.is_empty() {
            return Err(Self::admin_error(
                code::UNAUTHORIZED,
                "replSetInitiate requires authentication",
            ));
        }
        match Self::node(&state, endpoint)? {
            SimNode::Blank => {}
            SimNode::Member { .. } => {
                return Err(Self::admin_error(23, "already initialized"));
            }
            SimNode::Down => unreachable!("node() filters down nodes"),
        }

        Self::install_config(&mut state, config, endpoint);
        state.initiate_count += 1;
        Ok(())
    }

    async fn repl_set_reconfig(
        &self,
        endpoint: NodeEndpoint,
        config: &ReplicaSetConfig,
        force: bool,
        creds: Option<&RootCredentials>,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let node = Self::node(&state, endpoint)?;
        Self::authorize(&state, creds)?;

        match node {
            SimNode::Member { primary, .. } => {
                if !force && !primary {
                    return Err(Self::admin_error(
                        code::NOT_WRITABLE_PRIMARY,
                        "not primary so can't reconfig",
                    ));
                }
            }
            _ => {
                return Err(Self::admin_error(
                    code::NOT_YET_INITIALIZED,
                    "no replset config has been received",
                ));
            }
        }

        Self::install_config(&mut state, config, endpoint);
        if force {
            state.force_reconfig_count += 1;
        } else {
            state.reconfig_count += 1;
        }
        Ok(())
    }

    async fn create_user(
        &self,
        endpoint: NodeEndpoint,
        db: &str,
        username: &str,
        password: &str,
        _roles: &[Role],
        creds: Option<&RootCredentials>,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        Self::node(&state, endpoint)?;

        if db == "admin" {
            // Localhost exception: open only while no users exist.
            if creds.is_none() && !state.admin_users.is_empty() {
                return Err(Self::admin_error(
                    code::UNAUTHORIZED,
                    "createUser requires authentication",
                ));
            }
            if state.admin_users.iter().any(|(u, _)| u == username) {
                return Err(Self::admin_error(
                    code::USER_ALREADY_EXISTS,
                    "user already exists",
                ));
            }
            state
                .admin_users
                .push((username.to_string(), password.to_string()));
        } else {
            Self::authorize(&state, creds)?;
            let key = (db.to_string(), username.to_string());
            if state.db_users.contains(&key) {
                return Err(Self::admin_error(
                    code::USER_ALREADY_EXISTS,
                    "user already exists",
                ));
            }
            state.db_users.insert(key);
        }
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
        let mut state = self.state.lock().unwrap();
        Self::node(&state, endpoint)?;
        Self::authorize(&state, creds)?;

        let id = document
            .get_str("_id")
            .unwrap_or("generated-object-id")
            .to_string();
        let key = (db.to_string(), collection.to_string(), id);
        if state.documents.contains(&key) {
            return Err(Self::admin_error(code::DUPLICATE_KEY, "duplicate key"));
        }
        state.documents.insert(key);
        Ok(())
    }

    async fn admin_user_count(
        &self,
        endpoint: NodeEndpoint,
        creds: Option<&RootCredentials>,
    ) -> Result<usize> {
        let state = self.state.lock().unwrap();
        Self::node(&state, endpoint)?;
        Self::authorize(&state, creds)?;
        Ok(state.admin_users.len())
    }
}
