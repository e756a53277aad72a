//! In-memory `stub` compute provider.
//!
//! The stub keeps its nodes in shared state, so every context opened from the
//! same [`StubConnector`] sees the same nodes. That is what lets a provision
//! call and a later, independent deprovision call meet. Fault injection hooks
//! let tests drive the failure paths of the orchestrator.

use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use uuid::Uuid;

use crate::compute::{
    ComputeError, ComputeFuture, ComputeService, Connector, ExecResponse, NodeFilter,
    NodeMetadata, NodeStatus, RunScriptOptions, Template, TemplateOptions, TemplateSpec,
};
use crate::context::ContextSpec;
use crate::provider::{SessionOptions, STUB_PROVIDER};

const PUBLIC_ADDRESS_BASE: u32 = 0x90AF_0100; // 144.175.1.0
const PRIVATE_ADDRESS_BASE: u32 = 0x0A01_0100; // 10.1.1.0

/// Script invocation recorded by the stub.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ScriptRun {
    /// Node the script ran on.
    pub node_id: String,
    /// Statements in execution order.
    pub statements: Vec<String>,
    /// Login user the statements ran as.
    pub user: Option<String>,
}

#[derive(Clone, Debug, Default)]
struct Catalog {
    images: BTreeSet<String>,
    hardware: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct Faults {
    reject_credentials: bool,
    omit_public_addresses: bool,
    bootstrap_exit_status: Option<i32>,
    script_exit_status: i32,
    script_transport_failure: bool,
    script_timeout: bool,
}

#[derive(Debug, Default)]
struct StubState {
    next_id: u32,
    nodes: BTreeMap<u32, NodeMetadata>,
    catalog: Option<Catalog>,
    faults: Faults,
    opened: u32,
    closed: u32,
    sessions: Vec<SessionOptions>,
    templates: Vec<Template>,
    scripts: Vec<ScriptRun>,
}

/// Connector for the in-memory provider.
#[derive(Clone, Debug, Default)]
pub struct StubConnector {
    state: Arc<Mutex<StubState>>,
    any_provider: bool,
}

impl StubConnector {
    /// Connector that only serves the `stub` provider id.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Connector that serves every provider id, for exercising provider
    /// strategies without a real cloud.
    #[must_use]
    pub fn emulating_any_provider() -> Self {
        Self {
            any_provider: true,
            ..Self::default()
        }
    }

    /// Restricts templates to the listed image and hardware ids.
    #[must_use]
    pub fn with_catalog<I, H, S, T>(self, images: I, hardware: H) -> Self
    where
        I: IntoIterator<Item = S>,
        H: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        self.lock().catalog = Some(Catalog {
            images: images.into_iter().map(Into::into).collect(),
            hardware: hardware.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Rejects every identity/credential pair on node creation.
    pub fn reject_credentials(&self) {
        self.lock().faults.reject_credentials = true;
    }

    /// Creates nodes without public addresses.
    pub fn omit_public_addresses(&self) {
        self.lock().faults.omit_public_addresses = true;
    }

    /// Makes bootstrap scripts exit with `status`.
    pub fn fail_bootstrap(&self, status: i32) {
        self.lock().faults.bootstrap_exit_status = Some(status);
    }

    /// Makes remote scripts exit with `status`.
    pub fn script_exit_status(&self, status: i32) {
        self.lock().faults.script_exit_status = status;
    }

    /// Makes the remote-execution transport fail.
    pub fn fail_script_transport(&self) {
        self.lock().faults.script_transport_failure = true;
    }

    /// Makes remote scripts hit the transport timeout.
    pub fn time_out_scripts(&self) {
        self.lock().faults.script_timeout = true;
    }

    /// Adds a node directly, as if created outside this tool. Returns its id.
    pub fn insert_node(&self, group: Option<&str>) -> String {
        let mut state = self.lock();
        let with_address = !state.faults.omit_public_addresses;
        let node = state.new_node(group, with_address);
        let id = node.id.clone();
        let key = state.next_id;
        state.nodes.insert(key, node);
        id
    }

    /// Marks a node terminated, as if torn down out of band.
    pub fn terminate_node(&self, id: &str) {
        let mut state = self.lock();
        for node in state.nodes.values_mut().filter(|node| node.id == id) {
            node.status = NodeStatus::Terminated;
        }
    }

    /// Number of sessions opened.
    #[must_use]
    pub fn opened(&self) -> u32 {
        self.lock().opened
    }

    /// Number of sessions closed.
    #[must_use]
    pub fn closed(&self) -> u32 {
        self.lock().closed
    }

    /// Session options seen at each open, in order.
    #[must_use]
    pub fn sessions(&self) -> Vec<SessionOptions> {
        self.lock().sessions.clone()
    }

    /// Templates used for node creation, in order.
    #[must_use]
    pub fn templates(&self) -> Vec<Template> {
        self.lock().templates.clone()
    }

    /// Scripts run so far, bootstrap scripts included.
    #[must_use]
    pub fn script_runs(&self) -> Vec<ScriptRun> {
        self.lock().scripts.clone()
    }

    /// Every node, terminated ones included.
    #[must_use]
    pub fn nodes(&self) -> Vec<NodeMetadata> {
        self.lock().nodes.values().cloned().collect()
    }

    /// Nodes that have not been terminated.
    #[must_use]
    pub fn live_nodes(&self) -> Vec<NodeMetadata> {
        let filter = NodeFilter::not_terminated();
        self.lock()
            .nodes
            .values()
            .filter(|node| filter.matches(node))
            .cloned()
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, StubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl StubState {
    fn new_node(&mut self, group: Option<&str>, with_public_address: bool) -> NodeMetadata {
        self.next_id += 1;
        let serial = self.next_id;
        let public_addresses = if with_public_address {
            vec![Ipv4Addr::from(PUBLIC_ADDRESS_BASE.wrapping_add(serial)).to_string()]
        } else {
            Vec::new()
        };
        let prefix = group.unwrap_or("node");
        let suffix = Uuid::new_v4().simple().to_string();
        NodeMetadata {
            id: serial.to_string(),
            group: group.map(str::to_owned),
            hostname: Some(format!("{prefix}-{}", suffix.get(..8).unwrap_or(suffix.as_str()))),
            status: NodeStatus::Running,
            public_addresses,
            private_addresses: vec![
                Ipv4Addr::from(PRIVATE_ADDRESS_BASE.wrapping_add(serial)).to_string(),
            ],
            user_metadata: BTreeMap::new(),
        }
    }
}

impl Connector for StubConnector {
    fn connect<'a>(&'a self, spec: &'a ContextSpec) -> ComputeFuture<'a, Box<dyn ComputeService>> {
        Box::pin(async move {
            if !self.any_provider && spec.provider != STUB_PROVIDER {
                return Err(ComputeError::NoDriver {
                    provider: spec.provider.clone(),
                });
            }
            let mut state = self.lock();
            state.opened += 1;
            state.sessions.push(spec.session);
            drop(state);

            let service: Box<dyn ComputeService> = Box::new(StubService {
                connector: self.clone(),
                identity: spec.identity.clone(),
            });
            Ok(service)
        })
    }
}

struct StubService {
    connector: StubConnector,
    identity: String,
}

impl StubService {
    fn authorize(&self, state: &StubState) -> Result<(), ComputeError> {
        if state.faults.reject_credentials {
            return Err(ComputeError::Authorization {
                identity: self.identity.clone(),
                message: String::from("stub rejected the credential"),
            });
        }
        Ok(())
    }
}

impl ComputeService for StubService {
    fn build_template<'a>(&'a self, spec: &'a TemplateSpec) -> ComputeFuture<'a, Template> {
        Box::pin(async move {
            let state = self.connector.lock();
            if let Some(catalog) = &state.catalog {
                if !catalog.images.contains(&spec.image_id) {
                    return Err(ComputeError::NoMatchingTemplate {
                        message: format!("image {} not in catalogue", spec.image_id),
                    });
                }
                if !catalog.hardware.contains(&spec.hardware_id) {
                    return Err(ComputeError::NoMatchingTemplate {
                        message: format!("hardware {} not in catalogue", spec.hardware_id),
                    });
                }
            }
            Ok(Template {
                image_id: spec.image_id.clone(),
                hardware_id: spec.hardware_id.clone(),
                location_id: spec.location_id.clone(),
                options: TemplateOptions::default(),
            })
        })
    }

    fn create_nodes_in_group<'a>(
        &'a self,
        group: &'a str,
        count: usize,
        template: &'a Template,
    ) -> ComputeFuture<'a, Vec<NodeMetadata>> {
        Box::pin(async move {
            let mut state = self.connector.lock();
            self.authorize(&state)?;
            state.templates.push(template.clone());

            let mut created = Vec::with_capacity(count);
            for _ in 0..count {
                let with_address = !state.faults.omit_public_addresses;
                let mut node = state.new_node(Some(group), with_address);
                node.user_metadata
                    .clone_from(&template.options.user_metadata);
                let key = state.next_id;
                state.nodes.insert(key, node.clone());

                if let Some(script) = &template.options.run_script {
                    state.scripts.push(ScriptRun {
                        node_id: node.id.clone(),
                        statements: vec![script.clone()],
                        user: template.options.login.as_ref().map(|login| login.user.clone()),
                    });
                    if let Some(status) = state.faults.bootstrap_exit_status
                        && status != 0
                    {
                        let mut ids = created
                            .iter()
                            .map(|created_node: &NodeMetadata| created_node.id.clone())
                            .collect::<Vec<_>>();
                        ids.push(node.id.clone());
                        return Err(ComputeError::RunNodes {
                            group: group.to_owned(),
                            created: ids,
                            message: format!(
                                "bootstrap script exited with status {status} on node {}",
                                node.id
                            ),
                        });
                    }
                }
                created.push(node);
            }
            Ok(created)
        })
    }

    fn list_nodes(&self) -> ComputeFuture<'_, Vec<NodeMetadata>> {
        Box::pin(async move { Ok(self.connector.nodes()) })
    }

    fn run_script_on_nodes_matching<'a>(
        &'a self,
        filter: &'a NodeFilter,
        statements: &'a [String],
        options: &'a RunScriptOptions,
    ) -> ComputeFuture<'a, Vec<(NodeMetadata, ExecResponse)>> {
        Box::pin(async move {
            let mut state = self.connector.lock();
            self.authorize(&state)?;
            if state.faults.script_transport_failure {
                return Err(ComputeError::Transport {
                    message: String::from("connection refused"),
                });
            }
            if state.faults.script_timeout {
                return Err(ComputeError::Timeout {
                    seconds: options.timeout.as_secs(),
                });
            }

            let matched = state
                .nodes
                .values()
                .filter(|node| filter.matches(node))
                .cloned()
                .collect::<Vec<_>>();
            let exit_status = state.faults.script_exit_status;
            let mut responses = Vec::with_capacity(matched.len());
            for node in matched {
                state.scripts.push(ScriptRun {
                    node_id: node.id.clone(),
                    statements: statements.to_vec(),
                    user: Some(options.login.user.clone()),
                });
                let response = ExecResponse {
                    exit_status,
                    output: statements.join("\n"),
                };
                responses.push((node, response));
            }
            Ok(responses)
        })
    }

    fn destroy_nodes_matching<'a>(
        &'a self,
        filter: &'a NodeFilter,
    ) -> ComputeFuture<'a, Vec<NodeMetadata>> {
        Box::pin(async move {
            let mut state = self.connector.lock();
            self.authorize(&state)?;
            let mut destroyed = Vec::new();
            for node in state.nodes.values_mut() {
                if node.status == NodeStatus::Terminated || !filter.matches(node) {
                    continue;
                }
                node.status = NodeStatus::Terminated;
                destroyed.push(node.clone());
            }
            Ok(destroyed)
        })
    }

    fn close(&self) {
        self.connector.lock().closed += 1;
    }
}
