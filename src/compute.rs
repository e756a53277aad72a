//! Capability interface onto the underlying multi-cloud compute library.
//!
//! Orchestration code never talks to a provider directly. It drives a
//! [`ComputeService`] obtained from a [`Connector`]; real cloud clients and the
//! in-memory [`crate::stub`] provider both sit behind these two traits.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use thiserror::Error;

use crate::context::ContextSpec;
use crate::credentials::LoginCredentials;

/// Future returned by compute operations.
pub type ComputeFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ComputeError>> + Send + 'a>>;

/// Lifecycle state reported by the provider for a node.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NodeStatus {
    /// The provider is still booting the node.
    Pending,
    /// The node is up.
    Running,
    /// The node exists but is stopped.
    Suspended,
    /// The node has been destroyed; providers keep reporting it for a while.
    Terminated,
    /// The provider reports the node as failed.
    Error,
}

/// Provider view of a single node.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NodeMetadata {
    /// Provider-assigned identifier.
    pub id: String,
    /// Logical group the node was created in, when it has one.
    pub group: Option<String>,
    /// Host name reported by the provider.
    pub hostname: Option<String>,
    /// Current lifecycle state.
    pub status: NodeStatus,
    /// Publicly reachable addresses in provider order.
    pub public_addresses: Vec<String>,
    /// Private addresses in provider order.
    pub private_addresses: Vec<String>,
    /// Free-form metadata tags such as `Name`.
    pub user_metadata: BTreeMap<String, String>,
}

/// Composable predicate selecting nodes for remote execution or destruction.
///
/// Filters are plain values so that call sites state exactly which nodes they
/// touch: `in_group(g).and(id_in(ids))` for targeted work, with
/// `.and(not_terminated())` added when cleaning up before destruction.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum NodeFilter {
    /// Node belongs to the named group.
    InGroup(String),
    /// Node id is one of the listed ids.
    IdIn(BTreeSet<String>),
    /// Node is not terminated.
    NotTerminated,
    /// Every clause must match.
    All(Vec<NodeFilter>),
}

impl NodeFilter {
    /// Matches nodes in `group`.
    #[must_use]
    pub fn in_group(group: impl Into<String>) -> Self {
        Self::InGroup(group.into())
    }

    /// Matches nodes whose id is one of `ids`.
    #[must_use]
    pub fn id_in<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::IdIn(ids.into_iter().map(Into::into).collect())
    }

    /// Matches nodes that have not been terminated.
    #[must_use]
    pub const fn not_terminated() -> Self {
        Self::NotTerminated
    }

    /// Combines two filters; both must match.
    #[must_use]
    pub fn and(self, other: Self) -> Self {
        match self {
            Self::All(mut clauses) => {
                clauses.push(other);
                Self::All(clauses)
            }
            first => Self::All(vec![first, other]),
        }
    }

    /// Evaluates the filter against `node`.
    #[must_use]
    pub fn matches(&self, node: &NodeMetadata) -> bool {
        match self {
            Self::InGroup(group) => node.group.as_deref() == Some(group.as_str()),
            Self::IdIn(ids) => ids.contains(&node.id),
            Self::NotTerminated => node.status != NodeStatus::Terminated,
            Self::All(clauses) => clauses.iter().all(|clause| clause.matches(node)),
        }
    }
}

/// What the caller asks the provider to match when building a template.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TemplateSpec {
    /// Provider image identifier, already adjusted for provider quirks.
    pub image_id: String,
    /// Hardware profile or flavour identifier.
    pub hardware_id: String,
    /// Location constraint; `None` lets the scheduler pick.
    pub location_id: Option<String>,
}

/// Provider options attached to a template.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TemplateOptions {
    /// Security groups to place the node in.
    pub security_groups: Vec<String>,
    /// Key pair registered with the provider.
    pub key_pair: Option<String>,
    /// Opaque user-data payload handed to the node at boot.
    pub user_data: Option<Vec<u8>>,
    /// Metadata tags attached to the node.
    pub user_metadata: BTreeMap<String, String>,
    /// Script run synchronously as part of node creation.
    pub run_script: Option<String>,
    /// Login used for the run script.
    pub login: Option<LoginCredentials>,
}

/// Template resolved by the provider.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Template {
    /// Image identifier the provider accepted.
    pub image_id: String,
    /// Hardware identifier the provider accepted.
    pub hardware_id: String,
    /// Location the node will be placed in, if constrained.
    pub location_id: Option<String>,
    /// Provider options.
    pub options: TemplateOptions,
}

/// Options for a remote script run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RunScriptOptions {
    /// Login overriding whatever credentials the provider cached for the node.
    pub login: LoginCredentials,
    /// Upper bound enforced by the transport.
    pub timeout: Duration,
}

/// Exit status and combined output of a script on one node.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExecResponse {
    /// Exit status reported by the remote shell.
    pub exit_status: i32,
    /// Combined standard output and standard error.
    pub output: String,
}

/// Errors reported by compute collaborators.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ComputeError {
    /// The provider rejected the identity/credential pair.
    #[error("provider rejected credentials for identity {identity}: {message}")]
    Authorization {
        /// Identity that was rejected.
        identity: String,
        /// Provider message.
        message: String,
    },
    /// No image/hardware/location combination satisfies the request.
    #[error("no template matches: {message}")]
    NoMatchingTemplate {
        /// Provider message.
        message: String,
    },
    /// Node creation failed.
    #[error("failed to create nodes in group {group}: {message}")]
    RunNodes {
        /// Group the nodes were requested in.
        group: String,
        /// Ids of nodes that were created before the failure and still exist.
        created: Vec<String>,
        /// Provider message.
        message: String,
    },
    /// The remote-execution transport failed.
    #[error("remote execution transport failed: {message}")]
    Transport {
        /// Transport message.
        message: String,
    },
    /// The remote-execution transport hit its timeout.
    #[error("remote execution timed out after {seconds}s")]
    Timeout {
        /// Timeout that elapsed.
        seconds: u64,
    },
    /// No driver is available for the provider.
    #[error("no compute driver available for provider {provider}")]
    NoDriver {
        /// Provider id that was requested.
        provider: String,
    },
    /// Any other provider failure.
    #[error("provider error: {message}")]
    Provider {
        /// Provider message.
        message: String,
    },
}

/// Narrow capability surface of a compute session.
pub trait ComputeService: Send + Sync {
    /// Resolves `spec` against the provider catalogue.
    fn build_template<'a>(&'a self, spec: &'a TemplateSpec) -> ComputeFuture<'a, Template>;

    /// Creates `count` nodes in `group` from `template`. Blocks until any run
    /// script in the template options has finished.
    fn create_nodes_in_group<'a>(
        &'a self,
        group: &'a str,
        count: usize,
        template: &'a Template,
    ) -> ComputeFuture<'a, Vec<NodeMetadata>>;

    /// Lists every node the provider reports, terminated ones included.
    fn list_nodes(&self) -> ComputeFuture<'_, Vec<NodeMetadata>>;

    /// Runs `statements` in order on every node matching `filter`.
    fn run_script_on_nodes_matching<'a>(
        &'a self,
        filter: &'a NodeFilter,
        statements: &'a [String],
        options: &'a RunScriptOptions,
    ) -> ComputeFuture<'a, Vec<(NodeMetadata, ExecResponse)>>;

    /// Destroys every node matching `filter` and returns the destroyed nodes.
    fn destroy_nodes_matching<'a>(
        &'a self,
        filter: &'a NodeFilter,
    ) -> ComputeFuture<'a, Vec<NodeMetadata>>;

    /// Releases the session.
    fn close(&self);
}

/// Opens compute sessions for a provider.
pub trait Connector: Send + Sync {
    /// Connects using `spec` and returns a live session.
    fn connect<'a>(&'a self, spec: &'a ContextSpec) -> ComputeFuture<'a, Box<dyn ComputeService>>;
}
