//! Provision and deprovision orchestration.
//!
//! The orchestrator gates on the provider table, opens one compute context
//! per call and always releases it before returning. Provisioning resolves a
//! template, creates exactly one node in [`MANAGED_GROUP`], records it in the
//! caller's ledger and then runs the requested remote commands against it.
//! Deprovisioning optionally runs clean-up commands, destroys the requested
//! nodes and verifies the destroyed count.

use std::fmt::{self, Display};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::compute::{ComputeError, Connector, NodeFilter};
use crate::config::WorkerConfig;
use crate::context::{ComputeContext, ContextSpec, DEFAULT_SCRIPT_TIMEOUT};
use crate::credentials::{CredentialError, CredentialResolver, LoginCredentials};
use crate::deprovisioner::{self, DeprovisionError, DeprovisionResult, PartialDeprovisionError};
use crate::ledger::MachineLedger;
use crate::provider::{ProviderProfile, ProviderTable, UnsupportedProviderError};
use crate::provisioner::{self, ProvisionError, ProvisionResult};
use crate::remote::{self, ExecutionError};
use crate::template::{self, TemplateError, TemplateRequest};

/// Group every node created by this tool is placed in. Destroy operations
/// are always scoped to it.
pub const MANAGED_GROUP: &str = "stratus";

/// What to do with a freshly created node whose remote commands failed.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum RollbackPolicy {
    /// Leave the node running and ledgered.
    #[default]
    Retain,
    /// Destroy the node; the ledger entry stays.
    Destroy,
}

/// Provider id plus the identity/credential pair used to reach it.
#[derive(Clone, Eq, PartialEq)]
pub struct ProviderAccess {
    /// Provider or API id.
    pub provider: String,
    /// Identity (access key id or user name).
    pub identity: String,
    credential: String,
}

impl ProviderAccess {
    /// Bundles a provider id with its identity/credential pair.
    #[must_use]
    pub fn new(
        provider: impl Into<String>,
        identity: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            identity: identity.into(),
            credential: credential.into(),
        }
    }

    fn context_spec(&self, script_timeout: Duration) -> ContextSpec {
        ContextSpec::new(&self.provider, &self.identity, &self.credential)
            .with_script_timeout(script_timeout)
    }
}

impl fmt::Debug for ProviderAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderAccess")
            .field("provider", &self.provider)
            .field("identity", &self.identity)
            .field("credential", &"<redacted>")
            .finish()
    }
}

/// Everything needed to create one node.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProvisionRequest {
    /// Provider and credentials.
    pub access: ProviderAccess,
    /// Image, hardware, zone and EC2-only options.
    pub template: TemplateRequest,
    /// Domain appended to the host name for the `Name` tag.
    pub domain: String,
    /// Host name for the `Name` tag; defaults to the local host name.
    pub hostname: Option<String>,
    /// Script run synchronously while the node is created.
    pub bootstrap: Option<String>,
    /// Commands run on the node after creation, in order.
    pub ssh_commands: Vec<String>,
    /// Command run after `ssh_commands`.
    pub provision_command: Option<String>,
    /// Login user for remote execution; defaults to `root`.
    pub ssh_user: Option<String>,
    /// Private key path; defaults to `~/.ssh/id_rsa`.
    pub private_key_path: Option<String>,
}

impl ProvisionRequest {
    fn needs_login(&self) -> bool {
        let bootstrap = self
            .bootstrap
            .as_deref()
            .is_some_and(|script| !script.trim().is_empty());
        bootstrap
            || !remote::statement_list(&self.ssh_commands, self.provision_command.as_deref())
                .is_empty()
    }
}

/// Everything needed to tear nodes down.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeprovisionRequest {
    /// Provider and credentials.
    pub access: ProviderAccess,
    /// Node ids to destroy, normally read from the ledger.
    pub machines: Vec<String>,
    /// Commands run on the nodes before they are destroyed.
    pub ssh_commands: Vec<String>,
    /// Command run after `ssh_commands`.
    pub deprovision_command: Option<String>,
    /// Login user for remote execution; defaults to `root`.
    pub ssh_user: Option<String>,
    /// Private key path; defaults to `~/.ssh/id_rsa`.
    pub private_key_path: Option<String>,
}

/// How loudly an error should be reported.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Severity {
    /// Expected drift the caller can reconcile.
    Recoverable,
    /// Ordinary failure.
    Reported,
    /// No meaningful continuation is possible.
    Fatal,
}

/// Errors surfaced by [`Orchestrator`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum OrchestratorError {
    /// The provider id is not in the capability table.
    #[error(transparent)]
    UnsupportedProvider(#[from] UnsupportedProviderError),
    /// The provider rejected the identity/credential pair.
    #[error("provider rejected credentials for identity {identity}: {message}")]
    Authorization {
        /// Identity that was rejected.
        identity: String,
        /// Provider message.
        message: String,
    },
    /// The compute context could not be opened.
    #[error("failed to open compute context: {0}")]
    Connect(#[source] ComputeError),
    /// The template could not be resolved.
    #[error(transparent)]
    Template(TemplateError),
    /// The node came up without a public address.
    #[error("node {node_id} has no public address")]
    NoPublicAddress {
        /// Node that was created and ledgered.
        node_id: String,
    },
    /// Node creation or its bootstrap script failed.
    #[error("failed to provision node in group {group}: {message}")]
    Provisioning {
        /// Group the node was requested in.
        group: String,
        /// Provider message.
        message: String,
    },
    /// Remote execution failed after the node was created.
    #[error("{message}")]
    Execution {
        /// Error text, including any teardown note.
        message: String,
        /// Underlying execution error.
        #[source]
        source: ExecutionError,
    },
    /// Destroyed count differs from the requested count.
    #[error(transparent)]
    PartialDeprovision(PartialDeprovisionError),
    /// The SSH key could not be loaded.
    #[error(transparent)]
    Credential(#[from] CredentialError),
    /// Any other provider failure.
    #[error(transparent)]
    Compute(ComputeError),
}

impl OrchestratorError {
    /// Reporting severity of this error.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        match self {
            Self::PartialDeprovision(_) => Severity::Recoverable,
            Self::Credential(_) | Self::NoPublicAddress { .. } => Severity::Fatal,
            _ => Severity::Reported,
        }
    }

    fn on_open(err: ComputeError) -> Self {
        match err {
            ComputeError::Authorization { identity, message } => {
                Self::Authorization { identity, message }
            }
            other => Self::Connect(other),
        }
    }
}

impl From<ComputeError> for OrchestratorError {
    fn from(value: ComputeError) -> Self {
        match value {
            ComputeError::Authorization { identity, message } => {
                Self::Authorization { identity, message }
            }
            other => Self::Compute(other),
        }
    }
}

impl From<TemplateError> for OrchestratorError {
    fn from(value: TemplateError) -> Self {
        match value {
            TemplateError::Compute(inner) => Self::from(inner),
            other => Self::Template(other),
        }
    }
}

impl From<ProvisionError> for OrchestratorError {
    fn from(value: ProvisionError) -> Self {
        match value {
            ProvisionError::NoPublicAddress { node_id } => Self::NoPublicAddress { node_id },
            ProvisionError::Provisioning { group, message } => {
                Self::Provisioning { group, message }
            }
            ProvisionError::Compute(inner) => Self::from(inner),
        }
    }
}

impl From<DeprovisionError> for OrchestratorError {
    fn from(value: DeprovisionError) -> Self {
        match value {
            DeprovisionError::Partial(partial) => Self::PartialDeprovision(partial),
            DeprovisionError::Compute(inner) => Self::from(inner),
        }
    }
}

impl From<ExecutionError> for OrchestratorError {
    fn from(value: ExecutionError) -> Self {
        Self::Execution {
            message: value.to_string(),
            source: value,
        }
    }
}

/// Composes the provisioning building blocks around one [`Connector`].
#[derive(Debug)]
pub struct Orchestrator<C> {
    connector: C,
    providers: ProviderTable,
    credentials: CredentialResolver,
    script_timeout: Duration,
    rollback: RollbackPolicy,
}

impl<C: Connector> Orchestrator<C> {
    /// Creates an orchestrator with the built-in provider table, keys under
    /// `$HOME/.ssh`, the default script timeout and [`RollbackPolicy::Retain`].
    #[must_use]
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            providers: ProviderTable::builtin(),
            credentials: CredentialResolver::from_env(),
            script_timeout: DEFAULT_SCRIPT_TIMEOUT,
            rollback: RollbackPolicy::Retain,
        }
    }

    /// Creates an orchestrator configured from `config`.
    #[must_use]
    pub fn from_config(connector: C, config: &WorkerConfig) -> Self {
        Self::new(connector)
            .with_credential_resolver(config.credential_resolver())
            .with_script_timeout(config.script_timeout())
            .with_rollback_policy(config.rollback_policy())
    }

    /// Overrides where SSH keys are looked up.
    #[must_use]
    pub fn with_credential_resolver(mut self, resolver: CredentialResolver) -> Self {
        self.credentials = resolver;
        self
    }

    /// Overrides the script timeout applied to bootstrap and remote commands.
    #[must_use]
    pub const fn with_script_timeout(mut self, timeout: Duration) -> Self {
        self.script_timeout = timeout;
        self
    }

    /// Overrides the rollback policy.
    #[must_use]
    pub const fn with_rollback_policy(mut self, policy: RollbackPolicy) -> Self {
        self.rollback = policy;
        self
    }

    /// Connector used to open compute contexts.
    #[must_use]
    pub const fn connector(&self) -> &C {
        &self.connector
    }

    /// Provisions one node and appends its id to `ledger`.
    ///
    /// The ledger grows whenever a node was created, including when a later
    /// step fails.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError`] when any step fails. Unsupported
    /// providers fail before a context is opened.
    pub async fn provision(
        &self,
        request: &ProvisionRequest,
        ledger: &mut MachineLedger,
    ) -> Result<ProvisionResult, OrchestratorError> {
        let access = &request.access;
        self.providers.check(&access.provider)?;
        info!(provider = %access.provider, "provisioning node");

        let profile = ProviderProfile::for_provider(&access.provider);
        let context = self.open(access).await?;
        let outcome = self.provision_in(&context, &profile, request, ledger).await;
        context.close();

        if let Ok(result) = &outcome {
            info!(
                node_id = %result.node_id,
                address = %result.public_address,
                "provisioning complete"
            );
        }
        outcome
    }

    /// Runs the optional clean-up commands and destroys the requested nodes.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::PartialDeprovision`] when the destroyed
    /// count differs from the number of distinct requested ids, and other
    /// variants when a step fails outright.
    pub async fn deprovision(
        &self,
        request: &DeprovisionRequest,
    ) -> Result<DeprovisionResult, OrchestratorError> {
        let access = &request.access;
        self.providers.check(&access.provider)?;
        info!(
            provider = %access.provider,
            count = request.machines.len(),
            "deprovisioning nodes"
        );

        let statements = remote::statement_list(
            &request.ssh_commands,
            request.deprovision_command.as_deref(),
        );
        let login = if statements.is_empty() {
            None
        } else {
            Some(self.login(request.ssh_user.as_deref(), request.private_key_path.as_deref())?)
        };

        let context = self.open(access).await?;
        let outcome = Self::deprovision_in(&context, request, login.as_ref()).await;
        context.close();

        if let Ok(result) = &outcome {
            info!(count = result.destroyed.len(), "deprovisioning complete");
        }
        outcome
    }

    async fn open(&self, access: &ProviderAccess) -> Result<ComputeContext, OrchestratorError> {
        let spec = access.context_spec(self.script_timeout);
        ComputeContext::open(&self.connector, &spec)
            .await
            .map_err(OrchestratorError::on_open)
    }

    fn login(
        &self,
        user: Option<&str>,
        private_key_path: Option<&str>,
    ) -> Result<LoginCredentials, OrchestratorError> {
        let login = self.credentials.resolve(user, private_key_path)?;
        debug!(user = %login.user, "resolved login credentials");
        Ok(login)
    }

    async fn provision_in(
        &self,
        context: &ComputeContext,
        profile: &ProviderProfile,
        request: &ProvisionRequest,
        ledger: &mut MachineLedger,
    ) -> Result<ProvisionResult, OrchestratorError> {
        let node_template = template::resolve(context.service(), profile, &request.template).await?;
        let login = if request.needs_login() {
            Some(self.login(request.ssh_user.as_deref(), request.private_key_path.as_deref())?)
        } else {
            None
        };

        let tag = provisioner::name_tag(request.hostname.as_deref(), &request.domain);
        let mut result = provisioner::provision_one(
            context,
            &node_template,
            MANAGED_GROUP,
            login.as_ref(),
            &tag,
            request.bootstrap.as_deref(),
            ledger,
        )
        .await?;

        let Some(remote_login) = login else {
            return Ok(result);
        };
        let selector =
            NodeFilter::in_group(MANAGED_GROUP).and(NodeFilter::id_in([result.node_id.clone()]));
        match remote::run(
            context,
            &remote_login,
            &selector,
            &request.ssh_commands,
            request.provision_command.as_deref(),
        )
        .await
        {
            Ok(outcomes) => {
                result.record_outcomes(outcomes);
                Ok(result)
            }
            Err(err) => Err(self.after_execution_failure(context, &result.node_id, err).await),
        }
    }

    async fn deprovision_in(
        context: &ComputeContext,
        request: &DeprovisionRequest,
        login: Option<&LoginCredentials>,
    ) -> Result<DeprovisionResult, OrchestratorError> {
        if let Some(remote_login) = login {
            let selector = NodeFilter::in_group(MANAGED_GROUP)
                .and(NodeFilter::id_in(request.machines.iter().cloned()))
                .and(NodeFilter::not_terminated());
            remote::run(
                context,
                remote_login,
                &selector,
                &request.ssh_commands,
                request.deprovision_command.as_deref(),
            )
            .await?;
        }
        Ok(deprovisioner::destroy(context, &request.machines, MANAGED_GROUP).await?)
    }

    async fn after_execution_failure(
        &self,
        context: &ComputeContext,
        node_id: &str,
        err: ExecutionError,
    ) -> OrchestratorError {
        let message = match self.rollback {
            RollbackPolicy::Retain => {
                warn!(node_id, "remote execution failed; node retained");
                err.to_string()
            }
            RollbackPolicy::Destroy => Self::destroy_with_note(context, node_id, &err).await,
        };
        OrchestratorError::Execution {
            message,
            source: err,
        }
    }

    async fn destroy_with_note<E: Display>(
        context: &ComputeContext,
        node_id: &str,
        err: &E,
    ) -> String {
        warn!(node_id, "remote execution failed; destroying node");
        let filter =
            NodeFilter::in_group(MANAGED_GROUP).and(NodeFilter::id_in([node_id.to_owned()]));
        let teardown = context.service().destroy_nodes_matching(&filter).await;
        append_teardown_note(err.to_string(), node_id, teardown.err().as_ref())
    }
}

fn append_teardown_note<E: Display>(
    message: String,
    node_id: &str,
    teardown_error: Option<&E>,
) -> String {
    if let Some(teardown) = teardown_error {
        format!("{message} (teardown of node {node_id} also failed: {teardown})")
    } else {
        format!("{message} (node {node_id} destroyed)")
    }
}
