//! Work item adapter around the [`Orchestrator`].
//!
//! Reads requests out of a [`WorkItem`], runs them and writes the results
//! back. Every failure ends up in the `error` field; the returned `Result`
//! mirrors it for callers that want the typed error.

use thiserror::Error;
use tracing::{error, warn};

use crate::compute::Connector;
use crate::deprovisioner::DeprovisionResult;
use crate::orchestrator::{
    DeprovisionRequest, Orchestrator, OrchestratorError, ProviderAccess, ProvisionRequest,
    Severity,
};
use crate::provisioner::ProvisionResult;
use crate::template::TemplateRequest;
use crate::work_item::{WorkItem, WorkItemError, fields};

/// Errors surfaced by [`CloudWorker`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum WorkerError {
    /// The field map is missing a field or holds the wrong type.
    #[error(transparent)]
    WorkItem(#[from] WorkItemError),
    /// Orchestration failed.
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
}

impl WorkerError {
    /// Reporting severity of this error.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        match self {
            Self::WorkItem(_) => Severity::Reported,
            Self::Orchestrator(err) => err.severity(),
        }
    }
}

/// Runs provision and deprovision calls described by work items.
#[derive(Debug)]
pub struct CloudWorker<C> {
    orchestrator: Orchestrator<C>,
}

impl<C: Connector> CloudWorker<C> {
    /// Wraps `orchestrator`.
    #[must_use]
    pub const fn new(orchestrator: Orchestrator<C>) -> Self {
        Self { orchestrator }
    }

    /// Orchestrator driving the calls.
    #[must_use]
    pub const fn orchestrator(&self) -> &Orchestrator<C> {
        &self.orchestrator
    }

    /// Provisions one node and records `ip`, `instance_id`, `instance_dns`,
    /// `body` and the grown `machines` ledger on `item`.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError`] after writing it to the `error` field.
    pub async fn provision(&self, item: &mut WorkItem) -> Result<ProvisionResult, WorkerError> {
        item.clear_error();
        let outcome = self.provision_item(item).await;
        finish(item, outcome)
    }

    /// Destroys the nodes listed in `machines`. The ledger is not modified.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError`] after writing it to the `error` field.
    pub async fn deprovision(
        &self,
        item: &mut WorkItem,
    ) -> Result<DeprovisionResult, WorkerError> {
        item.clear_error();
        let outcome = self.deprovision_item(item).await;
        finish(item, outcome)
    }

    async fn provision_item(&self, item: &mut WorkItem) -> Result<ProvisionResult, WorkerError> {
        let request = provision_request(item)?;
        let mut ledger = item.ledger()?;
        let before = ledger.len();

        let outcome = self.orchestrator.provision(&request, &mut ledger).await;
        if ledger.len() != before {
            item.set_ledger(&ledger);
        }

        let result = outcome?;
        item.set_str(fields::IP, result.public_address.as_str());
        item.set_str(fields::INSTANCE_ID, result.node_id.as_str());
        item.set_str(fields::INSTANCE_DNS, result.dns_name.as_str());
        item.set_str(fields::BODY, result.body.as_str());
        Ok(result)
    }

    async fn deprovision_item(&self, item: &WorkItem) -> Result<DeprovisionResult, WorkerError> {
        let request = deprovision_request(item)?;
        Ok(self.orchestrator.deprovision(&request).await?)
    }
}

fn finish<T>(item: &mut WorkItem, outcome: Result<T, WorkerError>) -> Result<T, WorkerError> {
    if let Err(err) = &outcome {
        match err.severity() {
            Severity::Recoverable => warn!(error = %err, "work item finished with a recoverable error"),
            Severity::Reported => error!(error = %err, "work item failed"),
            Severity::Fatal => error!(error = %err, fatal = true, "work item failed"),
        }
        item.set_error(err.to_string());
    }
    outcome
}

fn access(item: &WorkItem) -> Result<ProviderAccess, WorkItemError> {
    Ok(ProviderAccess::new(
        item.require_str(fields::TYPE)?,
        item.require_str(fields::KEY_ID)?,
        item.require_str(fields::KEY)?,
    ))
}

fn optional(item: &WorkItem, field: &'static str) -> Result<Option<String>, WorkItemError> {
    Ok(item.optional_str(field)?.map(str::to_owned))
}

/// Reads a [`ProvisionRequest`] from `item`.
///
/// # Errors
///
/// Returns [`WorkItemError`] when a required field is missing or a field has
/// the wrong type.
pub fn provision_request(item: &WorkItem) -> Result<ProvisionRequest, WorkItemError> {
    let access = access(item)?;
    let security_groups = item
        .require_str(fields::GROUPS)?
        .split_whitespace()
        .map(str::to_owned)
        .collect();
    let domain = item.require_str(fields::DOMAIN)?.to_owned();
    let key_pair = item.require_str(fields::KEY_NAME)?.to_owned();
    let image_id = item.require_str(fields::IMAGE_ID)?.to_owned();
    let hardware_id = item.require_str(fields::FLAVOR_ID)?.to_owned();

    Ok(ProvisionRequest {
        access,
        template: TemplateRequest {
            image_id,
            hardware_id,
            zone: optional(item, fields::AVAILABILITY_ZONE)?,
            security_groups,
            key_pair: Some(key_pair),
            user_data: optional(item, fields::USER_DATA)?.map(String::into_bytes),
        },
        domain,
        hostname: optional(item, fields::HOSTNAME)?,
        bootstrap: optional(item, fields::BOOTSTRAP)?,
        ssh_commands: item.string_list(fields::SSH_COMMANDS)?,
        provision_command: optional(item, fields::PROVISION_COMMAND)?,
        ssh_user: optional(item, fields::SSH_USER)?,
        private_key_path: optional(item, fields::PRIVATE_KEY_PATH)?,
    })
}

/// Reads a [`DeprovisionRequest`] from `item`.
///
/// # Errors
///
/// Returns [`WorkItemError`] when a required field is missing or a field has
/// the wrong type.
pub fn deprovision_request(item: &WorkItem) -> Result<DeprovisionRequest, WorkItemError> {
    Ok(DeprovisionRequest {
        access: access(item)?,
        machines: item.require_list(fields::MACHINES)?,
        ssh_commands: item.string_list(fields::SSH_COMMANDS)?,
        deprovision_command: optional(item, fields::DEPROVISION_COMMAND)?,
        ssh_user: optional(item, fields::SSH_USER)?,
        private_key_path: optional(item, fields::PRIVATE_KEY_PATH)?,
    })
}
