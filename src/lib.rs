//! Core library for the Stratus cloud worker.
//!
//! The crate provisions and deprovisions compute nodes as a step in an
//! automated workflow. Provider access goes through the narrow
//! [`compute::ComputeService`] capability surface; the in-memory
//! [`stub`] provider implements it for tests and dry runs. The
//! [`orchestrator::Orchestrator`] composes template resolution, node
//! creation, remote execution and teardown, and [`worker::CloudWorker`]
//! adapts it to the flat work-item field map.

pub mod compute;
pub mod config;
pub mod context;
pub mod credentials;
pub mod deprovisioner;
pub mod ledger;
pub mod orchestrator;
pub mod provider;
pub mod provisioner;
pub mod remote;
pub mod stub;
pub mod template;
pub mod util;
pub mod work_item;
pub mod worker;

pub use compute::{ComputeError, ComputeService, Connector, NodeFilter, NodeMetadata};
pub use config::{ConfigError, WorkerConfig};
pub use context::{ComputeContext, ContextSpec};
pub use credentials::{CredentialError, CredentialResolver, LoginCredentials};
pub use deprovisioner::{DeprovisionResult, PartialDeprovisionError};
pub use ledger::MachineLedger;
pub use orchestrator::{
    DeprovisionRequest, MANAGED_GROUP, Orchestrator, OrchestratorError, ProviderAccess,
    ProvisionRequest, RollbackPolicy, Severity,
};
pub use provider::{ProviderProfile, ProviderTable, UnsupportedProviderError};
pub use provisioner::ProvisionResult;
pub use remote::{ExecutionError, RemoteExecutionOutcome};
pub use stub::StubConnector;
pub use template::{TemplateError, TemplateRequest};
pub use work_item::{WorkItem, WorkItemError};
pub use worker::{CloudWorker, WorkerError};
