//! BDD scenarios for provisioning and deprovisioning work items.

use rstest_bdd_macros::scenario;

use super::test_helpers::{WorkerContext, worker_context};

#[scenario(
    path = "tests/features/provisioning.feature",
    name = "Provision a node on the stub provider"
)]
fn scenario_provision_stub_node(worker_context: WorkerContext) {
    let _ = worker_context;
}

#[scenario(
    path = "tests/features/provisioning.feature",
    name = "Reject an unsupported provider before opening a context"
)]
fn scenario_reject_unsupported_provider(worker_context: WorkerContext) {
    let _ = worker_context;
}

#[scenario(
    path = "tests/features/provisioning.feature",
    name = "Report a missing required field"
)]
fn scenario_report_missing_field(worker_context: WorkerContext) {
    let _ = worker_context;
}

#[scenario(
    path = "tests/features/provisioning.feature",
    name = "Run post-launch commands on the new node"
)]
fn scenario_run_post_launch_commands(worker_context: WorkerContext) {
    let _ = worker_context;
}

#[scenario(
    path = "tests/features/provisioning.feature",
    name = "Keep the node when remote execution fails"
)]
fn scenario_keep_node_on_execution_failure(worker_context: WorkerContext) {
    let _ = worker_context;
}

#[scenario(
    path = "tests/features/provisioning.feature",
    name = "Destroy the node when remote execution fails and rollback is enabled"
)]
fn scenario_destroy_node_on_execution_failure(worker_context: WorkerContext) {
    let _ = worker_context;
}

#[scenario(
    path = "tests/features/deprovisioning.feature",
    name = "Deprovision a node in the managed group"
)]
fn scenario_deprovision_managed_node(worker_context: WorkerContext) {
    let _ = worker_context;
}

#[scenario(
    path = "tests/features/deprovisioning.feature",
    name = "Report a partial deprovision"
)]
fn scenario_report_partial_deprovision(worker_context: WorkerContext) {
    let _ = worker_context;
}

#[scenario(
    path = "tests/features/deprovisioning.feature",
    name = "Provision then deprovision through the shared ledger"
)]
fn scenario_provision_then_deprovision(worker_context: WorkerContext) {
    let _ = worker_context;
}

#[scenario(
    path = "tests/features/deprovisioning.feature",
    name = "Run the deprovision command before destroying"
)]
fn scenario_run_deprovision_command(worker_context: WorkerContext) {
    let _ = worker_context;
}
