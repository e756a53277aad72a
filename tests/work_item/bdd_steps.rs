//! BDD step definitions for provisioning and deprovisioning work items.

use rstest_bdd_macros::{given, then, when};
use serde_json::{Value, json};
use stratus::MANAGED_GROUP;
use stratus::work_item::fields;
use tokio::runtime::Runtime;

use super::test_helpers::{WorkerContext, stub_provision_item, work_item};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
    #[error("failed to start runtime: {0}")]
    Runtime(String),
}

fn runtime() -> Result<Runtime, StepError> {
    Runtime::new().map_err(|err| StepError::Runtime(err.to_string()))
}

fn field_text(worker_context: &WorkerContext, field: &'static str) -> Result<String, StepError> {
    worker_context
        .item()
        .optional_str(field)
        .map_err(|err| StepError::Assertion(err.to_string()))?
        .map(str::to_owned)
        .ok_or_else(|| StepError::Assertion(format!("field {field} is not set")))
}

fn error_text(worker_context: &WorkerContext) -> Result<String, StepError> {
    worker_context
        .item()
        .error()
        .map(str::to_owned)
        .ok_or_else(|| StepError::Assertion(String::from("expected an error, found none")))
}

fn ledger_ids(worker_context: &WorkerContext) -> Result<Vec<String>, StepError> {
    worker_context
        .item()
        .ledger()
        .map(stratus::MachineLedger::into_ids)
        .map_err(|err| StepError::Assertion(err.to_string()))
}

#[given("a stub provision work item")]
fn stub_item(worker_context: WorkerContext) -> WorkerContext {
    worker_context.replace_item(stub_provision_item());
    worker_context
}

#[given("the provider type is \"{provider}\"")]
fn provider_type(worker_context: WorkerContext, provider: String) -> WorkerContext {
    worker_context.set_field(fields::TYPE, Value::String(provider));
    worker_context
}

#[given("the field \"{field}\" is removed")]
fn field_removed(worker_context: WorkerContext, field: String) -> WorkerContext {
    let mut map = worker_context.item().clone().into_map();
    map.remove(&field);
    worker_context.replace_item(map.into());
    worker_context
}

#[given("the ssh commands \"{first}\" and \"{second}\"")]
fn ssh_commands(worker_context: WorkerContext, first: String, second: String) -> WorkerContext {
    worker_context.set_field(fields::SSH_COMMANDS, json!([first, second]));
    worker_context
}

#[given("the provision command \"{command}\"")]
fn provision_command(worker_context: WorkerContext, command: String) -> WorkerContext {
    worker_context.set_field(fields::PROVISION_COMMAND, Value::String(command));
    worker_context
}

#[given("the deprovision command \"{command}\"")]
fn deprovision_command(worker_context: WorkerContext, command: String) -> WorkerContext {
    worker_context.set_field(fields::DEPROVISION_COMMAND, Value::String(command));
    worker_context
}

#[given("the remote transport fails")]
fn transport_fails(worker_context: WorkerContext) -> WorkerContext {
    worker_context.connector.fail_script_transport();
    worker_context
}

#[given("rollback on failure is enabled")]
fn rollback_enabled(worker_context: WorkerContext) -> WorkerContext {
    worker_context.enable_rollback();
    worker_context
}

#[given("a node in the managed group")]
fn managed_node(worker_context: WorkerContext) -> WorkerContext {
    worker_context.connector.insert_node(Some(MANAGED_GROUP));
    worker_context
}

#[given("a deprovision work item for machines \"{machines}\"")]
fn deprovision_item(worker_context: WorkerContext, machines: String) -> WorkerContext {
    let ids = machines.split_whitespace().collect::<Vec<_>>();
    worker_context.replace_item(work_item(json!({
        "type": "stub",
        "key_id": "stub-identity",
        "key": "stub-credential",
        "machines": ids,
    })));
    worker_context
}

#[when("I provision the work item")]
fn provision(worker_context: WorkerContext) -> Result<WorkerContext, StepError> {
    let worker = worker_context.worker();
    let mut item = worker_context.item().clone();
    if let Err(err) = runtime()?.block_on(worker.provision(&mut item)) {
        let message = err.to_string();
        if item.error() != Some(message.as_str()) {
            return Err(StepError::Assertion(format!(
                "error field does not mirror the returned error: {message}"
            )));
        }
    }
    worker_context.replace_item(item);
    Ok(worker_context)
}

#[when("I deprovision the work item")]
fn deprovision(worker_context: WorkerContext) -> Result<WorkerContext, StepError> {
    let worker = worker_context.worker();
    let mut item = worker_context.item().clone();
    if let Err(err) = runtime()?.block_on(worker.deprovision(&mut item)) {
        let message = err.to_string();
        if item.error() != Some(message.as_str()) {
            return Err(StepError::Assertion(format!(
                "error field does not mirror the returned error: {message}"
            )));
        }
    }
    worker_context.replace_item(item);
    Ok(worker_context)
}

#[then("the work item has no error")]
fn no_error(worker_context: &WorkerContext) -> Result<(), StepError> {
    match worker_context.item().error() {
        None => Ok(()),
        Some(message) => Err(StepError::Assertion(format!(
            "unexpected error: {message}"
        ))),
    }
}

#[then("the work item error is \"{expected}\"")]
fn error_is(worker_context: &WorkerContext, expected: String) -> Result<(), StepError> {
    let actual = error_text(worker_context)?;
    if actual == expected {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected error '{expected}', got '{actual}'"
        )))
    }
}

#[then("the work item error starts with \"{prefix}\"")]
fn error_starts_with(worker_context: &WorkerContext, prefix: String) -> Result<(), StepError> {
    let actual = error_text(worker_context)?;
    if actual.starts_with(&prefix) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected error starting with '{prefix}', got '{actual}'"
        )))
    }
}

#[then("the work item error ends with \"{suffix}\"")]
fn error_ends_with(worker_context: &WorkerContext, suffix: String) -> Result<(), StepError> {
    let actual = error_text(worker_context)?;
    if actual.ends_with(&suffix) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected error ending with '{suffix}', got '{actual}'"
        )))
    }
}

#[then("the work item records the node address")]
fn records_address(worker_context: &WorkerContext) -> Result<(), StepError> {
    for field in [fields::IP, fields::INSTANCE_ID, fields::INSTANCE_DNS] {
        let value = field_text(worker_context, field)?;
        if value.trim().is_empty() {
            return Err(StepError::Assertion(format!("field {field} is blank")));
        }
    }
    Ok(())
}

#[then("the body starts with \"{prefix}\"")]
fn body_starts_with(worker_context: &WorkerContext, prefix: String) -> Result<(), StepError> {
    let body = field_text(worker_context, fields::BODY)?;
    if body.starts_with(&prefix) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected body starting with '{prefix}', got '{body}'"
        )))
    }
}

#[then("the ledger holds only the new instance id")]
fn ledger_holds_instance(worker_context: &WorkerContext) -> Result<(), StepError> {
    let instance_id = field_text(worker_context, fields::INSTANCE_ID)?;
    let ids = ledger_ids(worker_context)?;
    if ids == [instance_id.clone()] {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected machines == [{instance_id}], got {ids:?}"
        )))
    }
}

#[then("the ledger holds \"{count}\" ids")]
fn ledger_size(worker_context: &WorkerContext, count: usize) -> Result<(), StepError> {
    let ids = ledger_ids(worker_context)?;
    if ids.len() == count {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {count} ledgered ids, got {ids:?}"
        )))
    }
}

#[then("no compute context was opened")]
fn no_context_opened(worker_context: &WorkerContext) -> Result<(), StepError> {
    let opened = worker_context.connector.opened();
    if opened == 0 {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected no context to open, {opened} were opened"
        )))
    }
}

#[then("the new node ran \"{count}\" statements")]
fn node_ran_statements(worker_context: &WorkerContext, count: usize) -> Result<(), StepError> {
    let instance_id = field_text(worker_context, fields::INSTANCE_ID)?;
    let ran = worker_context
        .connector
        .script_runs()
        .into_iter()
        .filter(|run| run.node_id == instance_id)
        .map(|run| run.statements.len())
        .sum::<usize>();
    if ran == count {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {count} statements on node {instance_id}, got {ran}"
        )))
    }
}

#[then("\"{count}\" nodes are still live")]
fn live_nodes(worker_context: &WorkerContext, count: usize) -> Result<(), StepError> {
    let live = worker_context.connector.live_nodes().len();
    if live == count {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {count} live nodes, got {live}"
        )))
    }
}

#[then("the last remote statements were \"{statement}\"")]
fn last_statements(worker_context: &WorkerContext, statement: String) -> Result<(), StepError> {
    let runs = worker_context.connector.script_runs();
    let last = runs
        .last()
        .ok_or_else(|| StepError::Assertion(String::from("no remote statements ran")))?;
    if last.statements == [statement.clone()] {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected [{statement}], got {:?}",
            last.statements
        )))
    }
}
