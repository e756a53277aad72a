//! Remote command execution against selected nodes.
//!
//! Statements run in order on every node the [`NodeFilter`] selects, with the
//! login supplied per call. Non-zero exits are reported in the outcomes; only
//! transport failures are errors.

use shell_escape::unix::escape;
use thiserror::Error;
use tracing::{debug, warn};

use crate::compute::{ComputeError, NodeFilter, RunScriptOptions};
use crate::context::ComputeContext;
use crate::credentials::LoginCredentials;

/// Result of running the statement list on one node.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RemoteExecutionOutcome {
    /// Node the statements ran on.
    pub node_id: String,
    /// Exit status of the statement list.
    pub exit_status: i32,
    /// Combined standard output and standard error.
    pub output: String,
}

impl RemoteExecutionOutcome {
    /// Returns `true` when the statements exited with status zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.exit_status == 0
    }
}

/// Errors raised by the remote-execution subsystem.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ExecutionError {
    /// The transport failed before exit statuses were collected.
    #[error("remote execution transport failed: {message}")]
    Transport {
        /// Transport message.
        message: String,
    },
    /// The transport timed out.
    #[error("remote execution timed out after {seconds}s")]
    Timeout {
        /// Timeout that elapsed.
        seconds: u64,
    },
    /// Any other provider failure.
    #[error(transparent)]
    Compute(ComputeError),
}

impl From<ComputeError> for ExecutionError {
    fn from(value: ComputeError) -> Self {
        match value {
            ComputeError::Transport { message } => Self::Transport { message },
            ComputeError::Timeout { seconds } => Self::Timeout { seconds },
            other => Self::Compute(other),
        }
    }
}

/// Builds the ordered statement list: `commands` followed by `extra_command`.
/// Blank entries are dropped.
#[must_use]
pub fn statement_list(commands: &[String], extra_command: Option<&str>) -> Vec<String> {
    commands
        .iter()
        .map(String::as_str)
        .chain(extra_command)
        .filter(|statement| !statement.trim().is_empty())
        .map(str::to_owned)
        .collect()
}

/// Wraps `statement` so it runs as root when the login user is not root.
#[must_use]
pub fn as_root(statement: &str, login: &LoginCredentials) -> String {
    if login.is_root() {
        return statement.to_owned();
    }
    format!("sudo -n sh -c {}", escape(statement.into()))
}

/// Runs `commands` then `extra_command` on every node matching `selector`.
///
/// An empty statement list performs no remote call and yields no outcomes.
///
/// # Errors
///
/// Returns [`ExecutionError`] when the transport fails or times out.
pub async fn run(
    context: &ComputeContext,
    login: &LoginCredentials,
    selector: &NodeFilter,
    commands: &[String],
    extra_command: Option<&str>,
) -> Result<Vec<RemoteExecutionOutcome>, ExecutionError> {
    let statements = statement_list(commands, extra_command);
    if statements.is_empty() {
        debug!("no remote statements to run");
        return Ok(Vec::new());
    }

    let wrapped = statements
        .iter()
        .map(|statement| as_root(statement, login))
        .collect::<Vec<_>>();
    let options = RunScriptOptions {
        login: login.clone(),
        timeout: context.script_timeout(),
    };
    debug!(
        statements = wrapped.len(),
        user = %login.user,
        "running remote statements"
    );

    let responses = context
        .service()
        .run_script_on_nodes_matching(selector, &wrapped, &options)
        .await?;

    let outcomes = responses
        .into_iter()
        .map(|(node, response)| RemoteExecutionOutcome {
            node_id: node.id,
            exit_status: response.exit_status,
            output: response.output,
        })
        .collect::<Vec<_>>();
    for outcome in outcomes.iter().filter(|outcome| !outcome.is_success()) {
        warn!(
            node_id = %outcome.node_id,
            exit_status = outcome.exit_status,
            "remote statements exited non-zero"
        );
    }
    Ok(outcomes)
}
