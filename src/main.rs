//! Binary entry point for the Stratus CLI.

use std::io::{self, Write};
use std::process;

use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use thiserror::Error;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use stratus::util::{read_to_string_ambient, write_string_ambient};
use stratus::{CloudWorker, Orchestrator, StubConnector, WorkItem, WorkerConfig};

mod cli;

use cli::{Cli, WorkItemArgs};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("work item path is not valid UTF-8: {0}")]
    NonUtf8Path(String),
    #[error("failed to read work item {path}: {message}")]
    Read { path: Utf8PathBuf, message: String },
    #[error("failed to parse work item {path}: {message}")]
    Parse { path: Utf8PathBuf, message: String },
    #[error("failed to write work item {path}: {message}")]
    Write { path: Utf8PathBuf, message: String },
}

#[derive(Clone, Copy, Debug)]
enum Operation {
    Provision,
    Deprovision,
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init()
        .ok();
}

async fn dispatch(cli: Cli) -> Result<i32, CliError> {
    let (operation, args) = match cli {
        Cli::Provision(args) => (Operation::Provision, args),
        Cli::Deprovision(args) => (Operation::Deprovision, args),
    };
    let path = work_item_path(args)?;
    let mut item = load_work_item(&path)?;

    let config =
        WorkerConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    let worker = CloudWorker::new(Orchestrator::from_config(StubConnector::new(), &config));

    debug!(?operation, path = %path, "running work item");
    let succeeded = match operation {
        Operation::Provision => worker.provision(&mut item).await.is_ok(),
        Operation::Deprovision => worker.deprovision(&mut item).await.is_ok(),
    };
    save_work_item(&path, &item)?;

    Ok(if succeeded && item.error().is_none() {
        0
    } else {
        1
    })
}

fn work_item_path(args: WorkItemArgs) -> Result<Utf8PathBuf, CliError> {
    Utf8PathBuf::from_path_buf(args.work_item)
        .map_err(|path| CliError::NonUtf8Path(path.display().to_string()))
}

fn load_work_item(path: &Utf8Path) -> Result<WorkItem, CliError> {
    let contents = read_to_string_ambient(path).map_err(|message| CliError::Read {
        path: path.to_path_buf(),
        message,
    })?;
    serde_json::from_str(&contents).map_err(|err| CliError::Parse {
        path: path.to_path_buf(),
        message: err.to_string(),
    })
}

fn save_work_item(path: &Utf8Path, item: &WorkItem) -> Result<(), CliError> {
    let mut rendered = serde_json::to_string_pretty(item).map_err(|err| CliError::Write {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;
    rendered.push('\n');
    write_string_ambient(path, &rendered).map_err(|message| CliError::Write {
        path: path.to_path_buf(),
        message,
    })
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_are_written_on_one_line() {
        let mut buffer = Vec::new();
        write_error(
            &mut buffer,
            &CliError::Config(String::from("script_timeout_secs must be greater than zero")),
        );
        assert_eq!(
            String::from_utf8(buffer).expect("utf-8"),
            "configuration error: script_timeout_secs must be greater than zero\n"
        );
    }

    #[test]
    fn malformed_work_items_are_parse_errors() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let path = Utf8PathBuf::from_path_buf(dir.path().join("item.json")).expect("utf-8 path");
        std::fs::write(&path, "[1, 2]").expect("write item");
        let err = load_work_item(&path).expect_err("not an object");
        assert!(matches!(err, CliError::Parse { .. }), "{err}");
    }
}
