//! Command-line interface definitions for the `stratus` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use std::path::PathBuf;

use clap::Parser;

/// Top-level CLI for the `stratus` binary.
#[derive(Debug, Parser)]
#[command(
    name = "stratus",
    about = "Dry-run driver that provisions and deprovisions nodes on the in-memory stub provider",
    long_about = "Dry-run driver for work items. The binary runs against the in-memory stub \
provider, so nodes live only for the duration of one invocation and a later \
`stratus deprovision` cannot tear down nodes created by an earlier process.",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Create one node and run the work item's remote commands on it.
    #[command(
        name = "provision",
        about = "Create one node and run the work item's remote commands on it"
    )]
    Provision(WorkItemArgs),
    /// Destroy the nodes listed in the work item's `machines` field.
    #[command(
        name = "deprovision",
        about = "Destroy the nodes listed in the work item's machines field"
    )]
    Deprovision(WorkItemArgs),
}

/// Arguments shared by both subcommands.
#[derive(Debug, Parser)]
pub(crate) struct WorkItemArgs {
    /// JSON file holding the work item. Results and any `error` are written
    /// back to the same file.
    #[arg(value_name = "WORK_ITEM")]
    pub(crate) work_item: PathBuf,
}
