//! Renders `stratus.1` from the clap definitions in `src/cli/mod.rs`.
//!
//! The page documents the `provision` and `deprovision` subcommands and the
//! work item file they rewrite. Packagers pick it up from `OUT_DIR`.

use std::env;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use clap::CommandFactory;
use clap_mangen::Man;

#[path = "src/cli/mod.rs"]
mod cli;

use cli::Cli;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut stdout = std::io::stdout();
    writeln!(stdout, "cargo:rerun-if-changed=build.rs")?;
    writeln!(stdout, "cargo:rerun-if-changed=src/cli/mod.rs")?;

    let out_dir =
        PathBuf::from(env::var_os("OUT_DIR").ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "OUT_DIR was not set")
        })?);

    let mut page = Vec::new();
    Man::new(Cli::command())
        .section("1")
        .manual("stratus manual")
        .render(&mut page)?;

    File::create(out_dir.join("stratus.1"))?.write_all(&page)?;

    Ok(())
}
