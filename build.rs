//! Build script generating the `replication` man pages.
//!
//! One page is written for the binary and one per subcommand
//! (`replication-<name>.1`) into the build output directory.

use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use clap::CommandFactory;
use clap_mangen::Man;

#[path = "src/cli/mod.rs"]
mod cli;

use cli::Cli;

fn render_page(command: clap::Command, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let mut buffer = Vec::new();
    Man::new(command).render(&mut buffer)?;
    fs::write(path, buffer)?;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut stdout = std::io::stdout();
    writeln!(stdout, "cargo:rerun-if-changed=build.rs")?;
    writeln!(stdout, "cargo:rerun-if-changed=src/cli/mod.rs")?;

    let out_dir =
        PathBuf::from(env::var_os("OUT_DIR").ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "OUT_DIR was not set")
        })?);

    let command = Cli::command();
    for sub in command.get_subcommands() {
        let page = format!("replication-{}.1", sub.get_name());
        let named = sub
            .clone()
            .display_name(format!("replication-{}", sub.get_name()));
        render_page(named, &out_dir.join(page))?;
    }
    render_page(command, &out_dir.join("replication.1"))?;

    Ok(())
}
