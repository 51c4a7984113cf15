//! Build script for echonote
//!
//! Renders man pages for the CLI with clap_mangen: `echonote.1` plus one
//! `echonote-<subcommand>.1` per subcommand.

use clap::CommandFactory;
use clap_mangen::Man;
use std::env;
use std::fs::{self, File};
use std::io::Error;
use std::path::{Path, PathBuf};

include!("src/cli.rs");

fn render(cmd: clap::Command, path: &Path) -> Result<(), Error> {
    let mut file = File::create(path)?;
    Man::new(cmd).render(&mut file)
}

fn main() -> Result<(), Error> {
    println!("cargo:rerun-if-changed=src/cli.rs");
    println!("cargo:rerun-if-env-changed=ECHONOTE_GEN_MANPAGES");

    // Debug builds skip this unless asked
    let release = env::var("PROFILE").is_ok_and(|p| p == "release");
    if !release && env::var_os("ECHONOTE_GEN_MANPAGES").is_none() {
        return Ok(());
    }

    let Some(out_dir) = env::var_os("OUT_DIR").map(PathBuf::from) else {
        return Ok(());
    };
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir)?;

    let cmd = Cli::command();
    render(cmd.clone(), &man_dir.join("echonote.1"))?;

    for sub in cmd.get_subcommands().filter(|s| s.get_name() != "help") {
        let page = man_dir.join(format!("echonote-{}.1", sub.get_name()));
        render(sub.clone(), &page)?;
    }

    println!("cargo:warning=echonote man pages: {}", man_dir.display());
    Ok(())
}
