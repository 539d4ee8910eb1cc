#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
//! ** Our Legacy **
//! Mod-merge and scripting-hook engine: developer console

use legacy_engine::console::run_console;
use legacy_engine::display::TerminalDisplay;
use legacy_engine::{DataPaths, LEGACY_VERSION, load_host};

use anyhow::{Context, Result};
use log::info;

fn main() -> Result<()> {
    env_logger::init();
    info!("Start: Our Legacy engine v{LEGACY_VERSION}");
    let paths = DataPaths::detect();
    info!("data directory: '{}'", paths.root.display());
    let mut host = load_host(paths)
        .context("while loading game host")?
        .with_display(Box::new(TerminalDisplay::with_prompt("legacy> ")));
    info!("host loaded successfully.");

    match host.scripting() {
        Some(scripting) => info!("{} hook binding(s) active", scripting.registry().binding_count()),
        None => info!("scripting disabled"),
    }

    run_console(&mut host);
    Ok(())
}
