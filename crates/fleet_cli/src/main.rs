//! `fleet` operator CLI.
//!
//! # Responsibility
//! - Load layered configuration and optional file logging.
//! - Open the SQLite database and dispatch one subcommand.

use anyhow::Context;
use clap::Parser;
use fleet_core::{init_from_config, open_db, FleetConfig};
use log::info;

mod cli;
mod commands;
mod output;

fn main() {
    if let Err(error) = run() {
        eprintln!("fleet error: {error:#}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    let mut config =
        FleetConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(db) = &cli.db {
        config.database.path = db.clone();
    }
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    let cwd = std::env::current_dir().context("failed to resolve working directory")?;
    init_from_config(&config.logging, &cwd).context("failed to start logging")?;

    let conn = open_db(&config.database.path).with_context(|| {
        format!(
            "failed to open database `{}`",
            config.database.path.display()
        )
    })?;
    info!(
        "event=cli_start module=cli status=ok version={}",
        env!("CARGO_PKG_VERSION")
    );

    let mut ctx = commands::AppContext {
        conn,
        config,
        format: cli.format,
    };
    commands::dispatch(cli.command, &mut ctx)
}
