//! Member Portal - terminal front end for the subscription member portal
//!
//! Renders the portal pages to stdout and drives the dashboard actions
//! (subscribe, change plan, cancel) against the configured backend.
//!
//! # Configuration
//!
//! Settings are read from `--config`, or `member-portal/config.toml` under the
//! platform configuration directory, then overridden by `MEMBER_PORTAL_*`
//! environment variables. `LOG_FORMAT=json` switches logs to JSON on stderr.

#![allow(
    clippy::multiple_crate_versions,
    reason = "Transitive dependency version conflicts from reqwest and clap"
)]

mod cli;
mod commands;
mod observability;

use clap::Parser;

use crate::{
    cli::Cli,
    commands::App,
    observability::{LogFormat, init_logging},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(LogFormat::from_env(), cli.verbose);

    let app = App::load(cli.config.as_deref())?;
    app.run(cli.command).await
}
