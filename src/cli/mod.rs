//! Command-line interface wiring for maude-sentinel.

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::config::Settings;

pub mod detect;
pub mod serve;

/// Top-level CLI definition.
#[derive(Debug, Parser)]
#[command(author, version, about = "MAUDE adverse-event signal detection", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    /// Parse CLI arguments from the environment.
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    /// Dispatch the selected sub-command.
    pub async fn dispatch(self, settings: Settings) -> Result<()> {
        match self.command {
            Commands::Serve(args) => serve::run(args, settings).await,
            Commands::Detect(args) => detect::run(args, settings).await,
        }
    }
}

/// Supported sub-commands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Serve the JSON API.
    Serve(serve::Args),
    /// Run one detection request and print the response.
    Detect(detect::Args),
}
