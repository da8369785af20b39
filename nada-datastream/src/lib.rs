//! nada-datastream
//!
//! Provisions and tears down Datastream change-data-capture pipelines that
//! replicate a Cloud SQL postgres database into BigQuery.

pub mod catalog;
pub mod commands;
pub mod config;
pub mod control_plane;
pub mod credentials;
pub mod error;
pub mod orchestrator;
pub mod readiness;
pub mod report;

pub use error::{Error, Result};

use clap::{Parser, Subcommand};

/// Set up and remove Datastream pipelines from Cloud SQL to BigQuery
#[derive(Parser, Debug)]
#[command(name = "nada-datastream")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: commands::GlobalArgs,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a stream and everything it needs
    Create(commands::create::CreateArgs),
    /// Delete a stream and the resources no other stream uses
    Delete(commands::delete::DeleteArgs),
}

impl Cli {
    /// Run the selected command
    pub async fn run(self) -> anyhow::Result<()> {
        match self.command {
            Commands::Create(args) => commands::create::run(&self.global, args).await,
            Commands::Delete(args) => commands::delete::run(&self.global, args).await,
        }
    }
}
