//! `create` subcommand

use clap::Args;
use std::time::Duration;

use super::{GlobalArgs, PipelineArgs, load_defaults, prepare};
use crate::config::{Defaults, StreamOptions, TableFilter};
use crate::report::{Operation, RunReport};

#[derive(Args, Debug, Clone)]
pub struct CreateArgs {
    #[command(flatten)]
    pub pipeline: PipelineArgs,

    /// Only replicate these tables (comma separated); wins over --exclude-tables
    #[arg(long, value_delimiter = ',')]
    pub include_tables: Vec<String>,

    /// Replicate every table except these (comma separated)
    #[arg(long, value_delimiter = ',')]
    pub exclude_tables: Vec<String>,

    /// Postgres replication slot the stream reads from
    #[arg(long)]
    pub replication_slot: Option<String>,

    /// Postgres publication the stream reads from
    #[arg(long = "publication-name")]
    pub publication: Option<String>,

    /// Maximum staleness of the BigQuery tables
    #[arg(long, value_name = "SECONDS")]
    pub data_freshness: Option<u64>,
}

impl CreateArgs {
    /// Stream options from the flags, falling back to `defaults`
    pub fn stream_options(&self, defaults: &Defaults) -> StreamOptions {
        let mut opts = defaults.stream_options();
        opts.table_filter =
            TableFilter::from_lists(self.include_tables.clone(), self.exclude_tables.clone());
        if let Some(slot) = &self.replication_slot {
            opts.replication_slot.clone_from(slot);
        }
        if let Some(publication) = &self.publication {
            opts.publication.clone_from(publication);
        }
        if let Some(secs) = self.data_freshness {
            opts.data_freshness = Duration::from_secs(secs);
        }
        opts
    }
}

pub async fn run(global: &GlobalArgs, args: CreateArgs) -> anyhow::Result<()> {
    let stream = args.stream_options(&load_defaults());
    let (cfg, orchestrator) = prepare(global, &args.pipeline, stream).await?;

    let mut report = RunReport::new(Operation::Create, cfg.database());
    let result = orchestrator.create_all(&cfg, &mut report).await;
    report.print();
    Ok(result?)
}
