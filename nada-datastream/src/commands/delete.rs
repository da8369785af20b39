//! `delete` subcommand

use clap::Args;

use super::{GlobalArgs, PipelineArgs, prepare};
use crate::config::StreamOptions;
use crate::report::{Operation, RunReport};

#[derive(Args, Debug, Clone)]
pub struct DeleteArgs {
    #[command(flatten)]
    pub pipeline: PipelineArgs,
}

pub async fn run(global: &GlobalArgs, args: DeleteArgs) -> anyhow::Result<()> {
    let (cfg, orchestrator) = prepare(global, &args.pipeline, StreamOptions::default()).await?;

    let mut report = RunReport::new(Operation::Delete, cfg.database());
    let result = orchestrator.delete_all(&cfg, &mut report).await;
    report.print();
    Ok(result?)
}
