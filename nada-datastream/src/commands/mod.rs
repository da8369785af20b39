//! CLI subcommands

pub mod create;
pub mod delete;

use clap::Args;
use snafu::ResultExt;
use std::sync::Arc;
use tracing::{info, warn};

use crate::catalog::GcloudCatalog;
use crate::config::{Defaults, ProvisioningConfig, StreamOptions};
use crate::control_plane::GcloudClient;
use crate::credentials::{CredentialSource, KubeCredentialSource};
use crate::error::CredentialsSnafu;
use crate::orchestrator::Orchestrator;

/// Where to look up the application's database
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Kubernetes namespace of the application (default: from the kubeconfig context)
    #[arg(short, long, global = true, env = "NADA_DATASTREAM_NAMESPACE")]
    pub namespace: Option<String>,

    /// Kubeconfig context to use (default: current context)
    #[arg(short, long, global = true, env = "NADA_DATASTREAM_CONTEXT")]
    pub context: Option<String>,
}

/// The database identified on the command line
#[derive(Args, Debug, Clone)]
pub struct PipelineArgs {
    /// Application owning the Cloud SQL instance
    pub app: String,

    /// Database user the stream connects as
    pub db_user: String,
}

/// Persisted defaults, or the built-in ones if they cannot be read
fn load_defaults() -> Defaults {
    Defaults::load().unwrap_or_else(|e| {
        warn!(error = %e, "Could not load saved defaults, using built-in values");
        Defaults::default()
    })
}

/// Resolve credentials and wire up an orchestrator for one pipeline
async fn prepare(
    global: &GlobalArgs,
    pipeline: &PipelineArgs,
    stream: StreamOptions,
) -> anyhow::Result<(ProvisioningConfig, Orchestrator)> {
    let source =
        KubeCredentialSource::connect(global.context.as_deref(), global.namespace.as_deref())
            .await
            .context(CredentialsSnafu)?;
    let db = source
        .resolve(&pipeline.app, &pipeline.db_user)
        .await
        .context(CredentialsSnafu)?;

    info!(
        project = %db.project,
        region = %db.region,
        instance = %db.instance,
        database = %db.database,
        "Target database"
    );

    let control_plane = Arc::new(GcloudClient::new(db.project.clone()));
    let catalog = Arc::new(GcloudCatalog::new(control_plane));
    Ok((ProvisioningConfig::new(db, stream), Orchestrator::new(catalog)))
}
