//! Teardown with shared-resource protection

use tracing::{error, info};

use super::Orchestrator;
use super::detection::other_pipelines_exist;
use crate::catalog::{DELETION_ORDER, ResourceKind, stream_path};
use crate::config::ProvisioningConfig;
use crate::error::{DeletionIncompleteSnafu, FailedDeletion, Result};
use crate::report::{Action, RunReport};

impl Orchestrator {
    /// Remove every resource of the pipeline that is present.
    ///
    /// Shared resources stay when any other pipeline exists in the project. A
    /// failure to probe or delete one resource does not stop the others; all
    /// failures are returned together at the end.
    pub async fn delete_all(&self, cfg: &ProvisioningConfig, report: &mut RunReport) -> Result<()> {
        let own_stream = stream_path(cfg);
        let streams = self.catalog.list_streams(cfg).await?;
        let keep_shared = other_pipelines_exist(&streams, &own_stream);
        if keep_shared {
            info!(
                streams = streams.len(),
                "Other pipelines exist in the project, shared resources are kept"
            );
        }

        let mut failed = Vec::new();

        for kind in DELETION_ORDER {
            let name = kind.resource_name(cfg);

            if keep_shared && kind.is_shared() {
                info!(kind = %kind, name = %name, "Shared with other pipelines, skipping");
                report.record(kind, &name, Action::KeptShared);
                continue;
            }

            if let Err(e) = self.delete_if_present(cfg, kind, &name, report).await {
                error!(kind = %kind, name = %name, error = %e, "Deletion failed");
                report.record_error(kind, &name, Action::Failed, &e);
                failed.push(FailedDeletion {
                    kind,
                    name,
                    reason: e.to_string(),
                });
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            DeletionIncompleteSnafu { failed }.fail()
        }
    }

    async fn delete_if_present(
        &self,
        cfg: &ProvisioningConfig,
        kind: ResourceKind,
        name: &str,
        report: &mut RunReport,
    ) -> Result<()> {
        if !self.catalog.exists(cfg, kind, name).await? {
            info!(kind = %kind, name = %name, "Does not exist, skipping");
            report.record(kind, name, Action::Absent);
            return Ok(());
        }

        info!(kind = %kind, name = %name, "Deleting");
        self.catalog.delete(cfg, kind, name).await?;
        report.record(kind, name, Action::Deleted);
        Ok(())
    }
}
