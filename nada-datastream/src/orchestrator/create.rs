//! Idempotent creation with rollback of this run's own work

use tracing::{debug, error, info, warn};

use super::Orchestrator;
use crate::catalog::{CREATION_ORDER, ResourceKind};
use crate::config::ProvisioningConfig;
use crate::error::{Error, NotFoundAfterCreateSnafu, Result};
use crate::report::{Action, RunReport};

/// Resources created by the current run, in creation order.
/// Anything that existed before the run is never recorded, so rollback
/// cannot touch it.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CreationLedger {
    entries: Vec<(ResourceKind, String)>,
}

impl CreationLedger {
    pub fn record(&mut self, kind: ResourceKind, name: impl Into<String>) {
        self.entries.push((kind, name.into()));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Entries newest first
    pub fn rollback_order(&self) -> impl Iterator<Item = &(ResourceKind, String)> {
        self.entries.iter().rev()
    }
}

enum Ensured {
    Created,
    AlreadyPresent,
}

impl Orchestrator {
    /// Bring every resource of the pipeline into existence.
    ///
    /// On failure everything this run created is deleted again, newest first,
    /// and the original error is returned. Rollback failures are logged and
    /// reported but never replace that error.
    pub async fn create_all(&self, cfg: &ProvisioningConfig, report: &mut RunReport) -> Result<()> {
        info!(project = %cfg.project(), "Enabling required APIs");
        self.catalog.enable_apis(cfg).await?;

        let mut ledger = CreationLedger::default();

        for kind in CREATION_ORDER {
            let name = kind.resource_name(cfg);

            match self.ensure(cfg, kind, &name).await {
                Ok(Ensured::AlreadyPresent) => {
                    info!(kind = %kind, name = %name, "Already exists, skipping");
                    report.record(kind, &name, Action::AlreadyPresent);
                }
                Ok(Ensured::Created) => {
                    info!(kind = %kind, name = %name, "Created");
                    report.record(kind, &name, Action::Created);
                    ledger.record(kind, name);
                }
                Err(e) => {
                    error!(kind = %kind, name = %name, error = %e, "Creation failed");
                    report.record_error(kind, &name, Action::Failed, &e);
                    self.rollback(cfg, &ledger, report).await;
                    return Err(e);
                }
            }
        }

        Ok(())
    }

    async fn ensure(&self, cfg: &ProvisioningConfig, kind: ResourceKind, name: &str) -> Result<Ensured> {
        if self.catalog.exists(cfg, kind, name).await? {
            return Ok(Ensured::AlreadyPresent);
        }

        info!(kind = %kind, name = %name, "Creating");
        self.catalog.create(cfg, kind, name).await?;

        if kind.spec().verify_after_create {
            self.verify_created(cfg, kind, name).await?;
        }
        Ok(Ensured::Created)
    }

    /// Creation of some resources can report success without the resource
    /// ever showing up; re-probe and treat absence as a failed create.
    async fn verify_created(&self, cfg: &ProvisioningConfig, kind: ResourceKind, name: &str) -> Result<()> {
        debug!(kind = %kind, name = %name, "Verifying resource after create");
        match self.catalog.confirm_created(cfg, kind, name).await {
            Ok(true) => Ok(()),
            Ok(false) | Err(Error::ReadinessTimeout { .. }) => {
                NotFoundAfterCreateSnafu { kind, name }.fail()
            }
            Err(e) => Err(e),
        }
    }

    async fn rollback(&self, cfg: &ProvisioningConfig, ledger: &CreationLedger, report: &mut RunReport) {
        if ledger.is_empty() {
            debug!("Nothing created in this run, nothing to roll back");
            return;
        }

        warn!(resources = ledger.len(), "Rolling back resources created in this run");
        for (kind, name) in ledger.rollback_order() {
            match self.catalog.delete(cfg, *kind, name).await {
                Ok(()) => {
                    info!(kind = %kind, name = %name, "Rolled back");
                    report.record(*kind, name, Action::RolledBack);
                }
                Err(e) => {
                    error!(
                        kind = %kind,
                        name = %name,
                        error = %e,
                        "Rollback failed, remove the resource manually"
                    );
                    report.record_error(*kind, name, Action::RollbackFailed, &e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::orchestrator::fake::{Call, FakeCatalog};
    use crate::report::Operation;
    use std::sync::Arc;

    fn run_setup(catalog: FakeCatalog) -> (Arc<FakeCatalog>, Orchestrator, RunReport) {
        let catalog = Arc::new(catalog);
        let orchestrator = Orchestrator::new(catalog.clone());
        (catalog, orchestrator, RunReport::new(Operation::Create, "orders"))
    }

    #[tokio::test]
    async fn test_fresh_project_creates_everything_in_order() {
        let (catalog, orchestrator, mut report) = run_setup(FakeCatalog::new());

        orchestrator
            .create_all(&test_config("orders"), &mut report)
            .await
            .unwrap();

        let created: Vec<_> = catalog
            .mutations()
            .into_iter()
            .map(|c| match c {
                Call::Create(kind) => kind,
                other => panic!("unexpected mutation {other:?}"),
            })
            .collect();
        assert_eq!(created, CREATION_ORDER.to_vec());
        assert_eq!(catalog.calls()[0], Call::EnableApis);
    }

    #[tokio::test]
    async fn test_second_run_mutates_nothing() {
        let (catalog, orchestrator, mut report) = run_setup(FakeCatalog::new());
        let cfg = test_config("orders");

        orchestrator.create_all(&cfg, &mut report).await.unwrap();
        let after_first = catalog.mutations().len();

        let mut second = RunReport::new(Operation::Create, "orders");
        orchestrator.create_all(&cfg, &mut second).await.unwrap();

        assert_eq!(catalog.mutations().len(), after_first);
        assert!(
            second
                .entries()
                .iter()
                .all(|e| e.action == Action::AlreadyPresent)
        );
    }

    #[tokio::test]
    async fn test_existing_resources_are_skipped_and_never_rolled_back() {
        let (catalog, orchestrator, mut report) = run_setup(
            FakeCatalog::new()
                .with_present(&[ResourceKind::Vpc, ResourceKind::ServiceAccount])
                .failing_create(ResourceKind::PrivateConnection),
        );

        orchestrator
            .create_all(&test_config("orders"), &mut report)
            .await
            .unwrap_err();

        assert_eq!(
            catalog.mutations(),
            vec![
                Call::Create(ResourceKind::SqlProxy),
                Call::Create(ResourceKind::PrivateConnection),
                Call::Delete(ResourceKind::SqlProxy),
            ]
        );
        assert!(catalog.present().contains(&ResourceKind::Vpc));
        assert!(catalog.present().contains(&ResourceKind::ServiceAccount));
    }

    #[tokio::test]
    async fn test_failure_rolls_back_in_reverse_and_returns_original_error() {
        let (catalog, orchestrator, mut report) =
            run_setup(FakeCatalog::new().failing_create(ResourceKind::FirewallRule));

        let err = orchestrator
            .create_all(&test_config("orders"), &mut report)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::Create {
                kind: ResourceKind::FirewallRule,
                ..
            }
        ));
        let deleted: Vec<_> = catalog
            .mutations()
            .into_iter()
            .filter_map(|c| match c {
                Call::Delete(kind) => Some(kind),
                _ => None,
            })
            .collect();
        assert_eq!(
            deleted,
            vec![
                ResourceKind::PrivateConnection,
                ResourceKind::SqlProxy,
                ResourceKind::ServiceAccount,
                ResourceKind::Vpc,
            ]
        );
        assert_eq!(report.actions(ResourceKind::Vpc), vec![Action::Created, Action::RolledBack]);
    }

    #[tokio::test]
    async fn test_rollback_failure_does_not_replace_error_or_stop_rollback() {
        let (catalog, orchestrator, mut report) = run_setup(
            FakeCatalog::new()
                .failing_create(ResourceKind::FirewallRule)
                .failing_delete(ResourceKind::SqlProxy),
        );

        let err = orchestrator
            .create_all(&test_config("orders"), &mut report)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), Some(ResourceKind::FirewallRule));
        assert!(matches!(err, Error::Create { .. }));
        assert!(catalog.mutations().contains(&Call::Delete(ResourceKind::Vpc)));
        assert_eq!(
            report.actions(ResourceKind::SqlProxy),
            vec![Action::Created, Action::RollbackFailed]
        );
        assert!(report.needs_cleanup());
    }

    #[tokio::test]
    async fn test_first_probe_failure_has_nothing_to_roll_back() {
        let (catalog, orchestrator, mut report) =
            run_setup(FakeCatalog::new().failing_exists(ResourceKind::Vpc));

        let err = orchestrator
            .create_all(&test_config("orders"), &mut report)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::ExistenceCheck { .. }));
        assert!(catalog.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_probe_failure_rolls_back_earlier_creations() {
        let (catalog, orchestrator, mut report) =
            run_setup(FakeCatalog::new().failing_exists(ResourceKind::SqlProxy));

        let err = orchestrator
            .create_all(&test_config("orders"), &mut report)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::ExistenceCheck {
                kind: ResourceKind::SqlProxy,
                ..
            }
        ));
        assert_eq!(
            catalog.mutations(),
            vec![
                Call::Create(ResourceKind::Vpc),
                Call::Create(ResourceKind::ServiceAccount),
                Call::Delete(ResourceKind::ServiceAccount),
                Call::Delete(ResourceKind::Vpc),
            ]
        );
    }

    #[tokio::test]
    async fn test_profile_missing_after_create_is_a_creation_error() {
        let (catalog, orchestrator, mut report) =
            run_setup(FakeCatalog::new().silently_failing_create(ResourceKind::SourceProfile));

        let err = orchestrator
            .create_all(&test_config("orders"), &mut report)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::NotFoundAfterCreate {
                kind: ResourceKind::SourceProfile,
                ..
            }
        ));
        assert!(!catalog.mutations().contains(&Call::Create(ResourceKind::Stream)));
        assert!(catalog.mutations().contains(&Call::Delete(ResourceKind::FirewallRule)));
    }

    #[test]
    fn test_ledger_rollback_order_is_reversed() {
        let mut ledger = CreationLedger::default();
        ledger.record(ResourceKind::Vpc, "datastream-vpc");
        ledger.record(ResourceKind::SqlProxy, "datastream-orders");

        let order: Vec<_> = ledger.rollback_order().map(|(k, _)| *k).collect();
        assert_eq!(order, vec![ResourceKind::SqlProxy, ResourceKind::Vpc]);
    }
}
