//! Service account for the proxy VM

use serde::Deserialize;
use snafu::ResultExt;
use tracing::{debug, error, info, warn};

use super::{GcloudCatalog, ResourceKind, service_account_email};
use crate::config::ProvisioningConfig;
use crate::control_plane::{ControlPlaneError, fetch_list};
use crate::error::{CreateSnafu, DeleteSnafu, ExistenceCheckSnafu, Result};

/// Lets the proxy VM open connections to Cloud SQL
pub const PROXY_ROLE: &str = "roles/cloudsql.client";

#[derive(Debug, Deserialize)]
struct ServiceAccount {
    email: String,
}

/// One row of a policy flattened on `bindings[].members`
#[derive(Debug, Deserialize)]
struct PolicyRow {
    bindings: Binding,
}

#[derive(Debug, Deserialize)]
struct Binding {
    role: String,
}

impl GcloudCatalog {
    pub(super) async fn service_account_exists(&self, cfg: &ProvisioningConfig) -> Result<bool> {
        let email = service_account_email(cfg.project());
        let accounts: Vec<ServiceAccount> =
            fetch_list(self.cp(), args!["iam", "service-accounts", "list"])
                .await
                .context(ExistenceCheckSnafu {
                    kind: ResourceKind::ServiceAccount,
                    name: &email,
                })?;
        Ok(accounts.iter().any(|a| a.email == email))
    }

    pub(super) async fn create_service_account(
        &self,
        cfg: &ProvisioningConfig,
        name: &str,
    ) -> Result<()> {
        let context = CreateSnafu {
            kind: ResourceKind::ServiceAccount,
            name,
        };

        info!(service_account = %name, "Creating IAM service account for the proxy VM");
        self.run(args![
            "iam",
            "service-accounts",
            "create",
            name,
            "--description=Datastream service account",
            format!("--display-name={name}"),
        ])
        .await
        .context(context)?;

        // An account without the role must not outlive a failed create
        if let Err(e) = self.grant_role(cfg).await {
            let email = service_account_email(cfg.project());
            warn!(service_account = %email, error = %e, "Role grant failed, removing the new service account");
            if let Err(cleanup) = self
                .run(args!["iam", "service-accounts", "delete", &email, "--quiet"])
                .await
            {
                error!(
                    service_account = %email,
                    error = %cleanup,
                    "Could not remove service account, delete it manually"
                );
            }
            return Err(e).context(context);
        }
        Ok(())
    }

    async fn grant_role(&self, cfg: &ProvisioningConfig) -> std::result::Result<(), ControlPlaneError> {
        if self.role_bound(cfg).await? {
            debug!(role = PROXY_ROLE, "Role already granted");
            return Ok(());
        }

        info!(role = PROXY_ROLE, "Granting role to the proxy VM service account");
        self.run(role_binding_args("add-iam-policy-binding", cfg)).await
    }

    pub(super) async fn delete_service_account(&self, cfg: &ProvisioningConfig) -> Result<()> {
        let email = service_account_email(cfg.project());
        let context = DeleteSnafu {
            kind: ResourceKind::ServiceAccount,
            name: &email,
        };

        if self.role_bound(cfg).await.context(context)? {
            info!(role = PROXY_ROLE, "Revoking role from the proxy VM service account");
            self.run(role_binding_args("remove-iam-policy-binding", cfg))
                .await
                .context(context)?;
        }

        info!(service_account = %email, "Deleting IAM service account");
        self.run(args!["iam", "service-accounts", "delete", email, "--quiet"])
            .await
            .context(context)
    }

    async fn role_bound(
        &self,
        cfg: &ProvisioningConfig,
    ) -> std::result::Result<bool, ControlPlaneError> {
        let email = service_account_email(cfg.project());
        let rows: Vec<PolicyRow> = fetch_list(
            self.cp(),
            args![
                "projects",
                "get-iam-policy",
                cfg.project(),
                "--flatten=bindings[].members",
                format!("--filter=bindings.members=serviceAccount:{email}"),
            ],
        )
        .await?;
        Ok(rows.iter().any(|row| row.bindings.role == PROXY_ROLE))
    }
}

fn role_binding_args(action: &str, cfg: &ProvisioningConfig) -> Vec<String> {
    let mut args = args![
        "projects",
        action,
        cfg.project(),
        format!(
            "--member=serviceAccount:{}",
            service_account_email(cfg.project())
        ),
        format!("--role={PROXY_ROLE}"),
    ];
    if action == "add-iam-policy-binding" {
        args.push("--condition=None".to_string());
    }
    args
}
