//! VPC and firewall rule

use snafu::ResultExt;
use tracing::info;

use super::{GcloudCatalog, ResourceKind, VPC_NAME};
use crate::config::ProvisioningConfig;
use crate::error::{CreateSnafu, DeleteSnafu, Result};

/// Range the private connection peers from. Arbitrary, but must not overlap the VPC.
pub const DATASTREAM_SUBNET: &str = "10.2.0.0/29";

impl GcloudCatalog {
    pub(super) async fn vpc_exists(&self, name: &str) -> Result<bool> {
        let names = self
            .listed_names(ResourceKind::Vpc, name, args!["compute", "networks", "list"])
            .await?;
        Ok(names.iter().any(|n| n == name))
    }

    pub(super) async fn create_vpc(&self, name: &str) -> Result<()> {
        info!(vpc = %name, "Creating VPC");
        self.run(args!["compute", "networks", "create", name, "--subnet-mode=auto"])
            .await
            .context(CreateSnafu {
                kind: ResourceKind::Vpc,
                name,
            })
    }

    pub(super) async fn delete_vpc(&self, name: &str) -> Result<()> {
        info!(vpc = %name, "Deleting VPC");
        self.run(args!["compute", "networks", "delete", name, "--quiet"])
            .await
            .context(DeleteSnafu {
                kind: ResourceKind::Vpc,
                name,
            })
    }

    pub(super) async fn firewall_rule_exists(&self, name: &str) -> Result<bool> {
        let names = self
            .listed_names(
                ResourceKind::FirewallRule,
                name,
                args!["compute", "firewall-rules", "list"],
            )
            .await?;
        Ok(names.iter().any(|n| n == name))
    }

    pub(super) async fn create_firewall_rule(
        &self,
        cfg: &ProvisioningConfig,
        name: &str,
    ) -> Result<()> {
        info!(firewall_rule = %name, "Creating firewall rule for the proxy VM");
        self.run(firewall_rule_args(cfg, name))
            .await
            .context(CreateSnafu {
                kind: ResourceKind::FirewallRule,
                name,
            })
    }

    pub(super) async fn delete_firewall_rule(&self, name: &str) -> Result<()> {
        info!(firewall_rule = %name, "Deleting firewall rule");
        self.run(args!["compute", "firewall-rules", "delete", name, "--quiet"])
            .await
            .context(DeleteSnafu {
                kind: ResourceKind::FirewallRule,
                name,
            })
    }
}

/// Let the private connection subnet reach the proxy port inside the VPC
fn firewall_rule_args(cfg: &ProvisioningConfig, name: &str) -> Vec<String> {
    args![
        "compute",
        "firewall-rules",
        "create",
        name,
        format!("--source-ranges={DATASTREAM_SUBNET}"),
        format!("--network={VPC_NAME}"),
        format!("--allow=tcp:{}", cfg.db.port),
        "--direction=INGRESS",
    ]
}
