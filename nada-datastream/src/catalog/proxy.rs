//! Cloud SQL proxy VM
//!
//! A small compute instance running the Cloud SQL auth proxy container inside
//! the datastream VPC, so the private connection can reach the database.

use serde::Deserialize;
use snafu::ResultExt;
use tracing::info;

use super::{GcloudCatalog, ResourceKind, VPC_NAME, service_account_email, short_name};
use crate::config::ProvisioningConfig;
use crate::control_plane::{ControlPlaneError, fetch};
use crate::error::{CreateSnafu, DeleteSnafu, ProxyAddressSnafu, Result};

pub const PROXY_IMAGE: &str = "gcr.io/cloud-sql-connectors/cloud-sql-proxy:2.1.1-alpine";

#[derive(Debug, Deserialize)]
struct SqlInstance {
    #[serde(rename = "ipAddresses", default)]
    ip_addresses: Vec<IpAddress>,
}

#[derive(Debug, Deserialize)]
struct IpAddress {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct ComputeInstance {
    #[serde(rename = "networkInterfaces", default)]
    network_interfaces: Vec<NetworkInterface>,
}

#[derive(Debug, Deserialize)]
struct NetworkInterface {
    network: String,
    #[serde(rename = "networkIP")]
    network_ip: Option<String>,
}

impl GcloudCatalog {
    pub(super) async fn proxy_exists(&self, name: &str) -> Result<bool> {
        let names = self
            .listed_names(
                ResourceKind::SqlProxy,
                name,
                args!["compute", "instances", "list"],
            )
            .await?;
        Ok(names.iter().any(|n| n == name))
    }

    pub(super) async fn create_proxy(&self, cfg: &ProvisioningConfig, name: &str) -> Result<()> {
        let context = CreateSnafu {
            kind: ResourceKind::SqlProxy,
            name,
        };

        let private_ip = self.instance_has_private_ip(cfg).await.context(context)?;
        info!(
            proxy = %name,
            instance = %cfg.db.connection_name(),
            private_ip = private_ip,
            "Creating Cloud SQL proxy VM"
        );
        self.run(proxy_create_args(cfg, name, private_ip))
            .await
            .context(context)
    }

    pub(super) async fn delete_proxy(&self, cfg: &ProvisioningConfig, name: &str) -> Result<()> {
        info!(proxy = %name, "Deleting Cloud SQL proxy VM");
        self.run(args![
            "compute",
            "instances",
            "delete",
            name,
            format!("--zone={}", cfg.zone()),
            "--quiet",
        ])
        .await
        .context(DeleteSnafu {
            kind: ResourceKind::SqlProxy,
            name,
        })
    }

    async fn instance_has_private_ip(
        &self,
        cfg: &ProvisioningConfig,
    ) -> std::result::Result<bool, ControlPlaneError> {
        let instance: SqlInstance = fetch(
            self.cp(),
            args!["sql", "instances", "describe", cfg.db.instance],
        )
        .await?;
        Ok(instance.ip_addresses.iter().any(|ip| ip.kind == "PRIVATE"))
    }

    /// Address of the proxy VM inside the datastream VPC, used as the source
    /// profile's hostname
    pub(super) async fn proxy_address(&self, cfg: &ProvisioningConfig, profile: &str) -> Result<String> {
        let proxy = ResourceKind::SqlProxy.resource_name(cfg);
        let instance: ComputeInstance = fetch(
            self.cp(),
            args![
                "compute",
                "instances",
                "describe",
                proxy,
                format!("--zone={}", cfg.zone()),
            ],
        )
        .await
        .context(CreateSnafu {
            kind: ResourceKind::SourceProfile,
            name: profile,
        })?;

        vpc_address(&instance).ok_or_else(|| {
            ProxyAddressSnafu {
                name: proxy,
                reason: format!("no network interface with an address on {VPC_NAME}"),
            }
            .build()
        })
    }
}

fn vpc_address(instance: &ComputeInstance) -> Option<String> {
    instance
        .network_interfaces
        .iter()
        .find(|nic| short_name(&nic.network) == VPC_NAME)
        .and_then(|nic| nic.network_ip.clone())
}

fn proxy_create_args(cfg: &ProvisioningConfig, name: &str, private_ip: bool) -> Vec<String> {
    let (machine_type, interface) = if private_ip {
        (
            "n1-standard-2",
            format!("--network-interface=network={VPC_NAME},subnet={VPC_NAME},no-address"),
        )
    } else {
        (
            "f1-micro",
            format!("--network-interface=network={VPC_NAME},subnet={VPC_NAME}"),
        )
    };

    let mut args = args![
        "compute",
        "instances",
        "create-with-container",
        name,
        format!("--machine-type={machine_type}"),
        format!("--zone={}", cfg.zone()),
        format!(
            "--service-account={}",
            service_account_email(cfg.project())
        ),
        "--create-disk=image-project=debian-cloud,image-family=debian-11",
        "--scopes=cloud-platform",
        interface,
        format!("--container-image={PROXY_IMAGE}"),
        format!(
            "--container-arg={}?port={}",
            cfg.db.connection_name(),
            cfg.db.port
        ),
        "--container-arg=--address=0.0.0.0",
        "--labels=created-by=nada",
    ];
    if private_ip {
        args.push("--container-arg=--private-ip".to_string());
    }
    args
}
