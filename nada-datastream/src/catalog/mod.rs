//! Resource catalog
//!
//! Maps every [`ResourceKind`] to its existence probe, create and delete
//! operations. The orchestrator only talks to the [`ResourceCatalog`] trait;
//! [`GcloudCatalog`] implements it on top of a [`ControlPlane`].
//!
//! Contract:
//! - `exists` never mutates remote state and may be called any number of times
//! - `create` is only called after `exists` returned false
//! - `delete` is only called after `exists` returned true

/// Build owned argument vectors from string-like tokens
macro_rules! args {
    ($($arg:expr),* $(,)?) => {
        vec![$(::std::string::ToString::to_string(&$arg)),*]
    };
}

mod apis;
mod bigquery;
mod datastream;
mod iam;
mod kind;
mod network;
mod proxy;

pub use apis::REQUIRED_APIS;
pub use datastream::PrivateConnectionState;
pub use kind::{
    CREATION_ORDER, DELETION_ORDER, FIREWALL_RULE_NAME, PRIVATE_CONNECTION_NAME, REPLICATION_API,
    ResourceKind, ResourceSpec, SERVICE_ACCOUNT_NAME, VPC_NAME, gce_name, service_account_email,
    stream_name,
};

use async_trait::async_trait;
use serde::Deserialize;
use snafu::ResultExt;
use std::sync::Arc;

use crate::config::ProvisioningConfig;
use crate::control_plane::{ControlPlane, ControlPlaneError, fetch_list};
use crate::error::{ExistenceCheckSnafu, Result};
use crate::readiness::{Clock, PollPolicy, TokioClock};

#[async_trait]
pub trait ResourceCatalog: Send + Sync {
    /// Enable the provider APIs the pipeline needs; already enabled APIs are left alone
    async fn enable_apis(&self, cfg: &ProvisioningConfig) -> Result<()>;

    async fn exists(&self, cfg: &ProvisioningConfig, kind: ResourceKind, name: &str)
    -> Result<bool>;

    async fn create(&self, cfg: &ProvisioningConfig, kind: ResourceKind, name: &str) -> Result<()>;

    /// Existence probe right after a successful `create`. Resources that take
    /// a while to show up are waited for instead of reported absent.
    async fn confirm_created(
        &self,
        cfg: &ProvisioningConfig,
        kind: ResourceKind,
        name: &str,
    ) -> Result<bool> {
        self.exists(cfg, kind, name).await
    }

    async fn delete(&self, cfg: &ProvisioningConfig, kind: ResourceKind, name: &str) -> Result<()>;

    /// Full names of all streams in the project, across every location
    async fn list_streams(&self, cfg: &ProvisioningConfig) -> Result<Vec<String>>;
}

/// Catalog backed by gcloud operations
pub struct GcloudCatalog {
    control_plane: Arc<dyn ControlPlane>,
    clock: Arc<dyn Clock>,
    private_connection_policy: PollPolicy,
    profile_policy: PollPolicy,
}

impl GcloudCatalog {
    pub fn new(control_plane: Arc<dyn ControlPlane>) -> Self {
        Self {
            control_plane,
            clock: Arc::new(TokioClock),
            private_connection_policy: PollPolicy::private_connection(),
            profile_policy: PollPolicy::connection_profile(),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_poll_policies(mut self, private_connection: PollPolicy, profile: PollPolicy) -> Self {
        self.private_connection_policy = private_connection;
        self.profile_policy = profile;
        self
    }

    fn cp(&self) -> &dyn ControlPlane {
        self.control_plane.as_ref()
    }
}

#[async_trait]
impl ResourceCatalog for GcloudCatalog {
    async fn enable_apis(&self, _cfg: &ProvisioningConfig) -> Result<()> {
        self.enable_required_apis().await
    }

    async fn exists(
        &self,
        cfg: &ProvisioningConfig,
        kind: ResourceKind,
        name: &str,
    ) -> Result<bool> {
        match kind {
            ResourceKind::Vpc => self.vpc_exists(name).await,
            ResourceKind::ServiceAccount => self.service_account_exists(cfg).await,
            ResourceKind::SqlProxy => self.proxy_exists(name).await,
            ResourceKind::PrivateConnection => self.private_connection_exists(cfg, name).await,
            ResourceKind::FirewallRule => self.firewall_rule_exists(name).await,
            ResourceKind::SourceProfile | ResourceKind::DestinationProfile => {
                self.profile_exists(cfg, kind, name, false).await
            }
            ResourceKind::Stream => self.stream_exists(cfg, name).await,
            ResourceKind::ReplicationApi => self.api_enabled(name).await,
        }
    }

    async fn confirm_created(
        &self,
        cfg: &ProvisioningConfig,
        kind: ResourceKind,
        name: &str,
    ) -> Result<bool> {
        match kind {
            ResourceKind::SourceProfile | ResourceKind::DestinationProfile => {
                self.profile_exists(cfg, kind, name, true).await
            }
            _ => self.exists(cfg, kind, name).await,
        }
    }

    async fn create(&self, cfg: &ProvisioningConfig, kind: ResourceKind, name: &str) -> Result<()> {
        match kind {
            ResourceKind::Vpc => self.create_vpc(name).await,
            ResourceKind::ServiceAccount => self.create_service_account(cfg, name).await,
            ResourceKind::SqlProxy => self.create_proxy(cfg, name).await,
            ResourceKind::PrivateConnection => self.create_private_connection(cfg, name).await,
            ResourceKind::FirewallRule => self.create_firewall_rule(cfg, name).await,
            ResourceKind::SourceProfile => self.create_postgres_profile(cfg, name).await,
            ResourceKind::DestinationProfile => self.create_bigquery_profile(cfg, name).await,
            ResourceKind::Stream => self.create_stream(cfg, name).await,
            ResourceKind::ReplicationApi => self.enable_api(name).await,
        }
    }

    async fn delete(&self, cfg: &ProvisioningConfig, kind: ResourceKind, name: &str) -> Result<()> {
        match kind {
            ResourceKind::Vpc => self.delete_vpc(name).await,
            ResourceKind::ServiceAccount => self.delete_service_account(cfg).await,
            ResourceKind::SqlProxy => self.delete_proxy(cfg, name).await,
            ResourceKind::PrivateConnection => self.delete_private_connection(cfg, name).await,
            ResourceKind::FirewallRule => self.delete_firewall_rule(name).await,
            ResourceKind::SourceProfile | ResourceKind::DestinationProfile => {
                self.delete_profile(cfg, kind, name).await
            }
            ResourceKind::Stream => self.delete_stream(cfg, name).await,
            ResourceKind::ReplicationApi => self.disable_api(name).await,
        }
    }

    async fn list_streams(&self, _cfg: &ProvisioningConfig) -> Result<Vec<String>> {
        self.stream_names().await
    }
}

#[derive(Debug, Deserialize)]
struct Named {
    name: String,
}

impl GcloudCatalog {
    /// Names returned by a list operation, as an existence probe for `kind`
    async fn listed_names(
        &self,
        kind: ResourceKind,
        name: &str,
        args: Vec<String>,
    ) -> Result<Vec<String>> {
        let items: Vec<Named> = fetch_list(self.cp(), args)
            .await
            .context(ExistenceCheckSnafu { kind, name })?;
        Ok(items.into_iter().map(|item| item.name).collect())
    }

    /// Run a mutating operation whose output is not needed
    async fn run(&self, args: Vec<String>) -> std::result::Result<(), ControlPlaneError> {
        self.cp().execute(args).await.map(|_| ())
    }
}

/// `projects/<project>/locations/<region>/<collection>/<name>`
pub(crate) fn full_name(cfg: &ProvisioningConfig, collection: &str, name: &str) -> String {
    format!(
        "projects/{}/locations/{}/{collection}/{name}",
        cfg.project(),
        cfg.region()
    )
}

/// Full name of the pipeline's own stream
pub fn stream_path(cfg: &ProvisioningConfig) -> String {
    full_name(cfg, "streams", &stream_name(cfg.database()))
}

/// Last segment of a `projects/.../locations/.../<collection>/<name>` path
pub(crate) fn short_name(full: &str) -> &str {
    full.rsplit('/').next().unwrap_or(full)
}
