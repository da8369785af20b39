//! Provider API enablement

use serde::Deserialize;
use snafu::ResultExt;
use tracing::{debug, info};

use super::{GcloudCatalog, ResourceKind, short_name};
use crate::control_plane::{ControlPlaneError, fetch_list};
use crate::error::{
    CreateSnafu, DeleteSnafu, EnableApiSnafu, ExistenceCheckSnafu, ListApisSnafu, Result,
};

/// APIs a pipeline depends on
pub const REQUIRED_APIS: [&str; 4] = [
    "bigquery.googleapis.com",
    "compute.googleapis.com",
    "datastream.googleapis.com",
    "servicenetworking.googleapis.com",
];

#[derive(Debug, Deserialize)]
struct Service {
    /// `projects/<number>/services/<api>`
    name: String,
}

impl GcloudCatalog {
    async fn enabled_apis(&self) -> std::result::Result<Vec<String>, ControlPlaneError> {
        let services: Vec<Service> =
            fetch_list(self.cp(), args!["services", "list", "--enabled"]).await?;
        Ok(services
            .iter()
            .map(|s| short_name(&s.name).to_string())
            .collect())
    }

    pub(super) async fn enable_required_apis(&self) -> Result<()> {
        let enabled = self.enabled_apis().await.context(ListApisSnafu)?;

        for api in REQUIRED_APIS {
            if enabled.iter().any(|e| e == api) {
                debug!(api = %api, "API already enabled");
                continue;
            }

            info!(api = %api, "Enabling API");
            self.run(args!["services", "enable", api])
                .await
                .context(EnableApiSnafu { api })?;
        }

        Ok(())
    }

    pub(super) async fn api_enabled(&self, api: &str) -> Result<bool> {
        let enabled = self
            .enabled_apis()
            .await
            .context(ExistenceCheckSnafu {
                kind: ResourceKind::ReplicationApi,
                name: api,
            })?;
        Ok(enabled.iter().any(|e| e == api))
    }

    pub(super) async fn enable_api(&self, api: &str) -> Result<()> {
        info!(api = %api, "Enabling API");
        self.run(args!["services", "enable", api])
            .await
            .context(CreateSnafu {
                kind: ResourceKind::ReplicationApi,
                name: api,
            })
    }

    pub(super) async fn disable_api(&self, api: &str) -> Result<()> {
        info!(api = %api, "Disabling API");
        self.run(args!["services", "disable", api, "--force"])
            .await
            .context(DeleteSnafu {
                kind: ResourceKind::ReplicationApi,
                name: api,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ResourceCatalog;
    use crate::config::test_config;
    use crate::control_plane::testing::ScriptedControlPlane;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_only_missing_apis_are_enabled() {
        let cp = Arc::new(ScriptedControlPlane::new());
        cp.reply(json!([
            {"name": "projects/123/services/compute.googleapis.com"},
            {"name": "projects/123/services/datastream.googleapis.com"},
        ]))
        .reply(json!(null))
        .reply(json!(null));

        let catalog = GcloudCatalog::new(cp.clone());
        catalog.enable_apis(&test_config("orders")).await.unwrap();

        let calls = cp.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[1], vec!["services", "enable", "bigquery.googleapis.com"]);
        assert_eq!(
            calls[2],
            vec!["services", "enable", "servicenetworking.googleapis.com"]
        );
    }

    #[tokio::test]
    async fn test_enable_failure_names_the_api() {
        let cp = Arc::new(ScriptedControlPlane::new());
        cp.reply(json!([])).fail("permission denied");

        let catalog = GcloudCatalog::new(cp.clone());
        let err = catalog.enable_apis(&test_config("orders")).await.unwrap_err();
        assert_eq!(err.to_string(), "enabling API bigquery.googleapis.com");
    }

    #[tokio::test]
    async fn test_replication_api_existence() {
        let cp = Arc::new(ScriptedControlPlane::new());
        cp.reply(json!([{"name": "projects/123/services/datastream.googleapis.com"}]))
            .reply(json!([]));

        let catalog = GcloudCatalog::new(cp.clone());
        let cfg = test_config("orders");
        let name = ResourceKind::ReplicationApi.resource_name(&cfg);
        assert!(catalog.exists(&cfg, ResourceKind::ReplicationApi, &name).await.unwrap());
        assert!(!catalog.exists(&cfg, ResourceKind::ReplicationApi, &name).await.unwrap());
    }
}
