//! BigQuery side of a stream: target dataset and stream config files

use serde::Deserialize;
use serde_json::{Value, json};
use snafu::ResultExt;
use std::io::Write;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use super::{GcloudCatalog, ResourceKind};
use crate::config::{ProvisioningConfig, StreamOptions, TableFilter};
use crate::control_plane::fetch_list;
use crate::error::{CreateSnafu, Result, StreamConfigSnafu};

const SOURCE_SCHEMA: &str = "public";

#[derive(Debug, Deserialize)]
struct Dataset {
    #[serde(rename = "datasetReference")]
    reference: DatasetReference,
}

#[derive(Debug, Deserialize)]
struct DatasetReference {
    #[serde(rename = "datasetId")]
    dataset_id: String,
}

/// Dataset a database replicates into; BigQuery ids cannot contain hyphens
pub fn dataset_id(database: &str) -> String {
    format!("datastream_{}", database.replace('-', "_"))
}

/// Postgres source config passed to `streams create`
pub fn postgres_source_config(opts: &StreamOptions) -> Value {
    let mut config = json!({
        "replicationSlot": opts.replication_slot,
        "publication": opts.publication,
    });

    let (key, tables) = match &opts.table_filter {
        TableFilter::All => return config,
        TableFilter::Include(tables) => ("includeObjects", tables),
        TableFilter::Exclude(tables) => ("excludeObjects", tables),
    };
    let tables: Vec<Value> = tables.iter().map(|t| json!({ "table": t })).collect();
    config[key] = json!({
        "postgresqlSchemas": [{
            "schema": SOURCE_SCHEMA,
            "postgresqlTables": tables,
        }]
    });
    config
}

pub fn bigquery_destination_config(cfg: &ProvisioningConfig) -> Value {
    json!({
        "singleTargetDataset": {
            "datasetId": format!("{}:{}", cfg.project(), dataset_id(cfg.database())),
        },
        "dataFreshness": format!("{}s", cfg.stream.data_freshness.as_secs()),
    })
}

/// Write a config to a temp file that is removed when the handle drops
pub fn write_config(prefix: &str, config: &Value) -> std::io::Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix(prefix)
        .suffix(".json")
        .tempfile()?;
    serde_json::to_writer(&mut file, config)?;
    file.flush()?;
    Ok(file)
}

/// Temp files holding both stream configs
pub(super) struct StreamConfigFiles {
    pub source: NamedTempFile,
    pub destination: NamedTempFile,
}

impl StreamConfigFiles {
    pub(super) fn write(cfg: &ProvisioningConfig) -> Result<Self> {
        let source = write_config("ds-pg-config", &postgres_source_config(&cfg.stream))
            .context(StreamConfigSnafu)?;
        let destination = write_config("ds-bq-config", &bigquery_destination_config(cfg))
            .context(StreamConfigSnafu)?;
        Ok(Self {
            source,
            destination,
        })
    }
}

impl GcloudCatalog {
    /// Create the stream's target dataset unless it is already there
    pub(super) async fn ensure_dataset(&self, cfg: &ProvisioningConfig, stream: &str) -> Result<()> {
        let dataset = dataset_id(cfg.database());
        let context = CreateSnafu {
            kind: ResourceKind::Stream,
            name: stream,
        };

        let existing: Vec<Dataset> = fetch_list(self.cp(), args!["alpha", "bq", "datasets", "list"])
            .await
            .context(context)?;
        if existing.iter().any(|d| d.reference.dataset_id == dataset) {
            debug!(dataset = %dataset, "BigQuery dataset already exists");
            return Ok(());
        }

        info!(dataset = %dataset, location = %cfg.region(), "Creating BigQuery dataset");
        self.run(args![
            "alpha",
            "bq",
            "datasets",
            "create",
            dataset,
            format!("--location={}", cfg.region()),
            format!("--description=Datastream replica of {}", cfg.database()),
        ])
        .await
        .context(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::control_plane::testing::ScriptedControlPlane;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_dataset_id_replaces_hyphens() {
        assert_eq!(dataset_id("order-lines"), "datastream_order_lines");
    }

    #[test]
    fn test_source_config_without_filter() {
        let config = postgres_source_config(&StreamOptions::default());
        assert_eq!(
            config,
            json!({"replicationSlot": "ds_replication", "publication": "ds_publication"})
        );
    }

    #[test]
    fn test_source_config_excludes_tables() {
        let opts = StreamOptions {
            table_filter: TableFilter::Exclude(vec!["audit_log".to_string()]),
            ..StreamOptions::default()
        };
        let config = postgres_source_config(&opts);
        assert!(config.get("includeObjects").is_none());
        assert_eq!(
            config["excludeObjects"]["postgresqlSchemas"][0],
            json!({"schema": "public", "postgresqlTables": [{"table": "audit_log"}]})
        );
    }

    #[test]
    fn test_destination_config() {
        let mut cfg = test_config("order-lines");
        cfg.stream.data_freshness = Duration::from_secs(60);
        assert_eq!(
            bigquery_destination_config(&cfg),
            json!({
                "singleTargetDataset": {"datasetId": "nada-dev:datastream_order_lines"},
                "dataFreshness": "60s",
            })
        );
    }

    #[test]
    fn test_config_files_are_removed_on_drop() {
        let files = StreamConfigFiles::write(&test_config("orders")).unwrap();
        let path = files.source.path().to_path_buf();
        let written: Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["publication"], "ds_publication");

        drop(files);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_existing_dataset_is_reused() {
        let cp = Arc::new(ScriptedControlPlane::new());
        cp.reply(json!([{"datasetReference": {"datasetId": "datastream_orders", "projectId": "nada-dev"}}]));

        let catalog = GcloudCatalog::new(cp.clone());
        catalog
            .ensure_dataset(&test_config("orders"), "postgres-orders-bigquery")
            .await
            .unwrap();
        assert_eq!(cp.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_dataset_is_created_in_database_region() {
        let cp = Arc::new(ScriptedControlPlane::new());
        cp.reply(json!([{"datasetReference": {"datasetId": "datastream_users", "projectId": "nada-dev"}}]))
            .reply(json!(null));

        GcloudCatalog::new(cp.clone())
            .ensure_dataset(&test_config("orders"), "postgres-orders-bigquery")
            .await
            .unwrap();

        let calls = cp.calls();
        let create = &calls[1];
        assert_eq!(&create[..5], ["alpha", "bq", "datasets", "create", "datastream_orders"]);
        assert!(create.contains(&"--location=europe-north1".to_string()));
    }
}
