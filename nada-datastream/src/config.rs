//! Per-run provisioning configuration
//!
//! A [`ProvisioningConfig`] is assembled once per invocation from the resolved
//! database credentials and the stream options given on the command line, and
//! is only ever read afterwards.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub const APP_NAME: &str = "nada-datastream";

pub const DEFAULT_REPLICATION_SLOT: &str = "ds_replication";
pub const DEFAULT_PUBLICATION: &str = "ds_publication";
pub const DEFAULT_DATA_FRESHNESS_SECS: u64 = 900;
pub const DEFAULT_DB_PORT: u16 = 5432;

/// Connection parameters of the source database
#[derive(Clone, PartialEq, Eq)]
pub struct DbConfig {
    pub project: String,
    pub region: String,
    pub instance: String,
    pub database: String,
    pub user: String,
    pub password: String,
    pub port: u16,
}

impl DbConfig {
    /// Cloud SQL connection name, `<project>:<region>:<instance>`
    pub fn connection_name(&self) -> String {
        format!("{}:{}:{}", self.project, self.region, self.instance)
    }
}

impl fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbConfig")
            .field("project", &self.project)
            .field("region", &self.region)
            .field("instance", &self.instance)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("port", &self.port)
            .finish()
    }
}

/// Which tables of the `public` schema the stream replicates
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TableFilter {
    #[default]
    All,
    Include(Vec<String>),
    Exclude(Vec<String>),
}

impl TableFilter {
    /// Build a filter from include/exclude lists. A non-empty include list
    /// wins over the exclude list.
    pub fn from_lists(include: Vec<String>, exclude: Vec<String>) -> Self {
        let include = clean(include);
        let exclude = clean(exclude);
        if !include.is_empty() {
            TableFilter::Include(include)
        } else if !exclude.is_empty() {
            TableFilter::Exclude(exclude)
        } else {
            TableFilter::All
        }
    }
}

fn clean(tables: Vec<String>) -> Vec<String> {
    tables
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Stream settings that are not derived from the database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamOptions {
    pub table_filter: TableFilter,
    pub replication_slot: String,
    pub publication: String,
    pub data_freshness: Duration,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Defaults::default().stream_options()
    }
}

/// User defaults persisted in the platform config directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Defaults {
    pub replication_slot: String,
    pub publication: String,
    pub data_freshness_secs: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            replication_slot: DEFAULT_REPLICATION_SLOT.to_string(),
            publication: DEFAULT_PUBLICATION.to_string(),
            data_freshness_secs: DEFAULT_DATA_FRESHNESS_SECS,
        }
    }
}

impl Defaults {
    /// Load `defaults.toml` for this tool, writing it with built-in values on first use
    pub fn load() -> Result<Self, confy::ConfyError> {
        confy::load(APP_NAME, "defaults")
    }

    pub fn stream_options(&self) -> StreamOptions {
        StreamOptions {
            table_filter: TableFilter::All,
            replication_slot: self.replication_slot.clone(),
            publication: self.publication.clone(),
            data_freshness: Duration::from_secs(self.data_freshness_secs),
        }
    }
}

/// Everything one create/delete run needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningConfig {
    pub db: DbConfig,
    pub stream: StreamOptions,
}

impl ProvisioningConfig {
    pub fn new(db: DbConfig, stream: StreamOptions) -> Self {
        Self { db, stream }
    }

    pub fn project(&self) -> &str {
        &self.db.project
    }

    pub fn region(&self) -> &str {
        &self.db.region
    }

    pub fn database(&self) -> &str {
        &self.db.database
    }

    /// Compute zone used for the proxy VM
    pub fn zone(&self) -> String {
        format!("{}-b", self.db.region)
    }
}

#[cfg(test)]
pub(crate) fn test_config(database: &str) -> ProvisioningConfig {
    ProvisioningConfig::new(
        DbConfig {
            project: "nada-dev".to_string(),
            region: "europe-north1".to_string(),
            instance: "orders-db".to_string(),
            database: database.to_string(),
            user: "datastream".to_string(),
            password: "hunter2".to_string(),
            port: DEFAULT_DB_PORT,
        },
        StreamOptions::default(),
    )
}
