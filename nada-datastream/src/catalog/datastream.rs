//! Datastream resources: private connection, connection profiles and streams

use serde::Deserialize;
use snafu::ResultExt;
use tracing::{debug, info};

use super::bigquery::StreamConfigFiles;
use super::network::DATASTREAM_SUBNET;
use super::{GcloudCatalog, Named, ResourceKind, VPC_NAME, full_name, short_name};
use crate::config::ProvisioningConfig;
use crate::control_plane::fetch_list;
use crate::error::{
    AmbiguousPrivateConnectionSnafu, CreateSnafu, DeleteSnafu, ExistenceCheckSnafu,
    InvalidStateSnafu, ListStreamsSnafu, ReadinessTimeoutSnafu, Result,
};
use crate::readiness::{Poll, PollOutcome, poll_until};

const PRIVATE_CONNECTIONS: &str = "privateConnections";
const CONNECTION_PROFILES: &str = "connectionProfiles";
const STREAMS: &str = "streams";

/// Lifecycle state reported for a private connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrivateConnectionState {
    Creating,
    Created,
    Other(String),
}

impl From<&str> for PrivateConnectionState {
    fn from(state: &str) -> Self {
        match state {
            "CREATING" => PrivateConnectionState::Creating,
            "CREATED" => PrivateConnectionState::Created,
            other => PrivateConnectionState::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PrivateConnection {
    #[serde(default)]
    state: String,
}

#[derive(Debug, Deserialize)]
struct ConnectionProfile {
    name: String,
    /// Filled in once the profile is usable
    #[serde(rename = "displayName", alias = "display_name", default)]
    display_name: String,
}

impl GcloudCatalog {
    pub(super) async fn private_connection_exists(
        &self,
        cfg: &ProvisioningConfig,
        name: &str,
    ) -> Result<bool> {
        let wanted = full_name(cfg, PRIVATE_CONNECTIONS, name);
        let names = self
            .listed_names(
                ResourceKind::PrivateConnection,
                name,
                args![
                    "datastream",
                    "private-connections",
                    "list",
                    location(cfg)
                ],
            )
            .await?;
        Ok(names.contains(&wanted))
    }

    pub(super) async fn create_private_connection(
        &self,
        cfg: &ProvisioningConfig,
        name: &str,
    ) -> Result<()> {
        info!(private_connection = %name, "Creating Datastream private connection");
        self.run(args![
            "datastream",
            "private-connections",
            "create",
            name,
            format!("--display-name={name}"),
            format!("--vpc={VPC_NAME}"),
            format!("--subnet={DATASTREAM_SUBNET}"),
            location(cfg),
        ])
        .await
        .context(CreateSnafu {
            kind: ResourceKind::PrivateConnection,
            name,
        })?;

        let outcome = poll_until(
            self.clock.as_ref(),
            self.private_connection_policy,
            name,
            move || self.private_connection_state(cfg, name),
        )
        .await?;

        match outcome {
            PollOutcome::Ready(()) => {
                info!(private_connection = %name, "Private connection is up");
                Ok(())
            }
            PollOutcome::Exhausted { attempts } => ReadinessTimeoutSnafu {
                kind: ResourceKind::PrivateConnection,
                name,
                attempts,
            }
            .fail(),
        }
    }

    async fn private_connection_state(
        &self,
        cfg: &ProvisioningConfig,
        name: &str,
    ) -> Result<Poll<()>> {
        let connections: Vec<PrivateConnection> = fetch_list(
            self.cp(),
            args![
                "datastream",
                "private-connections",
                "list",
                location(cfg),
                format!("--filter=name={}", full_name(cfg, PRIVATE_CONNECTIONS, name)),
            ],
        )
        .await
        .context(CreateSnafu {
            kind: ResourceKind::PrivateConnection,
            name,
        })?;

        let [connection] = connections.as_slice() else {
            return AmbiguousPrivateConnectionSnafu {
                name,
                count: connections.len(),
            }
            .fail();
        };

        match PrivateConnectionState::from(connection.state.as_str()) {
            PrivateConnectionState::Creating => Ok(Poll::Pending(connection.state.clone())),
            PrivateConnectionState::Created => Ok(Poll::Ready(())),
            PrivateConnectionState::Other(state) => InvalidStateSnafu { name, state }.fail(),
        }
    }

    pub(super) async fn delete_private_connection(
        &self,
        cfg: &ProvisioningConfig,
        name: &str,
    ) -> Result<()> {
        info!(private_connection = %name, "Deleting Datastream private connection");
        self.run(args![
            "datastream",
            "private-connections",
            "delete",
            name,
            location(cfg),
            "--quiet",
            "--force",
        ])
        .await
        .context(DeleteSnafu {
            kind: ResourceKind::PrivateConnection,
            name,
        })
    }

    /// A listed profile counts as present only once it is ready; the probe
    /// waits for readiness a bounded number of times.
    ///
    /// Right after a create the profile may not be listed yet, so
    /// `awaiting_create` keeps polling an unlisted profile instead of
    /// reporting it absent.
    pub(super) async fn profile_exists(
        &self,
        cfg: &ProvisioningConfig,
        kind: ResourceKind,
        name: &str,
        awaiting_create: bool,
    ) -> Result<bool> {
        let outcome = poll_until(self.clock.as_ref(), self.profile_policy, name, move || {
            self.profile_state(cfg, kind, name, awaiting_create)
        })
        .await?;

        match outcome {
            PollOutcome::Ready(found) => Ok(found),
            PollOutcome::Exhausted { attempts } => ReadinessTimeoutSnafu {
                kind,
                name,
                attempts,
            }
            .fail(),
        }
    }

    async fn profile_state(
        &self,
        cfg: &ProvisioningConfig,
        kind: ResourceKind,
        name: &str,
        awaiting_create: bool,
    ) -> Result<Poll<bool>> {
        let wanted = full_name(cfg, CONNECTION_PROFILES, name);
        let profiles: Vec<ConnectionProfile> = fetch_list(
            self.cp(),
            args!["datastream", "connection-profiles", "list", location(cfg)],
        )
        .await
        .context(ExistenceCheckSnafu { kind, name })?;

        Ok(match profiles.iter().find(|p| p.name == wanted) {
            None if awaiting_create => Poll::Pending("not listed yet".to_string()),
            None => Poll::Ready(false),
            Some(profile) if profile.display_name.is_empty() => {
                Poll::Pending("listed without display name".to_string())
            }
            Some(_) => Poll::Ready(true),
        })
    }

    pub(super) async fn create_postgres_profile(
        &self,
        cfg: &ProvisioningConfig,
        name: &str,
    ) -> Result<()> {
        let host = self.proxy_address(cfg, name).await?;

        info!(profile = %name, host = %host, "Creating Datastream postgres profile");
        self.run(args![
            "datastream",
            "connection-profiles",
            "create",
            name,
            format!("--display-name={name}"),
            "--type=postgresql",
            location(cfg),
            format!("--private-connection={}", ResourceKind::PrivateConnection.resource_name(cfg)),
            format!("--postgresql-database={}", cfg.database()),
            format!("--postgresql-hostname={host}"),
            format!("--postgresql-username={}", cfg.db.user),
            format!("--postgresql-password={}", cfg.db.password),
            format!("--postgresql-port={}", cfg.db.port),
        ])
        .await
        .context(CreateSnafu {
            kind: ResourceKind::SourceProfile,
            name,
        })
    }

    pub(super) async fn create_bigquery_profile(
        &self,
        cfg: &ProvisioningConfig,
        name: &str,
    ) -> Result<()> {
        info!(profile = %name, "Creating Datastream BigQuery profile");
        self.run(args![
            "datastream",
            "connection-profiles",
            "create",
            name,
            format!("--display-name={name}"),
            "--type=bigquery",
            location(cfg),
        ])
        .await
        .context(CreateSnafu {
            kind: ResourceKind::DestinationProfile,
            name,
        })
    }

    pub(super) async fn delete_profile(
        &self,
        cfg: &ProvisioningConfig,
        kind: ResourceKind,
        name: &str,
    ) -> Result<()> {
        info!(profile = %name, "Deleting Datastream {}", kind.label());
        self.run(args![
            "datastream",
            "connection-profiles",
            "delete",
            name,
            location(cfg),
            "--quiet",
        ])
        .await
        .context(DeleteSnafu { kind, name })
    }

    pub(super) async fn stream_exists(&self, cfg: &ProvisioningConfig, name: &str) -> Result<bool> {
        let wanted = full_name(cfg, STREAMS, name);
        let names = self
            .listed_names(
                ResourceKind::Stream,
                name,
                args!["datastream", "streams", "list", location(cfg)],
            )
            .await?;
        Ok(names.contains(&wanted))
    }

    /// Full names of the streams in every Datastream location of the project.
    /// Pipelines in other regions share the project-wide resources too.
    pub(super) async fn stream_names(&self) -> Result<Vec<String>> {
        let locations: Vec<Named> = fetch_list(self.cp(), args!["datastream", "locations", "list"])
            .await
            .context(ListStreamsSnafu)?;

        let mut names = Vec::new();
        for region in locations.iter().map(|l| short_name(&l.name)) {
            let streams: Vec<Named> = fetch_list(
                self.cp(),
                args!["datastream", "streams", "list", format!("--location={region}")],
            )
            .await
            .context(ListStreamsSnafu)?;
            debug!(location = %region, streams = streams.len(), "Listed streams");
            names.extend(streams.into_iter().map(|s| s.name));
        }
        Ok(names)
    }

    pub(super) async fn create_stream(&self, cfg: &ProvisioningConfig, name: &str) -> Result<()> {
        self.ensure_dataset(cfg, name).await?;
        let files = StreamConfigFiles::write(cfg)?;

        let source = ResourceKind::SourceProfile.resource_name(cfg);
        let destination = ResourceKind::DestinationProfile.resource_name(cfg);

        info!(stream = %name, "Creating datastream");
        self.run(args![
            "datastream",
            "streams",
            "create",
            name,
            format!("--display-name={name}"),
            location(cfg),
            format!("--source={}", full_name(cfg, CONNECTION_PROFILES, &source)),
            format!("--postgresql-source-config={}", files.source.path().display()),
            format!("--destination={}", full_name(cfg, CONNECTION_PROFILES, &destination)),
            format!(
                "--bigquery-destination-config={}",
                files.destination.path().display()
            ),
            "--backfill-all",
            "--labels=created-by=nada",
        ])
        .await
        .context(CreateSnafu {
            kind: ResourceKind::Stream,
            name,
        })?;

        info!(
            stream = %name,
            url = %format!(
                "https://console.cloud.google.com/datastream/streams?project={}",
                cfg.project()
            ),
            "Stream created; start it from the console"
        );
        Ok(())
    }

    pub(super) async fn delete_stream(&self, cfg: &ProvisioningConfig, name: &str) -> Result<()> {
        info!(stream = %name, "Deleting datastream");
        self.run(args![
            "datastream",
            "streams",
            "delete",
            name,
            location(cfg),
            "--quiet",
        ])
        .await
        .context(DeleteSnafu {
            kind: ResourceKind::Stream,
            name,
        })
    }
}

fn location(cfg: &ProvisioningConfig) -> String {
    format!("--location={}", cfg.region())
}
