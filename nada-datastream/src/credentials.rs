//! Database credential resolution
//!
//! Connection details for an application's database are looked up in the
//! Kubernetes namespace the application runs in: the Config Connector
//! `SQLInstance` labelled with the app carries the Cloud SQL connection name,
//! and the `SQLUser` for the requested user points at the secret holding
//! username, password and database name.

use async_trait::async_trait;
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, DynamicObject, ListParams};
use kube::config::{KubeConfigOptions, Kubeconfig, KubeconfigError};
use kube::core::GroupVersionKind;
use kube::discovery::ApiResource;
use kube::{Client, Config};
use serde_json::Value;
use snafu::{OptionExt, ResultExt, Snafu};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::config::{DEFAULT_DB_PORT, DbConfig};

const CNRM_SQL_GROUP: &str = "sql.cnrm.cloud.google.com";
const CNRM_SQL_VERSION: &str = "v1beta1";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CredentialError {
    #[snafu(display("loading kubeconfig"))]
    Kubeconfig { source: KubeconfigError },

    #[snafu(display("{action}"))]
    Kube {
        action: String,
        source: kube::Error,
    },

    #[snafu(display("no SQLInstance labelled app={app} in namespace {namespace:?}"))]
    NoInstance { app: String, namespace: String },

    #[snafu(display("{count} SQLInstances labelled app={app} in namespace {namespace:?}, expected one"))]
    MultipleInstances {
        app: String,
        namespace: String,
        count: usize,
    },

    #[snafu(display(
        "SQLInstance {instance:?} has no status.connectionName; check `kubectl describe sqlinstance {instance}`"
    ))]
    MissingConnectionName { instance: String },

    #[snafu(display(
        "connection name {connection_name:?} is not of the form <project>:<region>:<instance>"
    ))]
    InvalidConnectionName { connection_name: String },

    #[snafu(display("no SQLUser secret found for database user {user:?} of app {app}"))]
    NoSecret { app: String, user: String },

    #[snafu(display("secret {secret:?} has no key ending in {suffix}"))]
    IncompleteSecret { secret: String, suffix: String },
}

#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Connection parameters for `db_user` of the database owned by `app`
    async fn resolve(&self, app: &str, db_user: &str) -> Result<DbConfig, CredentialError>;
}

/// Reads credentials through the Kubernetes API
pub struct KubeCredentialSource {
    client: Client,
    namespace: String,
}

impl KubeCredentialSource {
    /// Connect using the local kubeconfig. `context` and `namespace` fall back
    /// to the kubeconfig's current context and its namespace.
    pub async fn connect(
        context: Option<&str>,
        namespace: Option<&str>,
    ) -> Result<Self, CredentialError> {
        let kubeconfig = Kubeconfig::read().context(KubeconfigSnafu)?;
        let options = KubeConfigOptions {
            context: context.map(ToString::to_string),
            ..Default::default()
        };
        let config = Config::from_custom_kubeconfig(kubeconfig, &options)
            .await
            .context(KubeconfigSnafu)?;
        let client = Client::try_from(config).context(KubeSnafu {
            action: "building kubernetes client",
        })?;

        let namespace = namespace.map_or_else(|| client.default_namespace().to_string(), ToString::to_string);
        debug!(namespace = %namespace, "Using kubernetes namespace");

        Ok(Self { client, namespace })
    }

    fn cnrm_api(&self, kind: &str, plural: &str) -> Api<DynamicObject> {
        let gvk = GroupVersionKind::gvk(CNRM_SQL_GROUP, CNRM_SQL_VERSION, kind);
        let resource = ApiResource::from_gvk_with_plural(&gvk, plural);
        Api::namespaced_with(self.client.clone(), &self.namespace, &resource)
    }

    async fn list_for_app(
        &self,
        kind: &str,
        plural: &str,
        app: &str,
    ) -> Result<Vec<DynamicObject>, CredentialError> {
        let params = ListParams::default().labels(&format!("app={app}"));
        let list = self
            .cnrm_api(kind, plural)
            .list(&params)
            .await
            .context(KubeSnafu {
                action: format!("listing {plural} for app {app}"),
            })?;
        Ok(list.items)
    }

    async fn connection_name(&self, app: &str) -> Result<ConnectionName, CredentialError> {
        let instances = self.list_for_app("SQLInstance", "sqlinstances", app).await?;
        let instance = match instances.as_slice() {
            [] => {
                return NoInstanceSnafu {
                    app,
                    namespace: &self.namespace,
                }
                .fail();
            }
            [instance] => instance,
            _ => {
                return MultipleInstancesSnafu {
                    app,
                    namespace: &self.namespace,
                    count: instances.len(),
                }
                .fail();
            }
        };

        let instance_name = instance.metadata.name.clone().unwrap_or_default();
        let raw = instance
            .data
            .pointer("/status/connectionName")
            .and_then(Value::as_str)
            .context(MissingConnectionNameSnafu {
                instance: instance_name,
            })?;
        ConnectionName::parse(raw)
    }

    async fn user_secret(&self, app: &str, db_user: &str) -> Result<Secret, CredentialError> {
        let users = self.list_for_app("SQLUser", "sqlusers", app).await?;
        let secret_name = users
            .iter()
            .filter_map(|user| password_secret_ref(&user.data))
            .find(|(key, _)| secret_key_matches_user(key, db_user))
            .map(|(_, name)| name.to_string())
            .context(NoSecretSnafu { app, user: db_user })?;

        debug!(secret = %secret_name, "Reading database user secret");
        Api::<Secret>::namespaced(self.client.clone(), &self.namespace)
            .get(&secret_name)
            .await
            .context(KubeSnafu {
                action: format!("reading secret {secret_name}"),
            })
    }
}

#[async_trait]
impl CredentialSource for KubeCredentialSource {
    async fn resolve(&self, app: &str, db_user: &str) -> Result<DbConfig, CredentialError> {
        let connection = self.connection_name(app).await?;
        let secret = self.user_secret(app, db_user).await?;
        let secret_name = secret.metadata.name.clone().unwrap_or_default();
        let fields = SecretFields::from_data(&secret_name, &secret.data.unwrap_or_default())?;

        info!(
            app = %app,
            instance = %connection.instance,
            database = %fields.database,
            "Resolved database credentials"
        );
        Ok(DbConfig {
            project: connection.project,
            region: connection.region,
            instance: connection.instance,
            database: fields.database,
            user: fields.username,
            password: fields.password,
            port: DEFAULT_DB_PORT,
        })
    }
}

/// Parts of a `<project>:<region>:<instance>` connection name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionName {
    pub project: String,
    pub region: String,
    pub instance: String,
}

impl ConnectionName {
    pub fn parse(raw: &str) -> Result<Self, CredentialError> {
        match raw.split(':').collect::<Vec<_>>().as_slice() {
            [project, region, instance]
                if !project.is_empty() && !region.is_empty() && !instance.is_empty() =>
            {
                Ok(Self {
                    project: (*project).to_string(),
                    region: (*region).to_string(),
                    instance: (*instance).to_string(),
                })
            }
            _ => InvalidConnectionNameSnafu {
                connection_name: raw,
            }
            .fail(),
        }
    }
}

/// `(key, secret name)` of a SQLUser's `spec.password.valueFrom.secretKeyRef`
fn password_secret_ref(data: &Value) -> Option<(&str, &str)> {
    let key_ref = data.pointer("/spec/password/valueFrom/secretKeyRef")?;
    let key = key_ref.get("key")?.as_str()?;
    let name = key_ref.get("name")?.as_str()?;
    Some((key, name))
}

/// Secret keys embed the user as `_<USER>_`, uppercased with `-` as `_`
pub fn secret_key_matches_user(key: &str, db_user: &str) -> bool {
    let marker = format!("_{}_", db_user.replace('-', "_").to_uppercase());
    key.contains(&marker)
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SecretFields {
    username: String,
    password: String,
    database: String,
}

impl SecretFields {
    fn from_data(secret: &str, data: &BTreeMap<String, ByteString>) -> Result<Self, CredentialError> {
        let field = |suffix: &str| {
            data.iter()
                .find(|(key, _)| key.ends_with(suffix))
                .map(|(_, value)| String::from_utf8_lossy(&value.0).into_owned())
                .context(IncompleteSecretSnafu { secret, suffix })
        };

        Ok(Self {
            username: field("USERNAME")?,
            password: field("PASSWORD")?,
            database: field("DATABASE")?,
        })
    }
}
