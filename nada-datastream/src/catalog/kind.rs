//! Resource kinds and their static metadata
//!
//! Ordering, dependencies and shared-ness live here as data so they can be
//! audited and tested apart from the code that acts on them.

use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

use crate::config::ProvisioningConfig;

pub const VPC_NAME: &str = "datastream-vpc";
pub const SERVICE_ACCOUNT_NAME: &str = "datastream";
pub const PRIVATE_CONNECTION_NAME: &str = "datastream-connection";
pub const FIREWALL_RULE_NAME: &str = "allow-datastream-cloudsql-proxy";
pub const REPLICATION_API: &str = "datastream.googleapis.com";
const PROXY_VM_PREFIX: &str = "datastream-";

/// GCE resource names are at most 63 characters
const MAX_GCE_NAME_LEN: usize = 63;

static INVALID_GCE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9-]+").expect("valid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Vpc,
    ServiceAccount,
    SqlProxy,
    PrivateConnection,
    FirewallRule,
    SourceProfile,
    DestinationProfile,
    Stream,
    ReplicationApi,
}

/// Per-kind metadata read by the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceSpec {
    pub kind: ResourceKind,
    /// Usable by every pipeline in the project
    pub shared: bool,
    /// Resources that must exist before this one can be created
    pub depends_on: &'static [ResourceKind],
    /// Create calls may report success without the resource showing up
    pub verify_after_create: bool,
}

/// Order resources are created in; every dependency precedes its dependent.
/// The replication API is enabled up front rather than created here.
pub const CREATION_ORDER: [ResourceKind; 8] = [
    ResourceKind::Vpc,
    ResourceKind::ServiceAccount,
    ResourceKind::SqlProxy,
    ResourceKind::PrivateConnection,
    ResourceKind::FirewallRule,
    ResourceKind::SourceProfile,
    ResourceKind::DestinationProfile,
    ResourceKind::Stream,
];

/// Order resources are torn down in; every dependent precedes its dependency.
pub const DELETION_ORDER: [ResourceKind; 9] = [
    ResourceKind::Stream,
    ResourceKind::SourceProfile,
    ResourceKind::DestinationProfile,
    ResourceKind::FirewallRule,
    ResourceKind::PrivateConnection,
    ResourceKind::SqlProxy,
    ResourceKind::ServiceAccount,
    ResourceKind::Vpc,
    ResourceKind::ReplicationApi,
];

impl ResourceKind {
    pub const ALL: [ResourceKind; 9] = [
        ResourceKind::Vpc,
        ResourceKind::ServiceAccount,
        ResourceKind::SqlProxy,
        ResourceKind::PrivateConnection,
        ResourceKind::FirewallRule,
        ResourceKind::SourceProfile,
        ResourceKind::DestinationProfile,
        ResourceKind::Stream,
        ResourceKind::ReplicationApi,
    ];

    pub const fn spec(self) -> ResourceSpec {
        use ResourceKind::{
            DestinationProfile, FirewallRule, PrivateConnection, ReplicationApi, ServiceAccount,
            SourceProfile, SqlProxy, Stream, Vpc,
        };

        let (shared, depends_on, verify_after_create): (bool, &'static [ResourceKind], bool) =
            match self {
                Vpc | ServiceAccount | ReplicationApi => (true, &[], false),
                SqlProxy => (false, &[Vpc, ServiceAccount], false),
                PrivateConnection => (true, &[Vpc, ReplicationApi], false),
                FirewallRule => (true, &[Vpc], false),
                SourceProfile => (
                    false,
                    &[SqlProxy, PrivateConnection, FirewallRule, ReplicationApi],
                    true,
                ),
                DestinationProfile => (false, &[ReplicationApi], true),
                Stream => (false, &[SourceProfile, DestinationProfile, ReplicationApi], false),
            };

        ResourceSpec {
            kind: self,
            shared,
            depends_on,
            verify_after_create,
        }
    }

    pub const fn is_shared(self) -> bool {
        self.spec().shared
    }

    /// Human readable label for reports
    pub const fn label(self) -> &'static str {
        match self {
            ResourceKind::Vpc => "VPC",
            ResourceKind::ServiceAccount => "service account",
            ResourceKind::SqlProxy => "cloud sql proxy",
            ResourceKind::PrivateConnection => "private connection",
            ResourceKind::FirewallRule => "firewall rule",
            ResourceKind::SourceProfile => "source connection profile",
            ResourceKind::DestinationProfile => "destination connection profile",
            ResourceKind::Stream => "datastream",
            ResourceKind::ReplicationApi => "datastream API",
        }
    }

    /// Deterministic resource name for this pipeline
    pub fn resource_name(self, cfg: &ProvisioningConfig) -> String {
        let db = cfg.database();
        match self {
            ResourceKind::Vpc => VPC_NAME.to_string(),
            ResourceKind::ServiceAccount => SERVICE_ACCOUNT_NAME.to_string(),
            ResourceKind::SqlProxy => gce_name(&format!("{PROXY_VM_PREFIX}{db}")),
            ResourceKind::PrivateConnection => PRIVATE_CONNECTION_NAME.to_string(),
            ResourceKind::FirewallRule => FIREWALL_RULE_NAME.to_string(),
            ResourceKind::SourceProfile => format!("postgres-{db}"),
            ResourceKind::DestinationProfile => format!("bigquery-{db}"),
            ResourceKind::Stream => stream_name(db),
            ResourceKind::ReplicationApi => REPLICATION_API.to_string(),
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = match self {
            ResourceKind::Vpc => "VPC",
            ResourceKind::ServiceAccount => "ServiceAccount",
            ResourceKind::SqlProxy => "SqlProxy",
            ResourceKind::PrivateConnection => "PrivateConnection",
            ResourceKind::FirewallRule => "FirewallRule",
            ResourceKind::SourceProfile => "SourceProfile",
            ResourceKind::DestinationProfile => "DestinationProfile",
            ResourceKind::Stream => "Stream",
            ResourceKind::ReplicationApi => "ReplicationAPI",
        };
        f.write_str(id)
    }
}

pub fn stream_name(database: &str) -> String {
    format!("postgres-{database}-bigquery")
}

/// Service account email in the given project
pub fn service_account_email(project: &str) -> String {
    format!("{SERVICE_ACCOUNT_NAME}@{project}.iam.gserviceaccount.com")
}

/// Coerce a name into what compute engine accepts: lowercase letters, digits
/// and hyphens, starting with a letter, at most 63 characters.
pub fn gce_name(raw: &str) -> String {
    let lowered = raw.to_lowercase();
    let replaced = INVALID_GCE_CHARS.replace_all(&lowered, "-");
    let mut name: String = replaced.trim_matches('-').to_string();
    if !name.starts_with(|c: char| c.is_ascii_lowercase()) {
        name.insert_str(0, "ds-");
    }
    name.truncate(MAX_GCE_NAME_LEN);
    name.trim_end_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;

    fn position(order: &[ResourceKind], kind: ResourceKind) -> Option<usize> {
        order.iter().position(|k| *k == kind)
    }

    #[test]
    fn test_creation_order_respects_dependencies() {
        for (idx, kind) in CREATION_ORDER.iter().enumerate() {
            for dep in kind.spec().depends_on {
                match position(&CREATION_ORDER, *dep) {
                    Some(dep_idx) => assert!(dep_idx < idx, "{dep} must be created before {kind}"),
                    None => assert_eq!(*dep, ResourceKind::ReplicationApi),
                }
            }
        }
    }

    #[test]
    fn test_deletion_order_removes_dependents_first() {
        for kind in DELETION_ORDER {
            let idx = position(&DELETION_ORDER, kind).unwrap();
            for dep in kind.spec().depends_on {
                let dep_idx = position(&DELETION_ORDER, *dep).unwrap();
                assert!(idx < dep_idx, "{kind} must be deleted before {dep}");
            }
        }
    }

    #[test]
    fn test_orders_cover_every_kind_once() {
        for kind in ResourceKind::ALL {
            assert_eq!(
                DELETION_ORDER.iter().filter(|k| **k == kind).count(),
                1,
                "{kind} in deletion order"
            );
            let expected = usize::from(kind != ResourceKind::ReplicationApi);
            assert_eq!(CREATION_ORDER.iter().filter(|k| **k == kind).count(), expected);
        }
    }

    #[test]
    fn test_shared_resources() {
        let shared: Vec<_> = ResourceKind::ALL
            .into_iter()
            .filter(|k| k.is_shared())
            .collect();
        assert_eq!(
            shared,
            vec![
                ResourceKind::Vpc,
                ResourceKind::ServiceAccount,
                ResourceKind::PrivateConnection,
                ResourceKind::FirewallRule,
                ResourceKind::ReplicationApi,
            ]
        );
    }

    #[test]
    fn test_only_profiles_are_verified_after_create() {
        let verified: Vec<_> = ResourceKind::ALL
            .into_iter()
            .filter(|k| k.spec().verify_after_create)
            .collect();
        assert_eq!(
            verified,
            vec![ResourceKind::SourceProfile, ResourceKind::DestinationProfile]
        );
    }

    #[test]
    fn test_resource_names() {
        let cfg = test_config("orders");
        assert_eq!(ResourceKind::Vpc.resource_name(&cfg), "datastream-vpc");
        assert_eq!(ResourceKind::SqlProxy.resource_name(&cfg), "datastream-orders");
        assert_eq!(ResourceKind::SourceProfile.resource_name(&cfg), "postgres-orders");
        assert_eq!(ResourceKind::DestinationProfile.resource_name(&cfg), "bigquery-orders");
        assert_eq!(ResourceKind::Stream.resource_name(&cfg), "postgres-orders-bigquery");
        assert_eq!(
            ResourceKind::FirewallRule.resource_name(&cfg),
            "allow-datastream-cloudsql-proxy"
        );
    }

    #[test]
    fn test_gce_name_sanitizes() {
        assert_eq!(gce_name("datastream-Order_Lines"), "datastream-order-lines");
        assert_eq!(gce_name("_42"), "ds-42");
        let long = gce_name(&"x".repeat(80));
        assert_eq!(long.len(), 63);
    }
}
