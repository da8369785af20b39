//! Error types for provisioning and teardown
//!
//! Every failure carries the resource kind and derived name so log lines and
//! the final error can be matched against what the cloud console shows.

use snafu::Snafu;

use crate::catalog::ResourceKind;
use crate::control_plane::ControlPlaneError;
use crate::credentials::CredentialError;

/// Library result type
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A resource that could not be removed during teardown
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedDeletion {
    pub kind: ResourceKind,
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("checking whether {kind} {name:?} exists"))]
    ExistenceCheck {
        kind: ResourceKind,
        name: String,
        source: ControlPlaneError,
    },

    #[snafu(display("creating {kind} {name:?}"))]
    Create {
        kind: ResourceKind,
        name: String,
        source: ControlPlaneError,
    },

    #[snafu(display("{kind} {name:?} was reported created but cannot be found"))]
    NotFoundAfterCreate { kind: ResourceKind, name: String },

    #[snafu(display("deleting {kind} {name:?}"))]
    Delete {
        kind: ResourceKind,
        name: String,
        source: ControlPlaneError,
    },

    #[snafu(display("{kind} {name:?} not ready after {attempts} attempts"))]
    ReadinessTimeout {
        kind: ResourceKind,
        name: String,
        attempts: u32,
    },

    #[snafu(display(
        "private connection {name:?} is in state {state:?} (expected CREATING or CREATED)"
    ))]
    InvalidState { name: String, state: String },

    #[snafu(display("expected exactly one private connection named {name:?}, found {count}"))]
    AmbiguousPrivateConnection { name: String, count: usize },

    #[snafu(display("listing enabled APIs"))]
    ListApis { source: ControlPlaneError },

    #[snafu(display("enabling API {api}"))]
    EnableApi {
        api: String,
        source: ControlPlaneError,
    },

    #[snafu(display("listing streams"))]
    ListStreams { source: ControlPlaneError },

    #[snafu(display("proxy VM {name:?} has no usable address: {reason}"))]
    ProxyAddress { name: String, reason: String },

    #[snafu(display("writing stream configuration"))]
    StreamConfig { source: std::io::Error },

    #[snafu(display(
        "{} resource(s) could not be deleted and need manual cleanup: {}",
        failed.len(),
        describe_failures(failed)
    ))]
    DeletionIncomplete { failed: Vec<FailedDeletion> },

    #[snafu(display("resolving database credentials"))]
    Credentials { source: CredentialError },
}

fn describe_failures(failed: &[FailedDeletion]) -> String {
    failed
        .iter()
        .map(|f| format!("{} {:?}", f.kind, f.name))
        .collect::<Vec<_>>()
        .join(", ")
}

impl Error {
    /// Resource kind the error is about, if any
    pub fn kind(&self) -> Option<ResourceKind> {
        match self {
            Error::ExistenceCheck { kind, .. }
            | Error::Create { kind, .. }
            | Error::NotFoundAfterCreate { kind, .. }
            | Error::Delete { kind, .. }
            | Error::ReadinessTimeout { kind, .. } => Some(*kind),
            Error::InvalidState { .. } | Error::AmbiguousPrivateConnection { .. } => {
                Some(ResourceKind::PrivateConnection)
            }
            Error::ProxyAddress { .. } => Some(ResourceKind::SqlProxy),
            _ => None,
        }
    }
}
