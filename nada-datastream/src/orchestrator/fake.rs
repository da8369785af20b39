//! In-memory catalog for orchestrator tests

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Mutex;

use crate::catalog::{ResourceCatalog, ResourceKind};
use crate::config::ProvisioningConfig;
use crate::control_plane::ControlPlaneError;
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    EnableApis,
    Exists(ResourceKind),
    Create(ResourceKind),
    Delete(ResourceKind),
    ListStreams,
}

impl Call {
    pub fn is_mutation(&self) -> bool {
        matches!(self, Call::Create(_) | Call::Delete(_))
    }
}

#[derive(Default)]
pub struct FakeCatalog {
    present: Mutex<BTreeSet<ResourceKind>>,
    streams: Mutex<Vec<String>>,
    fail_exists: Mutex<BTreeSet<ResourceKind>>,
    fail_create: Mutex<BTreeSet<ResourceKind>>,
    fail_delete: Mutex<BTreeSet<ResourceKind>>,
    /// Create reports success without the resource appearing
    silent_create: Mutex<BTreeSet<ResourceKind>>,
    calls: Mutex<Vec<Call>>,
}

fn failure(what: &str) -> ControlPlaneError {
    ControlPlaneError::Failed {
        command: format!("fake {what}"),
        code: Some(1),
        stderr: format!("{what} failed"),
    }
}

impl FakeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_present(self, kinds: &[ResourceKind]) -> Self {
        self.present.lock().unwrap().extend(kinds.iter().copied());
        self
    }

    pub fn with_streams(self, streams: &[&str]) -> Self {
        *self.streams.lock().unwrap() = streams.iter().map(ToString::to_string).collect();
        self
    }

    pub fn failing_exists(self, kind: ResourceKind) -> Self {
        self.fail_exists.lock().unwrap().insert(kind);
        self
    }

    pub fn failing_create(self, kind: ResourceKind) -> Self {
        self.fail_create.lock().unwrap().insert(kind);
        self
    }

    pub fn failing_delete(self, kind: ResourceKind) -> Self {
        self.fail_delete.lock().unwrap().insert(kind);
        self
    }

    pub fn silently_failing_create(self, kind: ResourceKind) -> Self {
        self.silent_create.lock().unwrap().insert(kind);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn mutations(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_mutation).collect()
    }

    pub fn present(&self) -> BTreeSet<ResourceKind> {
        self.present.lock().unwrap().clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ResourceCatalog for FakeCatalog {
    async fn enable_apis(&self, _cfg: &ProvisioningConfig) -> Result<()> {
        self.record(Call::EnableApis);
        self.present
            .lock()
            .unwrap()
            .insert(ResourceKind::ReplicationApi);
        Ok(())
    }

    async fn exists(
        &self,
        _cfg: &ProvisioningConfig,
        kind: ResourceKind,
        name: &str,
    ) -> Result<bool> {
        self.record(Call::Exists(kind));
        if self.fail_exists.lock().unwrap().contains(&kind) {
            return Err(Error::ExistenceCheck {
                kind,
                name: name.to_string(),
                source: failure("exists"),
            });
        }
        Ok(self.present.lock().unwrap().contains(&kind))
    }

    async fn create(&self, _cfg: &ProvisioningConfig, kind: ResourceKind, name: &str) -> Result<()> {
        self.record(Call::Create(kind));
        if self.fail_create.lock().unwrap().contains(&kind) {
            return Err(Error::Create {
                kind,
                name: name.to_string(),
                source: failure("create"),
            });
        }
        if !self.silent_create.lock().unwrap().contains(&kind) {
            self.present.lock().unwrap().insert(kind);
        }
        Ok(())
    }

    async fn delete(&self, _cfg: &ProvisioningConfig, kind: ResourceKind, name: &str) -> Result<()> {
        self.record(Call::Delete(kind));
        if self.fail_delete.lock().unwrap().contains(&kind) {
            return Err(Error::Delete {
                kind,
                name: name.to_string(),
                source: failure("delete"),
            });
        }
        self.present.lock().unwrap().remove(&kind);
        Ok(())
    }

    async fn list_streams(&self, _cfg: &ProvisioningConfig) -> Result<Vec<String>> {
        self.record(Call::ListStreams);
        Ok(self.streams.lock().unwrap().clone())
    }
}
