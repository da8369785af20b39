//! Pipeline orchestrator
//!
//! Walks the fixed resource set in dependency order. Creation is idempotent
//! and rolls back what the current run created when a step fails. Deletion
//! leaves shared resources alone while other pipelines still use them and
//! keeps going past individual failures.

mod create;
mod delete;
mod detection;
#[cfg(test)]
pub(crate) mod fake;

pub use create::CreationLedger;
pub use detection::other_pipelines_exist;

use std::sync::Arc;

use crate::catalog::ResourceCatalog;

pub struct Orchestrator {
    catalog: Arc<dyn ResourceCatalog>,
}

impl Orchestrator {
    pub fn new(catalog: Arc<dyn ResourceCatalog>) -> Self {
        Self { catalog }
    }
}
