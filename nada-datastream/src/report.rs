//! End-of-run report
//!
//! Collects what happened to each resource during a create or delete run so
//! the operator sees the whole picture, including what rollback did and what
//! still needs manual cleanup.

use chrono::{DateTime, Utc};
use std::fmt;

use crate::catalog::ResourceKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Create => f.write_str("create"),
            Operation::Delete => f.write_str("delete"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Created,
    AlreadyPresent,
    Deleted,
    Absent,
    /// Shared resource left in place because other pipelines use it
    KeptShared,
    RolledBack,
    RollbackFailed,
    Failed,
}

impl Action {
    fn symbol(self) -> &'static str {
        match self {
            Action::Created => "✨",
            Action::AlreadyPresent => "✅",
            Action::Deleted => "🗑️",
            Action::Absent => "  ",
            Action::KeptShared => "🔒",
            Action::RolledBack => "↩️",
            Action::RollbackFailed | Action::Failed => "❌",
        }
    }

    /// Whether the resource may need manual attention
    pub fn needs_cleanup(self) -> bool {
        matches!(self, Action::RollbackFailed | Action::Failed)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Action::Created => "created",
            Action::AlreadyPresent => "already present",
            Action::Deleted => "deleted",
            Action::Absent => "absent",
            Action::KeptShared => "kept (shared)",
            Action::RolledBack => "rolled back",
            Action::RollbackFailed => "rollback failed",
            Action::Failed => "failed",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub kind: ResourceKind,
    pub name: String,
    pub action: Action,
    pub detail: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub operation: Operation,
    /// Database the pipeline replicates
    pub pipeline: String,
    pub started: DateTime<Utc>,
    entries: Vec<Entry>,
}

impl RunReport {
    pub fn new(operation: Operation, pipeline: impl Into<String>) -> Self {
        Self {
            operation,
            pipeline: pipeline.into(),
            started: Utc::now(),
            entries: Vec::new(),
        }
    }

    pub fn record(&mut self, kind: ResourceKind, name: &str, action: Action) {
        self.push(kind, name, action, None);
    }

    pub fn record_error(
        &mut self,
        kind: ResourceKind,
        name: &str,
        action: Action,
        error: &dyn std::error::Error,
    ) {
        self.push(kind, name, action, Some(error_chain(error)));
    }

    fn push(&mut self, kind: ResourceKind, name: &str, action: Action, detail: Option<String>) {
        self.entries.push(Entry {
            kind,
            name: name.to_string(),
            action,
            detail,
        });
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Actions recorded for `kind`, in order
    pub fn actions(&self, kind: ResourceKind) -> Vec<Action> {
        self.entries
            .iter()
            .filter(|e| e.kind == kind)
            .map(|e| e.action)
            .collect()
    }

    pub fn needs_cleanup(&self) -> bool {
        self.entries.iter().any(|e| e.action.needs_cleanup())
    }

    pub fn print(&self) {
        print!("{self}");
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "nada-datastream {} report for {}", self.operation, self.pipeline)?;
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        writeln!(f, "Started: {}", self.started.to_rfc3339())?;
        writeln!(f)?;

        for entry in &self.entries {
            write!(
                f,
                "  {} {:<28} {:<40} {}",
                entry.action.symbol(),
                entry.kind.label(),
                entry.name,
                entry.action
            )?;
            if let Some(detail) = &entry.detail {
                write!(f, ": {detail}")?;
            }
            writeln!(f)?;
        }

        writeln!(f)?;
        if self.needs_cleanup() {
            writeln!(f, "⚠️  Some resources need manual cleanup")
        } else {
            writeln!(f, "✅ Done")
        }
    }
}

/// Render an error and its sources on one line
fn error_chain(error: &dyn std::error::Error) -> String {
    let mut parts = vec![error.to_string()];
    let mut source = error.source();
    while let Some(cause) = source {
        parts.push(cause.to_string());
        source = cause.source();
    }
    parts.join(": ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_plane::ControlPlaneError;
    use crate::error::Error;

    #[test]
    fn test_report_lists_actions_per_kind() {
        let mut report = RunReport::new(Operation::Create, "orders");
        report.record(ResourceKind::Vpc, "datastream-vpc", Action::Created);
        report.record(ResourceKind::Vpc, "datastream-vpc", Action::RolledBack);

        assert_eq!(
            report.actions(ResourceKind::Vpc),
            vec![Action::Created, Action::RolledBack]
        );
        assert!(!report.needs_cleanup());
    }

    #[test]
    fn test_failure_detail_includes_source() {
        let mut report = RunReport::new(Operation::Delete, "orders");
        let err = Error::Delete {
            kind: ResourceKind::SqlProxy,
            name: "datastream-orders".to_string(),
            source: ControlPlaneError::Failed {
                command: "gcloud compute instances delete".to_string(),
                code: Some(1),
                stderr: "resource in use".to_string(),
            },
        };
        report.record_error(ResourceKind::SqlProxy, "datastream-orders", Action::Failed, &err);

        assert!(report.needs_cleanup());
        let rendered = report.to_string();
        assert!(rendered.contains("datastream-orders"));
        assert!(rendered.contains("resource in use"));
        assert!(rendered.contains("manual cleanup"));
    }
}
