//! Other-pipeline detection
//!
//! Shared resources may only be removed when this pipeline is the last one in
//! the project. Every pipeline owns exactly one stream, so any stream with a
//! different full name means another pipeline is still running, whatever
//! region it lives in.

/// True when `streams` (full resource names) holds any stream other than `own`
pub fn other_pipelines_exist(streams: &[String], own: &str) -> bool {
    streams.iter().any(|s| s != own)
}
