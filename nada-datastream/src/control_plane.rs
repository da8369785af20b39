//! Control plane access
//!
//! A [`ControlPlane`] executes one named operation against the cloud provider
//! and hands back the decoded JSON response. [`GcloudClient`] is the real
//! implementation and shells out to `gcloud`, scoping every call to the
//! project and asking for JSON output.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use snafu::{ResultExt, Snafu};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Upper bound for a single gcloud invocation
pub const GCLOUD_TIMEOUT: Duration = Duration::from_secs(45 * 60);

const REDACTED_FLAGS: [&str; 1] = ["--postgresql-password="];

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ControlPlaneError {
    #[snafu(display("could not start `{command}`"))]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[snafu(display("waiting for `{command}`"))]
    Wait {
        command: String,
        source: std::io::Error,
    },

    #[snafu(display("`{command}` did not finish within {after:?}"))]
    Timeout { command: String, after: Duration },

    #[snafu(display("`{command}` failed (exit code {code:?}): {stderr}"))]
    Failed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[snafu(display("decoding output of `{command}`"))]
    Decode {
        command: String,
        source: serde_json::Error,
    },
}

#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Run the operation identified by `args` and return its decoded output.
    /// Operations without output return `Value::Null`.
    async fn execute(&self, args: Vec<String>) -> Result<Value, ControlPlaneError>;
}

/// Run an operation and decode its output into `T`
pub async fn fetch<T: DeserializeOwned>(
    control_plane: &dyn ControlPlane,
    args: Vec<String>,
) -> Result<T, ControlPlaneError> {
    let command = display_command(&args);
    let value = control_plane.execute(args).await?;
    serde_json::from_value(value).context(DecodeSnafu { command })
}

/// Like [`fetch`] for list operations; no output means an empty list
pub async fn fetch_list<T: DeserializeOwned>(
    control_plane: &dyn ControlPlane,
    args: Vec<String>,
) -> Result<Vec<T>, ControlPlaneError> {
    let items: Option<Vec<T>> = fetch(control_plane, args).await?;
    Ok(items.unwrap_or_default())
}

/// Render an argument list for logs and errors, hiding secrets
pub fn display_command(args: &[String]) -> String {
    args.iter()
        .map(|arg| {
            match REDACTED_FLAGS.iter().find(|flag| arg.starts_with(*flag)) {
                Some(flag) => format!("{flag}***"),
                None => arg.clone(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// `gcloud` command line client
#[derive(Debug, Clone)]
pub struct GcloudClient {
    binary: String,
    project: String,
    timeout: Duration,
}

impl GcloudClient {
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            binary: "gcloud".to_string(),
            project: project.into(),
            timeout: GCLOUD_TIMEOUT,
        }
    }

    /// Use another executable in place of `gcloud`
    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn full_args(&self, mut args: Vec<String>) -> Vec<String> {
        args.push(format!("--project={}", self.project));
        args.push("--format=json".to_string());
        args
    }
}

#[async_trait]
impl ControlPlane for GcloudClient {
    async fn execute(&self, args: Vec<String>) -> Result<Value, ControlPlaneError> {
        let args = self.full_args(args);
        let command = format!("{} {}", self.binary, display_command(&args));
        debug!(command = %command, "Running control plane operation");

        let expression = duct::cmd(self.binary.as_str(), args.iter())
            .stdout_capture()
            .stderr_capture()
            .unchecked();
        #[cfg(unix)]
        let expression = expression.before_spawn(|cmd| {
            // Own process group, so expiry reaches helpers gcloud forks too
            std::os::unix::process::CommandExt::process_group(cmd, 0);
            Ok(())
        });
        let handle = expression
            .start()
            .context(SpawnSnafu { command: &command })?;
        let handle = Arc::new(handle);
        let waiter = Arc::clone(&handle);

        let waited = tokio::time::timeout(
            self.timeout,
            tokio::task::spawn_blocking(move || waiter.wait().cloned()),
        )
        .await;

        let output = match waited {
            Ok(joined) => joined
                .map_err(std::io::Error::other)
                .and_then(|output| output)
                .context(WaitSnafu { command: &command })?,
            Err(_) => {
                warn!(command = %command, after = ?self.timeout, "Deadline expired, killing process");
                kill_process_tree(&handle, &command);
                return TimeoutSnafu {
                    command,
                    after: self.timeout,
                }
                .fail();
            }
        };

        if !output.status.success() {
            return FailedSnafu {
                command,
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .fail();
        }

        if output.stdout.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&output.stdout).context(DecodeSnafu { command })
    }
}

/// Kill the process and everything left in its process group. The blocking
/// waiter only returns once every holder of the captured pipes is gone.
fn kill_process_tree(handle: &duct::Handle, command: &str) {
    #[cfg(unix)]
    for pid in handle.pids() {
        let group = format!("-{pid}");
        let killed = duct::cmd("kill", ["-KILL", "--", group.as_str()])
            .stdout_null()
            .stderr_null()
            .unchecked()
            .run();
        if let Err(e) = killed {
            warn!(command = %command, pid = pid, error = %e, "Failed to kill process group");
        }
    }
    if let Err(e) = handle.kill() {
        warn!(command = %command, error = %e, "Failed to kill timed out process");
    }
}
