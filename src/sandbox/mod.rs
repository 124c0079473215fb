//! Sandbox provisioning.
//!
//! A sandbox is a transient isolated execution context bound to exactly one
//! request: no network, a hard memory ceiling, a fractional CPU ceiling, an
//! unprivileged execution identity, and the resolved workspace mounted at a
//! fixed path. The concrete isolation technology sits behind the
//! [`SandboxLauncher`] trait; the production backend is [`DockerLauncher`],
//! which runs the guest runtime image as a one-shot container.
//!
//! The capability set a backend must provide is deliberately small:
//! spawn-with-limits, stream-in (stdin), stream-out (stdout), and
//! forcibly-terminate. Anything satisfying that interface (a subprocess under
//! cgroups, a micro-VM) can replace the Docker backend without touching the
//! orchestrator.

use std::future::Future;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, instrument, trace, warn};
use uuid::Uuid;

use crate::error::SandboxError;

/// Fixed path where the workspace is mounted inside the sandbox.
pub const WORKSPACE_MOUNT_POINT: &str = "/home/user/session";

/// How long teardown waits for the container and client to die.
const TEARDOWN_GRACE: Duration = Duration::from_secs(5);

/// Per-sandbox resource ceilings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceLimits {
    /// Hard memory ceiling in MiB.
    pub memory_mb: u64,
    /// Fractional CPU ceiling.
    pub cpus: f64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_mb: 512,
            cpus: 0.5,
        }
    }
}

/// Creates isolated execution contexts.
///
/// Implementations must not share state between launched sandboxes: every
/// call provisions a fresh context owned by exactly one request.
pub trait SandboxLauncher: Send + Sync {
    /// Launches a sandbox with the workspace mounted and limits applied.
    ///
    /// # Errors
    ///
    /// Returns `SandboxError::LaunchFailed` if the context cannot be created
    /// (runtime missing, host resource exhaustion). No execution is attempted
    /// in that case.
    fn launch(
        &self,
        workspace: &Path,
        limits: &ResourceLimits,
    ) -> impl Future<Output = Result<SandboxHandle, SandboxError>> + Send;
}

/// Handle to a launched sandbox.
///
/// Owns the child process and exposes its byte streams. Teardown is
/// idempotent and must be invoked on every exit path of the owning request;
/// the child is additionally spawned with kill-on-drop so an abandoned handle
/// cannot leak a running process.
#[derive(Debug)]
pub struct SandboxHandle {
    name: String,
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    /// External kill command (e.g. `docker kill <name>`); terminating the
    /// client process alone does not stop a container.
    reaper: Option<Vec<String>>,
    torn_down: bool,
}

impl SandboxHandle {
    /// Wraps a spawned child process.
    ///
    /// The child must have been spawned with piped stdin/stdout and
    /// kill-on-drop enabled.
    ///
    /// # Errors
    ///
    /// Returns `SandboxError::LaunchFailed` if either stream is missing.
    pub fn from_child(
        name: impl Into<String>,
        mut child: Child,
        reaper: Option<Vec<String>>,
    ) -> Result<Self, SandboxError> {
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SandboxError::LaunchFailed("child stdin not piped".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SandboxError::LaunchFailed("child stdout not piped".to_string()))?;

        Ok(Self {
            name: name.into(),
            child,
            stdin: Some(stdin),
            stdout: Some(stdout),
            reaper,
            torn_down: false,
        })
    }

    /// The sandbox's unique name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Takes the input stream for sending guest code. Yields `None` after the
    /// first call.
    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.stdin.take()
    }

    /// Takes the output stream carrying the execution protocol's frames.
    /// Yields `None` after the first call.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }

    /// Forcibly terminates and reclaims the sandbox.
    ///
    /// Safe to call on an already-dead or already-torn-down handle; the
    /// second and later calls are no-ops. Best-effort: failures are logged,
    /// never surfaced, and the wait for the child is bounded.
    #[instrument(skip(self), fields(sandbox = %self.name))]
    pub async fn teardown(&mut self) {
        if self.torn_down {
            trace!("Teardown already performed");
            return;
        }
        self.torn_down = true;

        if let Some(reaper) = self.reaper.take() {
            trace!(?reaper, "Running external kill command");
            let kill = Command::new(&reaper[0]).args(&reaper[1..]).output();
            match tokio::time::timeout(TEARDOWN_GRACE, kill).await {
                Ok(Ok(output)) if !output.status.success() => {
                    // Expected when the container already exited on its own.
                    trace!(code = ?output.status.code(), "External kill returned non-zero");
                }
                Ok(Err(e)) => warn!(error = %e, "Failed to run external kill command"),
                Err(_) => warn!("External kill command timed out"),
                _ => {}
            }
        }

        let _ = self.child.start_kill();
        match tokio::time::timeout(TEARDOWN_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => debug!(?status, "Sandbox reclaimed"),
            Ok(Err(e)) => warn!(error = %e, "Failed to reap sandbox child"),
            Err(_) => warn!("Timed out waiting for sandbox child to exit"),
        }
    }

    /// Whether teardown has run.
    #[must_use]
    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }
}

/// Launches sandboxes as one-shot Docker containers.
#[derive(Debug, Clone)]
pub struct DockerLauncher {
    image: String,
}

impl DockerLauncher {
    /// Creates a launcher for the given runtime image.
    #[must_use]
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
        }
    }

    /// The runtime image name.
    #[must_use]
    pub fn image(&self) -> &str {
        &self.image
    }

    /// Builds the `docker run` argument list for one sandbox.
    fn run_args(&self, name: &str, workspace: &Path, limits: &ResourceLimits) -> Vec<String> {
        vec![
            "run".to_string(),
            "--name".to_string(),
            name.to_string(),
            "--rm".to_string(),
            "-i".to_string(),
            "--network".to_string(),
            "none".to_string(),
            "--memory".to_string(),
            format!("{}m", limits.memory_mb),
            "--cpus".to_string(),
            limits.cpus.to_string(),
            "--cap-drop".to_string(),
            "ALL".to_string(),
            "--security-opt".to_string(),
            "no-new-privileges".to_string(),
            "-v".to_string(),
            format!("{}:{}", workspace.display(), WORKSPACE_MOUNT_POINT),
            self.image.clone(),
        ]
    }
}

impl SandboxLauncher for DockerLauncher {
    #[instrument(skip(self, workspace), fields(image = %self.image))]
    async fn launch(
        &self,
        workspace: &Path,
        limits: &ResourceLimits,
    ) -> Result<SandboxHandle, SandboxError> {
        let name = format!("pyexec-{}", Uuid::new_v4());
        let args = self.run_args(&name, workspace, limits);
        debug!(%name, workspace = %workspace.display(), "Launching sandbox container");

        let child = Command::new("docker")
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SandboxError::LaunchFailed(format!("failed to spawn docker: {e}")))?;

        let reaper = vec![
            "docker".to_string(),
            "kill".to_string(),
            name.clone(),
        ];
        SandboxHandle::from_child(name, child, Some(reaper))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits() {
        let limits = ResourceLimits::default();
        assert_eq!(limits.memory_mb, 512);
        assert!((limits.cpus - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_docker_run_args() {
        let launcher = DockerLauncher::new("pyexec-runtime");
        let limits = ResourceLimits {
            memory_mb: 256,
            cpus: 0.25,
        };
        let args = launcher.run_args("pyexec-test", Path::new("/srv/sessions/abc"), &limits);

        let joined = args.join(" ");
        assert!(joined.contains("--network none"), "network must be disabled");
        assert!(joined.contains("--memory 256m"));
        assert!(joined.contains("--cpus 0.25"));
        assert!(joined.contains("--cap-drop ALL"));
        assert!(
            joined.contains(&format!("/srv/sessions/abc:{WORKSPACE_MOUNT_POINT}")),
            "workspace must be mounted at the fixed path"
        );
        assert_eq!(args.last().map(String::as_str), Some("pyexec-runtime"));
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent() {
        let child = Command::new("sleep")
            .arg("30")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .expect("failed to spawn sleep");

        let mut handle =
            SandboxHandle::from_child("test-sleep", child, None).expect("handle creation failed");

        handle.teardown().await;
        assert!(handle.is_torn_down());

        // Second call must be a no-op and must not panic or hang.
        handle.teardown().await;
        assert!(handle.is_torn_down());
    }

    #[tokio::test]
    async fn test_teardown_on_already_dead_child() {
        let child = Command::new("true")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .expect("failed to spawn true");

        let mut handle =
            SandboxHandle::from_child("test-dead", child, None).expect("handle creation failed");

        // Give the child a moment to exit on its own.
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.teardown().await;
        assert!(handle.is_torn_down());
    }
}
