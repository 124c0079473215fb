//! Shared scaffolding for integration tests.
//!
//! [`ScriptLauncher`] stands in for the container runtime: it launches
//! `sh -c` scripts that speak the execution protocol on stdout, with the
//! resolved workspace path exported as `$WORKSPACE`. This exercises the full
//! request lifecycle without requiring Docker on the test host.

#![allow(dead_code)]

use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::process::Command;

use pyexec_mcp::auth::{bootstrap_dev_credentials, AuthGate};
use pyexec_mcp::config::{AuthConfig, Config};
use pyexec_mcp::error::SandboxError;
use pyexec_mcp::orchestrator::{ExecutionRequest, Orchestrator};
use pyexec_mcp::sandbox::{ResourceLimits, SandboxHandle, SandboxLauncher};
use pyexec_mcp::session::SessionStore;

/// Launches `sh -c` scripts in place of containers, counting launches.
pub struct ScriptLauncher {
    script: String,
    launches: Arc<AtomicUsize>,
}

impl ScriptLauncher {
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            launches: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shared launch counter, readable after the launcher is moved into an
    /// orchestrator.
    pub fn counter(&self) -> Arc<AtomicUsize> {
        self.launches.clone()
    }
}

impl SandboxLauncher for ScriptLauncher {
    async fn launch(
        &self,
        workspace: &Path,
        _limits: &ResourceLimits,
    ) -> Result<SandboxHandle, SandboxError> {
        self.launches.fetch_add(1, Ordering::SeqCst);

        let child = Command::new("sh")
            .arg("-c")
            .arg(&self.script)
            .env("WORKSPACE", workspace)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SandboxError::LaunchFailed(e.to_string()))?;

        SandboxHandle::from_child("test-sandbox", child, None)
    }
}

/// A fully wired orchestrator over a temp state directory, with development
/// credentials and a script-backed launcher.
pub struct TestRig {
    pub temp: tempfile::TempDir,
    pub token: String,
    pub launches: Arc<AtomicUsize>,
    pub orchestrator: Orchestrator<ScriptLauncher>,
}

impl TestRig {
    pub fn new(script: &str) -> Self {
        let temp = tempfile::TempDir::new().expect("failed to create temp dir");

        let auth_config = AuthConfig::default();
        let creds =
            bootstrap_dev_credentials(&auth_config.audience, auth_config.algorithm, temp.path())
                .expect("dev credential bootstrap failed");
        let gate = AuthGate::new(&auth_config, creds.key_source);

        let sessions = SessionStore::new(temp.path().join("sessions"), temp.path().join("scratch"))
            .expect("failed to create session store");

        let launcher = ScriptLauncher::new(script);
        let launches = launcher.counter();

        Self {
            temp,
            token: creds.token,
            launches,
            orchestrator: Orchestrator::new(gate, sessions, launcher),
        }
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn sessions_root(&self) -> std::path::PathBuf {
        self.temp.path().join("sessions")
    }

    pub fn scratch_root(&self) -> std::path::PathBuf {
        self.temp.path().join("scratch")
    }
}

/// A request with the stock default limits.
pub fn request(code: &str) -> ExecutionRequest {
    ExecutionRequest::new(code, &Config::default())
}

/// Script emitting one text event and a clean end marker.
pub const HELLO_SCRIPT: &str =
    r#"cat > /dev/null; printf '%s\n' '{"type":"text","data":"hi\n"}' '{"type":"end"}'"#;
