//! Request lifecycle orchestration.
//!
//! One call to [`Orchestrator::execute`] drives the whole lifecycle:
//! validate the bearer token, resolve the session workspace, launch a
//! sandbox, run the execution protocol under the deadline, tear the sandbox
//! down, and classify the collected output. Teardown runs on every path where
//! a sandbox was launched; between launch and teardown there is no fallible
//! early return, and the handle's kill-on-drop covers an unexpected unwind.
//!
//! Denials and provisioning failures abort before execution with an
//! [`ExecuteError`]. Timeouts, protocol failures, and guest errors are not
//! errors at this level: they come back as an [`ExecutionResult`] carrying
//! whatever output was collected.

use std::time::Duration;

use tracing::{debug, info, instrument};

use crate::auth::{AuthDecision, AuthGate, EXECUTE_SCOPE};
use crate::config::Config;
use crate::error::ExecuteError;
use crate::output::{classify, ExecutionResult};
use crate::protocol;
use crate::sandbox::{ResourceLimits, SandboxLauncher};
use crate::session::SessionStore;

/// One accepted execution request. Immutable once built.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    /// Guest code to execute.
    pub code: String,
    /// Optional session id for a persistent workspace.
    pub session_id: Option<String>,
    /// Wall-clock execution deadline.
    pub deadline: Duration,
    /// Resource ceilings for the sandbox.
    pub limits: ResourceLimits,
    /// Cumulative output byte budget.
    pub output_budget: usize,
}

impl ExecutionRequest {
    /// Creates a request with the configured default limits.
    #[must_use]
    pub fn new(code: impl Into<String>, config: &Config) -> Self {
        Self {
            code: code.into(),
            session_id: None,
            deadline: config.limits.timeout,
            limits: ResourceLimits {
                memory_mb: config.limits.memory_mb,
                cpus: config.limits.cpus,
            },
            output_budget: config.limits.max_output_bytes,
        }
    }

    /// Binds the request to a session.
    #[must_use]
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Overrides the execution deadline.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Overrides the output byte budget.
    #[must_use]
    pub fn with_output_budget(mut self, budget: usize) -> Self {
        self.output_budget = budget;
        self
    }
}

/// Composes the gate, store, and launcher into one request lifecycle.
pub struct Orchestrator<L: SandboxLauncher> {
    auth: AuthGate,
    sessions: SessionStore,
    launcher: L,
}

impl<L: SandboxLauncher> Orchestrator<L> {
    /// Creates an orchestrator over the given collaborators.
    #[must_use]
    pub fn new(auth: AuthGate, sessions: SessionStore, launcher: L) -> Self {
        Self {
            auth,
            sessions,
            launcher,
        }
    }

    /// Executes one request end to end.
    ///
    /// # Errors
    ///
    /// Returns `ExecuteError::Denied` if the token is rejected (no session or
    /// sandbox resource is touched in that case), and
    /// `ExecuteError::Session`/`ExecuteError::Launch` if provisioning fails
    /// before execution.
    #[instrument(skip(self, token, request), fields(session_id = ?request.session_id))]
    pub async fn execute(
        &self,
        token: Option<&str>,
        request: &ExecutionRequest,
    ) -> Result<ExecutionResult, ExecuteError> {
        let claims = match self.auth.validate(token, EXECUTE_SCOPE) {
            AuthDecision::Allowed(claims) => claims,
            AuthDecision::Denied(reason) => {
                debug!(%reason, "Request denied before provisioning");
                return Err(ExecuteError::Denied(reason));
            }
        };
        debug!(sub = ?claims.sub, "Request authorized");

        // Serialize requests naming the same session; anonymous requests and
        // different ids never contend.
        let _session_guard = match &request.session_id {
            Some(id) => Some(self.sessions.session_lock(id).lock_owned().await),
            None => None,
        };

        let workspace = self.sessions.resolve(request.session_id.as_deref())?;

        let mut handle = self
            .launcher
            .launch(workspace.path(), &request.limits)
            .await?;
        info!(sandbox = %handle.name(), "Sandbox launched");

        let outcome = protocol::run(
            &mut handle,
            &request.code,
            request.deadline,
            request.output_budget,
        )
        .await;

        // Unconditional: every outcome of the protocol run flows through
        // here before the workspace handle (and any scratch dir) is released.
        handle.teardown().await;

        let result = classify(outcome, request.output_budget);
        info!(
            status = ?result.status,
            records = result.records.len(),
            truncated = result.truncated,
            "Request finished"
        );
        Ok(result)
    }

    /// The session store backing this orchestrator.
    #[must_use]
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }
}
