//! MCP server handler implementation.

use std::future::Future;
use std::sync::Arc;

use rmcp::{
    handler::server::router::tool::ToolRouter,
    handler::server::tool::Parameters,
    model::{CallToolResult, Content, ServerCapabilities, ServerInfo},
    schemars, tool, tool_handler, tool_router,
    service::RequestContext,
    ErrorData as McpError, RoleServer, ServerHandler,
};
use serde::Deserialize;
use tracing::{debug, error};

use crate::config::Config;
use crate::error::ExecuteError;
use crate::orchestrator::{ExecutionRequest, Orchestrator};
use crate::output::{ExecutionResult, ExecutionStatus, OutputRecord};
use crate::sandbox::DockerLauncher;

/// Parameters of the `execute_python` tool.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[schemars(crate = "rmcp::schemars")]
pub struct ExecutePythonRequest {
    /// Python code to execute (multi-line code, imports, plotting, etc.).
    pub code: String,
    /// Optional session identifier for persistent state between executions.
    #[serde(default)]
    pub session_id: Option<String>,
}

struct ServerState {
    orchestrator: Orchestrator<DockerLauncher>,
    config: Config,
}

/// The MCP server for sandboxed Python execution.
#[derive(Clone)]
pub struct PyexecServer {
    state: Arc<ServerState>,
    tool_router: ToolRouter<Self>,
}

impl PyexecServer {
    /// Creates a new server over the given orchestrator.
    #[must_use]
    pub fn new(orchestrator: Orchestrator<DockerLauncher>, config: Config) -> Self {
        Self {
            state: Arc::new(ServerState {
                orchestrator,
                config,
            }),
            tool_router: Self::tool_router(),
        }
    }
}

#[tool_router]
impl PyexecServer {
    /// Execute Python code in an isolated, resource-bounded sandbox.
    #[tool(
        description = "Execute Python code in an isolated Docker sandbox with no network access. \
                       Supports multi-line code, preinstalled data-science libraries, and \
                       matplotlib plots (returned as images). Pass a session_id to persist \
                       variables and files across calls via the session workspace."
    )]
    async fn execute_python(
        &self,
        Parameters(req): Parameters<ExecutePythonRequest>,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        if req.code.trim().is_empty() {
            return Ok(CallToolResult::error(vec![Content::text(
                "Error: No Python code provided",
            )]));
        }

        let token = bearer_token(&context);
        debug!(session_id = ?req.session_id, has_token = token.is_some(), "Tool call received");

        let mut request = ExecutionRequest::new(req.code, &self.state.config);
        if let Some(id) = req.session_id {
            request = request.with_session_id(id);
        }

        match self
            .state
            .orchestrator
            .execute(token.as_deref(), &request)
            .await
        {
            Ok(result) => Ok(render_result(&result, request.deadline.as_secs())),
            Err(ExecuteError::Denied(reason)) => Ok(CallToolResult::error(vec![Content::text(
                format!("✗ Unauthorized: {reason}"),
            )])),
            Err(e) => {
                error!(error = %e, "Request failed before execution");
                Ok(CallToolResult::error(vec![Content::text(format!(
                    "✗ Error executing code: {e}"
                ))]))
            }
        }
    }
}

#[tool_handler]
impl ServerHandler for PyexecServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Sandboxed Python execution. Call execute_python with Python code; \
                 pass a session_id to keep state between calls."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

/// Extracts the bearer token from the HTTP request parts, when the transport
/// provides them.
fn bearer_token(context: &RequestContext<RoleServer>) -> Option<String> {
    let parts = context.extensions.get::<http::request::Parts>()?;
    let header = parts
        .headers
        .get(http::header::AUTHORIZATION)?
        .to_str()
        .ok()?;
    header.strip_prefix("Bearer ").map(str::to_owned)
}

/// Shapes an execution result into MCP content.
///
/// Text and error records are concatenated into one text block in emission
/// order (error records prefixed `ERROR:`); image records become image
/// content items.
fn render_result(result: &ExecutionResult, deadline_secs: u64) -> CallToolResult {
    let mut text = String::new();
    for record in &result.records {
        match record {
            OutputRecord::Text(data) => text.push_str(data),
            OutputRecord::Error(data) => {
                text.push_str("ERROR: ");
                text.push_str(data);
                if !data.ends_with('\n') {
                    text.push('\n');
                }
            }
            OutputRecord::Image(_) => {}
        }
    }

    if result.truncated {
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str("[output truncated: size limit reached]");
    }

    match result.status {
        ExecutionStatus::Completed => {}
        ExecutionStatus::TimedOut => {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&format!(
                "✗ Execution timed out after {deadline_secs} seconds"
            ));
        }
        ExecutionStatus::Failed => {
            // Output collected before the failure is still useful; surface it
            // ahead of the failure message.
            let detail = result.failure.as_deref().unwrap_or("unknown error");
            let mut message = String::new();
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                message.push_str(trimmed);
                message.push('\n');
            }
            message.push_str(&format!("✗ Sandbox execution failed: {detail}"));
            return CallToolResult::error(vec![Content::text(message)]);
        }
    }

    let mut contents = Vec::new();
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        contents.push(Content::text(trimmed.to_string()));
    }
    for record in &result.records {
        if let OutputRecord::Image(data) = record {
            contents.push(Content::image(data.clone(), "image/png".to_string()));
        }
    }
    if contents.is_empty() {
        contents.push(Content::text("✓ Execution successful (no output)"));
    }

    CallToolResult::success(contents)
}
