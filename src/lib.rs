//! pyexec-mcp - Sandboxed Python execution MCP server.
//!
//! This crate executes untrusted Python code in isolated, resource-bounded
//! Docker containers and exposes that capability as an MCP tool. Each request
//! gets its own sandbox (no network, capped memory and CPU, unprivileged
//! identity); an optional session id binds the request to a durable workspace
//! that persists files across calls.
//!
//! # Request lifecycle
//!
//! validate bearer token → resolve session workspace → launch sandbox →
//! stream code in, collect framed output events under the deadline →
//! tear the sandbox down (always) → classify events into typed,
//! size-bounded output records.
//!
//! # Example
//!
//! ```no_run
//! use pyexec_mcp::{config::Config, server, system};
//!
//! #[tokio::main]
//! async fn main() -> miette::Result<()> {
//!     let config = Config::default();
//!
//!     // Validate docker and the runtime image are available
//!     system::check_all(&config.image)?;
//!
//!     // Start the MCP server
//!     server::run(config).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod output;
pub mod protocol;
pub mod sandbox;
pub mod server;
pub mod session;
pub mod system;

// Re-export commonly used types
pub use error::{Error, Result};
pub use orchestrator::{ExecutionRequest, Orchestrator};
pub use output::{ExecutionResult, ExecutionStatus, OutputRecord};
pub use sandbox::{DockerLauncher, ResourceLimits, SandboxHandle, SandboxLauncher};
