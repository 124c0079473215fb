//! MCP server implementation.
//!
//! This module provides the MCP server that exposes sandboxed Python
//! execution as a tool, served over the streamable HTTP transport so each
//! request can carry a bearer token.

mod handler;

pub use handler::PyexecServer;

use rmcp::transport::streamable_http_server::{
    session::local::LocalSessionManager, StreamableHttpService,
};
use tracing::info;

use crate::auth::{bootstrap_dev_credentials, AuthGate, KeySource};
use crate::config::Config;
use crate::error::ServerError;
use crate::orchestrator::Orchestrator;
use crate::sandbox::DockerLauncher;
use crate::session::SessionStore;

/// Builds the trusted key source from the configuration.
///
/// Priority: JWKS discovery endpoint, then static key file, then the
/// development bootstrap (self-generated keypair + pre-minted token).
async fn build_key_source(config: &Config) -> crate::error::Result<KeySource> {
    if let Some(uri) = &config.auth.jwks_uri {
        return Ok(KeySource::from_discovery(uri).await?);
    }

    if let Some(path) = &config.auth.public_key_path {
        return Ok(KeySource::from_pem_file(path, config.auth.algorithm)?);
    }

    let creds = bootstrap_dev_credentials(
        &config.auth.audience,
        config.auth.algorithm,
        &config.state_dir,
    )?;
    info!(
        "Development mode: authenticate with the token in {}",
        config.state_dir.join("dev-token.jwt").display()
    );
    Ok(creds.key_source)
}

/// Run the MCP server.
///
/// Builds the orchestrator from the configuration and serves it until the
/// process is terminated.
///
/// # Errors
///
/// Returns error if auth setup, session-store creation, binding, or the
/// transport fails.
pub async fn run(config: Config) -> crate::error::Result<()> {
    let key_source = build_key_source(&config).await?;
    let gate = AuthGate::new(&config.auth, key_source);

    let sessions = SessionStore::new(config.sessions_dir(), config.scratch_dir())?;
    let launcher = DockerLauncher::new(&config.image);
    let orchestrator = Orchestrator::new(gate, sessions, launcher);

    let server = PyexecServer::new(orchestrator, config.clone());

    let service = StreamableHttpService::new(
        move || Ok(server.clone()),
        LocalSessionManager::default().into(),
        Default::default(),
    );
    let router = axum::Router::new().nest_service("/mcp", service);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .map_err(|e| ServerError::Bind {
            addr: config.bind_addr.clone(),
            reason: e.to_string(),
        })?;

    info!(addr = %config.bind_addr, "Serving MCP over streamable HTTP at /mcp");

    axum::serve(listener, router)
        .await
        .map_err(|e| ServerError::Transport(e.to_string()))?;

    info!("Server shutdown complete");
    Ok(())
}
