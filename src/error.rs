//! Error types for pyexec-mcp.
//!
//! Uses thiserror for deriving std::error::Error and miette for rich diagnostics.

use miette::Diagnostic;
use thiserror::Error;

use crate::auth::DenyReason;

/// Top-level error type for the application.
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error")]
    #[diagnostic(code(pyexec::config))]
    Config(#[from] ConfigError),

    /// Auth setup error (key material, not per-request denial)
    #[error("Auth setup failed")]
    #[diagnostic(code(pyexec::auth::setup))]
    AuthSetup(#[from] AuthSetupError),

    /// System requirements not met
    #[error("System requirements check failed")]
    #[diagnostic(code(pyexec::system))]
    SystemCheck(#[from] SystemCheckError),

    /// Session store error
    #[error("Session store error")]
    #[diagnostic(code(pyexec::session))]
    Session(#[from] SessionError),

    /// MCP server error
    #[error("MCP server error")]
    #[diagnostic(code(pyexec::server))]
    Server(#[from] ServerError),

    /// I/O error
    #[error("I/O error: {0}")]
    #[diagnostic(code(pyexec::io))]
    Io(#[from] std::io::Error),
}

/// Errors in the configuration surface.
#[derive(Error, Debug, Diagnostic)]
pub enum ConfigError {
    /// JWKS discovery requires a configured issuer
    #[error("--jwks-uri requires --issuer to be set")]
    #[diagnostic(
        code(pyexec::config::issuer_required),
        help("Set PYEXEC_ISSUER to the identity provider's issuer URL")
    )]
    IssuerRequired,

    /// Unknown signing algorithm identifier
    #[error("Unknown signing algorithm: {0}")]
    #[diagnostic(
        code(pyexec::config::algorithm),
        help("Use an asymmetric algorithm identifier such as RS256 or ES256")
    )]
    UnknownAlgorithm(String),

    /// State directory could not be created
    #[error("Failed to prepare state directory: {context}")]
    #[diagnostic(code(pyexec::config::state_dir))]
    StateDir {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors establishing trusted key material at startup.
///
/// These are distinct from per-request denials, which are `AuthDecision::Denied`
/// values rather than errors.
#[derive(Error, Debug, Diagnostic)]
pub enum AuthSetupError {
    /// Static public key file could not be read or parsed
    #[error("Failed to load public key from {path}")]
    #[diagnostic(
        code(pyexec::auth::public_key),
        help("The file must contain a PEM-encoded public key matching the configured algorithm")
    )]
    PublicKey { path: String, reason: String },

    /// JWKS document could not be fetched from the discovery endpoint
    #[error("Failed to fetch JWKS from {uri}: {reason}")]
    #[diagnostic(
        code(pyexec::auth::jwks_fetch),
        help("Check that the discovery endpoint is reachable and serves a JWK set")
    )]
    JwksFetch { uri: String, reason: String },

    /// JWKS document contained no usable keys
    #[error("JWKS from {uri} contains no usable keys for the configured algorithm")]
    #[diagnostic(code(pyexec::auth::jwks_empty))]
    JwksEmpty { uri: String },

    /// Development keypair generation failed
    #[error("Failed to generate development keypair: {0}")]
    #[diagnostic(code(pyexec::auth::dev_keygen))]
    DevKeygen(String),

    /// Development credential files could not be written
    #[error("Failed to write development credentials: {context}")]
    #[diagnostic(code(pyexec::auth::dev_write))]
    DevWrite {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors resolving a session workspace.
#[derive(Error, Debug, Diagnostic)]
pub enum SessionError {
    /// Session id failed validation before any filesystem access
    #[error("Invalid session id {id:?}: {reason}")]
    #[diagnostic(
        code(pyexec::session::invalid_id),
        help("Session ids are 1-64 characters from [A-Za-z0-9._-], and not '.' or '..'")
    )]
    InvalidId { id: String, reason: String },

    /// Workspace directory could not be created or accessed
    #[error("I/O error on session workspace: {context}")]
    #[diagnostic(code(pyexec::session::io))]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors launching a sandbox.
#[derive(Error, Debug, Diagnostic)]
pub enum SandboxError {
    /// The container process could not be spawned
    #[error("Failed to launch sandbox: {0}")]
    #[diagnostic(
        code(pyexec::sandbox::launch),
        help("Check that the docker CLI is installed and the runtime image is present")
    )]
    LaunchFailed(String),
}

/// Errors in the execution protocol, independent of guest-code behavior.
#[derive(Error, Debug, Diagnostic)]
pub enum ProtocolError {
    /// A frame on the sandbox's output stream was not valid JSON
    #[error("Malformed protocol frame: {0}")]
    #[diagnostic(code(pyexec::protocol::framing))]
    Framing(String),

    /// The output stream ended before the end-of-execution marker
    #[error("Sandbox output ended without an end-of-execution marker")]
    #[diagnostic(code(pyexec::protocol::truncated_stream))]
    UnexpectedEof,

    /// Reading from the sandbox's output stream failed
    #[error("I/O error on sandbox output stream: {0}")]
    #[diagnostic(code(pyexec::protocol::io))]
    Io(#[source] std::io::Error),
}

/// Errors terminating a request before execution starts.
///
/// Timeouts, protocol failures, and guest errors are not represented here:
/// those still produce an `ExecutionResult` carrying partial output.
#[derive(Error, Debug, Diagnostic)]
pub enum ExecuteError {
    /// The bearer token was rejected; no resource was allocated
    #[error("Authorization denied: {0}")]
    #[diagnostic(code(pyexec::execute::denied))]
    Denied(DenyReason),

    /// Session workspace provisioning failed
    #[error("Session provisioning failed")]
    #[diagnostic(code(pyexec::execute::session))]
    Session(#[from] SessionError),

    /// Sandbox launch failed
    #[error("Sandbox provisioning failed")]
    #[diagnostic(code(pyexec::execute::launch))]
    Launch(#[from] SandboxError),
}

/// Errors in the startup requirement checks.
#[derive(Error, Debug, Diagnostic)]
pub enum SystemCheckError {
    /// The docker CLI did not respond
    #[error("Docker is not available: {0}")]
    #[diagnostic(
        code(pyexec::system::docker),
        help("Install Docker and ensure the daemon is running and reachable")
    )]
    DockerUnavailable(String),

    /// The configured runtime image is not present locally
    #[error("Runtime image {image:?} not found")]
    #[diagnostic(
        code(pyexec::system::image),
        help("Pull or build the runtime image before starting the server")
    )]
    ImageMissing { image: String },
}

/// Errors related to the MCP server.
#[derive(Error, Debug, Diagnostic)]
pub enum ServerError {
    /// Failed to bind the listen address
    #[error("Failed to bind {addr}: {reason}")]
    #[diagnostic(code(pyexec::server::bind))]
    Bind { addr: String, reason: String },

    /// Transport error
    #[error("Transport error: {0}")]
    #[diagnostic(code(pyexec::server::transport))]
    Transport(String),
}

/// Result type alias for this crate.
pub type Result<T> = std::result::Result<T, Error>;
