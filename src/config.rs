//! Server configuration.
//!
//! All options are recognized both as CLI flags (see `main.rs`) and as
//! `PYEXEC_*` environment variables. Defaults match the reference deployment:
//! 512 MiB / 0.5 CPU per sandbox, a 30 second execution deadline, and a 1 MiB
//! output budget.

use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::time::Duration;

use jsonwebtoken::Algorithm;

use crate::error::ConfigError;

/// Default expected token audience.
pub const DEFAULT_AUDIENCE: &str = "mcp-pyexec";

/// Default runtime image executed per request.
pub const DEFAULT_IMAGE: &str = "pyexec-runtime";

/// Default listen address for the MCP HTTP transport.
pub const DEFAULT_BIND: &str = "127.0.0.1:8948";

/// Default wall-clock execution deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default hard memory ceiling per sandbox, in MiB.
pub const DEFAULT_MEMORY_MB: u64 = 512;

/// Default fractional CPU ceiling per sandbox.
pub const DEFAULT_CPUS: f64 = 0.5;

/// Default cumulative output byte budget per request.
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;

/// Directory permissions: owner read/write/execute only (0700).
const DIR_PERMISSIONS: u32 = 0o700;

/// Token validation configuration.
///
/// Two trusted-key sources exist behind the same validation logic:
/// a JWKS discovery endpoint (production, requires `issuer`) or a static
/// PEM public key file. With neither configured the server runs in
/// development mode and self-generates a keypair at startup.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Discovery endpoint for trusted signing keys (JWKS document).
    pub jwks_uri: Option<String>,
    /// Expected token issuer; required together with `jwks_uri`.
    pub issuer: Option<String>,
    /// Expected token audience.
    pub audience: String,
    /// Signature algorithm tokens must use.
    pub algorithm: Algorithm,
    /// Path to a static PEM public key, used when no discovery endpoint is set.
    pub public_key_path: Option<PathBuf>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwks_uri: None,
            issuer: None,
            audience: String::from(DEFAULT_AUDIENCE),
            algorithm: Algorithm::RS256,
            public_key_path: None,
        }
    }
}

/// Per-sandbox resource ceilings and the per-request output budget.
#[derive(Debug, Clone)]
pub struct LimitsConfig {
    /// Hard memory ceiling in MiB.
    pub memory_mb: u64,
    /// Fractional CPU ceiling.
    pub cpus: f64,
    /// Wall-clock execution deadline.
    pub timeout: Duration,
    /// Cumulative output byte budget.
    pub max_output_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            memory_mb: DEFAULT_MEMORY_MB,
            cpus: DEFAULT_CPUS,
            timeout: DEFAULT_TIMEOUT,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }
}

/// Complete server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Token validation settings.
    pub auth: AuthConfig,
    /// Sandbox resource ceilings.
    pub limits: LimitsConfig,
    /// Root directory for persisted state (sessions, dev credentials).
    pub state_dir: PathBuf,
    /// Runtime image name.
    pub image: String,
    /// Listen address for the HTTP transport.
    pub bind_addr: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            auth: AuthConfig::default(),
            limits: LimitsConfig::default(),
            state_dir: default_state_dir(),
            image: String::from(DEFAULT_IMAGE),
            bind_addr: String::from(DEFAULT_BIND),
        }
    }
}

impl Config {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the state directory.
    #[must_use]
    pub fn with_state_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_dir = path.into();
        self
    }

    /// Sets the runtime image.
    #[must_use]
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    /// Sets the execution deadline.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.limits.timeout = timeout;
        self
    }

    /// Directory holding one workspace per session id.
    #[must_use]
    pub fn sessions_dir(&self) -> PathBuf {
        self.state_dir.join("sessions")
    }

    /// Directory holding request-scoped scratch workspaces.
    #[must_use]
    pub fn scratch_dir(&self) -> PathBuf {
        self.state_dir.join("scratch")
    }

    /// Checks internal consistency of the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::IssuerRequired` if a JWKS discovery endpoint is
    /// configured without an expected issuer.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.jwks_uri.is_some() && self.auth.issuer.is_none() {
            return Err(ConfigError::IssuerRequired);
        }
        Ok(())
    }

    /// Creates the state directory tree with restrictive permissions.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::StateDir` if a directory cannot be created.
    pub fn prepare(&self) -> Result<(), ConfigError> {
        for dir in [&self.state_dir, &self.sessions_dir(), &self.scratch_dir()] {
            std::fs::create_dir_all(dir).map_err(|e| ConfigError::StateDir {
                context: format!("failed to create {}", dir.display()),
                source: e,
            })?;
            let permissions = std::fs::Permissions::from_mode(DIR_PERMISSIONS);
            std::fs::set_permissions(dir, permissions).map_err(|e| ConfigError::StateDir {
                context: format!("failed to set permissions on {}", dir.display()),
                source: e,
            })?;
        }
        Ok(())
    }
}

/// Parses a signing algorithm identifier.
///
/// # Errors
///
/// Returns `ConfigError::UnknownAlgorithm` for identifiers jsonwebtoken
/// does not recognize.
pub fn parse_algorithm(name: &str) -> Result<Algorithm, ConfigError> {
    name.parse()
        .map_err(|_| ConfigError::UnknownAlgorithm(name.to_string()))
}

/// Returns the default state directory.
///
/// Uses `XDG_DATA_HOME` if set, otherwise falls back to `~/.pyexec-mcp/`.
#[must_use]
pub fn default_state_dir() -> PathBuf {
    if let Ok(xdg_data) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(xdg_data).join("pyexec-mcp");
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".pyexec-mcp");
    }

    // Last resort: use /tmp
    PathBuf::from("/tmp/pyexec-mcp")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.auth.audience, DEFAULT_AUDIENCE);
        assert_eq!(config.auth.algorithm, Algorithm::RS256);
        assert!(config.auth.jwks_uri.is_none());
        assert_eq!(config.limits.memory_mb, DEFAULT_MEMORY_MB);
        assert_eq!(config.limits.timeout, DEFAULT_TIMEOUT);
        assert_eq!(config.limits.max_output_bytes, DEFAULT_MAX_OUTPUT_BYTES);
        assert_eq!(config.image, DEFAULT_IMAGE);
    }

    #[test]
    fn test_jwks_requires_issuer() {
        let mut config = Config::default();
        config.auth.jwks_uri = Some(String::from("https://idp.example.com/jwks.json"));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::IssuerRequired)
        ));

        config.auth.issuer = Some(String::from("https://idp.example.com/"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_algorithm() {
        assert_eq!(parse_algorithm("RS256").unwrap(), Algorithm::RS256);
        assert_eq!(parse_algorithm("ES256").unwrap(), Algorithm::ES256);
        assert!(parse_algorithm("none").is_err());
    }

    #[test]
    fn test_prepare_creates_state_tree() {
        let temp = tempfile::TempDir::new().expect("failed to create temp dir");
        let config = Config::new().with_state_dir(temp.path().join("state"));

        config.prepare().expect("prepare should succeed");
        assert!(config.sessions_dir().is_dir());
        assert!(config.scratch_dir().is_dir());

        let mode = std::fs::metadata(&config.state_dir)
            .expect("failed to read metadata")
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(mode, DIR_PERMISSIONS);
    }

    #[test]
    fn test_default_state_dir() {
        let dir = default_state_dir();
        assert!(dir.to_string_lossy().contains("pyexec-mcp"));
    }
}
