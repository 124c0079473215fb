//! pyexec-mcp - Entry Point
//!
//! This is the main entry point for the MCP server binary.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use miette::{IntoDiagnostic, Result};
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, EnvFilter};

use pyexec_mcp::config::{self, Config};
use pyexec_mcp::{server, system};

/// pyexec-mcp - Sandboxed Python execution over MCP.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JWKS discovery endpoint for trusted signing keys
    #[arg(long, env = "PYEXEC_JWKS_URI")]
    jwks_uri: Option<String>,

    /// Expected token issuer (required with --jwks-uri)
    #[arg(long, env = "PYEXEC_ISSUER")]
    issuer: Option<String>,

    /// Expected token audience
    #[arg(long, env = "PYEXEC_AUDIENCE", default_value = config::DEFAULT_AUDIENCE)]
    audience: String,

    /// Token signature algorithm (e.g. RS256, ES256)
    #[arg(long, env = "PYEXEC_ALGORITHM", default_value = "RS256")]
    algorithm: String,

    /// Path to a static PEM public key (alternative to --jwks-uri)
    #[arg(long, env = "PYEXEC_PUBLIC_KEY")]
    public_key: Option<PathBuf>,

    /// Root directory for persisted state (sessions, dev credentials)
    #[arg(long, env = "PYEXEC_STATE_DIR")]
    state_dir: Option<PathBuf>,

    /// Runtime image executed per request
    #[arg(long, env = "PYEXEC_IMAGE", default_value = config::DEFAULT_IMAGE)]
    image: String,

    /// Listen address for the MCP HTTP transport
    #[arg(long, env = "PYEXEC_BIND", default_value = config::DEFAULT_BIND)]
    bind: String,

    /// Wall-clock execution deadline in seconds
    #[arg(long, env = "PYEXEC_TIMEOUT_SECONDS", default_value_t = 30)]
    timeout_seconds: u64,

    /// Hard memory ceiling per sandbox, in MiB
    #[arg(long, env = "PYEXEC_MEMORY_MB", default_value_t = config::DEFAULT_MEMORY_MB)]
    memory_mb: u64,

    /// Fractional CPU ceiling per sandbox
    #[arg(long, env = "PYEXEC_CPUS", default_value_t = config::DEFAULT_CPUS)]
    cpus: f64,

    /// Cumulative output byte budget per request
    #[arg(long, env = "PYEXEC_MAX_OUTPUT_BYTES", default_value_t = config::DEFAULT_MAX_OUTPUT_BYTES)]
    max_output_bytes: usize,

    /// Skip startup requirement checks (NOT RECOMMENDED)
    #[arg(long, default_value = "false")]
    skip_checks: bool,

    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,
}

impl Args {
    fn into_config(self) -> Result<Config> {
        let mut config = Config::new()
            .with_image(self.image)
            .with_timeout(Duration::from_secs(self.timeout_seconds));

        config.auth.jwks_uri = self.jwks_uri;
        config.auth.issuer = self.issuer;
        config.auth.audience = self.audience;
        config.auth.algorithm = config::parse_algorithm(&self.algorithm).into_diagnostic()?;
        config.auth.public_key_path = self.public_key;

        config.limits.memory_mb = self.memory_mb;
        config.limits.cpus = self.cpus;
        config.limits.max_output_bytes = self.max_output_bytes;

        if let Some(dir) = self.state_dir {
            config = config.with_state_dir(dir);
        }
        config.bind_addr = self.bind;

        config.validate().into_diagnostic()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing. Logs go to stderr; stdout stays clean.
    let filter = if args.verbose {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    info!("pyexec-mcp v{}", env!("CARGO_PKG_VERSION"));

    let skip_checks = args.skip_checks;
    let config = args.into_config()?;

    // Check startup requirements unless skipped
    if skip_checks {
        warn!("Skipping startup requirement checks (--skip-checks). This is NOT recommended!");
        warn!("A missing runtime image will only surface as a mid-request failure.");
    } else {
        info!("Checking startup requirements...");

        match system::check_all(&config.image) {
            Ok(reqs) => {
                info!(
                    "Requirements satisfied: docker {}, image {:?} present",
                    reqs.docker_version, reqs.image
                );
            }
            Err(e) => {
                error!("Startup requirement check failed");
                return Err(e).into_diagnostic();
            }
        }
    }

    config.prepare().into_diagnostic()?;

    // Run the MCP server
    server::run(config).await.into_diagnostic()
}
