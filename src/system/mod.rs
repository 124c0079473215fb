//! Startup requirement checks.
//!
//! Verifies the Docker CLI responds and the runtime image is present before
//! the server starts accepting requests. A missing image would otherwise only
//! surface mid-request as a protocol failure.

use std::process::Command;

use tracing::debug;

use crate::error::SystemCheckError;

/// Results of all startup checks.
#[derive(Debug, Clone)]
pub struct SystemRequirements {
    /// Docker client version string.
    pub docker_version: String,
    /// The runtime image that was verified present.
    pub image: String,
}

/// Checks all requirements and returns detailed results.
///
/// # Errors
///
/// Returns the first failing requirement.
pub fn check_all(image: &str) -> Result<SystemRequirements, SystemCheckError> {
    let docker_version = check_docker()?;
    check_image(image)?;

    Ok(SystemRequirements {
        docker_version,
        image: image.to_string(),
    })
}

/// Checks that the docker CLI responds.
///
/// # Errors
///
/// Returns `SystemCheckError::DockerUnavailable` if the CLI is missing or the
/// daemon does not answer.
pub fn check_docker() -> Result<String, SystemCheckError> {
    let output = Command::new("docker")
        .args(["version", "--format", "{{.Client.Version}}"])
        .output()
        .map_err(|e| SystemCheckError::DockerUnavailable(e.to_string()))?;

    if !output.status.success() {
        return Err(SystemCheckError::DockerUnavailable(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }

    let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
    debug!(%version, "Docker CLI available");
    Ok(version)
}

/// Checks that the runtime image is present locally.
///
/// # Errors
///
/// Returns `SystemCheckError::ImageMissing` if `docker image inspect` fails,
/// and `SystemCheckError::DockerUnavailable` if the CLI cannot be run at all.
pub fn check_image(image: &str) -> Result<(), SystemCheckError> {
    let output = Command::new("docker")
        .args(["image", "inspect", image])
        .output()
        .map_err(|e| SystemCheckError::DockerUnavailable(e.to_string()))?;

    if !output.status.success() {
        return Err(SystemCheckError::ImageMissing {
            image: image.to_string(),
        });
    }

    debug!(%image, "Runtime image present");
    Ok(())
}
