//! Trusted key sources and the development credential bootstrap.

use std::collections::HashMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use chrono::Utc;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{encode, Algorithm, DecodingKey, EncodingKey, Header};
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::pkcs8::EncodePublicKey;
use rsa::{RsaPrivateKey, RsaPublicKey};
use tracing::{debug, info, warn};

use crate::auth::{Claims, EXECUTE_SCOPE};
use crate::error::AuthSetupError;

/// Issuer claim on self-minted development tokens.
pub const DEV_ISSUER: &str = "pyexec-dev";

/// Validity window for the pre-minted development token.
const DEV_TOKEN_TTL_SECS: u64 = 12 * 3600;

/// File permissions for persisted credentials: owner read/write only (0600).
const FILE_PERMISSIONS: u32 = 0o600;

/// RSA modulus size for generated development keypairs.
const DEV_KEY_BITS: usize = 2048;

/// A set of trusted verification keys.
///
/// Validation resolves the key for a token through this enum; which variant
/// is in use is a deployment decision, not a validation code path.
pub enum KeySource {
    /// A single statically configured key.
    Static(DecodingKey),
    /// Keys from a JWKS discovery document, indexed by `kid`.
    Jwks(HashMap<String, DecodingKey>),
}

impl KeySource {
    /// Loads a static key from a PEM public key file.
    ///
    /// # Errors
    ///
    /// Returns `AuthSetupError::PublicKey` if the file cannot be read or the
    /// PEM does not parse for the given algorithm family.
    pub fn from_pem_file(path: &Path, algorithm: Algorithm) -> Result<Self, AuthSetupError> {
        let pem = fs::read(path).map_err(|e| AuthSetupError::PublicKey {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let key = decoding_key_from_pem(&pem, algorithm).map_err(|e| AuthSetupError::PublicKey {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        info!(path = %path.display(), "Loaded static verification key");
        Ok(Self::Static(key))
    }

    /// Fetches a JWKS document from a discovery endpoint.
    ///
    /// The key set is fetched once; tokens signed with a `kid` outside the
    /// fetched set are denied until restart.
    ///
    /// # Errors
    ///
    /// Returns `AuthSetupError::JwksFetch` on network or parse failure, and
    /// `AuthSetupError::JwksEmpty` if no key in the document is usable.
    pub async fn from_discovery(uri: &str) -> Result<Self, AuthSetupError> {
        debug!(%uri, "Fetching JWKS document");

        let response = reqwest::get(uri)
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| AuthSetupError::JwksFetch {
                uri: uri.to_string(),
                reason: e.to_string(),
            })?;

        let jwks: JwkSet = response.json().await.map_err(|e| AuthSetupError::JwksFetch {
            uri: uri.to_string(),
            reason: e.to_string(),
        })?;

        let mut keys = HashMap::new();
        for jwk in &jwks.keys {
            let Some(kid) = jwk.common.key_id.clone() else {
                warn!("Skipping JWKS entry without a kid");
                continue;
            };
            match DecodingKey::from_jwk(jwk) {
                Ok(key) => {
                    keys.insert(kid, key);
                }
                Err(e) => warn!(%kid, error = %e, "Skipping unusable JWKS entry"),
            }
        }

        if keys.is_empty() {
            return Err(AuthSetupError::JwksEmpty {
                uri: uri.to_string(),
            });
        }

        info!(count = keys.len(), "Trusted signing keys loaded from discovery endpoint");
        Ok(Self::Jwks(keys))
    }

    /// Resolves the verification key for a token's `kid` header.
    ///
    /// A static source ignores `kid`; a JWKS source requires one.
    #[must_use]
    pub fn resolve(&self, kid: Option<&str>) -> Option<&DecodingKey> {
        match self {
            Self::Static(key) => Some(key),
            Self::Jwks(keys) => kid.and_then(|kid| keys.get(kid)),
        }
    }

    #[cfg(test)]
    pub(crate) fn empty_for_tests() -> Self {
        Self::Jwks(HashMap::new())
    }
}

/// Credentials generated for development mode.
pub struct DevCredentials {
    /// Verification key for the generated keypair.
    pub key_source: KeySource,
    /// A pre-minted token valid for [`EXECUTE_SCOPE`].
    pub token: String,
}

/// Generates a development keypair and a locally-valid token at startup.
///
/// Writes `dev-private.pem`, `dev-public.pem`, and `dev-token.jwt` into
/// `state_dir` with 0600 permissions. The minted token validates under the
/// same audience/scope rules as production tokens.
///
/// # Errors
///
/// Returns `AuthSetupError::DevKeygen` if the algorithm is not RSA-based or
/// key generation fails, and `AuthSetupError::DevWrite` if the credential
/// files cannot be persisted.
pub fn bootstrap_dev_credentials(
    audience: &str,
    algorithm: Algorithm,
    state_dir: &Path,
) -> Result<DevCredentials, AuthSetupError> {
    if !matches!(
        algorithm,
        Algorithm::RS256 | Algorithm::RS384 | Algorithm::RS512
    ) {
        return Err(AuthSetupError::DevKeygen(format!(
            "development mode only mints RSA-signed tokens, got {algorithm:?}"
        )));
    }

    info!("No discovery endpoint or key file configured; generating development credentials");

    let mut rng = rand::rngs::OsRng;
    let private_key = RsaPrivateKey::new(&mut rng, DEV_KEY_BITS)
        .map_err(|e| AuthSetupError::DevKeygen(e.to_string()))?;

    let private_pem = private_key
        .to_pkcs1_pem(rsa::pkcs1::LineEnding::LF)
        .map_err(|e| AuthSetupError::DevKeygen(e.to_string()))?;
    let public_pem = RsaPublicKey::from(&private_key)
        .to_public_key_pem(rsa::pkcs8::LineEnding::LF)
        .map_err(|e| AuthSetupError::DevKeygen(e.to_string()))?;

    let now = Utc::now().timestamp() as u64;
    let claims = Claims {
        sub: Some(String::from("dev")),
        iss: Some(String::from(DEV_ISSUER)),
        aud: audience.to_string(),
        exp: now + DEV_TOKEN_TTL_SECS,
        iat: Some(now),
        scope: String::from(EXECUTE_SCOPE),
    };

    let encoding_key = EncodingKey::from_rsa_pem(private_pem.as_bytes())
        .map_err(|e| AuthSetupError::DevKeygen(e.to_string()))?;
    let token = encode(&Header::new(algorithm), &claims, &encoding_key)
        .map_err(|e| AuthSetupError::DevKeygen(e.to_string()))?;

    write_credential(&state_dir.join("dev-private.pem"), private_pem.as_bytes())?;
    write_credential(&state_dir.join("dev-public.pem"), public_pem.as_bytes())?;
    write_credential(&state_dir.join("dev-token.jwt"), token.as_bytes())?;

    let decoding_key = DecodingKey::from_rsa_pem(public_pem.as_bytes())
        .map_err(|e| AuthSetupError::DevKeygen(e.to_string()))?;

    info!(
        token_path = %state_dir.join("dev-token.jwt").display(),
        "Development credentials written"
    );

    Ok(DevCredentials {
        key_source: KeySource::Static(decoding_key),
        token,
    })
}

/// Writes a credential file with owner-only permissions.
fn write_credential(path: &Path, contents: &[u8]) -> Result<(), AuthSetupError> {
    fs::write(path, contents).map_err(|e| AuthSetupError::DevWrite {
        context: format!("failed to write {}", path.display()),
        source: e,
    })?;

    let permissions = fs::Permissions::from_mode(FILE_PERMISSIONS);
    fs::set_permissions(path, permissions).map_err(|e| AuthSetupError::DevWrite {
        context: format!("failed to set permissions on {}", path.display()),
        source: e,
    })?;

    Ok(())
}

/// Builds a decoding key from PEM bytes for the algorithm's key family.
fn decoding_key_from_pem(
    pem: &[u8],
    algorithm: Algorithm,
) -> Result<DecodingKey, jsonwebtoken::errors::Error> {
    match algorithm {
        Algorithm::RS256
        | Algorithm::RS384
        | Algorithm::RS512
        | Algorithm::PS256
        | Algorithm::PS384
        | Algorithm::PS512 => DecodingKey::from_rsa_pem(pem),
        Algorithm::ES256 | Algorithm::ES384 => DecodingKey::from_ec_pem(pem),
        Algorithm::EdDSA => DecodingKey::from_ed_pem(pem),
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
            // Symmetric algorithms are not accepted for bearer validation;
            // surface the same error shape as an unparseable key.
            Err(jsonwebtoken::errors::ErrorKind::InvalidKeyFormat.into())
        }
    }
}
