//! Bearer-token validation.
//!
//! The [`AuthGate`] checks a token's signature, expiry, audience, issuer, and
//! capability scopes before any execution resource is allocated. Normal
//! rejections (missing, malformed, expired, under-scoped tokens) are
//! [`AuthDecision::Denied`] values with a distinguishing reason, never errors:
//! the only error paths in this module are startup-time key-material failures
//! in [`keys`].
//!
//! Trusted keys come from one of two sources behind the same interface: a
//! static PEM public key (development or file-configured deployments) or a
//! JWKS document fetched from a discovery endpoint, with keys selected by the
//! token's `kid` header. The validation logic itself does not branch on which
//! source is in use.

mod keys;

pub use keys::{bootstrap_dev_credentials, DevCredentials, KeySource};

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, Algorithm, Validation};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::config::AuthConfig;

/// Capability scope required to invoke the execute tool.
pub const EXECUTE_SCOPE: &str = "execute";

/// Claims carried by an accepted bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject the token was issued to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    /// Token issuer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    /// Intended audience.
    pub aud: String,

    /// Expiry as seconds since the Unix epoch.
    pub exp: u64,

    /// Issued-at as seconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<u64>,

    /// Space-separated capability scopes (OAuth style).
    #[serde(default)]
    pub scope: String,
}

impl Claims {
    /// Iterates over the token's capability scopes.
    pub fn scopes(&self) -> impl Iterator<Item = &str> {
        self.scope.split_whitespace()
    }

    /// Returns true if the token carries the given scope.
    #[must_use]
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes().any(|s| s == scope)
    }
}

/// Why a token was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    /// No token was presented.
    MissingToken,
    /// The token could not be decoded.
    Malformed,
    /// The signature did not verify against the trusted key.
    BadSignature,
    /// The token is past its expiry.
    Expired,
    /// The issuer does not match the expected issuer.
    WrongIssuer,
    /// The audience does not match the expected audience.
    WrongAudience,
    /// The token names a signing key that is not in the trusted set.
    UnknownKey,
    /// The token lacks the required capability scope.
    MissingScope {
        /// The scope that was required.
        required: String,
    },
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingToken => write!(f, "no bearer token presented"),
            Self::Malformed => write!(f, "token is malformed"),
            Self::BadSignature => write!(f, "token signature is invalid"),
            Self::Expired => write!(f, "token is expired"),
            Self::WrongIssuer => write!(f, "token issuer is not trusted"),
            Self::WrongAudience => write!(f, "token audience does not match"),
            Self::UnknownKey => write!(f, "token signing key is not trusted"),
            Self::MissingScope { required } => {
                write!(f, "token lacks required scope {required:?}")
            }
        }
    }
}

/// Outcome of validating a bearer token.
#[derive(Debug, Clone)]
pub enum AuthDecision {
    /// The token is valid and carries the required scope.
    Allowed(Claims),
    /// The token was rejected.
    Denied(DenyReason),
}

impl AuthDecision {
    /// Returns true if the decision allows the request.
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed(_))
    }
}

/// Validates bearer tokens against a trusted key source.
pub struct AuthGate {
    algorithm: Algorithm,
    audience: String,
    issuer: Option<String>,
    keys: KeySource,
}

impl AuthGate {
    /// Creates a gate from validation settings and a trusted key source.
    #[must_use]
    pub fn new(config: &AuthConfig, keys: KeySource) -> Self {
        Self {
            algorithm: config.algorithm,
            audience: config.audience.clone(),
            issuer: config.issuer.clone(),
            keys,
        }
    }

    /// Validates a bearer token and checks it carries `required_scope`.
    ///
    /// Pure check: no resource is touched before a decision is reached, and
    /// rejection is a [`AuthDecision::Denied`] value, not an error.
    #[must_use]
    pub fn validate(&self, token: Option<&str>, required_scope: &str) -> AuthDecision {
        let Some(token) = token else {
            return AuthDecision::Denied(DenyReason::MissingToken);
        };

        let header = match decode_header(token) {
            Ok(header) => header,
            Err(e) => {
                trace!(error = %e, "Failed to decode token header");
                return AuthDecision::Denied(DenyReason::Malformed);
            }
        };

        if header.alg != self.algorithm {
            debug!(got = ?header.alg, expected = ?self.algorithm, "Token algorithm mismatch");
            return AuthDecision::Denied(DenyReason::BadSignature);
        }

        let Some(key) = self.keys.resolve(header.kid.as_deref()) else {
            debug!(kid = ?header.kid, "Token names an untrusted signing key");
            return AuthDecision::Denied(DenyReason::UnknownKey);
        };

        let mut validation = Validation::new(self.algorithm);
        validation.set_audience(&[&self.audience]);
        if let Some(issuer) = &self.issuer {
            validation.set_issuer(&[issuer]);
        }

        let claims = match decode::<Claims>(token, key, &validation) {
            Ok(data) => data.claims,
            Err(e) => {
                let reason = match e.kind() {
                    ErrorKind::ExpiredSignature => DenyReason::Expired,
                    ErrorKind::InvalidAudience => DenyReason::WrongAudience,
                    ErrorKind::InvalidIssuer => DenyReason::WrongIssuer,
                    ErrorKind::InvalidSignature => DenyReason::BadSignature,
                    _ => DenyReason::Malformed,
                };
                debug!(error = %e, ?reason, "Token rejected");
                return AuthDecision::Denied(reason);
            }
        };

        if !claims.has_scope(required_scope) {
            debug!(scope = %claims.scope, required = required_scope, "Token under-scoped");
            return AuthDecision::Denied(DenyReason::MissingScope {
                required: required_scope.to_string(),
            });
        }

        trace!(sub = ?claims.sub, "Token accepted");
        AuthDecision::Allowed(claims)
    }
}

impl std::fmt::Debug for AuthGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthGate")
            .field("algorithm", &self.algorithm)
            .field("audience", &self.audience)
            .field("issuer", &self.issuer)
            .finish_non_exhaustive()
    }
}
