//! Integration tests for bearer-token validation.
//!
//! These verify the denial matrix and the property that a denied request
//! allocates nothing: no sandbox launch, no workspace directory.

mod common;

use chrono::Utc;
use jsonwebtoken::{encode, EncodingKey, Header};

use pyexec_mcp::auth::{
    bootstrap_dev_credentials, AuthDecision, AuthGate, Claims, DenyReason, EXECUTE_SCOPE,
};
use pyexec_mcp::config::AuthConfig;
use pyexec_mcp::error::ExecuteError;

use common::{request, TestRig, HELLO_SCRIPT};

/// A gate backed by generated credentials plus the matching signing key, so
/// tests can mint tokens with arbitrary claims.
struct TestIssuer {
    gate: AuthGate,
    encoding_key: EncodingKey,
    _temp: tempfile::TempDir,
}

impl TestIssuer {
    fn new(config: AuthConfig) -> Self {
        let temp = tempfile::TempDir::new().expect("failed to create temp dir");
        let creds = bootstrap_dev_credentials(&config.audience, config.algorithm, temp.path())
            .expect("dev credential bootstrap failed");

        let private_pem =
            std::fs::read(temp.path().join("dev-private.pem")).expect("private key missing");
        let encoding_key =
            EncodingKey::from_rsa_pem(&private_pem).expect("private key should parse");

        Self {
            gate: AuthGate::new(&config, creds.key_source),
            encoding_key,
            _temp: temp,
        }
    }

    fn mint(&self, claims: &Claims) -> String {
        encode(&Header::new(jsonwebtoken::Algorithm::RS256), claims, &self.encoding_key)
            .expect("token minting failed")
    }
}

fn claims() -> Claims {
    let now = Utc::now().timestamp() as u64;
    Claims {
        sub: Some(String::from("tester")),
        iss: None,
        aud: String::from("mcp-pyexec"),
        exp: now + 600,
        iat: Some(now),
        scope: String::from(EXECUTE_SCOPE),
    }
}

#[test]
fn test_valid_token_is_allowed() {
    let issuer = TestIssuer::new(AuthConfig::default());
    let token = issuer.mint(&claims());

    let decision = issuer.gate.validate(Some(&token), EXECUTE_SCOPE);
    match decision {
        AuthDecision::Allowed(accepted) => {
            assert_eq!(accepted.sub.as_deref(), Some("tester"));
            assert!(accepted.has_scope(EXECUTE_SCOPE));
        }
        AuthDecision::Denied(reason) => panic!("valid token denied: {reason}"),
    }
}

#[test]
fn test_expired_token_is_denied() {
    let issuer = TestIssuer::new(AuthConfig::default());
    let mut expired = claims();
    expired.exp = (Utc::now().timestamp() as u64) - 3600;
    let token = issuer.mint(&expired);

    assert!(matches!(
        issuer.gate.validate(Some(&token), EXECUTE_SCOPE),
        AuthDecision::Denied(DenyReason::Expired)
    ));
}

#[test]
fn test_wrong_audience_is_denied() {
    let issuer = TestIssuer::new(AuthConfig::default());
    let mut wrong = claims();
    wrong.aud = String::from("some-other-service");
    let token = issuer.mint(&wrong);

    assert!(matches!(
        issuer.gate.validate(Some(&token), EXECUTE_SCOPE),
        AuthDecision::Denied(DenyReason::WrongAudience)
    ));
}

#[test]
fn test_wrong_issuer_is_denied() {
    let mut config = AuthConfig::default();
    config.issuer = Some(String::from("https://idp.example.com/"));
    let issuer = TestIssuer::new(config);

    let mut forged = claims();
    forged.iss = Some(String::from("https://rogue.example.com/"));
    let token = issuer.mint(&forged);

    assert!(matches!(
        issuer.gate.validate(Some(&token), EXECUTE_SCOPE),
        AuthDecision::Denied(DenyReason::WrongIssuer)
    ));
}

#[test]
fn test_under_scoped_token_is_denied() {
    let issuer = TestIssuer::new(AuthConfig::default());
    let mut read_only = claims();
    read_only.scope = String::from("read:files");
    let token = issuer.mint(&read_only);

    match issuer.gate.validate(Some(&token), EXECUTE_SCOPE) {
        AuthDecision::Denied(DenyReason::MissingScope { required }) => {
            assert_eq!(required, EXECUTE_SCOPE);
        }
        other => panic!("expected a missing-scope denial, got {other:?}"),
    }
}

#[test]
fn test_foreign_key_signature_is_denied() {
    // A token minted by one deployment's key must not validate against
    // another deployment's trusted key.
    let issuer = TestIssuer::new(AuthConfig::default());
    let foreign = TestIssuer::new(AuthConfig::default());
    let token = foreign.mint(&claims());

    assert!(matches!(
        issuer.gate.validate(Some(&token), EXECUTE_SCOPE),
        AuthDecision::Denied(DenyReason::BadSignature)
    ));
}

#[test]
fn test_malformed_token_is_denied() {
    let issuer = TestIssuer::new(AuthConfig::default());

    for garbage in ["", "Bearer", "a.b", "header.payload.signature"] {
        assert!(
            matches!(
                issuer.gate.validate(Some(garbage), EXECUTE_SCOPE),
                AuthDecision::Denied(DenyReason::Malformed)
            ),
            "{garbage:?} should be rejected as malformed"
        );
    }
}

#[tokio::test]
async fn test_denied_request_launches_nothing() {
    let rig = TestRig::new(HELLO_SCRIPT);

    let result = rig
        .orchestrator
        .execute(None, &request("print('hi')").with_session_id("untouched"))
        .await;

    assert!(matches!(
        result,
        Err(ExecuteError::Denied(DenyReason::MissingToken))
    ));
    assert_eq!(rig.launches(), 0, "denied request must not launch a sandbox");
    assert_eq!(
        std::fs::read_dir(rig.sessions_root()).unwrap().count(),
        0,
        "denied request must not create a session workspace"
    );
}

#[tokio::test]
async fn test_garbage_token_rejected_end_to_end() {
    let rig = TestRig::new(HELLO_SCRIPT);

    let result = rig
        .orchestrator
        .execute(Some("not-a-jwt"), &request("print('hi')"))
        .await;

    assert!(matches!(
        result,
        Err(ExecuteError::Denied(DenyReason::Malformed))
    ));
    assert_eq!(rig.launches(), 0);
}

#[tokio::test]
async fn test_dev_token_accepted_end_to_end() {
    let rig = TestRig::new(HELLO_SCRIPT);

    let result = rig
        .orchestrator
        .execute(Some(&rig.token), &request("print('hi')"))
        .await
        .expect("dev token should authorize execution");

    assert_eq!(result.records.len(), 1);
    assert_eq!(rig.launches(), 1);
}
