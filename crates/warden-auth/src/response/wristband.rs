//! Wristband tokens
//!
//! A wristband is a short-lived JWT issued with an allowed decision,
//! attesting the authorization facts to services downstream of the
//! proxy. The subject is a digest of the resolved identity, so equal
//! identities produce equal subjects without leaking the identity
//! itself.

use std::time::Duration;

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

use warden_common::json::ValueOrSelector;
use warden_common::{Error, Result};

use crate::context::EvalContext;

/// Default wristband lifetime
pub const DEFAULT_TOKEN_DURATION: Duration = Duration::from_secs(300);

/// A wristband signing key loaded from a Secret
pub struct WristbandKey {
    kid: String,
    algorithm: Algorithm,
    key: EncodingKey,
}

impl WristbandKey {
    /// Load a signing key from PEM bytes
    ///
    /// The Secret name doubles as the key id.
    pub fn from_pem(kid: impl Into<String>, algorithm: &str, pem: &[u8]) -> Result<Self> {
        let kid = kid.into();

        let (algorithm, key) = match algorithm {
            "ES256" => (Algorithm::ES256, EncodingKey::from_ec_pem(pem)),
            "ES384" => (Algorithm::ES384, EncodingKey::from_ec_pem(pem)),
            "RS256" => (Algorithm::RS256, EncodingKey::from_rsa_pem(pem)),
            "RS384" => (Algorithm::RS384, EncodingKey::from_rsa_pem(pem)),
            "RS512" => (Algorithm::RS512, EncodingKey::from_rsa_pem(pem)),
            other => {
                return Err(Error::configuration(format!(
                    "unsupported wristband signing algorithm {other}"
                )))
            }
        };

        let key = key.map_err(|e| {
            Error::configuration(format!("invalid signing key {kid}: {e}"))
        })?;

        Ok(Self {
            kid,
            algorithm,
            key,
        })
    }
}

/// Wristband response evaluator kind
pub struct WristbandResponse {
    issuer: String,
    custom_claims: Vec<(String, ValueOrSelector)>,
    duration: Duration,
    signing_key: WristbandKey,
}

impl WristbandResponse {
    /// Create the evaluator; the first configured key signs
    pub fn new(
        issuer: impl Into<String>,
        custom_claims: Vec<(String, ValueOrSelector)>,
        duration: Option<Duration>,
        signing_key: WristbandKey,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            custom_claims,
            duration: duration.unwrap_or(DEFAULT_TOKEN_DURATION),
            signing_key,
        }
    }

    /// Issue the signed token for the current document
    pub fn issue(&self, ctx: &EvalContext) -> Result<Value> {
        let doc = ctx.snapshot();

        let identity = doc
            .get("auth")
            .and_then(|auth| auth.get("identity"))
            .cloned()
            .unwrap_or(Value::Null);

        let now = chrono::Utc::now().timestamp();
        let mut claims = Map::new();
        claims.insert("iss".into(), json!(self.issuer));
        claims.insert("sub".into(), json!(identity_digest(&identity)));
        claims.insert("iat".into(), json!(now));
        claims.insert(
            "exp".into(),
            json!(now + self.duration.as_secs() as i64),
        );
        for (name, value) in &self.custom_claims {
            claims.insert(name.clone(), value.resolve(&doc));
        }

        let mut header = Header::new(self.signing_key.algorithm);
        header.kid = Some(self.signing_key.kid.clone());

        let token = jsonwebtoken::encode(&header, &claims, &self.signing_key.key)
            .map_err(|e| Error::evaluator("wristband", format!("token signing failed: {e}")))?;

        Ok(Value::String(token))
    }
}

/// Hex SHA-256 of the identity's compact JSON form
fn identity_digest(identity: &Value) -> String {
    let digest = Sha256::digest(identity.to_string().as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
