//! OpenID Connect identity verification
//!
//! The provider state (discovery document + verification keys) is
//! fetched at construction and kept fresh by a periodic worker. The
//! `Call` path reads the state through an atomic snapshot, so token
//! verification never blocks on a refresh in flight.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use warden_common::{Error, Result};

use crate::context::EvalContext;
use crate::request::CredentialSource;
use crate::worker::Worker;

/// OpenID Connect discovery document, the fields Warden consumes
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryDocument {
    /// Token issuer
    pub issuer: String,
    /// JWKS endpoint
    pub jwks_uri: String,
    /// UserInfo endpoint, consumed by the userinfo metadata evaluator
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
}

#[derive(Clone)]
struct VerificationKey {
    key: DecodingKey,
    /// `alg` is optional in a JWK (RFC 7517); `None` defers to the
    /// token header's algorithm at verification time
    algorithm: Option<Algorithm>,
}

impl std::fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationKey")
            .field("algorithm", &self.algorithm)
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
struct ProviderState {
    discovery: Option<DiscoveryDocument>,
    keys_by_kid: HashMap<String, VerificationKey>,
    fallback_key: Option<VerificationKey>,
}

/// Shared OIDC provider handle
///
/// Owned by the OIDC identity evaluator; the userinfo metadata evaluator
/// holds a second `Arc` to the same provider, resolved at translate time
/// so there is no runtime cycle.
#[derive(Debug)]
pub struct OidcProvider {
    endpoint: String,
    http: reqwest::Client,
    state: RwLock<ProviderState>,
}

impl OidcProvider {
    /// Create a provider with no state yet; call [`OidcProvider::refresh`]
    pub fn new(endpoint: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            endpoint: endpoint.into(),
            http,
            state: RwLock::new(ProviderState::default()),
        }
    }

    /// Issuer endpoint this provider was configured with
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// UserInfo endpoint from the current discovery document
    pub fn userinfo_endpoint(&self) -> Option<String> {
        self.state
            .read()
            .discovery
            .as_ref()
            .and_then(|d| d.userinfo_endpoint.clone())
    }

    /// Re-fetch the discovery document and verification keys
    pub async fn refresh(&self) -> Result<()> {
        let discovery_url = format!(
            "{}/.well-known/openid-configuration",
            self.endpoint.trim_end_matches('/')
        );

        let discovery: DiscoveryDocument = self
            .fetch_json(&discovery_url)
            .await
            .map_err(|e| Error::evaluator("oidc", format!("discovery fetch failed: {e}")))?;

        let jwks: jsonwebtoken::jwk::JwkSet = self
            .fetch_json(&discovery.jwks_uri)
            .await
            .map_err(|e| Error::evaluator("oidc", format!("jwks fetch failed: {e}")))?;

        let (keys_by_kid, fallback_key) = index_keys(&jwks);

        info!(
            endpoint = %self.endpoint,
            issuer = %discovery.issuer,
            key_count = keys_by_kid.len(),
            "OpenID Connect configuration updated"
        );

        *self.state.write() = ProviderState {
            discovery: Some(discovery),
            keys_by_kid,
            fallback_key,
        };

        Ok(())
    }

    /// Verify a JWT and return its claims
    pub fn verify(&self, token: &str) -> Result<Value> {
        let state = self.state.read().clone();

        let discovery = state
            .discovery
            .as_ref()
            .ok_or_else(|| Error::evaluator("oidc", "missing openid connect configuration"))?;

        let header = decode_header(token)
            .map_err(|e| Error::unauthenticated(format!("malformed token: {e}")))?;

        let verification = match header.kid.as_deref() {
            Some(kid) => state.keys_by_kid.get(kid).cloned(),
            None => state.fallback_key.clone(),
        }
        .ok_or_else(|| Error::unauthenticated("no verification key matches the token"))?;

        // A key that pins an algorithm wins over the header's claim;
        // keys published without one are verified per the header
        let algorithm = verification.algorithm.unwrap_or(header.alg);

        let mut validation = Validation::new(algorithm);
        validation.set_issuer(&[&discovery.issuer]);
        // Audience is enforced by authorization-phase policy, not here
        validation.validate_aud = false;

        let data = decode::<Value>(token, &verification.key, &validation)
            .map_err(|e| Error::unauthenticated(format!("token verification failed: {e}")))?;

        debug!(issuer = %discovery.issuer, "JWT verified");
        Ok(data.claims)
    }

    async fn fetch_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::evaluator("oidc", format!("request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::evaluator(
                "oidc",
                format!("{url} returned HTTP {}", response.status()),
            ));
        }

        response
            .json()
            .await
            .map_err(|e| Error::evaluator("oidc", format!("invalid JSON from {url}: {e}")))
    }
}

/// Index the key set by kid, keeping the first usable key as the
/// fallback for tokens without one
fn index_keys(
    jwks: &jsonwebtoken::jwk::JwkSet,
) -> (HashMap<String, VerificationKey>, Option<VerificationKey>) {
    let mut keys_by_kid = HashMap::new();
    let mut fallback_key = None;

    for jwk in &jwks.keys {
        let Ok(key) = DecodingKey::from_jwk(jwk) else {
            continue;
        };
        let algorithm = jwk
            .common
            .key_algorithm
            .and_then(|alg| format!("{alg:?}").parse::<Algorithm>().ok());

        let verification = VerificationKey { key, algorithm };
        if fallback_key.is_none() {
            fallback_key = Some(verification.clone());
        }
        if let Some(kid) = &jwk.common.key_id {
            keys_by_kid.insert(kid.clone(), verification);
        }
    }

    (keys_by_kid, fallback_key)
}

/// OIDC identity evaluator kind
#[derive(Debug)]
pub struct OidcIdentity {
    provider: Arc<OidcProvider>,
    refresher: Option<Worker>,
}

impl OidcIdentity {
    /// Create the evaluator: best-effort initial discovery plus a
    /// periodic refresh worker
    pub async fn new(
        endpoint: impl Into<String>,
        refresh_interval: Duration,
        http: reqwest::Client,
    ) -> Self {
        let provider = Arc::new(OidcProvider::new(endpoint, http));

        if let Err(e) = provider.refresh().await {
            warn!(endpoint = %provider.endpoint(), error = %e, "Initial OIDC discovery failed");
        }

        let refresher = {
            let provider = provider.clone();
            Worker::spawn("oidc-discovery", refresh_interval, move || {
                let provider = provider.clone();
                async move {
                    if let Err(e) = provider.refresh().await {
                        warn!(endpoint = %provider.endpoint(), error = %e, "OIDC discovery refresh failed");
                    }
                }
            })
        };

        Self {
            provider,
            refresher: Some(refresher),
        }
    }

    /// Handle to the shared provider, for userinfo metadata
    pub fn provider(&self) -> Arc<OidcProvider> {
        self.provider.clone()
    }

    /// Extract the bearer token and verify it
    pub async fn authenticate(
        &self,
        credentials: &CredentialSource,
        ctx: &EvalContext,
    ) -> Result<Value> {
        let token = credentials.extract(ctx.request())?;
        self.provider.verify(&token)
    }

    /// Stop the discovery refresh worker
    pub fn stop_refresh(&self) {
        if let Some(worker) = &self.refresher {
            worker.stop();
        }
    }

    /// Whether the discovery refresh worker is still running
    pub fn refresh_active(&self) -> bool {
        self.refresher
            .as_ref()
            .map(|w| !w.is_stopped())
            .unwrap_or(false)
    }
}
