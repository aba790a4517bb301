//! API key identity
//!
//! Authorized keys live in Kubernetes Secrets matching the configured
//! label selectors, each holding the key under the `api_key` data entry.
//! The set is loaded at construction and re-listed by a periodic worker;
//! lookups on the `Call` path go against the last loaded snapshot.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::Secret;
use kube::api::ListParams;
use kube::{Api, Client, ResourceExt};
use parking_lot::RwLock;
use serde_json::{json, Value};
use tracing::{info, warn};

use warden_common::{Error, Result, API_KEY_SELECTOR};

use crate::context::EvalContext;
use crate::request::CredentialSource;
use crate::worker::Worker;

const INVALID_API_KEY: &str = "the API key provided is invalid";

/// API key identity evaluator kind
#[derive(Debug)]
pub struct ApiKeyIdentity {
    keys: Arc<RwLock<HashMap<String, Value>>>,
    refresher: Option<Worker>,
}

impl ApiKeyIdentity {
    /// Create the evaluator backed by cluster Secrets
    ///
    /// `namespace` of `None` looks across all namespaces (cluster-wide
    /// deployments only). The initial load is best-effort; the refresh
    /// worker retries every `refresh_interval`.
    pub async fn new(
        client: Client,
        label_selectors: BTreeMap<String, String>,
        namespace: Option<String>,
        refresh_interval: Duration,
    ) -> Self {
        let keys = Arc::new(RwLock::new(HashMap::new()));

        match load_keys(&client, &label_selectors, namespace.as_deref()).await {
            Ok(loaded) => {
                info!(key_count = loaded.len(), "Authorized API keys loaded");
                *keys.write() = loaded;
            }
            Err(e) => warn!(error = %e, "Failed to fetch the authorized API key credentials"),
        }

        let refresher = {
            let keys = keys.clone();
            let client = client.clone();
            let namespace = namespace.clone();
            Worker::spawn("api-key-refresh", refresh_interval, move || {
                let keys = keys.clone();
                let client = client.clone();
                let selectors = label_selectors.clone();
                let namespace = namespace.clone();
                async move {
                    match load_keys(&client, &selectors, namespace.as_deref()).await {
                        Ok(loaded) => *keys.write() = loaded,
                        Err(e) => {
                            warn!(error = %e, "Failed to refresh the authorized API key credentials")
                        }
                    }
                }
            })
        };

        Self {
            keys,
            refresher: Some(refresher),
        }
    }

    /// Create the evaluator from a static key set (no cluster access)
    pub fn with_keys(keys: HashMap<String, Value>) -> Self {
        Self {
            keys: Arc::new(RwLock::new(keys)),
            refresher: None,
        }
    }

    /// Attach a refresh worker
    pub(crate) fn set_refresher(&mut self, worker: Worker) {
        self.refresher = Some(worker);
    }

    /// Compare the request credential against the authorized keys
    pub fn authenticate(&self, credentials: &CredentialSource, ctx: &EvalContext) -> Result<Value> {
        let presented = credentials.extract(ctx.request())?;
        self.keys
            .read()
            .get(&presented)
            .cloned()
            .ok_or_else(|| Error::unauthenticated(INVALID_API_KEY))
    }

    /// Number of authorized keys currently loaded
    pub fn key_count(&self) -> usize {
        self.keys.read().len()
    }

    /// Stop the refresh worker
    pub fn stop_refresh(&self) {
        if let Some(worker) = &self.refresher {
            worker.stop();
        }
    }

    /// Whether the refresh worker is still running
    pub fn refresh_active(&self) -> bool {
        self.refresher
            .as_ref()
            .map(|w| !w.is_stopped())
            .unwrap_or(false)
    }
}

async fn load_keys(
    client: &Client,
    label_selectors: &BTreeMap<String, String>,
    namespace: Option<&str>,
) -> Result<HashMap<String, Value>> {
    let api: Api<Secret> = match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    };

    let selector = label_selectors
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",");
    let params = ListParams::default().labels(&selector);

    let secrets = api.list(&params).await?;

    let mut keys = HashMap::new();
    for secret in secrets.items {
        let Some(data) = &secret.data else { continue };
        let Some(key_bytes) = data.get(API_KEY_SELECTOR) else {
            continue;
        };
        let Ok(key) = String::from_utf8(key_bytes.0.clone()) else {
            warn!(secret = %secret.name_any(), "API key Secret holds non-UTF-8 data, skipped");
            continue;
        };
        keys.insert(key, describe_secret(&secret));
    }
    Ok(keys)
}

/// The identity object exposed for a matched key Secret
fn describe_secret(secret: &Secret) -> Value {
    json!({
        "name": secret.name_any(),
        "namespace": secret.namespace(),
        "labels": secret.labels(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{CredentialLocation, RequestEnvelope};

    fn ctx_with_authorization(value: &str) -> EvalContext {
        let mut headers = HashMap::new();
        headers.insert("authorization".to_string(), vec![value.to_string()]);
        EvalContext::new(
            RequestEnvelope {
                headers,
                ..Default::default()
            },
            Duration::from_secs(5),
        )
    }

    fn known_keys() -> HashMap<String, Value> {
        let mut keys = HashMap::new();
        keys.insert(
            "nd9RvV7M".to_string(),
            json!({"name": "friend-key-1", "namespace": "apps"}),
        );
        keys.insert(
            "pR2zrxZM".to_string(),
            json!({"name": "friend-key-2", "namespace": "apps"}),
        );
        keys
    }

    #[tokio::test]
    async fn test_known_key_resolves_to_secret_descriptor() {
        let identity = ApiKeyIdentity::with_keys(known_keys());
        let source = CredentialSource::new(CredentialLocation::AuthorizationHeader, "APIKEY");
        let ctx = ctx_with_authorization("APIKEY nd9RvV7M");

        let value = identity.authenticate(&source, &ctx).unwrap();
        assert_eq!(value["name"], "friend-key-1");
    }

    #[tokio::test]
    async fn test_unknown_key_is_rejected() {
        let identity = ApiKeyIdentity::with_keys(known_keys());
        let source = CredentialSource::new(CredentialLocation::AuthorizationHeader, "APIKEY");
        let ctx = ctx_with_authorization("APIKEY wrong");

        let err = identity.authenticate(&source, &ctx).unwrap_err();
        assert!(err.to_string().contains(INVALID_API_KEY));
    }

    #[tokio::test]
    async fn test_missing_credential_is_rejected() {
        let identity = ApiKeyIdentity::with_keys(known_keys());
        let source = CredentialSource::new(CredentialLocation::AuthorizationHeader, "APIKEY");
        let ctx = ctx_with_authorization("Bearer nd9RvV7M");

        assert!(identity.authenticate(&source, &ctx).is_err());
    }

    #[tokio::test]
    async fn test_key_count_and_refresh_state() {
        let identity = ApiKeyIdentity::with_keys(known_keys());
        assert_eq!(identity.key_count(), 2);
        assert!(!identity.refresh_active());
        // stop_refresh without a worker is a no-op
        identity.stop_refresh();
    }
}
