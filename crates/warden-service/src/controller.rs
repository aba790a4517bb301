//! AuthPolicy reconciler
//!
//! Watches AuthPolicy objects and keeps the host-keyed config store in
//! sync: admitted objects are translated and bound to their hosts,
//! deleted or no-longer-watched objects are removed. Cross-namespace
//! host collisions are logged and skipped without requeueing, so a
//! squatting tenant cannot keep another tenant's reconciliation hot.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::api::{Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, ResourceExt};
use serde_json::json;
use tracing::{debug, error, info, warn};

use warden_auth::{ConfigId, ConfigStore};
use warden_common::crd::AuthPolicy;
use warden_common::{Error, Result};

use crate::settings::Settings;
use crate::translate::{translate, TranslateContext};

/// Shared context of the reconciler
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Host-keyed config store shared with the ext_authz server
    pub store: Arc<ConfigStore>,
    /// Runtime settings
    pub settings: Settings,
    /// Shared HTTP client handed to network-backed evaluators
    pub http: reqwest::Client,
}

impl Context {
    fn translate_context(&self) -> TranslateContext {
        TranslateContext {
            client: Some(self.client.clone()),
            http: self.http.clone(),
            cluster_wide: self.settings.cluster_wide(),
            default_cache_ttl: self.settings.cache_ttl(),
            default_oidc_refresh: self.settings.oidc_refresh(),
        }
    }

    fn api(&self, namespace: &str) -> Api<AuthPolicy> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Reconcile one AuthPolicy
pub async fn reconcile(policy: Arc<AuthPolicy>, ctx: Arc<Context>) -> Result<Action> {
    let namespace = policy.namespace().unwrap_or_default();
    let name = policy.name_any();
    let id = ConfigId::new(&namespace, &name);

    debug!(policy = %id, "Reconciling AuthPolicy");

    // Re-read to distinguish updates from deletions
    let fetched = match ctx.api(&namespace).get(&name).await {
        Ok(fetched) => fetched,
        Err(kube::Error::Api(ae)) if ae.code == 404 => {
            ctx.store.delete(&id);
            info!(policy = %id, "AuthPolicy removed");
            return Ok(Action::await_change());
        }
        Err(e) => return Err(e.into()),
    };

    if !watched(&ctx.settings.label_selector, fetched.labels()) {
        // The object lost the watch label; treat it as deleted
        ctx.store.delete(&id);
        debug!(policy = %id, "AuthPolicy not admitted by the label selector");
        return Ok(Action::await_change());
    }

    let config = match translate(&fetched, &ctx.translate_context()).await {
        Ok(config) => config,
        Err(e) => {
            // The previously enforced config stays in place
            update_status(&ctx, &namespace, &name, false, 0, Some(e.to_string())).await;
            return Err(e);
        }
    };

    for host in &fetched.spec.hosts {
        if let Some(owner) = ctx.store.find_id(host) {
            if owner != id && owner.namespace != id.namespace {
                warn!(host = %host, owner = %owner, policy = %id, "Host already taken in another namespace");
                continue;
            }
        }

        match ctx.store.set(id.clone(), host, config.clone(), true) {
            Ok(()) => {}
            Err(Error::HostTaken { host, owner }) => {
                // Raced with another tenant; skip without requeueing
                warn!(host = %host, owner = %owner, policy = %id, "Host already taken in another namespace");
            }
            Err(e) => return Err(e),
        }
    }

    // Bindings of hosts the update dropped
    ctx.store.prune(&id, &fetched.spec.hosts);

    let bound = ctx.store.find_hosts(&id).len();
    update_status(&ctx, &namespace, &name, bound > 0, bound as u32, None).await;

    info!(policy = %id, hosts = bound, "AuthPolicy reconciled");
    Ok(Action::await_change())
}

/// Error policy: retry configuration problems slowly, transient ones fast
pub fn error_policy(policy: Arc<AuthPolicy>, error: &Error, _ctx: Arc<Context>) -> Action {
    let namespace = policy.namespace().unwrap_or_default();
    let name = policy.name_any();

    warn!(
        policy = %format!("{namespace}/{name}"),
        error = %error,
        "AuthPolicy reconciliation error, will retry"
    );

    if error.is_retryable() {
        Action::requeue(Duration::from_secs(30))
    } else {
        Action::requeue(Duration::from_secs(300))
    }
}

/// Run the reconciler until shutdown
pub async fn run_controller(ctx: Arc<Context>) -> Result<()> {
    let api: Api<AuthPolicy> = match &ctx.settings.watch_namespace {
        Some(namespace) => Api::namespaced(ctx.client.clone(), namespace),
        None => Api::all(ctx.client.clone()),
    };

    info!(
        cluster_wide = ctx.settings.cluster_wide(),
        "Starting AuthPolicy controller"
    );

    Controller::new(api, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok(_) => {}
                Err(e) => error!(error = ?e, "AuthPolicy reconciliation failed"),
            }
        })
        .await;

    Ok(())
}

/// Best-effort status update; reconciliation never fails on it
async fn update_status(
    ctx: &Context,
    namespace: &str,
    name: &str,
    ready: bool,
    host_count: u32,
    message: Option<String>,
) {
    let status = json!({
        "status": {
            "ready": ready,
            "hostCount": host_count,
            "message": message,
        }
    });

    let result = ctx
        .api(namespace)
        .patch_status(name, &PatchParams::default(), &Patch::Merge(&status))
        .await;

    if let Err(e) = result {
        warn!(policy = %format!("{namespace}/{name}"), error = %e, "Status update failed");
    }
}

/// Whether the object's labels satisfy the configured selector
fn watched(selector: &Option<String>, labels: &BTreeMap<String, String>) -> bool {
    let Some(selector) = selector else {
        return true;
    };

    selector
        .split(',')
        .filter(|pair| !pair.is_empty())
        .all(|pair| match pair.split_once('=') {
            Some((key, value)) => labels.get(key.trim()).map(String::as_str) == Some(value.trim()),
            None => labels.contains_key(pair.trim()),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_no_selector_watches_everything() {
        assert!(watched(&None, &labels(&[])));
        assert!(watched(&None, &labels(&[("any", "thing")])));
    }

    #[test]
    fn test_equality_selector() {
        let selector = Some("warden.dev/managed=true".to_string());
        assert!(watched(&selector, &labels(&[("warden.dev/managed", "true")])));
        assert!(!watched(&selector, &labels(&[("warden.dev/managed", "false")])));
        assert!(!watched(&selector, &labels(&[])));
    }

    #[test]
    fn test_multi_term_selector_is_conjunctive() {
        let selector = Some("tier=edge,team=platform".to_string());
        assert!(watched(
            &selector,
            &labels(&[("tier", "edge"), ("team", "platform")])
        ));
        assert!(!watched(&selector, &labels(&[("tier", "edge")])));
    }

    #[test]
    fn test_existence_term() {
        let selector = Some("warden.dev/managed".to_string());
        assert!(watched(&selector, &labels(&[("warden.dev/managed", "")])));
        assert!(!watched(&selector, &labels(&[])));
    }
}
