//! Host-keyed config store
//!
//! Maps request hosts to their [`ApiConfig`] with a reverse index from
//! config id (the `namespace/name` of the origin AuthPolicy) to the
//! hosts it owns. All map operations serialize on one coarse lock;
//! `clean` of a displaced config runs outside the lock, exactly once,
//! when its last host binding disappears.
//!
//! Hosts are uniquely owned across tenants: two config ids from
//! different namespaces can never share a host. Within a namespace the
//! newer binding supersedes the older one when `override` is set.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use warden_common::{Error, Result};

use crate::config::ApiConfig;

/// Identity of the declarative object a config was translated from
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConfigId {
    /// Origin namespace
    pub namespace: String,
    /// Origin name
    pub name: String,
}

impl ConfigId {
    /// Create a config id
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ConfigId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

struct HostEntry {
    id: ConfigId,
    config: Arc<ApiConfig>,
}

#[derive(Default)]
struct StoreInner {
    by_host: HashMap<String, HostEntry>,
    hosts_by_id: HashMap<ConfigId, HashSet<String>>,
}

impl StoreInner {
    /// Drop one host binding, returning the displaced config
    fn unbind(&mut self, host: &str) -> Option<Arc<ApiConfig>> {
        let entry = self.by_host.remove(host)?;
        if let Some(hosts) = self.hosts_by_id.get_mut(&entry.id) {
            hosts.remove(host);
            if hosts.is_empty() {
                self.hosts_by_id.remove(&entry.id);
            }
        }
        Some(entry.config)
    }

    /// Whether any host still references this exact config instance
    fn is_referenced(&self, config: &Arc<ApiConfig>) -> bool {
        self.by_host
            .values()
            .any(|entry| Arc::ptr_eq(&entry.config, config))
    }
}

/// Host → config map with reverse index and lifecycle coordination
#[derive(Default)]
pub struct ConfigStore {
    inner: Mutex<StoreInner>,
}

impl ConfigStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a host binding
    ///
    /// Fails with [`Error::HostTaken`] when the host belongs to a config
    /// from another namespace, and with a configuration error when the
    /// host belongs to another config of the same namespace and
    /// `override_existing` is unset.
    pub fn set(
        &self,
        id: ConfigId,
        host: impl Into<String>,
        config: Arc<ApiConfig>,
        override_existing: bool,
    ) -> Result<()> {
        let host = host.into();
        let displaced = {
            let mut inner = self.inner.lock();

            if let Some(existing) = inner.by_host.get(&host) {
                if existing.id != id {
                    if existing.id.namespace != id.namespace {
                        return Err(Error::host_taken(&host, existing.id.to_string()));
                    }
                    if !override_existing {
                        return Err(Error::configuration(format!(
                            "host {host} is already bound to {}",
                            existing.id
                        )));
                    }
                }
            }

            let displaced = inner.unbind(&host);

            inner.by_host.insert(
                host.clone(),
                HostEntry {
                    id: id.clone(),
                    config: config.clone(),
                },
            );
            inner
                .hosts_by_id
                .entry(id.clone())
                .or_default()
                .insert(host.clone());

            displaced
                .filter(|old| !Arc::ptr_eq(old, &config))
                .filter(|old| !inner.is_referenced(old))
        };

        if let Some(old) = displaced {
            old.clean();
        }

        debug!(host = %host, config = %id, "Host binding installed");
        Ok(())
    }

    /// Config bound to a host
    pub fn get(&self, host: &str) -> Option<Arc<ApiConfig>> {
        self.inner
            .lock()
            .by_host
            .get(host)
            .map(|entry| entry.config.clone())
    }

    /// Config id owning a host
    pub fn find_id(&self, host: &str) -> Option<ConfigId> {
        self.inner
            .lock()
            .by_host
            .get(host)
            .map(|entry| entry.id.clone())
    }

    /// Hosts owned by a config id
    pub fn find_hosts(&self, id: &ConfigId) -> Vec<String> {
        self.inner
            .lock()
            .hosts_by_id
            .get(id)
            .map(|hosts| hosts.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove every binding of a config id and clean the evicted configs
    pub fn delete(&self, id: &ConfigId) {
        let displaced = self.remove_hosts(id, |_| true);
        if !displaced.is_empty() {
            info!(config = %id, "Config removed from the host store");
        }
    }

    /// Drop the bindings of `id` whose host is not in `keep`
    ///
    /// Used after an update that shrank the host list.
    pub fn prune(&self, id: &ConfigId, keep: &[String]) {
        self.remove_hosts(id, |host| !keep.contains(&host.to_string()));
    }

    /// Number of host bindings
    pub fn len(&self) -> usize {
        self.inner.lock().by_host.len()
    }

    /// Whether the store holds no bindings
    pub fn is_empty(&self) -> bool {
        self.inner.lock().by_host.is_empty()
    }

    fn remove_hosts<F>(&self, id: &ConfigId, should_remove: F) -> Vec<Arc<ApiConfig>>
    where
        F: Fn(&str) -> bool,
    {
        let displaced: Vec<Arc<ApiConfig>> = {
            let mut inner = self.inner.lock();
            let hosts: Vec<String> = inner
                .hosts_by_id
                .get(id)
                .map(|hosts| {
                    hosts
                        .iter()
                        .filter(|host| should_remove(host))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();

            let mut displaced = Vec::new();
            for host in hosts {
                if let Some(config) = inner.unbind(&host) {
                    displaced.push(config);
                }
            }

            // Each displaced config is cleaned once, after the lock is
            // released, and only if no other host still references it
            let mut unique: Vec<Arc<ApiConfig>> = Vec::new();
            for config in displaced {
                if inner.is_referenced(&config) {
                    continue;
                }
                if !unique.iter().any(|seen| Arc::ptr_eq(seen, &config)) {
                    unique.push(config);
                }
            }
            unique
        };

        for config in &displaced {
            config.clean();
        }
        displaced
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::EvaluatorBase;
    use crate::identity::{AnonymousIdentity, ApiKeyIdentity, IdentityEvaluator, IdentityKind};
    use crate::request::CredentialSource;
    use crate::worker::Worker;
    use std::time::Duration;

    fn plain_config() -> Arc<ApiConfig> {
        Arc::new(ApiConfig {
            identity: vec![Arc::new(IdentityEvaluator::new(
                EvaluatorBase::named("public"),
                CredentialSource::default(),
                IdentityKind::Anonymous(AnonymousIdentity),
            ))],
            ..Default::default()
        })
    }

    /// A config whose identity evaluator owns a background worker, so
    /// cleanup is observable through the worker state
    fn config_with_worker() -> (Arc<ApiConfig>, Arc<IdentityEvaluator>) {
        let mut api_key = ApiKeyIdentity::with_keys(Default::default());
        api_key.set_refresher(Worker::spawn(
            "api-key-refresh",
            Duration::from_secs(3600),
            || async {},
        ));
        let evaluator = Arc::new(IdentityEvaluator::new(
            EvaluatorBase::named("friends"),
            CredentialSource::default(),
            IdentityKind::ApiKey(api_key),
        ));
        let config = Arc::new(ApiConfig {
            identity: vec![evaluator.clone()],
            ..Default::default()
        });
        (config, evaluator)
    }

    fn refresh_active(evaluator: &IdentityEvaluator) -> bool {
        match &evaluator.kind {
            IdentityKind::ApiKey(api_key) => api_key.refresh_active(),
            _ => panic!("expected an api key evaluator"),
        }
    }

    #[test]
    fn test_forward_and_reverse_consistency() {
        let store = ConfigStore::new();
        let id = ConfigId::new("apps", "policy-a");

        store
            .set(id.clone(), "api.example.com", plain_config(), true)
            .unwrap();
        store
            .set(id.clone(), "admin.example.com", plain_config(), true)
            .unwrap();

        assert_eq!(store.find_id("api.example.com"), Some(id.clone()));
        let mut hosts = store.find_hosts(&id);
        hosts.sort();
        assert_eq!(hosts, vec!["admin.example.com", "api.example.com"]);
        assert!(store.get("api.example.com").is_some());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_cross_namespace_collision_refused() {
        let store = ConfigStore::new();
        let red = ConfigId::new("red", "config-a");
        let blue = ConfigId::new("blue", "config-b");

        let original = plain_config();
        store.set(red.clone(), "foo.com", original.clone(), true).unwrap();

        let err = store
            .set(blue.clone(), "foo.com", plain_config(), true)
            .unwrap_err();
        assert!(matches!(err, Error::HostTaken { .. }));

        // The existing binding is intact and the challenger has none
        assert_eq!(store.find_id("foo.com"), Some(red));
        assert!(Arc::ptr_eq(&store.get("foo.com").unwrap(), &original));
        assert!(store.find_hosts(&blue).is_empty());
    }

    #[test]
    fn test_same_namespace_supersession() {
        let store = ConfigStore::new();
        let older = ConfigId::new("apps", "policy-a");
        let newer = ConfigId::new("apps", "policy-b");

        store.set(older.clone(), "foo.com", plain_config(), true).unwrap();
        store.set(newer.clone(), "foo.com", plain_config(), true).unwrap();

        assert_eq!(store.find_id("foo.com"), Some(newer));
        assert!(store.find_hosts(&older).is_empty());

        // Without override the second bind is refused
        let err = store
            .set(older, "foo.com", plain_config(), false)
            .unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_replacement_cleans_displaced_config() {
        let store = ConfigStore::new();
        let id = ConfigId::new("apps", "policy-a");
        let (old_config, old_evaluator) = config_with_worker();

        store.set(id.clone(), "foo.com", old_config, true).unwrap();
        assert!(refresh_active(&old_evaluator));

        // Hot swap under the same config id
        let (new_config, new_evaluator) = config_with_worker();
        store.set(id.clone(), "foo.com", new_config, true).unwrap();

        assert!(!refresh_active(&old_evaluator));
        assert!(refresh_active(&new_evaluator));
    }

    #[tokio::test]
    async fn test_replacement_keeps_config_bound_to_other_hosts() {
        let store = ConfigStore::new();
        let id = ConfigId::new("apps", "policy-a");
        let (shared, evaluator) = config_with_worker();

        store.set(id.clone(), "a.example.com", shared.clone(), true).unwrap();
        store.set(id.clone(), "b.example.com", shared.clone(), true).unwrap();

        // Replacing one host leaves the config owned by the other
        let (replacement, _) = config_with_worker();
        store
            .set(id.clone(), "a.example.com", replacement, true)
            .unwrap();
        assert!(refresh_active(&evaluator));

        // Dropping the last binding cleans it
        store.delete(&id);
        assert!(!refresh_active(&evaluator));
    }

    #[tokio::test]
    async fn test_delete_cleans_and_is_idempotent() {
        let store = ConfigStore::new();
        let id = ConfigId::new("apps", "policy-a");
        let (config, evaluator) = config_with_worker();

        store.set(id.clone(), "foo.com", config, true).unwrap();
        store.delete(&id);

        assert!(store.is_empty());
        assert!(!refresh_active(&evaluator));
        assert!(store.get("foo.com").is_none());

        // Deleting again is a no-op
        store.delete(&id);
    }

    #[tokio::test]
    async fn test_prune_drops_stale_hosts_only() {
        let store = ConfigStore::new();
        let id = ConfigId::new("apps", "policy-a");
        let (config, evaluator) = config_with_worker();

        store.set(id.clone(), "keep.example.com", config.clone(), true).unwrap();
        store.set(id.clone(), "stale.example.com", config, true).unwrap();

        store.prune(&id, &["keep.example.com".to_string()]);

        assert!(store.get("stale.example.com").is_none());
        assert!(store.get("keep.example.com").is_some());
        // Still bound, so not cleaned
        assert!(refresh_active(&evaluator));
    }
}
