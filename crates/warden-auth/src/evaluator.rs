//! The evaluator contract
//!
//! Every unit of work inside a phase implements [`Evaluator`]. The
//! contract is deliberately small: `call` produces a JSON value or a
//! classified error, the remaining methods expose scheduling attributes
//! (name, priority, gating conditions, optional result cache) and the
//! `clean` hook stops any background workers the evaluator owns.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use warden_common::json::{PatternExpression, Template};
use warden_common::Result;

use crate::context::EvalContext;

/// Contract implemented by every evaluator of every phase
#[async_trait]
pub trait Evaluator: Send + Sync {
    /// Perform the evaluator's work against the request context
    ///
    /// Implementations must not mutate the authorization document; the
    /// phase runner is its sole writer. Long-running work must observe
    /// `ctx.is_cancelled()` and return promptly.
    async fn call(&self, ctx: &EvalContext) -> Result<Value>;

    /// Evaluator name, unique within its phase
    fn name(&self) -> &str;

    /// Scheduling priority; lower executes earlier
    fn priority(&self) -> u32;

    /// Conditions gating this evaluator against the live document
    fn conditions(&self) -> &[PatternExpression];

    /// Whether per-evaluator metrics were requested
    fn metrics_enabled(&self) -> bool {
        false
    }

    /// Result cache, when configured
    fn cache(&self) -> Option<&CallCache> {
        None
    }

    /// Stop background workers owned by this evaluator; idempotent
    fn clean(&self) {}
}

/// Attributes shared by all evaluator kinds
#[derive(Debug, Default)]
pub struct EvaluatorBase {
    /// Evaluator name, unique within its phase
    pub name: String,
    /// Scheduling priority; lower executes earlier
    pub priority: u32,
    /// Conditions gating the evaluator
    pub conditions: Vec<PatternExpression>,
    /// Emit per-evaluator metrics
    pub metrics: bool,
    /// Result cache
    pub cache: Option<CallCache>,
}

impl EvaluatorBase {
    /// A base with the given name and default scheduling attributes
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Process-local per-evaluator result cache
///
/// Keys are rendered from a template against the authorization document,
/// so two requests sharing the relevant context share the cached value.
/// Entries expire after the configured TTL and are evicted lazily on
/// lookup.
#[derive(Debug)]
pub struct CallCache {
    key_template: Template,
    ttl: Duration,
    entries: DashMap<String, CacheEntry>,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    stored_at: Instant,
}

impl CallCache {
    /// Create a cache with the given key template and TTL
    pub fn new(key_template: impl Into<Template>, ttl: Duration) -> Self {
        Self {
            key_template: key_template.into(),
            ttl,
            entries: DashMap::new(),
        }
    }

    /// Render the cache key for a request
    pub fn render_key(&self, doc: &Value) -> String {
        self.key_template.render(doc)
    }

    /// Look up a fresh entry; stale entries are evicted
    pub fn get(&self, key: &str) -> Option<Value> {
        let entry = self.entries.get(key)?;
        if entry.stored_at.elapsed() < self.ttl {
            return Some(entry.value.clone());
        }
        drop(entry);
        self.entries.remove(key);
        None
    }

    /// Store a value under a rendered key
    pub fn insert(&self, key: String, value: Value) {
        self.entries.insert(
            key,
            CacheEntry {
                value,
                stored_at: Instant::now(),
            },
        );
    }

    /// Number of live entries (stale entries included until evicted)
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cache_hit_within_ttl() {
        let cache = CallCache::new(
            Template::new("{context.request.http.path}"),
            Duration::from_secs(60),
        );
        let doc = json!({"context": {"request": {"http": {"path": "/things"}}}});

        let key = cache.render_key(&doc);
        assert_eq!(key, "/things");

        assert!(cache.get(&key).is_none());
        cache.insert(key.clone(), json!({"cached": true}));
        assert_eq!(cache.get(&key), Some(json!({"cached": true})));
    }

    #[test]
    fn test_cache_expiry() {
        let cache = CallCache::new(Template::new("fixed"), Duration::from_millis(0));
        cache.insert("fixed".into(), json!(1));
        // Zero TTL expires immediately
        assert!(cache.get("fixed").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_distinct_keys_are_independent() {
        let cache = CallCache::new(
            Template::new("{context.request.http.path}"),
            Duration::from_secs(60),
        );
        cache.insert("/a".into(), json!("a"));
        cache.insert("/b".into(), json!("b"));
        assert_eq!(cache.get("/a"), Some(json!("a")));
        assert_eq!(cache.get("/b"), Some(json!("b")));
        assert_eq!(cache.len(), 2);
    }
}
