//! Per-request evaluation context
//!
//! Carries the mutable authorization document, the request deadline and
//! the cancellation token for one pipeline run. Evaluators read the
//! document through [`EvalContext::snapshot`] / [`EvalContext::resolve`];
//! only the phase runner writes, via the crate-private
//! [`EvalContext::set`].

use std::time::Duration;

use parking_lot::RwLock;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use warden_common::json::{self, Resolved};

use crate::request::RequestEnvelope;

/// Evaluation context of a single request
pub struct EvalContext {
    request: RequestEnvelope,
    json: RwLock<Value>,
    request_id: String,
    deadline: tokio::time::Instant,
    cancel: CancellationToken,
}

impl EvalContext {
    /// Build the context and its authorization document
    ///
    /// The document starts with three namespaces: `context` (the request
    /// attributes, never mutated again), `auth` (filled by the pipeline)
    /// and `request` (id and deadline derived at start).
    pub fn new(request: RequestEnvelope, timeout: Duration) -> Self {
        let request_id = Uuid::new_v4().to_string();
        let deadline_at = chrono::Utc::now()
            + chrono::TimeDelta::from_std(timeout).unwrap_or(chrono::TimeDelta::zero());

        let doc = json!({
            "context": request.to_context_json(),
            "auth": {
                "metadata": {},
                "authorization": {},
            },
            "request": {
                "id": request_id,
                "deadline": deadline_at.timestamp_millis(),
            },
        });

        Self {
            request,
            json: RwLock::new(doc),
            request_id,
            deadline: tokio::time::Instant::now() + timeout,
            cancel: CancellationToken::new(),
        }
    }

    /// The raw request envelope
    pub fn request(&self) -> &RequestEnvelope {
        &self.request
    }

    /// Unique id of this request
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// A point-in-time copy of the authorization document
    pub fn snapshot(&self) -> Value {
        self.json.read().clone()
    }

    /// Resolve a selector against the live document
    pub fn resolve(&self, selector: &str) -> Resolved {
        json::resolve(&self.json.read(), selector)
    }

    /// Render a template against the live document
    pub fn render(&self, template: &str) -> String {
        json::template::render(&self.json.read(), template)
    }

    /// Write a value into the document
    ///
    /// The phase runner is the sole writer; evaluators never mutate the
    /// document directly.
    pub(crate) fn set(&self, path: &str, value: Value) {
        json::set(&mut self.json.write(), path, value);
    }

    /// Absolute deadline of this request
    pub fn deadline(&self) -> tokio::time::Instant {
        self.deadline
    }

    /// Whether the deadline has elapsed
    pub fn deadline_exceeded(&self) -> bool {
        tokio::time::Instant::now() >= self.deadline
    }

    /// Whether the request has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The request's cancellation token
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Cancel the request (invoked by the transport on client abort)
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for EvalContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvalContext")
            .field("request_id", &self.request_id)
            .field("host", &self.request.host)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
