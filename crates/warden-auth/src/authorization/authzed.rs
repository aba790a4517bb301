//! Authzed / SpiceDB authorization
//!
//! Checks one permission over the SpiceDB HTTP API. Subject, resource
//! and permission are static-or-selector values resolved per request.

use serde_json::{json, Value};

use warden_common::json::ValueOrSelector;
use warden_common::{Error, Result};

use crate::context::EvalContext;

const HAS_PERMISSION: &str = "PERMISSIONSHIP_HAS_PERMISSION";

/// One side of the permission check
#[derive(Debug, Clone)]
pub struct AuthzedObject {
    /// Object type
    pub kind: ValueOrSelector,
    /// Object id
    pub name: ValueOrSelector,
}

/// Authzed authorization evaluator kind
#[derive(Debug)]
pub struct AuthzedAuthorization {
    endpoint: String,
    token: Option<String>,
    subject: AuthzedObject,
    resource: AuthzedObject,
    permission: ValueOrSelector,
    http: reqwest::Client,
}

impl AuthzedAuthorization {
    /// Create the evaluator
    pub fn new(
        endpoint: impl Into<String>,
        token: Option<String>,
        subject: AuthzedObject,
        resource: AuthzedObject,
        permission: ValueOrSelector,
        http: reqwest::Client,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            token,
            subject,
            resource,
            permission,
            http,
        }
    }

    /// Check the permission and map the decision
    pub async fn evaluate(&self, ctx: &EvalContext) -> Result<Value> {
        let doc = ctx.snapshot();

        let body = json!({
            "resource": {
                "objectType": self.resource.kind.resolve_string(&doc),
                "objectId": self.resource.name.resolve_string(&doc),
            },
            "permission": self.permission.resolve_string(&doc),
            "subject": {
                "object": {
                    "objectType": self.subject.kind.resolve_string(&doc),
                    "objectId": self.subject.name.resolve_string(&doc),
                }
            }
        });

        let url = format!(
            "{}/v1/permissions/check",
            self.endpoint.trim_end_matches('/')
        );
        let mut request = self.http.post(&url).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::evaluator("authzed", format!("check request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::evaluator(
                "authzed",
                format!("check endpoint returned HTTP {}", response.status()),
            ));
        }

        let decision: Value = response
            .json()
            .await
            .map_err(|e| Error::evaluator("authzed", format!("invalid check response: {e}")))?;

        if decision.get("permissionship").and_then(Value::as_str) == Some(HAS_PERMISSION) {
            Ok(decision)
        } else {
            Err(Error::unauthorized("subject does not have the permission"))
        }
    }
}
