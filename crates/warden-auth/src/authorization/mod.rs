//! Authorization phase evaluators
//!
//! Every non-skipped authorization evaluator must succeed for the
//! request to be allowed; the first failure denies the request
//! (fail-closed). Results land under `auth.authorization.<name>`.

mod authzed;
mod opa;
mod subject_access_review;

pub use authzed::{AuthzedAuthorization, AuthzedObject};
pub use opa::{OpaAuthorization, OpaExternalSource};
pub use subject_access_review::{SarResourceAttributes, SubjectAccessReviewAuthorization};

use async_trait::async_trait;
use serde_json::{json, Value};

use warden_common::json::{all_match, PatternExpression};
use warden_common::{Error, Result};

use crate::context::EvalContext;
use crate::evaluator::{CallCache, Evaluator, EvaluatorBase};

/// One authorization phase evaluator
#[derive(Debug)]
pub struct AuthorizationEvaluator {
    /// Common scheduling attributes
    pub base: EvaluatorBase,
    /// Kind-specific behavior
    pub kind: AuthorizationKind,
}

/// The closed set of authorization evaluator kinds
#[derive(Debug)]
pub enum AuthorizationKind {
    /// Pattern-matching rules over the authorization document
    PatternMatching(PatternMatchingAuthorization),
    /// Open Policy Agent (Rego) policy
    Opa(OpaAuthorization),
    /// Kubernetes SubjectAccessReview
    SubjectAccessReview(SubjectAccessReviewAuthorization),
    /// Authzed / SpiceDB permission check
    Authzed(AuthzedAuthorization),
}

impl AuthorizationEvaluator {
    /// Create an authorization evaluator
    pub fn new(base: EvaluatorBase, kind: AuthorizationKind) -> Self {
        Self { base, kind }
    }
}

#[async_trait]
impl Evaluator for AuthorizationEvaluator {
    async fn call(&self, ctx: &EvalContext) -> Result<Value> {
        match &self.kind {
            AuthorizationKind::PatternMatching(pattern) => pattern.evaluate(ctx),
            AuthorizationKind::Opa(opa) => opa.evaluate(ctx),
            AuthorizationKind::SubjectAccessReview(sar) => sar.evaluate(ctx).await,
            AuthorizationKind::Authzed(authzed) => authzed.evaluate(ctx).await,
        }
    }

    fn name(&self) -> &str {
        &self.base.name
    }

    fn priority(&self) -> u32 {
        self.base.priority
    }

    fn conditions(&self) -> &[PatternExpression] {
        &self.base.conditions
    }

    fn metrics_enabled(&self) -> bool {
        self.base.metrics
    }

    fn cache(&self) -> Option<&CallCache> {
        self.base.cache.as_ref()
    }

    fn clean(&self) {
        if let AuthorizationKind::Opa(opa) = &self.kind {
            opa.stop_repull();
        }
    }
}

/// Pattern-matching authorization
///
/// The request is authorized when every rule matches the document.
#[derive(Debug)]
pub struct PatternMatchingAuthorization {
    rules: Vec<PatternExpression>,
}

impl PatternMatchingAuthorization {
    /// Create the evaluator from compiled rules
    pub fn new(rules: Vec<PatternExpression>) -> Self {
        Self { rules }
    }

    /// Evaluate the rule conjunction
    pub fn evaluate(&self, ctx: &EvalContext) -> Result<Value> {
        if all_match(&self.rules, &ctx.snapshot()) {
            Ok(json!(true))
        } else {
            Err(Error::unauthorized("unmatched authorization rules"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RequestEnvelope;
    use std::time::Duration;
    use warden_common::json::PatternOperator;

    fn ctx() -> EvalContext {
        EvalContext::new(
            RequestEnvelope {
                method: "GET".into(),
                path: "/things".into(),
                ..Default::default()
            },
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_pattern_matching_allows_matching_request() {
        let rules = vec![PatternExpression::new(
            "context.request.http.method",
            PatternOperator::Eq,
            "GET",
        )
        .unwrap()];
        let authz = PatternMatchingAuthorization::new(rules);

        assert_eq!(authz.evaluate(&ctx()).unwrap(), json!(true));
    }

    #[tokio::test]
    async fn test_pattern_matching_denies_unmatched_request() {
        let rules = vec![PatternExpression::new(
            "context.request.http.method",
            PatternOperator::Eq,
            "DELETE",
        )
        .unwrap()];
        let authz = PatternMatchingAuthorization::new(rules);

        let err = authz.evaluate(&ctx()).unwrap_err();
        assert!(matches!(err, Error::Unauthorized { .. }));
    }

    #[tokio::test]
    async fn test_empty_rule_list_allows() {
        let authz = PatternMatchingAuthorization::new(Vec::new());
        assert!(authz.evaluate(&ctx()).is_ok());
    }
}
