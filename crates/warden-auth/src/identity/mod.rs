//! Identity phase evaluators
//!
//! Each evaluator verifies one kind of credential and, on success,
//! yields the identity object the pipeline writes to `auth.identity`.
//! The kinds are a closed set; kind-specific behavior is dispatched
//! through [`IdentityEvaluator::call`] only.

mod api_key;
mod oauth2;
mod oidc;
mod token_review;

pub use api_key::ApiKeyIdentity;
pub use oauth2::OAuth2Introspection;
pub use oidc::{DiscoveryDocument, OidcIdentity, OidcProvider};
pub use token_review::TokenReviewIdentity;

use async_trait::async_trait;
use serde_json::{json, Value};

use warden_common::json::{PatternExpression, Resolved};
use warden_common::{Error, Result};

use crate::context::EvalContext;
use crate::evaluator::{CallCache, Evaluator, EvaluatorBase};
use crate::request::CredentialSource;

/// One identity phase evaluator
#[derive(Debug)]
pub struct IdentityEvaluator {
    /// Common scheduling attributes
    pub base: EvaluatorBase,
    /// Where the credential is carried in the request
    pub credentials: CredentialSource,
    /// Kind-specific behavior
    pub kind: IdentityKind,
}

/// The closed set of identity evaluator kinds
#[derive(Debug)]
pub enum IdentityKind {
    /// OpenID Connect JWT verification
    Oidc(OidcIdentity),
    /// OAuth2 token introspection
    OAuth2(OAuth2Introspection),
    /// API keys stored in labelled Secrets
    ApiKey(ApiKeyIdentity),
    /// Kubernetes TokenReview
    TokenReview(TokenReviewIdentity),
    /// Peer certificate subject from mutual TLS
    Mtls(MtlsIdentity),
    /// Identity assumed from a trusted selector
    Plain(PlainIdentity),
    /// Unconditional anonymous access
    Anonymous(AnonymousIdentity),
}

impl IdentityEvaluator {
    /// Create an identity evaluator
    pub fn new(base: EvaluatorBase, credentials: CredentialSource, kind: IdentityKind) -> Self {
        Self {
            base,
            credentials,
            kind,
        }
    }
}

#[async_trait]
impl Evaluator for IdentityEvaluator {
    async fn call(&self, ctx: &EvalContext) -> Result<Value> {
        match &self.kind {
            IdentityKind::Oidc(oidc) => oidc.authenticate(&self.credentials, ctx).await,
            IdentityKind::OAuth2(oauth2) => oauth2.introspect(&self.credentials, ctx).await,
            IdentityKind::ApiKey(api_key) => api_key.authenticate(&self.credentials, ctx),
            IdentityKind::TokenReview(review) => review.authenticate(&self.credentials, ctx).await,
            IdentityKind::Mtls(mtls) => mtls.authenticate(ctx),
            IdentityKind::Plain(plain) => plain.authenticate(ctx),
            IdentityKind::Anonymous(anonymous) => anonymous.authenticate(),
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
        match &self.kind {
            IdentityKind::Oidc(oidc) => oidc.stop_refresh(),
            IdentityKind::ApiKey(api_key) => api_key.stop_refresh(),
            _ => {}
        }
    }
}

/// Identity from the peer certificate subject of a mutual TLS connection
///
/// TLS termination and certificate validation happen at the proxy; the
/// envelope carries the verified subject.
#[derive(Debug, Default)]
pub struct MtlsIdentity;

impl MtlsIdentity {
    /// Expose the peer subject as the identity
    pub fn authenticate(&self, ctx: &EvalContext) -> Result<Value> {
        match ctx.request().peer_subject.as_deref() {
            Some(subject) if !subject.is_empty() => Ok(json!({ "subject": subject })),
            _ => Err(Error::unauthenticated(
                "the request carries no peer certificate subject",
            )),
        }
    }
}

/// Identity assumed from a selector over the request context
///
/// Used when a trusted upstream already resolved the identity, for
/// example into a forwarded header.
#[derive(Debug)]
pub struct PlainIdentity {
    selector: String,
}

impl PlainIdentity {
    /// Create a plain identity reading the given selector
    pub fn new(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
        }
    }

    /// Resolve the configured selector as the identity
    pub fn authenticate(&self, ctx: &EvalContext) -> Result<Value> {
        match ctx.resolve(&self.selector) {
            Resolved::Value(value) => Ok(value),
            Resolved::Unresolved => Err(Error::unauthenticated(format!(
                "no identity found at {}",
                self.selector
            ))),
        }
    }
}

/// Unconditional anonymous identity
#[derive(Debug, Default)]
pub struct AnonymousIdentity;

impl AnonymousIdentity {
    /// Always succeeds
    pub fn authenticate(&self) -> Result<Value> {
        Ok(json!({ "anonymous": true }))
    }
}
