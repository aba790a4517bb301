//! Metadata phase evaluators
//!
//! Metadata evaluators enrich the authorization document with external
//! data ahead of the authorization phase. Their results land under
//! `auth.metadata.<name>`; failures are logged but never fail the
//! request.

mod generic_http;
mod uma;
mod user_info;

pub use generic_http::{ContentType, GenericHttpMetadata, HttpMethod};
pub use uma::UmaMetadata;
pub use user_info::UserInfoMetadata;

use async_trait::async_trait;
use serde_json::Value;

use warden_common::json::PatternExpression;
use warden_common::Result;

use crate::context::EvalContext;
use crate::evaluator::{CallCache, Evaluator, EvaluatorBase};

/// One metadata phase evaluator
#[derive(Debug)]
pub struct MetadataEvaluator {
    /// Common scheduling attributes
    pub base: EvaluatorBase,
    /// Kind-specific behavior
    pub kind: MetadataKind,
}

/// The closed set of metadata evaluator kinds
#[derive(Debug)]
pub enum MetadataKind {
    /// OIDC UserInfo endpoint of a configured OIDC identity
    UserInfo(UserInfoMetadata),
    /// UMA 2.0 resource registry query
    Uma(UmaMetadata),
    /// Generic HTTP metadata source
    Http(GenericHttpMetadata),
}

impl MetadataEvaluator {
    /// Create a metadata evaluator
    pub fn new(base: EvaluatorBase, kind: MetadataKind) -> Self {
        Self { base, kind }
    }
}

#[async_trait]
impl Evaluator for MetadataEvaluator {
    async fn call(&self, ctx: &EvalContext) -> Result<Value> {
        match &self.kind {
            MetadataKind::UserInfo(user_info) => user_info.fetch(ctx).await,
            MetadataKind::Uma(uma) => uma.fetch(ctx).await,
            MetadataKind::Http(http) => http.fetch(ctx).await,
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
}
