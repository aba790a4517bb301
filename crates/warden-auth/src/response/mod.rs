//! Response phase evaluators
//!
//! Response evaluators produce the augmentation data returned with an
//! allowed decision. Each entry is delivered under a wrapper: injected
//! as a request header towards the upstream, or emitted as Envoy
//! dynamic metadata.

mod wristband;

pub use wristband::{WristbandKey, WristbandResponse};

use async_trait::async_trait;
use serde_json::{Map, Value};

use warden_common::json::{PatternExpression, ValueOrSelector};
use warden_common::Result;

use crate::context::EvalContext;
use crate::evaluator::{CallCache, Evaluator, EvaluatorBase};

/// How a response augmentation entry is delivered to the proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Wrapper {
    /// Injected as a request header towards the upstream
    #[default]
    HttpHeader,
    /// Emitted as Envoy dynamic metadata
    EnvoyDynamicMetadata,
}

/// One response phase evaluator
#[derive(Debug)]
pub struct ResponseEvaluator {
    /// Common scheduling attributes
    pub base: EvaluatorBase,
    /// Delivery wrapper
    pub wrapper: Wrapper,
    /// Header name or metadata key; defaults to the evaluator name
    pub wrapper_key: Option<String>,
    /// Kind-specific behavior
    pub kind: ResponseKind,
}

/// The closed set of response evaluator kinds
#[derive(Debug)]
pub enum ResponseKind {
    /// Signed JWT attesting authorization facts downstream
    Wristband(WristbandResponse),
    /// Arbitrary JSON object assembled from properties
    DynamicJson(DynamicJsonResponse),
    /// A single templated string
    Plain(PlainResponse),
}

impl ResponseEvaluator {
    /// Create a response evaluator
    pub fn new(
        base: EvaluatorBase,
        wrapper: Wrapper,
        wrapper_key: Option<String>,
        kind: ResponseKind,
    ) -> Self {
        Self {
            base,
            wrapper,
            wrapper_key,
            kind,
        }
    }

    /// The header name or metadata key of this entry
    pub fn key(&self) -> &str {
        self.wrapper_key.as_deref().unwrap_or(&self.base.name)
    }
}

#[async_trait]
impl Evaluator for ResponseEvaluator {
    async fn call(&self, ctx: &EvalContext) -> Result<Value> {
        match &self.kind {
            ResponseKind::Wristband(wristband) => wristband.issue(ctx),
            ResponseKind::DynamicJson(dynamic) => Ok(dynamic.build(ctx)),
            ResponseKind::Plain(plain) => Ok(plain.render(ctx)),
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

/// JSON object assembled from static-or-selector properties
#[derive(Debug)]
pub struct DynamicJsonResponse {
    properties: Vec<(String, ValueOrSelector)>,
}

impl DynamicJsonResponse {
    /// Create the evaluator
    pub fn new(properties: Vec<(String, ValueOrSelector)>) -> Self {
        Self { properties }
    }

    /// Assemble the object against the live document
    pub fn build(&self, ctx: &EvalContext) -> Value {
        let doc = ctx.snapshot();
        let object: Map<String, Value> = self
            .properties
            .iter()
            .map(|(name, value)| (name.clone(), value.resolve(&doc)))
            .collect();
        Value::Object(object)
    }
}

/// A single templated string value
#[derive(Debug)]
pub struct PlainResponse {
    value: ValueOrSelector,
}

impl PlainResponse {
    /// Create the evaluator
    pub fn new(value: ValueOrSelector) -> Self {
        Self { value }
    }

    /// Render the value against the live document
    pub fn render(&self, ctx: &EvalContext) -> Value {
        Value::String(self.value.resolve_string(&ctx.snapshot()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RequestEnvelope;
    use serde_json::json;
    use std::time::Duration;

    fn ctx() -> EvalContext {
        let ctx = EvalContext::new(
            RequestEnvelope {
                method: "GET".into(),
                path: "/things".into(),
                ..Default::default()
            },
            Duration::from_secs(5),
        );
        ctx.set("auth.identity", json!({"sub": "alice"}));
        ctx
    }

    #[tokio::test]
    async fn test_dynamic_json_mixes_static_and_selector() {
        let dynamic = DynamicJsonResponse::new(vec![
            ("username".into(), ValueOrSelector::Selector("auth.identity.sub".into())),
            ("tier".into(), ValueOrSelector::Static(json!("gold"))),
        ]);

        assert_eq!(
            dynamic.build(&ctx()),
            json!({"username": "alice", "tier": "gold"})
        );
    }

    #[tokio::test]
    async fn test_plain_response_renders_string() {
        let plain = PlainResponse::new(ValueOrSelector::Selector("auth.identity.sub".into()));
        assert_eq!(plain.render(&ctx()), json!("alice"));
    }

    #[tokio::test]
    async fn test_wrapper_key_defaults_to_name() {
        let evaluator = ResponseEvaluator::new(
            EvaluatorBase::named("x-auth-data"),
            Wrapper::HttpHeader,
            None,
            ResponseKind::Plain(PlainResponse::new(ValueOrSelector::Static(json!("v")))),
        );
        assert_eq!(evaluator.key(), "x-auth-data");

        let keyed = ResponseEvaluator::new(
            EvaluatorBase::named("wristband"),
            Wrapper::HttpHeader,
            Some("x-wristband-token".into()),
            ResponseKind::Plain(PlainResponse::new(ValueOrSelector::Static(json!("v")))),
        );
        assert_eq!(keyed.key(), "x-wristband-token");
    }
}
