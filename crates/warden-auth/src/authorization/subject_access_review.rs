//! Kubernetes SubjectAccessReview authorization
//!
//! Delegates the decision to the cluster's RBAC layer. The reviewed
//! user and attributes are built from static-or-selector values; when
//! no resource attributes are configured, a non-resource review is
//! built from the request path and verb.

use k8s_openapi::api::authorization::v1::{
    NonResourceAttributes, ResourceAttributes, SubjectAccessReview, SubjectAccessReviewSpec,
};
use kube::api::PostParams;
use kube::{Api, Client};
use serde_json::{json, Value};

use warden_common::json::ValueOrSelector;
use warden_common::{Error, Result};

use crate::context::EvalContext;

/// Resource attributes of the review, each side static or dynamic
#[derive(Debug, Clone, Default)]
pub struct SarResourceAttributes {
    /// Namespace of the reviewed resource
    pub namespace: Option<ValueOrSelector>,
    /// API group of the reviewed resource
    pub group: Option<ValueOrSelector>,
    /// Resource kind
    pub resource: Option<ValueOrSelector>,
    /// Resource name
    pub name: Option<ValueOrSelector>,
    /// Subresource
    pub sub_resource: Option<ValueOrSelector>,
    /// Verb
    pub verb: Option<ValueOrSelector>,
}

/// SubjectAccessReview authorization evaluator kind
#[derive(Debug)]
pub struct SubjectAccessReviewAuthorization {
    user: ValueOrSelector,
    groups: Vec<String>,
    resource_attributes: Option<SarResourceAttributes>,
    client: Client,
}

impl SubjectAccessReviewAuthorization {
    /// Create the evaluator
    pub fn new(
        client: Client,
        user: ValueOrSelector,
        groups: Vec<String>,
        resource_attributes: Option<SarResourceAttributes>,
    ) -> Self {
        Self {
            user,
            groups,
            resource_attributes,
            client,
        }
    }

    /// Post the review and map the decision
    pub async fn evaluate(&self, ctx: &EvalContext) -> Result<Value> {
        let doc = ctx.snapshot();

        let spec = match &self.resource_attributes {
            Some(attrs) => SubjectAccessReviewSpec {
                user: Some(self.user.resolve_string(&doc)),
                groups: (!self.groups.is_empty()).then(|| self.groups.clone()),
                resource_attributes: Some(ResourceAttributes {
                    namespace: resolve_attr(&attrs.namespace, &doc),
                    group: resolve_attr(&attrs.group, &doc),
                    resource: resolve_attr(&attrs.resource, &doc),
                    name: resolve_attr(&attrs.name, &doc),
                    subresource: resolve_attr(&attrs.sub_resource, &doc),
                    verb: resolve_attr(&attrs.verb, &doc),
                    ..Default::default()
                }),
                ..Default::default()
            },
            None => SubjectAccessReviewSpec {
                user: Some(self.user.resolve_string(&doc)),
                groups: (!self.groups.is_empty()).then(|| self.groups.clone()),
                non_resource_attributes: Some(NonResourceAttributes {
                    path: Some(ctx.request().path.clone()),
                    verb: Some(ctx.request().method.to_lowercase()),
                }),
                ..Default::default()
            },
        };

        let review = SubjectAccessReview {
            spec,
            ..Default::default()
        };

        let api: Api<SubjectAccessReview> = Api::all(self.client.clone());
        let reviewed = api
            .create(&PostParams::default(), &review)
            .await
            .map_err(|e| Error::evaluator("kubernetesSubjectAccessReview", e.to_string()))?;

        let status = reviewed.status.unwrap_or_default();
        if status.allowed {
            Ok(json!(true))
        } else {
            Err(Error::unauthorized(status.reason.unwrap_or_else(|| {
                "denied by the kubernetes RBAC layer".to_string()
            })))
        }
    }
}

fn resolve_attr(attr: &Option<ValueOrSelector>, doc: &Value) -> Option<String> {
    attr.as_ref()
        .map(|value| value.resolve_string(doc))
        .filter(|s| !s.is_empty())
}
