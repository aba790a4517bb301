//! Kubernetes TokenReview identity
//!
//! Posts the request token as a TokenReview and exposes the reviewed
//! user info as the identity.

use k8s_openapi::api::authentication::v1::{TokenReview, TokenReviewSpec};
use kube::api::PostParams;
use kube::{Api, Client};
use serde_json::Value;
use tracing::debug;

use warden_common::{Error, Result};

use crate::context::EvalContext;
use crate::request::CredentialSource;

/// TokenReview identity evaluator kind
#[derive(Debug)]
pub struct TokenReviewIdentity {
    audiences: Vec<String>,
    client: Client,
}

impl TokenReviewIdentity {
    /// Create the evaluator
    pub fn new(client: Client, audiences: Vec<String>) -> Self {
        Self { audiences, client }
    }

    /// Review the request token against the cluster
    pub async fn authenticate(
        &self,
        credentials: &CredentialSource,
        ctx: &EvalContext,
    ) -> Result<Value> {
        let token = credentials.extract(ctx.request())?;

        let review = TokenReview {
            spec: TokenReviewSpec {
                token: Some(token),
                audiences: (!self.audiences.is_empty()).then(|| self.audiences.clone()),
            },
            ..Default::default()
        };

        let api: Api<TokenReview> = Api::all(self.client.clone());
        let reviewed = api
            .create(&PostParams::default(), &review)
            .await
            .map_err(|e| Error::evaluator("kubernetesTokenReview", e.to_string()))?;

        let status = reviewed.status.unwrap_or_default();
        if status.authenticated == Some(true) {
            debug!("TokenReview authenticated the request token");
            let user = status.user.unwrap_or_default();
            serde_json::to_value(user)
                .map_err(|e| Error::evaluator("kubernetesTokenReview", e.to_string()))
        } else {
            Err(Error::unauthenticated(
                status
                    .error
                    .unwrap_or_else(|| "the token was not authenticated".to_string()),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_review_body_shape() {
        let review = TokenReview {
            spec: TokenReviewSpec {
                token: Some("opaque".into()),
                audiences: Some(vec!["warden".into()]),
            },
            ..Default::default()
        };
        let value = serde_json::to_value(&review).unwrap();
        assert_eq!(value["spec"]["token"], "opaque");
        assert_eq!(value["spec"]["audiences"][0], "warden");
    }
}
