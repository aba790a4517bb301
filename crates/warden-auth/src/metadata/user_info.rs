//! OIDC UserInfo metadata
//!
//! Calls the userinfo endpoint of a named OIDC identity evaluator with
//! the request's own token. The provider handle is resolved at translate
//! time, so the reference is direct rather than a lookup by name per
//! request.

use std::sync::Arc;

use serde_json::Value;

use warden_common::{Error, Result};

use crate::context::EvalContext;
use crate::identity::OidcProvider;
use crate::request::CredentialSource;

/// UserInfo metadata evaluator kind
#[derive(Debug)]
pub struct UserInfoMetadata {
    provider: Arc<OidcProvider>,
    credentials: CredentialSource,
    http: reqwest::Client,
}

impl UserInfoMetadata {
    /// Create the evaluator
    ///
    /// `credentials` mirrors the source identity evaluator's credential
    /// settings so the same token is forwarded.
    pub fn new(
        provider: Arc<OidcProvider>,
        credentials: CredentialSource,
        http: reqwest::Client,
    ) -> Self {
        Self {
            provider,
            credentials,
            http,
        }
    }

    /// Fetch the userinfo claims for the request token
    pub async fn fetch(&self, ctx: &EvalContext) -> Result<Value> {
        let token = self.credentials.extract(ctx.request())?;

        let endpoint = self.provider.userinfo_endpoint().ok_or_else(|| {
            Error::evaluator(
                "userInfo",
                "the OIDC discovery document exposes no userinfo endpoint",
            )
        })?;

        let response = self
            .http
            .get(&endpoint)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| Error::evaluator("userInfo", format!("userinfo request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::evaluator(
                "userInfo",
                format!("userinfo endpoint returned HTTP {}", response.status()),
            ));
        }

        response
            .json()
            .await
            .map_err(|e| Error::evaluator("userInfo", format!("invalid userinfo response: {e}")))
    }
}
