//! UMA 2.0 resource metadata
//!
//! Queries the UMA resource registry of an authorization server for the
//! resources matching the request path: discovery, then a protection
//! API token via client credentials, then the resource search and
//! fetch.

use serde::Deserialize;
use serde_json::Value;

use warden_common::{Error, Result};

use crate::context::EvalContext;

#[derive(Debug, Deserialize)]
struct UmaDiscovery {
    token_endpoint: String,
    resource_registration_endpoint: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// UMA metadata evaluator kind
#[derive(Debug)]
pub struct UmaMetadata {
    endpoint: String,
    client_id: String,
    client_secret: String,
    http: reqwest::Client,
}

impl UmaMetadata {
    /// Create the evaluator
    pub fn new(
        endpoint: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            http,
        }
    }

    /// Fetch the UMA resource data for the request path
    pub async fn fetch(&self, ctx: &EvalContext) -> Result<Value> {
        let discovery = self.discover().await?;
        let pat = self.protection_token(&discovery).await?;

        let uri = ctx.request().path.clone();
        let ids: Vec<String> = self
            .get_json(
                &format!("{}?uri={uri}", discovery.resource_registration_endpoint),
                &pat,
            )
            .await?;

        let mut resources = Vec::with_capacity(ids.len());
        for id in ids {
            let resource: Value = self
                .get_json(
                    &format!("{}/{id}", discovery.resource_registration_endpoint),
                    &pat,
                )
                .await?;
            resources.push(resource);
        }

        Ok(Value::Array(resources))
    }

    async fn discover(&self) -> Result<UmaDiscovery> {
        let url = format!(
            "{}/.well-known/uma2-configuration",
            self.endpoint.trim_end_matches('/')
        );
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::evaluator("uma", format!("discovery request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::evaluator(
                "uma",
                format!("discovery endpoint returned HTTP {}", response.status()),
            ));
        }

        response
            .json()
            .await
            .map_err(|e| Error::evaluator("uma", format!("invalid discovery document: {e}")))
    }

    /// Obtain a protection API token via client credentials
    async fn protection_token(&self, discovery: &UmaDiscovery) -> Result<String> {
        let response = self
            .http
            .post(&discovery.token_endpoint)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| Error::evaluator("uma", format!("token request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::evaluator(
                "uma",
                format!("token endpoint returned HTTP {}", response.status()),
            ));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::evaluator("uma", format!("invalid token response: {e}")))?;
        Ok(token.access_token)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str, pat: &str) -> Result<T> {
        let response = self
            .http
            .get(url)
            .bearer_auth(pat)
            .send()
            .await
            .map_err(|e| Error::evaluator("uma", format!("registry request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::evaluator(
                "uma",
                format!("{url} returned HTTP {}", response.status()),
            ));
        }

        response
            .json()
            .await
            .map_err(|e| Error::evaluator("uma", format!("invalid registry response: {e}")))
    }
}
