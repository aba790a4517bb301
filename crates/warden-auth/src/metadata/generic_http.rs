//! Generic HTTP metadata
//!
//! Fetches JSON metadata from an arbitrary endpoint. The endpoint is a
//! template rendered per request; parameters and headers are built from
//! static-or-selector properties; an optional shared secret
//! authenticates Warden against the metadata source.

use serde_json::{Map, Value};

use warden_common::json::{value_to_string, ValueOrSelector};
use warden_common::{Error, Result};

use crate::context::EvalContext;
use crate::request::{CredentialLocation, CredentialSource};

/// HTTP method of the metadata request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HttpMethod {
    /// Parameters go to the query string
    #[default]
    Get,
    /// Parameters go to the body
    Post,
}

/// Body encoding of POST metadata requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentType {
    /// `application/json`
    #[default]
    Json,
    /// `application/x-www-form-urlencoded`
    FormUrlEncoded,
}

/// Generic HTTP metadata evaluator kind
#[derive(Debug)]
pub struct GenericHttpMetadata {
    endpoint: String,
    method: HttpMethod,
    parameters: Vec<(String, ValueOrSelector)>,
    headers: Vec<(String, ValueOrSelector)>,
    content_type: ContentType,
    shared_secret: Option<(CredentialSource, String)>,
    http: reqwest::Client,
}

impl GenericHttpMetadata {
    /// Create the evaluator
    ///
    /// `shared_secret` pairs the injection location with the secret
    /// value fetched at translate time.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        endpoint: impl Into<String>,
        method: HttpMethod,
        parameters: Vec<(String, ValueOrSelector)>,
        headers: Vec<(String, ValueOrSelector)>,
        content_type: ContentType,
        shared_secret: Option<(CredentialSource, String)>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            method,
            parameters,
            headers,
            content_type,
            shared_secret,
            http,
        }
    }

    /// Perform the metadata request
    pub async fn fetch(&self, ctx: &EvalContext) -> Result<Value> {
        let doc = ctx.snapshot();
        let url = ctx.render(&self.endpoint);

        let params: Vec<(String, Value)> = self
            .parameters
            .iter()
            .map(|(name, value)| (name.clone(), value.resolve(&doc)))
            .collect();

        let mut request = match self.method {
            HttpMethod::Get => {
                let query: Vec<(String, String)> = params
                    .iter()
                    .map(|(name, value)| (name.clone(), value_to_string(value)))
                    .collect();
                self.http.get(&url).query(&query)
            }
            HttpMethod::Post => match self.content_type {
                ContentType::Json => {
                    let body: Map<String, Value> = params.into_iter().collect();
                    self.http.post(&url).json(&Value::Object(body))
                }
                ContentType::FormUrlEncoded => {
                    let form: Vec<(String, String)> = params
                        .iter()
                        .map(|(name, value)| (name.clone(), value_to_string(value)))
                        .collect();
                    self.http.post(&url).form(&form)
                }
            },
        };

        for (name, value) in &self.headers {
            request = request.header(name, value.resolve_string(&doc));
        }

        if let Some((source, secret)) = &self.shared_secret {
            request = inject_secret(request, source, secret);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::evaluator("http", format!("metadata request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::evaluator(
                "http",
                format!("{url} returned HTTP {}", response.status()),
            ));
        }

        response
            .json()
            .await
            .map_err(|e| Error::evaluator("http", format!("invalid metadata response: {e}")))
    }
}

/// Place the shared secret where the metadata source expects it
fn inject_secret(
    request: reqwest::RequestBuilder,
    source: &CredentialSource,
    secret: &str,
) -> reqwest::RequestBuilder {
    match source.location() {
        CredentialLocation::AuthorizationHeader => {
            request.header("Authorization", format!("{} {secret}", source.key()))
        }
        CredentialLocation::CustomHeader => request.header(source.key(), secret),
        CredentialLocation::QueryParam => request.query(&[(source.key(), secret)]),
        CredentialLocation::Cookie => {
            request.header("Cookie", format!("{}={secret}", source.key()))
        }
    }
}
