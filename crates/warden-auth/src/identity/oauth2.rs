//! OAuth2 token introspection (RFC 7662)

use serde_json::Value;

use warden_common::{Error, Result};

use crate::context::EvalContext;
use crate::request::CredentialSource;

/// OAuth2 introspection identity evaluator kind
#[derive(Debug)]
pub struct OAuth2Introspection {
    url: String,
    token_type_hint: Option<String>,
    client_id: String,
    client_secret: String,
    http: reqwest::Client,
}

impl OAuth2Introspection {
    /// Create the evaluator
    pub fn new(
        url: impl Into<String>,
        token_type_hint: Option<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            url: url.into(),
            token_type_hint,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            http,
        }
    }

    /// Introspect the request token against the authorization server
    pub async fn introspect(
        &self,
        credentials: &CredentialSource,
        ctx: &EvalContext,
    ) -> Result<Value> {
        let token = credentials.extract(ctx.request())?;

        let mut form = vec![("token", token)];
        if let Some(hint) = &self.token_type_hint {
            form.push(("token_type_hint", hint.clone()));
        }

        let response = self
            .http
            .post(&self.url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&form)
            .send()
            .await
            .map_err(|e| Error::evaluator("oauth2", format!("introspection request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::evaluator(
                "oauth2",
                format!("introspection endpoint returned HTTP {}", response.status()),
            ));
        }

        let claims: Value = response
            .json()
            .await
            .map_err(|e| Error::evaluator("oauth2", format!("invalid introspection response: {e}")))?;

        if claims.get("active").and_then(Value::as_bool) == Some(true) {
            Ok(claims)
        } else {
            Err(Error::unauthenticated("the token is not active"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_construction() {
        let evaluator = OAuth2Introspection::new(
            "https://idp.example.com/introspect",
            Some("access_token".into()),
            "warden",
            "s3cr3t",
            reqwest::Client::new(),
        );
        assert_eq!(evaluator.url, "https://idp.example.com/introspect");
        assert_eq!(evaluator.token_type_hint.as_deref(), Some("access_token"));
    }
}
