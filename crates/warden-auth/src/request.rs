//! Inbound request envelope
//!
//! The transport layer translates whatever it receives (Envoy ext_authz
//! check requests today) into a [`RequestEnvelope`]; the engine never
//! sees wire types. Header names are lowercased at construction.

use std::collections::HashMap;

use serde_json::{json, Map, Value};

use warden_common::{Error, Result};

/// Transport-neutral description of the request under authorization
#[derive(Debug, Clone, Default)]
pub struct RequestEnvelope {
    /// HTTP method, uppercase
    pub method: String,
    /// URL scheme
    pub scheme: String,
    /// Request host; selects the [`crate::ApiConfig`]
    pub host: String,
    /// Path without the query string
    pub path: String,
    /// Raw query string, no leading `?`
    pub query: String,
    /// Headers, keys lowercased; multi-valued
    pub headers: HashMap<String, Vec<String>>,
    /// Peer certificate subject when the connection used mutual TLS
    pub peer_subject: Option<String>,
    /// Opaque attribute bag forwarded by the transport
    pub attributes: Value,
}

impl RequestEnvelope {
    /// First value of a header, by lowercase name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Value of a query parameter
    pub fn query_param(&self, name: &str) -> Option<String> {
        self.query.split('&').find_map(|pair| {
            let (k, v) = pair.split_once('=')?;
            (k == name).then(|| v.to_string())
        })
    }

    /// Value of a cookie from the `cookie` header
    pub fn cookie(&self, name: &str) -> Option<String> {
        self.header("cookie")?.split(';').find_map(|pair| {
            let (k, v) = pair.trim().split_once('=')?;
            (k == name).then(|| v.to_string())
        })
    }

    /// The `context` namespace of the authorization document
    pub fn to_context_json(&self) -> Value {
        let headers: Map<String, Value> = self
            .headers
            .iter()
            .map(|(name, values)| (name.clone(), json!(values.join(","))))
            .collect();

        json!({
            "request": {
                "http": {
                    "method": self.method,
                    "scheme": self.scheme,
                    "host": self.host,
                    "path": self.path,
                    "query": self.query,
                    "headers": headers,
                }
            },
            "source": {
                "principal": self.peer_subject,
            },
            "attributes": self.attributes,
        })
    }
}

/// Where an evaluator's credential is carried in the request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CredentialLocation {
    /// `Authorization: <prefix> <credential>`
    #[default]
    AuthorizationHeader,
    /// A dedicated header
    CustomHeader,
    /// A query parameter
    QueryParam,
    /// A cookie
    Cookie,
}

/// Credential extraction settings shared by identity evaluators
#[derive(Debug, Clone)]
pub struct CredentialSource {
    location: CredentialLocation,
    key: String,
}

impl Default for CredentialSource {
    fn default() -> Self {
        Self {
            location: CredentialLocation::AuthorizationHeader,
            key: "Bearer".to_string(),
        }
    }
}

impl CredentialSource {
    /// Create a credential source
    ///
    /// `key` is the header prefix for [`CredentialLocation::AuthorizationHeader`],
    /// otherwise the header, parameter or cookie name.
    pub fn new(location: CredentialLocation, key: impl Into<String>) -> Self {
        Self {
            location,
            key: key.into(),
        }
    }

    /// The configured credential location
    pub fn location(&self) -> CredentialLocation {
        self.location
    }

    /// The configured prefix or name
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Extract the credential from the request
    pub fn extract(&self, request: &RequestEnvelope) -> Result<String> {
        let found = match self.location {
            CredentialLocation::AuthorizationHeader => {
                request.header("authorization").and_then(|value| {
                    if self.key.is_empty() {
                        Some(value.to_string())
                    } else {
                        value
                            .strip_prefix(&format!("{} ", self.key))
                            .map(str::to_string)
                    }
                })
            }
            CredentialLocation::CustomHeader => {
                request.header(&self.key.to_lowercase()).map(str::to_string)
            }
            CredentialLocation::QueryParam => request.query_param(&self.key),
            CredentialLocation::Cookie => request.cookie(&self.key),
        };

        found
            .filter(|credential| !credential.is_empty())
            .ok_or_else(|| Error::unauthenticated("credential not found in the request"))
    }
}
