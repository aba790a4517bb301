//! AuthPolicy CRD
//!
//! An AuthPolicy binds a declarative authorization scheme to one or more
//! request hosts. The spec carries four ordered evaluator lists (one per
//! pipeline phase), reusable named pattern definitions, top-level
//! conditions that gate the whole policy, and optional templated denial
//! responses.
//!
//! Example:
//! ```yaml
//! apiVersion: warden.dev/v1alpha1
//! kind: AuthPolicy
//! metadata:
//!   name: api-protection
//!   namespace: apps
//! spec:
//!   hosts:
//!     - api.example.com
//!   identity:
//!     - name: friends
//!       apiKey:
//!         labelSelectors:
//!           group: friends
//!       credentials:
//!         in: authorizationHeader
//!         keySelector: APIKEY
//!   authorization:
//!     - name: read-only
//!       patternMatching:
//!         rules:
//!           - selector: context.request.http.method
//!             operator: eq
//!             value: GET
//! ```

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::json::PatternOperator;

/// AuthPolicy declares how requests to a set of hosts are authenticated
/// and authorized.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "warden.dev",
    version = "v1alpha1",
    kind = "AuthPolicy",
    namespaced,
    status = "AuthPolicyStatus",
    printcolumn = r#"{"name":"Ready","type":"boolean","jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"Hosts","type":"integer","jsonPath":".status.hostCount"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AuthPolicySpec {
    /// Request hosts this policy applies to
    pub hosts: Vec<String>,

    /// Named pattern definitions, referenced from conditions and
    /// pattern-matching rules by name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub patterns: BTreeMap<String, Vec<PatternExpressionSpec>>,

    /// Top-level conditions; when they do not match, the request is not
    /// subject to this policy at all (pass-through, not deny)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<PatternRuleSpec>,

    /// Identity phase evaluators
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub identity: Vec<IdentitySpec>,

    /// Metadata phase evaluators
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metadata: Vec<MetadataSpec>,

    /// Authorization phase evaluators
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authorization: Vec<AuthorizationSpec>,

    /// Response phase evaluators
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub response: Vec<ResponseSpec>,

    /// Templated denial responses
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deny_with: Option<DenyWithSpec>,
}

/// AuthPolicy status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthPolicyStatus {
    /// Whether the policy translated successfully and is being enforced
    #[serde(default)]
    pub ready: bool,

    /// Number of hosts bound by this policy
    #[serde(default)]
    pub host_count: u32,

    /// Human-readable message (set on translation failure)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

// ============================================================================
// Shared building blocks
// ============================================================================

/// An inline pattern expression
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PatternExpressionSpec {
    /// Selector into the authorization document
    #[serde(default)]
    pub selector: String,
    /// Comparison operator
    #[serde(default)]
    pub operator: PatternOperator,
    /// Right-hand value (may contain `{selector}` placeholders)
    #[serde(default)]
    pub value: String,
}

/// Either an inline pattern expression or a reference to a named pattern
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PatternRuleSpec {
    /// Name of a pattern defined in `spec.patterns`; expands to the
    /// conjunction of its expressions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern_ref: Option<String>,

    /// Inline expression (ignored when `patternRef` is set)
    #[serde(flatten)]
    pub expression: PatternExpressionSpec,
}

/// Where the request carries the credential an evaluator consumes
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum CredentialLocationSpec {
    /// `Authorization: <keySelector> <credential>`
    #[default]
    AuthorizationHeader,
    /// A custom header named by `keySelector`
    CustomHeader,
    /// A query parameter named by `keySelector`
    QueryParam,
    /// A cookie named by `keySelector`
    Cookie,
}

/// Credential extraction settings
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CredentialsSpec {
    /// Credential location in the request
    #[serde(default, rename = "in")]
    pub location: CredentialLocationSpec,
    /// Header prefix, header name, query parameter or cookie name,
    /// depending on the location
    #[serde(default = "default_key_selector")]
    pub key_selector: String,
}

impl Default for CredentialsSpec {
    fn default() -> Self {
        Self {
            location: CredentialLocationSpec::default(),
            key_selector: default_key_selector(),
        }
    }
}

fn default_key_selector() -> String {
    "Bearer".to_string()
}

/// Per-evaluator result caching
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EvaluatorCacheSpec {
    /// Cache key template, rendered against the document per request
    pub key: String,
    /// Time-to-live in seconds; the deployment default applies when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
}

/// Reference to a Secret in the policy's namespace
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LocalSecretRef {
    /// Secret name
    pub name: String,
}

/// Reference to one entry of a Secret in the policy's namespace
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeyRef {
    /// Secret name
    pub name: String,
    /// Data entry key
    pub key: String,
}

/// A literal value or a selector into the authorization document
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValueSpec {
    /// Literal value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    /// Selector resolved at evaluation time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
}

/// A named value used for headers, parameters, claims and JSON properties
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PropertySpec {
    /// Property name
    pub name: String,
    /// Property value
    #[serde(flatten)]
    pub value: ValueSpec,
}

// ============================================================================
// Identity phase
// ============================================================================

/// One identity phase evaluator
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IdentitySpec {
    /// Evaluator name, unique within the phase
    pub name: String,
    /// Lower priorities execute earlier
    #[serde(default)]
    pub priority: u32,
    /// Emit per-evaluator metrics
    #[serde(default)]
    pub metrics: bool,
    /// Conditions gating this evaluator
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<PatternRuleSpec>,
    /// Result caching
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<EvaluatorCacheSpec>,
    /// Where the credential is carried in the request
    #[serde(default)]
    pub credentials: CredentialsSpec,
    /// Evaluator kind
    #[serde(flatten)]
    pub kind: IdentityKindSpec,
}

/// Identity evaluator kinds
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum IdentityKindSpec {
    /// OpenID Connect JWT verification
    Oidc(OidcSpec),
    /// OAuth2 token introspection (RFC 7662)
    Oauth2(OAuth2Spec),
    /// API keys stored in labelled Secrets
    ApiKey(ApiKeySpec),
    /// Kubernetes TokenReview
    KubernetesTokenReview(TokenReviewSpec),
    /// Peer certificate subject from mutual TLS
    Mtls(MtlsSpec),
    /// Identity assumed from a trusted selector
    Plain(PlainIdentitySpec),
    /// Unconditional anonymous access
    Anonymous(AnonymousSpec),
}

/// OIDC identity settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OidcSpec {
    /// Issuer endpoint; discovery is fetched from
    /// `<endpoint>/.well-known/openid-configuration`
    pub endpoint: String,
    /// Discovery refresh interval in seconds; the deployment default
    /// applies when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
}

/// OAuth2 introspection settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OAuth2Spec {
    /// Token introspection endpoint
    pub token_introspection_url: String,
    /// Optional `token_type_hint` sent with the introspection request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type_hint: Option<String>,
    /// Secret holding `clientID` and `clientSecret`
    pub credentials_ref: LocalSecretRef,
}

/// API key identity settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeySpec {
    /// Label selectors the key Secrets must match
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub label_selectors: BTreeMap<String, String>,
    /// Look up Secrets across all namespaces (requires cluster-wide
    /// deployment scoping)
    #[serde(default)]
    pub all_namespaces: bool,
}

/// Kubernetes TokenReview identity settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TokenReviewSpec {
    /// Audiences the token must be valid for
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub audiences: Vec<String>,
}

/// Mutual TLS identity settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MtlsSpec {}

/// Plain identity settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlainIdentitySpec {
    /// Selector whose resolved value becomes the identity
    pub selector: String,
}

/// Anonymous identity settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnonymousSpec {}

// ============================================================================
// Metadata phase
// ============================================================================

/// One metadata phase evaluator
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetadataSpec {
    /// Evaluator name, unique within the phase
    pub name: String,
    /// Lower priorities execute earlier
    #[serde(default)]
    pub priority: u32,
    /// Emit per-evaluator metrics
    #[serde(default)]
    pub metrics: bool,
    /// Conditions gating this evaluator
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<PatternRuleSpec>,
    /// Result caching
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<EvaluatorCacheSpec>,
    /// Evaluator kind
    #[serde(flatten)]
    pub kind: MetadataKindSpec,
}

/// Metadata evaluator kinds
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum MetadataKindSpec {
    /// OIDC UserInfo endpoint of a configured OIDC identity
    UserInfo(UserInfoSpec),
    /// UMA 2.0 resource registry query
    Uma(UmaSpec),
    /// Generic HTTP metadata source
    Http(GenericHttpSpec),
}

/// UserInfo metadata settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserInfoSpec {
    /// Name of the OIDC identity evaluator providing the issuer
    pub identity_source: String,
}

/// UMA metadata settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UmaSpec {
    /// UMA authorization server endpoint
    pub endpoint: String,
    /// Secret holding `clientID` and `clientSecret`
    pub credentials_ref: LocalSecretRef,
}

/// HTTP method for generic HTTP metadata requests
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum HttpMethodSpec {
    /// Parameters are appended to the query string
    #[default]
    #[serde(rename = "GET")]
    Get,
    /// Parameters are sent in the request body
    #[serde(rename = "POST")]
    Post,
}

/// Content type of POST metadata requests
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ContentTypeSpec {
    /// `application/json`
    #[default]
    #[serde(rename = "application/json")]
    Json,
    /// `application/x-www-form-urlencoded`
    #[serde(rename = "application/x-www-form-urlencoded")]
    FormUrlEncoded,
}

/// Generic HTTP metadata settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenericHttpSpec {
    /// Endpoint template, rendered against the document per request
    pub endpoint: String,
    /// HTTP method
    #[serde(default)]
    pub method: HttpMethodSpec,
    /// Request parameters
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<PropertySpec>,
    /// Additional request headers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<PropertySpec>,
    /// Body encoding for POST requests
    #[serde(default)]
    pub content_type: ContentTypeSpec,
    /// Shared secret to authenticate against the metadata source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_secret_ref: Option<SecretKeyRef>,
    /// Where the shared secret is injected
    #[serde(default)]
    pub credentials: CredentialsSpec,
}

// ============================================================================
// Authorization phase
// ============================================================================

/// One authorization phase evaluator
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationSpec {
    /// Evaluator name, unique within the phase
    pub name: String,
    /// Lower priorities execute earlier
    #[serde(default)]
    pub priority: u32,
    /// Emit per-evaluator metrics
    #[serde(default)]
    pub metrics: bool,
    /// Conditions gating this evaluator
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<PatternRuleSpec>,
    /// Result caching
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<EvaluatorCacheSpec>,
    /// Evaluator kind
    #[serde(flatten)]
    pub kind: AuthorizationKindSpec,
}

/// Authorization evaluator kinds
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum AuthorizationKindSpec {
    /// Pattern-matching rules over the authorization document
    PatternMatching(PatternMatchingSpec),
    /// Open Policy Agent (Rego) policy
    Opa(OpaSpec),
    /// Kubernetes SubjectAccessReview
    KubernetesSubjectAccessReview(SubjectAccessReviewSpec),
    /// Authzed / SpiceDB permission check
    Authzed(AuthzedSpec),
}

/// Pattern-matching authorization settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PatternMatchingSpec {
    /// Conjunctive rule list; all rules must match for the request to be
    /// authorized
    pub rules: Vec<PatternRuleSpec>,
}

/// OPA authorization settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OpaSpec {
    /// Inline Rego policy; must define an `allow` rule
    #[serde(default)]
    pub inline_rego: String,
    /// Pull the policy from an external registry instead
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_registry: Option<ExternalRegistrySpec>,
    /// Return the full binding set instead of just `allow`
    #[serde(default)]
    pub all_values: bool,
}

/// External Rego policy registry
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExternalRegistrySpec {
    /// Registry endpoint serving the policy text
    pub endpoint: String,
    /// Shared secret to authenticate against the registry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_secret_ref: Option<SecretKeyRef>,
    /// Re-pull interval in seconds; no re-pull when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
}

/// Kubernetes SubjectAccessReview authorization settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubjectAccessReviewSpec {
    /// User the review is performed for
    pub user: ValueSpec,
    /// Groups the review is performed for
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,
    /// Resource attributes; when unset, a non-resource review is built
    /// from the request path and verb
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_attributes: Option<ResourceAttributesSpec>,
}

/// Resource attributes of a SubjectAccessReview
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceAttributesSpec {
    /// Namespace of the reviewed resource
    #[serde(default)]
    pub namespace: ValueSpec,
    /// API group of the reviewed resource
    #[serde(default)]
    pub group: ValueSpec,
    /// Resource kind
    #[serde(default)]
    pub resource: ValueSpec,
    /// Resource name
    #[serde(default)]
    pub name: ValueSpec,
    /// Subresource
    #[serde(default)]
    pub sub_resource: ValueSpec,
    /// Verb
    #[serde(default)]
    pub verb: ValueSpec,
}

/// Authzed / SpiceDB authorization settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthzedSpec {
    /// SpiceDB HTTP API endpoint
    pub endpoint: String,
    /// Secret entry holding the pre-shared API token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_secret_ref: Option<SecretKeyRef>,
    /// Subject of the permission check
    pub subject: AuthzedObjectSpec,
    /// Resource of the permission check
    pub resource: AuthzedObjectSpec,
    /// Permission to check
    pub permission: ValueSpec,
}

/// One side of an Authzed permission check
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthzedObjectSpec {
    /// Object type
    pub kind: ValueSpec,
    /// Object id
    pub name: ValueSpec,
}

// ============================================================================
// Response phase
// ============================================================================

/// How a response augmentation entry is delivered to the proxy
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum WrapperSpec {
    /// Injected as a request header towards the upstream
    #[default]
    HttpHeader,
    /// Emitted as Envoy dynamic metadata
    EnvoyDynamicMetadata,
}

/// One response phase evaluator
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResponseSpec {
    /// Evaluator name, unique within the phase
    pub name: String,
    /// Lower priorities execute earlier
    #[serde(default)]
    pub priority: u32,
    /// Emit per-evaluator metrics
    #[serde(default)]
    pub metrics: bool,
    /// Conditions gating this evaluator
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<PatternRuleSpec>,
    /// Result caching
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<EvaluatorCacheSpec>,
    /// Delivery wrapper
    #[serde(default)]
    pub wrapper: WrapperSpec,
    /// Header name or metadata key; defaults to the evaluator name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wrapper_key: Option<String>,
    /// Evaluator kind
    #[serde(flatten)]
    pub kind: ResponseKindSpec,
}

/// Response evaluator kinds
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum ResponseKindSpec {
    /// Signed JWT attesting authorization facts downstream
    Wristband(WristbandSpec),
    /// Arbitrary JSON object assembled from properties
    Json(DynamicJsonSpec),
    /// A single templated string
    Plain(ValueSpec),
}

/// Wristband response settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WristbandSpec {
    /// Token issuer claim
    pub issuer: String,
    /// Custom claims added to the token
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub custom_claims: Vec<PropertySpec>,
    /// Token lifetime in seconds (default 300)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_duration: Option<u64>,
    /// Signing keys; each ref names a Secret holding `key.pem`
    pub signing_key_refs: Vec<SigningKeyRefSpec>,
}

/// Reference to a wristband signing key Secret
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SigningKeyRefSpec {
    /// Secret name (also used as the key id)
    pub name: String,
    /// Signing algorithm (`ES256`, `RS256`, ...)
    pub algorithm: String,
}

/// Dynamic JSON response settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DynamicJsonSpec {
    /// Object properties
    pub properties: Vec<PropertySpec>,
}

// ============================================================================
// Denial templates
// ============================================================================

/// Templated denial responses per denial reason
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DenyWithSpec {
    /// Response for failed authentication (401 by default)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unauthenticated: Option<DenyResponseSpec>,
    /// Response for failed authorization (403 by default)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unauthorized: Option<DenyResponseSpec>,
}

/// One templated denial response
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DenyResponseSpec {
    /// HTTP status code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    /// Status message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<ValueSpec>,
    /// Response headers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<PropertySpec>,
    /// Response body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<ValueSpec>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_minimal_policy() {
        let policy: AuthPolicy = serde_json::from_value(json!({
            "apiVersion": "warden.dev/v1alpha1",
            "kind": "AuthPolicy",
            "metadata": {"name": "minimal", "namespace": "default"},
            "spec": {
                "hosts": ["api.example.com"],
                "identity": [
                    {"name": "public", "anonymous": {}}
                ]
            }
        }))
        .expect("parse");

        assert_eq!(policy.spec.hosts, vec!["api.example.com"]);
        assert_eq!(policy.spec.identity.len(), 1);
        assert!(matches!(
            policy.spec.identity[0].kind,
            IdentityKindSpec::Anonymous(_)
        ));
        assert_eq!(policy.spec.identity[0].priority, 0);
        assert_eq!(
            policy.spec.identity[0].credentials.location,
            CredentialLocationSpec::AuthorizationHeader
        );
        assert_eq!(policy.spec.identity[0].credentials.key_selector, "Bearer");
    }

    #[test]
    fn test_api_key_identity_with_credentials() {
        let identity: IdentitySpec = serde_json::from_value(json!({
            "name": "friends",
            "priority": 1,
            "apiKey": {"labelSelectors": {"group": "friends"}},
            "credentials": {"in": "authorizationHeader", "keySelector": "APIKEY"}
        }))
        .expect("parse");

        assert_eq!(identity.priority, 1);
        assert_eq!(identity.credentials.key_selector, "APIKEY");
        match &identity.kind {
            IdentityKindSpec::ApiKey(spec) => {
                assert_eq!(spec.label_selectors.get("group"), Some(&"friends".to_string()));
                assert!(!spec.all_namespaces);
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn test_pattern_matching_with_named_ref() {
        let spec: AuthPolicySpec = serde_json::from_value(json!({
            "hosts": ["api.example.com"],
            "patterns": {
                "admin-path": [
                    {"selector": "context.request.http.path", "operator": "matches", "value": "^/admin/.*"}
                ]
            },
            "authorization": [
                {
                    "name": "admin-only",
                    "patternMatching": {
                        "rules": [
                            {"patternRef": "admin-path"},
                            {"selector": "auth.identity.groups", "operator": "incl", "value": "admins"}
                        ]
                    }
                }
            ]
        }))
        .expect("parse");

        assert!(spec.patterns.contains_key("admin-path"));
        match &spec.authorization[0].kind {
            AuthorizationKindSpec::PatternMatching(pm) => {
                assert_eq!(pm.rules.len(), 2);
                assert_eq!(pm.rules[0].pattern_ref.as_deref(), Some("admin-path"));
                assert!(pm.rules[1].pattern_ref.is_none());
                assert_eq!(pm.rules[1].expression.operator, PatternOperator::Incl);
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn test_response_with_wrapper() {
        let response: ResponseSpec = serde_json::from_value(json!({
            "name": "x-ext-auth-data",
            "wrapper": "envoyDynamicMetadata",
            "json": {
                "properties": [
                    {"name": "username", "selector": "auth.identity.sub"},
                    {"name": "static", "value": "vip"}
                ]
            }
        }))
        .expect("parse");

        assert_eq!(response.wrapper, WrapperSpec::EnvoyDynamicMetadata);
        assert!(response.wrapper_key.is_none());
        match &response.kind {
            ResponseKindSpec::Json(j) => {
                assert_eq!(j.properties.len(), 2);
                assert_eq!(j.properties[0].value.selector.as_deref(), Some("auth.identity.sub"));
                assert_eq!(j.properties[1].value.value, Some(json!("vip")));
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn test_deny_with_templates() {
        let spec: DenyWithSpec = serde_json::from_value(json!({
            "unauthenticated": {
                "code": 302,
                "headers": [
                    {"name": "Location", "value": "https://sso.example.com/login?from={context.request.http.path}"}
                ]
            },
            "unauthorized": {
                "message": {"value": "forbidden"},
                "body": {"selector": "auth.identity.sub"}
            }
        }))
        .expect("parse");

        assert_eq!(spec.unauthenticated.as_ref().unwrap().code, Some(302));
        assert_eq!(spec.unauthorized.as_ref().unwrap().code, None);
    }

    #[test]
    fn test_wristband_response() {
        let response: ResponseSpec = serde_json::from_value(json!({
            "name": "wristband",
            "wristband": {
                "issuer": "https://warden.svc/wristband",
                "tokenDuration": 300,
                "customClaims": [{"name": "scope", "value": "read"}],
                "signingKeyRefs": [{"name": "wristband-key", "algorithm": "ES256"}]
            }
        }))
        .expect("parse");

        match &response.kind {
            ResponseKindSpec::Wristband(w) => {
                assert_eq!(w.token_duration, Some(300));
                assert_eq!(w.signing_key_refs[0].algorithm, "ES256");
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_kind_fails_to_parse() {
        let result: Result<IdentitySpec, _> = serde_json::from_value(json!({
            "name": "broken",
            "telepathy": {}
        }));
        assert!(result.is_err());
    }
}
