//! AuthPolicy translation
//!
//! Turns a declarative `AuthPolicy` into the runtime [`ApiConfig`]:
//! named patterns are expanded, regexes and Rego compile, referenced
//! Secrets are fetched, and evaluator kinds are constructed with their
//! background workers. Any failure aborts the whole translation, so a
//! broken update never displaces the config already being enforced.

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client, ResourceExt};
use serde_json::Value;

use warden_auth::authorization::{
    AuthorizationEvaluator, AuthorizationKind, AuthzedAuthorization, AuthzedObject,
    OpaAuthorization, OpaExternalSource, PatternMatchingAuthorization, SarResourceAttributes,
    SubjectAccessReviewAuthorization,
};
use warden_auth::identity::{
    AnonymousIdentity, ApiKeyIdentity, IdentityEvaluator, IdentityKind, MtlsIdentity,
    OAuth2Introspection, OidcIdentity, PlainIdentity, TokenReviewIdentity,
};
use warden_auth::metadata::{
    ContentType, GenericHttpMetadata, HttpMethod, MetadataEvaluator, MetadataKind, UmaMetadata,
    UserInfoMetadata,
};
use warden_auth::response::{
    DynamicJsonResponse, PlainResponse, ResponseEvaluator, ResponseKind, Wrapper,
    WristbandKey, WristbandResponse,
};
use warden_auth::{ApiConfig, CallCache, CredentialLocation, CredentialSource, DenyTemplate, EvaluatorBase};
use warden_common::crd::{
    AuthPolicy, AuthorizationKindSpec, ContentTypeSpec, CredentialLocationSpec, CredentialsSpec,
    DenyResponseSpec, EvaluatorCacheSpec, HttpMethodSpec, IdentityKindSpec, MetadataKindSpec,
    PatternRuleSpec, PropertySpec, ResponseKindSpec, SecretKeyRef, ValueSpec, WrapperSpec,
};
use warden_common::json::{PatternExpression, Template, ValueOrSelector};
use warden_common::{Error, Result};

/// How often API key Secrets are re-listed
const API_KEY_REFRESH: Duration = Duration::from_secs(60);

/// Secret data entries of OAuth2/UMA client credentials
const CLIENT_ID_KEY: &str = "clientID";
const CLIENT_SECRET_KEY: &str = "clientSecret";

/// Secret data entry of a wristband signing key
const SIGNING_KEY_PEM: &str = "key.pem";

/// Dependencies and defaults the translation works with
#[derive(Clone)]
pub struct TranslateContext {
    /// Cluster client for Secret fetches and cluster-backed evaluators;
    /// kinds that need it fail translation when absent
    pub client: Option<Client>,
    /// Shared HTTP client handed to network-backed evaluators
    pub http: reqwest::Client,
    /// Whether the deployment watches all namespaces
    pub cluster_wide: bool,
    /// Cache TTL applied when an evaluator's cache sets none
    pub default_cache_ttl: Duration,
    /// Discovery refresh applied when an OIDC identity sets no TTL
    pub default_oidc_refresh: Duration,
}

/// Translate one AuthPolicy into its runtime config
pub async fn translate(policy: &AuthPolicy, tc: &TranslateContext) -> Result<Arc<ApiConfig>> {
    let namespace = policy.namespace().unwrap_or_default();
    let name = policy.name_any();
    let spec = &policy.spec;

    let mut identity = Vec::with_capacity(spec.identity.len());
    for entry in &spec.identity {
        let kind = match &entry.kind {
            IdentityKindSpec::Oidc(oidc) => {
                let refresh = oidc
                    .ttl
                    .map(Duration::from_secs)
                    .unwrap_or(tc.default_oidc_refresh);
                IdentityKind::Oidc(
                    OidcIdentity::new(oidc.endpoint.clone(), refresh, tc.http.clone()).await,
                )
            }
            IdentityKindSpec::Oauth2(oauth2) => {
                let secret = fetch_secret(tc, &namespace, &oauth2.credentials_ref.name).await?;
                IdentityKind::OAuth2(OAuth2Introspection::new(
                    oauth2.token_introspection_url.clone(),
                    oauth2.token_type_hint.clone(),
                    secret_entry(&secret, CLIENT_ID_KEY)?,
                    secret_entry(&secret, CLIENT_SECRET_KEY)?,
                    tc.http.clone(),
                ))
            }
            IdentityKindSpec::ApiKey(api_key) => {
                let client = require_client(tc)?;
                let namespace = if api_key.all_namespaces && tc.cluster_wide {
                    None
                } else {
                    Some(namespace.clone())
                };
                IdentityKind::ApiKey(
                    ApiKeyIdentity::new(
                        client,
                        api_key.label_selectors.clone(),
                        namespace,
                        API_KEY_REFRESH,
                    )
                    .await,
                )
            }
            IdentityKindSpec::KubernetesTokenReview(review) => IdentityKind::TokenReview(
                TokenReviewIdentity::new(require_client(tc)?, review.audiences.clone()),
            ),
            IdentityKindSpec::Mtls(_) => IdentityKind::Mtls(MtlsIdentity),
            IdentityKindSpec::Plain(plain) => {
                IdentityKind::Plain(PlainIdentity::new(plain.selector.clone()))
            }
            IdentityKindSpec::Anonymous(_) => IdentityKind::Anonymous(AnonymousIdentity),
        };

        identity.push(Arc::new(IdentityEvaluator::new(
            evaluator_base(
                policy,
                &entry.name,
                entry.priority,
                entry.metrics,
                &entry.conditions,
                entry.cache.as_ref(),
                tc,
            )?,
            credential_source(&entry.credentials),
            kind,
        )));
    }

    let mut metadata = Vec::with_capacity(spec.metadata.len());
    for entry in &spec.metadata {
        let kind = match &entry.kind {
            MetadataKindSpec::UserInfo(user_info) => {
                let (provider, credentials) =
                    oidc_identity_handle(&identity, &user_info.identity_source)?;
                MetadataKind::UserInfo(UserInfoMetadata::new(
                    provider,
                    credentials,
                    tc.http.clone(),
                ))
            }
            MetadataKindSpec::Uma(uma) => {
                let secret = fetch_secret(tc, &namespace, &uma.credentials_ref.name).await?;
                MetadataKind::Uma(UmaMetadata::new(
                    uma.endpoint.clone(),
                    secret_entry(&secret, CLIENT_ID_KEY)?,
                    secret_entry(&secret, CLIENT_SECRET_KEY)?,
                    tc.http.clone(),
                ))
            }
            MetadataKindSpec::Http(http) => {
                let shared_secret = match &http.shared_secret_ref {
                    Some(secret_ref) => Some((
                        credential_source(&http.credentials),
                        fetch_secret_entry(tc, &namespace, secret_ref).await?,
                    )),
                    None => None,
                };
                MetadataKind::Http(GenericHttpMetadata::new(
                    http.endpoint.clone(),
                    match http.method {
                        HttpMethodSpec::Get => HttpMethod::Get,
                        HttpMethodSpec::Post => HttpMethod::Post,
                    },
                    properties(&http.parameters),
                    properties(&http.headers),
                    match http.content_type {
                        ContentTypeSpec::Json => ContentType::Json,
                        ContentTypeSpec::FormUrlEncoded => ContentType::FormUrlEncoded,
                    },
                    shared_secret,
                    tc.http.clone(),
                ))
            }
        };

        metadata.push(Arc::new(MetadataEvaluator::new(
            evaluator_base(
                policy,
                &entry.name,
                entry.priority,
                entry.metrics,
                &entry.conditions,
                entry.cache.as_ref(),
                tc,
            )?,
            kind,
        )));
    }

    let mut authorization = Vec::with_capacity(spec.authorization.len());
    for entry in &spec.authorization {
        let kind = match &entry.kind {
            AuthorizationKindSpec::PatternMatching(pattern) => {
                AuthorizationKind::PatternMatching(PatternMatchingAuthorization::new(
                    build_rules(policy, &pattern.rules)?,
                ))
            }
            AuthorizationKindSpec::Opa(opa) => {
                let policy_name = format!("{namespace}/{name}/{}", entry.name);
                let authorization = match &opa.external_registry {
                    Some(registry) => {
                        let shared_secret = match &registry.shared_secret_ref {
                            Some(secret_ref) => {
                                Some(fetch_secret_entry(tc, &namespace, secret_ref).await?)
                            }
                            None => None,
                        };
                        OpaAuthorization::from_registry(
                            policy_name,
                            OpaExternalSource {
                                endpoint: registry.endpoint.clone(),
                                shared_secret,
                                ttl: registry.ttl.map(Duration::from_secs),
                            },
                            opa.all_values,
                            tc.http.clone(),
                        )
                        .await?
                    }
                    None => {
                        if opa.inline_rego.is_empty() {
                            return Err(Error::configuration(format!(
                                "opa authorization {:?} has neither inline Rego nor an external registry",
                                entry.name
                            )));
                        }
                        OpaAuthorization::new_inline(policy_name, &opa.inline_rego, opa.all_values)?
                    }
                };
                AuthorizationKind::Opa(authorization)
            }
            AuthorizationKindSpec::KubernetesSubjectAccessReview(sar) => {
                AuthorizationKind::SubjectAccessReview(SubjectAccessReviewAuthorization::new(
                    require_client(tc)?,
                    required_value(&sar.user, &entry.name, "user")?,
                    sar.groups.clone(),
                    sar.resource_attributes.as_ref().map(|attrs| {
                        SarResourceAttributes {
                            namespace: value_or_selector(&attrs.namespace),
                            group: value_or_selector(&attrs.group),
                            resource: value_or_selector(&attrs.resource),
                            name: value_or_selector(&attrs.name),
                            sub_resource: value_or_selector(&attrs.sub_resource),
                            verb: value_or_selector(&attrs.verb),
                        }
                    }),
                ))
            }
            AuthorizationKindSpec::Authzed(authzed) => {
                let token = match &authzed.shared_secret_ref {
                    Some(secret_ref) => Some(fetch_secret_entry(tc, &namespace, secret_ref).await?),
                    None => None,
                };
                AuthorizationKind::Authzed(AuthzedAuthorization::new(
                    authzed.endpoint.clone(),
                    token,
                    AuthzedObject {
                        kind: required_value(&authzed.subject.kind, &entry.name, "subject.kind")?,
                        name: required_value(&authzed.subject.name, &entry.name, "subject.name")?,
                    },
                    AuthzedObject {
                        kind: required_value(&authzed.resource.kind, &entry.name, "resource.kind")?,
                        name: required_value(&authzed.resource.name, &entry.name, "resource.name")?,
                    },
                    required_value(&authzed.permission, &entry.name, "permission")?,
                    tc.http.clone(),
                ))
            }
        };

        authorization.push(Arc::new(AuthorizationEvaluator::new(
            evaluator_base(
                policy,
                &entry.name,
                entry.priority,
                entry.metrics,
                &entry.conditions,
                entry.cache.as_ref(),
                tc,
            )?,
            kind,
        )));
    }

    let mut response = Vec::with_capacity(spec.response.len());
    for entry in &spec.response {
        let kind = match &entry.kind {
            ResponseKindSpec::Wristband(wristband) => {
                let key_ref = wristband.signing_key_refs.first().ok_or_else(|| {
                    Error::configuration(format!(
                        "wristband response {:?} configures no signing key",
                        entry.name
                    ))
                })?;
                let secret = fetch_secret(tc, &namespace, &key_ref.name).await?;
                let pem = secret_bytes(&secret, SIGNING_KEY_PEM)?;
                let signing_key =
                    WristbandKey::from_pem(&key_ref.name, &key_ref.algorithm, &pem)?;
                ResponseKind::Wristband(WristbandResponse::new(
                    wristband.issuer.clone(),
                    properties(&wristband.custom_claims),
                    wristband.token_duration.map(Duration::from_secs),
                    signing_key,
                ))
            }
            ResponseKindSpec::Json(json) => {
                ResponseKind::DynamicJson(DynamicJsonResponse::new(properties(&json.properties)))
            }
            ResponseKindSpec::Plain(value) => ResponseKind::Plain(PlainResponse::new(
                required_value(value, &entry.name, "value")?,
            )),
        };

        response.push(Arc::new(ResponseEvaluator::new(
            evaluator_base(
                policy,
                &entry.name,
                entry.priority,
                entry.metrics,
                &entry.conditions,
                entry.cache.as_ref(),
                tc,
            )?,
            match entry.wrapper {
                WrapperSpec::HttpHeader => Wrapper::HttpHeader,
                WrapperSpec::EnvoyDynamicMetadata => Wrapper::EnvoyDynamicMetadata,
            },
            entry.wrapper_key.clone(),
            kind,
        )));
    }

    let config = ApiConfig {
        conditions: build_rules(policy, &spec.conditions)?,
        identity,
        metadata,
        authorization,
        response,
        deny_unauthenticated: spec
            .deny_with
            .as_ref()
            .and_then(|deny| deny.unauthenticated.as_ref())
            .map(deny_template),
        deny_unauthorized: spec
            .deny_with
            .as_ref()
            .and_then(|deny| deny.unauthorized.as_ref())
            .map(deny_template),
        labels: [
            ("namespace".to_string(), namespace.clone()),
            ("name".to_string(), name.clone()),
        ]
        .into(),
    };

    config.validate()?;
    Ok(Arc::new(config))
}

/// Expand pattern rules, resolving named references
fn build_rules(policy: &AuthPolicy, rules: &[PatternRuleSpec]) -> Result<Vec<PatternExpression>> {
    let mut expressions = Vec::new();

    for rule in rules {
        match &rule.pattern_ref {
            Some(reference) => {
                let named = policy.spec.patterns.get(reference).ok_or_else(|| {
                    Error::configuration(format!("unknown pattern reference {reference:?}"))
                })?;
                for expression in named {
                    expressions.push(PatternExpression::new(
                        &expression.selector,
                        expression.operator,
                        &expression.value,
                    )?);
                }
            }
            None => {
                expressions.push(PatternExpression::new(
                    &rule.expression.selector,
                    rule.expression.operator,
                    &rule.expression.value,
                )?);
            }
        }
    }

    Ok(expressions)
}

#[allow(clippy::too_many_arguments)]
fn evaluator_base(
    policy: &AuthPolicy,
    name: &str,
    priority: u32,
    metrics: bool,
    conditions: &[PatternRuleSpec],
    cache: Option<&EvaluatorCacheSpec>,
    tc: &TranslateContext,
) -> Result<EvaluatorBase> {
    Ok(EvaluatorBase {
        name: name.to_string(),
        priority,
        conditions: build_rules(policy, conditions)?,
        metrics,
        cache: cache.map(|spec| {
            CallCache::new(
                Template::new(&spec.key),
                spec.ttl
                    .map(Duration::from_secs)
                    .unwrap_or(tc.default_cache_ttl),
            )
        }),
    })
}

fn credential_source(spec: &CredentialsSpec) -> CredentialSource {
    let location = match spec.location {
        CredentialLocationSpec::AuthorizationHeader => CredentialLocation::AuthorizationHeader,
        CredentialLocationSpec::CustomHeader => CredentialLocation::CustomHeader,
        CredentialLocationSpec::QueryParam => CredentialLocation::QueryParam,
        CredentialLocationSpec::Cookie => CredentialLocation::Cookie,
    };
    CredentialSource::new(location, &spec.key_selector)
}

fn value_or_selector(spec: &ValueSpec) -> Option<ValueOrSelector> {
    match (&spec.value, &spec.selector) {
        (Some(value), _) => Some(ValueOrSelector::Static(value.clone())),
        (None, Some(selector)) => Some(ValueOrSelector::Selector(selector.clone())),
        (None, None) => None,
    }
}

fn required_value(spec: &ValueSpec, evaluator: &str, field: &str) -> Result<ValueOrSelector> {
    value_or_selector(spec).ok_or_else(|| {
        Error::configuration(format!(
            "evaluator {evaluator:?} is missing a value for {field}"
        ))
    })
}

fn properties(specs: &[PropertySpec]) -> Vec<(String, ValueOrSelector)> {
    specs
        .iter()
        .map(|property| {
            (
                property.name.clone(),
                value_or_selector(&property.value)
                    .unwrap_or(ValueOrSelector::Static(Value::Null)),
            )
        })
        .collect()
}

fn deny_template(spec: &DenyResponseSpec) -> DenyTemplate {
    DenyTemplate {
        code: spec.code,
        message: spec.message.as_ref().and_then(value_or_selector),
        headers: properties(&spec.headers),
        body: spec.body.as_ref().and_then(value_or_selector),
    }
}

/// Resolve a userinfo source to its OIDC provider handle
fn oidc_identity_handle(
    identity: &[Arc<IdentityEvaluator>],
    source: &str,
) -> Result<(Arc<warden_auth::identity::OidcProvider>, CredentialSource)> {
    use warden_auth::Evaluator;

    let evaluator = identity
        .iter()
        .find(|evaluator| evaluator.name() == source)
        .ok_or_else(|| Error::configuration(format!("missing identity config {source:?}")))?;

    match &evaluator.kind {
        IdentityKind::Oidc(oidc) => Ok((oidc.provider(), evaluator.credentials.clone())),
        _ => Err(Error::configuration(format!(
            "identity {source:?} is not an OIDC identity"
        ))),
    }
}

fn require_client(tc: &TranslateContext) -> Result<Client> {
    tc.client.clone().ok_or_else(|| {
        Error::configuration("this evaluator kind requires a kubernetes client")
    })
}

async fn fetch_secret(tc: &TranslateContext, namespace: &str, name: &str) -> Result<Secret> {
    let client = require_client(tc)?;
    let api: Api<Secret> = Api::namespaced(client, namespace);
    Ok(api.get(name).await?)
}

async fn fetch_secret_entry(
    tc: &TranslateContext,
    namespace: &str,
    secret_ref: &SecretKeyRef,
) -> Result<String> {
    let secret = fetch_secret(tc, namespace, &secret_ref.name).await?;
    secret_entry(&secret, &secret_ref.key)
}

fn secret_entry(secret: &Secret, key: &str) -> Result<String> {
    let bytes = secret_bytes(secret, key)?;
    String::from_utf8(bytes).map_err(|_| {
        Error::configuration(format!(
            "secret {:?} entry {key:?} is not valid UTF-8",
            secret.name_any()
        ))
    })
}

fn secret_bytes(secret: &Secret, key: &str) -> Result<Vec<u8>> {
    secret
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        .map(|bytes| bytes.0.clone())
        .ok_or_else(|| {
            Error::configuration(format!(
                "secret {:?} has no entry {key:?}",
                secret.name_any()
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use warden_auth::Decision;

    fn translate_context() -> TranslateContext {
        TranslateContext {
            client: None,
            http: reqwest::Client::new(),
            cluster_wide: true,
            default_cache_ttl: Duration::from_secs(60),
            default_oidc_refresh: Duration::from_secs(1800),
        }
    }

    fn policy(spec: Value) -> AuthPolicy {
        serde_json::from_value(json!({
            "apiVersion": "warden.dev/v1alpha1",
            "kind": "AuthPolicy",
            "metadata": {"name": "demo", "namespace": "apps"},
            "spec": spec
        }))
        .expect("valid policy")
    }

    #[tokio::test]
    async fn test_translate_pattern_policy() {
        let policy = policy(json!({
            "hosts": ["api.example.com"],
            "patterns": {
                "read-only": [
                    {"selector": "context.request.http.method", "operator": "eq", "value": "GET"}
                ]
            },
            "identity": [
                {"name": "trusted", "plain": {"selector": "context.request.http.headers.x-user"}},
                {"name": "public", "priority": 1, "anonymous": {}}
            ],
            "authorization": [
                {"name": "reads", "patternMatching": {"rules": [{"patternRef": "read-only"}]}}
            ],
            "response": [
                {"name": "x-auth", "json": {"properties": [
                    {"name": "user", "selector": "auth.identity"}
                ]}}
            ],
            "denyWith": {
                "unauthorized": {"code": 451, "body": {"value": "blocked"}}
            }
        }));

        let config = translate(&policy, &translate_context()).await.unwrap();

        assert_eq!(config.identity.len(), 2);
        assert_eq!(config.authorization.len(), 1);
        assert_eq!(config.response.len(), 1);
        assert_eq!(config.labels.get("namespace"), Some(&"apps".to_string()));
        assert_eq!(
            config.deny_unauthorized.as_ref().and_then(|d| d.code),
            Some(451)
        );

        // The translated config actually evaluates
        let pipeline =
            warden_auth::Pipeline::new(Arc::new(warden_auth::AuthMetrics::new()));
        let mut headers = std::collections::HashMap::new();
        headers.insert("x-user".to_string(), vec!["alice".to_string()]);
        let decision = pipeline
            .evaluate(
                &config,
                warden_auth::RequestEnvelope {
                    method: "GET".into(),
                    host: "api.example.com".into(),
                    path: "/things".into(),
                    headers,
                    ..Default::default()
                },
            )
            .await;
        assert!(decision.is_allowed());

        let denied = pipeline
            .evaluate(
                &config,
                warden_auth::RequestEnvelope {
                    method: "DELETE".into(),
                    host: "api.example.com".into(),
                    path: "/things".into(),
                    ..Default::default()
                },
            )
            .await;
        match denied {
            Decision::Denied(denial) => {
                assert_eq!(denial.code, 451);
                assert_eq!(denial.body, "blocked");
            }
            other => panic!("expected Denied, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_pattern_reference_fails() {
        let policy = policy(json!({
            "hosts": ["api.example.com"],
            "authorization": [
                {"name": "broken", "patternMatching": {"rules": [{"patternRef": "nope"}]}}
            ]
        }));

        let err = translate(&policy, &translate_context()).await.unwrap_err();
        assert!(err.to_string().contains("unknown pattern reference"));
    }

    #[tokio::test]
    async fn test_duplicate_evaluator_names_fail() {
        let policy = policy(json!({
            "hosts": ["api.example.com"],
            "identity": [
                {"name": "same", "anonymous": {}},
                {"name": "same", "mtls": {}}
            ]
        }));

        let err = translate(&policy, &translate_context()).await.unwrap_err();
        assert!(err.to_string().contains("duplicate identity evaluator"));
    }

    #[tokio::test]
    async fn test_cluster_backed_kind_requires_client() {
        let policy = policy(json!({
            "hosts": ["api.example.com"],
            "identity": [
                {"name": "friends", "apiKey": {"labelSelectors": {"group": "friends"}}}
            ]
        }));

        let err = translate(&policy, &translate_context()).await.unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_userinfo_requires_oidc_source() {
        let policy = policy(json!({
            "hosts": ["api.example.com"],
            "identity": [
                {"name": "public", "anonymous": {}}
            ],
            "metadata": [
                {"name": "profile", "userInfo": {"identitySource": "public"}}
            ]
        }));

        let err = translate(&policy, &translate_context()).await.unwrap_err();
        assert!(err.to_string().contains("not an OIDC identity"));
    }

    #[tokio::test]
    async fn test_inline_opa_translation() {
        let policy = policy(json!({
            "hosts": ["api.example.com"],
            "identity": [{"name": "public", "anonymous": {}}],
            "authorization": [
                {"name": "rego", "opa": {"inlineRego": "allow { input.context.request.http.method == \"GET\" }"}}
            ]
        }));

        let config = translate(&policy, &translate_context()).await.unwrap();
        assert_eq!(config.authorization.len(), 1);

        let pipeline =
            warden_auth::Pipeline::new(Arc::new(warden_auth::AuthMetrics::new()));
        let decision = pipeline
            .evaluate(
                &config,
                warden_auth::RequestEnvelope {
                    method: "GET".into(),
                    host: "api.example.com".into(),
                    path: "/things".into(),
                    ..Default::default()
                },
            )
            .await;
        assert!(decision.is_allowed());
    }

    #[tokio::test]
    async fn test_opa_without_source_fails() {
        let policy = policy(json!({
            "hosts": ["api.example.com"],
            "authorization": [
                {"name": "rego", "opa": {}}
            ]
        }));

        let err = translate(&policy, &translate_context()).await.unwrap_err();
        assert!(err.to_string().contains("neither inline Rego"));
    }
}
