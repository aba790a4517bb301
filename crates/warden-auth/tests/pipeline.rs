//! End-to-end pipeline scenarios against in-memory configs

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use warden_auth::authorization::{
    AuthorizationEvaluator, AuthorizationKind, PatternMatchingAuthorization,
};
use warden_auth::identity::{
    AnonymousIdentity, ApiKeyIdentity, IdentityEvaluator, IdentityKind, PlainIdentity,
};
use warden_auth::response::{DynamicJsonResponse, ResponseEvaluator, ResponseKind, Wrapper};
use warden_auth::{
    ApiConfig, AuthMetrics, ConfigId, ConfigStore, CredentialLocation, CredentialSource, Decision,
    DenyTemplate, DenyReason, EvaluatorBase, Pipeline, RequestEnvelope,
};
use warden_common::json::{PatternExpression, PatternOperator, ValueOrSelector};

fn get_request(host: &str, path: &str, authorization: Option<&str>) -> RequestEnvelope {
    let mut headers = HashMap::new();
    if let Some(value) = authorization {
        headers.insert("authorization".to_string(), vec![value.to_string()]);
    }
    RequestEnvelope {
        method: "GET".into(),
        scheme: "https".into(),
        host: host.into(),
        path: path.into(),
        headers,
        ..Default::default()
    }
}

fn api_key_identity(name: &str, keys: &[(&str, &str)]) -> Arc<IdentityEvaluator> {
    let keys: HashMap<String, Value> = keys
        .iter()
        .map(|(key, secret_name)| {
            (
                key.to_string(),
                json!({"name": secret_name, "namespace": "apps"}),
            )
        })
        .collect();
    Arc::new(IdentityEvaluator::new(
        EvaluatorBase::named(name),
        CredentialSource::new(CredentialLocation::AuthorizationHeader, "APIKEY"),
        IdentityKind::ApiKey(ApiKeyIdentity::with_keys(keys)),
    ))
}

fn method_rule(method: &str) -> PatternExpression {
    PatternExpression::new("context.request.http.method", PatternOperator::Eq, method).unwrap()
}

fn pattern_authorization(name: &str, rules: Vec<PatternExpression>) -> Arc<AuthorizationEvaluator> {
    Arc::new(AuthorizationEvaluator::new(
        EvaluatorBase::named(name),
        AuthorizationKind::PatternMatching(PatternMatchingAuthorization::new(rules)),
    ))
}

fn identity_echo_response() -> Arc<ResponseEvaluator> {
    Arc::new(ResponseEvaluator::new(
        EvaluatorBase::named("x-auth-data"),
        Wrapper::HttpHeader,
        None,
        ResponseKind::DynamicJson(DynamicJsonResponse::new(vec![(
            "secret".to_string(),
            ValueOrSelector::Selector("auth.identity.name".into()),
        )])),
    ))
}

#[tokio::test]
async fn test_api_key_happy_path() {
    let config = ApiConfig {
        identity: vec![api_key_identity("friends", &[("k1", "friend-key-1")])],
        authorization: vec![pattern_authorization("read-only", vec![method_rule("GET")])],
        response: vec![identity_echo_response()],
        ..Default::default()
    };
    config.validate().unwrap();

    let pipeline = Pipeline::new(Arc::new(AuthMetrics::new()));
    let decision = pipeline
        .evaluate(
            &config,
            get_request("api.example.com", "/things", Some("APIKEY k1")),
        )
        .await;

    // The winning identity is the matched secret object
    match decision {
        Decision::Allowed { augmentation } => {
            assert_eq!(augmentation.len(), 1);
            assert_eq!(augmentation[0].key, "x-auth-data");
            assert_eq!(augmentation[0].wrapper, Wrapper::HttpHeader);
            assert_eq!(augmentation[0].value, json!({"secret": "friend-key-1"}));
        }
        other => panic!("expected Allowed, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unknown_api_key_is_unauthenticated() {
    let config = ApiConfig {
        identity: vec![api_key_identity("friends", &[("k1", "friend-key-1")])],
        ..Default::default()
    };

    let pipeline = Pipeline::new(Arc::new(AuthMetrics::new()));
    let decision = pipeline
        .evaluate(
            &config,
            get_request("api.example.com", "/things", Some("APIKEY nope")),
        )
        .await;

    match decision {
        Decision::Denied(denial) => {
            assert_eq!(denial.reason, DenyReason::Unauthenticated);
            assert_eq!(denial.code, 401);
            assert!(denial.body.is_empty());
        }
        other => panic!("expected Denied, got {other:?}"),
    }
}

#[tokio::test]
async fn test_anonymous_fallback_in_later_bucket() {
    // A trusted-header identity at priority 0 that cannot resolve, an
    // anonymous fallback at priority 10
    let plain = Arc::new(IdentityEvaluator::new(
        EvaluatorBase {
            name: "trusted-header".into(),
            priority: 0,
            ..Default::default()
        },
        CredentialSource::default(),
        IdentityKind::Plain(PlainIdentity::new("context.request.http.headers.x-user")),
    ));
    let anonymous = Arc::new(IdentityEvaluator::new(
        EvaluatorBase {
            name: "anonymous".into(),
            priority: 10,
            ..Default::default()
        },
        CredentialSource::default(),
        IdentityKind::Anonymous(AnonymousIdentity),
    ));

    let config = ApiConfig {
        identity: vec![plain, anonymous],
        response: vec![Arc::new(ResponseEvaluator::new(
            EvaluatorBase::named("who"),
            Wrapper::HttpHeader,
            None,
            ResponseKind::DynamicJson(DynamicJsonResponse::new(vec![(
                "anonymous".to_string(),
                ValueOrSelector::Selector("auth.identity.anonymous".into()),
            )])),
        ))],
        ..Default::default()
    };

    let pipeline = Pipeline::new(Arc::new(AuthMetrics::new()));
    let decision = pipeline
        .evaluate(&config, get_request("api.example.com", "/things", None))
        .await;

    match decision {
        Decision::Allowed { augmentation } => {
            assert_eq!(augmentation[0].value, json!({"anonymous": true}));
        }
        other => panic!("expected Allowed, got {other:?}"),
    }
}

#[tokio::test]
async fn test_authorization_deny_renders_template_and_counts_the_failing_evaluator() {
    let deny_body = DenyTemplate {
        code: None,
        message: Some(ValueOrSelector::Static(json!("access denied"))),
        headers: vec![(
            "x-denied-for".to_string(),
            ValueOrSelector::Selector("auth.identity.name".into()),
        )],
        body: Some(ValueOrSelector::Selector("auth.identity.name".into())),
    };

    let config = ApiConfig {
        identity: vec![api_key_identity("friends", &[("k1", "friend-key-1")])],
        authorization: vec![
            pattern_authorization("read-only", vec![method_rule("GET")]),
            pattern_authorization("write-only", vec![method_rule("POST")]),
        ],
        deny_unauthorized: Some(deny_body),
        ..Default::default()
    };

    let metrics = Arc::new(AuthMetrics::new());
    let pipeline = Pipeline::new(metrics.clone());
    let decision = pipeline
        .evaluate(
            &config,
            get_request("api.example.com", "/things", Some("APIKEY k1")),
        )
        .await;

    match decision {
        Decision::Denied(denial) => {
            assert_eq!(denial.reason, DenyReason::Unauthorized);
            assert_eq!(denial.code, 403);
            assert_eq!(denial.message, "access denied");
            assert_eq!(denial.body, "friend-key-1");
            assert_eq!(
                denial.headers,
                vec![("x-denied-for".to_string(), "friend-key-1".to_string())]
            );
        }
        other => panic!("expected Denied, got {other:?}"),
    }

    // Only the failing evaluator's counter moved
    assert_eq!(metrics.evaluator_failures("write-only"), 1);
    assert_eq!(metrics.evaluator_failures("read-only"), 0);
    assert_eq!(metrics.denied(), 1);
}

#[tokio::test]
async fn test_top_level_conditions_short_circuit_to_no_match() {
    let config = ApiConfig {
        conditions: vec![PatternExpression::new(
            "context.request.http.path",
            PatternOperator::Matches,
            "^/protected/.*",
        )
        .unwrap()],
        identity: vec![api_key_identity("friends", &[("k1", "friend-key-1")])],
        ..Default::default()
    };

    let metrics = Arc::new(AuthMetrics::new());
    let pipeline = Pipeline::new(metrics.clone());

    // Outside the protected prefix: pass-through, not deny
    let decision = pipeline
        .evaluate(&config, get_request("api.example.com", "/public", None))
        .await;
    assert_eq!(decision, Decision::NoMatch);
    assert_eq!(metrics.no_match(), 1);

    // Inside the prefix the config applies and denies the missing key
    let decision = pipeline
        .evaluate(
            &config,
            get_request("api.example.com", "/protected/things", None),
        )
        .await;
    assert!(matches!(decision, Decision::Denied(_)));
}

#[tokio::test]
async fn test_all_identity_evaluators_skipped_is_unauthenticated() {
    let gated = Arc::new(IdentityEvaluator::new(
        EvaluatorBase {
            name: "gated".into(),
            conditions: vec![method_rule("POST")],
            ..Default::default()
        },
        CredentialSource::default(),
        IdentityKind::Anonymous(AnonymousIdentity),
    ));
    let config = ApiConfig {
        identity: vec![gated],
        ..Default::default()
    };

    let pipeline = Pipeline::new(Arc::new(AuthMetrics::new()));
    let decision = pipeline
        .evaluate(&config, get_request("api.example.com", "/things", None))
        .await;

    match decision {
        Decision::Denied(denial) => assert_eq!(denial.reason, DenyReason::Unauthenticated),
        other => panic!("expected Denied, got {other:?}"),
    }
}

#[tokio::test]
async fn test_priority_swap_keeps_the_qualifying_winner() {
    let winner_value = |decision: Decision| match decision {
        Decision::Allowed { augmentation } => augmentation[0].value.clone(),
        other => panic!("expected Allowed, got {other:?}"),
    };

    let build = |failing_priority: u32, anonymous_priority: u32| ApiConfig {
        identity: vec![
            Arc::new(IdentityEvaluator::new(
                EvaluatorBase {
                    name: "broken".into(),
                    priority: failing_priority,
                    ..Default::default()
                },
                CredentialSource::default(),
                IdentityKind::Plain(PlainIdentity::new("context.request.http.headers.absent")),
            )),
            Arc::new(IdentityEvaluator::new(
                EvaluatorBase {
                    name: "anonymous".into(),
                    priority: anonymous_priority,
                    ..Default::default()
                },
                CredentialSource::default(),
                IdentityKind::Anonymous(AnonymousIdentity),
            )),
        ],
        response: vec![Arc::new(ResponseEvaluator::new(
            EvaluatorBase::named("who"),
            Wrapper::HttpHeader,
            None,
            ResponseKind::DynamicJson(DynamicJsonResponse::new(vec![(
                "anonymous".to_string(),
                ValueOrSelector::Selector("auth.identity.anonymous".into()),
            )])),
        ))],
        ..Default::default()
    };

    let pipeline = Pipeline::new(Arc::new(AuthMetrics::new()));

    let ordered = pipeline
        .evaluate(
            &build(0, 10),
            get_request("api.example.com", "/things", None),
        )
        .await;
    let swapped = pipeline
        .evaluate(
            &build(10, 0),
            get_request("api.example.com", "/things", None),
        )
        .await;

    assert_eq!(winner_value(ordered), winner_value(swapped));
}

#[tokio::test]
async fn test_in_flight_evaluation_survives_store_replacement() {
    let store = ConfigStore::new();
    let id = ConfigId::new("apps", "policy-a");

    let old = Arc::new(ApiConfig {
        identity: vec![api_key_identity("friends", &[("k1", "friend-key-1")])],
        ..Default::default()
    });
    store.set(id.clone(), "api.example.com", old, true).unwrap();

    // A pipeline holds the config while the reconciler swaps it
    let held = store.get("api.example.com").unwrap();
    let replacement = Arc::new(ApiConfig {
        identity: vec![api_key_identity("friends", &[("k2", "friend-key-2")])],
        ..Default::default()
    });
    store
        .set(id.clone(), "api.example.com", replacement, true)
        .unwrap();

    let pipeline = Pipeline::new(Arc::new(AuthMetrics::new()));
    let decision = pipeline
        .evaluate(
            &held,
            get_request("api.example.com", "/things", Some("APIKEY k1")),
        )
        .await;
    assert!(decision.is_allowed());

    // New lookups resolve the replacement
    let current = store.get("api.example.com").unwrap();
    let decision = pipeline
        .evaluate(
            &current,
            get_request("api.example.com", "/things", Some("APIKEY k1")),
        )
        .await;
    assert!(!decision.is_allowed());
}

#[tokio::test]
async fn test_pipeline_times_out_as_gateway_timeout() {
    let config = ApiConfig {
        identity: vec![api_key_identity("friends", &[("k1", "friend-key-1")])],
        ..Default::default()
    };

    let pipeline =
        Pipeline::new(Arc::new(AuthMetrics::new())).with_timeout(Duration::from_millis(0));
    let decision = pipeline
        .evaluate(
            &config,
            get_request("api.example.com", "/things", Some("APIKEY k1")),
        )
        .await;

    match decision {
        Decision::Denied(denial) => {
            assert_eq!(denial.reason, DenyReason::Timeout);
            assert_eq!(denial.code, 504);
        }
        other => panic!("expected Denied, got {other:?}"),
    }
}
