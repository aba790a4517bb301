//! Envoy ext_authz gRPC server
//!
//! Translates check requests into the engine's request envelope, asks
//! the pipeline for a decision, and maps it back: allowed decisions
//! carry header injections and dynamic metadata, denials carry the
//! pre-rendered status, headers and body. Hosts no config claims are
//! passed through, not denied.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use envoy_types::ext_authz::v3::pb::{
    Authorization, AuthorizationServer, CheckRequest, CheckResponse,
};
use envoy_types::ext_authz::v3::CheckResponseExt;
use envoy_types::pb::envoy::config::core::v3::{HeaderValue, HeaderValueOption};
use envoy_types::pb::envoy::r#type::v3::HttpStatus;
use envoy_types::pb::envoy::service::auth::v3::{
    check_response::HttpResponse, DeniedHttpResponse, OkHttpResponse,
};
use envoy_types::pb::google::protobuf::{value::Kind, ListValue, Struct, Value as ProtoValue};
use serde_json::Value;
use tonic::{Request, Response, Status};
use tracing::{debug, info, warn};

use warden_auth::{
    AugmentationEntry, ConfigStore, Decision, DenialResponse, DenyReason, Pipeline,
    RequestEnvelope, Wrapper,
};

/// The ext_authz gRPC server
pub struct AuthzServer {
    store: Arc<ConfigStore>,
    pipeline: Arc<Pipeline>,
    addr: SocketAddr,
}

impl AuthzServer {
    /// Create the server
    pub fn new(store: Arc<ConfigStore>, pipeline: Arc<Pipeline>, addr: SocketAddr) -> Self {
        Self {
            store,
            pipeline,
            addr,
        }
    }

    /// Serve until shutdown
    pub async fn run(self) -> std::result::Result<(), tonic::transport::Error> {
        let addr = self.addr;
        let service = AuthzService {
            store: self.store,
            pipeline: self.pipeline,
        };

        info!(?addr, "Starting ext_authz gRPC server");

        tonic::transport::Server::builder()
            .add_service(AuthorizationServer::new(service))
            .serve(addr)
            .await
    }
}

struct AuthzService {
    store: Arc<ConfigStore>,
    pipeline: Arc<Pipeline>,
}

#[tonic::async_trait]
impl Authorization for AuthzService {
    async fn check(
        &self,
        request: Request<CheckRequest>,
    ) -> std::result::Result<Response<CheckResponse>, Status> {
        let envelope = extract_envelope(request.into_inner());
        let host = envelope.host.clone();

        if host.is_empty() {
            warn!("Check request carries no host, passing through");
            return Ok(Response::new(pass_through_response()));
        }

        let Some(config) = self.store.get(&host) else {
            debug!(host = %host, "No config claims this host, passing through");
            return Ok(Response::new(pass_through_response()));
        };

        let decision = self.pipeline.evaluate(&config, envelope).await;
        Ok(Response::new(into_check_response(decision)))
    }
}

fn pass_through_response() -> CheckResponse {
    CheckResponse::with_status(Status::ok("no config matched the request host"))
}

fn into_check_response(decision: Decision) -> CheckResponse {
    match decision {
        Decision::NoMatch => pass_through_response(),
        Decision::Allowed { augmentation } => allowed_response(augmentation),
        Decision::Denied(denial) => denied_response(denial),
    }
}

fn allowed_response(augmentation: Vec<AugmentationEntry>) -> CheckResponse {
    let mut headers = Vec::new();
    let mut metadata = Struct::default();

    for entry in augmentation {
        match entry.wrapper {
            Wrapper::HttpHeader => headers.push(HeaderValueOption {
                header: Some(HeaderValue {
                    key: entry.key,
                    value: header_value(&entry.value),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            Wrapper::EnvoyDynamicMetadata => {
                metadata
                    .fields
                    .insert(entry.key, json_to_proto(&entry.value));
            }
        }
    }

    let mut response = CheckResponse::with_status(Status::ok("request authorized"));
    response.http_response = Some(HttpResponse::OkResponse(OkHttpResponse {
        headers,
        ..Default::default()
    }));
    if !metadata.fields.is_empty() {
        response.dynamic_metadata = Some(metadata);
    }
    response
}

fn denied_response(denial: DenialResponse) -> CheckResponse {
    let grpc_status = match denial.reason {
        DenyReason::Unauthenticated => Status::unauthenticated(denial.message.clone()),
        _ => Status::permission_denied(denial.message.clone()),
    };

    let headers = denial
        .headers
        .into_iter()
        .map(|(key, value)| HeaderValueOption {
            header: Some(HeaderValue {
                key,
                value,
                ..Default::default()
            }),
            ..Default::default()
        })
        .collect();

    let mut response = CheckResponse::with_status(grpc_status);
    response.http_response = Some(HttpResponse::DeniedResponse(DeniedHttpResponse {
        status: Some(HttpStatus {
            code: denial.code as i32,
        }),
        headers,
        body: denial.body,
    }));
    response
}

/// The string form a header injection carries
fn header_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Build the engine's request envelope from the check request
fn extract_envelope(request: CheckRequest) -> RequestEnvelope {
    let attributes = request.attributes.unwrap_or_default();

    let peer_subject = attributes
        .source
        .as_ref()
        .map(|peer| peer.principal.clone())
        .filter(|principal| !principal.is_empty());

    let http = attributes
        .request
        .as_ref()
        .and_then(|r| r.http.as_ref())
        .cloned()
        .unwrap_or_default();

    let mut headers: HashMap<String, Vec<String>> = HashMap::new();
    for (name, value) in http.headers {
        headers
            .entry(name.to_lowercase())
            .or_default()
            .push(value);
    }

    // The path attribute may still carry the query string
    let (path, path_query) = match http.path.split_once('?') {
        Some((path, query)) => (path.to_string(), query.to_string()),
        None => (http.path, String::new()),
    };
    let query = if http.query.is_empty() {
        path_query
    } else {
        http.query
    };

    let host = if http.host.is_empty() {
        headers
            .get(":authority")
            .or_else(|| headers.get("host"))
            .and_then(|values| values.first())
            .cloned()
            .unwrap_or_default()
    } else {
        http.host
    };

    RequestEnvelope {
        method: http.method,
        scheme: http.scheme,
        host,
        path,
        query,
        headers,
        peer_subject,
        attributes: Value::Null,
    }
}

fn json_to_proto(value: &Value) -> ProtoValue {
    let kind = match value {
        Value::Null => Kind::NullValue(0),
        Value::Bool(b) => Kind::BoolValue(*b),
        Value::Number(n) => Kind::NumberValue(n.as_f64().unwrap_or_default()),
        Value::String(s) => Kind::StringValue(s.clone()),
        Value::Array(items) => Kind::ListValue(ListValue {
            values: items.iter().map(json_to_proto).collect(),
        }),
        Value::Object(map) => {
            let mut fields = Struct::default();
            for (key, item) in map {
                fields.fields.insert(key.clone(), json_to_proto(item));
            }
            Kind::StructValue(fields)
        }
    };
    ProtoValue { kind: Some(kind) }
}
