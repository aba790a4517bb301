//! OPA (Rego) authorization
//!
//! Policies run in the embedded regorus engine against the full
//! authorization document as `input`. The policy text either comes
//! inline from the AuthPolicy or is pulled from an external registry,
//! optionally re-pulled on a TTL by a background worker.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::{json, Value};
use tracing::{info, warn};

use warden_common::{Error, Result};

use crate::context::EvalContext;
use crate::worker::Worker;

const DEFAULT_PACKAGE: &str = "policy";

/// External registry serving the Rego policy text
#[derive(Debug, Clone)]
pub struct OpaExternalSource {
    /// Registry endpoint
    pub endpoint: String,
    /// Bearer secret sent with the pull request
    pub shared_secret: Option<String>,
    /// Re-pull interval; no re-pull when unset
    pub ttl: Option<Duration>,
}

#[derive(Debug, Clone)]
struct PreparedPolicy {
    engine: regorus::Engine,
    package: String,
}

/// OPA authorization evaluator kind
#[derive(Debug)]
pub struct OpaAuthorization {
    policy_name: String,
    all_values: bool,
    policy: Arc<RwLock<PreparedPolicy>>,
    repuller: Option<Worker>,
}

impl OpaAuthorization {
    /// Create the evaluator from inline Rego
    pub fn new_inline(
        policy_name: impl Into<String>,
        rego: &str,
        all_values: bool,
    ) -> Result<Self> {
        let policy_name = policy_name.into();
        let prepared = prepare(&policy_name, rego)?;
        Ok(Self {
            policy_name,
            all_values,
            policy: Arc::new(RwLock::new(prepared)),
            repuller: None,
        })
    }

    /// Create the evaluator from an external registry
    ///
    /// The first pull happens here and must succeed; later pulls are
    /// best-effort, keeping the last good policy on failure.
    pub async fn from_registry(
        policy_name: impl Into<String>,
        source: OpaExternalSource,
        all_values: bool,
        http: reqwest::Client,
    ) -> Result<Self> {
        let policy_name = policy_name.into();

        let rego = pull_policy(&http, &source).await?;
        let policy = Arc::new(RwLock::new(prepare(&policy_name, &rego)?));

        let repuller = source.ttl.map(|interval| {
            let policy = policy.clone();
            let policy_name = policy_name.clone();
            let source = source.clone();
            let http = http.clone();
            Worker::spawn("opa-registry-pull", interval, move || {
                let policy = policy.clone();
                let policy_name = policy_name.clone();
                let source = source.clone();
                let http = http.clone();
                async move {
                    match pull_policy(&http, &source).await {
                        Ok(rego) => match prepare(&policy_name, &rego) {
                            Ok(prepared) => {
                                *policy.write() = prepared;
                                info!(policy = %policy_name, "Rego policy re-pulled");
                            }
                            Err(e) => {
                                warn!(policy = %policy_name, error = %e, "Pulled Rego policy does not compile, keeping the previous one")
                            }
                        },
                        Err(e) => {
                            warn!(policy = %policy_name, error = %e, "Rego policy re-pull failed")
                        }
                    }
                }
            })
        });

        Ok(Self {
            policy_name,
            all_values,
            policy,
            repuller,
        })
    }

    /// Evaluate the policy against the authorization document
    pub fn evaluate(&self, ctx: &EvalContext) -> Result<Value> {
        let doc = ctx.snapshot();
        let prepared = self.policy.read().clone();

        let mut engine = prepared.engine;
        let input = regorus::Value::from_json_str(&doc.to_string())
            .map_err(|e| Error::evaluator("opa", format!("input conversion failed: {e}")))?;
        engine.set_input(input);

        if self.all_values {
            let bindings = engine
                .eval_rule(format!("data.{}", prepared.package))
                .map_err(|e| Error::evaluator("opa", format!("policy evaluation failed: {e}")))?;
            let bindings: Value = serde_json::from_str(
                &bindings
                    .to_json_str()
                    .map_err(|e| Error::evaluator("opa", e.to_string()))?,
            )
            .map_err(|e| Error::evaluator("opa", e.to_string()))?;

            if bindings.get("allow").and_then(Value::as_bool) == Some(true) {
                Ok(bindings)
            } else {
                Err(Error::unauthorized(format!(
                    "denied by the {} policy",
                    self.policy_name
                )))
            }
        } else if engine.eval_allow_query(format!("data.{}.allow", prepared.package), false) {
            Ok(json!(true))
        } else {
            Err(Error::unauthorized(format!(
                "denied by the {} policy",
                self.policy_name
            )))
        }
    }

    /// Stop the registry re-pull worker
    pub fn stop_repull(&self) {
        if let Some(worker) = &self.repuller {
            worker.stop();
        }
    }

    /// Whether the registry re-pull worker is still running
    pub fn repull_active(&self) -> bool {
        self.repuller
            .as_ref()
            .map(|w| !w.is_stopped())
            .unwrap_or(false)
    }
}

/// Compile the policy, defaulting the package when the text has none
fn prepare(policy_name: &str, rego: &str) -> Result<PreparedPolicy> {
    let (text, package) = match parse_package(rego) {
        Some(package) => (rego.to_string(), package),
        None => (
            format!("package {DEFAULT_PACKAGE}\n\n{rego}"),
            DEFAULT_PACKAGE.to_string(),
        ),
    };

    let mut engine = regorus::Engine::new();
    engine
        .add_policy(format!("{policy_name}.rego"), text)
        .map_err(|e| {
            Error::configuration(format!("invalid Rego policy {policy_name}: {e}"))
        })?;

    Ok(PreparedPolicy { engine, package })
}

fn parse_package(rego: &str) -> Option<String> {
    rego.lines().find_map(|line| {
        line.trim()
            .strip_prefix("package ")
            .map(|rest| rest.trim().to_string())
    })
}

async fn pull_policy(http: &reqwest::Client, source: &OpaExternalSource) -> Result<String> {
    let mut request = http.get(&source.endpoint);
    if let Some(secret) = &source.shared_secret {
        request = request.bearer_auth(secret);
    }

    let response = request
        .send()
        .await
        .map_err(|e| Error::evaluator("opa", format!("registry pull failed: {e}")))?;

    if !response.status().is_success() {
        return Err(Error::evaluator(
            "opa",
            format!("registry returned HTTP {}", response.status()),
        ));
    }

    response
        .text()
        .await
        .map_err(|e| Error::evaluator("opa", format!("registry response unreadable: {e}")))
}
