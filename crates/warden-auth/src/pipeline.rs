//! The authorization pipeline
//!
//! Orchestrates the four phases for one request and renders the
//! decision. Denials carry a fully rendered response: the AuthPolicy's
//! `denyWith` templates are resolved against the authorization document
//! at the moment of denial, with 401/403 and an empty body as defaults.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, error};

use warden_common::json::all_match;
use warden_common::{DEFAULT_UNAUTHENTICATED_CODE, DEFAULT_UNAUTHORIZED_CODE};

use crate::config::{ApiConfig, DenyTemplate};
use crate::context::EvalContext;
use crate::evaluator::Evaluator;
use crate::metrics::{AuthMetrics, Timer};
use crate::phase::{run_phase, Phase, PhaseReport};
use crate::request::RequestEnvelope;
use crate::response::Wrapper;

/// Default per-request evaluation timeout
pub const DEFAULT_EVALUATOR_TIMEOUT: Duration = Duration::from_secs(10);

/// Why a request was denied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// No identity evaluator succeeded
    Unauthenticated,
    /// An authorization evaluator denied the request
    Unauthorized,
    /// The response phase failed after the request was allowed
    Internal,
    /// The pipeline deadline elapsed
    Timeout,
}

impl DenyReason {
    /// Default HTTP status for this reason
    pub fn default_code(&self) -> u16 {
        match self {
            DenyReason::Unauthenticated => DEFAULT_UNAUTHENTICATED_CODE,
            DenyReason::Unauthorized => DEFAULT_UNAUTHORIZED_CODE,
            DenyReason::Internal => 500,
            DenyReason::Timeout => 504,
        }
    }

    /// Default status message for this reason
    pub fn default_message(&self) -> &'static str {
        match self {
            DenyReason::Unauthenticated => "not authenticated",
            DenyReason::Unauthorized => "not authorized",
            DenyReason::Internal => "internal error",
            DenyReason::Timeout => "request timed out",
        }
    }
}

/// A fully rendered denial response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenialResponse {
    /// Denial category
    pub reason: DenyReason,
    /// HTTP status code
    pub code: u16,
    /// Status message
    pub message: String,
    /// Response headers
    pub headers: Vec<(String, String)>,
    /// Response body
    pub body: String,
}

/// One response augmentation entry of an allowed decision
#[derive(Debug, Clone, PartialEq)]
pub struct AugmentationEntry {
    /// Delivery wrapper
    pub wrapper: Wrapper,
    /// Header name or metadata key
    pub key: String,
    /// Entry value
    pub value: Value,
}

/// The pipeline's verdict for one request
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Request allowed; augmentation entries for the transport to lift
    Allowed {
        /// Response augmentation entries
        augmentation: Vec<AugmentationEntry>,
    },
    /// Request denied with a pre-rendered response
    Denied(DenialResponse),
    /// No config claims this request; the caller passes it through
    NoMatch,
}

impl Decision {
    /// Whether the request was allowed
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }
}

/// The four-phase authorization pipeline
pub struct Pipeline {
    metrics: Arc<AuthMetrics>,
    timeout: Duration,
}

impl Pipeline {
    /// Create a pipeline with the default timeout
    pub fn new(metrics: Arc<AuthMetrics>) -> Self {
        Self {
            metrics,
            timeout: DEFAULT_EVALUATOR_TIMEOUT,
        }
    }

    /// Override the per-request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The pipeline's metrics
    pub fn metrics(&self) -> Arc<AuthMetrics> {
        self.metrics.clone()
    }

    /// Evaluate one request against a config
    pub async fn evaluate(&self, config: &ApiConfig, request: RequestEnvelope) -> Decision {
        let timer = Timer::start();
        let ctx = EvalContext::new(request, self.timeout);

        if !all_match(&config.conditions, &ctx.snapshot()) {
            debug!(
                request_id = ctx.request_id(),
                "Request not subject to this config"
            );
            self.metrics.record_no_match();
            return Decision::NoMatch;
        }

        // Identity: any-succeeds
        let identity = run_phase(Phase::Identity, &config.identity, &ctx).await;
        self.record_failures(&identity);
        if identity.winner.is_none() {
            if self.cut_short(&identity, &ctx) {
                return self.timeout_denied(&timer);
            }
            self.metrics.record_denied(timer.elapsed());
            return Decision::Denied(render_denial(
                DenyReason::Unauthenticated,
                config.deny_unauthenticated.as_ref(),
                &ctx.snapshot(),
            ));
        }

        // Metadata: best effort
        let metadata = run_phase(Phase::Metadata, &config.metadata, &ctx).await;
        self.record_failures(&metadata);

        // Authorization: all-must-succeed, fail-closed. A phase the
        // deadline cut short has NOT passed: its empty failure list only
        // means no evaluator got to run, so check for that before
        // reading the report
        let authorization = run_phase(Phase::Authorization, &config.authorization, &ctx).await;
        self.record_failures(&authorization);
        if self.cut_short(&authorization, &ctx) {
            return self.timeout_denied(&timer);
        }
        if !authorization.failures.is_empty() {
            self.metrics.record_denied(timer.elapsed());
            return Decision::Denied(render_denial(
                DenyReason::Unauthorized,
                config.deny_unauthorized.as_ref(),
                &ctx.snapshot(),
            ));
        }

        // Response: prior phases already allowed, so a failure here is
        // an internal error, not a policy denial
        let response = run_phase(Phase::Response, &config.response, &ctx).await;
        self.record_failures(&response);
        if self.cut_short(&response, &ctx) {
            return self.timeout_denied(&timer);
        }
        if let Some((name, failure)) = response.failures.first() {
            error!(
                request_id = ctx.request_id(),
                evaluator = %name,
                error = %failure,
                "Response phase failed after the request was allowed"
            );
            self.metrics.record_error();
            return Decision::Denied(DenialResponse {
                reason: DenyReason::Internal,
                code: DenyReason::Internal.default_code(),
                message: DenyReason::Internal.default_message().to_string(),
                headers: Vec::new(),
                body: String::new(),
            });
        }

        let augmentation = assemble_augmentation(config, response);
        self.metrics.record_allowed(timer.elapsed());
        Decision::Allowed { augmentation }
    }

    fn record_failures(&self, report: &PhaseReport) {
        for (name, _) in &report.failures {
            self.metrics.record_evaluator_failure(name);
        }
    }

    /// Whether a phase stopped early, or the request expired right
    /// after it
    fn cut_short(&self, report: &PhaseReport, ctx: &EvalContext) -> bool {
        report.cut_short || ctx.deadline_exceeded() || ctx.is_cancelled()
    }

    /// The 504-equivalent denial for a pipeline that timed out
    fn timeout_denied(&self, timer: &Timer) -> Decision {
        self.metrics.record_denied(timer.elapsed());
        Decision::Denied(DenialResponse {
            reason: DenyReason::Timeout,
            code: DenyReason::Timeout.default_code(),
            message: DenyReason::Timeout.default_message().to_string(),
            headers: Vec::new(),
            body: String::new(),
        })
    }
}

/// Pair each response output with its evaluator's wrapper settings
fn assemble_augmentation(config: &ApiConfig, report: PhaseReport) -> Vec<AugmentationEntry> {
    report
        .outputs
        .into_iter()
        .filter_map(|(name, value)| {
            let evaluator = config.response.iter().find(|e| e.name() == name)?;
            Some(AugmentationEntry {
                wrapper: evaluator.wrapper,
                key: evaluator.key().to_string(),
                value,
            })
        })
        .collect()
}

/// Render a denial from its template and the document at denial time
fn render_denial(
    reason: DenyReason,
    template: Option<&DenyTemplate>,
    doc: &Value,
) -> DenialResponse {
    let code = template
        .and_then(|t| t.code)
        .unwrap_or_else(|| reason.default_code());
    let message = template
        .and_then(|t| t.message.as_ref())
        .map(|m| m.resolve_string(doc))
        .unwrap_or_else(|| reason.default_message().to_string());
    let headers = template
        .map(|t| {
            t.headers
                .iter()
                .map(|(name, value)| (name.clone(), value.resolve_string(doc)))
                .collect()
        })
        .unwrap_or_default();
    let body = template
        .and_then(|t| t.body.as_ref())
        .map(|b| b.resolve_string(doc))
        .unwrap_or_default();

    DenialResponse {
        reason,
        code,
        message,
        headers,
        body,
    }
}
