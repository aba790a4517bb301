//! Phase runner
//!
//! Executes one phase's evaluators against the request context.
//! Evaluators are bucketed by priority and buckets run in ascending
//! order; inside a bucket all evaluators run concurrently. A bucket
//! only starts after the previous one resolved, so bucket `k` observes
//! every write from buckets `< k`: condition gating included, because
//! conditions are evaluated against the live document right before the
//! bucket starts.
//!
//! The runner is the sole writer of the authorization document:
//! - identity: the single winning value goes to `auth.identity`
//! - metadata: each success goes to `auth.metadata.<name>`
//! - authorization: each success goes to `auth.authorization.<name>`
//! - response: values are only collected for the augmentation object

use std::sync::Arc;

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use warden_common::json::all_match;
use warden_common::{Error, Result};

use crate::context::EvalContext;
use crate::evaluator::Evaluator;

/// The four pipeline phases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Credential verification; any evaluator succeeding wins
    Identity,
    /// Best-effort enrichment
    Metadata,
    /// Fail-closed policy checks
    Authorization,
    /// Response augmentation assembly
    Response,
}

impl Phase {
    /// Phase name for logging
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Identity => "identity",
            Phase::Metadata => "metadata",
            Phase::Authorization => "authorization",
            Phase::Response => "response",
        }
    }
}

/// Outcome of one phase run
#[derive(Debug, Default)]
pub struct PhaseReport {
    /// Name of the winning identity evaluator (identity phase only)
    pub winner: Option<String>,
    /// Successful results in completion order
    pub outputs: Vec<(String, Value)>,
    /// Failed evaluators and their errors
    pub failures: Vec<(String, Error)>,
    /// Number of evaluators that were not skipped
    pub ran: usize,
    /// The phase stopped before completing all buckets because the
    /// request was cancelled or its deadline elapsed; an empty failure
    /// list does not mean the phase passed
    pub cut_short: bool,
}

/// Run one phase to completion
pub async fn run_phase<E: Evaluator>(
    phase: Phase,
    evaluators: &[Arc<E>],
    ctx: &EvalContext,
) -> PhaseReport {
    let mut priorities: Vec<u32> = evaluators.iter().map(|e| e.priority()).collect();
    priorities.sort_unstable();
    priorities.dedup();

    let mut report = PhaseReport::default();

    'buckets: for priority in priorities {
        if ctx.is_cancelled() || ctx.deadline_exceeded() {
            report.cut_short = true;
            break;
        }

        // Conditions see all writes committed by earlier buckets
        let doc = ctx.snapshot();
        let bucket: Vec<&Arc<E>> = evaluators
            .iter()
            .filter(|e| e.priority() == priority)
            .filter(|e| {
                let admitted = all_match(e.conditions(), &doc);
                if !admitted {
                    debug!(
                        phase = phase.as_str(),
                        evaluator = e.name(),
                        "Evaluator skipped, conditions unmatched"
                    );
                }
                admitted
            })
            .collect();

        if bucket.is_empty() {
            continue;
        }
        report.ran += bucket.len();

        let bucket_token = ctx.cancellation().child_token();
        let mut tasks: FuturesUnordered<_> = bucket
            .into_iter()
            .map(|evaluator| {
                let token = bucket_token.clone();
                async move {
                    let outcome = call_evaluator(evaluator.as_ref(), ctx, &token).await;
                    (evaluator, outcome)
                }
            })
            .collect();

        while let Some((evaluator, outcome)) = tasks.next().await {
            let name = evaluator.name().to_string();
            match outcome {
                Ok(value) => match phase {
                    Phase::Identity => {
                        // First success wins; siblings are cancelled and
                        // their partial results discarded
                        bucket_token.cancel();
                        ctx.set("auth.identity", value);
                        debug!(evaluator = %name, "Identity resolved");
                        report.winner = Some(name);
                        break 'buckets;
                    }
                    Phase::Metadata => {
                        ctx.set(&format!("auth.metadata.{name}"), value.clone());
                        report.outputs.push((name, value));
                    }
                    Phase::Authorization => {
                        ctx.set(&format!("auth.authorization.{name}"), value.clone());
                        report.outputs.push((name, value));
                    }
                    Phase::Response => {
                        report.outputs.push((name, value));
                    }
                },
                Err(error) => match phase {
                    Phase::Identity => {
                        debug!(evaluator = %name, error = %error, "Identity evaluator failed");
                        report.failures.push((name, error));
                    }
                    Phase::Metadata => {
                        // Metadata is enrichment; failures never deny
                        warn!(evaluator = %name, error = %error, "Metadata evaluator failed");
                        report.failures.push((name, error));
                    }
                    Phase::Authorization | Phase::Response => {
                        // Fail-closed: stop the bucket and the phase
                        bucket_token.cancel();
                        report.failures.push((name, error));
                        break 'buckets;
                    }
                },
            }
        }
    }

    report
}

/// Run one evaluator with cache, cancellation and deadline handling
async fn call_evaluator<E: Evaluator + ?Sized>(
    evaluator: &E,
    ctx: &EvalContext,
    token: &CancellationToken,
) -> Result<Value> {
    let cache_key = evaluator
        .cache()
        .map(|cache| cache.render_key(&ctx.snapshot()));

    if let (Some(cache), Some(key)) = (evaluator.cache(), cache_key.as_ref()) {
        if let Some(hit) = cache.get(key) {
            debug!(evaluator = evaluator.name(), "Cached result reused");
            return Ok(hit);
        }
    }

    let result = tokio::select! {
        _ = token.cancelled() => Err(Error::Cancelled),
        _ = tokio::time::sleep_until(ctx.deadline()) => Err(Error::DeadlineExceeded),
        outcome = evaluator.call(ctx) => outcome,
    };

    if let (Ok(value), Some(cache), Some(key)) = (&result, evaluator.cache(), cache_key) {
        cache.insert(key, value.clone());
    }

    result
}
