//! Authorization pipeline engine
//!
//! The engine turns an immutable per-host [`ApiConfig`] and an inbound
//! [`RequestEnvelope`] into a [`Decision`]. Evaluation runs in four
//! phases (identity, metadata, authorization, response); each phase
//! executes its evaluators in ascending priority buckets, concurrently
//! within a bucket, and aggregates results per the phase's rule:
//!
//! - **identity**: any evaluator succeeding wins; the single winning
//!   identity is written to `auth.identity`
//! - **metadata**: best effort enrichment of `auth.metadata`
//! - **authorization**: every evaluator must succeed, fail-closed
//! - **response**: produces the response augmentation entries
//!
//! All per-request state lives in the [`EvalContext`]'s authorization
//! document; the phase runner is its only writer. The [`ConfigStore`]
//! maps request hosts to configs and coordinates lifecycle cleanup of
//! evaluator-owned background workers on hot swap.

pub mod authorization;
pub mod config;
pub mod context;
pub mod evaluator;
pub mod identity;
pub mod metadata;
pub mod metrics;
pub mod phase;
pub mod pipeline;
pub mod request;
pub mod response;
pub mod store;
pub mod worker;

pub use config::{ApiConfig, DenyTemplate};
pub use context::EvalContext;
pub use evaluator::{CallCache, Evaluator, EvaluatorBase};
pub use metrics::{AuthMetrics, Timer};
pub use pipeline::{AugmentationEntry, Decision, DenialResponse, DenyReason, Pipeline};
pub use request::{CredentialLocation, CredentialSource, RequestEnvelope};
pub use response::Wrapper;
pub use store::{ConfigId, ConfigStore};
pub use worker::Worker;
