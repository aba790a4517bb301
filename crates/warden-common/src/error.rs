//! Error types for the Warden authorization service

use thiserror::Error;

/// Warden error types
///
/// The variants mirror the decision semantics of the pipeline: the first
/// two are terminal denial outcomes, `Evaluator` is a failure inside one
/// evaluator (aggregated per phase rules), and the rest are control-plane
/// or lifecycle conditions.
#[derive(Debug, Error)]
pub enum Error {
    /// No identity evaluator produced a usable identity
    #[error("unauthenticated: {message}")]
    Unauthenticated {
        /// Error message
        message: String,
    },

    /// An authorization evaluator denied the request
    #[error("unauthorized: {message}")]
    Unauthorized {
        /// Error message
        message: String,
    },

    /// Transport or verification failure inside an evaluator
    #[error("evaluator {evaluator} failed: {message}")]
    Evaluator {
        /// Name of the failing evaluator
        evaluator: String,
        /// Error message
        message: String,
    },

    /// Invalid declarative configuration (unknown kind, missing field,
    /// secret fetch failure)
    #[error("configuration error: {message}")]
    Configuration {
        /// Error message
        message: String,
    },

    /// Host already bound by a config in another namespace
    #[error("host {host} already taken by {owner}")]
    HostTaken {
        /// The contested host
        host: String,
        /// Owning config id, `namespace/name`
        owner: String,
    },

    /// The request was cancelled before the evaluator finished
    #[error("evaluation cancelled")]
    Cancelled,

    /// The request deadline elapsed
    #[error("evaluation deadline exceeded")]
    DeadlineExceeded,

    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),
}

impl Error {
    /// Create an unauthenticated error
    pub fn unauthenticated(msg: impl Into<String>) -> Self {
        Self::Unauthenticated {
            message: msg.into(),
        }
    }

    /// Create an unauthorized error
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: msg.into(),
        }
    }

    /// Create an evaluator failure
    pub fn evaluator(evaluator: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Evaluator {
            evaluator: evaluator.into(),
            message: msg.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    /// Create a host collision error
    pub fn host_taken(host: impl Into<String>, owner: impl Into<String>) -> Self {
        Self::HostTaken {
            host: host.into(),
            owner: owner.into(),
        }
    }

    /// Check if this error should surface as a denial (vs internal error)
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Error::Unauthenticated { .. } | Error::Unauthorized { .. } | Error::Evaluator { .. }
        )
    }

    /// Check if a reconciliation hitting this error should retry
    ///
    /// Configuration errors require a spec fix and host collisions are
    /// resolved by the other tenant, so neither is retried. Kubernetes
    /// errors retry unless they are 4xx.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube(source) => {
                !matches!(source, kube::Error::Api(ae) if (400..500).contains(&ae.code))
            }
            Error::Configuration { .. } | Error::HostTaken { .. } => false,
            Error::Unauthenticated { .. } | Error::Unauthorized { .. } => false,
            Error::Evaluator { .. } => true,
            Error::Cancelled | Error::DeadlineExceeded => true,
        }
    }
}

/// Result type for Warden operations
pub type Result<T> = std::result::Result<T, Error>;
