//! Per-host runtime configuration
//!
//! An [`ApiConfig`] is the compiled, immutable form of one AuthPolicy
//! for the hosts it claims. Construction happens in the translate layer;
//! after that the config is only shared behind `Arc` and never mutated.
//! When the host store drops the last binding of a config, `clean` stops
//! every background worker its evaluators own.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use warden_common::json::{PatternExpression, ValueOrSelector};
use warden_common::{Error, Result};

use crate::authorization::AuthorizationEvaluator;
use crate::evaluator::Evaluator;
use crate::identity::IdentityEvaluator;
use crate::metadata::MetadataEvaluator;
use crate::response::ResponseEvaluator;

/// Templated denial response
#[derive(Default, Debug)]
pub struct DenyTemplate {
    /// HTTP status code; the reason's default applies when unset
    pub code: Option<u16>,
    /// Status message
    pub message: Option<ValueOrSelector>,
    /// Response headers
    pub headers: Vec<(String, ValueOrSelector)>,
    /// Response body
    pub body: Option<ValueOrSelector>,
}

/// Immutable per-host evaluator bundle
#[derive(Default, Debug)]
pub struct ApiConfig {
    /// Top-level conditions; unmatched means the request is not subject
    /// to this config
    pub conditions: Vec<PatternExpression>,
    /// Identity phase evaluators
    pub identity: Vec<Arc<IdentityEvaluator>>,
    /// Metadata phase evaluators
    pub metadata: Vec<Arc<MetadataEvaluator>>,
    /// Authorization phase evaluators
    pub authorization: Vec<Arc<AuthorizationEvaluator>>,
    /// Response phase evaluators
    pub response: Vec<Arc<ResponseEvaluator>>,
    /// Denial template for failed authentication
    pub deny_unauthenticated: Option<DenyTemplate>,
    /// Denial template for failed authorization
    pub deny_unauthorized: Option<DenyTemplate>,
    /// Free-form labels (namespace and name of the origin object)
    pub labels: BTreeMap<String, String>,
}

impl ApiConfig {
    /// Check structural invariants
    ///
    /// Two evaluators of one phase must not share a name: within a
    /// bucket their writes would collide.
    pub fn validate(&self) -> Result<()> {
        check_unique("identity", &self.identity)?;
        check_unique("metadata", &self.metadata)?;
        check_unique("authorization", &self.authorization)?;
        check_unique("response", &self.response)?;
        Ok(())
    }

    /// Stop every background worker owned by the config's evaluators
    ///
    /// Idempotent and safe to call on a zero-referenced config.
    pub fn clean(&self) {
        for evaluator in &self.identity {
            evaluator.clean();
        }
        for evaluator in &self.metadata {
            evaluator.clean();
        }
        for evaluator in &self.authorization {
            evaluator.clean();
        }
        for evaluator in &self.response {
            evaluator.clean();
        }
    }
}

fn check_unique<E: Evaluator>(phase: &str, evaluators: &[Arc<E>]) -> Result<()> {
    let mut seen = HashSet::new();
    for evaluator in evaluators {
        if !seen.insert(evaluator.name()) {
            return Err(Error::configuration(format!(
                "duplicate {phase} evaluator name {:?}",
                evaluator.name()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::EvaluatorBase;
    use crate::identity::{AnonymousIdentity, IdentityKind};
    use crate::request::CredentialSource;

    fn anonymous(name: &str) -> Arc<IdentityEvaluator> {
        Arc::new(IdentityEvaluator::new(
            EvaluatorBase::named(name),
            CredentialSource::default(),
            IdentityKind::Anonymous(AnonymousIdentity),
        ))
    }

    #[test]
    fn test_empty_config_validates() {
        assert!(ApiConfig::default().validate().is_ok());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let config = ApiConfig {
            identity: vec![anonymous("same"), anonymous("same")],
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate identity evaluator"));
    }

    #[test]
    fn test_clean_is_idempotent() {
        let config = ApiConfig {
            identity: vec![anonymous("public")],
            ..Default::default()
        };
        config.clean();
        config.clean();
    }
}
