//! Pattern matching over the authorization document
//!
//! A pattern expression compares a selector's resolved value against a
//! literal (or templated) right-hand side. Rule lists are conjunctive and
//! an empty list matches vacuously. Missing context never grants access:
//! an unresolved selector fails positive operators and passes negative
//! ones.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

use super::selector::{resolve, value_to_string, Resolved};
use super::template;

/// Comparison operator of a pattern expression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum PatternOperator {
    /// String equality
    #[default]
    Eq,
    /// String inequality
    Neq,
    /// Array membership or substring inclusion
    Incl,
    /// Negated membership/inclusion
    Excl,
    /// Regex match over the resolved string form
    Matches,
}

/// A compiled `(selector, operator, value)` pattern expression
///
/// The regex of a `matches` expression is compiled at construction so
/// that invalid patterns surface as configuration errors at translate
/// time rather than per request.
#[derive(Debug, Clone)]
pub struct PatternExpression {
    selector: String,
    operator: PatternOperator,
    value: String,
    regex: Option<Regex>,
}

impl PatternExpression {
    /// Compile a pattern expression
    pub fn new(
        selector: impl Into<String>,
        operator: PatternOperator,
        value: impl Into<String>,
    ) -> Result<Self> {
        let selector = selector.into();
        let value = value.into();

        let regex = if operator == PatternOperator::Matches {
            Some(Regex::new(&value).map_err(|e| {
                Error::configuration(format!("invalid pattern regex {value:?}: {e}"))
            })?)
        } else {
            None
        };

        Ok(Self {
            selector,
            operator,
            value,
            regex,
        })
    }

    /// The left-hand selector
    pub fn selector(&self) -> &str {
        &self.selector
    }

    /// The comparison operator
    pub fn operator(&self) -> PatternOperator {
        self.operator
    }

    /// The right-hand value as written
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Evaluate against a document
    pub fn matches(&self, doc: &Value) -> bool {
        let left = resolve(doc, &self.selector);

        // Missing context must not grant access
        if left.is_unresolved() {
            return matches!(self.operator, PatternOperator::Neq | PatternOperator::Excl);
        }

        match self.operator {
            PatternOperator::Eq => self.left_string(left) == self.rendered_value(doc),
            PatternOperator::Neq => self.left_string(left) != self.rendered_value(doc),
            PatternOperator::Incl => self.includes(left, doc),
            PatternOperator::Excl => !self.includes(left, doc),
            PatternOperator::Matches => {
                let re = self.regex.as_ref().expect("compiled at construction");
                re.is_match(&self.left_string(left))
            }
        }
    }

    fn left_string(&self, left: Resolved) -> String {
        left.into_string()
    }

    /// The right-hand side may itself carry `{selector}` placeholders
    fn rendered_value(&self, doc: &Value) -> String {
        template::render(doc, &self.value)
    }

    fn includes(&self, left: Resolved, doc: &Value) -> bool {
        let needle = self.rendered_value(doc);
        match left.into_value() {
            Some(Value::Array(items)) => items.iter().any(|v| value_to_string(v) == needle),
            Some(other) => value_to_string(&other).contains(&needle),
            None => false,
        }
    }
}

/// Evaluate a conjunctive rule list; an empty list matches
pub fn all_match(rules: &[PatternExpression], doc: &Value) -> bool {
    rules.iter().all(|rule| rule.matches(doc))
}
