//! The JSON sublanguage of authorization policies
//!
//! Policies address the per-request authorization document through three
//! small constructs:
//!
//! - **Selectors**: dotted paths with bracket indices and modifier
//!   suffixes (`auth.identity.email@case=lower`), see [`selector`].
//! - **Templates**: strings interleaving literal text with `{selector}`
//!   placeholders, see [`template`].
//! - **Pattern expressions**: `(selector, operator, value)` triples used
//!   for conditional gating and pattern-matching authorization, see
//!   [`pattern`].

pub mod pattern;
pub mod selector;
pub mod template;

pub use pattern::{all_match, PatternExpression, PatternOperator};
pub use selector::{resolve, set, value_to_string, Resolved, ValueOrSelector};
pub use template::Template;
