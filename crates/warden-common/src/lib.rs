//! Shared foundation for the Warden external authorization service
//!
//! Warden sits behind an edge proxy as an Envoy `ext_authz` decision
//! endpoint: for every inbound request it decides whether the request is
//! authenticated and authorized, and optionally produces response
//! augmentation data (injected headers, signed tokens, denial payloads).
//!
//! This crate carries what the engine and the service shell share:
//! the error taxonomy, the `AuthPolicy` custom resource, the JSON
//! sublanguage (selectors, templates, pattern matching) that policies are
//! written in, and telemetry initialization.

pub mod crd;
pub mod error;
pub mod json;
pub mod telemetry;

pub use error::{Error, Result};

/// Secret data entry holding an API key credential
pub const API_KEY_SELECTOR: &str = "api_key";

/// Default HTTP status for an unauthenticated denial
pub const DEFAULT_UNAUTHENTICATED_CODE: u16 = 401;

/// Default HTTP status for an unauthorized denial
pub const DEFAULT_UNAUTHORIZED_CODE: u16 = 403;
