//! Warden service shell
//!
//! Wires the authorization pipeline engine to its two external edges:
//! the Kubernetes control plane (an `AuthPolicy` reconciler feeding the
//! host-keyed config store) and the data plane (an Envoy ext_authz gRPC
//! endpoint consulting the store per request).

pub mod controller;
pub mod server;
pub mod settings;
pub mod translate;

pub use settings::Settings;
