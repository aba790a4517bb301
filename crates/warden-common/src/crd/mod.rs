//! Custom resource definitions for Warden
//!
//! A single CRD, [`AuthPolicy`], declares the full authorization scheme
//! for a set of hosts: the four evaluation phases, named pattern
//! definitions, top-level conditions and denial templates.

mod auth_policy;

pub use auth_policy::*;
