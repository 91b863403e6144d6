//! tfc-secrets — library crate for the binary and integration tests.
//!
//! Issues Terraform Cloud / Enterprise API tokens from named roles,
//! tracks them as leases, and rotates the management token.

pub mod api;
pub mod backend;
pub mod cache;
pub mod config;
pub mod errors;
pub mod models;
pub mod rotation;
pub mod store;
pub mod tfc;

pub use backend::{Backend, Operation, Request, Response, Secret};
pub use errors::BackendError;
