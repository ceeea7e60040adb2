//! Kaiku Authorization Engine
//!
//! Resolves effective channel permissions from roles and channel overrides, caches them
//! in a shared store, and invalidates the cache after permission-affecting changes.

pub mod config;
pub mod db;
pub mod error;
pub mod permissions;
pub mod service;

pub use error::{AuthzError, ErrorKind};
pub use service::Authz;
