//! # ocmem-core
//!
//! Core types, errors, and primitives for the OpenClaw Memory service.
//! This crate defines the shared vocabulary used by every other crate in
//! the workspace.

pub mod error;
pub mod types;

pub use error::{MemoryError, Result};
pub use types::{MemoryKind, RejectReason, Scope, WriteOutcome};
