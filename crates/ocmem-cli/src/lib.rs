//! # ocmem-cli
//!
//! Command-line interface for the OpenClaw Memory service.
//!
//! ## Commands
//!
//! - `ocmem serve` — start the memory service (stdio or SSE transport)
//! - `ocmem init` — scaffold global and project memory directories
//! - `ocmem index` — one-shot index of both scopes
//! - `ocmem stats` — per-scope index statistics

pub mod commands;

pub use commands::Cli;
