//! AWS-oriented adapters and handlers for the RDS statement runner.
//!
//! This crate owns runtime integration details (the custom resource binding,
//! the statement runner, and the Data API / Secrets Manager adapter seams).
//! Domain contracts and configuration parsing live in `statement_runner_core`.

pub mod adapters;
pub mod handlers;
