//! Shared domain primitives for the RDS statement runner.
//!
//! This crate owns the custom-resource contract, environment configuration,
//! the error taxonomy and the per-invocation lifecycle state machine. It
//! intentionally excludes AWS SDK and Lambda runtime concerns, which live in
//! `statement_runner_lambda`.

pub mod config;
pub mod contract;
pub mod diagnostics;
pub mod error;
pub mod lifecycle;
