pub mod lifecycle;
pub mod statement_runner;
