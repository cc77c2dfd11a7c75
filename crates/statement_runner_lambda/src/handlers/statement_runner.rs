use std::time::Instant;

use statement_runner_core::contract::{LifecycleEvent, StatementOutcome};
use statement_runner_core::diagnostics::sql_preview;
use statement_runner_core::error::RunnerError;
use statement_runner_core::lifecycle::{duration_millis, ExecutionReport};
use tracing::{error, info};

use crate::adapters::credentials::CredentialStore;
use crate::adapters::data_api::DataApi;

const COMPONENT: &str = "statement_runner";

pub type ExecutionResult = Result<ExecutionReport, RunnerError>;

/// Applies a lifecycle event's statements, one Data API call per statement.
///
/// Execution is strictly sequential and stops at the first failing statement.
/// Nothing is retried and nothing is rolled back: a failure at index `i`
/// leaves statements `0..i` applied. Delete events never reach the database.
pub struct StatementRunner<'a, D: DataApi, C: CredentialStore> {
    data_api: &'a D,
    credentials: &'a C,
}

impl<'a, D: DataApi, C: CredentialStore> StatementRunner<'a, D, C> {
    pub fn new(data_api: &'a D, credentials: &'a C) -> Self {
        Self {
            data_api,
            credentials,
        }
    }

    pub fn handle(&self, event: &LifecycleEvent) -> ExecutionResult {
        let started_at = Instant::now();
        let mut report = ExecutionReport::new(event.request_type);
        info!(
            component = COMPONENT,
            event = "invocation_started",
            request_type = event.request_type.as_str(),
            database = %event.target.database_name,
            planned_statements = event.statements.len(),
        );

        if !event.request_type.applies_statements() {
            report.begin()?;
            report.succeed()?;
            info!(
                component = COMPONENT,
                event = "delete_skipped",
                request_type = event.request_type.as_str(),
            );
            return Ok(report);
        }

        if !event.statements.is_empty() {
            if let Err(message) = self.credentials.resolve(&event.target.secret_arn) {
                report.fail()?;
                let failure = RunnerError::configuration(format!(
                    "failed to resolve credential '{}': {message}",
                    event.target.secret_arn
                ));
                log_failure(&failure, &report, started_at);
                return Err(failure);
            }
        }

        report.begin()?;
        for (index, sql) in event.statements.iter().enumerate() {
            info!(
                component = COMPONENT,
                event = "statement_started",
                index,
                sql = %sql_preview(sql),
            );

            match self.data_api.execute_statement(&event.target, sql) {
                Ok(response) => {
                    info!(
                        component = COMPONENT,
                        event = "statement_completed",
                        index,
                        records_updated = response.records_updated,
                        rows_returned = response.rows_returned,
                    );
                    report.record(StatementOutcome {
                        index,
                        records_updated: response.records_updated,
                        rows_returned: response.rows_returned,
                    });
                }
                Err(message) => {
                    report.fail()?;
                    let failure = RunnerError::StatementExecution { index, message };
                    log_failure(&failure, &report, started_at);
                    return Err(failure);
                }
            }
        }

        report.succeed()?;
        info!(
            component = COMPONENT,
            event = "invocation_completed",
            request_type = event.request_type.as_str(),
            statements_executed = report.statements_executed(),
            duration_ms = duration_millis(started_at.elapsed()),
        );
        Ok(report)
    }
}

fn log_failure(failure: &RunnerError, report: &ExecutionReport, started_at: Instant) {
    error!(
        component = COMPONENT,
        event = "invocation_failed",
        error_kind = failure.kind(),
        statement_index = failure.statement_index(),
        statements_applied = report.statements_executed(),
        duration_ms = duration_millis(started_at.elapsed()),
        error = %failure,
    );
}
