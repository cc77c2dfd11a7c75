use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use crate::contract::{ExecutionTarget, StatementList};
use crate::diagnostics::DEFAULT_TEST_QUERY_SQL;
use crate::error::RunnerError;

pub const DB_ARN_VAR: &str = "DB_ARN";
pub const SECRET_ARN_VAR: &str = "SECRET_ARN";
pub const DATABASE_NAME_VAR: &str = "DATABASE_NAME";
pub const TEST_QUERY_SQL_VAR: &str = "TEST_QUERY_SQL";
pub const TIMEOUT_MARGIN_MS_VAR: &str = "RUNNER_TIMEOUT_MARGIN_MS";
pub const STATEMENT_VAR_PREFIX: &str = "STATEMENT_";
pub const DEFAULT_TIMEOUT_MARGIN_MS: u64 = 1_000;

/// Deploy-time configuration of the runner, read once per invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
    pub target: ExecutionTarget,
    pub statements: StatementList,
    pub test_query_sql: String,
    pub timeout_margin: Duration,
}

impl RunnerConfig {
    /// Builds the configuration from `(name, value)` pairs, normally
    /// `std::env::vars()`.
    ///
    /// Statements come from `STATEMENT_<n>` and are ordered by `n`, which must
    /// run contiguously from 0.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, RunnerError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut settings = HashMap::new();
        let mut indexed_statements = BTreeMap::new();

        for (key, value) in vars {
            let key = key.into();
            let value = value.into();
            if let Some(suffix) = key.strip_prefix(STATEMENT_VAR_PREFIX) {
                let index = parse_statement_index(&key, suffix)?;
                if indexed_statements.insert(index, value).is_some() {
                    return Err(RunnerError::configuration(format!(
                        "statement index {index} is defined more than once"
                    )));
                }
            } else {
                settings.insert(key, value);
            }
        }

        let target = ExecutionTarget {
            resource_arn: required_arn(&settings, DB_ARN_VAR)?,
            database_name: required(&settings, DATABASE_NAME_VAR)?,
            secret_arn: required_arn(&settings, SECRET_ARN_VAR)?,
        };

        let statements = ordered_statements(indexed_statements)?;

        let test_query_sql = settings
            .get(TEST_QUERY_SQL_VAR)
            .filter(|value| !value.trim().is_empty())
            .cloned()
            .unwrap_or_else(|| DEFAULT_TEST_QUERY_SQL.to_string());

        let timeout_margin_ms = match settings.get(TIMEOUT_MARGIN_MS_VAR) {
            Some(raw) => raw.trim().parse::<u64>().map_err(|error| {
                RunnerError::configuration(format!(
                    "{TIMEOUT_MARGIN_MS_VAR} must be a non-negative integer: {error}"
                ))
            })?,
            None => DEFAULT_TIMEOUT_MARGIN_MS,
        };

        Ok(Self {
            target,
            statements,
            test_query_sql,
            timeout_margin: Duration::from_millis(timeout_margin_ms),
        })
    }
}

fn parse_statement_index(key: &str, suffix: &str) -> Result<usize, RunnerError> {
    if suffix.is_empty() || !suffix.bytes().all(|byte| byte.is_ascii_digit()) {
        return Err(RunnerError::configuration(format!(
            "{key} must end in a decimal statement index"
        )));
    }

    suffix.parse::<usize>().map_err(|error| {
        RunnerError::configuration(format!("{key} has an unusable statement index: {error}"))
    })
}

fn ordered_statements(indexed: BTreeMap<usize, String>) -> Result<StatementList, RunnerError> {
    let mut statements = Vec::with_capacity(indexed.len());
    for (expected, (index, statement)) in indexed.into_iter().enumerate() {
        if index != expected {
            return Err(RunnerError::configuration(format!(
                "statement indices must be contiguous from 0; {STATEMENT_VAR_PREFIX}{expected} is missing"
            )));
        }
        statements.push(statement);
    }
    Ok(StatementList::new(statements))
}

fn required(settings: &HashMap<String, String>, name: &str) -> Result<String, RunnerError> {
    match settings.get(name) {
        Some(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => Err(RunnerError::configuration(format!(
            "{name} must be configured"
        ))),
    }
}

fn required_arn(settings: &HashMap<String, String>, name: &str) -> Result<String, RunnerError> {
    let value = required(settings, name)?;
    let parts: Vec<&str> = value.splitn(6, ':').collect();
    let well_formed = parts.len() == 6
        && parts[0] == "arn"
        && !parts[1].is_empty()
        && !parts[2].is_empty()
        && !parts[5].is_empty();
    if !well_formed {
        return Err(RunnerError::configuration(format!(
            "{name} is not a well-formed ARN: '{value}'"
        )));
    }
    Ok(value)
}
