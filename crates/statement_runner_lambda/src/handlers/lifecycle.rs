use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::Value;
use statement_runner_core::config::{
    RunnerConfig, DATABASE_NAME_VAR, DB_ARN_VAR, SECRET_ARN_VAR, TEST_QUERY_SQL_VAR,
};
use statement_runner_core::contract::{
    physical_resource_id, CustomResourceRequest, CustomResourceResponse, ExecutionTarget,
    LifecycleEvent, RequestType, ResponseData, PHYSICAL_RESOURCE_ID_PREFIX,
};
use statement_runner_core::diagnostics::{test_query_command, DEFAULT_TEST_QUERY_SQL};
use statement_runner_core::error::RunnerError;
use statement_runner_core::lifecycle::duration_millis;
use tracing::{error, info};

use crate::adapters::credentials::CredentialStore;
use crate::adapters::data_api::DataApi;
use crate::handlers::statement_runner::StatementRunner;

const COMPONENT: &str = "lifecycle_binding";
const UNSET_PLACEHOLDER: &str = "<unset>";

/// Create or Update request whose configuration has been loaded and checked.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRequest {
    pub request: CustomResourceRequest,
    pub request_type: RequestType,
    pub config: RunnerConfig,
    pub test_query: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Invocation {
    /// Nothing to apply; the response can go straight back.
    Completed(CustomResourceResponse),
    Apply(PendingRequest),
}

pub fn parse_request(payload: Value) -> Result<CustomResourceRequest, RunnerError> {
    serde_json::from_value(payload).map_err(|error| {
        RunnerError::configuration(format!("malformed custom resource request: {error}"))
    })
}

/// Reads the request type before anything else so that Delete succeeds no
/// matter what state the environment is in. A Create that failed on bad
/// configuration is rolled back with a Delete, and that Delete must not fail
/// for the same reason.
///
/// Only Create and Update load `RunnerConfig` from `vars`.
pub fn prepare_invocation<I, K, V>(payload: Value, vars: I) -> Result<Invocation, RunnerError>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    let request = parse_request(payload)?;
    let request_type = request.parsed_request_type()?;
    info!(
        component = COMPONENT,
        event = "request_received",
        request_type = request_type.as_str(),
        request_id = request.request_id.as_deref().unwrap_or(""),
        logical_resource_id = request.logical_resource_id.as_deref().unwrap_or(""),
    );

    let vars: Vec<(String, String)> = vars
        .into_iter()
        .map(|(key, value)| (key.into(), value.into()))
        .collect();
    // Rendered from the raw variables so it is available even when they fail validation.
    let raw_test_query = raw_test_query_command(&vars);
    info!(component = COMPONENT, event = "test_query", command = %raw_test_query);

    if !request_type.applies_statements() {
        let response = CustomResourceResponse {
            physical_resource_id: delete_physical_resource_id(&request),
            data: ResponseData {
                statements_executed: 0,
                test_query: raw_test_query,
            },
        };
        info!(
            component = COMPONENT,
            event = "delete_acknowledged",
            physical_resource_id = %response.physical_resource_id,
        );
        return Ok(Invocation::Completed(response));
    }

    let config = RunnerConfig::from_vars(vars)?;
    let test_query = test_query_command(&config.target, &config.test_query_sql);
    Ok(Invocation::Apply(PendingRequest {
        request,
        request_type,
        config,
        test_query,
    }))
}

/// Runs a prepared Create or Update through the statement runner.
///
/// An `Err` fails the resource, which fails the deployment and stops
/// dependent resources from being created.
pub fn apply_request<D: DataApi, C: CredentialStore>(
    pending: &PendingRequest,
    runner: &StatementRunner<'_, D, C>,
) -> Result<CustomResourceResponse, RunnerError> {
    let event = LifecycleEvent {
        request_type: pending.request_type,
        target: pending.config.target.clone(),
        statements: pending.config.statements.clone(),
    };

    let report = runner.handle(&event)?;

    let response = CustomResourceResponse {
        physical_resource_id: physical_resource_id(
            pending.request_type,
            pending.request.physical_resource_id.as_deref(),
            &event.target,
            &event.statements,
        )?,
        data: ResponseData {
            statements_executed: report.statements_executed(),
            test_query: pending.test_query.clone(),
        },
    };
    info!(
        component = COMPONENT,
        event = "request_completed",
        request_type = pending.request_type.as_str(),
        physical_resource_id = %response.physical_resource_id,
    );
    Ok(response)
}

/// Prepare and apply in one synchronous call.
pub fn handle_custom_resource_event<I, K, V, D, C>(
    payload: Value,
    vars: I,
    runner: &StatementRunner<'_, D, C>,
) -> Result<CustomResourceResponse, RunnerError>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
    D: DataApi,
    C: CredentialStore,
{
    match prepare_invocation(payload, vars)? {
        Invocation::Completed(response) => Ok(response),
        Invocation::Apply(pending) => apply_request(&pending, runner),
    }
}

/// Delete echoes the id CloudFormation knows, falling back to the request id.
fn delete_physical_resource_id(request: &CustomResourceRequest) -> String {
    [&request.physical_resource_id, &request.request_id]
        .into_iter()
        .flatten()
        .find(|id| !id.trim().is_empty())
        .cloned()
        .unwrap_or_else(|| PHYSICAL_RESOURCE_ID_PREFIX.to_string())
}

fn raw_test_query_command(vars: &[(String, String)]) -> String {
    let lookup = |name: &str| {
        vars.iter()
            .find(|(key, value)| key == name && !value.trim().is_empty())
            .map(|(_, value)| value.trim().to_string())
    };
    let target = ExecutionTarget {
        resource_arn: lookup(DB_ARN_VAR).unwrap_or_else(|| UNSET_PLACEHOLDER.to_string()),
        database_name: lookup(DATABASE_NAME_VAR)
            .unwrap_or_else(|| UNSET_PLACEHOLDER.to_string()),
        secret_arn: lookup(SECRET_ARN_VAR).unwrap_or_else(|| UNSET_PLACEHOLDER.to_string()),
    };
    let sql = vars
        .iter()
        .find(|(key, value)| key == TEST_QUERY_SQL_VAR && !value.trim().is_empty())
        .map(|(_, value)| value.as_str())
        .unwrap_or(DEFAULT_TEST_QUERY_SQL);
    test_query_command(&target, sql)
}

/// Time left for the handler: the invocation deadline minus a safety margin,
/// so a timeout is reported by us rather than by the runtime killing the
/// process.
pub fn invocation_budget(deadline_epoch_ms: u64, now_epoch_ms: u64, margin: Duration) -> Duration {
    let remaining = Duration::from_millis(deadline_epoch_ms.saturating_sub(now_epoch_ms));
    remaining.saturating_sub(margin)
}

pub fn epoch_millis(now: SystemTime) -> Result<u64, RunnerError> {
    now.duration_since(UNIX_EPOCH)
        .map(duration_millis)
        .map_err(|error| RunnerError::Crashed(format!("failed to read clock: {error}")))
}

/// Runs a blocking handler on the blocking pool and bounds it by `budget`.
///
/// On timeout the handler thread is abandoned, not cancelled; whatever it
/// already applied stays applied.
pub async fn run_with_budget<F>(
    budget: Duration,
    job: F,
) -> Result<CustomResourceResponse, RunnerError>
where
    F: FnOnce() -> Result<CustomResourceResponse, RunnerError> + Send + 'static,
{
    match tokio::time::timeout(budget, tokio::task::spawn_blocking(job)).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) => Err(RunnerError::Crashed(join_error.to_string())),
        Err(_) => Err(RunnerError::Timeout {
            budget_ms: budget.as_millis(),
        }),
    }
}

/// Logs a failed request and converts it for the Lambda runtime, which
/// reports it to the provider framework as a FAILED resource.
pub fn into_lambda_error(failure: RunnerError) -> lambda_runtime::Error {
    error!(
        component = COMPONENT,
        event = "request_failed",
        error_kind = failure.kind(),
        statement_index = failure.statement_index(),
        error = %failure,
    );
    lambda_runtime::Error::from(failure.to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;
    use crate::adapters::credentials::ResolvedCredential;
    use crate::adapters::data_api::DataApiResponse;

    struct CapturingDataApi {
        statements: Mutex<Vec<String>>,
    }

    impl CapturingDataApi {
        fn new() -> Self {
            Self {
                statements: Mutex::new(Vec::new()),
            }
        }

        fn statements(&self) -> Vec<String> {
            self.statements.lock().expect("poisoned mutex").clone()
        }
    }

    impl DataApi for CapturingDataApi {
        fn execute_statement(
            &self,
            _target: &ExecutionTarget,
            sql: &str,
        ) -> Result<DataApiResponse, String> {
            self.statements
                .lock()
                .expect("poisoned mutex")
                .push(sql.to_string());
            Ok(DataApiResponse::default())
        }
    }

    struct CountingCredentials {
        resolutions: Mutex<usize>,
    }

    impl CountingCredentials {
        fn new() -> Self {
            Self {
                resolutions: Mutex::new(0),
            }
        }

        fn resolutions(&self) -> usize {
            *self.resolutions.lock().expect("poisoned mutex")
        }
    }

    impl CredentialStore for CountingCredentials {
        fn resolve(&self, _secret_arn: &str) -> Result<ResolvedCredential, String> {
            *self.resolutions.lock().expect("poisoned mutex") += 1;
            Ok(ResolvedCredential {
                username: "admin".to_string(),
                password: "password".to_string(),
            })
        }
    }

    fn sample_vars() -> Vec<(&'static str, &'static str)> {
        vec![
            (
                "DB_ARN",
                "arn:aws:rds:us-east-1:123456789012:cluster:aurora-cluster",
            ),
            (
                "SECRET_ARN",
                "arn:aws:secretsmanager:us-east-1:123456789012:secret:aurora-creds",
            ),
            ("DATABASE_NAME", "sample_db"),
            ("STATEMENT_0", "CREATE TABLE Events (id INT)"),
            ("STATEMENT_1", "INSERT INTO Events (id) VALUES (1)"),
        ]
    }

    /// What a half-edited deployment leaves behind: a gap in the indices.
    fn broken_vars() -> Vec<(&'static str, &'static str)> {
        vec![
            ("DB_ARN", "not-an-arn"),
            ("STATEMENT_0", "CREATE TABLE Events (id INT)"),
            ("STATEMENT_2", "INSERT INTO Events (id) VALUES (1)"),
            ("RUNNER_TIMEOUT_MARGIN_MS", "soon"),
        ]
    }

    #[test]
    fn create_returns_physical_id_and_test_query() {
        let data_api = CapturingDataApi::new();
        let credentials = CountingCredentials::new();
        let runner = StatementRunner::new(&data_api, &credentials);

        let response = handle_custom_resource_event(
            json!({"RequestType": "Create", "RequestId": "req-1"}),
            sample_vars(),
            &runner,
        )
        .expect("create should succeed");

        assert!(response
            .physical_resource_id
            .starts_with("rds-statement-runner-"));
        assert_eq!(response.data.statements_executed, 2);
        assert!(response
            .data
            .test_query
            .contains("--sql \"select * from Events\""));
        assert_eq!(data_api.statements().len(), 2);
    }

    #[test]
    fn delete_echoes_physical_id_without_statements() {
        let data_api = CapturingDataApi::new();
        let credentials = CountingCredentials::new();
        let runner = StatementRunner::new(&data_api, &credentials);

        let response = handle_custom_resource_event(
            json!({
                "RequestType": "Delete",
                "PhysicalResourceId": "rds-statement-runner-0011223344556677"
            }),
            sample_vars(),
            &runner,
        )
        .expect("delete should succeed");

        assert_eq!(
            response.physical_resource_id,
            "rds-statement-runner-0011223344556677"
        );
        assert_eq!(response.data.statements_executed, 0);
        assert!(data_api.statements().is_empty());
    }

    #[test]
    fn delete_succeeds_with_empty_or_broken_environment() {
        let empty: Vec<(&str, &str)> = Vec::new();
        for vars in [empty, broken_vars()] {
            let data_api = CapturingDataApi::new();
            let credentials = CountingCredentials::new();
            let runner = StatementRunner::new(&data_api, &credentials);

            let response = handle_custom_resource_event(
                json!({
                    "RequestType": "Delete",
                    "PhysicalResourceId": "rds-statement-runner-rollback"
                }),
                vars,
                &runner,
            )
            .expect("delete must succeed regardless of configuration");

            assert_eq!(response.physical_resource_id, "rds-statement-runner-rollback");
            assert!(data_api.statements().is_empty());
            assert_eq!(credentials.resolutions(), 0);
        }
    }

    #[test]
    fn delete_falls_back_to_request_id_then_prefix() {
        let empty: Vec<(&str, &str)> = Vec::new();

        let with_request_id = prepare_invocation(
            json!({"RequestType": "Delete", "RequestId": "req-42", "PhysicalResourceId": " "}),
            empty.clone(),
        )
        .expect("delete should succeed");
        let bare = prepare_invocation(json!({"RequestType": "Delete"}), empty)
            .expect("delete should succeed");

        match (with_request_id, bare) {
            (Invocation::Completed(first), Invocation::Completed(second)) => {
                assert_eq!(first.physical_resource_id, "req-42");
                assert_eq!(second.physical_resource_id, PHYSICAL_RESOURCE_ID_PREFIX);
            }
            other => panic!("delete should complete without applying, got {other:?}"),
        }
    }

    #[test]
    fn create_and_update_with_broken_environment_fail_before_any_call() {
        for request_type in ["Create", "Update"] {
            let data_api = CapturingDataApi::new();
            let credentials = CountingCredentials::new();
            let runner = StatementRunner::new(&data_api, &credentials);

            let error = handle_custom_resource_event(
                json!({"RequestType": request_type}),
                broken_vars(),
                &runner,
            )
            .expect_err("broken configuration should fail");

            assert_eq!(error.kind(), "ConfigurationError");
            assert!(data_api.statements().is_empty());
            assert_eq!(credentials.resolutions(), 0);
        }
    }

    #[test]
    fn test_query_renders_from_raw_variables() {
        let query = raw_test_query_command(&[
            ("DB_ARN".to_string(), "arn:aws:rds:us-east-1:1:cluster:c".to_string()),
            ("STATEMENT_5".to_string(), "SELECT 5".to_string()),
        ]);

        assert!(query.contains("--resource-arn \"arn:aws:rds:us-east-1:1:cluster:c\""));
        assert!(query.contains("--database \"<unset>\""));
        assert!(query.contains("--secret-arn \"<unset>\""));
        assert!(query.ends_with("--sql \"select * from Events\""));
    }

    #[test]
    fn prepared_create_carries_config_and_timeout_margin() {
        let mut vars = sample_vars();
        vars.push(("RUNNER_TIMEOUT_MARGIN_MS", "2500"));

        match prepare_invocation(json!({"RequestType": "Create"}), vars)
            .expect("create should prepare")
        {
            Invocation::Apply(pending) => {
                assert_eq!(pending.request_type, RequestType::Create);
                assert_eq!(pending.config.statements.len(), 2);
                assert_eq!(pending.config.timeout_margin, Duration::from_millis(2500));
            }
            other => panic!("create should need applying, got {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_request_type_without_dispatching() {
        let data_api = CapturingDataApi::new();
        let credentials = CountingCredentials::new();
        let runner = StatementRunner::new(&data_api, &credentials);

        let error = handle_custom_resource_event(
            json!({"RequestType": "Rollback"}),
            sample_vars(),
            &runner,
        )
        .expect_err("unknown request type should fail");

        assert_eq!(error.kind(), "ConfigurationError");
        assert!(data_api.statements().is_empty());
    }

    #[test]
    fn rejects_payload_without_request_type() {
        let error = parse_request(json!({"StackId": "stack"}))
            .expect_err("missing RequestType should fail");
        assert!(error.to_string().contains("malformed custom resource request"));
    }

    #[test]
    fn budget_subtracts_margin_and_saturates() {
        let margin = Duration::from_millis(1_000);

        assert_eq!(
            invocation_budget(10_000, 4_000, margin),
            Duration::from_millis(5_000)
        );
        assert_eq!(invocation_budget(10_000, 9_500, margin), Duration::ZERO);
        assert_eq!(invocation_budget(10_000, 12_000, margin), Duration::ZERO);
    }

    #[test]
    fn epoch_millis_reads_wall_clock() {
        let now = UNIX_EPOCH + Duration::from_millis(1_700_000_000_123);
        assert_eq!(epoch_millis(now), Ok(1_700_000_000_123));

        let before_epoch = UNIX_EPOCH - Duration::from_secs(1);
        assert_eq!(
            epoch_millis(before_epoch).expect_err("pre-epoch clock").kind(),
            "HandlerCrashed"
        );
    }

    #[test]
    fn lambda_error_keeps_the_taxonomy_message() {
        let failure = RunnerError::StatementExecution {
            index: 2,
            message: "Table 'Events' already exists".to_string(),
        };
        let expected = failure.to_string();

        assert_eq!(into_lambda_error(failure).to_string(), expected);
    }

    #[tokio::test]
    async fn slow_handler_is_reported_as_timeout() {
        let error = run_with_budget(Duration::from_millis(20), || {
            std::thread::sleep(Duration::from_millis(300));
            Err(RunnerError::configuration("unreachable"))
        })
        .await
        .expect_err("slow handler should time out");

        assert_eq!(error, RunnerError::Timeout { budget_ms: 20 });
        assert_eq!(error.statement_index(), None);
    }

    #[tokio::test]
    async fn panicking_handler_is_reported_as_crash() {
        let error = run_with_budget(Duration::from_secs(5), || panic!("handler blew up"))
            .await
            .expect_err("panicking handler should fail");

        assert_eq!(error.kind(), "HandlerCrashed");
    }

    #[tokio::test]
    async fn prepared_request_applies_inside_budget() {
        let pending = match prepare_invocation(json!({"RequestType": "Update"}), sample_vars())
            .expect("update should prepare")
        {
            Invocation::Apply(pending) => pending,
            other => panic!("update should need applying, got {other:?}"),
        };

        let response = run_with_budget(Duration::from_secs(5), move || {
            let data_api = CapturingDataApi::new();
            let credentials = CountingCredentials::new();
            let runner = StatementRunner::new(&data_api, &credentials);
            apply_request(&pending, &runner)
        })
        .await
        .expect("update should succeed");

        assert_eq!(response.data.statements_executed, 2);
    }
}
