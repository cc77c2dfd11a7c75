use std::time::SystemTime;

use aws_sdk_rdsdata::error::DisplayErrorContext;
use lambda_runtime::{service_fn, Error, LambdaEvent};
use serde_json::Value;
use statement_runner_core::contract::{CustomResourceResponse, ExecutionTarget};
use statement_runner_lambda::adapters::credentials::{
    parse_secret_string, CredentialStore, ResolvedCredential,
};
use statement_runner_lambda::adapters::data_api::{DataApi, DataApiResponse};
use statement_runner_lambda::handlers::lifecycle::{
    apply_request, epoch_millis, into_lambda_error, invocation_budget, prepare_invocation,
    run_with_budget, Invocation,
};
use statement_runner_lambda::handlers::statement_runner::StatementRunner;
use tracing_subscriber::EnvFilter;

struct RdsDataApiClient {
    rds_data_client: aws_sdk_rdsdata::Client,
}

impl DataApi for RdsDataApiClient {
    fn execute_statement(
        &self,
        target: &ExecutionTarget,
        sql: &str,
    ) -> Result<DataApiResponse, String> {
        let client = self.rds_data_client.clone();
        let resource_arn = target.resource_arn.clone();
        let secret_arn = target.secret_arn.clone();
        let database = target.database_name.clone();
        let sql_text = sql.to_string();

        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async move {
                client
                    .execute_statement()
                    .resource_arn(resource_arn)
                    .secret_arn(secret_arn)
                    .database(database)
                    .sql(sql_text)
                    .send()
                    .await
                    .map(|output| DataApiResponse {
                        records_updated: output.number_of_records_updated(),
                        rows_returned: output.records().len(),
                    })
                    .map_err(|error| {
                        format!(
                            "failed to execute statement: {}",
                            DisplayErrorContext(&error)
                        )
                    })
            })
        })
    }
}

struct SecretsManagerCredentialStore {
    secrets_client: aws_sdk_secretsmanager::Client,
}

impl CredentialStore for SecretsManagerCredentialStore {
    fn resolve(&self, secret_arn: &str) -> Result<ResolvedCredential, String> {
        let client = self.secrets_client.clone();
        let secret_id = secret_arn.to_string();

        let secret_string = tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async move {
                client
                    .get_secret_value()
                    .secret_id(secret_id)
                    .send()
                    .await
                    .map_err(|error| {
                        format!(
                            "failed to read secret: {}",
                            aws_sdk_secretsmanager::error::DisplayErrorContext(&error)
                        )
                    })
                    .and_then(|output| {
                        output
                            .secret_string()
                            .map(str::to_string)
                            .ok_or_else(|| "secret has no string value".to_string())
                    })
            })
        })?;

        parse_secret_string(&secret_string)
    }
}

async fn handle_request(event: LambdaEvent<Value>) -> Result<CustomResourceResponse, Error> {
    let LambdaEvent { payload, context } = event;

    let invocation = prepare_invocation(payload, std::env::vars()).map_err(into_lambda_error)?;
    let pending = match invocation {
        Invocation::Completed(response) => return Ok(response),
        Invocation::Apply(pending) => pending,
    };

    let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let data_api = RdsDataApiClient {
        rds_data_client: aws_sdk_rdsdata::Client::new(&aws_config),
    };
    let credentials = SecretsManagerCredentialStore {
        secrets_client: aws_sdk_secretsmanager::Client::new(&aws_config),
    };

    let now_ms = epoch_millis(SystemTime::now()).map_err(into_lambda_error)?;
    let budget = invocation_budget(context.deadline, now_ms, pending.config.timeout_margin);

    run_with_budget(budget, move || {
        let runner = StatementRunner::new(&data_api, &credentials);
        apply_request(&pending, &runner)
    })
    .await
    .map_err(into_lambda_error)
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_current_span(false)
        .with_target(false)
        .init();

    lambda_runtime::run(service_fn(handle_request)).await
}
