use statement_runner_core::contract::ExecutionTarget;

/// Result summary of one `ExecuteStatement` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataApiResponse {
    pub records_updated: i64,
    pub rows_returned: usize,
}

/// Connectionless SQL endpoint. Every call authenticates on its own with the
/// target's credential reference.
pub trait DataApi {
    fn execute_statement(
        &self,
        target: &ExecutionTarget,
        sql: &str,
    ) -> Result<DataApiResponse, String>;
}
