use crate::contract::ExecutionTarget;

pub const DEFAULT_TEST_QUERY_SQL: &str = "select * from Events";
pub const SQL_PREVIEW_MAX_CHARS: usize = 120;

/// Shell command an operator can paste to check what the bootstrap left behind.
pub fn test_query_command(target: &ExecutionTarget, sql: &str) -> String {
    format!(
        "aws rds-data execute-statement --resource-arn \"{}\" --database \"{}\" --secret-arn \"{}\" --sql \"{}\"",
        target.resource_arn,
        target.database_name,
        target.secret_arn,
        sql.replace('"', "\\\""),
    )
}

/// Single-line, length-capped rendering of a statement for log events.
pub fn sql_preview(sql: &str) -> String {
    let collapsed = sql.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= SQL_PREVIEW_MAX_CHARS {
        return collapsed;
    }

    let truncated: String = collapsed.chars().take(SQL_PREVIEW_MAX_CHARS).collect();
    format!("{truncated}...")
}
