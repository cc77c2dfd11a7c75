use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::RunnerError;

pub const PHYSICAL_RESOURCE_ID_PREFIX: &str = "rds-statement-runner";
pub const FINGERPRINT_PREFIX_LEN: usize = 16;

/// Custom resource request types as spelled by CloudFormation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum RequestType {
    Create,
    Update,
    Delete,
}

impl RequestType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "Create",
            Self::Update => "Update",
            Self::Delete => "Delete",
        }
    }

    /// Create and Update apply the statements; Delete leaves the database alone.
    pub fn applies_statements(self) -> bool {
        matches!(self, Self::Create | Self::Update)
    }
}

impl std::str::FromStr for RequestType {
    type Err = RunnerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "Create" => Ok(Self::Create),
            "Update" => Ok(Self::Update),
            "Delete" => Ok(Self::Delete),
            other => Err(RunnerError::configuration(format!(
                "unsupported RequestType '{other}'"
            ))),
        }
    }
}

/// Envelope delivered by the custom resource provider framework.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CustomResourceRequest {
    #[serde(rename = "RequestType")]
    pub request_type: String,
    #[serde(rename = "RequestId", default)]
    pub request_id: Option<String>,
    #[serde(rename = "StackId", default)]
    pub stack_id: Option<String>,
    #[serde(rename = "LogicalResourceId", default)]
    pub logical_resource_id: Option<String>,
    #[serde(rename = "ResourceType", default)]
    pub resource_type: Option<String>,
    #[serde(rename = "PhysicalResourceId", default)]
    pub physical_resource_id: Option<String>,
    #[serde(rename = "ResourceProperties", default)]
    pub resource_properties: BTreeMap<String, Value>,
    #[serde(rename = "OldResourceProperties", default)]
    pub old_resource_properties: Option<BTreeMap<String, Value>>,
}

impl CustomResourceRequest {
    pub fn parsed_request_type(&self) -> Result<RequestType, RunnerError> {
        self.request_type.parse()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResponseData {
    #[serde(rename = "StatementsExecuted")]
    pub statements_executed: usize,
    #[serde(rename = "TestQuery")]
    pub test_query: String,
}

/// Completion signal handed back to the provider framework on success.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CustomResourceResponse {
    #[serde(rename = "PhysicalResourceId")]
    pub physical_resource_id: String,
    #[serde(rename = "Data")]
    pub data: ResponseData,
}

/// Database the statements run against. Holds references only, never secrets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionTarget {
    pub resource_arn: String,
    pub database_name: String,
    pub secret_arn: String,
}

/// Ordered SQL statements. Fixed once built.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct StatementList(Vec<String>);

impl StatementList {
    pub fn new(statements: Vec<String>) -> Self {
        Self(statements)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

impl From<Vec<String>> for StatementList {
    fn from(statements: Vec<String>) -> Self {
        Self::new(statements)
    }
}

impl<'a> IntoIterator for &'a StatementList {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleEvent {
    pub request_type: RequestType,
    pub target: ExecutionTarget,
    pub statements: StatementList,
}

/// Per-statement summary of a successful Data API call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatementOutcome {
    pub index: usize,
    pub records_updated: i64,
    pub rows_returned: usize,
}

#[derive(Serialize)]
struct FingerprintInput<'a> {
    target: &'a ExecutionTarget,
    statements: &'a StatementList,
}

pub fn configuration_fingerprint(
    target: &ExecutionTarget,
    statements: &StatementList,
) -> Result<String, RunnerError> {
    let mut hasher = Sha256::new();
    hasher.update(stable_contract_json(FingerprintInput { target, statements })?);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Create derives a fresh id from the configuration. Update and Delete echo
/// the id CloudFormation already knows, so an Update never looks like a
/// replacement.
pub fn physical_resource_id(
    request_type: RequestType,
    existing: Option<&str>,
    target: &ExecutionTarget,
    statements: &StatementList,
) -> Result<String, RunnerError> {
    match (request_type, existing) {
        (RequestType::Update | RequestType::Delete, Some(id)) if !id.trim().is_empty() => {
            Ok(id.to_string())
        }
        _ => {
            let fingerprint = configuration_fingerprint(target, statements)?;
            Ok(format!(
                "{PHYSICAL_RESOURCE_ID_PREFIX}-{}",
                &fingerprint[..FINGERPRINT_PREFIX_LEN]
            ))
        }
    }
}

/// Serialization failures are surfaced rather than hashed as an empty string,
/// which would give every configuration the same physical id.
pub fn stable_contract_json(value: impl Serialize) -> Result<String, RunnerError> {
    serde_json::to_string(&value).map_err(|error| {
        RunnerError::Crashed(format!("failed to serialize contract value: {error}"))
    })
}
