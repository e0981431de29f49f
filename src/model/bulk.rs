use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::model::{ScimError, SCHEMA_URI_CORE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BulkMethod {
    Post,
    Put,
    Patch,
    Delete,
}

impl BulkMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            BulkMethod::Post => "POST",
            BulkMethod::Put => "PUT",
            BulkMethod::Patch => "PATCH",
            BulkMethod::Delete => "DELETE",
        }
    }

    /// Item methods address an existing resource and need an ID in the path.
    pub fn requires_resource_id(&self) -> bool {
        !matches!(self, BulkMethod::Post)
    }

    pub fn requires_data(&self) -> bool {
        !matches!(self, BulkMethod::Delete)
    }

    pub fn success_code(&self) -> u16 {
        match self {
            BulkMethod::Post => 201,
            _ => 200,
        }
    }
}

impl fmt::Display for BulkMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BulkMethod {
    type Err = ScimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "POST" => Ok(BulkMethod::Post),
            "PUT" => Ok(BulkMethod::Put),
            "PATCH" => Ok(BulkMethod::Patch),
            "DELETE" => Ok(BulkMethod::Delete),
            other => Err(ScimError::MethodNotAllowed(format!(
                "The bulk operation specifies an invalid HTTP method '{}'",
                other
            ))),
        }
    }
}

/// One operation as it arrives on the wire. Every field is optional here so
/// that structural problems are reported against the operation rather than
/// failing the whole request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkOperationRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bulk_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl BulkOperationRequest {
    pub fn new(method: &str, bulk_id: Option<&str>, path: &str, data: Option<Value>) -> Self {
        Self {
            method: Some(method.to_string()),
            bulk_id: bulk_id.map(str::to_string),
            version: None,
            path: Some(path.to_string()),
            data,
        }
    }

    pub fn with_version(mut self, version: &str) -> Self {
        self.version = Some(version.to_string());
        self
    }
}

/// Bulk request body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BulkRequest {
    #[serde(default)]
    pub schemas: Vec<String>,
    #[serde(rename = "failOnErrors", default, skip_serializing_if = "Option::is_none")]
    pub fail_on_errors: Option<i64>,
    #[serde(rename = "Operations", default)]
    pub operations: Vec<BulkOperationRequest>,
}

impl BulkRequest {
    pub fn new(operations: Vec<BulkOperationRequest>) -> Self {
        Self {
            schemas: vec![SCHEMA_URI_CORE.to_string()],
            fail_on_errors: None,
            operations,
        }
    }

    pub fn with_fail_on_errors(mut self, fail_on_errors: i64) -> Self {
        self.fail_on_errors = Some(fail_on_errors);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkStatus {
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl BulkStatus {
    pub fn success(method: BulkMethod) -> Self {
        Self {
            code: method.success_code().to_string(),
            description: None,
        }
    }

    pub fn from_error(err: &ScimError) -> Self {
        Self {
            code: err.status_code().to_string(),
            description: Some(err.description().to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == "200" || self.code == "201"
    }
}

/// Response record for one processed operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkOperationResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bulk_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub status: BulkStatus,
}

impl BulkOperationResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn status_code(&self) -> u16 {
        self.status.code.parse().unwrap_or(500)
    }
}
