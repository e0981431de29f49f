use thiserror::Error;

/// Domain error carrying an HTTP-equivalent status code.
///
/// Backend calls, validation steps and quota checks all return this type so
/// the bulk processor can turn any failure into a per-operation status record
/// (or, for quota failures, a single batch-level error).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScimError {
    #[error("{0}")]
    InvalidResource(String),
    #[error("{0}")]
    ResourceNotFound(String),
    #[error("{0}")]
    MethodNotAllowed(String),
    #[error("{0}")]
    NotAcceptable(String),
    #[error("{0}")]
    ResourceConflict(String),
    #[error("{0}")]
    PreconditionFailed(String),
    #[error("{0}")]
    RequestTooLarge(String),
    #[error("{0}")]
    UnsupportedMediaType(String),
    #[error("{0}")]
    ServerError(String),
    #[error("{0}")]
    Unavailable(String),
}

impl ScimError {
    pub fn status_code(&self) -> u16 {
        match self {
            ScimError::InvalidResource(_) => 400,
            ScimError::ResourceNotFound(_) => 404,
            ScimError::MethodNotAllowed(_) => 405,
            ScimError::NotAcceptable(_) => 406,
            ScimError::ResourceConflict(_) => 409,
            ScimError::PreconditionFailed(_) => 412,
            ScimError::RequestTooLarge(_) => 413,
            ScimError::UnsupportedMediaType(_) => 415,
            ScimError::ServerError(_) => 500,
            ScimError::Unavailable(_) => 503,
        }
    }

    pub fn description(&self) -> &str {
        match self {
            ScimError::InvalidResource(m)
            | ScimError::ResourceNotFound(m)
            | ScimError::MethodNotAllowed(m)
            | ScimError::NotAcceptable(m)
            | ScimError::ResourceConflict(m)
            | ScimError::PreconditionFailed(m)
            | ScimError::RequestTooLarge(m)
            | ScimError::UnsupportedMediaType(m)
            | ScimError::ServerError(m)
            | ScimError::Unavailable(m) => m,
        }
    }
}

/// A failure of a single operation within a bulk request, correlated with
/// the operation that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("bulk operation {method:?} (bulkId {bulk_id:?}) failed: {source}")]
pub struct BulkOperationError {
    pub method: Option<String>,
    pub bulk_id: Option<String>,
    pub location: Option<String>,
    #[source]
    pub source: ScimError,
}

impl BulkOperationError {
    pub fn new(method: Option<String>, bulk_id: Option<String>, source: ScimError) -> Self {
        Self {
            method,
            bulk_id,
            location: None,
            source,
        }
    }

    pub fn with_location(mut self, location: Option<String>) -> Self {
        self.location = location;
        self
    }

    pub fn status_code(&self) -> u16 {
        self.source.status_code()
    }
}
