use serde_json::Value;

use crate::model::{ResourceDescriptor, ScimError, StoredResource, VersionPrecondition};

/// Identity store operations the bulk processor dispatches to, keyed by
/// resource descriptor and (except for create) resource ID.
#[async_trait::async_trait]
pub trait ResourceBackend: Send + Sync {
    /// Create a resource and return it with its server-assigned ID.
    async fn create(
        &self,
        descriptor: &ResourceDescriptor,
        data: Value,
    ) -> Result<StoredResource, ScimError>;

    /// Overwrite an existing resource.
    async fn replace(
        &self,
        descriptor: &ResourceDescriptor,
        id: &str,
        data: Value,
        precondition: Option<&VersionPrecondition>,
    ) -> Result<StoredResource, ScimError>;

    /// Partially update an existing resource.
    async fn patch(
        &self,
        descriptor: &ResourceDescriptor,
        id: &str,
        data: Value,
        precondition: Option<&VersionPrecondition>,
    ) -> Result<StoredResource, ScimError>;

    async fn delete(
        &self,
        descriptor: &ResourceDescriptor,
        id: &str,
        precondition: Option<&VersionPrecondition>,
    ) -> Result<(), ScimError>;

    async fn get(
        &self,
        descriptor: &ResourceDescriptor,
        id: &str,
    ) -> Result<Option<StoredResource>, ScimError>;
}
