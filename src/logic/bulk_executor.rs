use itertools::Itertools;
use serde_json::Value;

use crate::logic::bulk_id::BulkIdResolver;
use crate::logic::bulk_validate::BulkValidator;
use crate::model::{
    bulk_id_reference, BulkMethod, BulkOperationError, BulkOperationRequest,
    BulkOperationResponse, BulkStatus, DescriptorRegistry, ResourceDescriptor, ScimError,
    StoredResource, VersionPrecondition,
};
use crate::store::traits::ResourceBackend;

/// Executes the operations of one bulk request, strictly in order.
///
/// Each operation moves through
/// `Received -> Validated -> Substituted -> Dispatched -> Completed | Failed`;
/// any step may fail, and every failure becomes a status record rather than
/// an error for the whole batch.
pub struct BulkExecutor<'a, B: ResourceBackend + ?Sized> {
    backend: &'a B,
    validator: BulkValidator<'a>,
    resolver: BulkIdResolver,
    base_uri: &'a str,
}

impl<'a, B: ResourceBackend + ?Sized> BulkExecutor<'a, B> {
    pub fn new(backend: &'a B, registry: &'a DescriptorRegistry, base_uri: &'a str) -> Self {
        Self {
            backend,
            validator: BulkValidator::new(registry),
            resolver: BulkIdResolver::new(),
            base_uri,
        }
    }

    pub fn resolver(&self) -> &BulkIdResolver {
        &self.resolver
    }

    /// Run one operation to a terminal state and build its response record.
    pub async fn execute(&mut self, operation: &BulkOperationRequest) -> BulkOperationResponse {
        match self.run(operation).await {
            Ok(response) => {
                self.resolver.clear_unresolved();
                response
            }
            Err(err) => self.fail(err),
        }
    }

    /// Build the failure record for an operation and drop any references it
    /// left unresolved.
    pub fn fail(&mut self, err: BulkOperationError) -> BulkOperationResponse {
        self.resolver.clear_unresolved();
        match err.location.as_deref() {
            Some(location) => log::debug!("{} at {}", err, location),
            None => log::debug!("{}", err),
        }

        BulkOperationResponse {
            method: err.method,
            bulk_id: err.bulk_id,
            location: None,
            version: None,
            status: BulkStatus::from_error(&err.source),
        }
    }

    async fn run(
        &mut self,
        operation: &BulkOperationRequest,
    ) -> Result<BulkOperationResponse, BulkOperationError> {
        let fail = |source: ScimError| {
            BulkOperationError::new(operation.method.clone(), operation.bulk_id.clone(), source)
        };

        let validated = self.validator.validate(operation).map_err(fail)?;
        let method = validated.method;
        let descriptor = validated.descriptor;

        let resource_id = match validated.resource_id.as_deref() {
            Some(raw) => Some(self.resolve_resource_id(raw).map_err(fail)?),
            None => None,
        };
        let location = resource_id
            .as_deref()
            .map(|id| self.location(descriptor, id));

        let mut data = validated.data;
        if let Some(payload) = data.as_mut() {
            self.resolver.substitute_value(payload);
        }
        let unresolved = self.resolver.take_unresolved();
        if !unresolved.is_empty() {
            return Err(fail(ScimError::ResourceConflict(format!(
                "The bulk operation data has undefined or forward bulkId references: {}",
                unresolved
                    .iter()
                    .map(|token| format!("'{}'", token))
                    .join(", ")
            )))
            .with_location(location));
        }

        let stored = self
            .dispatch(method, descriptor, resource_id.as_deref(), data, &validated.version)
            .await
            .map_err(|source| fail(source).with_location(location.clone()))?;

        let (resource_id, version) = match stored {
            Some(resource) => (resource.id, Some(resource.version)),
            None => (resource_id.unwrap_or_default(), None),
        };

        if method == BulkMethod::Post {
            if let Some(bulk_id) = &validated.bulk_id {
                self.resolver.register(bulk_id, &resource_id);
            }
        }

        Ok(BulkOperationResponse {
            method: Some(method.as_str().to_string()),
            bulk_id: validated.bulk_id,
            location: matches!(method, BulkMethod::Post | BulkMethod::Put)
                .then(|| self.location(descriptor, &resource_id)),
            version,
            status: BulkStatus::success(method),
        })
    }

    async fn dispatch(
        &self,
        method: BulkMethod,
        descriptor: &ResourceDescriptor,
        resource_id: Option<&str>,
        data: Option<Value>,
        version: &Option<VersionPrecondition>,
    ) -> Result<Option<StoredResource>, ScimError> {
        let precondition = version.as_ref();
        match (method, resource_id, data) {
            (BulkMethod::Post, _, Some(data)) => self.backend.create(descriptor, data).await.map(Some),
            (BulkMethod::Put, Some(id), Some(data)) => self
                .backend
                .replace(descriptor, id, data, precondition)
                .await
                .map(Some),
            (BulkMethod::Patch, Some(id), Some(data)) => self
                .backend
                .patch(descriptor, id, data, precondition)
                .await
                .map(Some),
            (BulkMethod::Delete, Some(id), _) => self
                .backend
                .delete(descriptor, id, precondition)
                .await
                .map(|_| None),
            _ => Err(ScimError::InvalidResource(format!(
                "The bulk operation with method {} is incomplete",
                method
            ))),
        }
    }

    fn resolve_resource_id(&self, raw: &str) -> Result<String, ScimError> {
        match bulk_id_reference(raw) {
            Some(token) => self.resolver.resolve(token).cloned().ok_or_else(|| {
                ScimError::ResourceConflict(format!(
                    "Cannot resolve bulkId reference '{}': the bulk operation path has an undefined or forward reference",
                    token
                ))
            }),
            None => Ok(raw.to_string()),
        }
    }

    fn location(&self, descriptor: &ResourceDescriptor, resource_id: &str) -> String {
        format!(
            "{}/{}/{}",
            self.base_uri.trim_end_matches('/'),
            descriptor.endpoint,
            resource_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryBackend;
    use serde_json::json;

    #[tokio::test]
    async fn test_post_registers_bulk_id() {
        let backend = InMemoryBackend::new();
        let registry = DescriptorRegistry::core();
        let mut executor = BulkExecutor::new(&backend, &registry, "http://localhost/v1/");

        let response = executor
            .execute(&BulkOperationRequest::new(
                "POST",
                Some("alice"),
                "/Users",
                Some(json!({"userName": "alice"})),
            ))
            .await;

        assert_eq!(response.status.code, "201");
        let id = executor.resolver().resolve("alice").cloned().unwrap();
        assert_eq!(
            response.location.as_deref(),
            Some(format!("http://localhost/v1/Users/{}", id).as_str())
        );
        assert!(response.version.is_some());
    }

    #[tokio::test]
    async fn test_failed_post_omits_location_and_version() {
        let backend = InMemoryBackend::new();
        let registry = DescriptorRegistry::core();
        let mut executor = BulkExecutor::new(&backend, &registry, "http://localhost");

        let response = executor
            .execute(&BulkOperationRequest::new(
                "POST",
                Some("group"),
                "/Groups",
                Some(json!({"displayName": "g", "members": [{"value": "bulkId:nobody"}]})),
            ))
            .await;

        assert_eq!(response.status.code, "409");
        assert!(response.location.is_none());
        assert!(response.version.is_none());
        assert!(!executor.resolver().has_unresolved());
        assert_eq!(backend.resource_count(), 0);
    }

    #[tokio::test]
    async fn test_fail_clears_pending_references() {
        let backend = InMemoryBackend::new();
        let registry = DescriptorRegistry::core();
        let mut executor = BulkExecutor::new(&backend, &registry, "http://localhost");

        let mut data = json!({"members": [{"value": "bulkId:later"}]});
        executor.resolver.substitute_value(&mut data);
        assert!(executor.resolver().has_unresolved());

        let response = executor.fail(
            BulkOperationError::new(
                Some("PUT".to_string()),
                None,
                ScimError::ServerError("backend failure".to_string()),
            )
            .with_location(Some("http://localhost/Groups/1".to_string())),
        );

        assert_eq!(response.method.as_deref(), Some("PUT"));
        assert_eq!(response.status.code, "500");
        assert!(response.location.is_none());
        assert!(!executor.resolver().has_unresolved());
    }

    #[tokio::test]
    async fn test_delete_and_patch_success_records() {
        let backend = InMemoryBackend::new();
        let registry = DescriptorRegistry::core();
        let mut executor = BulkExecutor::new(&backend, &registry, "http://localhost");

        executor
            .execute(&BulkOperationRequest::new(
                "POST",
                Some("bob"),
                "/Users",
                Some(json!({"userName": "bob"})),
            ))
            .await;

        let patched = executor
            .execute(&BulkOperationRequest::new(
                "PATCH",
                None,
                "/Users/bulkId:bob",
                Some(json!({"title": "Builder"})),
            ))
            .await;
        assert_eq!(patched.status.code, "200");
        assert!(patched.location.is_none());
        assert!(patched.version.is_some());

        let deleted = executor
            .execute(&BulkOperationRequest::new("DELETE", None, "/Users/bulkId:bob", None))
            .await;
        assert_eq!(deleted.status.code, "200");
        assert!(deleted.version.is_none());
        assert_eq!(backend.resource_count(), 0);
    }
}
