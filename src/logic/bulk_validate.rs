use serde_json::Value;
use std::collections::HashSet;

use crate::model::{
    BulkMethod, BulkOperationRequest, DescriptorRegistry, ResourceDescriptor, ScimError,
    VersionPrecondition,
};

/// A bulk operation path split into its endpoint and optional resource ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkPath<'a> {
    pub endpoint: &'a str,
    pub resource_id: Option<&'a str>,
}

/// Split `/<endpoint>[/<resourceID>]`. The leading slash is optional and a
/// lone trailing slash (`/Users/`) means no resource ID.
pub fn split_path(path: &str) -> BulkPath<'_> {
    let path = path.strip_prefix('/').unwrap_or(path);
    match path.split_once('/') {
        Some((endpoint, rest)) => {
            let rest = rest.strip_suffix('/').unwrap_or(rest);
            BulkPath {
                endpoint,
                resource_id: if rest.is_empty() { None } else { Some(rest) },
            }
        }
        None => BulkPath {
            endpoint: path,
            resource_id: None,
        },
    }
}

/// An operation that passed structural validation. The resource ID may still
/// be a `bulkId:` reference at this point.
#[derive(Debug, Clone)]
pub struct ValidatedOperation<'r> {
    pub method: BulkMethod,
    pub bulk_id: Option<String>,
    pub version: Option<VersionPrecondition>,
    pub descriptor: &'r ResourceDescriptor,
    pub resource_id: Option<String>,
    pub data: Option<Value>,
}

/// Structural checks for the operations of one bulk request. Tracks the
/// bulkIds seen so far so duplicates are reported against the operation
/// that repeats them.
#[derive(Debug)]
pub struct BulkValidator<'r> {
    registry: &'r DescriptorRegistry,
    seen_bulk_ids: HashSet<String>,
}

impl<'r> BulkValidator<'r> {
    pub fn new(registry: &'r DescriptorRegistry) -> Self {
        Self {
            registry,
            seen_bulk_ids: HashSet::new(),
        }
    }

    /// Run the checks in order; the first failure wins.
    pub fn validate(
        &mut self,
        operation: &BulkOperationRequest,
    ) -> Result<ValidatedOperation<'r>, ScimError> {
        let method: BulkMethod = operation
            .method
            .as_deref()
            .ok_or_else(|| {
                ScimError::InvalidResource(
                    "The bulk operation does not specify a HTTP method".to_string(),
                )
            })?
            .parse()?;

        let path = operation
            .path
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| {
                ScimError::InvalidResource("The bulk operation does not specify a path".to_string())
            })?;

        let BulkPath {
            endpoint,
            resource_id,
        } = split_path(path);

        match (method.requires_resource_id(), resource_id) {
            (false, Some(_)) => {
                return Err(ScimError::InvalidResource(format!(
                    "The bulk operation has method {} but the path '{}' includes a resource ID",
                    method, path
                )));
            }
            (true, None) => {
                return Err(ScimError::InvalidResource(
                    "The bulk operation does not have a resource ID in the path".to_string(),
                ));
            }
            _ => {}
        }

        let descriptor = self.registry.lookup(endpoint).ok_or_else(|| {
            ScimError::InvalidResource(format!(
                "The bulk operation specifies an unknown resource endpoint '{}'",
                endpoint
            ))
        })?;

        if method == BulkMethod::Post && operation.bulk_id.is_none() {
            return Err(ScimError::InvalidResource(
                "The bulk operation has method POST but does not specify a bulkId".to_string(),
            ));
        }

        if let Some(bulk_id) = &operation.bulk_id {
            if !self.seen_bulk_ids.insert(bulk_id.clone()) {
                return Err(ScimError::InvalidResource(format!(
                    "The bulk operation defines a duplicate bulkId '{}'",
                    bulk_id
                )));
            }
        }

        if method.requires_data() && operation.data.is_none() {
            return Err(ScimError::InvalidResource(
                "The bulk operation does not have any resource data".to_string(),
            ));
        }

        Ok(ValidatedOperation {
            method,
            bulk_id: operation.bulk_id.clone(),
            version: operation
                .version
                .as_deref()
                .and_then(VersionPrecondition::parse),
            descriptor,
            resource_id: resource_id.map(str::to_string),
            data: operation.data.clone(),
        })
    }
}
