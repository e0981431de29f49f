use chrono::Utc;
use parking_lot::RwLock;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::model::{
    generate_id, Id, ResourceDescriptor, ScimError, StoredResource, VersionPrecondition,
};
use crate::store::traits::ResourceBackend;

type Collection = HashMap<Id, StoredResource>;

/// Process-local backend keeping every collection in memory.
///
/// Resource versions are content hashes, so replacing a resource with
/// identical attributes keeps its version.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    collections: RwLock<HashMap<String, Collection>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of resources across all collections.
    pub fn resource_count(&self) -> usize {
        self.collections.read().values().map(|c| c.len()).sum()
    }

    pub fn count(&self, endpoint: &str) -> usize {
        self.collections
            .read()
            .get(endpoint)
            .map(|c| c.len())
            .unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl ResourceBackend for InMemoryBackend {
    async fn create(
        &self,
        descriptor: &ResourceDescriptor,
        data: Value,
    ) -> Result<StoredResource, ScimError> {
        let attributes = into_attributes(data)?;

        let mut collections = self.collections.write();
        let collection = collections.entry(descriptor.endpoint.clone()).or_default();
        check_unique(descriptor, collection, &attributes, None)?;

        let now = Utc::now().to_rfc3339();
        let stored = build_resource(generate_id(), attributes, &now, &now);
        collection.insert(stored.id.clone(), stored.clone());

        log::debug!("Created {} '{}'", descriptor.name, stored.id);
        Ok(stored)
    }

    async fn replace(
        &self,
        descriptor: &ResourceDescriptor,
        id: &str,
        data: Value,
        precondition: Option<&VersionPrecondition>,
    ) -> Result<StoredResource, ScimError> {
        let attributes = into_attributes(data)?;

        let mut collections = self.collections.write();
        let collection = collections.entry(descriptor.endpoint.clone()).or_default();
        let current = collection
            .get(id)
            .ok_or_else(|| not_found(descriptor, id))?;
        check_precondition(precondition, current)?;
        let created = created_at(current);
        check_unique(descriptor, collection, &attributes, Some(id))?;

        let stored = build_resource(id.to_string(), attributes, &created, &Utc::now().to_rfc3339());
        collection.insert(stored.id.clone(), stored.clone());
        Ok(stored)
    }

    async fn patch(
        &self,
        descriptor: &ResourceDescriptor,
        id: &str,
        data: Value,
        precondition: Option<&VersionPrecondition>,
    ) -> Result<StoredResource, ScimError> {
        let removals = removed_attributes(&data);
        let changes = into_attributes(data)?;

        let mut collections = self.collections.write();
        let collection = collections.entry(descriptor.endpoint.clone()).or_default();
        let current = collection
            .get(id)
            .ok_or_else(|| not_found(descriptor, id))?;
        check_precondition(precondition, current)?;
        let created = created_at(current);

        let mut attributes = match &current.data {
            Value::Object(map) => strip_server_attributes(map.clone()),
            _ => Map::new(),
        };
        for path in &removals {
            remove_attribute(&mut attributes, path);
        }
        for (name, value) in changes {
            merge_attribute(&mut attributes, name, value);
        }
        check_unique(descriptor, collection, &attributes, Some(id))?;

        let stored = build_resource(id.to_string(), attributes, &created, &Utc::now().to_rfc3339());
        collection.insert(stored.id.clone(), stored.clone());
        Ok(stored)
    }

    async fn delete(
        &self,
        descriptor: &ResourceDescriptor,
        id: &str,
        precondition: Option<&VersionPrecondition>,
    ) -> Result<(), ScimError> {
        let mut collections = self.collections.write();
        let collection = collections.entry(descriptor.endpoint.clone()).or_default();
        let current = collection
            .get(id)
            .ok_or_else(|| not_found(descriptor, id))?;
        check_precondition(precondition, current)?;

        collection.remove(id);
        log::debug!("Deleted {} '{}'", descriptor.name, id);
        Ok(())
    }

    async fn get(
        &self,
        descriptor: &ResourceDescriptor,
        id: &str,
    ) -> Result<Option<StoredResource>, ScimError> {
        Ok(self
            .collections
            .read()
            .get(&descriptor.endpoint)
            .and_then(|c| c.get(id))
            .cloned())
    }
}

fn not_found(descriptor: &ResourceDescriptor, id: &str) -> ScimError {
    ScimError::ResourceNotFound(format!(
        "Resource '{}' not found in {}",
        id, descriptor.endpoint
    ))
}

fn check_precondition(
    precondition: Option<&VersionPrecondition>,
    current: &StoredResource,
) -> Result<(), ScimError> {
    match precondition {
        Some(p) if !p.matches(&current.version) => Err(ScimError::PreconditionFailed(format!(
            "The resource version {} does not match the requested version",
            current.version
        ))),
        _ => Ok(()),
    }
}

fn check_unique(
    descriptor: &ResourceDescriptor,
    collection: &Collection,
    attributes: &Map<String, Value>,
    exclude_id: Option<&str>,
) -> Result<(), ScimError> {
    let Some(attribute) = descriptor.unique_attribute.as_deref() else {
        return Ok(());
    };
    let Some(value) = attributes.get(attribute).filter(|v| !v.is_null()) else {
        return Ok(());
    };

    let taken = collection.values().any(|existing| {
        Some(existing.id.as_str()) != exclude_id && existing.data.get(attribute) == Some(value)
    });
    if taken {
        return Err(ScimError::ResourceConflict(format!(
            "A {} with {} {} already exists",
            descriptor.name, attribute, value
        )));
    }
    Ok(())
}

fn into_attributes(data: Value) -> Result<Map<String, Value>, ScimError> {
    match data {
        Value::Object(map) => Ok(strip_server_attributes(map)),
        _ => Err(ScimError::InvalidResource(
            "The resource data must be a JSON object".to_string(),
        )),
    }
}

fn strip_server_attributes(mut map: Map<String, Value>) -> Map<String, Value> {
    map.remove("id");
    map.remove("meta");
    map
}

fn created_at(resource: &StoredResource) -> String {
    resource
        .data
        .pointer("/meta/created")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| Utc::now().to_rfc3339())
}

fn compute_version(attributes: &Map<String, Value>) -> String {
    let bytes = serde_json::to_vec(attributes).unwrap_or_default();
    let digest = Sha256::digest(&bytes);
    format!("W/\"{}\"", hex::encode(&digest[..16]))
}

fn build_resource(
    id: Id,
    mut attributes: Map<String, Value>,
    created: &str,
    last_modified: &str,
) -> StoredResource {
    attributes.insert("id".to_string(), Value::String(id.clone()));
    let version = compute_version(&attributes);
    attributes.insert(
        "meta".to_string(),
        json!({
            "created": created,
            "lastModified": last_modified,
            "version": version,
        }),
    );
    StoredResource {
        id,
        version,
        data: Value::Object(attributes),
    }
}

/// Attribute names listed under `meta.attributes` in a PATCH payload.
fn removed_attributes(data: &Value) -> Vec<String> {
    data.pointer("/meta/attributes")
        .and_then(Value::as_array)
        .map(|names| {
            names
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn remove_attribute(attributes: &mut Map<String, Value>, path: &str) {
    match path.split_once('.') {
        Some((parent, child)) => {
            if let Some(Value::Object(sub)) = attributes.get_mut(parent) {
                sub.remove(child);
            }
        }
        None => {
            attributes.remove(path);
        }
    }
}

fn merge_attribute(attributes: &mut Map<String, Value>, name: String, value: Value) {
    match value {
        Value::Array(incoming) => {
            let slot = attributes
                .entry(name)
                .or_insert_with(|| Value::Array(Vec::new()));
            if let Value::Array(existing) = slot {
                merge_multi_valued(existing, incoming);
            } else {
                let mut merged = Vec::new();
                merge_multi_valued(&mut merged, incoming);
                *slot = Value::Array(merged);
            }
        }
        Value::Object(incoming) => match attributes.get_mut(&name) {
            Some(Value::Object(existing)) => {
                for (sub_name, sub_value) in incoming {
                    existing.insert(sub_name, sub_value);
                }
            }
            _ => {
                attributes.insert(name, Value::Object(incoming));
            }
        },
        value => {
            attributes.insert(name, value);
        }
    }
}

// Values flagged with "operation": "delete" are removed by their "value";
// anything else is appended unless an equal value is already present.
fn merge_multi_valued(existing: &mut Vec<Value>, incoming: Vec<Value>) {
    for mut item in incoming {
        let is_delete = item.get("operation").and_then(Value::as_str) == Some("delete");
        if let Value::Object(map) = &mut item {
            map.remove("operation");
        }

        let key = item.get("value").cloned();
        if is_delete {
            if let Some(key) = key {
                existing.retain(|v| v.get("value") != Some(&key));
            }
            continue;
        }

        let present = match &key {
            Some(key) => existing.iter().any(|v| v.get("value") == Some(key)),
            None => existing.contains(&item),
        };
        if !present {
            existing.push(item);
        }
    }
}
