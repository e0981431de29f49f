use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::model::Id;

/// Type metadata for a resource collection such as Users or Groups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub name: String,
    pub endpoint: String,
    pub schema: String,
    /// Attribute whose value must be unique across the collection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_attribute: Option<String>,
}

impl ResourceDescriptor {
    pub fn new(name: &str, endpoint: &str, schema: &str) -> Self {
        Self {
            name: name.to_string(),
            endpoint: endpoint.to_string(),
            schema: schema.to_string(),
            unique_attribute: None,
        }
    }

    pub fn with_unique_attribute(mut self, attribute: &str) -> Self {
        self.unique_attribute = Some(attribute.to_string());
        self
    }

    pub fn user() -> Self {
        Self::new("User", "Users", "urn:scim:schemas:core:1.0").with_unique_attribute("userName")
    }

    pub fn group() -> Self {
        Self::new("Group", "Groups", "urn:scim:schemas:core:1.0")
            .with_unique_attribute("displayName")
    }
}

/// Lookup from endpoint name to resource descriptor.
#[derive(Debug, Clone, Default)]
pub struct DescriptorRegistry {
    by_endpoint: HashMap<String, ResourceDescriptor>,
}

impl DescriptorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the core Users and Groups endpoints.
    pub fn core() -> Self {
        let mut registry = Self::new();
        registry.register(ResourceDescriptor::user());
        registry.register(ResourceDescriptor::group());
        registry
    }

    pub fn register(&mut self, descriptor: ResourceDescriptor) {
        self.by_endpoint
            .insert(descriptor.endpoint.clone(), descriptor);
    }

    pub fn lookup(&self, endpoint: &str) -> Option<&ResourceDescriptor> {
        self.by_endpoint.get(endpoint)
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &ResourceDescriptor> {
        self.by_endpoint.values()
    }
}

/// A resource as held by a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredResource {
    pub id: Id,
    pub version: String,
    pub data: Value,
}

/// Optimistic-concurrency precondition taken from a bulk operation's
/// `version` field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionPrecondition {
    Any,
    OneOf(Vec<String>),
}

impl VersionPrecondition {
    /// Parse a raw version value. `*` matches anything; otherwise the value
    /// is a comma separated list of candidate versions. Blank input yields
    /// no precondition.
    pub fn parse(raw: &str) -> Option<Self> {
        let candidates: Vec<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|candidate| !candidate.is_empty())
            .map(str::to_string)
            .collect();

        if candidates.is_empty() {
            None
        } else if candidates.iter().any(|candidate| candidate == "*") {
            Some(VersionPrecondition::Any)
        } else {
            Some(VersionPrecondition::OneOf(candidates))
        }
    }

    pub fn matches(&self, current: &str) -> bool {
        match self {
            VersionPrecondition::Any => true,
            VersionPrecondition::OneOf(candidates) => {
                candidates.iter().any(|candidate| candidate == current)
            }
        }
    }
}
