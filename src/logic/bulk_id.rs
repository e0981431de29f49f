use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

use crate::model::{bulk_id_reference, Id};

/// Maps client-chosen bulkIds to server-assigned resource IDs for the
/// lifetime of one bulk request, and collects references that could not be
/// resolved while substituting the current operation.
#[derive(Debug, Default)]
pub struct BulkIdResolver {
    resolved: HashMap<String, Id>,
    unresolved: BTreeSet<String>,
}

impl BulkIdResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a bare bulkId (without the `bulkId:` prefix).
    pub fn resolve(&self, bulk_id: &str) -> Option<&Id> {
        self.resolved.get(bulk_id)
    }

    /// Record the resource ID assigned by a successful POST.
    pub fn register(&mut self, bulk_id: &str, resource_id: &str) {
        self.resolved
            .insert(bulk_id.to_string(), resource_id.to_string());
    }

    /// Replace a `bulkId:<token>` value with its resolved resource ID. Values
    /// without the prefix come back unchanged, as do unresolved references,
    /// whose token is remembered instead.
    pub fn substitute(&mut self, value: &str) -> String {
        let Some(token) = bulk_id_reference(value) else {
            return value.to_string();
        };

        match self.resolved.get(token) {
            Some(resource_id) => resource_id.clone(),
            None => {
                self.unresolved.insert(token.to_string());
                value.to_string()
            }
        }
    }

    /// Substitute every string leaf of a payload in place, descending into
    /// nested objects and arrays.
    pub fn substitute_value(&mut self, value: &mut Value) {
        match value {
            Value::String(s) => {
                if bulk_id_reference(s).is_some() {
                    *s = self.substitute(s);
                }
            }
            Value::Array(items) => {
                for item in items {
                    self.substitute_value(item);
                }
            }
            Value::Object(map) => {
                for (_, item) in map.iter_mut() {
                    self.substitute_value(item);
                }
            }
            Value::Null | Value::Bool(_) | Value::Number(_) => {}
        }
    }

    pub fn has_unresolved(&self) -> bool {
        !self.unresolved.is_empty()
    }

    /// Drain the unresolved references collected so far, in sorted order.
    pub fn take_unresolved(&mut self) -> Vec<String> {
        std::mem::take(&mut self.unresolved).into_iter().collect()
    }

    pub fn clear_unresolved(&mut self) {
        self.unresolved.clear();
    }

    pub fn len(&self) -> usize {
        self.resolved.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty()
    }
}
