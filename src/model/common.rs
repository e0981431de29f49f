use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type Id = String;

/// Core schema URI carried by bulk request and response envelopes.
pub const SCHEMA_URI_CORE: &str = "urn:scim:schemas:core:1.0";

/// Prefix marking a value as a forward reference to a resource created
/// earlier in the same bulk request.
pub const BULK_ID_PREFIX: &str = "bulkId:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Json,
    Xml,
}

impl MediaType {
    pub fn content_type(&self) -> &'static str {
        match self {
            MediaType::Json => "application/json",
            MediaType::Xml => "application/xml",
        }
    }

    /// Parse the essence of a media type header value, ignoring parameters.
    pub fn from_mime(value: &str) -> Option<Self> {
        let essence = value.split(';').next().unwrap_or("").trim();
        match essence.to_ascii_lowercase().as_str() {
            "application/json" | "application/scim+json" | "text/json" => Some(MediaType::Json),
            "application/xml" | "application/scim+xml" | "text/xml" => Some(MediaType::Xml),
            _ => None,
        }
    }

    /// Parse a `.json` / `.xml` path suffix.
    pub fn from_suffix(path: &str) -> Option<Self> {
        if path.ends_with(".json") {
            Some(MediaType::Json)
        } else if path.ends_with(".xml") {
            Some(MediaType::Xml)
        } else {
            None
        }
    }
}

pub fn generate_id() -> Id {
    Uuid::new_v4().to_string()
}

/// Strip the `bulkId:` prefix, returning the bare token if present.
pub fn bulk_id_reference(value: &str) -> Option<&str> {
    value.strip_prefix(BULK_ID_PREFIX)
}
