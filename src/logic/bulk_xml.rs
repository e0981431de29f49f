use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde_json::{Map, Value};
use std::fmt::Display;

use crate::model::{BulkOperationRequest, BulkRequest, ScimError, SCHEMA_URI_CORE};

const MAX_DEPTH: usize = 32;

/// Core User and Group attributes holding a list of values. In XML each value
/// is wrapped in its own child element, e.g. `<members><member>..</member></members>`.
const MULTI_VALUED_ATTRIBUTES: &[&str] = &[
    "addresses",
    "emails",
    "entitlements",
    "groups",
    "ims",
    "members",
    "phoneNumbers",
    "photos",
    "roles",
    "schemas",
    "x509Certificates",
];

#[derive(Debug, Default)]
struct XmlElement {
    name: String,
    text: String,
    children: Vec<XmlElement>,
}

impl XmlElement {
    fn named(start: &BytesStart) -> Self {
        Self {
            name: String::from_utf8_lossy(start.local_name().as_ref()).into_owned(),
            ..Self::default()
        }
    }

    fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|child| child.name == name)
    }

    fn child_text(&self, name: &str) -> Option<String> {
        self.child(name).map(|child| child.text.clone())
    }
}

/// Parse an XML bulk request body (`<scim:Bulk>`) into the same request type
/// the JSON body deserializes to. Namespace prefixes are ignored; elements are
/// matched on their local names.
pub fn parse_bulk_request(body: &[u8]) -> Result<BulkRequest, ScimError> {
    let root = read_document(body)?;
    if root.name != "Bulk" {
        return Err(malformed(format!(
            "expected a Bulk root element but found '{}'",
            root.name
        )));
    }

    let fail_on_errors = match root.child("failOnErrors") {
        Some(element) => Some(element.text.trim().parse::<i64>().map_err(|_| {
            malformed(format!("invalid failOnErrors value '{}'", element.text))
        })?),
        None => None,
    };

    let operations: Vec<BulkOperationRequest> = root
        .child("Operations")
        .map(|operations| {
            operations
                .children
                .iter()
                .filter(|child| child.name == "Operation")
                .map(operation)
                .collect()
        })
        .unwrap_or_default();

    Ok(BulkRequest {
        schemas: vec![SCHEMA_URI_CORE.to_string()],
        fail_on_errors,
        operations,
    })
}

fn operation(element: &XmlElement) -> BulkOperationRequest {
    BulkOperationRequest {
        method: element.child_text("method"),
        bulk_id: element.child_text("bulkId"),
        version: element.child_text("version"),
        path: element.child_text("path"),
        data: element.child("data").map(attributes),
    }
}

/// Child elements as the attributes of a JSON object. A repeated attribute
/// keeps its last value.
fn attributes(element: &XmlElement) -> Value {
    let mut object = Map::new();
    for child in &element.children {
        object.insert(child.name.clone(), attribute_value(child));
    }
    Value::Object(object)
}

fn attribute_value(element: &XmlElement) -> Value {
    if MULTI_VALUED_ATTRIBUTES.contains(&element.name.as_str()) {
        Value::Array(
            element
                .children
                .iter()
                .map(|value| {
                    if value.children.is_empty() {
                        Value::String(value.text.clone())
                    } else {
                        attributes(value)
                    }
                })
                .collect(),
        )
    } else if element.children.is_empty() {
        Value::String(element.text.clone())
    } else {
        attributes(element)
    }
}

fn read_document(body: &[u8]) -> Result<XmlElement, ScimError> {
    let mut reader = Reader::from_reader(body);
    reader.trim_text(true);

    let mut stack: Vec<XmlElement> = Vec::new();
    loop {
        match reader.read_event().map_err(malformed)? {
            Event::Start(start) => {
                if stack.len() >= MAX_DEPTH {
                    return Err(malformed(format!(
                        "elements are nested more than {} levels deep",
                        MAX_DEPTH
                    )));
                }
                stack.push(XmlElement::named(&start));
            }
            Event::Empty(start) => {
                let element = XmlElement::named(&start);
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => return Ok(element),
                }
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| malformed("unexpected closing tag"))?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => return Ok(element),
                }
            }
            Event::Text(text) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&text.unescape().map_err(malformed)?);
                }
            }
            Event::CData(data) => {
                if let Some(current) = stack.last_mut() {
                    current
                        .text
                        .push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Event::DocType(_) => {
                return Err(malformed("document type declarations are not allowed"));
            }
            Event::Eof => {
                return Err(malformed(if stack.is_empty() {
                    "the document has no root element"
                } else {
                    "unexpected end of document"
                }));
            }
            _ => {}
        }
    }
}

fn malformed(detail: impl Display) -> ScimError {
    ScimError::InvalidResource(format!("Error while reading XML Bulk content: {}", detail))
}
