use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use crate::model::{BulkOperationResponse, MediaType, ScimError, SCHEMA_URI_CORE};

/// Receives bulk response records one at a time, in request order, as soon
/// as each operation finishes.
#[async_trait::async_trait]
pub trait BulkResponseSink: Send {
    async fn emit(&mut self, response: BulkOperationResponse) -> Result<(), ScimError>;
}

/// Collects every record in memory.
#[async_trait::async_trait]
impl BulkResponseSink for Vec<BulkOperationResponse> {
    async fn emit(&mut self, response: BulkOperationResponse) -> Result<(), ScimError> {
        self.push(response);
        Ok(())
    }
}

/// Incremental encoder for a bulk response document. `start`, one
/// `operation` call per record and `finish` concatenate to a complete JSON or
/// XML body.
#[derive(Debug)]
pub struct BulkResponseEncoder {
    media_type: MediaType,
    written: usize,
}

impl BulkResponseEncoder {
    pub fn new(media_type: MediaType) -> Self {
        Self {
            media_type,
            written: 0,
        }
    }

    pub fn start(&self) -> Result<Vec<u8>, ScimError> {
        match self.media_type {
            MediaType::Json => Ok(format!(
                "{{\"schemas\":[\"{}\"],\"Operations\":[",
                SCHEMA_URI_CORE
            )
            .into_bytes()),
            MediaType::Xml => {
                let mut writer = Writer::new(Vec::new());
                write_xml(
                    &mut writer,
                    Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)),
                )?;
                write_xml(
                    &mut writer,
                    Event::Start(
                        BytesStart::new("scim:Response")
                            .with_attributes([("xmlns:scim", SCHEMA_URI_CORE)]),
                    ),
                )?;
                write_xml(&mut writer, Event::Start(BytesStart::new("scim:Operations")))?;
                Ok(writer.into_inner())
            }
        }
    }

    pub fn operation(&mut self, response: &BulkOperationResponse) -> Result<Vec<u8>, ScimError> {
        let mut out = Vec::new();
        match self.media_type {
            MediaType::Json => {
                if self.written > 0 {
                    out.push(b',');
                }
                serde_json::to_writer(&mut out, response).map_err(|e| {
                    ScimError::ServerError(format!("Cannot encode bulk response: {}", e))
                })?;
            }
            MediaType::Xml => out = xml_operation(response)?,
        }
        self.written += 1;
        Ok(out)
    }

    pub fn finish(&self) -> Result<Vec<u8>, ScimError> {
        match self.media_type {
            MediaType::Json => Ok(b"]}".to_vec()),
            MediaType::Xml => {
                let mut writer = Writer::new(Vec::new());
                write_xml(&mut writer, Event::End(BytesEnd::new("scim:Operations")))?;
                write_xml(&mut writer, Event::End(BytesEnd::new("scim:Response")))?;
                Ok(writer.into_inner())
            }
        }
    }

    pub fn written(&self) -> usize {
        self.written
    }
}

fn xml_operation(response: &BulkOperationResponse) -> Result<Vec<u8>, ScimError> {
    let mut writer = Writer::new(Vec::new());
    write_xml(&mut writer, Event::Start(BytesStart::new("scim:Operation")))?;
    write_element(&mut writer, "scim:method", response.method.as_deref())?;
    write_element(&mut writer, "scim:bulkId", response.bulk_id.as_deref())?;
    write_element(&mut writer, "scim:location", response.location.as_deref())?;
    write_element(&mut writer, "scim:version", response.version.as_deref())?;
    write_xml(&mut writer, Event::Start(BytesStart::new("scim:status")))?;
    write_element(&mut writer, "scim:code", Some(&response.status.code))?;
    write_element(
        &mut writer,
        "scim:description",
        response.status.description.as_deref(),
    )?;
    write_xml(&mut writer, Event::End(BytesEnd::new("scim:status")))?;
    write_xml(&mut writer, Event::End(BytesEnd::new("scim:Operation")))?;
    Ok(writer.into_inner())
}

/// Write `<name>value</name>`, or nothing when the value is absent.
fn write_element(
    writer: &mut Writer<Vec<u8>>,
    name: &str,
    value: Option<&str>,
) -> Result<(), ScimError> {
    if let Some(value) = value {
        write_xml(writer, Event::Start(BytesStart::new(name)))?;
        write_xml(writer, Event::Text(BytesText::new(value)))?;
        write_xml(writer, Event::End(BytesEnd::new(name)))?;
    }
    Ok(())
}

fn write_xml(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<(), ScimError> {
    writer
        .write_event(event)
        .map_err(|e| ScimError::ServerError(format!("Cannot encode bulk response: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BulkStatus;
    use serde_json::{json, Value};

    fn created(bulk_id: &str) -> BulkOperationResponse {
        BulkOperationResponse {
            method: Some("POST".to_string()),
            bulk_id: Some(bulk_id.to_string()),
            location: Some(format!("http://localhost/Users/{}", bulk_id)),
            version: Some("W/\"v1\"".to_string()),
            status: BulkStatus {
                code: "201".to_string(),
                description: None,
            },
        }
    }

    fn encode(encoder: &mut BulkResponseEncoder, records: &[BulkOperationResponse]) -> String {
        let mut body = encoder.start().unwrap();
        for record in records {
            body.extend(encoder.operation(record).unwrap());
        }
        body.extend(encoder.finish().unwrap());
        String::from_utf8(body).unwrap()
    }

    #[test]
    fn test_json_stream_is_a_valid_document() {
        let mut encoder = BulkResponseEncoder::new(MediaType::Json);
        let body = encode(&mut encoder, &[created("a"), created("b")]);
        assert_eq!(encoder.written(), 2);

        let parsed: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed["schemas"], json!([SCHEMA_URI_CORE]));
        assert_eq!(parsed["Operations"].as_array().unwrap().len(), 2);
        assert_eq!(parsed["Operations"][1]["bulkId"], json!("b"));
        assert_eq!(parsed["Operations"][0]["status"]["code"], json!("201"));
    }

    #[test]
    fn test_json_stream_without_operations() {
        let mut encoder = BulkResponseEncoder::new(MediaType::Json);
        let body = encode(&mut encoder, &[]);
        let parsed: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed["Operations"], json!([]));
    }

    #[test]
    fn test_xml_stream_escapes_values() {
        let mut encoder = BulkResponseEncoder::new(MediaType::Xml);
        let failed = BulkOperationResponse {
            method: Some("PUT".to_string()),
            bulk_id: None,
            location: None,
            version: None,
            status: BulkStatus {
                code: "412".to_string(),
                description: Some("version <W/\"a\"> & more".to_string()),
            },
        };
        let body = encode(&mut encoder, &[created("a"), failed]);

        assert!(body.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?><scim:Response"));
        assert!(body.ends_with("</scim:Operations></scim:Response>"));
        assert_eq!(body.matches("<scim:Operation>").count(), 2);
        assert!(body.contains("<scim:version>W/&quot;v1&quot;</scim:version>"));
        assert!(body.contains(
            "<scim:description>version &lt;W/&quot;a&quot;&gt; &amp; more</scim:description>"
        ));
        assert!(!body.contains("<scim:bulkId></scim:bulkId>"));
    }

    #[test]
    fn test_xml_stream_reads_back_as_a_document() {
        let mut encoder = BulkResponseEncoder::new(MediaType::Xml);
        let body = encode(&mut encoder, &[created("a"), created("b")]);

        let mut reader = quick_xml::Reader::from_str(&body);
        let mut codes = Vec::new();
        let mut in_code = false;
        loop {
            match reader.read_event().unwrap() {
                Event::Start(start) => in_code = start.local_name().as_ref() == b"code",
                Event::Text(text) if in_code => codes.push(text.unescape().unwrap().into_owned()),
                Event::End(_) => in_code = false,
                Event::Eof => break,
                _ => {}
            }
        }
        assert_eq!(codes, ["201", "201"]);
    }

    #[tokio::test]
    async fn test_vec_sink_collects_in_order() {
        let mut sink: Vec<BulkOperationResponse> = Vec::new();
        sink.emit(created("a")).await.unwrap();
        sink.emit(created("b")).await.unwrap();
        assert_eq!(sink[0].bulk_id.as_deref(), Some("a"));
        assert_eq!(sink[1].bulk_id.as_deref(), Some("b"));
    }
}
