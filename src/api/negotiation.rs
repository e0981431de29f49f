use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap, Method},
};
use std::convert::Infallible;

use crate::model::{MediaType, ScimError};

/// Logical operations exposed over HTTP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Bulk,
    GetResource,
    ServiceProviderConfigs,
}

/// One supported `(method, consumes, produces)` combination.
#[derive(Debug, Clone, Copy)]
struct Route {
    endpoint: Endpoint,
    method: &'static str,
    consumes: Option<MediaType>,
    produces: MediaType,
}

const ROUTES: &[Route] = &[
    Route {
        endpoint: Endpoint::Bulk,
        method: "POST",
        consumes: Some(MediaType::Json),
        produces: MediaType::Json,
    },
    Route {
        endpoint: Endpoint::Bulk,
        method: "POST",
        consumes: Some(MediaType::Json),
        produces: MediaType::Xml,
    },
    Route {
        endpoint: Endpoint::Bulk,
        method: "POST",
        consumes: Some(MediaType::Xml),
        produces: MediaType::Xml,
    },
    Route {
        endpoint: Endpoint::Bulk,
        method: "POST",
        consumes: Some(MediaType::Xml),
        produces: MediaType::Json,
    },
    Route {
        endpoint: Endpoint::GetResource,
        method: "GET",
        consumes: None,
        produces: MediaType::Json,
    },
    Route {
        endpoint: Endpoint::ServiceProviderConfigs,
        method: "GET",
        consumes: None,
        produces: MediaType::Json,
    },
];

/// Outcome of content negotiation for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Negotiated {
    pub consumes: Option<MediaType>,
    pub produces: MediaType,
}

/// Request head details that drive content negotiation and admission.
///
/// Extracted from:
/// - the request method and path (for a `.json` / `.xml` suffix)
/// - `Content-Type`, `Accept` and `Content-Length` headers
#[derive(Debug, Clone)]
pub struct RequestFormat {
    pub method: Method,
    pub path: String,
    pub content_type: Option<String>,
    pub accept: Option<String>,
    pub content_length: Option<u64>,
}

#[async_trait]
impl<S> FromRequestParts<S> for RequestFormat
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let headers = &parts.headers;
        Ok(Self {
            method: parts.method.clone(),
            path: parts.uri.path().to_string(),
            content_type: extract_header_value(headers, header::CONTENT_TYPE.as_str()),
            accept: extract_header_value(headers, header::ACCEPT.as_str()),
            content_length: extract_header_value(headers, header::CONTENT_LENGTH.as_str())
                .and_then(|v| v.trim().parse().ok()),
        })
    }
}

impl RequestFormat {
    pub fn negotiate(&self, endpoint: Endpoint) -> Result<Negotiated, ScimError> {
        negotiate(
            endpoint,
            &self.method,
            &self.path,
            self.content_type.as_deref(),
            self.accept.as_deref(),
        )
    }
}

/// Pick the consumed and produced media types for a request and check the
/// combination against the route table.
///
/// The consumed type comes from `Content-Type` (JSON when absent). The
/// produced type comes from the path suffix, then `Accept`, then the consumed
/// type.
pub fn negotiate(
    endpoint: Endpoint,
    method: &Method,
    path: &str,
    content_type: Option<&str>,
    accept: Option<&str>,
) -> Result<Negotiated, ScimError> {
    let candidates: Vec<&Route> = ROUTES
        .iter()
        .filter(|r| r.endpoint == endpoint && r.method == method.as_str())
        .collect();
    if candidates.is_empty() {
        return Err(ScimError::MethodNotAllowed(format!(
            "Method {} is not supported on {}",
            method, path
        )));
    }

    let consumes = if candidates.iter().any(|r| r.consumes.is_some()) {
        let consumed = match content_type {
            None => MediaType::Json,
            Some(value) => MediaType::from_mime(value).ok_or_else(|| {
                ScimError::UnsupportedMediaType(format!("Unsupported content type '{}'", value))
            })?,
        };
        if !candidates.iter().any(|r| r.consumes == Some(consumed)) {
            return Err(ScimError::UnsupportedMediaType(format!(
                "Content type {} is not accepted by this endpoint",
                consumed.content_type()
            )));
        }
        Some(consumed)
    } else {
        None
    };

    let produces = match MediaType::from_suffix(path) {
        Some(media_type) => media_type,
        None => match accept {
            Some(value) => preferred(value, &candidates)?,
            None => consumes.unwrap_or(MediaType::Json),
        },
    };

    candidates
        .iter()
        .find(|r| r.consumes == consumes && r.produces == produces)
        .map(|r| Negotiated {
            consumes: r.consumes,
            produces: r.produces,
        })
        .ok_or_else(|| {
            ScimError::NotAcceptable(format!(
                "This endpoint cannot produce {}",
                produces.content_type()
            ))
        })
}

/// First entry of an `Accept` header this endpoint can produce. Wildcards
/// select the first producible type.
fn preferred(accept: &str, candidates: &[&Route]) -> Result<MediaType, ScimError> {
    for entry in accept.split(',') {
        let essence = entry.split(';').next().unwrap_or("").trim();
        if essence == "*/*" || essence == "application/*" || essence.is_empty() {
            if let Some(route) = candidates.first() {
                return Ok(route.produces);
            }
        }
        if let Some(media_type) = MediaType::from_mime(essence) {
            if candidates.iter().any(|r| r.produces == media_type) {
                return Ok(media_type);
            }
        }
    }
    Err(ScimError::NotAcceptable(format!(
        "None of the accepted media types '{}' can be produced",
        accept
    )))
}

fn extract_header_value(headers: &HeaderMap, header_name: &str) -> Option<String> {
    headers
        .get(header_name)
        .and_then(|value| value.to_str().ok())
        .map(|s| s.to_string())
}
