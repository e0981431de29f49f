use axum::{
    extract::{Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
    Json as RequestJson,
};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::api::negotiation::{Endpoint, RequestFormat};
use crate::logic::{BulkProcessor, BulkQuotaSnapshot};
use crate::model::{ScimError, SCHEMA_URI_CORE};
use crate::store::traits::ResourceBackend;

/// Shared state behind every route.
pub struct ScimState<B: ?Sized> {
    pub processor: BulkProcessor<B>,
    /// Base URI for resource locations, without a trailing slash.
    pub base_uri: String,
}

impl<B: ResourceBackend + ?Sized> ScimState<B> {
    pub fn new(processor: BulkProcessor<B>, base_uri: &str) -> Self {
        Self {
            processor,
            base_uri: base_uri.trim_end_matches('/').to_string(),
        }
    }
}

pub type AppState<B> = Arc<ScimState<B>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub description: String,
}

/// SCIM error body: `{"Errors":[{"code":"...","description":"..."}]}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    #[serde(rename = "Errors")]
    pub errors: Vec<ErrorDetail>,
}

impl ErrorResponse {
    pub fn new(err: &ScimError) -> Self {
        Self {
            errors: vec![ErrorDetail {
                code: err.status_code().to_string(),
                description: err.description().to_string(),
            }],
        }
    }
}

pub fn api_error(err: ScimError) -> (StatusCode, Json<ErrorResponse>) {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(ErrorResponse::new(&err)))
}

impl IntoResponse for ScimError {
    fn into_response(self) -> Response {
        api_error(self).into_response()
    }
}

/// Simple health check endpoint
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

#[derive(Debug, Serialize)]
pub struct Supported {
    pub supported: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkSupport {
    pub supported: bool,
    pub max_operations: u64,
    pub max_payload_size: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceProviderConfig {
    pub schemas: Vec<String>,
    pub patch: Supported,
    pub bulk: BulkSupport,
    pub filter: Supported,
    pub change_password: Supported,
    pub sort: Supported,
    pub etag: Supported,
}

/// Unbounded limits are advertised as the largest signed 64-bit value.
fn advertised_limit(limit: Option<u64>) -> u64 {
    limit.unwrap_or(i64::MAX as u64)
}

pub async fn get_service_provider_configs<B: ResourceBackend + ?Sized>(
    State(state): State<AppState<B>>,
    format: RequestFormat,
) -> Result<Json<ServiceProviderConfig>, (StatusCode, Json<ErrorResponse>)> {
    format
        .negotiate(Endpoint::ServiceProviderConfigs)
        .map_err(api_error)?;

    let quota = state.processor.quota();
    Ok(Json(ServiceProviderConfig {
        schemas: vec![SCHEMA_URI_CORE.to_string()],
        patch: Supported { supported: true },
        bulk: BulkSupport {
            supported: true,
            max_operations: advertised_limit(quota.max_operations()),
            max_payload_size: advertised_limit(quota.max_payload_size()),
        },
        filter: Supported { supported: false },
        change_password: Supported { supported: false },
        sort: Supported { supported: false },
        etag: Supported { supported: true },
    }))
}

pub async fn get_resource<B: ResourceBackend + ?Sized>(
    State(state): State<AppState<B>>,
    Path((endpoint, id)): Path<(String, String)>,
    format: RequestFormat,
) -> Result<Response, (StatusCode, Json<ErrorResponse>)> {
    format.negotiate(Endpoint::GetResource).map_err(api_error)?;

    let descriptor = state
        .processor
        .registry()
        .lookup(&endpoint)
        .ok_or_else(|| {
            api_error(ScimError::ResourceNotFound(format!(
                "Unknown resource endpoint '{}'",
                endpoint
            )))
        })?;

    let resource = state
        .processor
        .backend()
        .get(descriptor, &id)
        .await
        .map_err(api_error)?
        .ok_or_else(|| {
            api_error(ScimError::ResourceNotFound(format!(
                "Resource {} not found",
                id
            )))
        })?;

    let mut data = resource.data;
    if let Some(meta) = data.get_mut("meta").and_then(Value::as_object_mut) {
        meta.insert(
            "location".to_string(),
            Value::String(format!("{}/{}/{}", state.base_uri, descriptor.endpoint, resource.id)),
        );
    }

    let mut response = Json(data).into_response();
    if let Ok(etag) = HeaderValue::from_str(&resource.version) {
        response.headers_mut().insert(header::ETAG, etag);
    }
    Ok(response)
}

/// Runtime quota update. An absent field leaves the limit alone; `null`
/// removes it.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkQuotaUpdate {
    #[serde(default, deserialize_with = "double_option")]
    pub max_operations: Option<Option<u64>>,
    #[serde(default, deserialize_with = "double_option")]
    pub max_payload_size: Option<Option<u64>>,
    #[serde(default, deserialize_with = "double_option")]
    pub max_concurrent_requests: Option<Option<u32>>,
}

fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

pub async fn get_bulk_quota<B: ResourceBackend + ?Sized>(
    State(state): State<AppState<B>>,
) -> Json<BulkQuotaSnapshot> {
    Json(state.processor.quota().snapshot())
}

pub async fn update_bulk_quota<B: ResourceBackend + ?Sized>(
    State(state): State<AppState<B>>,
    RequestJson(update): RequestJson<BulkQuotaUpdate>,
) -> Result<Json<BulkQuotaSnapshot>, (StatusCode, Json<ErrorResponse>)> {
    let quota = state.processor.quota();

    // Applied first so a rejected value leaves every limit unchanged.
    if let Some(max) = update.max_concurrent_requests {
        quota.set_max_concurrent_requests(max).map_err(api_error)?;
    }
    if let Some(max) = update.max_operations {
        quota.set_max_operations(max);
    }
    if let Some(max) = update.max_payload_size {
        quota.set_max_payload_size(max);
    }

    let snapshot = quota.snapshot();
    log::info!("Bulk quota updated: {:?}", snapshot);
    Ok(Json(snapshot))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_response_body() {
        let (status, Json(body)) = api_error(ScimError::RequestTooLarge("too big".to_string()));
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({"Errors": [{"code": "413", "description": "too big"}]})
        );
    }

    #[test]
    fn test_quota_update_distinguishes_null_from_absent() {
        let update: BulkQuotaUpdate =
            serde_json::from_value(json!({"maxOperations": 5, "maxPayloadSize": null})).unwrap();
        assert_eq!(update.max_operations, Some(Some(5)));
        assert_eq!(update.max_payload_size, Some(None));
        assert_eq!(update.max_concurrent_requests, None);
    }

    #[test]
    fn test_advertised_limits() {
        assert_eq!(advertised_limit(Some(10)), 10);
        assert_eq!(advertised_limit(None), 9223372036854775807);
    }
}
