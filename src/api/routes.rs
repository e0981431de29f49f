use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;

use crate::api::handlers::AppState;
use crate::api::{bulk_handlers, handlers};
use crate::store::traits::ResourceBackend;

pub fn create_router<B: ResourceBackend + 'static>() -> Router<AppState<B>> {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Discovery
        .route(
            "/ServiceProviderConfigs",
            get(handlers::get_service_provider_configs::<B>),
        )
        // Bulk, with optional format suffix
        .route("/Bulk", post(bulk_handlers::post_bulk::<B>))
        .route("/Bulk.json", post(bulk_handlers::post_bulk::<B>))
        .route("/Bulk.xml", post(bulk_handlers::post_bulk::<B>))
        // Runtime quota administration
        .route(
            "/admin/bulk",
            get(handlers::get_bulk_quota::<B>).patch(handlers::update_bulk_quota::<B>),
        )
        // Resource read-back
        .route("/:endpoint/:id", get(handlers::get_resource::<B>))
        .layer(ServiceBuilder::new().layer(CatchPanicLayer::new()))
}
