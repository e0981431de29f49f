pub mod api;
pub mod config;
pub mod logic;
pub mod model;
pub mod store;

// Export API types
pub use api::handlers;
pub use api::routes;

// Export the bulk subsystem
pub use logic::{
    BulkEnvelope, BulkIdResolver, BulkProcessor, BulkQuota, BulkQuotaSnapshot,
    BulkResponseEncoder, BulkResponseSink, BulkSummary,
};

// Export all model types
pub use model::*;

// Export store types
pub use store::{InMemoryBackend, ResourceBackend};

use std::sync::Arc;

use crate::api::handlers::{AppState, ScimState};
use crate::config::AppConfig;

/// Build the shared state for an in-memory server from configuration.
pub fn build_state(config: &AppConfig) -> anyhow::Result<AppState<InMemoryBackend>> {
    let quota = BulkQuota::from_config(&config.bulk)?;
    let processor = BulkProcessor::new(
        Arc::new(InMemoryBackend::new()),
        Arc::new(DescriptorRegistry::core()),
        Arc::new(quota),
    );
    Ok(Arc::new(ScimState::new(processor, &config.base_uri())))
}

// Function for integration testing
pub async fn run_server() -> anyhow::Result<()> {
    use axum::serve;
    use tokio::net::TcpListener;

    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();

    let config = AppConfig::load()?;
    let state = build_state(&config)?;

    let app = crate::api::routes::create_router().with_state(state);

    let bind_address = config.server_address();
    let listener = TcpListener::bind(&bind_address).await?;

    serve(listener, app).await?;

    Ok(())
}
