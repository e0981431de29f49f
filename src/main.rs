use axum::serve;
use scim_bulk::api::routes::create_router;
use scim_bulk::config::AppConfig;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    use env_logger::{Builder, Env};

    Builder::from_env(Env::default().default_filter_or("info")).init();

    println!("SCIM Bulk: bulk operation server");

    let config = AppConfig::load()?;
    println!(
        "Configuration loaded: server={}:{}",
        config.server.host, config.server.port
    );
    println!(
        "Bulk limits: maxOperations={:?} maxPayloadSize={:?} maxConcurrentRequests={:?}",
        config.bulk.max_operations, config.bulk.max_payload_size, config.bulk.max_concurrent_requests
    );

    let state = scim_bulk::build_state(&config)?;

    run_server(create_router().with_state(state), &config).await?;

    Ok(())
}

async fn run_server(app: axum::Router, config: &AppConfig) -> anyhow::Result<()> {
    let bind_address = config.server_address();
    let listener = TcpListener::bind(&bind_address).await?;
    println!("SCIM Bulk server running on http://{}", bind_address);
    println!("Resource locations use base URI {}", config.base_uri());

    serve(listener, app).await?;

    Ok(())
}
