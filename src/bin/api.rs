use fintech_agent_router::{api::start_server, Orchestrator, RouterConfig};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = RouterConfig::load()?;

    let gemini_api_key = std::env::var("GEMINI_API_KEY").unwrap_or_else(|_| {
        eprintln!("GEMINI_API_KEY not set in .env");
        String::new()
    });

    info!("Fintech Agent Router - API Server");
    info!("Port: {}", config.server.port);

    let orchestrator = Arc::new(Orchestrator::from_config(&config, gemini_api_key)?);

    info!("Orchestrator initialized");

    start_server(orchestrator, config.server.port).await?;

    Ok(())
}
