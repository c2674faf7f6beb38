use etf_strategy_orchestrator::{
    agent::Orchestrator, api::start_server, data::build_provider_from_env, state::build_store_from_env,
    status::ChannelStatusSink, EngineConfig,
};
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let api_port: u16 = std::env::var("PORT")
        .or_else(|_| std::env::var("API_PORT"))
        .unwrap_or_else(|_| "8080".to_string())
        .parse()?;

    info!("🚀 ETF Strategy Orchestrator - API Server");
    info!("📍 Port: {}", api_port);

    let config = EngineConfig::from_env();
    let (sink, mut events) = ChannelStatusSink::new(config.orchestrator.status_channel_capacity);
    tokio::spawn(async move {
        while let Some((session_id, event)) = events.recv().await {
            debug!(session_id = %session_id, kind = ?event.kind, "{}", event.message);
        }
    });

    let orchestrator = Arc::new(Orchestrator::with_defaults(
        build_provider_from_env(),
        build_store_from_env(),
        Arc::new(sink),
        config,
    ));

    info!("✅ Orchestrator initialized");
    info!("📡 Starting API server...");

    start_server(orchestrator, api_port).await?;

    Ok(())
}
