use etf_strategy_orchestrator::{
    agent::Orchestrator, data::InMemoryDataProvider, state::InMemoryStore, status::ChannelStatusSink, EngineConfig,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

const SCRIPT: &[&str] = &[
    "你好，我想做一个ETF组合",
    "我的风险偏好是稳健，偏好股票和债券，打算投资20万",
    "股票少一点，多配一些债券",
    "可以，就这样保存吧",
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("🚀 ETF Strategy Orchestrator demo starting");

    let config = EngineConfig::from_env();
    let (sink, mut events) = ChannelStatusSink::new(config.orchestrator.status_channel_capacity);
    let orchestrator = Orchestrator::with_defaults(
        Arc::new(InMemoryDataProvider::sample()),
        Arc::new(InMemoryStore::new()),
        Arc::new(sink),
        config,
    );

    let status_printer = tokio::spawn(async move {
        while let Some((_, event)) = events.recv().await {
            info!(kind = ?event.kind, tool_name = ?event.tool_name, "📡 {}", event.message);
        }
    });

    let session_id = Uuid::new_v4();
    for message in SCRIPT {
        println!("\n👤 {}", message);
        let reply = orchestrator.handle_turn(session_id, message).await;

        println!("🤖 [{} {}%]\n{}", reply.stage.label(), reply.progress.completion_pct, reply.reply);
        if let Some(strategy) = reply.strategy.as_ref().filter(|_| reply.strategy_updated) {
            info!(
                strategy_id = %strategy.id,
                version = strategy.version,
                status = ?strategy.status,
                "✅ Strategy updated"
            );
        }

        if let Some(audit_id) = reply.audit_id {
            if let Some(record) = orchestrator.audit().get(audit_id).await? {
                println!("\nReasoning Trace:");
                for (i, trace) in record.reasoning_trace.iter().enumerate() {
                    println!("  {}: {}", i + 1, trace);
                }
            }
        }
    }

    drop(orchestrator);
    status_printer.await?;

    Ok(())
}
