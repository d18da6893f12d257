//! Conduit Server
//!
//! The server-side runtime of the agentic coding assistant: the Transport Edge and
//! Administrative REST surface over `conduit-core`'s orchestrator, session store, and tool
//! dispatcher.

use conduit_core::RuntimeConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config = RuntimeConfig::from_env()?;
    conduit_server::start_server(config).await
}
