mod configuration;
mod error;
mod routes;
mod state;

#[cfg(test)]
mod mock_provider;

use anyhow::Result;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let settings = configuration::Settings::new()?;
    let addr = settings.server.socket_addr()?;
    info!(
        provider = %settings.provider.provider_type(),
        max_turns = settings.agent.max_turns,
        "loaded configuration"
    );

    // Create app state
    let state = state::AppState::from_settings(settings).await?;
    info!(
        tools = ?state
            .agent
            .tools()
            .tools()
            .into_iter()
            .map(|tool| tool.name)
            .collect::<Vec<_>>(),
        "agent ready"
    );

    // Create router with CORS support
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = routes::configure(state).layer(cors);

    // Run server
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
