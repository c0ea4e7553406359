use anyhow::Context;
use std::sync::Arc;
use taskboard_api_rest::{
    app::{create_app, AppDependencies},
    config::ApiConfig,
    routes::auth::RejectingAuthenticator,
};
use taskboard_common::{logger::Logger, telemetry::init_tracing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ApiConfig::from_env().context("Failed to load configuration")?;
    init_tracing(config.log_mode(), &config.log_level)?;

    let logger = Logger::stdio(config.log_mode());
    let deps = AppDependencies::new(logger, Arc::new(RejectingAuthenticator));
    let app = create_app(&config, deps);

    let address = config.server_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {}", address))?;

    tracing::info!(address = %address, environment = ?config.environment, "Server listening");

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
