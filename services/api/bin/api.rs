//! Main Entrypoint for the Parley API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Opening the local identity store.
//! 3. Initializing the tutor model client and the conversation exchange.
//! 4. Constructing the Axum router and applying middleware.
//! 5. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use parley_api::{
    config::Config, registry::SessionRegistry, router::create_router, state::AppState,
};
use parley_core::{
    exchange::Exchange,
    identity::{IdentityStore, JsonFileStore},
    llm_client::{GeminiClient, LLMClient},
};
use std::{net::SocketAddr, sync::Arc};
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to install Ctrl+C handler: {}", e);
        return;
    }
    info!("Received shutdown signal. Shutting down gracefully...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Open the Identity Store ---
    let store = JsonFileStore::open(&config.store_path).with_context(|| {
        format!("Failed to open store at {}", config.store_path.display())
    })?;
    let identity = IdentityStore::load(store).context("Failed to load identity records")?;
    info!(
        path = %config.store_path.display(),
        users = identity.user_count(),
        logged_in = identity.current_user().map(|u| u.username.as_str()),
        "Identity store loaded."
    );

    // --- 4. Initialize Shared Services ---
    if config.gemini_api_key.is_none() {
        warn!("GEMINI_API_KEY is not set. The tutor will answer every message with a notice.");
    }
    let llm_client: Arc<dyn LLMClient> = Arc::new(GeminiClient::new(
        config.gemini_api_key.clone(),
        config.chat_model.clone(),
        config.tts_model.clone(),
    ));
    let exchange = Arc::new(Exchange::new(llm_client.clone(), config.request_timeout));

    let app_state = Arc::new(AppState {
        identity: Arc::new(Mutex::new(identity)),
        sessions: Arc::new(SessionRegistry::new()),
        llm_client,
        exchange,
        config: Arc::new(config.clone()),
    });

    // --- 5. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 6. Start Server ---
    info!(
        chat_model = %config.chat_model,
        tts_model = %config.tts_model,
        voice = %config.tts_voice,
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server has shut down.");
    Ok(())
}
