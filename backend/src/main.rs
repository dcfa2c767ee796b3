use std::sync::Arc;

use anyhow::Context;
use axum::http::{header, HeaderValue, Method};
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

use cardvault_backend::config::AppConfig;
use cardvault_backend::extractors::{OpenAiClient, Unconfigured};
use cardvault_backend::rest::{self, AppState};
use cardvault_backend::storage::SqliteStorage;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::from_env()?;
    tracing::info!(addr = %config.addr, database = %config.database_url, "starting cardvault");

    let storage = Arc::new(
        SqliteStorage::connect(&config.database_url)
            .await
            .context("opening database")?,
    );

    let state = match &config.openai_api_key {
        Some(api_key) => {
            let client = Arc::new(OpenAiClient::new(
                api_key.clone(),
                config.openai_model.clone(),
            ));
            // Mailbox access needs an OAuth flow on top of the API key,
            // which this deployment does not carry. The analyzer still
            // runs against whatever source is wired in.
            AppState::new(storage, client.clone(), client, Arc::new(Unconfigured))
        }
        None => {
            tracing::warn!("OPENAI_API_KEY not set; sms and email extraction disabled");
            let stub = Arc::new(Unconfigured);
            AppState::new(storage, stub.clone(), stub.clone(), stub)
        }
    };

    let cors_origin = config
        .cors_origin
        .parse::<HeaderValue>()
        .context("invalid CORS_ORIGIN")?;
    let cors = CorsLayer::new()
        .allow_origin(cors_origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::PUT,
            Method::DELETE,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    let app = rest::router(state).layer(cors);

    let listener = tokio::net::TcpListener::bind(config.addr)
        .await
        .context("binding listen address")?;
    tracing::info!("listening on {}", config.addr);
    axum::serve(listener, app).await.context("serving")?;
    Ok(())
}
