//! Environment-driven configuration.

use std::net::SocketAddr;

const DEFAULT_ADDR: &str = "127.0.0.1:3000";
const DEFAULT_DATABASE_URL: &str = "sqlite:cardvault.db";
const DEFAULT_CORS_ORIGIN: &str = "http://localhost:8080";
const DEFAULT_OPENAI_MODEL: &str = "gpt-5";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub addr: SocketAddr,
    pub database_url: String,
    pub cors_origin: String,
    /// When absent, SMS/email extraction endpoints report extraction failure.
    pub openai_api_key: Option<String>,
    pub openai_model: String,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let addr = std::env::var("CARDVAULT_ADDR")
            .unwrap_or_else(|_| DEFAULT_ADDR.to_string())
            .parse::<SocketAddr>()?;

        Ok(Self {
            addr,
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
            cors_origin: std::env::var("CORS_ORIGIN")
                .unwrap_or_else(|_| DEFAULT_CORS_ORIGIN.to_string()),
            openai_api_key: std::env::var("OPENAI_API_KEY").ok(),
            openai_model: std::env::var("OPENAI_MODEL")
                .unwrap_or_else(|_| DEFAULT_OPENAI_MODEL.to_string()),
        })
    }
}
