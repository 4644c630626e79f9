//! Character Sheet Server
//!
//! HTTP backend for tabletop RPG characters: accounts, a shared catalog of
//! classes, abilities and equipment, and per-user characters that level up
//! along their class's progression rules.

mod auth;
mod config;
mod network;
mod persistence;
mod rules;

use log::{error, info};
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::auth::TokenService;
use crate::config::Config;
use crate::network::AppState;

/// Load configuration from the RON file named on the command line, or from
/// the environment when none is given
fn load_config() -> Result<Config, config::ConfigError> {
    match std::env::args().nth(1) {
        Some(path) => {
            info!("Loading configuration from {}", path);
            Config::load(path)
        }
        None => {
            info!("Loading configuration from environment");
            Config::from_env()
        }
    }
}

#[tokio::main]
async fn main() {
    // Optional .env file
    dotenvy::dotenv().ok();

    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("Starting Character Sheet Server...");

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return;
        }
    };

    let repo = match persistence::connect(
        &config.database_url,
        config.max_connections,
        config.uses_memory_store(),
    )
    .await
    {
        Ok(repo) => repo,
        Err(e) => {
            error!("Failed to initialize persistence: {}", e);
            return;
        }
    };

    let tokens = TokenService::new(&config.jwt_secret, config.token_ttl_minutes);
    info!("Access tokens expire after {} minutes", config.token_ttl_minutes);

    let listener = match TcpListener::bind(&config.listen).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {}", config.listen, e);
            return;
        }
    };

    let state = Arc::new(AppState::new(repo, tokens));

    tokio::select! {
        _ = network::serve(listener, state) => {}
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutting down");
        }
    }
}
