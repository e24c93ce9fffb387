mod bridge;
mod broker;
mod chat;
mod config;
mod forwarder;
mod resolver;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::broker::PubsubBroker;
use crate::chat::ChatWebhook;
use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // A .env file never overrides variables already set
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,pubsub_gchat=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    };

    info!("Using Project ID: {}", config.project_id);
    info!("Topics to monitor: {}", config.topic_list);
    info!("Google Chat Webhook: {}", config.webhook_url);
    if let Some(timeout) = config.webhook_timeout {
        info!("Webhook timeout: {:?}", timeout);
    }

    let webhook = Arc::new(ChatWebhook::new(
        config.webhook_url.clone(),
        config.webhook_timeout,
    )?);

    let broker = PubsubBroker::connect(&config.project_id)
        .await
        .context("Failed to create Pub/Sub client")?;

    let shutdown = CancellationToken::new();
    spawn_signal_listener(shutdown.clone());

    bridge::run(&config, Arc::new(broker), webhook, shutdown).await
}

/// Cancel `shutdown` on SIGINT, or SIGTERM on unix.
fn spawn_signal_listener(shutdown: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {}", e);
                    if tokio::signal::ctrl_c().await.is_ok() {
                        warn!("SIGINT received, shutting down...");
                        shutdown.cancel();
                    }
                    return;
                }
            };

            tokio::select! {
                _ = sigterm.recv() => warn!("SIGTERM received, shutting down..."),
                _ = tokio::signal::ctrl_c() => warn!("SIGINT received, shutting down..."),
            }
        }

        #[cfg(not(unix))]
        {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl-C: {}", e);
                return;
            }
            warn!("SIGINT received, shutting down...");
        }

        shutdown.cancel();
    });
}
