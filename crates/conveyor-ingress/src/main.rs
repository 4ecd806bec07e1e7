// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Conveyor Ingress - Reliable Submission Intake Server
//!
//! Wires the outbox store, the broker dispatch channel, the retry
//! reconciler, and the HTTP receiver together and runs until interrupted.

use std::sync::Arc;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};

use conveyor_ingress::config::Config;
use conveyor_ingress::http::{self, AppState};
use conveyor_ingress::migrations;
use conveyor_ingress::orchestrator::RequestOrchestrator;
use conveyor_ingress::reconciler::{RetryReconciler, RetryReconcilerConfig};
use conveyor_ingress::store::{OutboxStore, PostgresOutboxStore, SqliteOutboxStore};
use conveyor_transport::{BrokerClient, BrokerConfig, RpcChannel};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("conveyor_ingress=info".parse().unwrap()),
        )
        .init();

    info!("Starting Conveyor Ingress");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    info!(
        broker_url = %config.broker_url,
        queue = %config.queue,
        http_addr = %config.http_addr,
        "Configuration loaded"
    );

    // Connect to database
    info!("Connecting to database...");
    let store = connect_store(&config).await?;

    // Verify connection
    let healthy = store.health_check().await?;
    info!(result = healthy, "Database health check passed");

    // Connect and declare broker queues up front; a misconfigured broker
    // fails the boot.
    let broker = Arc::new(
        BrokerClient::connect(BrokerConfig {
            url: config.broker_url.clone(),
            ..BrokerConfig::default()
        })
        .await?,
    );
    broker.ensure_queue(&config.queue).await?;
    if let Some(response_queue) = &config.response_queue {
        broker.ensure_queue(response_queue).await?;
    }
    info!(queue = %config.queue, "Broker queues declared");

    let channel = Arc::new(RpcChannel::new(broker.clone(), config.queue.clone()));
    let orchestrator = Arc::new(RequestOrchestrator::new(
        store.clone(),
        channel,
        config.reply_timeout,
    ));

    info!("Conveyor Ingress initialized successfully");

    // Start the retry reconciler
    let reconciler = RetryReconciler::new(
        store.clone(),
        orchestrator.clone(),
        RetryReconcilerConfig {
            poll_interval: config.retry_poll_interval,
            batch_size: config.retry_batch_size,
        },
    );
    let reconciler_shutdown = reconciler.shutdown_handle();
    let reconciler_handle = tokio::spawn(reconciler.run());

    // Start the HTTP receiver
    let app = http::router(AppState {
        orchestrator,
        store: store.clone(),
    });
    let listener = tokio::net::TcpListener::bind(config.http_addr).await?;
    info!(addr = %config.http_addr, "Receiver listening");
    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    reconciler_shutdown.notify_one();
    let _ = reconciler_handle.await;
    server_handle.abort();

    info!("Shutdown complete");

    Ok(())
}

/// Open the outbox store named by the database URL and run its migrations.
async fn connect_store(config: &Config) -> Result<Arc<dyn OutboxStore>> {
    if config.database_url.starts_with("postgres") {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await?;
        migrations::run_postgres(&pool).await?;
        Ok(Arc::new(PostgresOutboxStore::new(pool)))
    } else {
        let path = config
            .database_url
            .trim_start_matches("sqlite://")
            .trim_start_matches("sqlite:");
        Ok(Arc::new(SqliteOutboxStore::from_path(path).await?))
    }
}
