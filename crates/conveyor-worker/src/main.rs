// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Conveyor Worker - Order Processing Service
//!
//! Wires the order store, the order processor, and the queue consumer loop
//! together and runs until interrupted.

use std::sync::Arc;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use conveyor_transport::{BrokerClient, BrokerConfig};
use conveyor_worker::config::Config;
use conveyor_worker::consumer::ConsumerLoop;
use conveyor_worker::migrations;
use conveyor_worker::orders::{OrderStore, PostgresOrderStore, SqliteOrderStore};
use conveyor_worker::processor::OrderProcessor;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("conveyor_worker=info".parse().unwrap()),
        )
        .init();

    info!("Starting Conveyor Worker");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        tracing::error!("Configuration error: {}", e);
        e
    })?;

    info!(
        broker_url = %config.broker_url,
        queue = %config.queue,
        durable_name = %config.durable_name,
        "Configuration loaded"
    );

    // Connect to database
    info!("Connecting to database...");
    let store = connect_store(&config).await?;

    // Verify connection
    let healthy = store.health_check().await?;
    info!(result = healthy, "Database health check passed");

    // The broker is not touched at boot: the consumer loop connects and
    // declares what it needs, retrying until the broker comes up.
    let broker = Arc::new(BrokerClient::new(BrokerConfig {
        url: config.broker_url.clone(),
        ..BrokerConfig::default()
    }));

    let processor = Arc::new(OrderProcessor::new(store));
    let consumer = ConsumerLoop::new(broker, processor, config.queue, config.durable_name);
    let consumer_shutdown = consumer.shutdown_handle();
    let consumer_handle = tokio::spawn(consumer.run());

    info!("Conveyor Worker initialized successfully");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    consumer_shutdown.notify_one();
    let _ = consumer_handle.await;

    info!("Shutdown complete");

    Ok(())
}

/// Open the order store named by the database URL and run its migrations.
async fn connect_store(config: &Config) -> Result<Arc<dyn OrderStore>> {
    if config.database_url.starts_with("postgres") {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await?;
        migrations::run_postgres(&pool).await?;
        Ok(Arc::new(PostgresOrderStore::new(pool)))
    } else {
        let path = config
            .database_url
            .trim_start_matches("sqlite://")
            .trim_start_matches("sqlite:");
        Ok(Arc::new(SqliteOrderStore::from_path(path).await?))
    }
}
