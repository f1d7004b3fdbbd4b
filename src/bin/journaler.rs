//! FIXM journaler daemon.
//!
//! Wires the collaborators together: reads FIXM message collections from
//! NATS JetStream, pushes them through the ingestion pipeline, and journals
//! the resulting records to InfluxDB. Ctrl-C triggers a graceful shutdown
//! that force-flushes partially filled batches.

use std::process;
use std::sync::Arc;

use fixm_journaler::{Broker, Config, HookRegistry, InfluxWriter, Pipeline};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Load environment variables
    dotenv::dotenv().ok();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "configuration error");
            process::exit(1);
        }
    };

    // Connect to InfluxDB and provision the database + retention policy
    let writer = InfluxWriter::connect(config.influx(), &config.influxdb_retention_duration)
        .await
        .expect("Failed to initialize InfluxDB");
    tracing::info!(database = %config.influxdb_database, "connected to InfluxDB");

    let hooks = Arc::new(HookRegistry::standard());
    let pipeline = Pipeline::start(config.pipeline(), Arc::new(writer), hooks);
    let intake = pipeline.intake();

    // Connect to NATS (retries until reachable) and declare the stream
    let broker = Broker::connect(config.broker())
        .await
        .expect("Failed to declare the FIXM stream");

    tokio::select! {
        result = broker.consume(intake) => {
            if let Err(err) = result {
                tracing::error!(error = %err, "broker consumer terminated");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    pipeline.shutdown().await;
}
