//! Flight-state synchronization daemon

use eram_sync::{
    config::{AppConfig, TransportConfig},
    engine::{run_eviction, run_ingestion, run_snapshots, FlightTable},
    errors::EramError,
    files,
    models::MessageParser,
    mqtt::MqttClientBuilder,
    store::FlightStore,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), EramError> {
    #[cfg(feature = "dotenvy")]
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::load()?;
    config.validate()?;

    let position = config.current_position();
    info!("Working position {}", position);

    let parser = MessageParser::with_dump_path(&config.diagnostics.failed_payload_path);
    let table = FlightTable::new(FlightStore::new(config.store_settings()), position, parser)
        .with_message_timestamps(config.logging.message_timestamps);

    let shutdown = CancellationToken::new();
    let (tx, rx) = mpsc::channel(config.channel_capacity);

    let _mqtt_client = match &config.transport {
        TransportConfig::Mqtt(mqtt) => Some(MqttClientBuilder::new(mqtt)?.connect(tx).await?),
        TransportConfig::Files(replay) => {
            let replay = replay.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                if let Err(e) = files::replay(replay, tx, shutdown).await {
                    error!("Replay stopped: {}", e);
                }
            });
            None
        }
    };

    if let Some(snapshot) = &config.snapshot {
        tokio::spawn(run_snapshots(
            table.clone(),
            snapshot.path.clone(),
            snapshot.interval,
            shutdown.clone(),
        ));
    }

    tokio::spawn(run_eviction(
        table.clone(),
        config.store.sweep_interval,
        shutdown.clone(),
    ));
    tokio::spawn(run_console(table.clone(), shutdown.clone()));

    let ingestion = tokio::spawn(run_ingestion(table, rx, shutdown.clone()));

    signal::ctrl_c().await?;
    info!("Received shutdown signal");
    shutdown.cancel();

    match ingestion.await {
        Ok(processed) => info!("Ingestion completed after {} messages", processed),
        Err(e) => error!("Ingestion task failed: {}", e),
    }

    Ok(())
}

/// Read operator commands from stdin, one per line
async fn run_console(table: FlightTable, shutdown: CancellationToken) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.next_line() => line,
        };
        match line {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match table.execute(&line.to_uppercase()).await {
                    Ok(feedback) => println!("{feedback}"),
                    Err(e) => println!("{e}"),
                }
            }
            Ok(None) => break,
            Err(e) => {
                error!("Failed to read operator input: {}", e);
                break;
            }
        }
    }
}
