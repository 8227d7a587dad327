//! Shared flight table and the ingestion loop.
//!
//! All store mutation goes through one write lock held for exactly one
//! payload. Readers clone what they need under the read lock, so a
//! renderer never sees a half-applied batch.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::command::{apply_command, Command};
use crate::errors::{CommandError, EramError, ParseError};
use crate::flight::{Flight, Owner};
use crate::models::MessageParser;
use crate::store::{FlightStore, UpdateReport};

#[derive(Debug)]
struct EngineState {
    store: FlightStore,
    position: Owner,
}

/// Latitude/longitude box used to pick the flights worth drawing
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min_latitude: f64,
    pub max_latitude: f64,
    pub min_longitude: f64,
    pub max_longitude: f64,
}

impl Bounds {
    fn contains(&self, flight: &Flight) -> bool {
        flight.position().is_some_and(|p| {
            (self.min_latitude..=self.max_latitude).contains(&p.latitude)
                && (self.min_longitude..=self.max_longitude).contains(&p.longitude)
        })
    }
}

/// Cloneable handle to the live flight table
#[derive(Debug, Clone)]
pub struct FlightTable {
    state: Arc<RwLock<EngineState>>,
    parser: Arc<MessageParser>,
    log_timestamps: bool,
}

impl FlightTable {
    pub fn new(store: FlightStore, position: Owner, parser: MessageParser) -> Self {
        Self {
            state: Arc::new(RwLock::new(EngineState { store, position })),
            parser: Arc::new(parser),
            log_timestamps: false,
        }
    }

    /// Log every processed record with its processing time
    pub fn with_message_timestamps(mut self, enabled: bool) -> Self {
        self.log_timestamps = enabled;
        self
    }

    /// Decode one payload and apply it to the store
    pub async fn ingest(&self, payload: &str) -> Result<UpdateReport, ParseError> {
        self.ingest_at(payload, Utc::now()).await
    }

    /// [`FlightTable::ingest`] with an explicit clock
    pub async fn ingest_at(
        &self,
        payload: &str,
        now: DateTime<Utc>,
    ) -> Result<UpdateReport, ParseError> {
        let records = self.parser.decode(payload).await?;

        if self.log_timestamps {
            for update in records.iter().flatten() {
                info!("[{}]: Processing flight with GUID: {}", now, update.guid);
            }
        }

        let mut state = self.state.write().await;
        let EngineState { store, position } = &mut *state;
        Ok(store.update(records, position, now))
    }

    /// Run staleness eviction without new data
    pub async fn evict_stale(&self, now: DateTime<Utc>) -> Vec<String> {
        self.state.write().await.store.evict_stale(now)
    }

    /// Copy of every live flight, ordered by callsign
    pub async fn snapshot(&self) -> Vec<Flight> {
        let state = self.state.read().await;
        let mut flights: Vec<Flight> = state.store.flights().cloned().collect();
        flights.sort_by(|a, b| a.acid().cmp(b.acid()).then_with(|| a.guid().cmp(b.guid())));
        flights
    }

    /// Flights with a known position inside `bounds`
    pub async fn visible(&self, bounds: &Bounds) -> Vec<Flight> {
        let mut flights = self.snapshot().await;
        flights.retain(|flight| bounds.contains(flight));
        flights
    }

    pub async fn find_by_flid(&self, flid: &str) -> Option<Flight> {
        self.state.read().await.store.find_by_flid(flid).cloned()
    }

    pub async fn position(&self) -> Owner {
        self.state.read().await.position.clone()
    }

    /// Parse and apply one line of operator input
    pub async fn execute(&self, input: &str) -> Result<String, CommandError> {
        let command = Command::parse(input)?;
        self.apply(&command, Utc::now()).await
    }

    /// Apply a parsed command, returning operator feedback
    pub async fn apply(&self, command: &Command, now: DateTime<Utc>) -> Result<String, CommandError> {
        let mut state = self.state.write().await;
        let EngineState { store, position } = &mut *state;

        match command {
            Command::ChangeSector { sector_id } => {
                info!("Changing sector {} -> {}", position.sector, sector_id);
                position.sector.clone_from(sector_id);
                Ok(format!("ACCEPT\n{command}"))
            }
            _ => {
                let flid = command.flid().unwrap_or_default();
                let defaults = store.settings().display;
                let flight = store
                    .find_by_flid_mut(flid)
                    .ok_or_else(|| CommandError::UnknownFlid(flid.to_string()))?;
                apply_command(command, flight, position, &defaults, now)
            }
        }
    }
}

/// Drain `rx` into the table until the channel closes or `shutdown` fires.
///
/// Cancellation is only observed between messages; a payload that has been
/// received is always applied completely. Returns the number of payloads
/// processed.
pub async fn run_ingestion(
    table: FlightTable,
    mut rx: mpsc::Receiver<String>,
    shutdown: CancellationToken,
) -> usize {
    let mut processed = 0;
    loop {
        let payload = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                info!("Ingestion stopping on shutdown");
                break;
            }
            payload = rx.recv() => match payload {
                Some(payload) => payload,
                None => {
                    info!("Message channel closed");
                    break;
                }
            },
        };

        processed += 1;
        match table.ingest(&payload).await {
            Ok(report) => {
                if !report.failures.is_empty() {
                    warn!("{} record(s) in message could not be decoded", report.failures.len());
                }
            }
            Err(e) => error!("Message processing error: {}", e),
        }
    }
    processed
}

#[derive(Serialize)]
struct Snapshot<'a> {
    taken_at: DateTime<Utc>,
    position: &'a Owner,
    flights: &'a [Flight],
}

/// Write the current table as JSON to `path`
pub async fn write_snapshot(table: &FlightTable, path: &Path) -> Result<usize, EramError> {
    let position = table.position().await;
    let flights = table.snapshot().await;
    let body = serde_json::to_vec_pretty(&Snapshot {
        taken_at: Utc::now(),
        position: &position,
        flights: &flights,
    })?;
    tokio::fs::write(path, body).await?;
    Ok(flights.len())
}

/// Evict stale flights every `interval` until shutdown, so flights expire
/// while the feed is silent
pub async fn run_eviction(table: FlightTable, interval: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let evicted = table.evict_stale(Utc::now()).await;
                if !evicted.is_empty() {
                    info!("Evicted {} stale flight(s) without feed traffic", evicted.len());
                }
            }
        }
    }
}

/// Periodically dump snapshots until shutdown
pub async fn run_snapshots(
    table: FlightTable,
    path: std::path::PathBuf,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = write_snapshot(&table, &path).await {
                    error!("Failed to write snapshot to {}: {}", path.display(), e);
                }
            }
        }
    }
}
