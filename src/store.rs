//! Indexed flight store.
//!
//! Flights are keyed by guid. Secondary ACID and CID indexes map to the
//! guid most recently written with that identifier; they are repointed and
//! cleaned inside the same [`FlightStore::update`] call that changes the
//! primary table, so callers never observe an index entry for a removed
//! flight.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::errors::ParseError;
use crate::flight::{DisplayDefaults, Flight, Owner};
use crate::models::FlightUpdate;

/// Store tunables
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StoreSettings {
    /// Flights not seen for longer than this are evicted
    pub stale_after: Duration,
    pub display: DisplayDefaults,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(300),
            display: DisplayDefaults::default(),
        }
    }
}

/// Outcome of one [`FlightStore::update`] call
#[derive(Debug, Default, PartialEq)]
pub struct UpdateReport {
    pub created: usize,
    pub updated: usize,
    /// Guids removed because of a terminal status
    pub removed: Vec<String>,
    /// Guids removed because they went stale
    pub evicted: Vec<String>,
    /// Records that could not be decoded, in feed order
    pub failures: Vec<ParseError>,
}

#[derive(Debug, Default)]
pub struct FlightStore {
    settings: StoreSettings,
    flights: HashMap<String, Flight>,
    acid_index: HashMap<String, String>,
    cid_index: HashMap<String, String>,
}

impl FlightStore {
    pub fn new(settings: StoreSettings) -> Self {
        Self {
            settings,
            ..Default::default()
        }
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    pub fn len(&self) -> usize {
        self.flights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flights.is_empty()
    }

    /// All live flights, in no particular order
    pub fn flights(&self) -> impl Iterator<Item = &Flight> {
        self.flights.values()
    }

    /// Apply one decoded batch, then evict stale flights.
    ///
    /// Well-formed records are applied in order; failed records are
    /// collected into the report and skipped.
    pub fn update<I>(&mut self, records: I, current_position: &Owner, now: DateTime<Utc>) -> UpdateReport
    where
        I: IntoIterator<Item = Result<FlightUpdate, ParseError>>,
    {
        let mut report = UpdateReport::default();

        for record in records {
            let update = match record {
                Ok(update) => update,
                Err(e) => {
                    warn!("Skipping record: {}", e);
                    report.failures.push(e);
                    continue;
                }
            };

            if self.upsert(&update, current_position, now) {
                report.created += 1;
            } else {
                report.updated += 1;
            }

            if update.is_terminal() {
                debug!(
                    "Removing {} ({}): status {:?}",
                    update.acid, update.guid, update.status
                );
                if self.remove(&update.guid).is_some() {
                    report.removed.push(update.guid);
                }
            }
        }

        report.evicted = self.evict_stale(now);
        report
    }

    /// Insert or merge one update; returns true when the flight is new
    fn upsert(&mut self, update: &FlightUpdate, current_position: &Owner, now: DateTime<Utc>) -> bool {
        let created = match self.flights.get_mut(&update.guid) {
            Some(flight) => {
                let old_acid = (flight.acid() != update.acid).then(|| flight.acid().to_string());
                let old_cid = (flight.cid() != update.cid).then(|| flight.cid().to_string());
                if flight.apply(update, current_position, now) {
                    debug!("{} now owned by {:?}", update.acid, flight.owner());
                }
                if let Some(acid) = old_acid {
                    release(&mut self.acid_index, &self.flights, &acid, &update.guid, Flight::acid);
                }
                if let Some(cid) = old_cid {
                    release(&mut self.cid_index, &self.flights, &cid, &update.guid, Flight::cid);
                }
                false
            }
            None => {
                let flight =
                    Flight::from_update(update, current_position, &self.settings.display, now);
                self.flights.insert(update.guid.clone(), flight);
                true
            }
        };

        // Last writer wins, even when another live flight holds the identifier.
        self.acid_index
            .insert(update.acid.clone(), update.guid.clone());
        self.cid_index.insert(update.cid.clone(), update.guid.clone());
        created
    }

    /// Remove a flight and release its index entries
    fn remove(&mut self, guid: &str) -> Option<Flight> {
        let flight = self.flights.remove(guid)?;
        release(&mut self.acid_index, &self.flights, flight.acid(), guid, Flight::acid);
        release(&mut self.cid_index, &self.flights, flight.cid(), guid, Flight::cid);
        Some(flight)
    }

    /// Remove every flight last seen more than `stale_after` before `now`
    pub fn evict_stale(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let stale_after = self.settings.stale_after;
        let stale: Vec<String> = self
            .flights
            .values()
            .filter(|flight| {
                now.signed_duration_since(flight.last_seen_at())
                    .to_std()
                    .is_ok_and(|age| age > stale_after)
            })
            .map(|flight| flight.guid().to_string())
            .collect();

        for guid in &stale {
            if let Some(flight) = self.remove(guid) {
                info!("Dropping stale flight {} ({})", flight.acid(), guid);
            }
        }
        stale
    }

    pub fn find_by_guid(&self, guid: &str) -> Option<&Flight> {
        self.flights.get(guid)
    }

    pub fn find_by_acid(&self, acid: &str) -> Option<&Flight> {
        self.acid_index
            .get(acid)
            .and_then(|guid| self.flights.get(guid))
    }

    pub fn find_by_cid(&self, cid: &str) -> Option<&Flight> {
        self.cid_index
            .get(cid)
            .and_then(|guid| self.flights.get(guid))
    }

    /// Resolve an operator flight id: CID first, then ACID
    pub fn find_by_flid(&self, flid: &str) -> Option<&Flight> {
        self.find_by_cid(flid).or_else(|| self.find_by_acid(flid))
    }

    pub fn find_by_flid_mut(&mut self, flid: &str) -> Option<&mut Flight> {
        let guid = self
            .cid_index
            .get(flid)
            .filter(|guid| self.flights.contains_key(*guid))
            .or_else(|| self.acid_index.get(flid))?
            .clone();
        self.flights.get_mut(&guid)
    }
}

/// Drop `key` from `index` if it points at `guid`.
///
/// When another live flight still carries the identifier, the entry is
/// handed to the most recently seen one.
fn release(
    index: &mut HashMap<String, String>,
    flights: &HashMap<String, Flight>,
    key: &str,
    guid: &str,
    identifier: fn(&Flight) -> &str,
) {
    if index.get(key).map(String::as_str) != Some(guid) {
        return;
    }
    match flights
        .values()
        .filter(|flight| identifier(flight) == key)
        .max_by_key(|flight| flight.last_seen_at())
    {
        Some(holder) => {
            index.insert(key.to_string(), holder.guid().to_string());
        }
        None => {
            index.remove(key);
        }
    }
}
