//! Flight entity and its state transitions.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::FlightUpdate;

/// Geographic position in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LatLong {
    pub latitude: f64,
    pub longitude: f64,
}

/// Controlling position: a facility and one of its sectors
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Owner {
    pub facility: String,
    pub sector: String,
}

impl Owner {
    pub fn new(facility: impl Into<String>, sector: impl Into<String>) -> Self {
        Self {
            facility: facility.into(),
            sector: sector.into(),
        }
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.facility, self.sector)
    }
}

/// Shape of the altitude element the value was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AltitudeKind {
    Simple,
    VfrPlus,
    VfrOnTopPlus,
}

/// Assigned altitude with its source shape
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Altitude {
    pub value: f64,
    pub unit: Option<String>,
    pub kind: AltitudeKind,
}

impl Altitude {
    /// VFR-on-top-plus clearance
    pub fn is_otp(&self) -> bool {
        self.kind == AltitudeKind::VfrOnTopPlus
    }

    /// VFR-plus clearance
    pub fn is_vfr(&self) -> bool {
        self.kind == AltitudeKind::VfrPlus
    }
}

/// Interim altitude as reported by the feed.
///
/// `Missing` means the element was not in the message, `Unset` means the
/// feed explicitly cleared it (`xsi:nil`). The two are never collapsed.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub enum InterimAltitude {
    #[default]
    Missing,
    Unset,
    Set(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HandoffStatus {
    Initiation,
    Update,
    TakeControl,
    Acceptance,
    Retraction,
    Failure,
}

impl HandoffStatus {
    /// Decode the `event` attribute of a handoff element
    pub fn from_event(event: &str) -> Option<Self> {
        match event.trim() {
            "INITIATION" => Some(Self::Initiation),
            "UPDATE" => Some(Self::Update),
            "TAKE_CONTROL" => Some(Self::TakeControl),
            "ACCEPTANCE" => Some(Self::Acceptance),
            "RETRACTION" => Some(Self::Retraction),
            "FAILURE" => Some(Self::Failure),
            _ => None,
        }
    }
}

/// Handoff data as carried by one feed record
#[derive(Debug, Clone, PartialEq)]
pub struct HandoffEvent {
    pub status: Option<HandoffStatus>,
    pub from: Option<Owner>,
    pub to: Owner,
}

/// Active handoff on a flight; `event_time` is when it was applied locally
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Handoff {
    pub status: Option<HandoffStatus>,
    pub from: Option<Owner>,
    pub to: Owner,
    pub event_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pointout {
    pub from: Owner,
    pub to: Owner,
}

/// Clearance information reported by the feed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Clearance {
    pub heading: Option<String>,
    pub speed: Option<String>,
    pub text: Option<String>,
}

/// Feed-reported flight data processing status
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum FlightStatus {
    Active,
    Dropped,
    Completed,
    Cancelled,
    Other(String),
}

impl FlightStatus {
    /// Terminal statuses remove the flight from the store
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FlightStatus::Dropped | FlightStatus::Completed | FlightStatus::Cancelled
        )
    }
}

impl From<&str> for FlightStatus {
    fn from(value: &str) -> Self {
        match value.trim() {
            "ACTIVE" => FlightStatus::Active,
            "DROPPED" => FlightStatus::Dropped,
            "COMPLETED" => FlightStatus::Completed,
            "CANCELLED" => FlightStatus::Cancelled,
            other => FlightStatus::Other(other.to_string()),
        }
    }
}

/// Where the datablock is drawn relative to the target symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DatablockPosition {
    N,
    NE,
    E,
    #[default]
    SE,
    S,
    SW,
    W,
    NW,
}

impl DatablockPosition {
    /// Numeric keypad layout: 8 is north, 3 is south-east.
    ///
    /// `5` and `0` have no direction.
    pub fn from_keypad(digit: char) -> Option<Self> {
        match digit {
            '7' => Some(Self::NW),
            '8' => Some(Self::N),
            '9' => Some(Self::NE),
            '4' => Some(Self::W),
            '6' => Some(Self::E),
            '1' => Some(Self::SW),
            '2' => Some(Self::S),
            '3' => Some(Self::SE),
            _ => None,
        }
    }
}

/// Operator overrides shown on the fourth datablock line
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FourthLine {
    pub heading: Option<String>,
    pub speed: Option<String>,
    pub free_text: Option<String>,
}

/// Display defaults applied to newly created flights
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayDefaults {
    pub datablock_position: DatablockPosition,
    pub leader_length: u8,
}

impl Default for DisplayDefaults {
    fn default() -> Self {
        Self {
            datablock_position: DatablockPosition::SE,
            leader_length: 1,
        }
    }
}

/// Display-only state. The feed never writes here; operator commands do.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayState {
    pub is_fdb_open: bool,
    pub datablock_position: DatablockPosition,
    pub leader_length: u8,
    pub fourth_line: FourthLine,
}

impl DisplayState {
    fn new(defaults: &DisplayDefaults, is_fdb_open: bool) -> Self {
        Self {
            is_fdb_open,
            datablock_position: defaults.datablock_position,
            leader_length: defaults.leader_length,
            fourth_line: FourthLine::default(),
        }
    }
}

/// One tracked flight, keyed by its guid.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Flight {
    guid: String,
    acid: String,
    cid: String,
    centre: Option<String>,
    source_timestamp: Option<String>,
    position: Option<LatLong>,
    current_altitude: Option<f64>,
    assigned_altitude: Option<Altitude>,
    interim_altitude: InterimAltitude,
    speed: Option<f64>,
    arrival: Option<String>,
    departure: Option<String>,
    route: Option<String>,
    aircraft_type: Option<String>,
    equipment_suffix: Option<String>,
    filed_cruise_speed: Option<f64>,
    assigned_beacon_code: Option<String>,
    current_beacon_code: Option<String>,
    clearance: Option<Clearance>,
    handoff: Option<Handoff>,
    pointout: Option<Pointout>,
    owner: Option<Owner>,
    display: DisplayState,
    last_seen_at: DateTime<Utc>,
}

impl Flight {
    /// Create a flight from its first update
    pub(crate) fn from_update(
        update: &FlightUpdate,
        current_position: &Owner,
        defaults: &DisplayDefaults,
        now: DateTime<Utc>,
    ) -> Self {
        let mut flight = Self {
            guid: update.guid.clone(),
            acid: update.acid.clone(),
            cid: update.cid.clone(),
            centre: None,
            source_timestamp: None,
            position: None,
            current_altitude: None,
            assigned_altitude: None,
            interim_altitude: InterimAltitude::Missing,
            speed: None,
            arrival: None,
            departure: None,
            route: None,
            aircraft_type: None,
            equipment_suffix: None,
            filed_cruise_speed: None,
            assigned_beacon_code: None,
            current_beacon_code: None,
            clearance: None,
            handoff: None,
            pointout: None,
            owner: None,
            display: DisplayState::new(defaults, false),
            last_seen_at: now,
        };
        flight.apply(update, current_position, now);
        flight
    }

    /// Merge an update into this flight.
    ///
    /// Only fields present in the update are written. Returns true when the
    /// controlling position changed, in which case the full datablock is
    /// opened or closed according to the current facility.
    pub(crate) fn apply(
        &mut self,
        update: &FlightUpdate,
        current_position: &Owner,
        now: DateTime<Utc>,
    ) -> bool {
        debug_assert_eq!(self.guid, update.guid);

        self.acid.clone_from(&update.acid);
        self.cid.clone_from(&update.cid);

        merge(&mut self.centre, &update.centre);
        merge(&mut self.source_timestamp, &update.source_timestamp);
        merge(&mut self.position, &update.position);
        merge(&mut self.current_altitude, &update.current_altitude);
        merge(&mut self.assigned_altitude, &update.assigned_altitude);
        merge(&mut self.speed, &update.speed);
        merge(&mut self.arrival, &update.arrival);
        merge(&mut self.departure, &update.departure);
        merge(&mut self.route, &update.route);
        merge(&mut self.aircraft_type, &update.aircraft_type);
        merge(&mut self.equipment_suffix, &update.equipment_suffix);
        merge(&mut self.filed_cruise_speed, &update.filed_cruise_speed);
        merge(&mut self.assigned_beacon_code, &update.assigned_beacon_code);
        merge(&mut self.current_beacon_code, &update.current_beacon_code);
        merge(&mut self.clearance, &update.clearance);
        merge(&mut self.pointout, &update.pointout);

        match update.interim_altitude {
            InterimAltitude::Missing => {}
            interim => self.interim_altitude = interim,
        }

        if let Some(event) = &update.handoff {
            let repeated = self.handoff.as_ref().is_some_and(|h| {
                h.status == event.status && h.from == event.from && h.to == event.to
            });
            if !repeated {
                self.handoff = Some(Handoff {
                    status: event.status,
                    from: event.from.clone(),
                    to: event.to.clone(),
                    event_time: now,
                });
            }
        }

        self.last_seen_at = now;

        match &update.owner {
            Some(owner) if self.owner.as_ref() != Some(owner) => {
                self.owner = Some(owner.clone());
                self.display.is_fdb_open = self.is_fdb_eligible(current_position);
                true
            }
            _ => false,
        }
    }

    pub fn guid(&self) -> &str {
        &self.guid
    }

    pub fn acid(&self) -> &str {
        &self.acid
    }

    pub fn cid(&self) -> &str {
        &self.cid
    }

    pub fn centre(&self) -> Option<&str> {
        self.centre.as_deref()
    }

    /// Feed timestamp of the latest record that carried one
    pub fn source_timestamp(&self) -> Option<&str> {
        self.source_timestamp.as_deref()
    }

    pub fn position(&self) -> Option<LatLong> {
        self.position
    }

    pub fn current_altitude(&self) -> Option<f64> {
        self.current_altitude
    }

    pub fn assigned_altitude(&self) -> Option<&Altitude> {
        self.assigned_altitude.as_ref()
    }

    pub fn interim_altitude(&self) -> InterimAltitude {
        self.interim_altitude
    }

    pub fn speed(&self) -> Option<f64> {
        self.speed
    }

    pub fn arrival(&self) -> Option<&str> {
        self.arrival.as_deref()
    }

    pub fn departure(&self) -> Option<&str> {
        self.departure.as_deref()
    }

    pub fn route(&self) -> Option<&str> {
        self.route.as_deref()
    }

    pub fn aircraft_type(&self) -> Option<&str> {
        self.aircraft_type.as_deref()
    }

    pub fn equipment_suffix(&self) -> Option<&str> {
        self.equipment_suffix.as_deref()
    }

    pub fn filed_cruise_speed(&self) -> Option<f64> {
        self.filed_cruise_speed
    }

    pub fn assigned_beacon_code(&self) -> Option<&str> {
        self.assigned_beacon_code.as_deref()
    }

    pub fn current_beacon_code(&self) -> Option<&str> {
        self.current_beacon_code.as_deref()
    }

    pub fn clearance(&self) -> Option<&Clearance> {
        self.clearance.as_ref()
    }

    pub fn handoff(&self) -> Option<&Handoff> {
        self.handoff.as_ref()
    }

    pub fn pointout(&self) -> Option<&Pointout> {
        self.pointout.as_ref()
    }

    pub fn owner(&self) -> Option<&Owner> {
        self.owner.as_ref()
    }

    pub fn display(&self) -> &DisplayState {
        &self.display
    }

    pub(crate) fn display_mut(&mut self) -> &mut DisplayState {
        &mut self.display
    }

    pub fn last_seen_at(&self) -> DateTime<Utc> {
        self.last_seen_at
    }

    pub fn is_being_handed_off_to(&self, owner: &Owner) -> bool {
        self.handoff.as_ref().is_some_and(|h| h.to == *owner)
    }

    pub fn is_being_pointed_out_to(&self, owner: &Owner) -> bool {
        self.pointout.as_ref().is_some_and(|p| p.to == *owner)
    }

    pub fn is_tracked_by(&self, owner: &Owner) -> bool {
        self.owner.as_ref() == Some(owner)
    }

    /// At or below FL230, feet as reported
    pub fn is_reduced_separation_eligible(&self) -> bool {
        self.current_altitude.is_some_and(|alt| alt <= 23_000.0)
    }

    pub fn has_fourth_line(&self) -> bool {
        let line = &self.display.fourth_line;
        line.heading.is_some() || line.speed.is_some() || line.free_text.is_some()
    }

    /// Owned by some sector of the facility we are working
    pub fn is_fdb_eligible(&self, current_position: &Owner) -> bool {
        self.owner
            .as_ref()
            .is_some_and(|o| o.facility == current_position.facility)
    }

    /// Flight plan readout shown in response to `QF`
    pub fn flight_plan_readout(&self, current_position: &Owner, now: DateTime<Utc>) -> String {
        let sector = match &self.owner {
            Some(owner) if owner.facility != current_position.facility => {
                format!("{}{}", facility_char(&owner.facility), owner.sector)
            }
            Some(owner) => owner.sector.clone(),
            None => "??".to_string(),
        };
        let assigned_altitude = self
            .assigned_altitude
            .as_ref()
            .map(|alt| format!("{:03}", (alt.value / 100.0) as i64))
            .unwrap_or_else(|| "0".to_string());
        let filed_speed = self
            .filed_cruise_speed
            .map(|speed| format!("{speed:.0}"))
            .unwrap_or_else(|| "0".to_string());

        format!(
            "{}\n{} {}({}) {}/{} {} {} {} {}",
            now.format("%H%M"),
            self.cid,
            self.acid,
            sector,
            self.aircraft_type.as_deref().unwrap_or("UNK"),
            self.equipment_suffix.as_deref().unwrap_or(""),
            self.assigned_beacon_code.as_deref().unwrap_or(""),
            filed_speed,
            assigned_altitude,
            self.route.as_deref().unwrap_or(""),
        )
    }
}

fn merge<T: Clone>(target: &mut Option<T>, source: &Option<T>) {
    if let Some(value) = source {
        *target = Some(value.clone());
    }
}

/// One-letter code used when showing another facility's sector
pub fn facility_char(facility: &str) -> char {
    match facility {
        "ZNY" => 'N',
        "ZBW" => 'B',
        "ZDC" => 'W',
        "ZOB" => 'C',
        "ACY" => 'Y',
        "BBB" => 'G',
        "JST" => 'F',
        "NVF" => 'K',
        "ROC" => 'T',
        "RRR" => 'D',
        "WWW" => 'V',
        "ZJX" => 'J',
        "ZTL" => 'T',
        "ZMA" => 'Z',
        "ZHU" => 'H',
        "CLT" => 'E',
        "TPA" => 'D',
        other => other.chars().next().unwrap_or('X'),
    }
}
