//! Feed message models.
//!
//! The feed delivers one `MessageCollection` envelope per payload, each
//! `message` carrying one `flight` record. The envelope is checked for
//! well-formed markup first; every `message` is then deserialized and
//! normalized into a [`FlightUpdate`] on its own, failing per record.
//! Wire structures mirror the XML element tree and every optional element
//! is an `Option`, so an absent element stays distinguishable from a
//! default value.

use std::path::PathBuf;

use quick_xml::events::Event;
use quick_xml::Reader;
use serde::Deserialize;
use tracing::{error, warn};

use crate::errors::ParseError;
use crate::flight::{
    Altitude, AltitudeKind, Clearance, FlightStatus, HandoffEvent, HandoffStatus,
    InterimAltitude, LatLong, Owner, Pointout,
};

/// Normalized flight update, one per feed record.
///
/// Fields left `None` (or [`InterimAltitude::Missing`]) were absent from
/// the record and must not overwrite stored state.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FlightUpdate {
    pub guid: String,
    pub acid: String,
    pub cid: String,
    pub centre: Option<String>,
    /// Feed timestamp attribute, kept verbatim
    pub source_timestamp: Option<String>,
    pub status: Option<FlightStatus>,
    pub position: Option<LatLong>,
    pub current_altitude: Option<f64>,
    pub assigned_altitude: Option<Altitude>,
    pub interim_altitude: InterimAltitude,
    pub speed: Option<f64>,
    pub arrival: Option<String>,
    pub departure: Option<String>,
    pub route: Option<String>,
    pub aircraft_type: Option<String>,
    pub equipment_suffix: Option<String>,
    pub filed_cruise_speed: Option<f64>,
    pub assigned_beacon_code: Option<String>,
    pub current_beacon_code: Option<String>,
    pub clearance: Option<Clearance>,
    pub owner: Option<Owner>,
    pub handoff: Option<HandoffEvent>,
    pub pointout: Option<Pointout>,
}

impl FlightUpdate {
    /// Update carrying identity only
    pub fn new(guid: impl Into<String>, acid: impl Into<String>, cid: impl Into<String>) -> Self {
        Self {
            guid: guid.into(),
            acid: acid.into(),
            cid: cid.into(),
            ..Default::default()
        }
    }

    /// Terminal status removes the flight after the merge
    pub fn is_terminal(&self) -> bool {
        self.status.as_ref().is_some_and(FlightStatus::is_terminal)
    }
}

/// Decoded envelope: one entry per record, in feed order
pub type DecodedBatch = Vec<Result<FlightUpdate, ParseError>>;

/// Decodes raw feed payloads.
#[derive(Debug, Clone, Default)]
pub struct MessageParser {
    dump_path: Option<PathBuf>,
}

impl MessageParser {
    /// Parser that writes undecodable payloads to `dump_path`
    pub fn with_dump_path(dump_path: impl Into<PathBuf>) -> Self {
        Self {
            dump_path: Some(dump_path.into()),
        }
    }

    /// Decode one envelope.
    ///
    /// Markup that is not well formed fails the whole payload. Each
    /// `message` is then decoded on its own, so a bad record yields an `Err`
    /// entry in the returned batch and does not affect its siblings.
    pub fn parse(&self, payload: &str) -> Result<DecodedBatch, ParseError> {
        let records = split_messages(payload).map_err(|reason| ParseError::Envelope {
            reason,
            payload: payload.to_string(),
        })?;

        Ok(records
            .into_iter()
            .enumerate()
            .map(|(index, record)| {
                quick_xml::de::from_str::<Message>(record)
                    .map_err(|e| ParseError::Record {
                        index,
                        guid: None,
                        reason: e.to_string(),
                    })
                    .and_then(|message| normalize(index, message))
            })
            .collect())
    }

    /// [`MessageParser::parse`], writing the payload to the diagnostic
    /// location when the envelope cannot be decoded
    pub async fn decode(&self, payload: &str) -> Result<DecodedBatch, ParseError> {
        let result = self.parse(payload);
        if result.is_err() {
            self.dump(payload).await;
        }
        result
    }

    /// Best-effort dump; failure is logged and otherwise ignored
    async fn dump(&self, payload: &str) {
        let Some(path) = &self.dump_path else {
            return;
        };
        match tokio::fs::write(path, payload).await {
            Ok(()) => warn!("Undecodable payload written to {}", path.display()),
            Err(e) => error!("Failed to write payload to {}: {}", path.display(), e),
        }
    }
}

/// Slice the raw text of every `message` element directly under the root.
///
/// The whole payload is read, so unbalanced or mismatched tags anywhere
/// are reported here rather than as record failures.
fn split_messages(payload: &str) -> Result<Vec<&str>, String> {
    let mut reader = Reader::from_str(payload);
    let mut records = Vec::new();
    let mut depth = 0usize;
    let mut record_start = None;
    let mut has_root = false;

    loop {
        let event = reader.read_event().map_err(|e| e.to_string())?;
        let end = reader.buffer_position() as usize;
        // '<' cannot appear inside a tag, so the last one before `end` opens it
        let tag_start = || payload[..end].rfind('<').unwrap_or_default();

        match event {
            Event::Start(e) => {
                if depth == 1 && e.local_name().as_ref() == b"message" {
                    record_start = Some(tag_start());
                }
                has_root = true;
                depth += 1;
            }
            Event::Empty(e) => {
                if depth == 1 && e.local_name().as_ref() == b"message" {
                    records.push(&payload[tag_start()..end]);
                }
                has_root = true;
            }
            Event::End(_) => {
                depth = depth.saturating_sub(1);
                if depth == 1 {
                    if let Some(start) = record_start.take() {
                        records.push(&payload[start..end]);
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !has_root {
        return Err("missing root element".to_string());
    }
    if depth != 0 {
        return Err(format!("{depth} unclosed element(s) at end of payload"));
    }
    Ok(records)
}

fn normalize(index: usize, message: Message) -> Result<FlightUpdate, ParseError> {
    let record_error = |guid: Option<&str>, reason: String| ParseError::Record {
        index,
        guid: guid.map(str::to_string),
        reason,
    };

    let Some(flight) = message.flight else {
        return Err(record_error(None, "missing flight element".to_string()));
    };

    let guid = flight
        .gufi
        .as_ref()
        .and_then(|g| non_empty(g.value.as_deref()))
        .ok_or_else(|| record_error(None, "missing gufi".to_string()))?;
    let fail = |reason: String| record_error(Some(&guid), reason);

    let identification = flight
        .flight_identification
        .as_ref()
        .ok_or_else(|| fail("missing flightIdentification".to_string()))?;
    let cid = non_empty(identification.computer_id.as_deref())
        .ok_or_else(|| fail("missing computerId".to_string()))?;
    let acid = non_empty(identification.aircraft_identification.as_deref())
        .ok_or_else(|| fail("missing aircraftIdentification".to_string()))?;

    let mut update = FlightUpdate::new(guid.clone(), acid, cid);
    update.centre = flight.centre;
    update.source_timestamp = flight.timestamp;
    update.status = flight
        .flight_status
        .and_then(|s| s.status)
        .map(|s| FlightStatus::from(s.as_str()));

    update.assigned_altitude = flight
        .assigned_altitude
        .map(|a| a.decode())
        .transpose()
        .map_err(&fail)?;
    update.interim_altitude = match flight.interim_altitude {
        None => InterimAltitude::Missing,
        Some(interim) if interim.is_null() => InterimAltitude::Unset,
        Some(interim) => {
            let value = interim.value.as_deref().unwrap_or_default();
            InterimAltitude::Set(parse_number("interimAltitude", value).map_err(&fail)?)
        }
    };

    update.arrival = flight.arrival.and_then(|a| a.arrival_point);
    update.departure = flight.departure.and_then(|d| d.departure_point);
    update.route = flight
        .agreed
        .and_then(|a| a.route)
        .and_then(|r| r.route_text);
    if let Some(aircraft) = flight.aircraft_description {
        update.equipment_suffix = aircraft.equipment_qualifier;
        update.aircraft_type = aircraft
            .aircraft_type
            .and_then(|t| t.icao_model_identifier)
            .and_then(|m| non_empty(m.value.as_deref()));
    }
    update.filed_cruise_speed = flight
        .requested_airspeed
        .and_then(|r| r.nas_airspeed)
        .map(|v| parse_number("requestedAirspeed", v.text()))
        .transpose()
        .map_err(&fail)?;
    update.owner = flight.controlling_unit.map(UnitReference::into_owner);

    if let Some(en_route) = flight.en_route {
        if let Some(beacon) = en_route.beacon_code_assignment {
            update.assigned_beacon_code = beacon
                .reassigned_beacon_code
                .clone()
                .or_else(|| beacon.current_beacon_code.clone());
            update.current_beacon_code = beacon.current_beacon_code;
        }

        if let Some(handoff) = en_route.boundary_crossings.and_then(|b| b.handoff) {
            update.handoff = Some(handoff.decode().map_err(&fail)?);
        }

        if let Some(pointout) = en_route.pointout {
            update.pointout = Some(pointout.decode().map_err(&fail)?);
        }

        if let Some(cleared) = en_route.cleared {
            update.clearance = Some(Clearance {
                heading: cleared.clearance_heading,
                speed: cleared.clearance_speed,
                text: cleared.clearance_text,
            });
        }

        if let Some(position) = en_route.position {
            update.current_altitude = position
                .altitude
                .map(|a| parse_number("altitude", a.text()))
                .transpose()
                .map_err(&fail)?;
            update.speed = position
                .actual_speed
                .and_then(|s| s.surveillance)
                .map(|s| parse_number("actualSpeed", s.text()))
                .transpose()
                .map_err(&fail)?;
            update.position = position
                .position
                .and_then(|p| p.location)
                .and_then(|l| l.pos)
                .map(|pos| parse_lat_long(&pos))
                .transpose()
                .map_err(&fail)?;
        }
    }

    Ok(update)
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Finite decimal; `NaN` and infinities are rejected
fn parse_number(field: &str, value: &str) -> Result<f64, String> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| format!("invalid {field} value {value:?}"))
}

/// Parse a `"lat long"` coordinate string
fn parse_lat_long(pos: &str) -> Result<LatLong, String> {
    let mut tokens = pos.split_whitespace();
    let (Some(lat), Some(long)) = (tokens.next(), tokens.next()) else {
        return Err(format!("invalid position {pos:?}"));
    };
    let latitude = parse_number("latitude", lat)?;
    let longitude = parse_number("longitude", long)?;
    if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
        return Err(format!("position {pos:?} out of range"));
    }
    Ok(LatLong {
        latitude,
        longitude,
    })
}

// Wire structures for one `message` element. Element names are matched on
// their local name; attribute names keep their prefix.

#[derive(Debug, Deserialize)]
struct Message {
    flight: Option<NasFlight>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NasFlight {
    #[serde(rename = "@centre")]
    centre: Option<String>,
    #[serde(rename = "@timestamp")]
    timestamp: Option<String>,
    agreed: Option<Agreed>,
    aircraft_description: Option<NasAircraft>,
    arrival: Option<NasArrival>,
    assigned_altitude: Option<AssignedAltitude>,
    controlling_unit: Option<UnitReference>,
    departure: Option<NasDeparture>,
    en_route: Option<NasEnRoute>,
    flight_identification: Option<FlightIdentification>,
    flight_status: Option<NasFlightStatus>,
    gufi: Option<TextValue>,
    interim_altitude: Option<NullableUnitAndValue>,
    requested_airspeed: Option<RequestedAirspeed>,
}

#[derive(Debug, Deserialize)]
struct TextValue {
    #[serde(rename = "$text")]
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UnitAndValue {
    #[serde(rename = "@uom")]
    unit: Option<String>,
    #[serde(rename = "$text")]
    value: Option<String>,
}

impl UnitAndValue {
    fn text(&self) -> &str {
        self.value.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct NullableUnitAndValue {
    #[serde(rename = "@xsi:nil", alias = "@nil")]
    nil: Option<String>,
    #[serde(rename = "$text")]
    value: Option<String>,
}

impl NullableUnitAndValue {
    fn is_null(&self) -> bool {
        self.nil.as_deref().map(str::trim) == Some("true")
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssignedAltitude {
    simple: Option<UnitAndValue>,
    vfr_on_top_plus: Option<UnitAndValue>,
    vfr_plus: Option<UnitAndValue>,
}

impl AssignedAltitude {
    /// First match wins: simple, then VFR-plus, then VFR-on-top-plus
    fn decode(self) -> Result<Altitude, String> {
        let (kind, source) = if let Some(v) = self.simple {
            (AltitudeKind::Simple, v)
        } else if let Some(v) = self.vfr_plus {
            (AltitudeKind::VfrPlus, v)
        } else if let Some(v) = self.vfr_on_top_plus {
            (AltitudeKind::VfrOnTopPlus, v)
        } else {
            return Err("no assigned altitude value found".to_string());
        };

        Ok(Altitude {
            value: parse_number("assignedAltitude", source.text())?,
            unit: source.unit,
            kind,
        })
    }
}

#[derive(Debug, Deserialize)]
struct Agreed {
    route: Option<NasRoute>,
}

#[derive(Debug, Deserialize)]
struct NasRoute {
    #[serde(rename = "@nasRouteText")]
    route_text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NasAircraft {
    #[serde(rename = "@equipmentQualifier")]
    equipment_qualifier: Option<String>,
    aircraft_type: Option<AircraftType>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AircraftType {
    icao_model_identifier: Option<TextValue>,
}

#[derive(Debug, Deserialize)]
struct NasArrival {
    #[serde(rename = "@arrivalPoint")]
    arrival_point: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NasDeparture {
    #[serde(rename = "@departurePoint")]
    departure_point: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UnitReference {
    #[serde(rename = "@unitIdentifier", default)]
    unit_identifier: String,
    #[serde(rename = "@sectorIdentifier", default)]
    sector_identifier: String,
}

impl UnitReference {
    fn into_owner(self) -> Owner {
        Owner::new(self.unit_identifier, self.sector_identifier)
    }
}

#[derive(Debug, Deserialize)]
struct FlightIdentification {
    #[serde(rename = "@computerId")]
    computer_id: Option<String>,
    #[serde(rename = "@aircraftIdentification")]
    aircraft_identification: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NasFlightStatus {
    #[serde(rename = "@fdpsFlightStatus")]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestedAirspeed {
    nas_airspeed: Option<UnitAndValue>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NasEnRoute {
    beacon_code_assignment: Option<BeaconCodeAssignment>,
    boundary_crossings: Option<BoundaryCrossings>,
    cleared: Option<ClearedFlightInfo>,
    pointout: Option<NasPointout>,
    position: Option<AircraftPosition>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BeaconCodeAssignment {
    current_beacon_code: Option<String>,
    reassigned_beacon_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BoundaryCrossings {
    handoff: Option<NasHandoff>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NasHandoff {
    #[serde(rename = "@event")]
    event: Option<String>,
    receiving_unit: Option<UnitReference>,
    transferring_unit: Option<UnitReference>,
}

impl NasHandoff {
    fn decode(self) -> Result<HandoffEvent, String> {
        let status = match self.event.as_deref() {
            None => None,
            Some(event) => Some(
                HandoffStatus::from_event(event)
                    .ok_or_else(|| format!("unknown handoff event {event:?}"))?,
            ),
        };
        let to = self
            .receiving_unit
            .ok_or_else(|| "handoff without receivingUnit".to_string())?
            .into_owner();

        Ok(HandoffEvent {
            status,
            from: self.transferring_unit.map(UnitReference::into_owner),
            to,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NasPointout {
    originating_unit: Option<UnitReference>,
    receiving_unit: Option<UnitReference>,
}

impl NasPointout {
    fn decode(self) -> Result<Pointout, String> {
        match (self.originating_unit, self.receiving_unit) {
            (Some(from), Some(to)) => Ok(Pointout {
                from: from.into_owner(),
                to: to.into_owner(),
            }),
            _ => Err("pointout requires originatingUnit and receivingUnit".to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ClearedFlightInfo {
    #[serde(rename = "@clearanceHeading")]
    clearance_heading: Option<String>,
    #[serde(rename = "@clearanceSpeed")]
    clearance_speed: Option<String>,
    #[serde(rename = "@clearanceText")]
    clearance_text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AircraftPosition {
    actual_speed: Option<ActualSpeed>,
    altitude: Option<UnitAndValue>,
    position: Option<LocationPoint>,
}

#[derive(Debug, Deserialize)]
struct ActualSpeed {
    surveillance: Option<UnitAndValue>,
}

#[derive(Debug, Deserialize)]
struct LocationPoint {
    location: Option<Pos>,
}

#[derive(Debug, Deserialize)]
struct Pos {
    pos: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_MESSAGE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ns5:MessageCollection xmlns:ns5="us:gov:dot:faa:atm:tfm:flightdata" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
  <message>
    <flight centre="ZJX" timestamp="2024-10-01T12:30:00Z">
      <agreed><route nasRouteText="KMCO..OMN.J53.CRG..KJFK"/></agreed>
      <aircraftDescription equipmentQualifier="L">
        <aircraftType><icaoModelIdentifier>B738</icaoModelIdentifier></aircraftType>
      </aircraftDescription>
      <arrival arrivalPoint="KJFK"/>
      <assignedAltitude><simple uom="FEET">35000.0</simple></assignedAltitude>
      <controllingUnit unitIdentifier="ZJX" sectorIdentifier="66"/>
      <departure departurePoint="KMCO"/>
      <enRoute>
        <beaconCodeAssignment>
          <currentBeaconCode>4521</currentBeaconCode>
        </beaconCodeAssignment>
        <boundaryCrossings>
          <handoff event="INITIATION">
            <receivingUnit unitIdentifier="ZDC" sectorIdentifier="32"/>
            <transferringUnit unitIdentifier="ZJX" sectorIdentifier="66"/>
          </handoff>
        </boundaryCrossings>
        <cleared clearanceHeading="H270" clearanceSpeed="S250"/>
        <position>
          <actualSpeed><surveillance uom="KNOTS">452</surveillance></actualSpeed>
          <altitude uom="FEET">33800</altitude>
          <position><location><pos>30.4942 -81.6879</pos></location></position>
        </position>
      </enRoute>
      <flightIdentification computerId="123" aircraftIdentification="UAL123"/>
      <flightStatus fdpsFlightStatus="ACTIVE"/>
      <gufi codeSpace="urn:uuid">KN94856800</gufi>
      <interimAltitude uom="FEET">24000</interimAltitude>
      <requestedAirspeed><nasAirspeed uom="KNOTS">450</nasAirspeed></requestedAirspeed>
    </flight>
  </message>
</ns5:MessageCollection>"#;

    fn envelope(records: &[&str]) -> String {
        let mut payload = String::from(
            r#"<ns5:MessageCollection xmlns:ns5="urn:test" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">"#,
        );
        for record in records {
            payload.push_str("<message>");
            payload.push_str(record);
            payload.push_str("</message>");
        }
        payload.push_str("</ns5:MessageCollection>");
        payload
    }

    fn record(guid: &str, acid: &str, cid: &str, body: &str) -> String {
        format!(
            r#"<flight><flightIdentification computerId="{cid}" aircraftIdentification="{acid}"/><gufi>{guid}</gufi>{body}</flight>"#
        )
    }

    fn parse_one(payload: &str) -> FlightUpdate {
        let mut batch = MessageParser::default().parse(payload).unwrap();
        assert_eq!(batch.len(), 1);
        batch.remove(0).unwrap()
    }

    #[test]
    fn parse_full_record() {
        let update = parse_one(FULL_MESSAGE);

        assert_eq!(update.guid, "KN94856800");
        assert_eq!(update.acid, "UAL123");
        assert_eq!(update.cid, "123");
        assert_eq!(update.centre.as_deref(), Some("ZJX"));
        assert_eq!(update.status, Some(FlightStatus::Active));
        assert_eq!(update.route.as_deref(), Some("KMCO..OMN.J53.CRG..KJFK"));
        assert_eq!(update.aircraft_type.as_deref(), Some("B738"));
        assert_eq!(update.equipment_suffix.as_deref(), Some("L"));
        assert_eq!(update.arrival.as_deref(), Some("KJFK"));
        assert_eq!(update.departure.as_deref(), Some("KMCO"));
        assert_eq!(update.owner, Some(Owner::new("ZJX", "66")));
        assert_eq!(update.assigned_beacon_code.as_deref(), Some("4521"));
        assert_eq!(update.current_beacon_code.as_deref(), Some("4521"));
        assert_eq!(update.current_altitude, Some(33_800.0));
        assert_eq!(update.speed, Some(452.0));
        assert_eq!(update.filed_cruise_speed, Some(450.0));
        assert_eq!(update.interim_altitude, InterimAltitude::Set(24_000.0));
        assert_eq!(
            update.position,
            Some(LatLong {
                latitude: 30.4942,
                longitude: -81.6879
            })
        );

        let altitude = update.assigned_altitude.unwrap();
        assert_eq!(altitude.value, 35_000.0);
        assert_eq!(altitude.unit.as_deref(), Some("FEET"));
        assert!(!altitude.is_otp());
        assert!(!altitude.is_vfr());

        let handoff = update.handoff.unwrap();
        assert_eq!(handoff.status, Some(HandoffStatus::Initiation));
        assert_eq!(handoff.from, Some(Owner::new("ZJX", "66")));
        assert_eq!(handoff.to, Owner::new("ZDC", "32"));

        let clearance = update.clearance.unwrap();
        assert_eq!(clearance.heading.as_deref(), Some("H270"));
        assert_eq!(clearance.speed.as_deref(), Some("S250"));
        assert_eq!(clearance.text, None);
    }

    #[test]
    fn absent_elements_stay_absent() {
        let update = parse_one(&envelope(&[&record("g1", "DAL1", "001", "")]));

        assert_eq!(update, FlightUpdate::new("g1", "DAL1", "001"));
        assert_eq!(update.current_altitude, None);
        assert_eq!(update.interim_altitude, InterimAltitude::Missing);
    }

    #[test]
    fn interim_altitude_nil_is_unset() {
        let body = r#"<interimAltitude xsi:nil="true" uom="FEET"/>"#;
        let update = parse_one(&envelope(&[&record("g1", "DAL1", "001", body)]));
        assert_eq!(update.interim_altitude, InterimAltitude::Unset);
    }

    #[test]
    fn assigned_altitude_precedence() {
        let body = r#"<assignedAltitude><vfrOnTopPlus uom="FEET">9500</vfrOnTopPlus><vfrPlus uom="FEET">8500</vfrPlus></assignedAltitude>"#;
        let update = parse_one(&envelope(&[&record("g1", "N123AB", "002", body)]));
        let altitude = update.assigned_altitude.unwrap();
        assert_eq!(altitude.value, 8_500.0);
        assert!(altitude.is_vfr());
        assert!(!altitude.is_otp());

        let body = r#"<assignedAltitude><vfrOnTopPlus uom="FEET">9500</vfrOnTopPlus></assignedAltitude>"#;
        let update = parse_one(&envelope(&[&record("g1", "N123AB", "002", body)]));
        let altitude = update.assigned_altitude.unwrap();
        assert_eq!(altitude.value, 9_500.0);
        assert!(altitude.is_otp());
    }

    #[test]
    fn bad_record_does_not_fail_envelope() {
        let bad = record(
            "g2",
            "AAL9",
            "009",
            "<enRoute><position><position><location><pos>30.1</pos></location></position></position></enRoute>",
        );
        let payload = envelope(&[&record("g1", "DAL1", "001", ""), &bad, "<flight/>"]);

        let batch = MessageParser::default().parse(&payload).unwrap();
        assert_eq!(batch.len(), 3);
        assert!(batch[0].is_ok());
        assert!(matches!(
            &batch[1],
            Err(ParseError::Record { index: 1, guid: Some(guid), .. }) if guid == "g2"
        ));
        assert!(matches!(
            &batch[2],
            Err(ParseError::Record { index: 2, guid: None, .. })
        ));
    }

    #[test]
    fn position_uses_first_two_tokens() {
        let body = "<enRoute><position><position><location><pos>  28.1   -80.6 999 </pos></location></position></position></enRoute>";
        let update = parse_one(&envelope(&[&record("g1", "DAL1", "001", body)]));
        assert_eq!(
            update.position,
            Some(LatLong {
                latitude: 28.1,
                longitude: -80.6
            })
        );
    }

    #[test]
    fn pointout_and_terminal_status() {
        let body = r#"<enRoute><pointout><originatingUnit unitIdentifier="ZJX" sectorIdentifier="66"/><receivingUnit unitIdentifier="ZJX" sectorIdentifier="12"/></pointout></enRoute><flightStatus fdpsFlightStatus="DROPPED"/>"#;
        let update = parse_one(&envelope(&[&record("g1", "DAL1", "001", body)]));
        assert_eq!(
            update.pointout,
            Some(Pointout {
                from: Owner::new("ZJX", "66"),
                to: Owner::new("ZJX", "12"),
            })
        );
        assert!(update.is_terminal());
    }

    #[test]
    fn empty_envelope() {
        let batch = MessageParser::default().parse(&envelope(&[])).unwrap();
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn malformed_markup_is_dumped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("failed-parsing.xml");
        let parser = MessageParser::with_dump_path(&path);
        let payload = "<MessageCollection><message><flight></message>";

        let err = parser.decode(payload).await.unwrap_err();
        assert_eq!(err.payload(), Some(payload));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), payload);
    }

    #[tokio::test]
    async fn dump_failure_is_not_fatal() {
        let parser = MessageParser::with_dump_path("/nonexistent-dir/failed-parsing.xml");
        let err = parser.decode("<unclosed>").await.unwrap_err();
        assert!(matches!(err, ParseError::Envelope { .. }));
    }

    #[test]
    fn payload_without_root_is_rejected() {
        assert!(matches!(
            MessageParser::default().parse("  "),
            Err(ParseError::Envelope { .. })
        ));
    }

    #[test]
    fn repeated_element_fails_only_its_record() {
        let repeated = record(
            "g2",
            "AAL9",
            "009",
            r#"<arrival arrivalPoint="KJFK"/><arrival arrivalPoint="KBOS"/>"#,
        );
        let payload = envelope(&[&record("g1", "DAL1", "001", ""), &repeated]);

        let batch = MessageParser::default().parse(&payload).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(
            batch[0].as_ref().map(|u| u.guid.as_str()),
            Ok("g1")
        );
        assert!(matches!(
            &batch[1],
            Err(ParseError::Record { index: 1, .. })
        ));
    }

    #[test]
    fn non_finite_position_is_a_record_error() {
        for pos in ["NaN inf", "30.1 -infinity", "91.0 -80.0", "28.0 180.5"] {
            let body = format!(
                "<enRoute><position><position><location><pos>{pos}</pos></location></position></position></enRoute>"
            );
            let payload = envelope(&[&record("g1", "DAL1", "001", &body)]);
            let batch = MessageParser::default().parse(&payload).unwrap();
            assert!(
                matches!(&batch[0], Err(ParseError::Record { guid: Some(g), .. }) if g == "g1"),
                "{pos} accepted"
            );
        }
    }

    #[test]
    fn non_finite_altitude_is_a_record_error() {
        let body = r#"<interimAltitude uom="FEET">NaN</interimAltitude>"#;
        let payload = envelope(&[&record("g1", "DAL1", "001", body)]);
        let batch = MessageParser::default().parse(&payload).unwrap();
        assert!(batch[0].is_err());
    }

    #[test]
    fn unprefixed_nil_is_unset() {
        let body = r#"<interimAltitude nil="true"/>"#;
        let update = parse_one(&envelope(&[&record("g1", "DAL1", "001", body)]));
        assert_eq!(update.interim_altitude, InterimAltitude::Unset);
    }
}
