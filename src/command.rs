//! Operator command grammar.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::errors::CommandError;
use crate::flight::{DatablockPosition, DisplayDefaults, Flight, Owner};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    ShowFlightPlan { flid: String },
    ChangeSector { sector_id: String },
    /// `position` is the keypad digit as typed
    ChangeDatablockPosition { position: char, flid: String },
    ChangeDatablockLeaderLength { length: u8, flid: String },
    ToggleFdb { flid: String },
}

impl Command {
    /// Parse one line of operator input.
    ///
    /// Rules are tried in order and the first match wins, so a bare digit
    /// followed by a flight id is always a datablock position change.
    pub fn parse(input: &str) -> Result<Self, CommandError> {
        let pieces: Vec<&str> = input.split_whitespace().collect();
        let Some(first) = pieces.first().copied() else {
            return Err(CommandError::EmptyInput);
        };

        match pieces.as_slice() {
            ["QF", flid] => Ok(Command::ShowFlightPlan {
                flid: flid.to_string(),
            }),
            ["SI", sector_id] => Ok(Command::ChangeSector {
                sector_id: sector_id.to_string(),
            }),
            [token, flid] => match token.as_bytes() {
                [digit @ b'0'..=b'9'] => Ok(Command::ChangeDatablockPosition {
                    position: char::from(*digit),
                    flid: flid.to_string(),
                }),
                [b'/', digit @ b'0'..=b'9'] => Ok(Command::ChangeDatablockLeaderLength {
                    length: digit - b'0',
                    flid: flid.to_string(),
                }),
                _ => Err(CommandError::Format(first.to_string())),
            },
            [flid] if is_maybe_flid(flid) => Ok(Command::ToggleFdb {
                flid: flid.to_string(),
            }),
            _ => Err(CommandError::Format(first.to_string())),
        }
    }

    /// Flight id the command targets; `None` for sector changes
    pub fn flid(&self) -> Option<&str> {
        match self {
            Command::ShowFlightPlan { flid }
            | Command::ChangeDatablockPosition { flid, .. }
            | Command::ChangeDatablockLeaderLength { flid, .. }
            | Command::ToggleFdb { flid } => Some(flid),
            Command::ChangeSector { .. } => None,
        }
    }
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Command::parse(s)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::ShowFlightPlan { flid } => write!(f, "QF {flid}"),
            Command::ChangeSector { sector_id } => write!(f, "SI {sector_id}"),
            Command::ChangeDatablockPosition { position, flid } => write!(f, "{position} {flid}"),
            Command::ChangeDatablockLeaderLength { length, flid } => write!(f, "/{length} {flid}"),
            Command::ToggleFdb { flid } => write!(f, "{flid}"),
        }
    }
}

/// Callsigns and computer ids: 2 to 10 ASCII letters or digits
fn is_maybe_flid(token: &str) -> bool {
    (2..=10).contains(&token.len()) && token.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// Apply a flight-targeted command to `flight`, returning feedback text.
///
/// Only display state is written. Sector changes do not target a flight
/// and are rejected here.
pub fn apply_command(
    command: &Command,
    flight: &mut Flight,
    current_position: &Owner,
    defaults: &DisplayDefaults,
    now: DateTime<Utc>,
) -> Result<String, CommandError> {
    match command {
        Command::ShowFlightPlan { .. } => {
            return Ok(flight.flight_plan_readout(current_position, now));
        }
        Command::ChangeSector { .. } => {
            return Err(CommandError::Format("SI".to_string()));
        }
        Command::ChangeDatablockPosition { position, .. } => {
            let display = flight.display_mut();
            display.datablock_position = match position {
                '5' => defaults.datablock_position,
                digit => DatablockPosition::from_keypad(*digit)
                    .ok_or(CommandError::InvalidPosition(*digit))?,
            };
        }
        Command::ChangeDatablockLeaderLength { length, .. } => {
            flight.display_mut().leader_length = *length;
        }
        Command::ToggleFdb { .. } => {
            let display = flight.display_mut();
            display.is_fdb_open = !display.is_fdb_open;
        }
    }
    Ok(format!("ACCEPT\n{command}"))
}
