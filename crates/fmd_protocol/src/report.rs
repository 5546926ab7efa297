//! Device → server reports.
//!
//! A device request body is a JSON object keyed by command code, each
//! value carrying the state the device observed while executing it:
//!
//! ```json
//! {"t": {"la": 45.5, "lo": -122.6, "ti": 1393458000, "ha": false}}
//! ```

use crate::command::CommandCode;
use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A device position as stored and forwarded to a live view.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Altitude in meters.
    pub altitude: f64,
    /// Device time (Unix seconds).
    pub time: i64,
    /// Whether the device can currently be locked.
    pub lockable: bool,
}

/// State fields reported alongside a command.
///
/// Field names are matched on their first two characters, so `"lat"`,
/// `"latitude"` and `"la"` are equivalent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateReport {
    /// Latitude, if reported.
    pub latitude: Option<f64>,
    /// Longitude, if reported.
    pub longitude: Option<f64>,
    /// Altitude, if reported.
    pub altitude: Option<f64>,
    /// Device time, if reported.
    pub time: Option<i64>,
    /// Whether the device reports itself locked (passcode set).
    pub locked: Option<bool>,
}

impl StateReport {
    /// Decodes the state fields of one report.
    pub fn from_args(args: &Value) -> ProtocolResult<Self> {
        let map = match args {
            Value::Object(map) => map,
            Value::Null => return Ok(Self::default()),
            other => {
                return Err(ProtocolError::InvalidReport(format!(
                    "expected object, got {}",
                    type_name(other)
                )))
            }
        };

        let mut state = Self::default();
        for (key, value) in map {
            let prefix: String = key.chars().take(2).collect::<String>().to_ascii_lowercase();
            match prefix.as_str() {
                "la" => state.latitude = Some(number(key, value)?),
                "lo" => state.longitude = Some(number(key, value)?),
                "al" => state.altitude = Some(number(key, value)?),
                "ti" => state.time = Some(number(key, value)? as i64),
                "ha" => state.locked = Some(is_truthy(value)),
                _ => {}
            }
        }
        Ok(state)
    }

    /// Builds the position record for this report.
    ///
    /// `lockable` is used when the report carries no lock state.
    pub fn to_position(&self, lockable: bool) -> Position {
        Position {
            latitude: self.latitude.unwrap_or_default(),
            longitude: self.longitude.unwrap_or_default(),
            altitude: self.altitude.unwrap_or_default(),
            time: self.time.unwrap_or_default(),
            lockable: self.locked.map(|locked| !locked).unwrap_or(lockable),
        }
    }
}

fn number(key: &str, value: &Value) -> ProtocolResult<f64> {
    value
        .as_f64()
        .ok_or_else(|| ProtocolError::InvalidReport(format!("{key:?} is not a number")))
}

/// A decoded device report.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceReport {
    /// Acknowledgement of `l`, `r`, `m` or `e` with current state.
    Ack {
        /// Acknowledged command.
        code: CommandCode,
        /// Reported state.
        state: StateReport,
    },
    /// `h` - the device lock state.
    LockState {
        /// True if the device is locked.
        locked: bool,
    },
    /// `t` - a tracking fix.
    Track(StateReport),
    /// `q` - the device unregistered itself.
    Quit,
}

impl DeviceReport {
    /// Decodes one `(key, args)` entry.
    ///
    /// Unknown codes fail; nothing is passed through untyped.
    pub fn decode(key: &str, args: &Value) -> ProtocolResult<Self> {
        let c = CommandCode::key_char(key)
            .ok_or_else(|| ProtocolError::InvalidReport("empty command key".into()))?;
        let code = CommandCode::from_char(c)
            .ok_or_else(|| ProtocolError::InvalidReport(format!("unknown code {c:?}")))?;

        Ok(match code {
            CommandCode::Lock | CommandCode::Ring | CommandCode::Message | CommandCode::Erase => {
                DeviceReport::Ack {
                    code,
                    state: StateReport::from_args(args)?,
                }
            }
            CommandCode::LockState => DeviceReport::LockState {
                locked: is_truthy(args),
            },
            CommandCode::Track => DeviceReport::Track(StateReport::from_args(args)?),
            CommandCode::Quit => DeviceReport::Quit,
        })
    }

    /// Returns the report's command code.
    pub fn code(&self) -> CommandCode {
        match self {
            DeviceReport::Ack { code, .. } => *code,
            DeviceReport::LockState { .. } => CommandCode::LockState,
            DeviceReport::Track(_) => CommandCode::Track,
            DeviceReport::Quit => CommandCode::Quit,
        }
    }
}

/// Parses a request body or frame into its command entries.
///
/// Effectively empty bodies (`""`, `"{}"`, whitespace) yield no entries.
pub fn decode_report_map(body: &[u8]) -> ProtocolResult<Map<String, Value>> {
    if matches!(String::from_utf8_lossy(body).trim(), "" | "{}") {
        return Ok(Map::new());
    }
    match serde_json::from_slice::<Value>(body)? {
        Value::Object(map) => Ok(map),
        other => Err(ProtocolError::InvalidReport(format!(
            "expected object body, got {}",
            type_name(&other)
        ))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Interprets loosely typed flags: booleans, non-zero numbers and the
/// strings `1`, `t`, `T`, `true`, `True` and `TRUE` are true.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => matches!(s.as_str(), "1" | "t" | "T" | "true" | "True" | "TRUE"),
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        _ => false,
    }
}
