//! Command codes and the operator command union.
//!
//! Operator commands travel to devices as a single-key JSON object, e.g.
//! `{"l":{"c":42,"m":"call me"}}`. The union is closed: decoding anything
//! else fails.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Single-letter command codes shared by devices and the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CommandCode {
    /// `l` - lock the device.
    Lock,
    /// `r` - ring the device.
    Ring,
    /// `m` - show a message.
    Message,
    /// `e` - erase the device.
    Erase,
    /// `h` - lock-state report.
    LockState,
    /// `t` - track position.
    Track,
    /// `q` - quit / unregister.
    Quit,
}

impl CommandCode {
    /// Every known code.
    pub const ALL: [CommandCode; 7] = [
        CommandCode::Lock,
        CommandCode::Ring,
        CommandCode::Message,
        CommandCode::Erase,
        CommandCode::LockState,
        CommandCode::Track,
        CommandCode::Quit,
    ];

    /// Returns the wire character.
    pub fn as_char(self) -> char {
        match self {
            CommandCode::Lock => 'l',
            CommandCode::Ring => 'r',
            CommandCode::Message => 'm',
            CommandCode::Erase => 'e',
            CommandCode::LockState => 'h',
            CommandCode::Track => 't',
            CommandCode::Quit => 'q',
        }
    }

    /// Parses a wire character (case-insensitive).
    pub fn from_char(c: char) -> Option<Self> {
        let c = c.to_ascii_lowercase();
        Self::ALL.into_iter().find(|code| code.as_char() == c)
    }

    /// Returns the lowercased first character of a command key.
    ///
    /// Devices and operators may send `"lock"` as well as `"l"`.
    pub fn key_char(key: &str) -> Option<char> {
        key.chars().next().map(|c| c.to_ascii_lowercase())
    }
}

impl fmt::Display for CommandCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// The set of codes a device opted into at registration.
///
/// Gates every command in both directions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct AcceptedCommands(String);

impl AcceptedCommands {
    /// Builds the set from a string of codes such as `"elrth"`.
    pub fn new(codes: &str) -> Self {
        let mut set = String::with_capacity(codes.len());
        for c in codes.chars().map(|c| c.to_ascii_lowercase()) {
            if c.is_ascii_alphabetic() && !set.contains(c) {
                set.push(c);
            }
        }
        Self(set)
    }

    /// Builds the set from the first letter of each entry, as sent at
    /// registration (`["lock", "ring", ...]`).
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Self {
        let codes: String = names
            .iter()
            .filter_map(|name| name.as_ref().chars().next())
            .collect();
        Self::new(&codes)
    }

    /// Returns true if the raw character is accepted.
    pub fn contains_char(&self, c: char) -> bool {
        self.0.contains(c.to_ascii_lowercase())
    }

    /// Returns true if the code is accepted.
    pub fn accepts(&self, code: CommandCode) -> bool {
        self.contains_char(code.as_char())
    }

    /// Returns true if nothing is accepted.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the codes as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for AcceptedCommands {
    fn from(value: String) -> Self {
        Self::new(&value)
    }
}

impl From<AcceptedCommands> for String {
    fn from(value: AcceptedCommands) -> Self {
        value.0
    }
}

impl fmt::Display for AcceptedCommands {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Arguments of a lock command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LockArgs {
    /// Unlock code.
    #[serde(rename = "c", default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u64>,
    /// Lock screen message.
    #[serde(rename = "m", default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Arguments of ring and track commands.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DurationArgs {
    /// Duration in seconds.
    #[serde(rename = "d", default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
}

/// Erase never carries operator data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EraseArgs {}

/// A sanitized operator → device command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Lock the device.
    #[serde(rename = "l")]
    Lock(LockArgs),
    /// Ring the device.
    #[serde(rename = "r")]
    Ring(DurationArgs),
    /// Track the device.
    #[serde(rename = "t")]
    Track(DurationArgs),
    /// Erase the device.
    #[serde(rename = "e")]
    Erase(EraseArgs),
}

impl Command {
    /// Returns the command code.
    pub fn code(&self) -> CommandCode {
        match self {
            Command::Lock(_) => CommandCode::Lock,
            Command::Ring(_) => CommandCode::Ring,
            Command::Track(_) => CommandCode::Track,
            Command::Erase(_) => CommandCode::Erase,
        }
    }

    /// Encodes the single-key wire payload.
    pub fn to_payload(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes a wire payload.
    pub fn from_payload(payload: &str) -> ProtocolResult<Self> {
        serde_json::from_str(payload)
            .map_err(|e| ProtocolError::InvalidCommand(format!("undecodable payload: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_chars() {
        for code in CommandCode::ALL {
            assert_eq!(CommandCode::from_char(code.as_char()), Some(code));
        }
        assert_eq!(CommandCode::from_char('L'), Some(CommandCode::Lock));
        assert_eq!(CommandCode::from_char('x'), None);
        assert_eq!(CommandCode::key_char("Track"), Some('t'));
        assert_eq!(CommandCode::key_char(""), None);
    }

    #[test]
    fn accepted_set() {
        let accepts = AcceptedCommands::new("ELrth1");
        assert_eq!(accepts.as_str(), "elrth");
        assert!(accepts.accepts(CommandCode::Lock));
        assert!(accepts.contains_char('H'));
        assert!(!accepts.accepts(CommandCode::Quit));
        assert!(!accepts.accepts(CommandCode::Message));
    }

    #[test]
    fn accepted_from_names() {
        let accepts = AcceptedCommands::from_names(&["Lock", "ring", "", "erase", "lock"]);
        assert_eq!(accepts.as_str(), "lre");
    }

    #[test]
    fn payload_shape() {
        let lock = Command::Lock(LockArgs {
            code: Some(42),
            message: None,
        });
        assert_eq!(lock.to_payload().unwrap(), r#"{"l":{"c":42}}"#);

        let erase = Command::Erase(EraseArgs {});
        assert_eq!(erase.to_payload().unwrap(), r#"{"e":{}}"#);

        let ring = Command::Ring(DurationArgs { duration: Some(30) });
        assert_eq!(ring.to_payload().unwrap(), r#"{"r":{"d":30}}"#);
    }

    #[test]
    fn payload_decode_fails_closed() {
        assert_eq!(
            Command::from_payload(r#"{"t":{"d":5}}"#).unwrap(),
            Command::Track(DurationArgs { duration: Some(5) })
        );
        assert!(Command::from_payload(r#"{"q":{}}"#).is_err());
        assert!(Command::from_payload(r#"{"l":{"x":1}}"#).is_err());
        assert!(Command::from_payload("{}").is_err());
    }

    #[test]
    fn accepted_serde_as_string() {
        let json = serde_json::to_string(&AcceptedCommands::new("elrth")).unwrap();
        assert_eq!(json, "\"elrth\"");
        let back: AcceptedCommands = serde_json::from_str("\"LR\"").unwrap();
        assert_eq!(back.as_str(), "lr");
    }
}
