//! Operator command sanitizing.
//!
//! Operator input is untyped JSON. Before anything is queued it is reduced
//! to a [`Command`]:
//!
//! | Code | Field | Rule |
//! |---|---|---|
//! | `l` | `c` | digits of the first 4 characters, clamped to `[0, lock_code_max]` |
//! | `l` | `m` | printable characters (32-255), at most 100 |
//! | `r`, `t` | `d` | digits only, clamped to `[0, ring_max]` / `[0, track_max]` |
//! | `e` | | all arguments dropped |
//!
//! Any other code is rejected. Unknown fields are dropped.

use crate::command::{Command, CommandCode, DurationArgs, EraseArgs, LockArgs};
use crate::error::{ProtocolError, ProtocolResult};
use serde_json::Value;

/// Characters of the lock code input that are considered.
pub const MAX_LOCK_CODE_INPUT: usize = 4;

/// Maximum lock message length.
pub const MAX_MESSAGE_LEN: usize = 100;

/// Upper bounds for numeric command arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SanitizeLimits {
    /// Largest lock code.
    pub lock_code_max: u64,
    /// Longest ring duration.
    pub ring_max: u64,
    /// Longest track duration.
    pub track_max: u64,
}

impl Default for SanitizeLimits {
    fn default() -> Self {
        Self {
            lock_code_max: 9999,
            ring_max: 10500,
            track_max: 10500,
        }
    }
}

/// Turns raw operator commands into queueable [`Command`]s.
#[derive(Debug, Clone, Default)]
pub struct CommandSanitizer {
    limits: SanitizeLimits,
}

impl CommandSanitizer {
    /// Creates a sanitizer with the given limits.
    pub fn new(limits: SanitizeLimits) -> Self {
        Self { limits }
    }

    /// Returns the configured limits.
    pub fn limits(&self) -> SanitizeLimits {
        self.limits
    }

    /// Sanitizes one `key: args` entry of an operator request.
    ///
    /// The code is the lowercased first character of `key`.
    pub fn sanitize(&self, key: &str, args: &Value) -> ProtocolResult<Command> {
        let code = CommandCode::key_char(key)
            .and_then(CommandCode::from_char)
            .ok_or_else(|| ProtocolError::InvalidCommand(key.to_string()))?;

        match code {
            CommandCode::Lock => {
                let code_arg = field(code, args, "c")?
                    .map(|v| scalar_text(code, "c", v))
                    .transpose()?
                    .map(|raw| lock_code(&raw, self.limits.lock_code_max));
                let message = field(code, args, "m")?
                    .map(|v| scalar_text(code, "m", v))
                    .transpose()?
                    .map(|raw| printable(&raw));
                Ok(Command::Lock(LockArgs {
                    code: code_arg,
                    message,
                }))
            }
            CommandCode::Ring => Ok(Command::Ring(self.duration(code, args, self.limits.ring_max)?)),
            CommandCode::Track => {
                Ok(Command::Track(self.duration(code, args, self.limits.track_max)?))
            }
            CommandCode::Erase => Ok(Command::Erase(EraseArgs {})),
            CommandCode::Message | CommandCode::LockState | CommandCode::Quit => {
                Err(ProtocolError::InvalidCommand(key.to_string()))
            }
        }
    }

    fn duration(&self, code: CommandCode, args: &Value, max: u64) -> ProtocolResult<DurationArgs> {
        let duration = field(code, args, "d")?
            .map(|v| scalar_text(code, "d", v))
            .transpose()?
            .map(|raw| range_check(&digits_only(&raw), max));
        Ok(DurationArgs { duration })
    }
}

/// Looks up one argument; `null` arguments behave like an empty object.
fn field<'a>(code: CommandCode, args: &'a Value, name: &str) -> ProtocolResult<Option<&'a Value>> {
    match args {
        Value::Object(map) => Ok(map.get(name)),
        Value::Null => Ok(None),
        _ => Err(ProtocolError::InvalidArgument {
            code: code.as_char(),
            field: "*",
            reason: "arguments must be an object".into(),
        }),
    }
}

/// Accepts strings and numbers; numbers are rendered without a fraction.
fn scalar_text(code: CommandCode, field: &'static str, value: &Value) -> ProtocolResult<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(match (n.as_u64(), n.as_i64(), n.as_f64()) {
            (Some(u), _, _) => u.to_string(),
            (None, Some(i), _) => i.to_string(),
            (None, None, Some(f)) => format!("{f:.0}"),
            _ => String::new(),
        }),
        _ => Err(ProtocolError::InvalidArgument {
            code: code.as_char(),
            field,
            reason: "expected string or number".into(),
        }),
    }
}

fn lock_code(raw: &str, max: u64) -> u64 {
    let head: String = raw.chars().take(MAX_LOCK_CODE_INPUT).collect();
    range_check(&digits_only(&head), max)
}

fn digits_only(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}

fn printable(raw: &str) -> String {
    raw.chars()
        .filter(|c| (32..=255).contains(&u32::from(*c)))
        .take(MAX_MESSAGE_LEN)
        .collect()
}

/// Parses a digit string and clamps it to `[0, max]`.
///
/// Empty input is 0; values too large for `u64` clamp to `max`.
fn range_check(digits: &str, max: u64) -> u64 {
    if digits.is_empty() {
        return 0;
    }
    digits.parse::<u64>().unwrap_or(u64::MAX).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn sanitizer() -> CommandSanitizer {
        CommandSanitizer::default()
    }

    #[test]
    fn lock_code_is_clamped() {
        let s = CommandSanitizer::new(SanitizeLimits {
            lock_code_max: 999,
            ..Default::default()
        });
        let cmd = s.sanitize("l", &json!({"c": "12345abc"})).unwrap();
        assert_eq!(cmd.to_payload().unwrap(), r#"{"l":{"c":999}}"#);
    }

    #[test]
    fn lock_code_uses_first_four_characters() {
        let cmd = sanitizer().sanitize("l", &json!({"c": "1a2b345"})).unwrap();
        assert_eq!(
            cmd,
            Command::Lock(LockArgs {
                code: Some(12),
                message: None
            })
        );

        let cmd = sanitizer().sanitize("lock", &json!({"c": "42"})).unwrap();
        assert_eq!(cmd.to_payload().unwrap(), r#"{"l":{"c":42}}"#);

        let cmd = sanitizer().sanitize("l", &json!({"c": "abcd"})).unwrap();
        assert_eq!(cmd.to_payload().unwrap(), r#"{"l":{"c":0}}"#);
    }

    #[test]
    fn lock_message_is_truncated() {
        let long = "x".repeat(150);
        let cmd = sanitizer().sanitize("l", &json!({"m": long})).unwrap();
        match cmd {
            Command::Lock(LockArgs { message, code }) => {
                assert_eq!(message.unwrap(), "x".repeat(100));
                assert!(code.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn lock_message_drops_control_characters() {
        let cmd = sanitizer()
            .sanitize("l", &json!({"m": "call\n me\u{7}é\u{1F600}"}))
            .unwrap();
        match cmd {
            Command::Lock(LockArgs { message, .. }) => assert_eq!(message.unwrap(), "call meé"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_fields_are_dropped() {
        let cmd = sanitizer()
            .sanitize("l", &json!({"c": "1", "evil": "<script>"}))
            .unwrap();
        assert_eq!(cmd.to_payload().unwrap(), r#"{"l":{"c":1}}"#);
    }

    #[test]
    fn durations_accept_numbers_and_strings() {
        let ring = sanitizer().sanitize("r", &json!({"d": 30})).unwrap();
        assert_eq!(ring.to_payload().unwrap(), r#"{"r":{"d":30}}"#);

        let track = sanitizer().sanitize("t", &json!({"d": "60s"})).unwrap();
        assert_eq!(track.to_payload().unwrap(), r#"{"t":{"d":60}}"#);

        let ring = sanitizer().sanitize("r", &json!({"d": 99999})).unwrap();
        assert_eq!(ring.to_payload().unwrap(), r#"{"r":{"d":10500}}"#);

        let ring = sanitizer().sanitize("r", &json!({"d": 12.7})).unwrap();
        assert_eq!(ring.to_payload().unwrap(), r#"{"r":{"d":13}}"#);

        let ring = sanitizer()
            .sanitize("r", &json!({"d": "99999999999999999999999"}))
            .unwrap();
        assert_eq!(ring.to_payload().unwrap(), r#"{"r":{"d":10500}}"#);
    }

    #[test]
    fn separate_ring_and_track_limits() {
        let s = CommandSanitizer::new(SanitizeLimits {
            ring_max: 10,
            track_max: 20,
            ..Default::default()
        });
        assert_eq!(
            s.sanitize("r", &json!({"d": 50})).unwrap(),
            Command::Ring(DurationArgs { duration: Some(10) })
        );
        assert_eq!(
            s.sanitize("t", &json!({"d": 50})).unwrap(),
            Command::Track(DurationArgs { duration: Some(20) })
        );
    }

    #[test]
    fn reports_configured_limits() {
        let limits = SanitizeLimits {
            lock_code_max: 42,
            ..Default::default()
        };
        assert_eq!(CommandSanitizer::new(limits).limits(), limits);
        assert_eq!(sanitizer().limits(), SanitizeLimits::default());
    }

    #[test]
    fn erase_discards_arguments() {
        let cmd = sanitizer()
            .sanitize("e", &json!({"wipe": "everything", "d": 1}))
            .unwrap();
        assert_eq!(cmd.to_payload().unwrap(), r#"{"e":{}}"#);
    }

    #[test]
    fn rejects_other_codes() {
        for key in ["q", "h", "m", "x", ""] {
            let err = sanitizer().sanitize(key, &json!({})).unwrap_err();
            assert!(matches!(err, ProtocolError::InvalidCommand(_)), "{key}");
        }
    }

    #[test]
    fn rejects_unusable_argument_types() {
        assert!(sanitizer().sanitize("l", &json!({"c": {"x": 1}})).is_err());
        assert!(sanitizer().sanitize("r", &json!({"d": [1]})).is_err());
        assert!(sanitizer().sanitize("t", &json!("60")).is_err());
        assert!(sanitizer().sanitize("r", &Value::Null).is_ok());
    }

    proptest! {
        #[test]
        fn durations_stay_in_range(raw in ".{0,40}", max in 0u64..20_000) {
            let s = CommandSanitizer::new(SanitizeLimits { ring_max: max, ..Default::default() });
            match s.sanitize("r", &json!({"d": raw})).unwrap() {
                Command::Ring(DurationArgs { duration: Some(d) }) => prop_assert!(d <= max),
                other => prop_assert!(false, "unexpected {:?}", other),
            }
        }

        #[test]
        fn messages_stay_printable(raw in ".{0,300}") {
            match sanitizer().sanitize("l", &json!({"m": raw})).unwrap() {
                Command::Lock(LockArgs { message: Some(m), .. }) => {
                    prop_assert!(m.chars().count() <= MAX_MESSAGE_LEN);
                    prop_assert!(m.chars().all(|c| (32..=255).contains(&u32::from(c))));
                }
                other => prop_assert!(false, "unexpected {:?}", other),
            }
        }
    }
}
