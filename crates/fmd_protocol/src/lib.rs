//! # fmd Protocol
//!
//! Device-facing protocol pieces for the fmd server.
//!
//! This crate provides:
//! - The Hawk-style mutual signature scheme (`hawk`)
//! - Device id and assertion filters (`device_id`)
//! - The closed operator command union and its wire form (`command`)
//! - Operator command sanitizing (`sanitize`)
//! - Decoding of device-reported state (`report`)
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod command;
mod device_id;
mod error;
pub mod hawk;
mod report;
mod sanitize;

pub use command::{AcceptedCommands, Command, CommandCode, DurationArgs, EraseArgs, LockArgs};
pub use device_id::{device_id_from_path, filter_device_id, is_assertion_safe, MAX_DEVICE_ID_LEN};
pub use error::{ProtocolError, ProtocolResult};
pub use hawk::{HawkContext, RequestTarget};
pub use report::{decode_report_map, is_truthy, DeviceReport, Position, StateReport};
pub use sanitize::{CommandSanitizer, SanitizeLimits, MAX_LOCK_CODE_INPUT, MAX_MESSAGE_LEN};

/// Payload returned when no command is pending for a device.
pub const EMPTY_PAYLOAD: &str = "{}";
