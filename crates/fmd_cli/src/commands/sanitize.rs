//! Sanitize command implementation.
//!
//! Shows, per command, what the server would store for a device that
//! accepts the configured codes.

use super::{read_body, CliError};
use crate::BodyArgs;
use fmd_protocol::{CommandSanitizer, ProtocolError};
use fmd_server::ServerConfig;
use serde_json::{Map, Value};
use tracing::debug;

/// Runs the sanitize command.
pub fn run(body: &BodyArgs, config: &ServerConfig) -> Result<(), CliError> {
    let raw = read_body(body)?;
    let commands: Map<String, Value> = serde_json::from_slice(&raw).map_err(ProtocolError::from)?;
    let sanitizer = CommandSanitizer::new(config.sanitize_limits());
    let accepts = config.default_accepted();
    let limits = sanitizer.limits();
    debug!(
        lock_code_max = limits.lock_code_max,
        ring_max = limits.ring_max,
        track_max = limits.track_max,
        accepts = %accepts,
        "sanitizing {} command(s)",
        commands.len()
    );

    let mut failed = 0;
    for (key, args) in &commands {
        match sanitizer.sanitize(key, args) {
            Ok(command) if !accepts.accepts(command.code()) => {
                println!("{key}: not accepted (422)");
            }
            Ok(command) => println!("{key}: {}", command.to_payload()?),
            Err(e) => {
                failed += 1;
                println!("{key}: rejected ({e})");
            }
        }
    }

    if failed > 0 {
        return Err(ProtocolError::InvalidCommand(format!("{failed} command(s) rejected")).into());
    }
    Ok(())
}
