//! Verify command implementation.

use super::{read_body, request_target, CliError};
use crate::{BodyArgs, TargetArgs};
use fmd_protocol::hawk::{self, parse_auth_header};
use std::time::Duration;
use tracing::{debug, warn};

/// Runs the verify command.
pub fn run(
    target: &TargetArgs,
    body: &BodyArgs,
    header: &str,
    secret: &str,
    max_skew: Option<u64>,
) -> Result<(), CliError> {
    let target = request_target(target)?;
    let body = read_body(body)?;

    let context = parse_auth_header(Some(header))?;
    debug!(id = %context.id, ts = context.timestamp, nonce = %context.nonce, "parsed header");

    if let Some(skew) = max_skew {
        context.check_skew(hawk::unix_now(), Duration::from_secs(skew))?;
    }
    match context.verify(&target, &body, secret.as_bytes()) {
        Ok(()) => {
            println!("✓ Signature valid");
            Ok(())
        }
        Err(e) => {
            warn!(error = %e, "verification failed");
            println!("✗ Signature invalid");
            Err(e.into())
        }
    }
}
