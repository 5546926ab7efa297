//! Sign command implementation.

use super::{read_body, request_target, CliError};
use crate::{BodyArgs, TargetArgs};
use fmd_protocol::hawk;
use tracing::debug;

/// Runs the sign command.
pub fn run(
    target: &TargetArgs,
    body: &BodyArgs,
    id: &str,
    secret: &str,
    ext: &str,
) -> Result<(), CliError> {
    let target = request_target(target)?;
    let body = read_body(body)?;
    debug!(
        method = %target.method,
        path = %target.path,
        host = %target.host,
        port = target.port,
        body_len = body.len(),
        "signing message"
    );

    let header = hawk::as_header(&target, id, &body, ext, secret.as_bytes())?;
    println!("{header}");
    Ok(())
}
