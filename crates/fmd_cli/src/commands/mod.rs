//! CLI command implementations.

pub mod sanitize;
pub mod sign;
pub mod verify;

use crate::{BodyArgs, TargetArgs};
use fmd_protocol::RequestTarget;
use thiserror::Error;

/// Errors shared by the commands.
#[derive(Error, Debug)]
pub enum CliError {
    /// Neither `--body` nor `--body-file` was usable.
    #[error("could not read body: {0}")]
    Body(#[from] std::io::Error),

    /// Protocol-level failure.
    #[error(transparent)]
    Protocol(#[from] fmd_protocol::ProtocolError),
}

/// Returns the message body; an absent body is empty.
pub fn read_body(args: &BodyArgs) -> Result<Vec<u8>, CliError> {
    match (&args.body, &args.body_file) {
        (Some(body), _) => Ok(body.clone().into_bytes()),
        (None, Some(path)) => Ok(std::fs::read(path)?),
        (None, None) => Ok(Vec::new()),
    }
}

/// Builds the signing target from the command line.
pub fn request_target(args: &TargetArgs) -> Result<RequestTarget, CliError> {
    Ok(RequestTarget::from_host_header(
        args.method.clone(),
        args.path.clone(),
        &args.host,
        args.port,
    )?)
}
