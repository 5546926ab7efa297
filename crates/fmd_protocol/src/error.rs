//! Error types for the protocol crate.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while decoding, verifying or sanitizing protocol data.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// No authorization header was supplied.
    #[error("missing authorization header")]
    MissingHeader,

    /// The authorization header could not be split into its fields.
    #[error("malformed authorization header: {0}")]
    MalformedHeader(String),

    /// The recomputed signature did not match the supplied one.
    #[error("signature mismatch")]
    SignatureMismatch,

    /// The signed timestamp is outside the accepted window.
    #[error("timestamp outside accepted window")]
    StaleTimestamp,

    /// The HMAC key was rejected.
    #[error("invalid signing key")]
    InvalidKey,

    /// Unknown or unsupported command code.
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// A command argument has an unusable type.
    #[error("invalid argument {field:?} for command {code:?}: {reason}")]
    InvalidArgument {
        /// Command code.
        code: char,
        /// Argument name.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// A device report could not be decoded.
    #[error("invalid report: {0}")]
    InvalidReport(String),

    /// JSON encoding or decoding failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProtocolError {
    /// Returns true if the error stems from the signature scheme.
    ///
    /// Callers collapse all of these into one outward rejection.
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            ProtocolError::MissingHeader
                | ProtocolError::MalformedHeader(_)
                | ProtocolError::SignatureMismatch
                | ProtocolError::StaleTimestamp
                | ProtocolError::InvalidKey
        )
    }
}
