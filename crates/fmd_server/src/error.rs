//! Error types for the fmd server.

use crate::notify::NotifyError;
use crate::store::StoreError;
use fmd_protocol::ProtocolError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the fmd server.
///
/// Every variant maps to one outward status; the detail string is for logs
/// only and never reaches a device.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Bad, missing or mismatched signature, or an invalid identity.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The device id is not registered.
    ///
    /// Reported outward exactly like an authentication failure.
    #[error("unknown device: {0}")]
    UnknownDevice(String),

    /// Malformed request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Unsanitary or unsupported command code.
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// The device does not accept the command.
    #[error("unprocessable command: {0}")]
    Unprocessable(String),

    /// Store or push delivery failure.
    #[error("resource unavailable: {0}")]
    ResourceUnavailable(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Returns the HTTP status for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            ServerError::AuthenticationFailed(_) | ServerError::UnknownDevice(_) => 401,
            ServerError::InvalidRequest(_) | ServerError::InvalidCommand(_) => 400,
            ServerError::Unprocessable(_) => 422,
            ServerError::ResourceUnavailable(_) => 503,
            ServerError::Internal(_) => 500,
        }
    }

    /// Returns the body shown to the caller.
    ///
    /// Authentication failures and unknown devices are indistinguishable.
    pub fn public_message(&self) -> &'static str {
        match self {
            ServerError::AuthenticationFailed(_) | ServerError::UnknownDevice(_) => "Unauthorized",
            ServerError::InvalidRequest(_) => "\"Invalid\"",
            ServerError::InvalidCommand(_) => "\"Invalid Command\"",
            ServerError::Unprocessable(_) => "\"Unacceptable Command\"",
            ServerError::ResourceUnavailable(_) | ServerError::Internal(_) => "\"Server Error\"",
        }
    }

    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        self.status_code() >= 500
    }
}

impl From<StoreError> for ServerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UnknownDevice(id) => ServerError::UnknownDevice(id),
            other => ServerError::ResourceUnavailable(other.to_string()),
        }
    }
}

impl From<NotifyError> for ServerError {
    fn from(err: NotifyError) -> Self {
        ServerError::ResourceUnavailable(err.to_string())
    }
}

impl From<ProtocolError> for ServerError {
    fn from(err: ProtocolError) -> Self {
        let message = err.to_string();
        if err.is_auth_error() {
            return ServerError::AuthenticationFailed(message);
        }
        match err {
            ProtocolError::InvalidCommand(_) | ProtocolError::InvalidArgument { .. } => {
                ServerError::InvalidCommand(message)
            }
            ProtocolError::InvalidReport(_) | ProtocolError::Json(_) => {
                ServerError::InvalidRequest(message)
            }
            _ => ServerError::Internal(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        assert!(ServerError::InvalidRequest("bad".into()).is_client_error());
        assert!(ServerError::ResourceUnavailable("db".into()).is_server_error());
        assert!(!ServerError::InvalidRequest("bad".into()).is_server_error());
        assert_eq!(ServerError::Unprocessable("x".into()).status_code(), 422);
    }

    #[test]
    fn unknown_device_looks_like_auth_failure() {
        let unknown = ServerError::UnknownDevice("abc".into());
        let auth = ServerError::AuthenticationFailed("mac".into());
        assert_eq!(unknown.status_code(), auth.status_code());
        assert_eq!(unknown.public_message(), auth.public_message());
    }

    #[test]
    fn protocol_errors_map_by_kind() {
        let e: ServerError = ProtocolError::SignatureMismatch.into();
        assert_eq!(e.status_code(), 401);
        let e: ServerError = ProtocolError::InvalidCommand("q".into()).into();
        assert_eq!(e.status_code(), 400);
        let e: ServerError = ProtocolError::InvalidReport("x".into()).into();
        assert_eq!(e.status_code(), 400);
    }

    #[test]
    fn store_errors_map_by_kind() {
        let e: ServerError = StoreError::UnknownDevice("abc".into()).into();
        assert_eq!(e.status_code(), 401);
        let e: ServerError = StoreError::Backend("down".into()).into();
        assert_eq!(e.status_code(), 503);
    }
}
