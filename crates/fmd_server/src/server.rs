//! Main fmd server.

use crate::config::ServerConfig;
use crate::dispatch::{DispatchLoop, FrameSource, LiveExit, LiveSession, PollRequest};
use crate::error::{ServerError, ServerResult};
use crate::handler::{Collaborators, HandlerContext, OperatorCredentials, QueueRequest, RequestHandler};
use crate::registry::DeviceRegistry;
use crate::stats::ServerStats;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// A transport-neutral HTTP-style reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Status code.
    pub status: u16,
    /// `Authorization` header to attach, for signed device replies.
    pub authorization: Option<String>,
    /// JSON (or bare text) body.
    pub body: String,
}

impl Reply {
    fn ok(body: String) -> Self {
        Self {
            status: 200,
            authorization: None,
            body,
        }
    }

    fn json<T: Serialize>(value: &T) -> Self {
        match serde_json::to_string(value) {
            Ok(body) => Self::ok(body),
            Err(e) => Self::from_error(&ServerError::Internal(e.to_string())),
        }
    }

    /// Translates an error into its outward status and body.
    ///
    /// The internal detail is logged, never returned.
    pub fn from_error(err: &ServerError) -> Self {
        if err.is_server_error() {
            error!(status = err.status_code(), error = %err, "request failed");
        } else {
            debug!(status = err.status_code(), error = %err, "request rejected");
        }
        Self {
            status: err.status_code(),
            authorization: None,
            body: err.public_message().to_string(),
        }
    }

    /// Returns true for 2xx replies.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl<T: Serialize> From<ServerResult<T>> for Reply {
    fn from(result: ServerResult<T>) -> Self {
        match result {
            Ok(value) => Reply::json(&value),
            Err(e) => Reply::from_error(&e),
        }
    }
}

/// The fmd server.
///
/// Owns the live connection registry and exposes one method per endpoint.
/// An HTTP/WebSocket front end maps requests onto these methods and
/// [`Reply`]s back onto responses.
///
/// # Example
///
/// ```
/// use fmd_server::{Collaborators, FmdServer, MemoryNotifier, MemorySessionStore, MemoryStore, ServerConfig};
/// use fmd_server::{Identity, ServerError, ServerResult};
/// use std::sync::Arc;
///
/// fn no_identity(_: &str) -> ServerResult<Identity> {
///     Err(ServerError::AuthenticationFailed("no provider".into()))
/// }
///
/// let config = ServerConfig::default();
/// let store = Arc::new(MemoryStore::from_config(&config));
/// let server = FmdServer::new(
///     config,
///     Collaborators {
///         store,
///         notifier: Arc::new(MemoryNotifier::new()),
///         sessions: Arc::new(MemorySessionStore::new()),
///         identity: Arc::new(no_identity),
///     },
/// );
/// assert_eq!(server.status().status, 200);
/// ```
pub struct FmdServer {
    handler: RequestHandler,
    dispatch: DispatchLoop,
    context: Arc<HandlerContext>,
}

impl FmdServer {
    /// Creates a new server.
    pub fn new(config: ServerConfig, collaborators: Collaborators) -> Self {
        let context = Arc::new(HandlerContext::new(config, collaborators));
        let handler = RequestHandler::new(Arc::clone(&context));
        let dispatch = DispatchLoop::new(Arc::clone(&context));

        Self {
            handler,
            dispatch,
            context,
        }
    }

    /// Handles a device registration.
    pub fn register(&self, session_key: Option<&str>, body: &[u8]) -> Reply {
        self.handler.handle_register(session_key, body).into()
    }

    /// Handles a device poll. Successful replies carry a signed header.
    pub fn poll(&self, request: &PollRequest) -> Reply {
        match self.dispatch.poll(request) {
            Ok(response) => Reply {
                status: 200,
                authorization: Some(response.authorization),
                body: response.body,
            },
            Err(e) => Reply::from_error(&e),
        }
    }

    /// Handles an operator command submission.
    pub fn queue(&self, request: &QueueRequest) -> Reply {
        self.handler.handle_queue(request).into()
    }

    /// Returns the operator view of a device.
    pub fn state(&self, credentials: &OperatorCredentials, path: &str) -> Reply {
        self.handler.handle_state(credentials, path).into()
    }

    /// Returns the load balancer status.
    pub fn status(&self) -> Reply {
        Reply::json(&self.handler.handle_status())
    }

    /// Returns a metrics snapshot.
    ///
    /// Falls back to `{}` if the snapshot cannot be encoded.
    pub fn metrics(&self) -> Reply {
        match self.handler.handle_metrics() {
            Ok(value) => Reply::json(&value),
            Err(e) => {
                warn!(error = %e, "could not build metrics snapshot");
                Reply::ok(fmd_protocol::EMPTY_PAYLOAD.to_string())
            }
        }
    }

    /// Accepts a live connection, evicting any previous one for the device.
    pub fn connect_live(&self, path: &str) -> ServerResult<LiveSession> {
        self.dispatch.connect(path)
    }

    /// Runs an accepted live connection to completion.
    pub async fn run_live<F: FrameSource>(&self, session: &LiveSession, frames: F) -> LiveExit {
        self.dispatch
            .run_live(&session.device, &session.connection, frames)
            .await
    }

    /// Returns the live connection registry.
    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.context.registry
    }

    /// Returns the server counters.
    pub fn stats(&self) -> &ServerStats {
        &self.context.stats
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.context.config
    }

    /// Cancels every live connection. Returns how many were open.
    pub fn shutdown(&self) -> usize {
        self.context.registry.shutdown()
    }
}
