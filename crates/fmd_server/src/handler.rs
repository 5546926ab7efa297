//! Request handlers for device registration and operator endpoints.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::notify::Notifier;
use crate::queue::CommandQueueService;
use crate::registry::DeviceRegistry;
use crate::session::{
    verify_assertion, Identity, IdentityVerifier, InsecureAssertionVerifier, OperatorSession,
    SessionStore,
};
use crate::stats::ServerStats;
use crate::store::{DeviceRecord, DeviceSecret, DeviceView, Store, StoreError};
use fmd_protocol::{
    device_id_from_path, filter_device_id, is_truthy, AcceptedCommands, CommandSanitizer,
};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// External services the server depends on.
pub struct Collaborators {
    /// Device persistence.
    pub store: Arc<dyn Store>,
    /// Push wake-up delivery.
    pub notifier: Arc<dyn Notifier>,
    /// Operator cookie sessions.
    pub sessions: Arc<dyn SessionStore>,
    /// Identity assertion verification.
    pub identity: Arc<dyn IdentityVerifier>,
}

/// Context for request handling.
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    /// Device persistence.
    pub store: Arc<dyn Store>,
    /// Operator sessions.
    pub sessions: Arc<dyn SessionStore>,
    /// Live connections (shared across all handlers).
    pub registry: Arc<DeviceRegistry>,
    /// Counters.
    pub stats: Arc<ServerStats>,
    /// Pending command queue.
    pub queue: CommandQueueService,
    /// Operator command sanitizer.
    pub sanitizer: CommandSanitizer,
    identity: Arc<dyn IdentityVerifier>,
}

impl HandlerContext {
    /// Creates a new handler context.
    pub fn new(config: ServerConfig, collaborators: Collaborators) -> Self {
        let identity: Arc<dyn IdentityVerifier> = if config.identity_verification_disabled {
            warn!("identity verification disabled; assertions are trusted without checks");
            Arc::new(InsecureAssertionVerifier::new())
        } else {
            collaborators.identity
        };
        if config.signature_verification_disabled {
            warn!("signature verification disabled; device requests are not authenticated");
        }

        let stats = Arc::new(ServerStats::new());
        let queue = CommandQueueService::new(
            Arc::clone(&collaborators.store),
            collaborators.notifier,
            Arc::clone(&stats),
        );
        Self {
            sanitizer: CommandSanitizer::new(config.sanitize_limits()),
            config,
            store: collaborators.store,
            sessions: collaborators.sessions,
            registry: Arc::new(DeviceRegistry::new()),
            stats,
            queue,
            identity,
        }
    }

    /// Verifies an identity assertion, counting failures.
    pub(crate) fn verify_identity(&self, assertion: &str) -> ServerResult<Identity> {
        verify_assertion(self.identity.as_ref(), assertion).map_err(|e| {
            self.stats.record_auth_failure();
            warn!(error = %e, "identity assertion rejected");
            e
        })
    }
}

/// Body of a device registration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegisterRequest {
    /// Operator identity assertion.
    #[serde(rename = "assert", default)]
    pub assertion: Option<String>,
    /// Push delivery address.
    #[serde(rename = "pushurl", default)]
    pub push_url: Option<String>,
    /// Requested device id.
    #[serde(rename = "deviceid", default)]
    pub device_id: Option<String>,
    /// Whether the device has a passcode (bool or string).
    #[serde(default)]
    pub has_passcode: Option<Value>,
    /// Command names the device accepts.
    #[serde(default)]
    pub accepts: Option<Vec<String>>,
}

/// Reply to a device registration.
///
/// The only message that ever carries a secret.
#[derive(Debug, Clone, Serialize)]
pub struct RegisterResponse {
    /// Assigned device id.
    #[serde(rename = "deviceid")]
    pub device_id: String,
    /// Newly generated shared secret.
    #[serde(serialize_with = "expose_secret")]
    pub secret: DeviceSecret,
}

fn expose_secret<S: Serializer>(secret: &DeviceSecret, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose())
}

/// How an operator proves who they are.
#[derive(Debug, Clone, Default)]
pub struct OperatorCredentials {
    /// Session cookie value.
    pub session_key: Option<String>,
    /// Identity assertion, used when the session is empty.
    pub assertion: Option<String>,
}

/// An operator command submission.
#[derive(Debug, Clone, Default)]
pub struct QueueRequest {
    /// Request path; the device id is its last segment.
    pub path: String,
    /// Operator credentials.
    pub credentials: OperatorCredentials,
    /// `{code: args, ...}` body.
    pub body: Vec<u8>,
}

/// Handler for registration and operator requests.
pub struct RequestHandler {
    context: Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// Registers (or re-registers) a device.
    ///
    /// A new secret is generated every time.
    pub fn handle_register(
        &self,
        session_key: Option<&str>,
        body: &[u8],
    ) -> ServerResult<RegisterResponse> {
        let request: RegisterRequest = serde_json::from_slice(body)
            .map_err(|e| ServerError::InvalidRequest(format!("registration body: {e}")))?;

        let assertion = request
            .assertion
            .as_deref()
            .ok_or_else(|| ServerError::AuthenticationFailed("no assertion".into()))?;
        let identity = self.context.verify_identity(assertion)?;

        let push_url = request
            .push_url
            .filter(|url| !url.is_empty())
            .ok_or_else(|| ServerError::InvalidRequest("missing push url".into()))?;

        let device_id = request
            .device_id
            .as_deref()
            .map(filter_device_id)
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string());

        let lockable = request.has_passcode.as_ref().map_or(true, is_truthy);

        let accepts = request
            .accepts
            .as_deref()
            .map(|names| AcceptedCommands::from_names(names))
            .filter(|accepts| !accepts.is_empty())
            .unwrap_or_else(|| self.context.config.default_accepted());

        let secret = DeviceSecret::generate();
        let record = DeviceRecord {
            id: device_id.clone(),
            user_id: identity.user_id.clone(),
            name: identity.local_name().to_string(),
            secret: secret.clone(),
            push_url,
            accepts,
            lockable,
            positions: Vec::new(),
            last_seen: None,
        };

        let stored_id = self.context.store.register_device(record).map_err(|e| {
            error!(device_id = %device_id, error = %e, "could not register device");
            ServerError::ResourceUnavailable(e.to_string())
        })?;
        if stored_id != device_id {
            error!(requested = %device_id, stored = %stored_id, "store returned a different device id");
            return Err(ServerError::Internal("device id changed during registration".into()));
        }

        if let Some(key) = session_key {
            self.context.sessions.save(key, identity.clone().into());
        }
        self.context.stats.record_registration();
        info!(device_id = %device_id, user_id = %identity.user_id, "device registered");

        Ok(RegisterResponse { device_id, secret })
    }

    /// Resolves the operator from the session, falling back to an assertion.
    ///
    /// A successful assertion is remembered in the session.
    pub fn resolve_operator(&self, credentials: &OperatorCredentials) -> ServerResult<OperatorSession> {
        let key = credentials.session_key.as_deref();
        if let Some(session) = key.and_then(|k| self.context.sessions.load(k)) {
            return Ok(session);
        }

        let assertion = credentials
            .assertion
            .as_deref()
            .ok_or_else(|| ServerError::AuthenticationFailed("no operator session".into()))?;
        let session: OperatorSession = self.context.verify_identity(assertion)?.into();
        if let Some(key) = key {
            self.context.sessions.save(key, session.clone());
        }
        Ok(session)
    }

    /// Loads a device the operator owns.
    ///
    /// Any failure other than a backend outage clears the session and is
    /// reported as unauthorized.
    fn owned_device(&self, credentials: &OperatorCredentials, path: &str) -> ServerResult<DeviceRecord> {
        let result = self.lookup_owned(credentials, path);
        if let Err(e) = &result {
            if e.status_code() == 401 {
                if let Some(key) = credentials.session_key.as_deref() {
                    self.context.sessions.clear(key);
                }
            }
        }
        result
    }

    fn lookup_owned(&self, credentials: &OperatorCredentials, path: &str) -> ServerResult<DeviceRecord> {
        let device_id = device_id_from_path(path)
            .ok_or_else(|| ServerError::UnknownDevice("no device id in path".into()))?;
        let operator = self.resolve_operator(credentials)?;
        let device = self.context.store.device(&device_id).map_err(|e| match e {
            StoreError::UnknownDevice(id) => {
                warn!(device_id = %id, user_id = %operator.user_id, "operator requested unknown device");
                ServerError::UnknownDevice(id)
            }
            other => ServerError::ResourceUnavailable(other.to_string()),
        })?;
        if !device.is_owned_by(&operator.user_id) {
            warn!(device_id = %device.id, user_id = %operator.user_id, "operator does not own device");
            return Err(ServerError::AuthenticationFailed("device not owned by operator".into()));
        }
        Ok(device)
    }

    /// Sanitizes and queues operator commands for a device.
    ///
    /// Returns `{key: "queued" | {"error": 422}}` per submitted command.
    pub fn handle_queue(&self, request: &QueueRequest) -> ServerResult<Value> {
        let device = self.owned_device(&request.credentials, &request.path)?;

        let mut outcome = Map::new();
        if request.body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Object(outcome));
        }
        let commands: Map<String, Value> = serde_json::from_slice(&request.body)
            .map_err(|e| ServerError::InvalidRequest(format!("queue body: {e}")))?;

        for (key, args) in &commands {
            let command = self.context.sanitizer.sanitize(key, args).map_err(|e| {
                warn!(device_id = %device.id, key = %key, error = %e, "rejected operator command");
                ServerError::from(e)
            })?;
            match self.context.queue.enqueue(&device, &command) {
                Ok(()) => {
                    outcome.insert(key.clone(), json!("queued"));
                }
                Err(ServerError::Unprocessable(_)) => {
                    outcome.insert(key.clone(), json!({ "error": 422 }));
                }
                Err(e) => return Err(e),
            }
        }
        debug!(device_id = %device.id, commands = commands.len(), "operator commands processed");
        Ok(Value::Object(outcome))
    }

    /// Returns the operator view of a device.
    pub fn handle_state(&self, credentials: &OperatorCredentials, path: &str) -> ServerResult<DeviceView> {
        Ok(self.owned_device(credentials, path)?.view())
    }

    /// Returns the liveness report for load balancers.
    pub fn handle_status(&self) -> Value {
        json!({
            "status": "ok",
            "version": self.context.config.version,
            "live_connections": self.context.registry.len(),
        })
    }

    /// Returns a snapshot of the server counters.
    pub fn handle_metrics(&self) -> ServerResult<Value> {
        serde_json::to_value(self.context.stats.snapshot())
            .map_err(|e| ServerError::Internal(e.to_string()))
    }
}
