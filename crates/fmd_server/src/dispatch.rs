//! Device-facing dispatch.
//!
//! Two protocols share the same report handling:
//!
//! - **Poll**: a signed request carrying device reports; the reply is the
//!   next pending command (or `{}`), signed with the same secret.
//! - **Live**: a standing duplex connection per device. Frames carry
//!   reports; the loop ends on cancellation, peer close, idle timeout or an
//!   undecodable frame.

use crate::error::{ServerError, ServerResult};
use crate::handler::HandlerContext;
use crate::registry::LiveConnection;
use crate::store::{DeviceRecord, StoreError, StoreResult};
use fmd_protocol::hawk::{self, parse_auth_header, unix_now};
use fmd_protocol::{
    decode_report_map, device_id_from_path, Command, CommandCode, DeviceReport, Position,
    RequestTarget, StateReport,
};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// A device poll.
#[derive(Debug, Clone)]
pub struct PollRequest {
    /// Method, path and host the request was sent to.
    pub target: RequestTarget,
    /// `Authorization` header value.
    pub authorization: Option<String>,
    /// Raw body.
    pub body: Vec<u8>,
}

/// A signed poll reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollResponse {
    /// `Authorization` header value for the reply.
    pub authorization: String,
    /// Next pending command, or `{}`.
    pub body: String,
}

/// Inbound frames of a live connection.
pub trait FrameSource: Send {
    /// Waits for the next frame; `None` once the peer has closed.
    fn next_frame(&mut self) -> impl Future<Output = Option<Vec<u8>>> + Send;
}

impl FrameSource for mpsc::Receiver<Vec<u8>> {
    async fn next_frame(&mut self) -> Option<Vec<u8>> {
        self.recv().await
    }
}

impl FrameSource for mpsc::UnboundedReceiver<Vec<u8>> {
    async fn next_frame(&mut self) -> Option<Vec<u8>> {
        self.recv().await
    }
}

/// An accepted live connection, ready to run.
#[derive(Debug)]
pub struct LiveSession {
    /// The connected device.
    pub device: DeviceRecord,
    /// Registry entry for this connection.
    pub connection: Arc<LiveConnection>,
    /// State updates to write to the peer.
    pub outbound: mpsc::UnboundedReceiver<String>,
}

/// Why a live connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveExit {
    /// Cancelled by a newer connection or shutdown.
    Cancelled,
    /// The peer closed the connection.
    Closed,
    /// Nothing arrived within the idle timeout.
    IdleTimeout,
    /// A frame could not be decoded.
    DecodeError,
}

enum Inbound {
    Frame(Vec<u8>),
    Closed,
    Idle,
}

/// Outcome of applying one request's reports.
#[derive(Debug, Default)]
struct Applied {
    deleted: bool,
}

/// Orchestrates device polls and live connections.
pub struct DispatchLoop {
    context: Arc<HandlerContext>,
}

impl DispatchLoop {
    /// Creates a dispatch loop over the shared context.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// Handles one poll: verify, apply reports, drain, sign.
    pub fn poll(&self, request: &PollRequest) -> ServerResult<PollResponse> {
        let device_id = device_id_from_path(&request.target.path)
            .ok_or_else(|| ServerError::UnknownDevice("no device id in path".into()))?;
        let device = self.load_device(&device_id)?;

        self.authenticate(&device, request)?;

        let reports = decode_report_map(&request.body).map_err(|e| {
            warn!(device_id = %device.id, error = %e, "undecodable poll body");
            ServerError::from(e)
        })?;
        let mut applied = Applied::default();
        for (key, args) in &reports {
            self.apply_report(&device, key, args, &mut applied)?;
            if applied.deleted {
                break;
            }
        }

        let payload = if applied.deleted {
            fmd_protocol::EMPTY_PAYLOAD.to_string()
        } else {
            self.context.queue.drain(&device.id)?
        };
        if let Ok(command) = Command::from_payload(&payload) {
            self.context.stats.record_command_sent(command.code());
            info!(device_id = %device.id, code = %command.code(), "command sent to device");
        }

        let authorization = hawk::as_header(
            &request.target,
            &device.id,
            payload.as_bytes(),
            "",
            device.secret.as_bytes(),
        )
        .map_err(|e| ServerError::Internal(e.to_string()))?;

        Ok(PollResponse {
            authorization,
            body: payload,
        })
    }

    /// Accepts a live connection for the device named by `path`.
    ///
    /// Any existing connection for the device is cancelled first.
    pub fn connect(&self, path: &str) -> ServerResult<LiveSession> {
        let device_id = device_id_from_path(path)
            .ok_or_else(|| ServerError::UnknownDevice("no device id in path".into()))?;
        let device = self.load_device(&device_id)?;

        let (connection, outbound) = LiveConnection::new(device.id.clone());
        if self.context.registry.register(Arc::clone(&connection)).is_some() {
            self.context.stats.record_eviction();
        }
        self.context.stats.record_live_opened();
        info!(device_id = %device.id, "live connection opened");

        Ok(LiveSession {
            device,
            connection,
            outbound,
        })
    }

    /// Runs a live connection until it ends, then unregisters it.
    ///
    /// Cancellation is checked before every read and raced against it.
    /// Store failures only skip the frame that caused them.
    pub async fn run_live<F: FrameSource>(
        &self,
        device: &DeviceRecord,
        connection: &Arc<LiveConnection>,
        mut frames: F,
    ) -> LiveExit {
        let exit = loop {
            if connection.is_cancelled() {
                break LiveExit::Cancelled;
            }
            let inbound = tokio::select! {
                biased;
                _ = connection.cancelled() => break LiveExit::Cancelled,
                inbound = self.read_frame(&mut frames) => inbound,
            };
            let frame = match inbound {
                Inbound::Frame(frame) => frame,
                Inbound::Closed => break LiveExit::Closed,
                Inbound::Idle => break LiveExit::IdleTimeout,
            };

            let reports = match decode_report_map(&frame) {
                Ok(reports) => reports,
                Err(e) => {
                    warn!(device_id = %device.id, error = %e, "undecodable live frame");
                    break LiveExit::DecodeError;
                }
            };
            // Re-registration may have changed the accepted set or lock state.
            let reloaded;
            let current = match self.context.store.device(&device.id) {
                Ok(record) => {
                    reloaded = record;
                    &reloaded
                }
                Err(StoreError::UnknownDevice(_)) => {
                    info!(device_id = %device.id, "device removed while connected");
                    break LiveExit::Closed;
                }
                Err(e) => {
                    warn!(device_id = %device.id, error = %e, "could not reload device, using connect-time record");
                    device
                }
            };

            let mut applied = Applied::default();
            for (key, args) in &reports {
                if let Err(e) = self.apply_report(current, key, args, &mut applied) {
                    error!(device_id = %device.id, key = %key, error = %e, "could not apply live report");
                }
                if applied.deleted {
                    break;
                }
            }
            if applied.deleted {
                break LiveExit::Closed;
            }
        };

        self.context.registry.unregister(connection);
        self.context.stats.record_live_closed();
        info!(
            device_id = %device.id,
            exit = ?exit,
            age_ms = connection.age().as_millis() as u64,
            "live connection closed"
        );
        exit
    }

    async fn read_frame<F: FrameSource>(&self, frames: &mut F) -> Inbound {
        let next = match self.context.config.live_idle_timeout {
            Some(limit) => match tokio::time::timeout(limit, frames.next_frame()).await {
                Ok(next) => next,
                Err(_) => return Inbound::Idle,
            },
            None => frames.next_frame().await,
        };
        next.map_or(Inbound::Closed, Inbound::Frame)
    }

    fn load_device(&self, device_id: &str) -> ServerResult<DeviceRecord> {
        self.context.store.device(device_id).map_err(|e| match e {
            StoreError::UnknownDevice(id) => {
                self.context.stats.record_auth_failure();
                warn!(device_id = %id, "request for unknown device");
                ServerError::UnknownDevice(id)
            }
            other => {
                error!(device_id = %device_id, error = %other, "could not load device");
                ServerError::ResourceUnavailable(other.to_string())
            }
        })
    }

    fn authenticate(&self, device: &DeviceRecord, request: &PollRequest) -> ServerResult<()> {
        if self.context.config.signature_verification_disabled {
            warn!(device_id = %device.id, "accepting device request without signature check");
            return Ok(());
        }

        let result = parse_auth_header(request.authorization.as_deref()).and_then(|context| {
            if let Some(skew) = self.context.config.max_clock_skew {
                context.check_skew(unix_now(), skew)?;
            }
            context.verify(&request.target, &request.body, device.secret.as_bytes())
        });
        result.map_err(|e| {
            self.context.stats.record_auth_failure();
            warn!(device_id = %device.id, error = %e, "device signature rejected");
            ServerError::AuthenticationFailed(e.to_string())
        })
    }

    /// Applies one `(key, args)` report from a device.
    ///
    /// Codes the device did not opt into, and reports that do not decode,
    /// are dropped with a warning.
    fn apply_report(
        &self,
        device: &DeviceRecord,
        key: &str,
        args: &Value,
        applied: &mut Applied,
    ) -> ServerResult<()> {
        let stats = &self.context.stats;
        let accepted = CommandCode::key_char(key).is_some_and(|c| device.accepts.contains_char(c));
        if !accepted {
            warn!(device_id = %device.id, key = %key, accepts = %device.accepts, "dropping unaccepted report");
            stats.record_dropped_report();
            return Ok(());
        }
        let report = match DeviceReport::decode(key, args) {
            Ok(report) => report,
            Err(e) => {
                warn!(device_id = %device.id, key = %key, error = %e, "dropping undecodable report");
                stats.record_dropped_report();
                return Ok(());
            }
        };
        stats.record_report();
        debug!(device_id = %device.id, code = %report.code(), "applying report");

        let store = &self.context.store;
        match report {
            DeviceReport::Ack { state, .. } => {
                side_effect(&device.id, store.touch(&device.id))?;
                let lockable = self.update_lockable(device, &state)?;
                self.forward(&device.id, &state.to_position(lockable));
            }
            DeviceReport::LockState { locked } => {
                let state = StateReport {
                    locked: Some(locked),
                    ..Default::default()
                };
                let lockable = self.update_lockable(device, &state)?;
                self.forward(&device.id, &state.to_position(lockable));
            }
            DeviceReport::Track(state) => {
                let lockable = self.update_lockable(device, &state)?;
                let position = state.to_position(lockable);
                side_effect(&device.id, store.record_position(&device.id, position.clone()))?;
                self.forward(&device.id, &position);
            }
            DeviceReport::Quit => {
                if self.context.config.allow_self_delete {
                    side_effect(&device.id, store.delete_device(&device.id))?;
                    applied.deleted = true;
                    info!(device_id = %device.id, "device deleted itself");
                } else {
                    debug!(device_id = %device.id, "ignoring quit report, self delete disabled");
                }
            }
        }
        Ok(())
    }

    fn update_lockable(&self, device: &DeviceRecord, state: &StateReport) -> ServerResult<bool> {
        match state.locked {
            Some(locked) => {
                side_effect(&device.id, self.context.store.set_lockable(&device.id, !locked))?;
                Ok(!locked)
            }
            None => Ok(device.lockable),
        }
    }

    /// Sends a position to the device's live view, if one is connected.
    fn forward(&self, device_id: &str, position: &Position) {
        let Some(connection) = self.context.registry.lookup(device_id) else {
            return;
        };
        match serde_json::to_string(position) {
            Ok(update) => {
                if !connection.forward(update) {
                    debug!(device_id = %device_id, "live view already closed");
                }
            }
            Err(e) => warn!(device_id = %device_id, error = %e, "could not encode position"),
        }
    }
}

fn side_effect(device_id: &str, result: StoreResult<()>) -> ServerResult<()> {
    result.map_err(|e| {
        error!(device_id = %device_id, error = %e, "could not apply device report");
        ServerError::ResourceUnavailable(e.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::handler::Collaborators;
    use crate::notify::MemoryNotifier;
    use crate::session::{Identity, MemorySessionStore};
    use crate::store::tests::record;
    use crate::store::{MemoryStore, Store};
    use fmd_protocol::HawkContext;
    use std::time::Duration;

    const PATH: &str = "/1/cmd/abc123";

    struct Fixture {
        store: Arc<MemoryStore>,
        context: Arc<HandlerContext>,
        dispatch: DispatchLoop,
    }

    fn deny(_: &str) -> ServerResult<Identity> {
        Err(ServerError::AuthenticationFailed("no identity provider".into()))
    }

    fn fixture_with(config: ServerConfig, accepts: &str) -> Fixture {
        let store = Arc::new(MemoryStore::from_config(&config));
        store.register_device(record("abc123", "user", accepts)).unwrap();
        let context = Arc::new(HandlerContext::new(
            config,
            Collaborators {
                store: store.clone(),
                notifier: Arc::new(MemoryNotifier::new()),
                sessions: Arc::new(MemorySessionStore::new()),
                identity: Arc::new(deny),
            },
        ));
        Fixture {
            store,
            dispatch: DispatchLoop::new(Arc::clone(&context)),
            context,
        }
    }

    fn fixture(accepts: &str) -> Fixture {
        fixture_with(ServerConfig::default(), accepts)
    }

    fn target() -> RequestTarget {
        RequestTarget::new("POST", PATH, "fmd.example.com", 443)
    }

    fn signed(body: &str, secret: &[u8]) -> PollRequest {
        let header = HawkContext::sign(&target(), "abc123", unix_now(), "n0nce", "", body.as_bytes(), secret)
            .unwrap()
            .to_header();
        PollRequest {
            target: target(),
            authorization: Some(header),
            body: body.as_bytes().to_vec(),
        }
    }

    #[test]
    fn poll_drains_and_signs_reply() {
        let f = fixture("elrth");
        f.store.store_command("abc123", r#"{"l":{"c":42}}"#).unwrap();

        let reply = f.dispatch.poll(&signed("{}", b"s3cret")).unwrap();
        assert_eq!(reply.body, r#"{"l":{"c":42}}"#);
        parse_auth_header(Some(&reply.authorization))
            .unwrap()
            .verify(&target(), reply.body.as_bytes(), b"s3cret")
            .unwrap();
        assert_eq!(f.context.stats.commands_sent(CommandCode::Lock), 1);

        let again = f.dispatch.poll(&signed("", b"s3cret")).unwrap();
        assert_eq!(again.body, "{}");
    }

    #[test]
    fn bad_signature_never_drains() {
        let f = fixture("elrth");
        f.store.store_command("abc123", r#"{"r":{}}"#).unwrap();

        let err = f.dispatch.poll(&signed("{}", b"wrong")).unwrap_err();
        assert_eq!(err.status_code(), 401);

        let mut tampered = signed("{}", b"s3cret");
        tampered.body = br#"{"q":{}}"#.to_vec();
        assert_eq!(f.dispatch.poll(&tampered).unwrap_err().status_code(), 401);

        let mut unsigned = signed("{}", b"s3cret");
        unsigned.authorization = None;
        assert_eq!(f.dispatch.poll(&unsigned).unwrap_err().status_code(), 401);

        assert!(f.store.peek_pending("abc123").is_some());
        assert_eq!(f.context.stats.auth_failures(), 3);
    }

    #[test]
    fn unknown_device_matches_bad_signature() {
        let f = fixture("elrth");
        let mut request = signed("{}", b"s3cret");
        request.target.path = "/1/cmd/ffff9999".into();
        let unknown = f.dispatch.poll(&request).unwrap_err();
        let bad = f.dispatch.poll(&signed("{}", b"nope")).unwrap_err();
        assert_eq!(unknown.status_code(), bad.status_code());
        assert_eq!(unknown.public_message(), bad.public_message());
    }

    #[test]
    fn track_report_records_position() {
        let f = fixture("elrth");
        f.dispatch
            .poll(&signed(
                r#"{"t":{"la":45.5,"lo":-122.5,"ti":1393458000,"ha":true}}"#,
                b"s3cret",
            ))
            .unwrap();

        let device = f.store.device("abc123").unwrap();
        assert_eq!(device.positions.len(), 1);
        assert_eq!(device.positions[0].latitude, 45.5);
        assert!(!device.positions[0].lockable);
        assert!(!device.lockable);
    }

    #[test]
    fn ack_touches_without_logging_position() {
        let f = fixture("elrth");
        f.dispatch
            .poll(&signed(r#"{"r":{"ok":true,"la":1.0}}"#, b"s3cret"))
            .unwrap();
        let device = f.store.device("abc123").unwrap();
        assert!(device.last_seen.is_some());
        assert!(device.positions.is_empty());
    }

    #[test]
    fn unaccepted_and_undecodable_reports_are_dropped() {
        let f = fixture("lr");
        let reply = f
            .dispatch
            .poll(&signed(r#"{"t":{"la":1.0},"x":{},"l":{"la":"north"}}"#, b"s3cret"))
            .unwrap();
        assert_eq!(reply.body, "{}");
        assert!(f.store.device("abc123").unwrap().positions.is_empty());
        assert_eq!(f.context.stats.reports_dropped(), 3);
        assert_eq!(f.context.stats.reports_received(), 0);
    }

    #[test]
    fn lock_state_report_updates_lockable() {
        let f = fixture("elrth");
        f.dispatch.poll(&signed(r#"{"h":true}"#, b"s3cret")).unwrap();
        assert!(!f.store.device("abc123").unwrap().lockable);
        f.dispatch.poll(&signed(r#"{"h":"false"}"#, b"s3cret")).unwrap();
        assert!(f.store.device("abc123").unwrap().lockable);
    }

    #[test]
    fn quit_requires_self_delete() {
        let f = fixture("elrthq");
        f.dispatch.poll(&signed(r#"{"q":{}}"#, b"s3cret")).unwrap();
        assert!(f.store.device("abc123").is_ok());

        let f = fixture_with(ServerConfig::default().with_self_delete(true), "elrthq");
        let reply = f.dispatch.poll(&signed(r#"{"q":{}}"#, b"s3cret")).unwrap();
        assert_eq!(reply.body, "{}");
        assert!(f.store.is_empty());
    }

    #[test]
    fn self_delete_skips_remaining_reports() {
        let f = fixture_with(ServerConfig::default().with_self_delete(true), "elrthq");
        let reply = f
            .dispatch
            .poll(&signed(r#"{"q":{},"t":{"la":1.0}}"#, b"s3cret"))
            .unwrap();
        assert_eq!(reply.body, "{}");
        parse_auth_header(Some(&reply.authorization))
            .unwrap()
            .verify(&target(), b"{}", b"s3cret")
            .unwrap();
        assert!(f.store.is_empty());
        assert_eq!(f.context.stats.reports_received(), 1);
    }

    #[test]
    fn poll_history_follows_config() {
        let f = fixture_with(ServerConfig::default().with_position_history(2), "elrth");
        for la in [1.0, 2.0, 3.0] {
            let body = format!(r#"{{"t":{{"la":{la}}}}}"#);
            f.dispatch.poll(&signed(&body, b"s3cret")).unwrap();
        }
        let positions = f.store.device("abc123").unwrap().positions;
        assert_eq!(positions.len(), 2);
        assert_eq!(positions[1].latitude, 3.0);
    }

    #[test]
    fn body_must_be_an_object() {
        let f = fixture("elrth");
        let err = f.dispatch.poll(&signed("[1,2,3]", b"s3cret")).unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn store_outage_is_unavailable() {
        let f = fixture("elrth");
        let request = signed(r#"{"t":{"la":1.0}}"#, b"s3cret");
        f.store.set_unavailable(true);
        assert_eq!(f.dispatch.poll(&request).unwrap_err().status_code(), 503);
    }

    #[test]
    fn signature_check_can_be_disabled() {
        let f = fixture_with(
            ServerConfig::default().with_signature_verification_disabled(true),
            "elrth",
        );
        let reply = f
            .dispatch
            .poll(&PollRequest {
                target: target(),
                authorization: None,
                body: Vec::new(),
            })
            .unwrap();
        // Replies stay signed.
        parse_auth_header(Some(&reply.authorization))
            .unwrap()
            .verify(&target(), b"{}", b"s3cret")
            .unwrap();
    }

    #[test]
    fn stale_timestamps_rejected_when_window_set() {
        let f = fixture_with(
            ServerConfig::default().with_max_clock_skew(Duration::from_secs(60)),
            "elrth",
        );
        let header = HawkContext::sign(&target(), "abc123", 1000, "n0nce", "", b"{}", b"s3cret")
            .unwrap()
            .to_header();
        let err = f
            .dispatch
            .poll(&PollRequest {
                target: target(),
                authorization: Some(header),
                body: b"{}".to_vec(),
            })
            .unwrap_err();
        assert_eq!(err.status_code(), 401);
        assert!(f.dispatch.poll(&signed("{}", b"s3cret")).is_ok());
    }

    #[tokio::test]
    async fn live_frames_apply_and_forward() {
        let f = fixture("elrth");
        let LiveSession {
            device,
            connection,
            mut outbound,
        } = f.dispatch.connect("/1/socket/abc123").unwrap();
        let (tx, rx) = mpsc::unbounded_channel();

        tx.send(br#"{"t":{"la":10.0,"lo":20.0}}"#.to_vec()).unwrap();
        drop(tx);
        let exit = f.dispatch.run_live(&device, &connection, rx).await;

        assert_eq!(exit, LiveExit::Closed);
        assert_eq!(f.store.device("abc123").unwrap().positions.len(), 1);
        let update: Position = serde_json::from_str(&outbound.recv().await.unwrap()).unwrap();
        assert_eq!(update.longitude, 20.0);
        assert!(f.context.registry.lookup("abc123").is_none());
        assert_eq!(f.context.stats.live_connections(), 0);
    }

    #[tokio::test]
    async fn second_connection_evicts_first() {
        let f = Arc::new(fixture("elrth"));
        let first = f.dispatch.connect("/1/socket/abc123").unwrap();
        let (_tx, rx) = mpsc::unbounded_channel::<Vec<u8>>();

        let worker = tokio::spawn({
            let f = Arc::clone(&f);
            async move { f.dispatch.run_live(&first.device, &first.connection, rx).await }
        });

        let second = f.dispatch.connect("/1/socket/abc123").unwrap();
        let exit = tokio::time::timeout(Duration::from_secs(1), worker)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(exit, LiveExit::Cancelled);
        let current = f.context.registry.lookup("abc123").unwrap();
        assert!(Arc::ptr_eq(&current, &second.connection));
        assert_eq!(f.context.stats.evictions(), 1);
    }

    #[tokio::test]
    async fn undecodable_frame_ends_connection() {
        let f = fixture("elrth");
        let session = f.dispatch.connect("/1/socket/abc123").unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(b"not json".to_vec()).unwrap();

        let exit = f.dispatch.run_live(&session.device, &session.connection, rx).await;
        assert_eq!(exit, LiveExit::DecodeError);
        assert!(f.context.registry.is_empty());
    }

    #[tokio::test]
    async fn store_failure_keeps_connection_open() {
        let f = fixture("elrth");
        let session = f.dispatch.connect("/1/socket/abc123").unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        f.store.set_unavailable(true);
        tx.send(br#"{"t":{"la":1.0}}"#.to_vec()).unwrap();
        tx.send(br#"{"t":{"la":2.0}}"#.to_vec()).unwrap();
        drop(tx);

        let exit = f.dispatch.run_live(&session.device, &session.connection, rx).await;
        assert_eq!(exit, LiveExit::Closed);
    }

    #[tokio::test]
    async fn live_self_delete_closes_without_further_reports() {
        let f = fixture_with(ServerConfig::default().with_self_delete(true), "elrthq");
        let session = f.dispatch.connect("/1/socket/abc123").unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(br#"{"q":{},"t":{"la":1.0}}"#.to_vec()).unwrap();

        let exit = f.dispatch.run_live(&session.device, &session.connection, rx).await;
        assert_eq!(exit, LiveExit::Closed);
        assert!(f.store.is_empty());
        assert_eq!(f.context.stats.reports_received(), 1);
    }

    #[tokio::test]
    async fn live_uses_current_registration() {
        let f = fixture("elrth");
        let session = f.dispatch.connect("/1/socket/abc123").unwrap();
        f.store.register_device(record("abc123", "user", "lr")).unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(br#"{"t":{"la":1.0}}"#.to_vec()).unwrap();
        drop(tx);

        let exit = f.dispatch.run_live(&session.device, &session.connection, rx).await;
        assert_eq!(exit, LiveExit::Closed);
        assert!(f.store.device("abc123").unwrap().positions.is_empty());
        assert_eq!(f.context.stats.reports_dropped(), 1);
    }

    #[tokio::test]
    async fn live_ends_when_device_removed() {
        let f = fixture("elrth");
        let session = f.dispatch.connect("/1/socket/abc123").unwrap();
        f.store.delete_device("abc123").unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(br#"{"t":{"la":1.0}}"#.to_vec()).unwrap();

        let exit = f.dispatch.run_live(&session.device, &session.connection, rx).await;
        assert_eq!(exit, LiveExit::Closed);
        assert!(f.context.registry.is_empty());
    }

    #[tokio::test]
    async fn idle_connection_times_out() {
        let f = fixture_with(
            ServerConfig::default().with_live_idle_timeout(Duration::from_millis(20)),
            "elrth",
        );
        let session = f.dispatch.connect("/1/socket/abc123").unwrap();
        let (_tx, rx) = mpsc::unbounded_channel::<Vec<u8>>();

        let exit = f.dispatch.run_live(&session.device, &session.connection, rx).await;
        assert_eq!(exit, LiveExit::IdleTimeout);
    }

    #[test]
    fn connect_rejects_unknown_device() {
        let f = fixture("elrth");
        assert_eq!(f.dispatch.connect("/1/socket/ffff0000").unwrap_err().status_code(), 401);
        assert_eq!(f.dispatch.connect("/x").unwrap_err().status_code(), 401);
    }
}
