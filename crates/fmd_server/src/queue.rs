//! Pending command queue.
//!
//! Each device holds at most one outstanding command. A new enqueue
//! overwrites the previous one, so re-issuing a command is always safe.

use crate::error::{ServerError, ServerResult};
use crate::notify::Notifier;
use crate::stats::ServerStats;
use crate::store::{DeviceRecord, Store};
use fmd_protocol::{Command, EMPTY_PAYLOAD};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Persists pending commands and wakes devices.
///
/// Holds no per-device state; concurrent callers for one device are
/// serialized by the [`Store`].
pub struct CommandQueueService {
    store: Arc<dyn Store>,
    notifier: Arc<dyn Notifier>,
    stats: Arc<ServerStats>,
}

impl CommandQueueService {
    /// Creates a queue over the given collaborators.
    pub fn new(store: Arc<dyn Store>, notifier: Arc<dyn Notifier>, stats: Arc<ServerStats>) -> Self {
        Self {
            store,
            notifier,
            stats,
        }
    }

    /// Queues `command` for `device` and asks the device to poll.
    ///
    /// Fails with [`ServerError::Unprocessable`] and leaves the pending
    /// command untouched if the device does not accept the code. A wake-up
    /// failure is reported even though the command stays queued.
    pub fn enqueue(&self, device: &DeviceRecord, command: &Command) -> ServerResult<()> {
        let code = command.code();
        if !device.accepts.accepts(code) {
            warn!(
                device_id = %device.id,
                code = %code,
                accepts = %device.accepts,
                "device does not accept command"
            );
            return Err(ServerError::Unprocessable(format!("code {code} not accepted")));
        }

        let payload = command
            .to_payload()
            .map_err(|e| ServerError::Internal(e.to_string()))?;

        self.store.store_command(&device.id, &payload).map_err(|e| {
            error!(device_id = %device.id, error = %e, "could not store command");
            ServerError::from(e)
        })?;
        self.stats.record_command_queued();

        self.notifier.wake(device).map_err(|e| {
            error!(device_id = %device.id, error = %e, "could not wake device");
            ServerError::from(e)
        })?;
        self.stats.record_push();

        debug!(device_id = %device.id, code = %code, "command queued");
        Ok(())
    }

    /// Returns and clears the pending command.
    ///
    /// Returns the empty-object sentinel when nothing is pending, never an
    /// empty body.
    pub fn drain(&self, device_id: &str) -> ServerResult<String> {
        let pending = self.store.take_pending(device_id).map_err(|e| {
            error!(device_id = %device_id, error = %e, "could not read pending command");
            ServerError::from(e)
        })?;
        Ok(match pending {
            Some(payload) if payload.len() >= EMPTY_PAYLOAD.len() => payload,
            _ => EMPTY_PAYLOAD.to_string(),
        })
    }

    /// Records that the device is alive without touching its queue.
    pub fn touch(&self, device_id: &str) -> ServerResult<()> {
        self.store.touch(device_id).map_err(ServerError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::MemoryNotifier;
    use crate::store::tests::record;
    use crate::store::MemoryStore;
    use fmd_protocol::{DurationArgs, EraseArgs, LockArgs};

    struct Fixture {
        store: Arc<MemoryStore>,
        notifier: Arc<MemoryNotifier>,
        stats: Arc<ServerStats>,
        queue: CommandQueueService,
        device: DeviceRecord,
    }

    fn fixture(accepts: &str) -> Fixture {
        let store = Arc::new(MemoryStore::default());
        let notifier = Arc::new(MemoryNotifier::new());
        let stats = Arc::new(ServerStats::new());
        let device = record("abc123", "user", accepts);
        store.register_device(device.clone()).unwrap();
        let queue = CommandQueueService::new(store.clone(), notifier.clone(), stats.clone());
        Fixture {
            store,
            notifier,
            stats,
            queue,
            device,
        }
    }

    fn lock(code: u64) -> Command {
        Command::Lock(LockArgs {
            code: Some(code),
            message: None,
        })
    }

    #[test]
    fn drain_empty_returns_sentinel() {
        let f = fixture("elrth");
        assert_eq!(f.queue.drain("abc123").unwrap(), "{}");
    }

    #[test]
    fn enqueue_then_drain_once() {
        let f = fixture("elrth");
        f.queue.enqueue(&f.device, &lock(42)).unwrap();

        assert_eq!(f.queue.drain("abc123").unwrap(), r#"{"l":{"c":42}}"#);
        assert_eq!(f.queue.drain("abc123").unwrap(), "{}");
        assert_eq!(f.notifier.woken(), vec!["abc123".to_string()]);
        assert_eq!(f.stats.commands_queued(), 1);
        assert_eq!(f.stats.pushes_sent(), 1);
    }

    #[test]
    fn later_enqueue_supersedes() {
        let f = fixture("elrth");
        f.queue.enqueue(&f.device, &lock(1)).unwrap();
        f.queue
            .enqueue(&f.device, &Command::Ring(DurationArgs { duration: Some(5) }))
            .unwrap();
        assert_eq!(f.queue.drain("abc123").unwrap(), r#"{"r":{"d":5}}"#);
    }

    #[test]
    fn unaccepted_code_leaves_pending_unchanged() {
        let f = fixture("lr");
        f.queue.enqueue(&f.device, &lock(7)).unwrap();

        let err = f
            .queue
            .enqueue(&f.device, &Command::Erase(EraseArgs {}))
            .unwrap_err();
        assert_eq!(err.status_code(), 422);
        assert_eq!(f.store.peek_pending("abc123").as_deref(), Some(r#"{"l":{"c":7}}"#));
        assert_eq!(f.notifier.woken().len(), 1);
    }

    #[test]
    fn store_failure_is_unavailable() {
        let f = fixture("elrth");
        f.store.set_unavailable(true);
        let err = f.queue.enqueue(&f.device, &lock(1)).unwrap_err();
        assert_eq!(err.status_code(), 503);
        assert!(f.notifier.woken().is_empty());
        assert_eq!(f.queue.drain("abc123").unwrap_err().status_code(), 503);
    }

    #[test]
    fn wake_failure_keeps_command_queued() {
        let f = fixture("elrth");
        f.notifier.set_failing(true);
        let err = f.queue.enqueue(&f.device, &lock(3)).unwrap_err();
        assert_eq!(err.status_code(), 503);
        assert_eq!(f.queue.drain("abc123").unwrap(), r#"{"l":{"c":3}}"#);
    }

    #[test]
    fn touch_keeps_pending() {
        let f = fixture("elrth");
        f.queue.enqueue(&f.device, &lock(9)).unwrap();
        f.queue.touch("abc123").unwrap();
        assert!(f.store.device("abc123").unwrap().last_seen.is_some());
        assert!(f.store.peek_pending("abc123").is_some());
    }
}
