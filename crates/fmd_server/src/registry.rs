//! Live connection registry.
//!
//! At most one [`LiveConnection`] is registered per device id. Installing
//! a new one cancels the previous one under the same lock, so exactly one
//! connection per device is ever "current".

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// One standing duplex connection to a device.
#[derive(Debug)]
pub struct LiveConnection {
    device_id: String,
    cancel: CancellationToken,
    created_at: Instant,
    outbound: mpsc::UnboundedSender<String>,
}

impl LiveConnection {
    /// Creates a connection and the receiver its transport writes from.
    pub fn new(device_id: impl Into<String>) -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let conn = Self {
            device_id: device_id.into(),
            cancel: CancellationToken::new(),
            created_at: Instant::now(),
            outbound,
        };
        (Arc::new(conn), rx)
    }

    /// Returns the device id.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Returns how long the connection has existed.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Asks the connection's worker to stop.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns true once cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Completes when the connection is cancelled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// Queues a state update for the operator view.
    ///
    /// Returns false if the transport has gone away.
    pub fn forward(&self, update: String) -> bool {
        self.outbound.send(update).is_ok()
    }
}

/// Process-wide table of live connections.
///
/// Created at startup and passed to whoever needs it; entries are never
/// persisted.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    connections: Mutex<HashMap<String, Arc<LiveConnection>>>,
}

impl DeviceRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `conn` as the current connection for its device.
    ///
    /// Any previous connection is cancelled before the new one becomes
    /// visible and is returned.
    pub fn register(&self, conn: Arc<LiveConnection>) -> Option<Arc<LiveConnection>> {
        let mut connections = self.connections.lock();
        let previous = connections.remove(conn.device_id());
        if let Some(old) = &previous {
            old.cancel();
            warn!(
                device_id = %conn.device_id(),
                age_ms = old.age().as_millis() as u64,
                "evicting previous live connection"
            );
        }
        connections.insert(conn.device_id().to_string(), conn);
        previous
    }

    /// Removes `conn` if it is still the current connection for its device.
    ///
    /// A stale connection unregistering after being replaced is a no-op.
    pub fn unregister(&self, conn: &Arc<LiveConnection>) -> bool {
        let mut connections = self.connections.lock();
        match connections.get(conn.device_id()) {
            Some(current) if Arc::ptr_eq(current, conn) => {
                connections.remove(conn.device_id());
                debug!(device_id = %conn.device_id(), "live connection unregistered");
                true
            }
            _ => false,
        }
    }

    /// Returns the current connection for a device.
    pub fn lookup(&self, device_id: &str) -> Option<Arc<LiveConnection>> {
        self.connections.lock().get(device_id).cloned()
    }

    /// Returns the number of registered connections.
    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.connections.lock().is_empty()
    }

    /// Cancels and removes every connection. Returns how many there were.
    pub fn shutdown(&self) -> usize {
        let drained: Vec<_> = self.connections.lock().drain().map(|(_, c)| c).collect();
        for conn in &drained {
            conn.cancel();
        }
        drained.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn register_evicts_previous() {
        let registry = DeviceRegistry::new();
        let (old, _rx1) = LiveConnection::new("dev");
        let (new, _rx2) = LiveConnection::new("dev");

        assert!(registry.register(old.clone()).is_none());
        let evicted = registry.register(new.clone()).unwrap();

        assert!(Arc::ptr_eq(&evicted, &old));
        assert!(old.is_cancelled());
        assert!(!new.is_cancelled());
        assert!(Arc::ptr_eq(&registry.lookup("dev").unwrap(), &new));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn stale_unregister_is_ignored() {
        let registry = DeviceRegistry::new();
        let (old, _rx1) = LiveConnection::new("dev");
        let (new, _rx2) = LiveConnection::new("dev");
        registry.register(old.clone());
        registry.register(new.clone());

        assert!(!registry.unregister(&old));
        assert!(Arc::ptr_eq(&registry.lookup("dev").unwrap(), &new));
        assert!(registry.unregister(&new));
        assert!(registry.lookup("dev").is_none());
    }

    #[test]
    fn devices_are_independent() {
        let registry = DeviceRegistry::new();
        let (a, _rx1) = LiveConnection::new("a");
        let (b, _rx2) = LiveConnection::new("b");
        registry.register(a.clone());
        registry.register(b.clone());
        assert!(!a.is_cancelled());
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.shutdown(), 2);
        assert!(a.is_cancelled() && b.is_cancelled());
        assert!(registry.is_empty());
    }

    #[test]
    fn concurrent_registers_leave_one_survivor() {
        let registry = Arc::new(DeviceRegistry::new());
        let conns: Vec<_> = (0..16).map(|_| LiveConnection::new("dev").0).collect();

        let handles: Vec<_> = conns
            .iter()
            .cloned()
            .map(|conn| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    registry.register(conn);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let current = registry.lookup("dev").unwrap();
        assert!(!current.is_cancelled());
        let live = conns.iter().filter(|c| !c.is_cancelled()).count();
        assert_eq!(live, 1);
    }

    #[test]
    fn forward_reaches_receiver() {
        let (conn, mut rx) = LiveConnection::new("dev");
        assert!(conn.forward("{\"t\":1}".into()));
        assert_eq!(rx.try_recv().unwrap(), "{\"t\":1}");
        drop(rx);
        assert!(!conn.forward("late".into()));
    }

    #[tokio::test]
    async fn cancelled_wakes_waiter() {
        let registry = DeviceRegistry::new();
        let (old, _rx1) = LiveConnection::new("dev");
        registry.register(old.clone());

        let waiter = tokio::spawn({
            let old = old.clone();
            async move { old.cancelled().await }
        });
        let (new, _rx2) = LiveConnection::new("dev");
        registry.register(new);

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
