//! Out-of-band device wake-up.

use crate::store::DeviceRecord;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// Result type for notifier operations.
pub type NotifyResult<T> = Result<T, NotifyError>;

/// Push delivery failures.
#[derive(Error, Debug)]
pub enum NotifyError {
    /// The device has no usable push address.
    #[error("no push address for device {0}")]
    NoAddress(String),

    /// Delivery failed.
    #[error("push delivery failed: {0}")]
    Delivery(String),
}

/// Asks a device to poll.
pub trait Notifier: Send + Sync {
    /// Sends a wake-up to the device's push address.
    fn wake(&self, device: &DeviceRecord) -> NotifyResult<()>;
}

/// Records wake-ups instead of sending them.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    woken: Mutex<Vec<String>>,
    failing: AtomicBool,
}

impl MemoryNotifier {
    /// Creates a notifier with no recorded wake-ups.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every wake-up fail while set.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Returns the ids woken so far, oldest first.
    pub fn woken(&self) -> Vec<String> {
        self.woken.lock().clone()
    }
}

impl Notifier for MemoryNotifier {
    fn wake(&self, device: &DeviceRecord) -> NotifyResult<()> {
        if device.push_url.is_empty() {
            return Err(NotifyError::NoAddress(device.id.clone()));
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError::Delivery("push endpoint unreachable".into()));
        }
        self.woken.lock().push(device.id.clone());
        Ok(())
    }
}
