//! Device storage.
//!
//! The [`Store`] trait is the contract the server needs from persistence:
//! device records, position history and the single pending command per
//! device. [`MemoryStore`] backs tests and single-process deployments.

use crate::config::ServerConfig;
use fmd_protocol::hawk::unix_now;
use fmd_protocol::{AcceptedCommands, Position};
use parking_lot::RwLock;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of a generated device secret.
pub const SECRET_LEN: usize = 32;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Store failures.
#[derive(Error, Debug)]
pub enum StoreError {
    /// No device with this id.
    #[error("unknown device: {0}")]
    UnknownDevice(String),

    /// The backend failed.
    #[error("store backend error: {0}")]
    Backend(String),
}

/// A per-device shared secret.
///
/// Never printed; wiped from memory on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct DeviceSecret(String);

impl DeviceSecret {
    /// Wraps an existing secret.
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Generates a fresh random secret.
    pub fn generate() -> Self {
        Self(
            rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(SECRET_LEN)
                .map(char::from)
                .collect(),
        )
    }

    /// Returns the secret text.
    ///
    /// Only for signing and the registration reply.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Returns the secret as HMAC key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for DeviceSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DeviceSecret(***)")
    }
}

/// A registered device.
#[derive(Debug, Clone)]
pub struct DeviceRecord {
    /// Filtered device id.
    pub id: String,
    /// Owning user id.
    pub user_id: String,
    /// Display name.
    pub name: String,
    /// Shared signing secret.
    pub secret: DeviceSecret,
    /// Push delivery address.
    pub push_url: String,
    /// Codes the device opted into.
    pub accepts: AcceptedCommands,
    /// Whether the device can be locked remotely.
    pub lockable: bool,
    /// Most recent positions, newest last.
    pub positions: Vec<Position>,
    /// Last contact (Unix seconds).
    pub last_seen: Option<u64>,
}

impl DeviceRecord {
    /// Returns true if `user_id` owns this device.
    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }

    /// Returns the operator-facing view.
    pub fn view(&self) -> DeviceView {
        DeviceView {
            id: self.id.clone(),
            name: self.name.clone(),
            lockable: self.lockable,
            accepts: self.accepts.clone(),
            positions: self.positions.clone(),
            last_seen: self.last_seen,
        }
    }
}

/// What an operator may see of a device. Carries no secret.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceView {
    /// Device id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Whether the device can be locked remotely.
    pub lockable: bool,
    /// Accepted command codes.
    pub accepts: AcceptedCommands,
    /// Position history, newest last.
    pub positions: Vec<Position>,
    /// Last contact (Unix seconds).
    pub last_seen: Option<u64>,
}

/// Device persistence.
///
/// Implementations serialize writes per device id.
pub trait Store: Send + Sync {
    /// Inserts or replaces a device and returns the id it was stored under.
    fn register_device(&self, record: DeviceRecord) -> StoreResult<String>;

    /// Loads a device.
    fn device(&self, id: &str) -> StoreResult<DeviceRecord>;

    /// Lists the ids and names of a user's devices.
    fn devices_for_user(&self, user_id: &str) -> StoreResult<Vec<(String, String)>>;

    /// Updates the lockable flag.
    fn set_lockable(&self, id: &str, lockable: bool) -> StoreResult<()>;

    /// Appends a position.
    fn record_position(&self, id: &str, position: Position) -> StoreResult<()>;

    /// Replaces the pending command payload.
    fn store_command(&self, id: &str, payload: &str) -> StoreResult<()>;

    /// Removes and returns the pending command payload.
    fn take_pending(&self, id: &str) -> StoreResult<Option<String>>;

    /// Records liveness.
    fn touch(&self, id: &str) -> StoreResult<()>;

    /// Deletes a device and everything stored for it.
    fn delete_device(&self, id: &str) -> StoreResult<()>;
}

#[derive(Debug)]
struct Entry {
    record: DeviceRecord,
    pending: Option<String>,
}

/// In-memory [`Store`].
#[derive(Debug)]
pub struct MemoryStore {
    devices: RwLock<HashMap<String, Entry>>,
    position_history: usize,
    unavailable: AtomicBool,
}

impl MemoryStore {
    /// Creates an empty store keeping `position_history` positions per device.
    pub fn new(position_history: usize) -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
            position_history: position_history.max(1),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Creates an empty store sized by [`ServerConfig::position_history`].
    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(config.position_history)
    }

    /// Makes every operation fail with a backend error while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Returns the number of stored devices.
    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    /// Returns true if no devices are stored.
    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }

    /// Returns the pending payload without consuming it.
    pub fn peek_pending(&self, id: &str) -> Option<String> {
        self.devices.read().get(id).and_then(|e| e.pending.clone())
    }

    fn check(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("store unavailable".into()));
        }
        Ok(())
    }

    fn update<T>(&self, id: &str, f: impl FnOnce(&mut Entry) -> T) -> StoreResult<T> {
        self.check()?;
        let mut devices = self.devices.write();
        let entry = devices
            .get_mut(id)
            .ok_or_else(|| StoreError::UnknownDevice(id.to_string()))?;
        Ok(f(entry))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::from_config(&ServerConfig::default())
    }
}

impl Store for MemoryStore {
    fn register_device(&self, mut record: DeviceRecord) -> StoreResult<String> {
        self.check()?;
        let id = record.id.clone();
        let mut devices = self.devices.write();
        match devices.get_mut(&id) {
            Some(entry) => {
                record.positions = std::mem::take(&mut entry.record.positions);
                entry.record = record;
            }
            None => {
                devices.insert(
                    id.clone(),
                    Entry {
                        record,
                        pending: None,
                    },
                );
            }
        }
        Ok(id)
    }

    fn device(&self, id: &str) -> StoreResult<DeviceRecord> {
        self.check()?;
        self.devices
            .read()
            .get(id)
            .map(|e| e.record.clone())
            .ok_or_else(|| StoreError::UnknownDevice(id.to_string()))
    }

    fn devices_for_user(&self, user_id: &str) -> StoreResult<Vec<(String, String)>> {
        self.check()?;
        let mut devices: Vec<_> = self
            .devices
            .read()
            .values()
            .filter(|e| e.record.is_owned_by(user_id))
            .map(|e| (e.record.id.clone(), e.record.name.clone()))
            .collect();
        devices.sort();
        Ok(devices)
    }

    fn set_lockable(&self, id: &str, lockable: bool) -> StoreResult<()> {
        self.update(id, |e| e.record.lockable = lockable)
    }

    fn record_position(&self, id: &str, position: Position) -> StoreResult<()> {
        let limit = self.position_history;
        self.update(id, |e| {
            let positions = &mut e.record.positions;
            positions.push(position);
            if positions.len() > limit {
                let excess = positions.len() - limit;
                positions.drain(..excess);
            }
            e.record.last_seen = Some(unix_now());
        })
    }

    fn store_command(&self, id: &str, payload: &str) -> StoreResult<()> {
        self.update(id, |e| e.pending = Some(payload.to_string()))
    }

    fn take_pending(&self, id: &str) -> StoreResult<Option<String>> {
        self.update(id, |e| e.pending.take())
    }

    fn touch(&self, id: &str) -> StoreResult<()> {
        self.update(id, |e| e.record.last_seen = Some(unix_now()))
    }

    fn delete_device(&self, id: &str) -> StoreResult<()> {
        self.check()?;
        self.devices
            .write()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::UnknownDevice(id.to_string()))
    }
}
