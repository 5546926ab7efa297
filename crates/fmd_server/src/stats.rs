//! Server statistics.
//!
//! Counters are atomic and may be read while requests are in flight.
//! Everything is monotonic except the live connection gauge.

use fmd_protocol::CommandCode;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Server statistics and metrics.
#[derive(Debug, Default)]
pub struct ServerStats {
    /// Successful device registrations.
    registrations: AtomicU64,
    /// Device reports applied.
    reports_received: AtomicU64,
    /// Device reports dropped (not accepted or undecodable).
    reports_dropped: AtomicU64,
    /// Commands handed to devices, by code (indexed as `CommandCode::ALL`).
    commands_sent: [AtomicU64; 7],
    /// Commands queued by operators.
    commands_queued: AtomicU64,
    /// Wake-ups delivered to the notifier.
    pushes_sent: AtomicU64,
    /// Rejected signatures and identities.
    auth_failures: AtomicU64,
    /// Currently registered live connections.
    live_connections: AtomicU64,
    /// Live connections cancelled by a newer one.
    evictions: AtomicU64,
}

/// A serializable copy of [`ServerStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Successful device registrations.
    pub registrations: u64,
    /// Device reports applied.
    pub reports_received: u64,
    /// Device reports dropped.
    pub reports_dropped: u64,
    /// Commands handed to devices, keyed by code.
    pub commands_sent: BTreeMap<String, u64>,
    /// Commands queued by operators.
    pub commands_queued: u64,
    /// Wake-ups delivered.
    pub pushes_sent: u64,
    /// Rejected signatures and identities.
    pub auth_failures: u64,
    /// Currently registered live connections.
    pub live_connections: u64,
    /// Live connections cancelled by a newer one.
    pub evictions: u64,
}

fn code_index(code: CommandCode) -> usize {
    CommandCode::ALL
        .iter()
        .position(|c| *c == code)
        .unwrap_or_default()
}

impl ServerStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    // === Increment methods (internal use) ===

    pub(crate) fn record_registration(&self) {
        self.registrations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_report(&self) {
        self.reports_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped_report(&self) {
        self.reports_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_command_sent(&self, code: CommandCode) {
        self.commands_sent[code_index(code)].fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_command_queued(&self) {
        self.commands_queued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_push(&self) {
        self.pushes_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_auth_failure(&self) {
        self.auth_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_live_opened(&self) {
        self.live_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_live_closed(&self) {
        // Saturate; a gauge never wraps below zero.
        let _ = self
            .live_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub(crate) fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    // === Getter methods (public API) ===

    /// Returns the number of successful registrations.
    pub fn registrations(&self) -> u64 {
        self.registrations.load(Ordering::Relaxed)
    }

    /// Returns the number of device reports applied.
    pub fn reports_received(&self) -> u64 {
        self.reports_received.load(Ordering::Relaxed)
    }

    /// Returns the number of device reports dropped.
    pub fn reports_dropped(&self) -> u64 {
        self.reports_dropped.load(Ordering::Relaxed)
    }

    /// Returns how many commands with `code` were handed to devices.
    pub fn commands_sent(&self, code: CommandCode) -> u64 {
        self.commands_sent[code_index(code)].load(Ordering::Relaxed)
    }

    /// Returns the number of queued commands.
    pub fn commands_queued(&self) -> u64 {
        self.commands_queued.load(Ordering::Relaxed)
    }

    /// Returns the number of wake-ups delivered.
    pub fn pushes_sent(&self) -> u64 {
        self.pushes_sent.load(Ordering::Relaxed)
    }

    /// Returns the number of authentication failures.
    pub fn auth_failures(&self) -> u64 {
        self.auth_failures.load(Ordering::Relaxed)
    }

    /// Returns the number of live connections.
    pub fn live_connections(&self) -> u64 {
        self.live_connections.load(Ordering::Relaxed)
    }

    /// Returns the number of evicted live connections.
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Takes a snapshot of every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            registrations: self.registrations(),
            reports_received: self.reports_received(),
            reports_dropped: self.reports_dropped(),
            commands_sent: CommandCode::ALL
                .iter()
                .map(|code| (code.to_string(), self.commands_sent(*code)))
                .filter(|(_, n)| *n > 0)
                .collect(),
            commands_queued: self.commands_queued(),
            pushes_sent: self.pushes_sent(),
            auth_failures: self.auth_failures(),
            live_connections: self.live_connections(),
            evictions: self.evictions(),
        }
    }
}
