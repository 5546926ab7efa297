//! Server configuration.

use fmd_protocol::{AcceptedCommands, SanitizeLimits};
use std::time::Duration;

/// Configuration for the fmd server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Largest lock code an operator may set.
    pub lock_code_max: u64,
    /// Longest ring duration in seconds.
    pub ring_max: u64,
    /// Longest track duration in seconds.
    pub track_max: u64,
    /// Whether a `q` report deletes the device.
    pub allow_self_delete: bool,
    /// Skips inbound signature checks. Never enable in production.
    pub signature_verification_disabled: bool,
    /// Accepts unverified identity assertions. Never enable in production.
    pub identity_verification_disabled: bool,
    /// Codes a device accepts when it registers without a list.
    pub default_accepts: String,
    /// Allowed distance between a request timestamp and the server clock.
    pub max_clock_skew: Option<Duration>,
    /// Closes a live connection that sends nothing for this long.
    pub live_idle_timeout: Option<Duration>,
    /// Positions kept per device by the in-memory store.
    pub position_history: usize,
    /// Version string reported by the status handler.
    pub version: String,
}

impl ServerConfig {
    /// Creates a configuration with production defaults.
    pub fn new() -> Self {
        Self {
            lock_code_max: 9999,
            ring_max: 10500,
            track_max: 10500,
            allow_self_delete: false,
            signature_verification_disabled: false,
            identity_verification_disabled: false,
            default_accepts: "elrth".to_string(),
            max_clock_skew: None,
            live_idle_timeout: None,
            position_history: 10,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Sets the lock code ceiling.
    pub fn with_lock_code_max(mut self, max: u64) -> Self {
        self.lock_code_max = max;
        self
    }

    /// Sets the ring duration ceiling.
    pub fn with_ring_max(mut self, max: u64) -> Self {
        self.ring_max = max;
        self
    }

    /// Sets the track duration ceiling.
    pub fn with_track_max(mut self, max: u64) -> Self {
        self.track_max = max;
        self
    }

    /// Lets devices delete themselves with a `q` report.
    pub fn with_self_delete(mut self, allow: bool) -> Self {
        self.allow_self_delete = allow;
        self
    }

    /// Disables inbound signature verification.
    pub fn with_signature_verification_disabled(mut self, disabled: bool) -> Self {
        self.signature_verification_disabled = disabled;
        self
    }

    /// Disables identity assertion verification.
    pub fn with_identity_verification_disabled(mut self, disabled: bool) -> Self {
        self.identity_verification_disabled = disabled;
        self
    }

    /// Sets the default accepted command codes.
    pub fn with_default_accepts(mut self, codes: impl Into<String>) -> Self {
        self.default_accepts = codes.into();
        self
    }

    /// Enables the request timestamp window.
    pub fn with_max_clock_skew(mut self, skew: Duration) -> Self {
        self.max_clock_skew = Some(skew);
        self
    }

    /// Enables the live connection idle timeout.
    pub fn with_live_idle_timeout(mut self, timeout: Duration) -> Self {
        self.live_idle_timeout = Some(timeout);
        self
    }

    /// Sets how many positions are kept per device.
    pub fn with_position_history(mut self, len: usize) -> Self {
        self.position_history = len;
        self
    }

    /// Sets the reported version.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Returns the sanitizer limits.
    pub fn sanitize_limits(&self) -> SanitizeLimits {
        SanitizeLimits {
            lock_code_max: self.lock_code_max,
            ring_max: self.ring_max,
            track_max: self.track_max,
        }
    }

    /// Returns the default accepted command set.
    pub fn default_accepted(&self) -> AcceptedCommands {
        AcceptedCommands::new(&self.default_accepts)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}
