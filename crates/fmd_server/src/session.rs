//! Operator identity and cookie sessions.
//!
//! Identity providers are external: the server only needs an
//! [`IdentityVerifier`] that turns an assertion into a user id and email,
//! and a [`SessionStore`] that remembers who an operator is between calls.

use crate::error::{ServerError, ServerResult};
use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use base64::Engine;
use fmd_protocol::is_assertion_safe;
use parking_lot::RwLock;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::warn;

/// A verified operator identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Stable user id.
    pub user_id: String,
    /// Email address.
    pub email: String,
}

impl Identity {
    /// Returns the local part of the email, used as a default device name.
    pub fn local_name(&self) -> &str {
        self.email.split('@').next().unwrap_or_default()
    }
}

/// Resolves identity assertions.
pub trait IdentityVerifier: Send + Sync {
    /// Verifies `assertion` and returns who made it.
    fn verify(&self, assertion: &str) -> ServerResult<Identity>;
}

impl<F> IdentityVerifier for F
where
    F: Fn(&str) -> ServerResult<Identity> + Send + Sync,
{
    fn verify(&self, assertion: &str) -> ServerResult<Identity> {
        self(assertion)
    }
}

/// Checks the assertion charset, then defers to `verifier`.
pub(crate) fn verify_assertion(
    verifier: &dyn IdentityVerifier,
    assertion: &str,
) -> ServerResult<Identity> {
    if !is_assertion_safe(assertion) {
        return Err(ServerError::AuthenticationFailed(
            "assertion contains invalid characters".into(),
        ));
    }
    verifier.verify(assertion)
}

/// Reads the email from an assertion without checking its signature.
///
/// Only installed when identity verification is disabled in the
/// configuration. An empty assertion maps to a fixed test user.
#[derive(Debug)]
pub struct InsecureAssertionVerifier {
    _private: (),
}

impl InsecureAssertionVerifier {
    pub(crate) fn new() -> Self {
        Self { _private: () }
    }
}

impl IdentityVerifier for InsecureAssertionVerifier {
    fn verify(&self, assertion: &str) -> ServerResult<Identity> {
        warn!("identity verification disabled, trusting assertion");
        if assertion.is_empty() {
            return Ok(Identity {
                user_id: "user1".to_string(),
                email: "user@example.com".to_string(),
            });
        }

        let invalid = |reason: &str| ServerError::AuthenticationFailed(reason.to_string());
        let segment = assertion
            .split('.')
            .nth(1)
            .ok_or_else(|| invalid("assertion has no claims segment"))?
            .trim_end_matches('=');
        let decoded = URL_SAFE_NO_PAD
            .decode(segment)
            .or_else(|_| STANDARD_NO_PAD.decode(segment))
            .map_err(|_| invalid("undecodable assertion claims"))?;
        let claims: Value =
            serde_json::from_slice(&decoded).map_err(|_| invalid("assertion claims are not JSON"))?;
        let email = claims
            .pointer("/principal/email")
            .and_then(Value::as_str)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| invalid("assertion carries no email"))?;

        Ok(Identity {
            user_id: format!("{:x}", Sha256::digest(email.as_bytes())),
            email: email.to_string(),
        })
    }
}

/// What a cookie session remembers about an operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorSession {
    /// Verified user id.
    pub user_id: String,
    /// Operator email.
    pub email: String,
}

impl From<Identity> for OperatorSession {
    fn from(identity: Identity) -> Self {
        Self {
            user_id: identity.user_id,
            email: identity.email,
        }
    }
}

/// Operator session persistence, keyed by the session cookie.
pub trait SessionStore: Send + Sync {
    /// Loads a session.
    fn load(&self, key: &str) -> Option<OperatorSession>;
    /// Saves a session.
    fn save(&self, key: &str, session: OperatorSession);
    /// Forgets a session.
    fn clear(&self, key: &str);
}

/// In-memory [`SessionStore`].
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, OperatorSession>>,
}

impl MemorySessionStore {
    /// Creates an empty session store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self, key: &str) -> Option<OperatorSession> {
        self.sessions.read().get(key).cloned()
    }

    fn save(&self, key: &str, session: OperatorSession) {
        self.sessions.write().insert(key.to_string(), session);
    }

    fn clear(&self, key: &str) {
        self.sessions.write().remove(key);
    }
}
