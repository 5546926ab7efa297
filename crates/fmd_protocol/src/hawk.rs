//! Hawk-style mutual request/response signatures.
//!
//! Every device request and every server reply carries an `Authorization`
//! header signed with the device's shared secret. Nothing is kept on the
//! server between requests: the signature covers a nonce, a timestamp and
//! the request coordinates, so both sides can rebuild it independently.
//!
//! ## Canonical string
//!
//! ```text
//! hawk.1.header
//! {ts}
//! {nonce}
//! {METHOD}
//! {path}
//! {host}
//! {port}
//! {hash}
//! {ext}
//!
//! ```
//!
//! `hash` is base64(SHA-256(raw body)). The signature is
//! base64(HMAC-SHA256(secret, canonical string)).
//!
//! Any deviation between the two parties (trailing slash, port, case of
//! the method) surfaces as a plain signature mismatch.

use crate::error::{ProtocolError, ProtocolResult};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// First line of every canonical string.
pub const HEADER_VERSION: &str = "hawk.1.header";

/// Authorization scheme name.
pub const SCHEME: &str = "Hawk";

/// Length of generated nonces.
pub const NONCE_LEN: usize = 8;

/// The request coordinates folded into the canonical string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTarget {
    /// HTTP method.
    pub method: String,
    /// Request path, including the query string as sent.
    pub path: String,
    /// Host name without port.
    pub host: String,
    /// Port number.
    pub port: u16,
}

impl RequestTarget {
    /// Creates a request target.
    pub fn new(
        method: impl Into<String>,
        path: impl Into<String>,
        host: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            host: host.into(),
            port,
        }
    }

    /// Builds a target from a `Host` header value such as `example.com:8080`.
    ///
    /// `default_port` applies when the header carries no port.
    pub fn from_host_header(
        method: impl Into<String>,
        path: impl Into<String>,
        host_header: &str,
        default_port: u16,
    ) -> ProtocolResult<Self> {
        let host_header = host_header.trim();
        if host_header.is_empty() {
            return Err(ProtocolError::MalformedHeader("empty host".into()));
        }
        let (host, port) = match host_header.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') || host.ends_with(']') => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| ProtocolError::MalformedHeader(format!("bad port {port:?}")))?;
                (host, port)
            }
            _ => (host_header, default_port),
        };
        Ok(Self::new(method, path, host, port))
    }
}

/// The fields of one signed request or response.
///
/// Built per message and never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HawkContext {
    /// Credential id (the device id).
    pub id: String,
    /// Unix timestamp in seconds.
    pub timestamp: u64,
    /// Random nonce.
    pub nonce: String,
    /// Application extension data.
    pub extension: String,
    /// Payload hash as sent, if any.
    pub hash: Option<String>,
    /// Base64 signature.
    pub signature: String,
}

impl HawkContext {
    /// Signs a message body with explicit timestamp and nonce.
    pub fn sign(
        target: &RequestTarget,
        id: &str,
        timestamp: u64,
        nonce: &str,
        extension: &str,
        body: &[u8],
        secret: &[u8],
    ) -> ProtocolResult<Self> {
        let hash = payload_hash(body);
        let signature =
            compute_signature(target, timestamp, nonce, extension, &hash, secret)?;
        Ok(Self {
            id: id.to_string(),
            timestamp,
            nonce: nonce.to_string(),
            extension: extension.to_string(),
            hash: Some(hash),
            signature,
        })
    }

    /// Verifies this context against a body and the shared secret.
    ///
    /// The payload hash is always recomputed from `body`; a hash carried
    /// in the header must agree with it.
    pub fn verify(&self, target: &RequestTarget, body: &[u8], secret: &[u8]) -> ProtocolResult<()> {
        let hash = payload_hash(body);
        if let Some(claimed) = &self.hash {
            if !compare(claimed, &hash) {
                return Err(ProtocolError::SignatureMismatch);
            }
        }
        let expected = compute_signature(
            target,
            self.timestamp,
            &self.nonce,
            &self.extension,
            &hash,
            secret,
        )?;
        if compare(&expected, &self.signature) {
            Ok(())
        } else {
            Err(ProtocolError::SignatureMismatch)
        }
    }

    /// Rejects timestamps further than `max_skew` from `now`.
    pub fn check_skew(&self, now: u64, max_skew: Duration) -> ProtocolResult<()> {
        if now.abs_diff(self.timestamp) > max_skew.as_secs() {
            return Err(ProtocolError::StaleTimestamp);
        }
        Ok(())
    }

    /// Renders the `Authorization` header value.
    pub fn to_header(&self) -> String {
        let mut header = format!(
            "{SCHEME} id=\"{}\", ts=\"{}\", nonce=\"{}\"",
            self.id, self.timestamp, self.nonce
        );
        if let Some(hash) = &self.hash {
            header.push_str(&format!(", hash=\"{hash}\""));
        }
        if !self.extension.is_empty() {
            header.push_str(&format!(", ext=\"{}\"", self.extension));
        }
        header.push_str(&format!(", mac=\"{}\"", self.signature));
        header
    }
}

/// Parses an `Authorization` header into its fields.
///
/// `ts`, `nonce` and `mac` are required. Unknown or repeated attributes
/// are rejected.
pub fn parse_auth_header(value: Option<&str>) -> ProtocolResult<HawkContext> {
    let value = value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(ProtocolError::MissingHeader)?;
    let (scheme, attributes) = value
        .split_once(char::is_whitespace)
        .ok_or_else(|| malformed("missing attributes"))?;
    if !scheme.eq_ignore_ascii_case(SCHEME) {
        return Err(malformed("unsupported scheme"));
    }

    let mut id = None;
    let mut timestamp = None;
    let mut nonce = None;
    let mut extension = None;
    let mut hash = None;
    let mut signature = None;

    for (key, val) in split_attributes(attributes)? {
        let slot = match key {
            "id" => &mut id,
            "ts" => &mut timestamp,
            "nonce" => &mut nonce,
            "ext" => &mut extension,
            "hash" => &mut hash,
            "mac" => &mut signature,
            other => return Err(malformed(&format!("unknown attribute {other:?}"))),
        };
        if slot.replace(val.to_string()).is_some() {
            return Err(malformed(&format!("duplicate attribute {key:?}")));
        }
    }

    let timestamp = timestamp
        .ok_or_else(|| malformed("missing ts"))?
        .parse::<u64>()
        .map_err(|_| malformed("ts is not a number"))?;
    let nonce = nonce
        .filter(|n| !n.is_empty())
        .ok_or_else(|| malformed("missing nonce"))?;
    let signature = signature
        .filter(|m| !m.is_empty())
        .ok_or_else(|| malformed("missing mac"))?;

    Ok(HawkContext {
        id: id.unwrap_or_default(),
        timestamp,
        nonce,
        extension: extension.unwrap_or_default(),
        hash,
        signature,
    })
}

fn split_attributes(input: &str) -> ProtocolResult<Vec<(&str, &str)>> {
    let mut rest = input.trim();
    let mut attributes = Vec::new();
    while !rest.is_empty() {
        let (key, after) = rest
            .split_once('=')
            .ok_or_else(|| malformed("expected key=\"value\""))?;
        let key = key.trim();
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(malformed("bad attribute name"));
        }
        let after = after
            .trim_start()
            .strip_prefix('"')
            .ok_or_else(|| malformed("unquoted attribute value"))?;
        let end = after
            .find('"')
            .ok_or_else(|| malformed("unterminated attribute value"))?;
        attributes.push((key, &after[..end]));

        rest = after[end + 1..].trim_start();
        if let Some(next) = rest.strip_prefix(',') {
            rest = next.trim_start();
        } else if !rest.is_empty() {
            return Err(malformed("expected ','"));
        }
    }
    Ok(attributes)
}

fn malformed(reason: &str) -> ProtocolError {
    ProtocolError::MalformedHeader(reason.to_string())
}

/// Base64 SHA-256 of a raw body.
pub fn payload_hash(body: &[u8]) -> String {
    BASE64.encode(Sha256::digest(body))
}

/// Builds the canonical string both parties sign.
pub fn canonical_string(
    target: &RequestTarget,
    timestamp: u64,
    nonce: &str,
    extension: &str,
    body_hash: &str,
) -> String {
    format!(
        "{HEADER_VERSION}\n{timestamp}\n{nonce}\n{}\n{}\n{}\n{}\n{body_hash}\n{extension}\n",
        target.method.to_ascii_uppercase(),
        target.path,
        target.host.to_ascii_lowercase(),
        target.port,
    )
}

/// Computes the base64 HMAC-SHA256 signature over the canonical string.
pub fn compute_signature(
    target: &RequestTarget,
    timestamp: u64,
    nonce: &str,
    extension: &str,
    body_hash: &str,
    secret: &[u8],
) -> ProtocolResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| ProtocolError::InvalidKey)?;
    mac.update(canonical_string(target, timestamp, nonce, extension, body_hash).as_bytes());
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

/// Compares two signatures without an early exit on the first differing byte.
pub fn compare(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Signs `body` with a fresh nonce and the current time and returns the
/// header value.
///
/// The server uses this for every reply so the device can check the
/// response with the same secret.
pub fn as_header(
    target: &RequestTarget,
    id: &str,
    body: &[u8],
    extension: &str,
    secret: &[u8],
) -> ProtocolResult<String> {
    let context = HawkContext::sign(
        target,
        id,
        unix_now(),
        &generate_nonce(),
        extension,
        body,
        secret,
    )?;
    Ok(context.to_header())
}

/// Returns a random alphanumeric nonce.
pub fn generate_nonce() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(NONCE_LEN)
        .map(char::from)
        .collect()
}

/// Current Unix time in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
