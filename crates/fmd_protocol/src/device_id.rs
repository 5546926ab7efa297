//! Device id and assertion filters.
//!
//! Ids arrive in URL paths and registration bodies; they are reduced to a
//! hex/dash charset and truncated before any storage or registry lookup.

/// Maximum device id length after filtering.
pub const MAX_DEVICE_ID_LEN: usize = 32;

/// Shortest path that can carry a device id segment.
const MIN_PATH_LEN: usize = 10;

fn is_device_id_char(c: char) -> bool {
    c.is_ascii_hexdigit() || c == '-'
}

/// Strips characters outside `[A-Fa-f0-9-]` and truncates to
/// [`MAX_DEVICE_ID_LEN`].
pub fn filter_device_id(raw: &str) -> String {
    raw.chars()
        .filter(|c| is_device_id_char(*c))
        .take(MAX_DEVICE_ID_LEN)
        .collect()
}

/// Extracts the device id from the final segment of a request path.
///
/// Returns `None` for short paths or when nothing survives filtering.
pub fn device_id_from_path(path: &str) -> Option<String> {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    if path.len() < MIN_PATH_LEN || !path.contains('/') {
        return None;
    }
    let last = path.trim_end_matches('/').rsplit('/').next()?;
    let id = filter_device_id(last);
    (!id.is_empty()).then_some(id)
}

/// Returns true if an identity assertion only uses base64url/JWT characters.
pub fn is_assertion_safe(assertion: &str) -> bool {
    assertion
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '~' | '.' | '='))
}
