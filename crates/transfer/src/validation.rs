use chunkup_protocol::constants::MAX_OBJECT_KEY_LEN;

use crate::TransferError;

/// Validates an object key before any session is opened.
///
/// Rejects:
/// - Empty keys
/// - Keys longer than [`MAX_OBJECT_KEY_LEN`] bytes
/// - A leading `/` (it would create an empty first path segment)
/// - Control characters
pub fn validate_object_key(key: &str) -> Result<(), TransferError> {
    if key.is_empty() {
        return Err(TransferError::InvalidKey("empty key".into()));
    }

    if key.len() > MAX_OBJECT_KEY_LEN {
        return Err(TransferError::InvalidKey(format!(
            "key is {} bytes, limit is {MAX_OBJECT_KEY_LEN}",
            key.len()
        )));
    }

    if key.starts_with('/') {
        return Err(TransferError::InvalidKey(format!(
            "leading slash not allowed: {key}"
        )));
    }

    if key.chars().any(char::is_control) {
        return Err(TransferError::InvalidKey(format!(
            "control characters not allowed: {key:?}"
        )));
    }

    Ok(())
}
