//! Mapping of S3 failures onto [`StorageError`].

use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use chunkup_multipart::StorageError;

/// Error codes that mean the credentials are missing, wrong or expired.
const AUTH_CODES: &[&str] = &[
    "AccessDenied",
    "InvalidAccessKeyId",
    "SignatureDoesNotMatch",
    "ExpiredToken",
    "InvalidToken",
];

/// Classifies a failed S3 response.
///
/// `status` is `None` when no response arrived (DNS, connect, timeout),
/// which is always a transport failure.
pub fn classify(status: Option<u16>, code: Option<&str>, message: String) -> StorageError {
    if let Some(code) = code {
        match code {
            "NoSuchUpload" => return StorageError::InvalidSession(message),
            "SlowDown" | "RequestLimitExceeded" => return StorageError::Throttled(message),
            c if AUTH_CODES.contains(&c) => return StorageError::Auth(message),
            _ => {}
        }
    }
    match status {
        None => StorageError::Transport(message),
        Some(429 | 503) => StorageError::Throttled(message),
        Some(401 | 403) => StorageError::Auth(message),
        Some(404) => StorageError::InvalidSession(message),
        Some(s) if s >= 500 => StorageError::Service(message),
        Some(408) => StorageError::Transport(message),
        Some(_) => StorageError::Rejected(message),
    }
}

/// Converts an SDK error from any S3 operation.
pub(crate) fn map_sdk_error<E>(operation: &str, err: SdkError<E>) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let status = match &err {
        SdkError::ServiceError(se) => Some(se.raw().status().as_u16()),
        SdkError::ResponseError(re) => Some(re.raw().status().as_u16()),
        _ => None,
    };
    let code = err.as_service_error().and_then(|e| e.code()).map(str::to_string);
    let message = format!("{operation}: {}", DisplayErrorContext(&err));
    classify(status, code.as_deref(), message)
}

/// `true` when an abort hit a session that no longer exists.
pub(crate) fn is_missing_upload(err: &StorageError) -> bool {
    matches!(err, StorageError::InvalidSession(_))
}
