use thiserror::Error;

/// Infrastructure failures raised by the scheduling stores.
///
/// These are never business rejections; the caller's transport layer decides
/// whether to retry.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Timed out after {timeout_ms}ms waiting for lock on {resource}")]
    LockTimeout { resource: String, timeout_ms: u64 },
}
