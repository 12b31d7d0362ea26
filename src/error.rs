//! Error types for the multipart upload engine

use thiserror::Error;

/// Result type alias for upload operations
pub type Result<T> = std::result::Result<T, UploadError>;

/// Error types that can occur while uploading an object in parts
#[derive(Error, Debug, Clone)]
pub enum UploadError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Failed to initiate multipart upload: {0}")]
    InitiateError(String),

    #[error("Part {part_index} failed after {attempts} attempts: {message}")]
    PartFailed {
        part_index: u32,
        attempts: usize,
        message: String,
    },

    #[error("Multipart upload {upload_id} aborted: {cause}")]
    Aborted {
        upload_id: String,
        cause: Box<UploadError>,
        /// Failure of the abort call itself, kept apart from the cause
        abort_failure: Option<Box<UploadError>>,
    },

    #[error("Failed to complete multipart upload: {0}")]
    FinalizeError(String),

    #[error("Incomplete upload: {0}")]
    IncompleteUpload(String),

    #[error("Upload cancelled")]
    Cancelled,

    #[error("Storage service returned 4xx error: {status} - {message}")]
    StorageClientError { status: u16, message: String },

    #[error("Storage service returned 5xx error: {status} - {message}")]
    StorageServerError { status: u16, message: String },

    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("Network timeout: {0}")]
    Timeout(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<std::io::Error> for UploadError {
    fn from(err: std::io::Error) -> Self {
        UploadError::IoError(err.to_string())
    }
}

impl From<reqwest::Error> for UploadError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            UploadError::Timeout(err.to_string())
        } else {
            UploadError::HttpError(err.to_string())
        }
    }
}

impl UploadError {
    /// Determine if a failed storage call is worth another attempt
    ///
    /// Returns true for errors that are potentially transient:
    /// - 5xx errors from the storage service
    /// - Network timeouts
    /// - IO and generic HTTP errors
    ///
    /// Returns false for errors that will not change on retry:
    /// - 4xx errors (no such upload, access denied, bad request)
    /// - Configuration and parse errors
    /// - Errors that already represent an exhausted or aborted upload
    pub fn should_retry(&self) -> bool {
        match self {
            UploadError::StorageServerError { .. } => true,
            UploadError::Timeout(_) => true,
            UploadError::IoError(_) => true,
            UploadError::HttpError(_) => true,

            UploadError::StorageClientError { .. } => false,
            UploadError::ConfigError(_) => false,
            UploadError::ParseError(_) => false,

            UploadError::InitiateError(_) => false,
            UploadError::PartFailed { .. } => false,
            UploadError::Aborted { .. } => false,
            UploadError::FinalizeError(_) => false,
            UploadError::IncompleteUpload(_) => false,
            UploadError::Cancelled => false,
            UploadError::InternalError(_) => false,
        }
    }

    /// True for errors raised before any multipart session was opened
    pub fn is_pre_session(&self) -> bool {
        matches!(
            self,
            UploadError::ConfigError(_) | UploadError::InitiateError(_)
        )
    }

    /// The original failure behind an aborted upload, or the error itself
    pub fn fatal_cause(&self) -> &UploadError {
        match self {
            UploadError::Aborted { cause, .. } => cause.as_ref(),
            other => other,
        }
    }

    /// Create a StorageClientError from a status code and message
    pub fn storage_client_error(status: u16, message: impl Into<String>) -> Self {
        UploadError::StorageClientError {
            status,
            message: message.into(),
        }
    }

    /// Create a StorageServerError from a status code and message
    pub fn storage_server_error(status: u16, message: impl Into<String>) -> Self {
        UploadError::StorageServerError {
            status,
            message: message.into(),
        }
    }

    /// Create an error from an HTTP status code
    ///
    /// Automatically categorizes as 4xx or 5xx error
    pub fn from_http_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        if (400..500).contains(&status) {
            UploadError::storage_client_error(status, message)
        } else if (500..600).contains(&status) {
            UploadError::storage_server_error(status, message)
        } else {
            UploadError::HttpError(format!("HTTP {}: {}", status, message))
        }
    }
}
