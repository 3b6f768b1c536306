//! Error types for the HTTP backends.
//!
//! Backend failures are reported to the kernel as [`ServiceError`], so
//! every [`LlmError`] converts into one.

use township_types::ServiceError;

/// Errors from configuring or calling a backend.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// A required environment variable is missing or invalid.
    #[error("config error: {message}")]
    Config {
        /// What is wrong.
        message: String,
    },

    /// The HTTP request could not be sent or its body could not be read.
    #[error("{backend} request failed: {source}")]
    Request {
        /// Backend name.
        backend: &'static str,
        /// Underlying HTTP error.
        #[source]
        source: reqwest::Error,
    },

    /// The backend answered with a non-success status.
    #[error("{backend} returned {status}: {body}")]
    Status {
        /// Backend name.
        backend: &'static str,
        /// HTTP status code.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },

    /// The backend answered, but not with the expected shape.
    #[error("{backend} response invalid: {message}")]
    Response {
        /// Backend name.
        backend: &'static str,
        /// What was missing or wrong.
        message: String,
    },
}

impl LlmError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

impl From<LlmError> for ServiceError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Config { message } => Self::Unavailable {
                service: "llm".to_owned(),
                message,
            },
            LlmError::Request { backend, .. } | LlmError::Status { backend, .. } => {
                Self::Unavailable {
                    service: backend.to_owned(),
                    message: err.to_string(),
                }
            }
            LlmError::Response { backend, message } => Self::Malformed {
                service: backend.to_owned(),
                message,
            },
        }
    }
}
