//! Error types for the Feedgate server.
//!
//! This module defines the top-level error used by request handlers and the
//! JSON body every error response carries.
//!
//! # Error Types
//!
//! - [`ServerError`] - Top-level server errors encompassing all failure modes
//! - [`ErrorResponse`] - JSON error body, `{"error": ..., "code": ...}`
//!
//! [`StoreError`] converts into [`ServerError`] with `?`. Startup failures
//! (configuration, binding) are reported by the binary and never reach a
//! request handler.
//!
//! # Example
//!
//! ```rust
//! use feedgate_server::error::ServerError;
//!
//! fn require_user_id(user_id: Option<&str>) -> Result<&str, ServerError> {
//!     user_id.ok_or_else(|| ServerError::validation("missing 'user_id'"))
//! }
//!
//! assert!(require_user_id(None).is_err());
//! ```

use std::error::Error;
use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::store::StoreError;

/// Body text of 500 responses; internal detail stays in the logs.
const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

/// Top-level error type for the Feedgate server.
///
/// # Error Categories
///
/// - **Authentication errors**: Missing or invalid credentials
/// - **Validation errors**: Malformed request bodies or query parameters
/// - **Store errors**: Message persistence or query failures
#[derive(Debug)]
pub enum ServerError {
    /// Authentication failure.
    ///
    /// The message is returned to the client as-is.
    Auth(String),

    /// Request validation failure.
    ///
    /// The message is returned to the client as-is.
    Validation(String),

    /// Message store failure.
    Store(StoreError),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auth(msg) => write!(f, "authentication failed: {msg}"),
            Self::Validation(msg) => write!(f, "validation error: {msg}"),
            Self::Store(err) => write!(f, "message store error: {err}"),
        }
    }
}

impl Error for ServerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            Self::Auth(_) | Self::Validation(_) => None,
        }
    }
}

impl From<StoreError> for ServerError {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}

impl ServerError {
    /// Creates a new authentication error.
    ///
    /// # Example
    ///
    /// ```rust
    /// use feedgate_server::error::ServerError;
    ///
    /// let err = ServerError::auth("Unauthorized");
    /// assert!(matches!(err, ServerError::Auth(_)));
    /// ```
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    /// Creates a new validation error.
    ///
    /// # Example
    ///
    /// ```rust
    /// use feedgate_server::error::ServerError;
    ///
    /// let err = ServerError::validation("Username is required");
    /// assert!(matches!(err, ServerError::Validation(_)));
    /// ```
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Returns `true` if this error indicates a client-side problem.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Auth(_) | Self::Validation(_))
    }

    /// Returns `true` if this error indicates a server-side problem.
    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::Store(_))
    }

    /// HTTP status this error maps to.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn to_response_body(&self) -> ErrorResponse {
        match self {
            Self::Auth(msg) => ErrorResponse::new(msg.clone()),
            Self::Validation(msg) => ErrorResponse::new(msg.clone()).with_code("invalid_request"),
            Self::Store(_) => ErrorResponse::new(INTERNAL_ERROR_MESSAGE).with_code("store_error"),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        if self.is_server_error() {
            error!(error = %self, "Request failed");
        }
        (self.status_code(), Json(self.to_response_body())).into_response()
    }
}

/// A specialized Result type for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;

// ============================================================================
// Error Response Body
// ============================================================================

/// JSON error response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}
