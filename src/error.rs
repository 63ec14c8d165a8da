//! Error types for certgate

use std::io;

use thiserror::Error;

/// Result type alias for certgate
pub type Result<T> = std::result::Result<T, Error>;

/// certgate errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The server private key does not belong to the server certificate
    #[error("Private key does not match certificate '{certificate}'")]
    CertificateMismatch {
        /// Certificate chain file that was loaded
        certificate: String,
    },

    /// Malformed certificate
    #[error("Certificate error: {0}")]
    Certificate(String),

    /// TLS error
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Rendering error raised by a resource
    #[error("Render error: {0}")]
    Render(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failure of a single [`Portal::login`](crate::portal::Portal::login) attempt.
///
/// `Unauthorized` and `LoginFailed` are expected rejections and surface as
/// HTTP 401. Everything else is `Unexpected` and surfaces as a generic 500.
#[derive(Error, Debug)]
pub enum LoginError {
    /// The credential is valid but not allowed in
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The credential could not be verified
    #[error("Login failed: {0}")]
    LoginFailed(String),

    /// Any other failure inside the portal or its realm
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl LoginError {
    /// Returns `true` for the expected authentication rejections.
    #[must_use]
    pub fn is_authentication_failure(&self) -> bool {
        matches!(self, Self::Unauthorized(_) | Self::LoginFailed(_))
    }
}
