//! Authentication error types

use thiserror::Error;

/// Internode authentication errors
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing authorization header")]
    MissingAuthHeader,

    #[error("invalid authorization header format")]
    InvalidAuthHeader,

    #[error("missing request time header")]
    MissingDateHeader,

    #[error("invalid date format")]
    InvalidDateFormat,

    #[error("token not signed by this cluster's credential")]
    CredentialMismatch,

    #[error("signature mismatch")]
    SignatureMismatch,

    #[error("token audience does not match request")]
    AudienceMismatch,

    #[error("request time too skewed")]
    RequestTimeSkewed,

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<AuthError> for objectio_common::Error {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingAuthHeader => Self::NoAuthToken,
            AuthError::InvalidAuthHeader
            | AuthError::MissingDateHeader
            | AuthError::InvalidDateFormat
            | AuthError::CredentialMismatch => Self::MalformedAuth(err.to_string()),
            AuthError::SignatureMismatch | AuthError::AudienceMismatch => Self::Authentication,
            AuthError::RequestTimeSkewed => Self::SkewedAuthTime,
            AuthError::Internal(msg) => Self::Internal(msg),
        }
    }
}
