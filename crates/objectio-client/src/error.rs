//! Client error types

use objectio_auth::AuthError;
use objectio_common::Error;
use objectio_proto::ProtocolError;
use std::io;
use thiserror::Error;

/// Failures talking to a remote drive
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("protocol error: {0}")]
    Protocol(ProtocolError),

    /// Error reported by the remote drive
    #[error(transparent)]
    Storage(#[from] Error),

    #[error("signing failed: {0}")]
    Auth(#[from] AuthError),
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;

impl From<ProtocolError> for ClientError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Remote(msg) => Self::Storage(error_from_text(&msg)),
            other => Self::Protocol(other),
        }
    }
}

impl From<io::Error> for ClientError {
    fn from(err: io::Error) -> Self {
        Self::Protocol(ProtocolError::Io(err))
    }
}

impl From<ClientError> for Error {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Storage(e) => e,
            // An unreachable peer is indistinguishable from a missing drive
            ClientError::Http(e) if e.is_connect() => Self::DiskNotFound,
            ClientError::Http(e) if e.is_timeout() => Self::DeadlineExceeded,
            ClientError::Http(e) => Self::DiskIo(io::Error::other(e)),
            ClientError::Protocol(e) => Self::DiskIo(io::Error::other(e)),
            ClientError::Auth(e) => e.into(),
        }
    }
}

/// Rebuild an error from the text a remote handler wrote
///
/// Only the message crosses the wire; well-known messages are mapped back
/// onto their condition so callers can match on them.
#[must_use]
pub fn error_from_text(text: &str) -> Error {
    let text = text.trim();
    match text {
        "drive not found" => return Error::DiskNotFound,
        "drive stale" => return Error::DiskStale,
        "drive is full" => return Error::DiskFull,
        "no authentication token in request" => return Error::NoAuthToken,
        "authentication failed" => return Error::Authentication,
        "request time is skewed by more than the allowed tolerance" => {
            return Error::SkewedAuthTime;
        }
        "operation cancelled" => return Error::Cancelled,
        "deadline exceeded" => return Error::DeadlineExceeded,
        _ => {}
    }

    let constructors: [(&str, fn(String) -> Error); 13] = [
        ("volume not found: ", Error::VolumeNotFound),
        ("volume already exists: ", Error::VolumeExists),
        ("volume is not empty: ", Error::VolumeNotEmpty),
        ("file not found: ", Error::FileNotFound),
        ("file version not found: ", Error::FileVersionNotFound),
        ("file is corrupted: ", Error::FileCorrupt),
        ("file access denied: ", Error::FileAccessDenied),
        ("drive access denied: ", Error::DiskAccessDenied),
        ("drive does not support O_DIRECT: ", Error::UnsupportedDisk),
        ("drive is not a directory: ", Error::DiskNotDir),
        ("drive is faulty: ", Error::FaultyDisk),
        ("unexpected backend format: ", Error::BackendFormat),
        ("invalid argument: ", Error::InvalidArgument),
    ];
    for (prefix, build) in constructors {
        if let Some(rest) = text.strip_prefix(prefix) {
            return build(rest.to_string());
        }
    }
    if let Some(rest) = text.strip_prefix("malformed authentication: ") {
        return Error::MalformedAuth(rest.to_string());
    }
    Error::Internal(text.to_string())
}

/// Rebuild an error from a failed classic call's status and body
#[must_use]
pub fn error_from_status(status: u16, text: &str) -> Error {
    let err = error_from_text(text);
    if !matches!(err, Error::Internal(_)) {
        return err;
    }
    match status {
        404 => Error::FileNotFound(text.to_string()),
        412 => Error::DiskStale,
        401 => Error::Authentication,
        400 => Error::InvalidArgument(text.to_string()),
        499 => Error::Cancelled,
        _ => err,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use objectio_common::ErrorKind;

    #[test]
    fn test_known_messages_round_trip() {
        let errors = [
            Error::DiskNotFound,
            Error::DiskStale,
            Error::VolumeNotFound("bucket".into()),
            Error::FileNotFound("bucket/obj".into()),
            Error::FileVersionNotFound("v1".into()),
            Error::FileCorrupt("bucket/obj/part.1".into()),
            Error::NoAuthToken,
            Error::MalformedAuth("bad time".into()),
            Error::SkewedAuthTime,
            Error::UnsupportedDisk("/mnt/d0".into()),
        ];
        for err in errors {
            let back = error_from_text(&err.to_string());
            assert_eq!(back.kind(), err.kind(), "{err}");
            assert_eq!(back.to_string(), err.to_string());
        }
    }

    #[test]
    fn test_unknown_text_uses_status() {
        assert_eq!(error_from_status(404, "gone").kind(), ErrorKind::FileNotFound);
        assert_eq!(error_from_status(412, "").kind(), ErrorKind::DiskStale);
        assert_eq!(error_from_status(500, "boom").kind(), ErrorKind::Internal);
        assert_eq!(
            error_from_status(403, "volume not found: b").kind(),
            ErrorKind::VolumeNotFound
        );
    }

    #[test]
    fn test_remote_protocol_error_becomes_storage_error() {
        let err: ClientError = ProtocolError::Remote("drive stale".into()).into();
        assert!(matches!(err, ClientError::Storage(Error::DiskStale)));

        let err: ClientError = ProtocolError::UnexpectedTag(9).into();
        assert!(matches!(err, ClientError::Protocol(_)));
    }
}
