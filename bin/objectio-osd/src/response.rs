//! Error responses for the classic call surface
//!
//! Errors go out as a status code plus the root condition's message. The
//! internode client maps the message back onto the same condition.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use objectio_common::Error;
use objectio_proto::Outcome;
use tracing::{debug, warn};

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug)]
pub struct ApiError(pub Error);

impl<E: Into<Error>> From<E> for ApiError {
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.http_status_code()).unwrap_or(StatusCode::FORBIDDEN);
        let message = self.0.root_message();
        if self.0.kind().is_auth() {
            warn!("unauthorized storage call: {}", self.0);
        } else {
            debug!("storage call failed with {}: {}", status, self.0);
        }
        (status, message).into_response()
    }
}

/// Terminal outcome of a keep-alive session
pub fn outcome<T: Into<bytes::Bytes>>(result: objectio_common::Result<T>) -> Outcome {
    result.map(Into::into).map_err(|e| e.root_message())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_follows_root_condition() {
        let resp = ApiError(Error::DiskStale.context("readall")).into_response();
        assert_eq!(resp.status(), StatusCode::PRECONDITION_FAILED);

        let resp = ApiError(Error::FileNotFound("b/o".into())).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = ApiError(Error::Cancelled).into_response();
        assert_eq!(resp.status().as_u16(), 499);

        let resp = ApiError(Error::VolumeExists("b".into())).into_response();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_outcome_carries_root_message() {
        let result: objectio_common::Result<Vec<u8>> =
            Err(Error::FileCorrupt("b/o".into()).context("verify"));
        assert_eq!(outcome(result).unwrap_err(), Error::FileCorrupt("b/o".into()).to_string());
        assert_eq!(outcome(Ok(vec![1u8])).unwrap(), bytes::Bytes::from_static(&[1]));
    }
}
