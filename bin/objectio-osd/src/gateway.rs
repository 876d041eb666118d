//! Per-drive request validation
//!
//! A [`DriveServer`] answers for one local endpoint. Before a call reaches
//! the drive it is checked in order: the drive is attached, the bearer
//! token is valid for this exact query, and the caller's view of the drive
//! identity is current.

use crate::registry::DiskRegistry;
use axum::http::HeaderMap;
use objectio_auth::TokenVerifier;
use objectio_common::{Endpoint, Error, Result};
use objectio_proto::KeepAliveOptions;
use objectio_storage::StorageRef;
use std::sync::Arc;
use tracing::debug;

pub struct DriveServer {
    pub endpoint: Endpoint,
    pub keepalive: KeepAliveOptions,
    registry: Arc<DiskRegistry>,
    verifier: Arc<TokenVerifier>,
}

impl DriveServer {
    #[must_use]
    pub const fn new(
        endpoint: Endpoint,
        registry: Arc<DiskRegistry>,
        verifier: Arc<TokenVerifier>,
        keepalive: KeepAliveOptions,
    ) -> Self {
        Self {
            endpoint,
            keepalive,
            registry,
            verifier,
        }
    }

    /// The attached drive, if bootstrap has published it
    #[must_use]
    pub fn storage(&self) -> Option<StorageRef> {
        self.registry.get(self.endpoint.coord)
    }

    /// Require an attached drive and a token bound to `raw_query`
    pub fn is_auth_valid(&self, headers: &HeaderMap, raw_query: &str) -> Result<StorageRef> {
        let storage = self.storage().ok_or(Error::DiskNotFound)?;
        self.verifier.verify(headers, raw_query).map_err(|e| {
            debug!("rejecting call to {}: {}", self.endpoint, e);
            Error::from(e)
        })?;
        Ok(storage)
    }

    /// Full validation for classic calls
    pub async fn is_valid(
        &self,
        headers: &HeaderMap,
        raw_query: &str,
        disk_id: &str,
    ) -> Result<StorageRef> {
        let storage = self.is_auth_valid(headers, raw_query)?;
        if disk_id.is_empty() {
            return Ok(storage);
        }
        let stored = storage.disk_id().await?;
        if stored != disk_id {
            debug!(
                "drive {} is {}, caller expected {}",
                self.endpoint, stored, disk_id
            );
            return Err(Error::DiskStale);
        }
        Ok(storage)
    }

    /// Identity check for typed RPC calls, whose transport is already authenticated
    pub async fn check_id(&self, disk_id: &str) -> Result<StorageRef> {
        let storage = self.storage().ok_or(Error::DiskNotFound)?;
        if disk_id.is_empty() {
            return Ok(storage);
        }
        if storage.disk_id().await? != disk_id {
            return Err(Error::DiskStale);
        }
        Ok(storage)
    }

    /// Authenticate a typed RPC call. Its token audience is the empty query.
    pub fn verify_rpc(&self, headers: &HeaderMap) -> Result<()> {
        self.verifier
            .verify(headers, "")
            .map(|_| ())
            .map_err(Error::from)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use chrono::Utc;
    use objectio_auth::{
        AUTHORIZATION_HEADER, Credentials, DEFAULT_MAX_SKEW, TIME_HEADER, issue_token,
        request_time,
    };
    use objectio_common::{DiskCoord, ErrorKind, PoolTopology};
    use objectio_storage::{LocalDisk, LocalDiskOptions};
    use std::path::Path;
    use std::time::Duration;

    pub(crate) fn credentials() -> Credentials {
        Credentials::new("node-key", "node-secret")
    }

    pub(crate) fn signed_headers(audience: &str) -> HeaderMap {
        let token = issue_token(&credentials(), audience, Duration::from_secs(60)).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION_HEADER,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        headers.insert(
            TIME_HEADER,
            HeaderValue::from_str(&request_time(Utc::now())).unwrap(),
        );
        headers
    }

    pub(crate) fn endpoint(dir: &Path) -> Endpoint {
        Endpoint {
            path: dir.to_path_buf(),
            coord: DiskCoord::new(0, 0, 0),
            is_local: true,
        }
    }

    /// A server for `dir`, with the drive attached when `attach` is set
    pub(crate) async fn drive_server(dir: &Path, attach: bool) -> Arc<DriveServer> {
        let registry = Arc::new(DiskRegistry::new(&[PoolTopology {
            set_count: 1,
            drives_per_set: 1,
        }]));
        let endpoint = endpoint(dir);
        if attach {
            let disk = LocalDisk::open(endpoint.clone(), LocalDiskOptions::default())
                .await
                .unwrap();
            registry.attach(endpoint.coord, Arc::new(disk)).unwrap();
        }
        let verifier = Arc::new(TokenVerifier::new(credentials(), DEFAULT_MAX_SKEW));
        Arc::new(DriveServer::new(
            endpoint,
            registry,
            verifier,
            KeepAliveOptions::default(),
        ))
    }

    #[tokio::test]
    async fn test_absent_drive_before_auth() {
        let dir = tempfile::tempdir().unwrap();
        let server = drive_server(dir.path(), false).await;

        // No token at all, but the missing drive is reported first
        let err = server.is_auth_valid(&HeaderMap::new(), "").unwrap_err();
        assert!(matches!(err, Error::DiskNotFound));
        assert!(matches!(
            server.check_id("").await.unwrap_err(),
            Error::DiskNotFound
        ));
    }

    #[tokio::test]
    async fn test_auth_bound_to_query() {
        let dir = tempfile::tempdir().unwrap();
        let server = drive_server(dir.path(), true).await;

        let headers = signed_headers("volume=a");
        assert!(server.is_auth_valid(&headers, "volume=a").is_ok());
        let err = server.is_auth_valid(&headers, "volume=b").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authentication);

        let err = server.is_auth_valid(&HeaderMap::new(), "").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoAuthToken);
        assert_eq!(err.http_status_code(), 401);
    }

    #[tokio::test]
    async fn test_identity_validation() {
        let dir = tempfile::tempdir().unwrap();
        let server = drive_server(dir.path(), true).await;
        let id = server.storage().unwrap().disk_id().await.unwrap();
        let headers = signed_headers("q");

        assert!(server.is_valid(&headers, "q", "").await.is_ok());
        assert!(server.is_valid(&headers, "q", &id).await.is_ok());
        let err = server.is_valid(&headers, "q", "other-id").await.unwrap_err();
        assert!(matches!(err, Error::DiskStale));
        assert_eq!(err.http_status_code(), 412);

        assert!(server.check_id("").await.is_ok());
        assert!(server.check_id(&id).await.is_ok());
        assert!(matches!(
            server.check_id("other-id").await.unwrap_err(),
            Error::DiskStale
        ));
    }

    #[tokio::test]
    async fn test_rpc_audience_is_empty_query() {
        let dir = tempfile::tempdir().unwrap();
        let server = drive_server(dir.path(), true).await;
        assert!(server.verify_rpc(&signed_headers("")).is_ok());
        assert!(server.verify_rpc(&signed_headers("volume=a")).is_err());
    }
}
