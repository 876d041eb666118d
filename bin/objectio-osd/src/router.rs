//! HTTP routing for the local drives
//!
//! Each local endpoint gets its own sub-router under
//! `/storage/<endpoint-path>/v1`, holding that drive's [`DriveServer`].

use crate::gateway::DriveServer;
use crate::registry::DiskRegistry;
use crate::{handlers, rpc};
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::post;
use objectio_auth::{Credentials, TokenVerifier};
use objectio_common::Config;
use objectio_proto::KeepAliveOptions;
use objectio_proto::params::{drive_prefix, method};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Largest buffered request body (`writeall`, `appendfile`, JSON payloads)
pub const MAX_REQUEST_BODY: usize = 100 * 1024 * 1024;

fn route(method: &str) -> String {
    format!("/{method}")
}

/// Routes of a single drive
pub fn drive_router(server: Arc<DriveServer>) -> Router {
    Router::new()
        .route(&route(method::HEALTH), post(handlers::health))
        .route(&route(method::MAKE_VOL), post(handlers::make_vol))
        .route(&route(method::MAKE_VOL_BULK), post(handlers::make_vol_bulk))
        .route(&route(method::LIST_VOLS), post(handlers::list_vols))
        .route(&route(method::DELETE_VOL), post(handlers::delete_vol))
        .route(&route(method::APPEND_FILE), post(handlers::append_file))
        .route(&route(method::CREATE_FILE), post(handlers::create_file))
        .route(&route(method::WRITE_ALL), post(handlers::write_all))
        .route(&route(method::READ_ALL), post(handlers::read_all))
        .route(&route(method::READ_FILE), post(handlers::read_file))
        .route(&route(method::READ_FILE_STREAM), post(handlers::read_file_stream))
        .route(&route(method::LIST_DIR), post(handlers::list_dir))
        .route(&route(method::RENAME_FILE), post(handlers::rename_file))
        .route(&route(method::READ_VERSION), post(handlers::read_version))
        .route(&route(method::READ_XL), post(handlers::read_xl))
        .route(&route(method::DELETE_VERSIONS), post(handlers::delete_versions))
        .route(&route(method::VERIFY_FILE), post(handlers::verify_file))
        .route(&route(method::STAT_INFO_FILE), post(handlers::stat_info_file))
        .route(&route(method::READ_MULTIPLE), post(handlers::read_multiple))
        .route(&route(method::CLEAN_ABANDONED), post(handlers::clean_abandoned))
        .route(&route(method::WALK_DIR), post(handlers::walk_dir))
        .route(&route(method::NS_SCANNER), post(handlers::ns_scanner))
        .route("/rpc/{method}", post(rpc::dispatch))
        .with_state(server)
}

/// One server per local endpoint, sharing the registry and token verifier
pub fn drive_servers(config: &Config, registry: &Arc<DiskRegistry>) -> Vec<Arc<DriveServer>> {
    let verifier = Arc::new(TokenVerifier::new(
        Credentials::from(&config.credentials),
        config.auth.max_skew(),
    ));
    let keepalive = KeepAliveOptions::from(&config.keepalive);
    config
        .local_endpoints()
        .into_iter()
        .map(|endpoint| {
            Arc::new(DriveServer::new(
                endpoint,
                Arc::clone(registry),
                Arc::clone(&verifier),
                keepalive,
            ))
        })
        .collect()
}

pub fn build_router(servers: Vec<Arc<DriveServer>>) -> Router {
    servers
        .into_iter()
        .fold(Router::new(), |router, server| {
            let prefix = drive_prefix(&server.endpoint.route_path());
            router.nest(&prefix, drive_router(server))
        })
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY))
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::tests::{credentials, drive_server, signed_headers};
    use axum::body::{Body, Bytes};
    use axum::http::{Request, StatusCode};
    use futures::StreamExt;
    use objectio_client::{ClientOptions, StorageRestClient};
    use objectio_common::{
        BitrotAlgorithm, BitrotVerifier, DiskInfo, Error, FileInfo, FileInfoVersions,
        ObjectPartInfo, PartChecksum, ReadMultipleReq, ReadOptions, VerifyFileResp,
        WalkDirOptions,
    };
    use objectio_proto::params::rpc;
    use objectio_proto::{RpcResponse, codec, wait_for_response};
    use std::io;
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    fn signed(path: &str, query: &str, body: Body) -> Request<Body> {
        let uri = if query.is_empty() {
            path.to_string()
        } else {
            format!("{path}?{query}")
        };
        let mut req = Request::post(uri).body(body).unwrap();
        *req.headers_mut() = signed_headers(query);
        req
    }

    async fn body_bytes(resp: axum::response::Response) -> Bytes {
        axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_unattached_drive_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let server = drive_server(dir.path(), false).await;
        let prefix = drive_prefix(&server.endpoint.route_path());
        let app = build_router(vec![server]);

        let resp = app
            .oneshot(signed(&format!("{prefix}/listvols"), "", Body::empty()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_bytes(resp).await, Error::DiskNotFound.to_string());
    }

    #[tokio::test]
    async fn test_auth_and_identity_statuses() {
        let dir = tempfile::tempdir().unwrap();
        let server = drive_server(dir.path(), true).await;
        let prefix = drive_prefix(&server.endpoint.route_path());
        let app = build_router(vec![server]);

        let unsigned = Request::post(format!("{prefix}/health"))
            .body(Body::empty())
            .unwrap();
        let resp = app.clone().oneshot(unsigned).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        // Token bound to a different query
        let mut req = signed(&format!("{prefix}/health"), "volume=a", Body::empty());
        *req.uri_mut() = format!("{prefix}/health?volume=b").parse().unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = app
            .clone()
            .oneshot(signed(&format!("{prefix}/health"), "disk-id=bogus", Body::empty()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::PRECONDITION_FAILED);
        assert_eq!(body_bytes(resp).await, Error::DiskStale.to_string());

        let resp = app
            .oneshot(signed(&format!("{prefix}/health"), "disk-id=", Body::empty()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_volume_calls() {
        let dir = tempfile::tempdir().unwrap();
        let server = drive_server(dir.path(), true).await;
        let prefix = drive_prefix(&server.endpoint.route_path());
        let app = build_router(vec![server]);

        let resp = app
            .clone()
            .oneshot(signed(&format!("{prefix}/makevol"), "volume=bucket", Body::empty()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app
            .clone()
            .oneshot(signed(&format!("{prefix}/makevol"), "volume=bucket", Body::empty()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let resp = app
            .oneshot(signed(&format!("{prefix}/listvols"), "", Body::empty()))
            .await
            .unwrap();
        let vols: Vec<objectio_common::VolInfo> =
            serde_json::from_slice(&body_bytes(resp).await).unwrap();
        assert_eq!(vols.len(), 1);
        assert_eq!(vols[0].name, "bucket");
    }

    #[tokio::test]
    async fn test_verify_file_answers_through_keepalive() {
        let dir = tempfile::tempdir().unwrap();
        let server = drive_server(dir.path(), true).await;
        let prefix = drive_prefix(&server.endpoint.route_path());
        let app = build_router(vec![server]);

        app.clone()
            .oneshot(signed(&format!("{prefix}/makevol"), "volume=b", Body::empty()))
            .await
            .unwrap();

        let fi = FileInfo {
            data_dir: "dd".into(),
            parts: vec![ObjectPartInfo {
                number: 1,
                size: 3,
                checksum: None,
            }],
            ..FileInfo::default()
        };
        let resp = app
            .oneshot(signed(
                &format!("{prefix}/verifyfile"),
                "volume=b&file-path=obj",
                Body::from(serde_json::to_vec(&fi).unwrap()),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = body_bytes(resp).await;
        assert_eq!(body[0], 0x00);
        let mut payload = wait_for_response(&body[..]).await.unwrap();
        let resp: VerifyFileResp = codec::read_record(&mut payload, 1 << 20)
            .await
            .unwrap()
            .unwrap();
        assert!(resp.err.unwrap().starts_with("file not found"));
    }

    #[tokio::test]
    async fn test_rpc_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let server = drive_server(dir.path(), true).await;
        let id = server.storage().unwrap().disk_id().await.unwrap();
        let prefix = drive_prefix(&server.endpoint.route_path());
        let app = build_router(vec![server]);
        let uri = format!("{prefix}/rpc/{}", rpc::DISK_INFO);

        let resp = app
            .clone()
            .oneshot(signed(&uri, "", Body::from(r#"{"disk_id":""}"#)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let envelope: RpcResponse<DiskInfo> =
            serde_json::from_slice(&body_bytes(resp).await).unwrap();
        assert_eq!(envelope.into_result().unwrap().id, id);

        let resp = app
            .clone()
            .oneshot(signed(&uri, "", Body::from(r#"{"disk_id":"bogus"}"#)))
            .await
            .unwrap();
        let envelope: RpcResponse<DiskInfo> =
            serde_json::from_slice(&body_bytes(resp).await).unwrap();
        assert_eq!(
            envelope.into_result().unwrap_err().message,
            Error::DiskStale.to_string()
        );

        let resp = app
            .clone()
            .oneshot(signed(&format!("{prefix}/rpc/nosuch"), "", Body::from("{}")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let unsigned = Request::post(uri).body(Body::from("{}")).unwrap();
        let resp = app.oneshot(unsigned).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_client_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let server = drive_server(dir.path(), true).await;
        let endpoint = server.endpoint.clone();
        let app = build_router(vec![server]);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let client = StorageRestClient::new(
            format!("http://{addr}"),
            &endpoint,
            credentials(),
            ClientOptions::from(&Config::default()),
        )
        .unwrap();

        client.health().await.unwrap();
        client
            .make_vol_bulk(&["bucket".to_string(), "other".to_string()])
            .await
            .unwrap();
        let mut names: Vec<_> = client
            .list_vols()
            .await
            .unwrap()
            .into_iter()
            .map(|v| v.name)
            .collect();
        names.sort();
        assert_eq!(names, ["bucket", "other"]);
        client.delete_vol("other", false).await.unwrap();

        // Buffered and ranged reads
        let part = Bytes::from_static(b"hello world");
        client
            .write_all("bucket", "obj/dd1/part.1", part.clone())
            .await
            .unwrap();
        assert_eq!(client.read_all("bucket", "obj/dd1/part.1").await.unwrap(), part);

        let digest = BitrotAlgorithm::Sha256.digest(&part);
        let verifier = BitrotVerifier::new(BitrotAlgorithm::Sha256, digest.clone());
        let range = client
            .read_file("bucket", "obj/dd1/part.1", 6, 5, Some(&verifier))
            .await
            .unwrap();
        assert_eq!(&range[..], b"world");

        let bad = BitrotVerifier::new(BitrotAlgorithm::Sha256, vec![0; 32]);
        let err = client
            .read_file("bucket", "obj/dd1/part.1", 0, 5, Some(&bad))
            .await
            .unwrap_err();
        assert!(matches!(Error::from(err), Error::FileCorrupt(_)));

        let err = client.read_all("bucket", "missing").await.unwrap_err();
        assert!(matches!(Error::from(err), Error::FileNotFound(_)));

        // Streamed upload and download
        let chunks: Vec<io::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"abc")),
            Ok(Bytes::from_static(b"def")),
        ];
        client
            .create_file("bucket", "big", 6, futures::stream::iter(chunks))
            .await
            .unwrap();
        let mut stream = client.read_file_stream("bucket", "big", 2, 3).await.unwrap();
        let mut streamed = Vec::new();
        while let Some(chunk) = stream.next().await {
            streamed.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(streamed, b"cde");

        let short: Vec<io::Result<Bytes>> = vec![Ok(Bytes::from_static(b"ab"))];
        assert!(
            client
                .create_file("bucket", "short", 6, futures::stream::iter(short))
                .await
                .is_err()
        );

        assert_eq!(client.list_dir("bucket", "obj", 0).await.unwrap(), ["dd1/"]);
        let stats = client.stat_info_file("bucket", "big", false).await.unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].size, 6);

        client
            .rename_file("bucket", "big", "bucket", "moved")
            .await
            .unwrap();

        // Versions through the typed RPC surface
        let fi = FileInfo {
            version_id: "v1".into(),
            data_dir: "dd1".into(),
            mod_time: 1,
            size: part.len() as u64,
            parts: vec![ObjectPartInfo {
                number: 1,
                size: part.len() as u64,
                checksum: Some(PartChecksum {
                    algorithm: "sha256".into(),
                    hash: hex::encode(&digest),
                }),
            }],
            ..FileInfo::default()
        };
        client
            .write_metadata("bucket", "obj", fi.clone())
            .await
            .unwrap();
        client.verify_file("bucket", "obj", &fi).await.unwrap();
        client.check_parts("bucket", "obj", fi.clone()).await.unwrap();

        let mut corrupt = fi.clone();
        corrupt.parts[0].size = 3;
        let err = client.verify_file("bucket", "obj", &corrupt).await.unwrap_err();
        assert!(matches!(Error::from(err), Error::FileCorrupt(_)));

        let read = client
            .read_version_rpc("bucket", "obj", "v1", ReadOptions::default())
            .await
            .unwrap();
        assert_eq!(read.version_id, "v1");
        let read = client
            .read_version("bucket", "obj", "", ReadOptions::default())
            .await
            .unwrap();
        assert_eq!(read.version_id, "v1");
        assert!(!client.read_xl("bucket", "obj", false).await.unwrap().buf.is_empty());

        // Batched reads
        let req = ReadMultipleReq {
            bucket: "bucket".into(),
            files: vec!["moved".into(), "nope".into()],
            ..ReadMultipleReq::default()
        };
        let (tx, mut rx) = mpsc::channel(8);
        client.read_multiple(&req, tx).await.unwrap();
        let first = rx.recv().await.unwrap();
        assert!(first.exists);
        assert_eq!(first.data, b"abcdef");
        let second = rx.recv().await.unwrap();
        assert!(!second.exists);
        assert!(rx.recv().await.is_none());

        // Namespace walk and scan stream through block frames
        let opts = WalkDirOptions {
            bucket: "bucket".into(),
            recursive: true,
            ..WalkDirOptions::default()
        };
        let (tx, mut rx) = mpsc::channel(1);
        let collect = async move {
            let mut entries = Vec::new();
            while let Some(entry) = rx.recv().await {
                entries.push(entry);
            }
            entries
        };
        let (walked, entries) = tokio::join!(client.walk_dir(&opts, tx), collect);
        walked.unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["moved", "obj"]);
        assert!(!entries[0].is_object());
        assert!(entries[1].is_object());

        let (tx, mut rx) = mpsc::channel(1);
        let collect = async move {
            let mut updates = Vec::new();
            while let Some(update) = rx.recv().await {
                updates.push(update);
            }
            updates
        };
        let (scanned, updates) = tokio::join!(client.ns_scanner("bucket", tx), collect);
        let info = scanned.unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].path, "obj");
        assert_eq!(info.objects, 1);
        assert_eq!(info.size, part.len() as u64);

        let err = client.ns_scanner("absent", mpsc::channel(1).0).await.unwrap_err();
        assert!(matches!(Error::from(err), Error::VolumeNotFound(_)));

        // Bulk delete reports each entry separately
        let errs = client
            .delete_versions(
                "bucket",
                &[
                    FileInfoVersions {
                        volume: "bucket".into(),
                        name: "obj".into(),
                        versions: vec![fi.clone()],
                    },
                    FileInfoVersions {
                        volume: "bucket".into(),
                        name: "ghost".into(),
                        versions: vec![FileInfo {
                            version_id: "x".into(),
                            ..FileInfo::default()
                        }],
                    },
                ],
            )
            .await
            .unwrap();
        assert_eq!(errs.len(), 2);
        assert!(errs[0].is_none());
        assert!(matches!(errs[1], Some(Error::FileNotFound(_))));

        client.clean_abandoned_data("bucket", "obj").await.unwrap();
        client.clean_abandoned_data("", "").await.unwrap();

        // Identity follows the drive's format
        let info = client.disk_info().await.unwrap();
        assert!(!info.id.is_empty());
        client.set_disk_id(info.id.clone());
        client.health().await.unwrap();
        client.set_disk_id("replaced-drive");
        let err = client.health().await.unwrap_err();
        assert!(matches!(Error::from(err), Error::DiskStale));
        let err = client.disk_info().await.unwrap_err();
        assert!(matches!(Error::from(err), Error::DiskStale));
    }
}
