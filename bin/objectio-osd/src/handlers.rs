//! Classic call surface
//!
//! Parameters travel in the query string, which is also the token audience.
//! Slow calls answer through a keep-alive session so the caller sees
//! heartbeats instead of an idle connection.

use crate::gateway::DriveServer;
use crate::response::{ApiError, ApiResult, outcome};
use axum::Json;
use axum::body::{Body, Bytes};
use axum::extract::{FromRequestParts, Query, State};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use bytes::BytesMut;
use futures::{StreamExt, TryStreamExt};
use objectio_common::{
    BitrotVerifier, DeleteOptions, DeleteVersionsErrsResp, Error, FileInfo, FileInfoVersions,
    RawFileInfo, ReadMultipleReq, ReadOptions, Result, ScannerResp, VerifyFileResp, VolInfo,
    WalkDirOptions,
};
use objectio_proto::params::param;
use objectio_proto::{KeepAlive, StreamResponse, codec};
use objectio_storage::{ByteStream, StorageRef};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::io;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Responses buffered between the drive and the block stream of `readmultiple`
const READ_MULTIPLE_BUFFER: usize = 10;

/// Walk entries buffered ahead of the block stream
const WALK_DIR_BUFFER: usize = 1;

/// Scanner updates buffered ahead of the block stream
const NS_SCANNER_BUFFER: usize = 1;

/// A validated call: the drive it targets and its query parameters
pub struct Call {
    pub storage: StorageRef,
    params: HashMap<String, String>,
}

impl FromRequestParts<Arc<DriveServer>> for Call {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, server: &Arc<DriveServer>) -> ApiResult<Self> {
        let raw_query = parts.uri.query().unwrap_or_default();
        let Query(params) = Query::<HashMap<String, String>>::try_from_uri(&parts.uri)
            .map_err(|e| Error::invalid_argument(e.body_text()))?;
        let disk_id = params.get(param::DISK_ID).map_or("", String::as_str);
        let storage = server.is_valid(&parts.headers, raw_query, disk_id).await?;
        Ok(Self { storage, params })
    }
}

impl Call {
    /// A query parameter, empty when absent
    #[must_use]
    pub fn param(&self, name: &str) -> &str {
        self.params.get(name).map_or("", String::as_str)
    }

    #[must_use]
    pub fn flag(&self, name: &str) -> bool {
        self.param(name) == "true"
    }

    pub fn number<T>(&self, name: &str) -> Result<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        self.param(name)
            .parse()
            .map_err(|e| Error::invalid_argument(format!("{name}: {e}")))
    }

    /// Owned drive, volume and file path, for work that outlives the handler
    fn target(&self) -> (StorageRef, String, String) {
        (
            self.storage.clone(),
            self.param(param::VOLUME).to_string(),
            self.param(param::FILE_PATH).to_string(),
        )
    }
}

/// Run `op` behind a respond-only keep-alive session
fn respond_only<F>(server: &DriveServer, op: F) -> Response
where
    F: Future<Output = Result<Bytes>> + Send + 'static,
{
    let (keepalive, frames) = KeepAlive::respond_only(server.keepalive);
    let cancel = keepalive.cancellation();
    tokio::spawn(async move {
        let result = tokio::select! {
            result = op => result,
            () = cancel.cancelled() => Err(Error::Cancelled),
        };
        keepalive.done(outcome(result)).await;
    });
    Body::from_stream(frames).into_response()
}

pub async fn health(_call: Call) -> StatusCode {
    StatusCode::OK
}

pub async fn make_vol(call: Call) -> ApiResult<()> {
    call.storage.make_vol(call.param(param::VOLUME)).await?;
    Ok(())
}

pub async fn make_vol_bulk(call: Call) -> ApiResult<()> {
    let volumes: Vec<String> = call
        .param(param::VOLUMES)
        .split(',')
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect();
    call.storage.make_vol_bulk(&volumes).await?;
    Ok(())
}

pub async fn list_vols(call: Call) -> ApiResult<Json<Vec<VolInfo>>> {
    Ok(Json(call.storage.list_vols().await?))
}

pub async fn delete_vol(call: Call) -> ApiResult<()> {
    call.storage
        .delete_vol(call.param(param::VOLUME), call.flag(param::FORCE_DELETE))
        .await?;
    Ok(())
}

pub async fn append_file(call: Call, body: Bytes) -> ApiResult<()> {
    call.storage
        .append_file(call.param(param::VOLUME), call.param(param::FILE_PATH), body)
        .await?;
    Ok(())
}

/// Streams the request body into the drive, heartbeating once the upload is consumed
pub async fn create_file(
    State(server): State<Arc<DriveServer>>,
    call: Call,
    body: Body,
) -> ApiResult<Response> {
    let size: u64 = call.number(param::LENGTH)?;
    let (storage, volume, path) = call.target();

    let (keepalive, drained, frames) =
        KeepAlive::with_request_body(body.into_data_stream(), server.keepalive);
    let cancel = keepalive.cancellation();
    let upload: ByteStream = drained.map_err(io::Error::other).boxed();

    tokio::spawn(async move {
        let result = tokio::select! {
            result = storage.create_file(&volume, &path, size, upload) => result,
            () = cancel.cancelled() => Err(Error::Cancelled),
        };
        keepalive.done(outcome(result.map(|()| Bytes::new()))).await;
    });
    Ok(Body::from_stream(frames).into_response())
}

pub async fn write_all(call: Call, body: Bytes) -> ApiResult<()> {
    call.storage
        .write_all(call.param(param::VOLUME), call.param(param::FILE_PATH), body)
        .await?;
    Ok(())
}

pub async fn read_all(call: Call) -> ApiResult<Bytes> {
    Ok(call
        .storage
        .read_all(call.param(param::VOLUME), call.param(param::FILE_PATH))
        .await?)
}

pub async fn read_file(call: Call) -> ApiResult<Bytes> {
    let offset: u64 = call.number(param::OFFSET)?;
    let length: usize = call.number(param::LENGTH)?;
    let algorithm = call.param(param::BITROT_ALGO);
    let verifier = if algorithm.is_empty() {
        None
    } else {
        Some(BitrotVerifier::from_hex(
            algorithm,
            call.param(param::BITROT_HASH),
        )?)
    };

    Ok(call
        .storage
        .read_file(
            call.param(param::VOLUME),
            call.param(param::FILE_PATH),
            offset,
            length,
            verifier,
        )
        .await?)
}

pub async fn read_file_stream(call: Call) -> ApiResult<Response> {
    let offset: u64 = call.number(param::OFFSET)?;
    let length: u64 = call.number(param::LENGTH)?;
    let stream = call
        .storage
        .read_file_stream(
            call.param(param::VOLUME),
            call.param(param::FILE_PATH),
            offset,
            length,
        )
        .await?;
    Ok(Body::from_stream(stream).into_response())
}

pub async fn list_dir(call: Call) -> ApiResult<Json<Vec<String>>> {
    let count: usize = call.number(param::COUNT)?;
    Ok(Json(
        call.storage
            .list_dir(call.param(param::VOLUME), call.param(param::DIR_PATH), count)
            .await?,
    ))
}

pub async fn rename_file(call: Call) -> ApiResult<()> {
    call.storage
        .rename_file(
            call.param(param::SRC_VOLUME),
            call.param(param::SRC_PATH),
            call.param(param::DST_VOLUME),
            call.param(param::DST_PATH),
        )
        .await?;
    Ok(())
}

pub async fn read_version(call: Call) -> ApiResult<Json<FileInfo>> {
    let opts = ReadOptions {
        read_data: call.flag(param::READ_DATA),
        healing: call.flag(param::HEALING),
    };
    let fi = call
        .storage
        .read_version(
            call.param(param::VOLUME),
            call.param(param::FILE_PATH),
            call.param(param::VERSION_ID),
            opts,
        )
        .await?;
    Ok(Json(fi))
}

pub async fn read_xl(call: Call) -> ApiResult<Json<RawFileInfo>> {
    let raw = call
        .storage
        .read_xl(
            call.param(param::VOLUME),
            call.param(param::FILE_PATH),
            call.flag(param::READ_DATA),
        )
        .await?;
    Ok(Json(raw))
}

/// Bulk version delete; every entry gets its own error slot
pub async fn delete_versions(
    State(server): State<Arc<DriveServer>>,
    call: Call,
    body: Bytes,
) -> ApiResult<Response> {
    let total: usize = call.number(param::TOTAL_VERSIONS)?;
    let versions: Vec<FileInfoVersions> = serde_json::from_slice(&body)?;
    if versions.len() != total {
        return Err(Error::invalid_argument(format!(
            "expected {total} entries, got {}",
            versions.len()
        ))
        .into());
    }

    let (storage, volume, _) = call.target();
    Ok(respond_only(&server, async move {
        let errs = storage
            .delete_versions(&volume, versions, DeleteOptions::default())
            .await;
        codec::encode_record(&DeleteVersionsErrsResp {
            errs: errs
                .into_iter()
                .map(|slot| slot.map(|e| e.root_message()))
                .collect(),
        })
    }))
}

/// Bitrot check of every part; the verdict travels in the payload
pub async fn verify_file(
    State(server): State<Arc<DriveServer>>,
    call: Call,
    body: Bytes,
) -> ApiResult<Response> {
    let fi: FileInfo = serde_json::from_slice(&body)?;
    let (storage, volume, path) = call.target();
    Ok(respond_only(&server, async move {
        let err = storage
            .verify_file(&volume, &path, &fi)
            .await
            .err()
            .map(|e| e.root_message());
        codec::encode_record(&VerifyFileResp { err })
    }))
}

pub async fn stat_info_file(State(server): State<Arc<DriveServer>>, call: Call) -> Response {
    let glob = call.flag(param::GLOB);
    let (storage, volume, path) = call.target();
    respond_only(&server, async move {
        let stats = storage.stat_info_file(&volume, &path, glob).await?;
        let mut buf = BytesMut::new();
        for stat in &stats {
            buf.extend_from_slice(&codec::encode_record(stat)?);
        }
        Ok(buf.freeze())
    })
}

async fn forward_records<T: Serialize>(
    stream: &StreamResponse,
    mut rx: mpsc::Receiver<T>,
) -> Result<()> {
    while let Some(record) = rx.recv().await {
        stream.write(codec::encode_record(&record)?).await?;
    }
    Ok(())
}

/// Answer with a block stream of the records `produce` sends
fn stream_records<T, F, Fut>(server: &DriveServer, buffer: usize, produce: F) -> Response
where
    T: Serialize + Send + 'static,
    F: FnOnce(mpsc::Sender<T>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send,
{
    let (stream, frames) = StreamResponse::new(server.keepalive);

    tokio::spawn(async move {
        let cancel = stream.cancellation();
        let (tx, rx) = mpsc::channel(buffer);
        let transfer = async {
            let (produced, forwarded) = tokio::join!(produce(tx), forward_records(&stream, rx));
            produced.and(forwarded)
        };
        let result = tokio::select! {
            result = transfer => result,
            () = cancel.cancelled() => Err(Error::Cancelled),
        };
        match result {
            Ok(()) => stream.close().await,
            Err(e) => stream.close_with_error(e.root_message()).await,
        }
    });
    Body::from_stream(frames).into_response()
}

/// Streams one record per requested file as the drive produces them
pub async fn read_multiple(
    State(server): State<Arc<DriveServer>>,
    call: Call,
    body: Bytes,
) -> ApiResult<Response> {
    let req: ReadMultipleReq = serde_json::from_slice(&body)?;
    let storage = call.storage;
    Ok(stream_records(&server, READ_MULTIPLE_BUFFER, move |tx| async move {
        storage.read_multiple(req, tx).await
    }))
}

/// Streams the namespace under a directory, one record per entry
pub async fn walk_dir(
    State(server): State<Arc<DriveServer>>,
    call: Call,
    body: Bytes,
) -> ApiResult<Response> {
    let opts: WalkDirOptions = serde_json::from_slice(&body)?;
    let storage = call.storage;
    Ok(stream_records(&server, WALK_DIR_BUFFER, move |tx| async move {
        storage.walk_dir(opts, tx).await
    }))
}

/// Streams per-object usage while a volume is scanned, then the totals
pub async fn ns_scanner(State(server): State<Arc<DriveServer>>, call: Call) -> Response {
    let (storage, volume, _) = call.target();
    stream_records(&server, NS_SCANNER_BUFFER, move |tx| async move {
        let (updates, mut rx) = mpsc::channel(NS_SCANNER_BUFFER);
        let forward = async {
            while let Some(update) = rx.recv().await {
                tx.send(ScannerResp::Update(update))
                    .await
                    .map_err(|_| Error::Cancelled)?;
            }
            Ok::<_, Error>(())
        };
        let (scanned, forwarded) = tokio::join!(storage.ns_scanner(&volume, updates), forward);
        let info = scanned?;
        forwarded?;
        tx.send(ScannerResp::Final(info))
            .await
            .map_err(|_| Error::Cancelled)
    })
}

pub async fn clean_abandoned(State(server): State<Arc<DriveServer>>, call: Call) -> Response {
    let (storage, volume, path) = call.target();
    if volume.is_empty() || path.is_empty() {
        return StatusCode::OK.into_response();
    }
    respond_only(&server, async move {
        storage
            .clean_abandoned_data(&volume, &path)
            .await
            .map(|()| Bytes::new())
    })
}
