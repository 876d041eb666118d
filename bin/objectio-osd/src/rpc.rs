//! Typed RPC surface
//!
//! `POST .../rpc/<method>` with a JSON body. Failures inside a call come
//! back in the envelope; only authentication and unknown methods are
//! reported through the status code.

use crate::gateway::DriveServer;
use crate::response::ApiResult;
use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use objectio_common::{DiskInfo, Error, Result};
use objectio_proto::messages::{
    CheckPartsParams, DeleteFileParams, DeleteVersionParams, DiskParams, MetadataParams,
    ReadVersionParams, ReadXlParams, RenameDataParams, RenameDataResp, VolParams,
};
use objectio_proto::params::rpc;
use objectio_proto::{DiskScoped, RpcResponse};
use objectio_storage::StorageRef;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;

/// Decode the parameters, check the drive identity, then run `op`
async fn handle<P, T, F, Fut>(server: &DriveServer, body: &[u8], op: F) -> Json<RpcResponse<T>>
where
    P: DeserializeOwned + DiskScoped,
    T: Serialize,
    F: FnOnce(StorageRef, P) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let result = async {
        let params: P = serde_json::from_slice(body)?;
        let storage = server.check_id(params.disk_id()).await?;
        op(storage, params).await
    }
    .await;
    Json(result.into())
}

pub async fn dispatch(
    State(server): State<Arc<DriveServer>>,
    Path(method): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    server.verify_rpc(&headers)?;
    let server = server.as_ref();

    let response = match method.as_str() {
        rpc::DISK_INFO => handle(server, &body, |storage, _: DiskParams| async move {
            // A failing drive still answers, with the reason in the payload
            Ok(storage.disk_info().await.unwrap_or_else(|e| DiskInfo {
                error: e.root_message(),
                ..DiskInfo::default()
            }))
        })
        .await
        .into_response(),
        rpc::STAT_VOL => handle(server, &body, |storage, p: VolParams| async move {
            storage.stat_vol(&p.volume).await
        })
        .await
        .into_response(),
        rpc::READ_VERSION => handle(server, &body, |storage, p: ReadVersionParams| async move {
            storage
                .read_version(&p.volume, &p.file_path, &p.version_id, p.opts)
                .await
        })
        .await
        .into_response(),
        rpc::READ_XL => handle(server, &body, |storage, p: ReadXlParams| async move {
            storage.read_xl(&p.volume, &p.file_path, p.read_data).await
        })
        .await
        .into_response(),
        rpc::WRITE_METADATA => handle(server, &body, |storage, p: MetadataParams| async move {
            storage.write_metadata(&p.volume, &p.file_path, p.fi).await
        })
        .await
        .into_response(),
        rpc::UPDATE_METADATA => handle(server, &body, |storage, p: MetadataParams| async move {
            storage
                .update_metadata(&p.volume, &p.file_path, p.fi, p.update_opts)
                .await
        })
        .await
        .into_response(),
        rpc::DELETE_VERSION => handle(server, &body, |storage, p: DeleteVersionParams| async move {
            storage
                .delete_version(&p.volume, &p.file_path, p.fi, p.force_del_marker, p.opts)
                .await
        })
        .await
        .into_response(),
        rpc::DELETE_FILE => handle(server, &body, |storage, p: DeleteFileParams| async move {
            storage.delete(&p.volume, &p.file_path, p.opts).await
        })
        .await
        .into_response(),
        rpc::RENAME_DATA => handle(server, &body, |storage, p: RenameDataParams| async move {
            let signature = storage
                .rename_data(
                    &p.src_volume,
                    &p.src_path,
                    p.fi,
                    &p.dst_volume,
                    &p.dst_path,
                    p.opts,
                )
                .await?;
            Ok(RenameDataResp { signature })
        })
        .await
        .into_response(),
        rpc::CHECK_PARTS => handle(server, &body, |storage, p: CheckPartsParams| async move {
            storage.check_parts(&p.volume, &p.file_path, &p.fi).await
        })
        .await
        .into_response(),
        other => {
            return Err(Error::invalid_argument(format!("unknown rpc method: {other}")).into());
        }
    };
    Ok(response)
}
