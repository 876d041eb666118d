//! Typed RPC payloads
//!
//! Every request carries the caller's view of the drive identity in
//! `disk_id`; an empty id skips the identity check.

use objectio_common::{DeleteOptions, FileInfo, ReadOptions, RenameOptions, UpdateMetadataOpts};
use serde::{Deserialize, Serialize};

/// Error text returned by a remote handler
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    pub message: String,
}

/// Envelope of every RPC answer: `{"ok": ...}` or `{"err": {"message": ...}}`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RpcResponse<T> {
    Ok(T),
    Err(RemoteError),
}

impl<T> RpcResponse<T> {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Err(RemoteError {
            message: message.into(),
        })
    }

    pub fn into_result(self) -> Result<T, RemoteError> {
        match self {
            Self::Ok(value) => Ok(value),
            Self::Err(err) => Err(err),
        }
    }
}

/// Request payloads addressed to one drive
pub trait DiskScoped {
    /// Identity the caller last observed for the drive
    fn disk_id(&self) -> &str;
}

macro_rules! disk_scoped {
    ($($ty:ty),+ $(,)?) => {
        $(impl DiskScoped for $ty {
            fn disk_id(&self) -> &str {
                &self.disk_id
            }
        })+
    };
}

disk_scoped!(
    DiskParams,
    VolParams,
    ReadVersionParams,
    ReadXlParams,
    MetadataParams,
    DeleteVersionParams,
    DeleteFileParams,
    RenameDataParams,
    CheckPartsParams,
);

impl<T> From<objectio_common::Result<T>> for RpcResponse<T> {
    fn from(result: objectio_common::Result<T>) -> Self {
        match result {
            Ok(value) => Self::Ok(value),
            Err(err) => Self::error(err.root_message()),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DiskParams {
    #[serde(default)]
    pub disk_id: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct VolParams {
    #[serde(default)]
    pub disk_id: String,
    pub volume: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ReadVersionParams {
    #[serde(default)]
    pub disk_id: String,
    pub volume: String,
    pub file_path: String,
    #[serde(default)]
    pub version_id: String,
    #[serde(default)]
    pub opts: ReadOptions,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ReadXlParams {
    #[serde(default)]
    pub disk_id: String,
    pub volume: String,
    pub file_path: String,
    #[serde(default)]
    pub read_data: bool,
}

/// Used by both `writemetadata` and `updatemetadata`
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MetadataParams {
    #[serde(default)]
    pub disk_id: String,
    pub volume: String,
    pub file_path: String,
    pub fi: FileInfo,
    #[serde(default)]
    pub update_opts: UpdateMetadataOpts,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DeleteVersionParams {
    #[serde(default)]
    pub disk_id: String,
    pub volume: String,
    pub file_path: String,
    pub fi: FileInfo,
    #[serde(default)]
    pub force_del_marker: bool,
    #[serde(default)]
    pub opts: DeleteOptions,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DeleteFileParams {
    #[serde(default)]
    pub disk_id: String,
    pub volume: String,
    pub file_path: String,
    #[serde(default)]
    pub opts: DeleteOptions,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RenameDataParams {
    #[serde(default)]
    pub disk_id: String,
    pub src_volume: String,
    pub src_path: String,
    pub fi: FileInfo,
    pub dst_volume: String,
    pub dst_path: String,
    #[serde(default)]
    pub opts: RenameOptions,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameDataResp {
    pub signature: u64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CheckPartsParams {
    #[serde(default)]
    pub disk_id: String,
    pub volume: String,
    pub file_path: String,
    pub fi: FileInfo,
}
