//! The storage collaborator interface
//!
//! Every drive the gateway exposes implements [`StorageApi`]. The gateway
//! forwards calls verbatim; on-disk layout is the implementation's concern.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use objectio_common::{
    BitrotVerifier, DataUsageEntry, DataUsageInfo, DeleteOptions, DiskInfo, Endpoint, Error,
    FileInfo, FileInfoVersions, MetaCacheEntry, RawFileInfo, ReadMultipleReq, ReadMultipleResp,
    ReadOptions, RenameOptions, Result, StatInfo, UpdateMetadataOpts, VolInfo, WalkDirOptions,
};
use std::fmt;
use std::io;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Streamed file content, in either direction
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

#[async_trait]
pub trait StorageApi: Send + Sync {
    /// Endpoint this drive was attached from
    fn endpoint(&self) -> &Endpoint;

    /// Current identity of the drive's format
    async fn disk_id(&self) -> Result<String>;

    async fn disk_info(&self) -> Result<DiskInfo>;

    // Volumes

    async fn make_vol(&self, volume: &str) -> Result<()>;

    /// Create several volumes, ignoring ones that already exist
    async fn make_vol_bulk(&self, volumes: &[String]) -> Result<()>;

    async fn list_vols(&self) -> Result<Vec<VolInfo>>;

    async fn stat_vol(&self, volume: &str) -> Result<VolInfo>;

    async fn delete_vol(&self, volume: &str, force: bool) -> Result<()>;

    // Files

    async fn append_file(&self, volume: &str, path: &str, buf: Bytes) -> Result<()>;

    /// Write exactly `size` bytes from `body`
    async fn create_file(&self, volume: &str, path: &str, size: u64, body: ByteStream)
    -> Result<()>;

    async fn write_all(&self, volume: &str, path: &str, buf: Bytes) -> Result<()>;

    async fn read_all(&self, volume: &str, path: &str) -> Result<Bytes>;

    /// Read `length` bytes at `offset`, verifying the whole file first when a verifier is given
    async fn read_file(
        &self,
        volume: &str,
        path: &str,
        offset: u64,
        length: usize,
        verifier: Option<BitrotVerifier>,
    ) -> Result<Bytes>;

    async fn read_file_stream(
        &self,
        volume: &str,
        path: &str,
        offset: u64,
        length: u64,
    ) -> Result<ByteStream>;

    /// Directory entries, directories with a trailing `/`. `count` of zero means all.
    async fn list_dir(&self, volume: &str, dir_path: &str, count: usize) -> Result<Vec<String>>;

    async fn rename_file(
        &self,
        src_volume: &str,
        src_path: &str,
        dst_volume: &str,
        dst_path: &str,
    ) -> Result<()>;

    async fn delete(&self, volume: &str, path: &str, opts: DeleteOptions) -> Result<()>;

    async fn stat_info_file(&self, volume: &str, path: &str, glob: bool) -> Result<Vec<StatInfo>>;

    /// Send one response per requested file to `out`
    async fn read_multiple(
        &self,
        req: ReadMultipleReq,
        out: mpsc::Sender<ReadMultipleResp>,
    ) -> Result<()>;

    /// Send the namespace under `opts.base_dir` to `out`, sorted by path
    async fn walk_dir(&self, opts: WalkDirOptions, out: mpsc::Sender<MetaCacheEntry>)
    -> Result<()>;

    /// Account every object of `volume`, sending one update per object
    async fn ns_scanner(
        &self,
        volume: &str,
        updates: mpsc::Sender<DataUsageEntry>,
    ) -> Result<DataUsageInfo>;

    /// Remove data directories no version refers to
    async fn clean_abandoned_data(&self, volume: &str, path: &str) -> Result<()>;

    /// Check every part exists, has the recorded size and checksum
    async fn verify_file(&self, volume: &str, path: &str, fi: &FileInfo) -> Result<()>;

    /// Check every part exists with the recorded size
    async fn check_parts(&self, volume: &str, path: &str, fi: &FileInfo) -> Result<()>;

    // Versions

    async fn read_version(
        &self,
        volume: &str,
        path: &str,
        version_id: &str,
        opts: ReadOptions,
    ) -> Result<FileInfo>;

    async fn read_xl(&self, volume: &str, path: &str, read_data: bool) -> Result<RawFileInfo>;

    async fn write_metadata(&self, volume: &str, path: &str, fi: FileInfo) -> Result<()>;

    async fn update_metadata(
        &self,
        volume: &str,
        path: &str,
        fi: FileInfo,
        opts: UpdateMetadataOpts,
    ) -> Result<()>;

    async fn delete_version(
        &self,
        volume: &str,
        path: &str,
        fi: FileInfo,
        force_del_marker: bool,
        opts: DeleteOptions,
    ) -> Result<()>;

    /// Delete many versions; one result slot per input entry
    async fn delete_versions(
        &self,
        volume: &str,
        versions: Vec<FileInfoVersions>,
        opts: DeleteOptions,
    ) -> Vec<Option<Error>>;

    /// Move a version's data into place and record it; returns the new metadata signature
    async fn rename_data(
        &self,
        src_volume: &str,
        src_path: &str,
        fi: FileInfo,
        dst_volume: &str,
        dst_path: &str,
        opts: RenameOptions,
    ) -> Result<u64>;
}

impl fmt::Debug for dyn StorageApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageApi")
            .field("endpoint", &self.endpoint().to_string())
            .field("coord", &self.endpoint().coord)
            .finish()
    }
}

/// Shared handle to an attached drive
pub type StorageRef = Arc<dyn StorageApi>;
