//! Core type definitions for ObjectIO
//!
//! Drive coordinates, endpoints and the payload types exchanged between a
//! node's disk gateway and its peers.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

/// Location of a drive in the cluster topology
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DiskCoord {
    pub pool: usize,
    pub set: usize,
    pub disk: usize,
}

impl DiskCoord {
    #[must_use]
    pub const fn new(pool: usize, set: usize, disk: usize) -> Self {
        Self { pool, set, disk }
    }
}

impl fmt::Debug for DiskCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DiskCoord({}/{}/{})", self.pool, self.set, self.disk)
    }
}

impl fmt::Display for DiskCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pool={} set={} disk={}", self.pool, self.set, self.disk)
    }
}

/// Shape of one server pool
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolTopology {
    pub set_count: usize,
    pub drives_per_set: usize,
}

/// A drive path and where it sits in the topology
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub path: PathBuf,
    pub coord: DiskCoord,
    pub is_local: bool,
}

impl Endpoint {
    /// Path as used in route prefixes, always starting with `/`
    #[must_use]
    pub fn route_path(&self) -> String {
        let path = self.path.to_string_lossy();
        let trimmed = path.trim_end_matches('/');
        if trimmed.starts_with('/') {
            trimmed.to_string()
        } else {
            format!("/{trimmed}")
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// Volume information
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolInfo {
    pub name: String,
    /// Creation time, seconds since the Unix epoch
    pub created: u64,
}

/// Drive capacity and identity information
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskInfo {
    pub total: u64,
    pub free: u64,
    pub used: u64,
    pub id: String,
    pub endpoint: String,
    pub mount_path: String,
    pub healing: bool,
    /// Set when the drive answered but reported a problem
    #[serde(default)]
    pub error: String,
}

/// Per-part integrity information
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartChecksum {
    pub algorithm: String,
    /// Hex encoded digest
    pub hash: String,
}

/// One part of an object version
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectPartInfo {
    pub number: u32,
    pub size: u64,
    #[serde(default)]
    pub checksum: Option<PartChecksum>,
}

/// Metadata of a single object version
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub volume: String,
    pub name: String,
    /// Empty for the null version
    #[serde(default)]
    pub version_id: String,
    #[serde(default)]
    pub is_latest: bool,
    #[serde(default)]
    pub deleted: bool,
    /// Directory holding this version's parts, empty for inline or delete markers
    #[serde(default)]
    pub data_dir: String,
    /// Modification time, nanoseconds since the Unix epoch
    #[serde(default)]
    pub mod_time: i64,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub parts: Vec<ObjectPartInfo>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Inline data, only populated when requested
    #[serde(default)]
    pub data: Option<Vec<u8>>,
    #[serde(default)]
    pub num_versions: usize,
}

/// A batch of versions of one object, as used by bulk deletes
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfoVersions {
    pub volume: String,
    pub name: String,
    pub versions: Vec<FileInfo>,
}

/// Raw metadata of an object as stored on the drive
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawFileInfo {
    pub buf: Vec<u8>,
}

/// Options for `delete`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteOptions {
    #[serde(default)]
    pub recursive: bool,
    #[serde(default)]
    pub immediate: bool,
}

/// Options for `read_version`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadOptions {
    #[serde(default)]
    pub read_data: bool,
    #[serde(default)]
    pub healing: bool,
}

/// Options for `update_metadata`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateMetadataOpts {
    #[serde(default)]
    pub no_persistence: bool,
}

/// Options for `rename_data`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameOptions {
    #[serde(default)]
    pub base_options: DeleteOptions,
}

/// File stat information
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatInfo {
    pub name: String,
    pub size: u64,
    /// Modification time, nanoseconds since the Unix epoch
    pub mod_time: i64,
    pub dir: bool,
    pub mode: u32,
}

/// Request to read many small files in one call
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadMultipleReq {
    pub bucket: String,
    #[serde(default)]
    pub prefix: String,
    pub files: Vec<String>,
    /// Skip files larger than this, 0 means unlimited
    #[serde(default)]
    pub max_size: u64,
    #[serde(default)]
    pub metadata_only: bool,
    /// Stop at the first missing file
    #[serde(default)]
    pub abort_on_404: bool,
    /// Stop after this many found files, 0 means unlimited
    #[serde(default)]
    pub max_results: usize,
}

/// One answer to a `ReadMultipleReq`
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadMultipleResp {
    pub bucket: String,
    pub prefix: String,
    pub file: String,
    pub exists: bool,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub data: Vec<u8>,
    #[serde(default)]
    pub mod_time: i64,
}

/// Bulk version delete outcome, one slot per requested version
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteVersionsErrsResp {
    pub errs: Vec<Option<String>>,
}

/// `verify_file` outcome, carried after the keep-alive terminator
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyFileResp {
    #[serde(default)]
    pub err: Option<String>,
}

/// Namespace walk over one volume
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalkDirOptions {
    pub bucket: String,
    /// Directory to start from, relative to the volume
    #[serde(default)]
    pub base_dir: String,
    #[serde(default)]
    pub recursive: bool,
    /// Fail with not-found when `base_dir` is missing instead of yielding nothing
    #[serde(default)]
    pub report_not_found: bool,
    /// Only entries whose path starts with this
    #[serde(default)]
    pub filter_prefix: String,
    /// Skip entries sorting before this path
    #[serde(default)]
    pub forward_to: String,
    /// Stop after this many entries, 0 means unlimited
    #[serde(default)]
    pub limit: usize,
}

/// One entry of a namespace walk
///
/// Directories end in `/` and carry no metadata. Objects carry their raw
/// version list.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaCacheEntry {
    pub name: String,
    #[serde(default)]
    pub metadata: Vec<u8>,
}

impl MetaCacheEntry {
    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.name.ends_with('/')
    }

    #[must_use]
    pub fn is_object(&self) -> bool {
        !self.metadata.is_empty()
    }
}

/// Usage of one scanned object
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataUsageEntry {
    pub path: String,
    /// 1 when the latest version is live
    pub objects: u64,
    pub versions: u64,
    pub delete_markers: u64,
    /// Bytes held by live versions
    pub size: u64,
}

/// Totals of a namespace scan over one volume
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataUsageInfo {
    pub bucket: String,
    pub objects: u64,
    pub versions: u64,
    pub delete_markers: u64,
    pub size: u64,
}

impl DataUsageInfo {
    pub fn add(&mut self, entry: &DataUsageEntry) {
        self.objects += entry.objects;
        self.versions += entry.versions;
        self.delete_markers += entry.delete_markers;
        self.size += entry.size;
    }
}

/// One record of a namespace scan stream: updates as objects are counted,
/// then exactly one final total
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScannerResp {
    Update(DataUsageEntry),
    Final(DataUsageInfo),
}
