//! Route and query parameter names of the storage REST surface
//!
//! Shared by the gateway and the internode client so both sides agree on
//! the exact query string a token audience is bound to.

/// Prefix every drive's routes hang off
pub const STORAGE_PREFIX: &str = "/storage";

/// Version segment following the drive path
pub const STORAGE_VERSION: &str = "v1";

pub mod method {
    pub const HEALTH: &str = "health";
    pub const MAKE_VOL: &str = "makevol";
    pub const MAKE_VOL_BULK: &str = "makevolbulk";
    pub const LIST_VOLS: &str = "listvols";
    pub const DELETE_VOL: &str = "deletevol";
    pub const APPEND_FILE: &str = "appendfile";
    pub const CREATE_FILE: &str = "createfile";
    pub const WRITE_ALL: &str = "writeall";
    pub const READ_ALL: &str = "readall";
    pub const READ_FILE: &str = "readfile";
    pub const READ_FILE_STREAM: &str = "readfilestream";
    pub const LIST_DIR: &str = "listdir";
    pub const RENAME_FILE: &str = "renamefile";
    pub const READ_VERSION: &str = "readversion";
    pub const READ_XL: &str = "readxl";
    pub const DELETE_VERSIONS: &str = "deleteversions";
    pub const VERIFY_FILE: &str = "verifyfile";
    pub const STAT_INFO_FILE: &str = "statfile";
    pub const READ_MULTIPLE: &str = "readmultiple";
    pub const CLEAN_ABANDONED: &str = "cleanabandoned";
    pub const WALK_DIR: &str = "walkdir";
    pub const NS_SCANNER: &str = "nsscanner";
}

/// Typed RPC methods, under `rpc/`
pub mod rpc {
    pub const DISK_INFO: &str = "diskinfo";
    pub const STAT_VOL: &str = "statvol";
    pub const READ_VERSION: &str = "readversion";
    pub const READ_XL: &str = "readxl";
    pub const WRITE_METADATA: &str = "writemetadata";
    pub const UPDATE_METADATA: &str = "updatemetadata";
    pub const DELETE_VERSION: &str = "deleteversion";
    pub const DELETE_FILE: &str = "deletefile";
    pub const RENAME_DATA: &str = "renamedata";
    pub const CHECK_PARTS: &str = "checkparts";
}

pub mod param {
    pub const DISK_ID: &str = "disk-id";
    pub const VOLUME: &str = "volume";
    pub const VOLUMES: &str = "volumes";
    pub const FILE_PATH: &str = "file-path";
    pub const DIR_PATH: &str = "dir-path";
    pub const SRC_VOLUME: &str = "source-volume";
    pub const SRC_PATH: &str = "source-path";
    pub const DST_VOLUME: &str = "destination-volume";
    pub const DST_PATH: &str = "destination-path";
    pub const VERSION_ID: &str = "version-id";
    pub const READ_DATA: &str = "read-data";
    pub const HEALING: &str = "healing";
    pub const OFFSET: &str = "offset";
    pub const LENGTH: &str = "length";
    pub const COUNT: &str = "count";
    pub const FORCE_DELETE: &str = "force-delete";
    pub const BITROT_ALGO: &str = "bitrot-algo";
    pub const BITROT_HASH: &str = "bitrot-hash";
    pub const TOTAL_VERSIONS: &str = "total-versions";
    pub const GLOB: &str = "glob";
}

/// Path under which the drive at `endpoint_path` is served, e.g. `/storage/mnt/d0/v1`
#[must_use]
pub fn drive_prefix(endpoint_path: &str) -> String {
    format!("{STORAGE_PREFIX}{endpoint_path}/{STORAGE_VERSION}")
}
