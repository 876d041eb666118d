//! Drive format file
//!
//! Each attached drive carries `.objectio.sys/format.json` holding the
//! drive's identity. The id changes when the drive is reformatted, which is
//! how peers detect a replaced drive.

use objectio_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};

/// Reserved directory at the root of every drive
pub const SYSTEM_DIR: &str = ".objectio.sys";

/// Scratch space for atomic writes, inside [`SYSTEM_DIR`]
pub const TMP_DIR: &str = "tmp";

pub const FORMAT_FILE: &str = "format.json";

/// Current format version
pub const FORMAT_VERSION: &str = "1";

/// Contents of `format.json`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Format {
    pub version: String,
    pub id: String,
}

impl Format {
    /// A fresh format with a random id
    #[must_use]
    pub fn new() -> Self {
        Self {
            version: FORMAT_VERSION.to_string(),
            id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        let format: Self = serde_json::from_slice(buf)
            .map_err(|e| Error::BackendFormat(format!("unreadable {FORMAT_FILE}: {e}")))?;
        if format.version != FORMAT_VERSION {
            return Err(Error::BackendFormat(format!(
                "unsupported format version {}",
                format.version
            )));
        }
        if format.id.is_empty() {
            return Err(Error::BackendFormat(format!("{FORMAT_FILE} has no drive id")));
        }
        Ok(format)
    }
}

impl Default for Format {
    fn default() -> Self {
        Self::new()
    }
}

#[must_use]
pub fn format_path(root: &Path) -> PathBuf {
    root.join(SYSTEM_DIR).join(FORMAT_FILE)
}

/// Read the format of the drive at `root`, `None` if it was never formatted
pub async fn load(root: &Path) -> Result<Option<Format>> {
    match tokio::fs::read(format_path(root)).await {
        Ok(buf) => Format::from_bytes(&buf).map(Some),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(crate::raw_io::attach_error(root, e)),
    }
}

/// Write `format` to the drive at `root`, replacing any previous one
pub async fn store(root: &Path, format: &Format) -> Result<()> {
    let buf = serde_json::to_vec_pretty(format)?;
    let tmp = root.join(SYSTEM_DIR).join(TMP_DIR).join(format!("{FORMAT_FILE}.new"));
    tokio::fs::write(&tmp, &buf)
        .await
        .map_err(|e| crate::raw_io::attach_error(root, e))?;
    tokio::fs::rename(&tmp, format_path(root))
        .await
        .map_err(|e| crate::raw_io::attach_error(root, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_store_and_load() {
        let dir = tempdir().unwrap();
        tokio::fs::create_dir_all(dir.path().join(SYSTEM_DIR).join(TMP_DIR))
            .await
            .unwrap();

        assert!(load(dir.path()).await.unwrap().is_none());

        let format = Format::new();
        store(dir.path(), &format).await.unwrap();
        assert_eq!(load(dir.path()).await.unwrap(), Some(format));
    }

    #[test]
    fn test_corrupt_format_is_backend_error() {
        assert!(matches!(
            Format::from_bytes(b"{not json"),
            Err(Error::BackendFormat(_))
        ));
        assert!(matches!(
            Format::from_bytes(br#"{"version":"9","id":"x"}"#),
            Err(Error::BackendFormat(_))
        ));
    }
}
