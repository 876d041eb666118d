//! Per-object version metadata (`xl.meta`)
//!
//! Versions are kept newest first. The empty version id names the null
//! version; `"null"` is accepted as an alias.

use objectio_common::{DataUsageEntry, Error, FileInfo, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use xxhash_rust::xxh64::Xxh64;

pub const META_FILE: &str = "xl.meta";

const NULL_VERSION: &str = "null";

fn normalize(version_id: &str) -> &str {
    if version_id == NULL_VERSION { "" } else { version_id }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct XlMeta {
    pub versions: Vec<FileInfo>,
}

impl XlMeta {
    pub fn from_bytes(buf: &[u8], path: &str) -> Result<Self> {
        serde_json::from_slice(buf)
            .map_err(|e| Error::FileCorrupt(format!("{path}/{META_FILE}: {e}")))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    #[must_use]
    pub fn find(&self, version_id: &str) -> Option<&FileInfo> {
        let version_id = normalize(version_id);
        self.versions.iter().find(|v| v.version_id == version_id)
    }

    fn find_mut(&mut self, version_id: &str) -> Option<&mut FileInfo> {
        let version_id = normalize(version_id);
        self.versions.iter_mut().find(|v| v.version_id == version_id)
    }

    /// Insert or replace a version
    pub fn add_version(&mut self, mut fi: FileInfo) {
        fi.version_id = normalize(&fi.version_id).to_string();
        self.versions.retain(|v| v.version_id != fi.version_id);
        self.versions.push(fi);
        self.versions.sort_by(|a, b| b.mod_time.cmp(&a.mod_time));
        self.mark_latest();
    }

    /// Replace the user metadata of an existing version
    pub fn update_version(&mut self, fi: &FileInfo) -> Result<()> {
        let existing = self
            .find_mut(&fi.version_id)
            .ok_or_else(|| Error::FileVersionNotFound(fi.version_id.clone()))?;
        existing.metadata.clone_from(&fi.metadata);
        if fi.mod_time != 0 {
            existing.mod_time = fi.mod_time;
        }
        Ok(())
    }

    /// Remove a version, returning it
    pub fn delete_version(&mut self, version_id: &str) -> Result<FileInfo> {
        let version_id = normalize(version_id);
        let idx = self
            .versions
            .iter()
            .position(|v| v.version_id == version_id)
            .ok_or_else(|| Error::FileVersionNotFound(version_id.to_string()))?;
        let removed = self.versions.remove(idx);
        self.mark_latest();
        Ok(removed)
    }

    fn mark_latest(&mut self) {
        for (i, v) in self.versions.iter_mut().enumerate() {
            v.is_latest = i == 0;
        }
    }

    /// Resolve one version, the latest when `version_id` is empty
    pub fn to_file_info(
        &self,
        volume: &str,
        name: &str,
        version_id: &str,
        read_data: bool,
    ) -> Result<FileInfo> {
        let found = if normalize(version_id).is_empty() && self.find("").is_none() {
            self.versions.first()
        } else {
            self.find(version_id)
        };

        let mut fi = match found {
            Some(fi) => fi.clone(),
            None if self.versions.is_empty() => {
                return Err(Error::FileNotFound(format!("{volume}/{name}")));
            }
            None => {
                return Err(Error::FileVersionNotFound(format!(
                    "{volume}/{name} version {version_id}"
                )));
            }
        };
        fi.volume = volume.to_string();
        fi.name = name.to_string();
        fi.num_versions = self.versions.len();
        if !read_data {
            fi.data = None;
        }
        Ok(fi)
    }

    /// Data directories referenced by any version
    #[must_use]
    pub fn data_dirs(&self) -> HashSet<&str> {
        self.versions
            .iter()
            .map(|v| v.data_dir.as_str())
            .filter(|d| !d.is_empty())
            .collect()
    }

    /// Drop inline data from every version
    pub fn strip_data(&mut self) {
        for v in &mut self.versions {
            v.data = None;
        }
    }

    /// Space accounting for the object at `path`
    #[must_use]
    pub fn usage(&self, path: &str) -> DataUsageEntry {
        let mut entry = DataUsageEntry {
            path: path.to_string(),
            objects: u64::from(self.versions.first().is_some_and(|v| !v.deleted)),
            ..DataUsageEntry::default()
        };
        for v in &self.versions {
            if v.deleted {
                entry.delete_markers += 1;
            } else {
                entry.versions += 1;
                entry.size += v.size;
            }
        }
        entry
    }

    /// Fingerprint of the version list, used to compare drives after a rename
    #[must_use]
    pub fn signature(&self) -> u64 {
        let mut hasher = Xxh64::new(0);
        for v in &self.versions {
            hasher.update(v.version_id.as_bytes());
            hasher.update(&v.mod_time.to_le_bytes());
            hasher.update(v.data_dir.as_bytes());
            hasher.update(&[u8::from(v.deleted)]);
        }
        hasher.digest()
    }
}
