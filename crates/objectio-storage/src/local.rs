//! Directory-backed drive
//!
//! Layout under the drive root:
//!
//! ```text
//! .objectio.sys/format.json        drive identity
//! .objectio.sys/tmp/               scratch space for atomic writes
//! <volume>/<path>                  plain files
//! <volume>/<object>/xl.meta        version list
//! <volume>/<object>/<data-dir>/part.N
//! ```

use crate::api::{ByteStream, StorageApi};
use crate::format::{self, Format, SYSTEM_DIR, TMP_DIR};
use crate::meta::{META_FILE, XlMeta};
use crate::raw_io::{self, attach_error};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use objectio_common::{
    BitrotVerifier, DataUsageEntry, DataUsageInfo, DeleteOptions, DiskInfo, Endpoint, Error,
    FileInfo, FileInfoVersions, MetaCacheEntry, RawFileInfo, ReadMultipleReq, ReadMultipleResp,
    ReadOptions, RenameOptions, Result, StatInfo, UpdateMetadataOpts, VolInfo, WalkDirOptions,
};
use regex::Regex;
use std::io::{self, SeekFrom};
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::io::ReaderStream;

/// Attach-time options
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalDiskOptions {
    /// Refuse filesystems without direct I/O support
    pub direct_io: bool,
}

/// A drive backed by a local directory
pub struct LocalDisk {
    endpoint: Endpoint,
    root: PathBuf,
}

impl std::fmt::Debug for LocalDisk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalDisk")
            .field("coord", &self.endpoint.coord)
            .field("root", &self.root)
            .finish()
    }
}

fn mod_time_nanos(meta: &std::fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .and_then(|d| i64::try_from(d.as_nanos()).ok())
        .unwrap_or_default()
}

fn created_secs(meta: &std::fs::Metadata) -> u64 {
    meta.created()
        .or_else(|_| meta.modified())
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_secs())
}

/// Compile a pattern with `*` and `?` wildcards
fn wildcard(pattern: &str) -> Result<Regex> {
    let translated = regex::escape(pattern)
        .replace(r"\*", ".*")
        .replace(r"\?", ".");
    Regex::new(&format!("^{translated}$"))
        .map_err(|e| Error::invalid_argument(format!("pattern {pattern:?}: {e}")))
}

/// What a directory entry is to a namespace walk
enum WalkKind {
    Dir,
    /// Directory holding a version list
    Object,
    File,
}

/// Whether a walk should emit `name` and whether it should descend into it
fn walk_filter(opts: &WalkDirOptions, name: &str, dir: bool) -> (bool, bool) {
    let matches_prefix = name.starts_with(&opts.filter_prefix);
    let toward_prefix = dir && opts.filter_prefix.starts_with(name);
    let forwarded = opts.forward_to.is_empty() || name >= opts.forward_to.as_str();
    let toward_forward = dir && opts.forward_to.starts_with(name);

    let emit = matches_prefix && forwarded;
    let descend =
        dir && opts.recursive && (matches_prefix || toward_prefix) && (forwarded || toward_forward);
    (emit, descend)
}

impl LocalDisk {
    /// Attach the drive at `endpoint`, formatting it on first use
    pub async fn open(endpoint: Endpoint, options: LocalDiskOptions) -> Result<Self> {
        let root = endpoint.path.clone();

        match fs::metadata(&root).await {
            Ok(meta) if !meta.is_dir() => {
                return Err(Error::DiskNotDir(root.display().to_string()));
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                fs::create_dir_all(&root)
                    .await
                    .map_err(|e| attach_error(&root, e))?;
            }
            Err(e) => return Err(attach_error(&root, e)),
        }

        let tmp = root.join(SYSTEM_DIR).join(TMP_DIR);
        fs::create_dir_all(&tmp)
            .await
            .map_err(|e| attach_error(&root, e))?;

        if options.direct_io {
            tokio::task::spawn_blocking(move || raw_io::check_direct_io(&tmp))
                .await
                .map_err(|e| Error::internal(format!("direct I/O check panicked: {e}")))??;
        }

        let format = if let Some(format) = format::load(&root).await? {
            format
        } else {
            let format = Format::new();
            format::store(&root, &format).await?;
            tracing::info!("Formatted drive {} with id {}", root.display(), format.id);
            format
        };

        tracing::info!(
            "Attached drive {} ({}) id={}",
            root.display(),
            endpoint.coord,
            format.id
        );
        Ok(Self { endpoint, root })
    }

    /// Drive root directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn vol_dir(&self, volume: &str) -> Result<PathBuf> {
        if volume.is_empty()
            || volume.contains('/')
            || volume == "."
            || volume == ".."
            || volume == SYSTEM_DIR
        {
            return Err(Error::invalid_argument(format!("invalid volume name: {volume:?}")));
        }
        Ok(self.root.join(volume))
    }

    fn file_path(&self, volume: &str, path: &str) -> Result<PathBuf> {
        let vol = self.vol_dir(volume)?;
        let relative = path.trim_start_matches('/');
        for component in Path::new(relative).components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => return Err(Error::invalid_argument(format!("invalid path: {path:?}"))),
            }
        }
        Ok(vol.join(relative))
    }

    async fn ensure_volume(&self, volume: &str) -> Result<PathBuf> {
        let dir = self.vol_dir(volume)?;
        match fs::metadata(&dir).await {
            Ok(meta) if meta.is_dir() => Ok(dir),
            Ok(_) => Err(Error::VolumeNotFound(volume.to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(Error::VolumeNotFound(volume.to_string()))
            }
            Err(e) => Err(self.disk_error(e)),
        }
    }

    /// Failure touching the drive itself rather than one file
    fn disk_error(&self, err: io::Error) -> Error {
        attach_error(&self.root, err)
    }

    /// Failure on a file inside a volume
    fn file_error(&self, err: io::Error, volume: &str, path: &str) -> Error {
        let location = format!("{volume}/{path}");
        match err.kind() {
            io::ErrorKind::NotFound
            | io::ErrorKind::IsADirectory
            | io::ErrorKind::NotADirectory => Error::FileNotFound(location),
            io::ErrorKind::PermissionDenied => Error::FileAccessDenied(location),
            io::ErrorKind::StorageFull => Error::DiskFull,
            _ => self.disk_error(err),
        }
    }

    fn tmp_path(&self) -> PathBuf {
        self.root
            .join(SYSTEM_DIR)
            .join(TMP_DIR)
            .join(uuid::Uuid::new_v4().to_string())
    }

    /// Write through a temporary file and rename into place
    async fn write_atomic(&self, dst: &Path, buf: &[u8], sync: bool) -> io::Result<()> {
        let tmp = self.tmp_path();
        let result = async {
            let mut file = fs::File::create(&tmp).await?;
            file.write_all(buf).await?;
            if sync {
                file.sync_all().await?;
            }
            drop(file);
            if let Some(parent) = dst.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::rename(&tmp, dst).await
        }
        .await;

        if result.is_err() {
            let _ = fs::remove_file(&tmp).await;
        }
        result
    }

    /// Remove empty directories from `dir` up to, not including, `stop`
    async fn prune_empty_parents(dir: &Path, stop: &Path) {
        let mut current = Some(dir);
        while let Some(d) = current {
            if d == stop || !d.starts_with(stop) || fs::remove_dir(d).await.is_err() {
                return;
            }
            current = d.parent();
        }
    }

    async fn stat_path(&self, full: &Path, name: String, volume: &str) -> Result<StatInfo> {
        let meta = fs::metadata(full)
            .await
            .map_err(|e| self.file_error(e, volume, &name))?;
        Ok(StatInfo {
            size: meta.len(),
            mod_time: mod_time_nanos(&meta),
            dir: meta.is_dir(),
            mode: meta.permissions().mode(),
            name,
        })
    }

    async fn load_meta(&self, volume: &str, path: &str) -> Result<XlMeta> {
        self.ensure_volume(volume).await?;
        let meta_path = self.file_path(volume, path)?.join(META_FILE);
        let buf = fs::read(&meta_path)
            .await
            .map_err(|e| self.file_error(e, volume, path))?;
        XlMeta::from_bytes(&buf, &format!("{volume}/{path}"))
    }

    /// Like `load_meta`, but a missing object yields an empty version list
    async fn load_meta_or_default(&self, volume: &str, path: &str) -> Result<XlMeta> {
        match self.load_meta(volume, path).await {
            Err(Error::FileNotFound(_)) => Ok(XlMeta::default()),
            other => other,
        }
    }

    async fn store_meta(&self, volume: &str, path: &str, meta: &XlMeta, sync: bool) -> Result<()> {
        let obj_dir = self.file_path(volume, path)?;
        let meta_path = obj_dir.join(META_FILE);

        if meta.is_empty() {
            match fs::remove_file(&meta_path).await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(self.file_error(e, volume, path)),
            }
            Self::prune_empty_parents(&obj_dir, &self.vol_dir(volume)?).await;
            return Ok(());
        }

        let buf = meta.to_bytes()?;
        self.write_atomic(&meta_path, &buf, sync)
            .await
            .map_err(|e| self.file_error(e, volume, path))
    }

    async fn remove_data_dir(&self, volume: &str, path: &str, data_dir: &str) -> Result<()> {
        if data_dir.is_empty() {
            return Ok(());
        }
        let dir = self.file_path(volume, path)?.join(data_dir);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.file_error(e, volume, path)),
        }
    }

    fn part_path(obj_dir: &Path, data_dir: &str, number: u32) -> PathBuf {
        obj_dir.join(data_dir).join(format!("part.{number}"))
    }

    /// Sorted entries of one directory, named relative to the volume
    async fn walk_level(
        &self,
        volume: &str,
        dir: &Path,
        relative: &str,
    ) -> Result<Vec<(String, WalkKind)>> {
        let err = |e| self.file_error(e, volume, relative);
        let mut entries = fs::read_dir(dir).await.map_err(err)?;
        let mut level = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(err)? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let path = format!("{relative}{name}");
            if entry.file_type().await.map_err(err)?.is_dir() {
                if fs::try_exists(entry.path().join(META_FILE)).await.unwrap_or(false) {
                    level.push((path, WalkKind::Object));
                } else {
                    level.push((format!("{path}/"), WalkKind::Dir));
                }
            } else if name != META_FILE {
                level.push((path, WalkKind::File));
            }
        }
        level.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(level)
    }

    async fn read_multiple_one(
        &self,
        vol_dir: &Path,
        req: &ReadMultipleReq,
        file: &str,
    ) -> ReadMultipleResp {
        let mut resp = ReadMultipleResp {
            bucket: req.bucket.clone(),
            prefix: req.prefix.clone(),
            file: file.to_string(),
            ..ReadMultipleResp::default()
        };
        let relative = if req.prefix.is_empty() {
            file.to_string()
        } else {
            format!("{}/{}", req.prefix.trim_end_matches('/'), file)
        };

        let full = match self.file_path(&req.bucket, &relative) {
            Ok(p) if p.starts_with(vol_dir) => p,
            Ok(_) | Err(_) => {
                resp.error = Error::invalid_argument(format!("invalid path: {relative:?}")).to_string();
                return resp;
            }
        };

        let meta = match fs::metadata(&full).await {
            Ok(meta) if meta.is_file() => meta,
            Ok(_) => {
                resp.error = Error::FileNotFound(relative).to_string();
                return resp;
            }
            Err(e) => {
                resp.error = self.file_error(e, &req.bucket, &relative).to_string();
                return resp;
            }
        };

        resp.exists = true;
        resp.mod_time = mod_time_nanos(&meta);
        if req.max_size > 0 && meta.len() > req.max_size {
            resp.error = format!("max size ({}) exceeded: {}", req.max_size, meta.len());
            return resp;
        }
        if req.metadata_only {
            return resp;
        }
        match fs::read(&full).await {
            Ok(data) => resp.data = data,
            Err(e) => resp.error = self.file_error(e, &req.bucket, &relative).to_string(),
        }
        resp
    }
}

#[async_trait]
impl StorageApi for LocalDisk {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn disk_id(&self) -> Result<String> {
        format::load(&self.root)
            .await?
            .map(|f| f.id)
            .ok_or_else(|| Error::BackendFormat(format!("{} is unformatted", self.root.display())))
    }

    async fn disk_info(&self) -> Result<DiskInfo> {
        let root = self.root.clone();
        let (total, free) = tokio::task::spawn_blocking(move || raw_io::capacity(&root))
            .await
            .map_err(|e| Error::internal(format!("capacity query panicked: {e}")))??;

        let mut info = DiskInfo {
            total,
            free,
            used: total.saturating_sub(free),
            endpoint: self.endpoint.to_string(),
            mount_path: self.root.display().to_string(),
            ..DiskInfo::default()
        };
        match self.disk_id().await {
            Ok(id) => info.id = id,
            Err(e) => info.error = e.to_string(),
        }
        Ok(info)
    }

    async fn make_vol(&self, volume: &str) -> Result<()> {
        let dir = self.vol_dir(volume)?;
        match fs::create_dir(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                Err(Error::VolumeExists(volume.to_string()))
            }
            Err(e) => Err(self.disk_error(e)),
        }
    }

    async fn make_vol_bulk(&self, volumes: &[String]) -> Result<()> {
        for volume in volumes {
            match self.make_vol(volume).await {
                Ok(()) | Err(Error::VolumeExists(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn list_vols(&self) -> Result<Vec<VolInfo>> {
        let mut entries = fs::read_dir(&self.root)
            .await
            .map_err(|e| self.disk_error(e))?;
        let mut vols = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| self.disk_error(e))? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == SYSTEM_DIR {
                continue;
            }
            let meta = entry.metadata().await.map_err(|e| self.disk_error(e))?;
            if meta.is_dir() {
                vols.push(VolInfo {
                    name,
                    created: created_secs(&meta),
                });
            }
        }
        vols.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(vols)
    }

    async fn stat_vol(&self, volume: &str) -> Result<VolInfo> {
        let dir = self.ensure_volume(volume).await?;
        let meta = fs::metadata(&dir).await.map_err(|e| self.disk_error(e))?;
        Ok(VolInfo {
            name: volume.to_string(),
            created: created_secs(&meta),
        })
    }

    async fn delete_vol(&self, volume: &str, force: bool) -> Result<()> {
        let dir = self.vol_dir(volume)?;
        let result = if force {
            fs::remove_dir_all(&dir).await
        } else {
            fs::remove_dir(&dir).await
        };
        result.map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => Error::VolumeNotFound(volume.to_string()),
            io::ErrorKind::DirectoryNotEmpty => Error::VolumeNotEmpty(volume.to_string()),
            _ => self.disk_error(e),
        })
    }

    async fn append_file(&self, volume: &str, path: &str, buf: Bytes) -> Result<()> {
        self.ensure_volume(volume).await?;
        let full = self.file_path(volume, path)?;
        let err = |e| self.file_error(e, volume, path);

        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).await.map_err(err)?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&full)
            .await
            .map_err(err)?;
        file.write_all(&buf).await.map_err(err)?;
        file.flush().await.map_err(err)
    }

    async fn create_file(
        &self,
        volume: &str,
        path: &str,
        size: u64,
        mut body: ByteStream,
    ) -> Result<()> {
        self.ensure_volume(volume).await?;
        let full = self.file_path(volume, path)?;
        let err = |e| self.file_error(e, volume, path);

        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).await.map_err(err)?;
        }
        let mut file = fs::File::create(&full).await.map_err(err)?;

        let result = async {
            let mut written = 0u64;
            while let Some(chunk) = body.next().await {
                let chunk = chunk?;
                written += chunk.len() as u64;
                if written > size {
                    return Err(Error::invalid_argument(format!(
                        "more data than expected: {written} > {size}"
                    )));
                }
                file.write_all(&chunk).await.map_err(err)?;
            }
            if written < size {
                return Err(Error::invalid_argument(format!(
                    "less data than expected: {written} < {size}"
                )));
            }
            file.sync_data().await.map_err(err)
        }
        .await;

        if result.is_err() {
            drop(file);
            let _ = fs::remove_file(&full).await;
        }
        result
    }

    async fn write_all(&self, volume: &str, path: &str, buf: Bytes) -> Result<()> {
        self.ensure_volume(volume).await?;
        let full = self.file_path(volume, path)?;
        self.write_atomic(&full, &buf, true)
            .await
            .map_err(|e| self.file_error(e, volume, path))
    }

    async fn read_all(&self, volume: &str, path: &str) -> Result<Bytes> {
        self.ensure_volume(volume).await?;
        let full = self.file_path(volume, path)?;
        fs::read(&full)
            .await
            .map(Bytes::from)
            .map_err(|e| self.file_error(e, volume, path))
    }

    async fn read_file(
        &self,
        volume: &str,
        path: &str,
        offset: u64,
        length: usize,
        verifier: Option<BitrotVerifier>,
    ) -> Result<Bytes> {
        self.ensure_volume(volume).await?;
        let full = self.file_path(volume, path)?;
        let err = |e| self.file_error(e, volume, path);
        let short = || Error::FileCorrupt(format!("{volume}/{path}: shorter than requested range"));

        if let Some(verifier) = verifier {
            let data = fs::read(&full).await.map_err(err)?;
            if !verifier.verify(&data) {
                return Err(Error::FileCorrupt(format!(
                    "{volume}/{path}: {} mismatch",
                    verifier.algorithm
                )));
            }
            let start = usize::try_from(offset).map_err(|_| short())?;
            let end = start.checked_add(length).ok_or_else(short)?;
            return data
                .get(start..end)
                .map(Bytes::copy_from_slice)
                .ok_or_else(short);
        }

        let mut file = fs::File::open(&full).await.map_err(err)?;
        file.seek(SeekFrom::Start(offset)).await.map_err(err)?;
        let mut buf = vec![0u8; length];
        file.read_exact(&mut buf).await.map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                short()
            } else {
                err(e)
            }
        })?;
        Ok(Bytes::from(buf))
    }

    async fn read_file_stream(
        &self,
        volume: &str,
        path: &str,
        offset: u64,
        length: u64,
    ) -> Result<ByteStream> {
        self.ensure_volume(volume).await?;
        let full = self.file_path(volume, path)?;
        let err = |e| self.file_error(e, volume, path);

        let mut file = fs::File::open(&full).await.map_err(err)?;
        let size = file.metadata().await.map_err(err)?.len();
        if offset.saturating_add(length) > size {
            return Err(Error::FileCorrupt(format!(
                "{volume}/{path}: range {offset}+{length} beyond size {size}"
            )));
        }
        file.seek(SeekFrom::Start(offset)).await.map_err(err)?;
        Ok(ReaderStream::new(file.take(length)).boxed())
    }

    async fn list_dir(&self, volume: &str, dir_path: &str, count: usize) -> Result<Vec<String>> {
        self.ensure_volume(volume).await?;
        let dir = self.file_path(volume, dir_path)?;
        let err = |e| self.file_error(e, volume, dir_path);

        let mut entries = fs::read_dir(&dir).await.map_err(err)?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(err)? {
            let mut name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().await.map_err(err)?.is_dir() {
                name.push('/');
            }
            names.push(name);
        }
        names.sort();
        if count > 0 {
            names.truncate(count);
        }
        Ok(names)
    }

    async fn rename_file(
        &self,
        src_volume: &str,
        src_path: &str,
        dst_volume: &str,
        dst_path: &str,
    ) -> Result<()> {
        self.ensure_volume(src_volume).await?;
        self.ensure_volume(dst_volume).await?;
        let src = self.file_path(src_volume, src_path)?;
        let dst = self.file_path(dst_volume, dst_path)?;

        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| self.file_error(e, dst_volume, dst_path))?;
        }
        fs::rename(&src, &dst)
            .await
            .map_err(|e| self.file_error(e, src_volume, src_path))?;

        if let Some(parent) = src.parent() {
            Self::prune_empty_parents(parent, &self.vol_dir(src_volume)?).await;
        }
        Ok(())
    }

    async fn delete(&self, volume: &str, path: &str, opts: DeleteOptions) -> Result<()> {
        let vol_dir = self.ensure_volume(volume).await?;
        let full = self.file_path(volume, path)?;
        let err = |e| self.file_error(e, volume, path);

        let meta = fs::symlink_metadata(&full).await.map_err(err)?;
        if meta.is_dir() {
            if opts.recursive {
                fs::remove_dir_all(&full).await.map_err(err)?;
            } else {
                fs::remove_dir(&full).await.map_err(err)?;
            }
        } else {
            fs::remove_file(&full).await.map_err(err)?;
        }

        if let Some(parent) = full.parent() {
            Self::prune_empty_parents(parent, &vol_dir).await;
        }
        Ok(())
    }

    async fn stat_info_file(&self, volume: &str, path: &str, glob: bool) -> Result<Vec<StatInfo>> {
        let vol_dir = self.ensure_volume(volume).await?;
        let full = self.file_path(volume, path)?;

        if !glob {
            return Ok(vec![self.stat_path(&full, path.to_string(), volume).await?]);
        }

        let pattern = wildcard(
            &full
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        )?;
        let parent = full.parent().unwrap_or(vol_dir.as_path()).to_path_buf();
        let err = |e| self.file_error(e, volume, path);

        let mut entries = fs::read_dir(&parent).await.map_err(err)?;
        let mut stats = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(err)? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !pattern.is_match(&name) {
                continue;
            }
            let entry_path = entry.path();
            let relative = entry_path
                .strip_prefix(&vol_dir)
                .unwrap_or(&entry_path)
                .to_string_lossy()
                .into_owned();
            stats.push(self.stat_path(&entry_path, relative, volume).await?);
        }
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(stats)
    }

    async fn read_multiple(
        &self,
        req: ReadMultipleReq,
        out: mpsc::Sender<ReadMultipleResp>,
    ) -> Result<()> {
        let vol_dir = self.ensure_volume(&req.bucket).await?;
        let mut found = 0usize;

        for file in &req.files {
            let resp = self.read_multiple_one(&vol_dir, &req, file).await;
            let missing = !resp.exists;
            if resp.exists {
                found += 1;
            }
            out.send(resp).await.map_err(|_| Error::Cancelled)?;

            if missing && req.abort_on_404 {
                break;
            }
            if req.max_results > 0 && found >= req.max_results {
                break;
            }
        }
        Ok(())
    }

    async fn walk_dir(&self, opts: WalkDirOptions, out: mpsc::Sender<MetaCacheEntry>) -> Result<()> {
        let vol_dir = self.ensure_volume(&opts.bucket).await?;
        let base = match opts.base_dir.trim_matches('/') {
            "" => String::new(),
            dir => format!("{dir}/"),
        };
        let base_dir = self.file_path(&opts.bucket, &base)?;

        let first = match self.walk_level(&opts.bucket, &base_dir, &base).await {
            Ok(level) => level,
            Err(Error::FileNotFound(_)) if !opts.report_not_found => return Ok(()),
            Err(e) => return Err(e),
        };

        let mut sent = 0usize;
        let mut stack = vec![first.into_iter()];
        while let Some(level) = stack.last_mut() {
            let Some((name, kind)) = level.next() else {
                stack.pop();
                continue;
            };
            let (emit, descend) = walk_filter(&opts, &name, matches!(kind, WalkKind::Dir));

            if emit {
                let metadata = match kind {
                    WalkKind::Object => fs::read(vol_dir.join(&name).join(META_FILE))
                        .await
                        .map_err(|e| self.file_error(e, &opts.bucket, &name))?,
                    WalkKind::Dir | WalkKind::File => Vec::new(),
                };
                out.send(MetaCacheEntry { name: name.clone(), metadata })
                    .await
                    .map_err(|_| Error::Cancelled)?;
                sent += 1;
                if opts.limit > 0 && sent >= opts.limit {
                    break;
                }
            }
            if descend {
                // Removed underneath us: skip it rather than fail the walk
                match self.walk_level(&opts.bucket, &vol_dir.join(&name), &name).await {
                    Ok(level) => stack.push(level.into_iter()),
                    Err(Error::FileNotFound(_)) => {}
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(())
    }

    async fn ns_scanner(
        &self,
        volume: &str,
        updates: mpsc::Sender<DataUsageEntry>,
    ) -> Result<DataUsageInfo> {
        let opts = WalkDirOptions {
            bucket: volume.to_string(),
            recursive: true,
            ..WalkDirOptions::default()
        };
        let (tx, mut rx) = mpsc::channel::<MetaCacheEntry>(1);
        let tally = async move {
            let mut info = DataUsageInfo {
                bucket: volume.to_string(),
                ..DataUsageInfo::default()
            };
            while let Some(entry) = rx.recv().await {
                if !entry.is_object() {
                    continue;
                }
                let usage = XlMeta::from_bytes(&entry.metadata, &entry.name)?.usage(&entry.name);
                info.add(&usage);
                updates.send(usage).await.map_err(|_| Error::Cancelled)?;
            }
            Ok::<_, Error>(info)
        };

        let (walked, tallied) = tokio::join!(self.walk_dir(opts, tx), tally);
        let info = tallied?;
        walked?;
        tracing::debug!(
            "Scanned {}: {} objects, {} bytes",
            volume,
            info.objects,
            info.size
        );
        Ok(info)
    }

    async fn clean_abandoned_data(&self, volume: &str, path: &str) -> Result<()> {
        let meta = match self.load_meta(volume, path).await {
            Ok(meta) => meta,
            Err(Error::FileNotFound(_)) => return Ok(()),
            Err(e) => return Err(e),
        };
        let referenced = meta.data_dirs();
        let obj_dir = self.file_path(volume, path)?;
        let err = |e| self.file_error(e, volume, path);

        let mut entries = fs::read_dir(&obj_dir).await.map_err(err)?;
        while let Some(entry) = entries.next_entry().await.map_err(err)? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if referenced.contains(name.as_str())
                || uuid::Uuid::parse_str(&name).is_err()
                || !entry.file_type().await.map_err(err)?.is_dir()
            {
                continue;
            }
            tracing::debug!("Removing abandoned data dir {}/{}/{}", volume, path, name);
            fs::remove_dir_all(entry.path()).await.map_err(err)?;
        }
        Ok(())
    }

    async fn verify_file(&self, volume: &str, path: &str, fi: &FileInfo) -> Result<()> {
        self.ensure_volume(volume).await?;
        let obj_dir = self.file_path(volume, path)?;

        for part in &fi.parts {
            let part_path = Self::part_path(&obj_dir, &fi.data_dir, part.number);
            let part_name = format!("{path}/{}/part.{}", fi.data_dir, part.number);
            let data = fs::read(&part_path)
                .await
                .map_err(|e| self.file_error(e, volume, &part_name))?;

            if data.len() as u64 != part.size {
                return Err(Error::FileCorrupt(format!(
                    "{volume}/{part_name}: size {} expected {}",
                    data.len(),
                    part.size
                )));
            }
            if let Some(checksum) = &part.checksum {
                let verifier = BitrotVerifier::from_hex(&checksum.algorithm, &checksum.hash)?;
                if !verifier.verify(&data) {
                    return Err(Error::FileCorrupt(format!(
                        "{volume}/{part_name}: {} mismatch",
                        verifier.algorithm
                    )));
                }
            }
        }
        Ok(())
    }

    async fn check_parts(&self, volume: &str, path: &str, fi: &FileInfo) -> Result<()> {
        self.ensure_volume(volume).await?;
        let obj_dir = self.file_path(volume, path)?;

        for part in &fi.parts {
            let part_path = Self::part_path(&obj_dir, &fi.data_dir, part.number);
            let part_name = format!("{path}/{}/part.{}", fi.data_dir, part.number);
            let meta = fs::metadata(&part_path)
                .await
                .map_err(|e| self.file_error(e, volume, &part_name))?;
            if meta.len() != part.size {
                return Err(Error::FileCorrupt(format!(
                    "{volume}/{part_name}: size {} expected {}",
                    meta.len(),
                    part.size
                )));
            }
        }
        Ok(())
    }

    async fn read_version(
        &self,
        volume: &str,
        path: &str,
        version_id: &str,
        opts: ReadOptions,
    ) -> Result<FileInfo> {
        self.load_meta(volume, path)
            .await?
            .to_file_info(volume, path, version_id, opts.read_data)
    }

    async fn read_xl(&self, volume: &str, path: &str, read_data: bool) -> Result<RawFileInfo> {
        let mut meta = self.load_meta(volume, path).await?;
        if !read_data {
            meta.strip_data();
        }
        Ok(RawFileInfo {
            buf: meta.to_bytes()?,
        })
    }

    async fn write_metadata(&self, volume: &str, path: &str, fi: FileInfo) -> Result<()> {
        let mut meta = self.load_meta_or_default(volume, path).await?;
        meta.add_version(fi);
        self.store_meta(volume, path, &meta, true).await
    }

    async fn update_metadata(
        &self,
        volume: &str,
        path: &str,
        fi: FileInfo,
        opts: UpdateMetadataOpts,
    ) -> Result<()> {
        let mut meta = self.load_meta(volume, path).await?;
        meta.update_version(&fi)?;
        self.store_meta(volume, path, &meta, !opts.no_persistence)
            .await
    }

    async fn delete_version(
        &self,
        volume: &str,
        path: &str,
        fi: FileInfo,
        force_del_marker: bool,
        _opts: DeleteOptions,
    ) -> Result<()> {
        // A delete marker on an object this drive never saw needs force
        let mut meta = match self.load_meta(volume, path).await {
            Err(Error::FileNotFound(_)) if fi.deleted && force_del_marker => XlMeta::default(),
            other => other?,
        };

        if fi.deleted {
            let marker = FileInfo {
                data_dir: String::new(),
                parts: Vec::new(),
                data: None,
                size: 0,
                ..fi
            };
            meta.add_version(marker);
        } else {
            let removed = meta.delete_version(&fi.version_id)?;
            if !meta.data_dirs().contains(removed.data_dir.as_str()) {
                self.remove_data_dir(volume, path, &removed.data_dir).await?;
            }
        }
        self.store_meta(volume, path, &meta, true).await
    }

    async fn delete_versions(
        &self,
        volume: &str,
        versions: Vec<FileInfoVersions>,
        opts: DeleteOptions,
    ) -> Vec<Option<Error>> {
        let mut errs = Vec::with_capacity(versions.len());
        for entry in versions {
            let mut slot = None;
            for fi in entry.versions {
                if let Err(e) = self.delete_version(volume, &entry.name, fi, false, opts).await {
                    slot = Some(e);
                    break;
                }
            }
            errs.push(slot);
        }
        errs
    }

    async fn rename_data(
        &self,
        src_volume: &str,
        src_path: &str,
        fi: FileInfo,
        dst_volume: &str,
        dst_path: &str,
        _opts: RenameOptions,
    ) -> Result<u64> {
        self.ensure_volume(src_volume).await?;
        self.ensure_volume(dst_volume).await?;
        let src_obj = self.file_path(src_volume, src_path)?;
        let dst_obj = self.file_path(dst_volume, dst_path)?;

        if !fi.data_dir.is_empty() {
            let src_data = src_obj.join(&fi.data_dir);
            let dst_data = dst_obj.join(&fi.data_dir);
            fs::create_dir_all(&dst_obj)
                .await
                .map_err(|e| self.file_error(e, dst_volume, dst_path))?;
            if fs::metadata(&dst_data).await.is_ok() {
                self.remove_data_dir(dst_volume, dst_path, &fi.data_dir)
                    .await?;
            }
            fs::rename(&src_data, &dst_data)
                .await
                .map_err(|e| self.file_error(e, src_volume, src_path))?;
        }

        let mut meta = self.load_meta_or_default(dst_volume, dst_path).await?;
        let replaced = meta
            .find(&fi.version_id)
            .map(|old| old.data_dir.clone())
            .filter(|old| *old != fi.data_dir);
        meta.add_version(fi);
        if let Some(old) = replaced {
            if !meta.data_dirs().contains(old.as_str()) {
                self.remove_data_dir(dst_volume, dst_path, &old).await?;
            }
        }
        self.store_meta(dst_volume, dst_path, &meta, true).await?;

        if src_obj != dst_obj {
            let _ = fs::remove_dir_all(&src_obj).await;
            if let Some(parent) = src_obj.parent() {
                Self::prune_empty_parents(parent, &self.vol_dir(src_volume)?).await;
            }
        }
        Ok(meta.signature())
    }
}
