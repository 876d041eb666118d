//! Platform-specific drive checks
//!
//! - Direct I/O support: Linux O_DIRECT, macOS F_NOCACHE
//! - Filesystem capacity through statvfs

use objectio_common::{Error, Result};
use std::fs::OpenOptions;
use std::io;
use std::path::Path;

#[cfg(target_os = "linux")]
use std::os::unix::fs::OpenOptionsExt;

/// Name of the scratch file used by [`check_direct_io`]
const SCRATCH_FILE: &str = ".direct-io-check";

/// Check that the filesystem under `dir` accepts direct I/O
///
/// Filesystems such as tmpfs reject O_DIRECT with EINVAL at open time.
pub fn check_direct_io(dir: &Path) -> Result<()> {
    let scratch = dir.join(SCRATCH_FILE);

    let mut options = OpenOptions::new();
    options.read(true).write(true).create(true).truncate(true);

    #[cfg(target_os = "linux")]
    {
        options.custom_flags(libc::O_DIRECT);
    }

    let result = options.open(&scratch);
    let _ = std::fs::remove_file(&scratch);

    match result {
        Ok(file) => {
            #[cfg(target_os = "macos")]
            {
                use std::os::unix::io::AsRawFd;
                #[allow(unsafe_code)]
                let ret = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_NOCACHE, 1) };
                if ret == -1 {
                    return Err(Error::UnsupportedDisk(format!(
                        "{}: {}",
                        dir.display(),
                        io::Error::last_os_error()
                    )));
                }
            }
            drop(file);
            Ok(())
        }
        Err(e) if e.raw_os_error() == Some(libc::EINVAL) => {
            Err(Error::UnsupportedDisk(dir.display().to_string()))
        }
        Err(e) => Err(attach_error(dir, e)),
    }
}

/// Map an I/O failure while attaching a drive onto the attach taxonomy
pub fn attach_error(path: &Path, err: io::Error) -> Error {
    let location = path.display().to_string();
    match err.kind() {
        io::ErrorKind::PermissionDenied | io::ErrorKind::ReadOnlyFilesystem => {
            Error::DiskAccessDenied(location)
        }
        io::ErrorKind::NotADirectory => Error::DiskNotDir(location),
        io::ErrorKind::StorageFull => Error::DiskFull,
        _ if err.raw_os_error() == Some(libc::EIO) => Error::FaultyDisk(location),
        _ => Error::DiskIo(err),
    }
}

/// Total and free bytes of the filesystem holding `path`
pub fn capacity(path: &Path) -> Result<(u64, u64)> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| Error::invalid_argument(format!("path contains NUL: {}", path.display())))?;

    #[allow(unsafe_code)]
    let stat = unsafe {
        let mut stat: libc::statvfs = std::mem::zeroed();
        if libc::statvfs(c_path.as_ptr(), &raw mut stat) != 0 {
            return Err(Error::DiskIo(io::Error::last_os_error()));
        }
        stat
    };

    #[allow(clippy::unnecessary_cast)]
    let frsize = stat.f_frsize as u64;
    #[allow(clippy::unnecessary_cast)]
    let total = stat.f_blocks as u64 * frsize;
    #[allow(clippy::unnecessary_cast)]
    let free = stat.f_bavail as u64 * frsize;
    Ok((total, free))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_capacity_reports_space() {
        let dir = tempdir().unwrap();
        let (total, free) = capacity(dir.path()).unwrap();
        assert!(total > 0);
        assert!(free <= total);
    }

    #[test]
    fn test_attach_error_mapping() {
        let path = Path::new("/mnt/d0");
        assert!(matches!(
            attach_error(path, io::Error::from(io::ErrorKind::PermissionDenied)),
            Error::DiskAccessDenied(_)
        ));
        assert!(matches!(
            attach_error(path, io::Error::from_raw_os_error(libc::EIO)),
            Error::FaultyDisk(_)
        ));
        assert!(matches!(
            attach_error(path, io::Error::from(io::ErrorKind::Other)),
            Error::DiskIo(_)
        ));
    }

    #[test]
    fn test_direct_io_check_leaves_no_file_behind() {
        let dir = tempdir().unwrap();
        // tmpfs rejects O_DIRECT, other filesystems accept it
        match check_direct_io(dir.path()) {
            Ok(()) | Err(Error::UnsupportedDisk(_)) => {}
            Err(e) => panic!("unexpected direct I/O error: {e}"),
        }
        assert!(!dir.path().join(SCRATCH_FILE).exists());
    }
}
