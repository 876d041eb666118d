//! ObjectIO Storage - Drive backends
//!
//! This crate holds the drive abstraction the disk gateway serves:
//! - [`StorageApi`], the per-drive operation set
//! - [`LocalDisk`], a directory-backed implementation
//! - Drive format identity and direct I/O probing

pub mod api;
pub mod format;
pub mod local;
pub mod meta;
pub mod opener;
pub mod raw_io;

pub use api::{ByteStream, StorageApi, StorageRef};
pub use format::{Format, SYSTEM_DIR};
pub use local::{LocalDisk, LocalDiskOptions};
pub use meta::{META_FILE, XlMeta};
pub use opener::{DiskOpener, LocalDiskOpener};
