//! Attaching drives from endpoints

use crate::api::StorageRef;
use crate::local::{LocalDisk, LocalDiskOptions};
use async_trait::async_trait;
use objectio_common::{Endpoint, Result};
use std::sync::Arc;

/// Turns an endpoint into an attached drive
#[async_trait]
pub trait DiskOpener: Send + Sync {
    async fn open(&self, endpoint: &Endpoint) -> Result<StorageRef>;
}

/// Opens local directories as [`LocalDisk`]s
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalDiskOpener {
    pub options: LocalDiskOptions,
}

impl LocalDiskOpener {
    #[must_use]
    pub const fn new(direct_io: bool) -> Self {
        Self {
            options: LocalDiskOptions { direct_io },
        }
    }
}

#[async_trait]
impl DiskOpener for LocalDiskOpener {
    async fn open(&self, endpoint: &Endpoint) -> Result<StorageRef> {
        let disk = LocalDisk::open(endpoint.clone(), self.options).await?;
        Ok(Arc::new(disk))
    }
}
