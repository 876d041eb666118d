//! Process-wide table of attached drives
//!
//! Sized once from the topology. Lookups take the shared side of the lock
//! and only clone a handle; attaching a drive takes the exclusive side.

use objectio_common::{DiskCoord, Error, PoolTopology, Result};
use objectio_storage::StorageRef;
use parking_lot::RwLock;

type Pool = Vec<Vec<Option<StorageRef>>>;

pub struct DiskRegistry {
    pools: RwLock<Vec<Pool>>,
}

impl DiskRegistry {
    #[must_use]
    pub fn new(topology: &[PoolTopology]) -> Self {
        let pools = topology
            .iter()
            .map(|p| vec![vec![None; p.drives_per_set]; p.set_count])
            .collect();
        Self {
            pools: RwLock::new(pools),
        }
    }

    /// The drive at `coord`, `None` until it has been attached
    #[must_use]
    pub fn get(&self, coord: DiskCoord) -> Option<StorageRef> {
        self.pools
            .read()
            .get(coord.pool)
            .and_then(|sets| sets.get(coord.set))
            .and_then(|disks| disks.get(coord.disk))
            .and_then(Clone::clone)
    }

    /// Publish a drive, returning the one it replaces
    pub fn attach(&self, coord: DiskCoord, disk: StorageRef) -> Result<Option<StorageRef>> {
        let mut pools = self.pools.write();
        let slot = pools
            .get_mut(coord.pool)
            .and_then(|sets| sets.get_mut(coord.set))
            .and_then(|disks| disks.get_mut(coord.disk))
            .ok_or_else(|| Error::invalid_argument(format!("{coord} is outside the topology")))?;
        Ok(slot.replace(disk))
    }

    /// Number of drives currently attached
    #[must_use]
    pub fn attached(&self) -> usize {
        self.pools
            .read()
            .iter()
            .flatten()
            .flatten()
            .filter(|slot| slot.is_some())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use objectio_common::Endpoint;
    use objectio_storage::{LocalDisk, LocalDiskOptions};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn topology() -> Vec<PoolTopology> {
        vec![
            PoolTopology {
                set_count: 2,
                drives_per_set: 4,
            },
            PoolTopology {
                set_count: 1,
                drives_per_set: 2,
            },
        ]
    }

    async fn open_disk(dir: &std::path::Path, coord: DiskCoord) -> StorageRef {
        let endpoint = Endpoint {
            path: dir.to_path_buf(),
            coord,
            is_local: true,
        };
        Arc::new(
            LocalDisk::open(endpoint, LocalDiskOptions::default())
                .await
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_absent_until_attached() {
        let dir = tempdir().unwrap();
        let registry = DiskRegistry::new(&topology());
        let coord = DiskCoord::new(1, 0, 1);

        assert!(registry.get(coord).is_none());
        assert_eq!(registry.attached(), 0);

        let disk = open_disk(dir.path(), coord).await;
        assert!(registry.attach(coord, disk).unwrap().is_none());
        assert!(registry.get(coord).is_some());
        assert!(registry.get(DiskCoord::new(1, 0, 0)).is_none());
        assert_eq!(registry.attached(), 1);
    }

    #[tokio::test]
    async fn test_replace_returns_previous() {
        let first = tempdir().unwrap();
        let second = tempdir().unwrap();
        let registry = DiskRegistry::new(&topology());
        let coord = DiskCoord::new(0, 1, 3);

        registry
            .attach(coord, open_disk(first.path(), coord).await)
            .unwrap();
        let previous = registry
            .attach(coord, open_disk(second.path(), coord).await)
            .unwrap()
            .unwrap();
        assert_eq!(previous.endpoint().path, first.path());
        assert_eq!(registry.get(coord).unwrap().endpoint().path, second.path());
        assert_eq!(registry.attached(), 1);
    }

    #[tokio::test]
    async fn test_out_of_range() {
        let dir = tempdir().unwrap();
        let registry = DiskRegistry::new(&topology());
        let coord = DiskCoord::new(0, 2, 0);

        assert!(registry.get(coord).is_none());
        let disk = open_disk(dir.path(), coord).await;
        assert!(matches!(
            registry.attach(coord, disk),
            Err(Error::InvalidArgument(_))
        ));
        assert!(registry.get(DiskCoord::new(5, 0, 0)).is_none());
    }
}
