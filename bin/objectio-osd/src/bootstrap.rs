//! Drive attachment at startup
//!
//! Every local drive is opened once per pool batch. A pool whose drives all
//! fail with the same fatal condition stops the process; anything else is
//! retried in the background until the drive attaches.

use crate::registry::DiskRegistry;
use futures::future::join_all;
use objectio_common::{Endpoint, Error, ErrorKind, Verdict};
use objectio_storage::{DiskOpener, StorageRef};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Every drive of a pool failed with the same fatal condition
#[derive(Debug, thiserror::Error)]
#[error("pool {pool}: every drive failed to attach: {error}")]
pub struct FatalBootstrap {
    pub pool: usize,
    pub error: Error,
    pub paths: Vec<PathBuf>,
}

impl FatalBootstrap {
    #[must_use]
    pub fn hint(&self) -> String {
        remediation_hint(self.error.kind(), &self.paths)
    }
}

/// What an operator should do about an attach failure, empty if nothing specific
#[must_use]
pub fn remediation_hint(kind: ErrorKind, paths: &[PathBuf]) -> String {
    let paths = paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(" ");
    match kind.attach_key() {
        ErrorKind::DiskAccessDenied => {
            let user = std::env::var("USER").unwrap_or_else(|_| "<your-username>".to_string());
            format!(
                "Run the following command to add write permissions: \
                 `sudo chown -R {user} {paths} && sudo chmod u+rxw {paths}`"
            )
        }
        ErrorKind::UnsupportedDisk => format!(
            "{paths}: the filesystem does not support O_DIRECT; use a filesystem such as xfs or ext4"
        ),
        ErrorKind::DiskNotDir => format!("{paths}: not a directory, needs a directory"),
        ErrorKind::FaultyDisk => format!("{paths}: drive is faulty, please replace the drive"),
        ErrorKind::BackendFormat => format!(
            "{paths}: holds data in an unexpected format; point the endpoint at an empty directory"
        ),
        ErrorKind::DiskFull => format!("{paths}: drive is full, incoming I/O will fail"),
        _ => String::new(),
    }
}

/// The shared fatal condition of a batch, if every attempt failed with it
#[must_use]
pub fn systemic_failure<'a, I>(results: I) -> Option<ErrorKind>
where
    I: IntoIterator<Item = Option<&'a Error>>,
{
    let mut shared = None;
    for result in results {
        let key = result?.kind().attach_key();
        match shared {
            None => shared = Some(key),
            Some(kind) if kind != key => return None,
            Some(_) => {}
        }
    }
    shared.filter(|kind| kind.verdict() == Verdict::Fatal)
}

pub struct Bootstrap {
    registry: Arc<DiskRegistry>,
    opener: Arc<dyn DiskOpener>,
    retry_interval: Duration,
}

impl Bootstrap {
    #[must_use]
    pub fn new(
        registry: Arc<DiskRegistry>,
        opener: Arc<dyn DiskOpener>,
        retry_interval: Duration,
    ) -> Self {
        Self {
            registry,
            opener,
            retry_interval,
        }
    }

    fn publish(registry: &DiskRegistry, endpoint: &Endpoint, disk: StorageRef) {
        match registry.attach(endpoint.coord, disk) {
            Ok(_) => info!("drive {} attached at {}", endpoint, endpoint.coord),
            Err(e) => error!("drive {} cannot be published: {}", endpoint, e),
        }
    }

    /// Attach `endpoints`, returning the retry tasks of drives still pending
    ///
    /// Each retry task runs until its drive attaches.
    pub async fn run(
        &self,
        endpoints: Vec<Endpoint>,
    ) -> Result<Vec<JoinHandle<()>>, FatalBootstrap> {
        let mut pools: BTreeMap<usize, Vec<Endpoint>> = BTreeMap::new();
        for endpoint in endpoints {
            pools.entry(endpoint.coord.pool).or_default().push(endpoint);
        }

        let mut pending = Vec::new();
        for (pool, batch) in pools {
            let attempts = join_all(batch.iter().map(|e| self.opener.open(e))).await;

            if let Some(kind) = systemic_failure(attempts.iter().map(|r| r.as_ref().err())) {
                let paths = batch.iter().map(|e| e.path.clone()).collect();
                let error = attempts
                    .into_iter()
                    .find_map(Result::err)
                    .unwrap_or_else(|| Error::internal(format!("{kind:?}")));
                return Err(FatalBootstrap { pool, error, paths });
            }

            for (endpoint, attempt) in batch.into_iter().zip(attempts) {
                match attempt {
                    Ok(disk) => Self::publish(&self.registry, &endpoint, disk),
                    Err(e) => pending.push((endpoint, e)),
                }
            }
        }

        Ok(pending
            .into_iter()
            .map(|(endpoint, err)| self.spawn_retry(endpoint, err))
            .collect())
    }

    fn spawn_retry(&self, endpoint: Endpoint, err: Error) -> JoinHandle<()> {
        log_failure(&endpoint, &err);
        let registry = Arc::clone(&self.registry);
        let opener = Arc::clone(&self.opener);
        let interval = self.retry_interval;

        tokio::spawn(async move {
            let mut last = err.kind();
            loop {
                tokio::time::sleep(interval).await;
                match opener.open(&endpoint).await {
                    Ok(disk) => {
                        Self::publish(&registry, &endpoint, disk);
                        return;
                    }
                    Err(e) if e.kind() == last => {
                        debug!("drive {} still unavailable: {}", endpoint, e);
                    }
                    Err(e) => {
                        log_failure(&endpoint, &e);
                        last = e.kind();
                    }
                }
            }
        })
    }
}

fn log_failure(endpoint: &Endpoint, err: &Error) {
    let hint = remediation_hint(err.kind(), std::slice::from_ref(&endpoint.path));
    if hint.is_empty() {
        warn!("drive {} unavailable, retrying: {}", endpoint, err);
    } else {
        warn!("drive {} unavailable, retrying: {} ({})", endpoint, err, hint);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use objectio_common::{DiskCoord, PoolTopology, Result};
    use objectio_storage::LocalDiskOpener;
    use parking_lot::Mutex;
    use std::collections::{HashMap, VecDeque};
    use std::path::Path;
    use tempfile::TempDir;

    /// Fails each endpoint with a scripted sequence of errors, then opens it for real
    struct ScriptedOpener {
        script: Mutex<HashMap<PathBuf, VecDeque<Error>>>,
        opens: Mutex<HashMap<PathBuf, usize>>,
        inner: LocalDiskOpener,
    }

    impl ScriptedOpener {
        fn new(script: Vec<(&Path, Vec<Error>)>) -> Self {
            Self {
                script: Mutex::new(
                    script
                        .into_iter()
                        .map(|(p, errs)| (p.to_path_buf(), errs.into()))
                        .collect(),
                ),
                opens: Mutex::new(HashMap::new()),
                inner: LocalDiskOpener::new(false),
            }
        }

        fn successful_opens(&self, path: &Path) -> usize {
            self.opens.lock().get(path).copied().unwrap_or_default()
        }
    }

    #[async_trait]
    impl DiskOpener for ScriptedOpener {
        async fn open(&self, endpoint: &Endpoint) -> Result<StorageRef> {
            let next = self
                .script
                .lock()
                .get_mut(&endpoint.path)
                .and_then(VecDeque::pop_front);
            if let Some(err) = next {
                return Err(err);
            }
            let disk = self.inner.open(endpoint).await?;
            *self.opens.lock().entry(endpoint.path.clone()).or_default() += 1;
            Ok(disk)
        }
    }

    struct Fixture {
        dirs: Vec<TempDir>,
        endpoints: Vec<Endpoint>,
        registry: Arc<DiskRegistry>,
    }

    fn fixture(drives: usize) -> Fixture {
        let dirs: Vec<TempDir> = (0..drives).map(|_| tempfile::tempdir().unwrap()).collect();
        let endpoints = dirs
            .iter()
            .enumerate()
            .map(|(i, d)| Endpoint {
                path: d.path().to_path_buf(),
                coord: DiskCoord::new(0, 0, i),
                is_local: true,
            })
            .collect();
        let registry = Arc::new(DiskRegistry::new(&[PoolTopology {
            set_count: 1,
            drives_per_set: drives,
        }]));
        Fixture {
            dirs,
            endpoints,
            registry,
        }
    }

    fn not_dir(path: &Path) -> Error {
        Error::DiskNotDir(path.display().to_string())
    }

    #[test]
    fn test_systemic_failure_rule() {
        let a = Error::UnsupportedDisk("a".into());
        let b = Error::UnsupportedDisk("b".into()).context("attach");
        let c = Error::DiskNotDir("c".into());
        let full = Error::DiskFull;

        assert_eq!(
            systemic_failure([Some(&a), Some(&b)]),
            Some(ErrorKind::UnsupportedDisk)
        );
        assert_eq!(systemic_failure([Some(&a), Some(&c)]), None);
        assert_eq!(systemic_failure([Some(&a), None]), None);
        // Identical but retryable
        assert_eq!(systemic_failure([Some(&full), Some(&full)]), None);
        assert_eq!(systemic_failure(std::iter::empty()), None);

        // File and drive permission failures share a remediation
        let file = Error::FileAccessDenied("x".into());
        let disk = Error::DiskAccessDenied("y".into());
        assert_eq!(
            systemic_failure([Some(&file), Some(&disk)]),
            Some(ErrorKind::DiskAccessDenied)
        );
    }

    #[test]
    fn test_hints() {
        let paths = vec![PathBuf::from("/mnt/d0"), PathBuf::from("/mnt/d1")];
        let hint = remediation_hint(ErrorKind::FileAccessDenied, &paths);
        assert!(hint.contains("sudo chown -R"));
        assert!(hint.contains("/mnt/d0 /mnt/d1"));
        assert!(remediation_hint(ErrorKind::UnsupportedDisk, &paths).contains("O_DIRECT"));
        assert!(remediation_hint(ErrorKind::DiskNotDir, &paths).contains("needs a directory"));
        assert!(remediation_hint(ErrorKind::FaultyDisk, &paths).contains("replace the drive"));
        assert!(remediation_hint(ErrorKind::DiskFull, &paths).contains("incoming I/O will fail"));
        assert!(remediation_hint(ErrorKind::FileNotFound, &paths).is_empty());
    }

    #[tokio::test]
    async fn test_all_identical_fatal_aborts() {
        let fx = fixture(3);
        let opener = ScriptedOpener::new(
            fx.dirs
                .iter()
                .map(|d| (d.path(), vec![not_dir(d.path())]))
                .collect(),
        );
        let bootstrap = Bootstrap::new(
            Arc::clone(&fx.registry),
            Arc::new(opener),
            Duration::from_millis(10),
        );

        let fatal = bootstrap.run(fx.endpoints.clone()).await.unwrap_err();
        assert_eq!(fatal.pool, 0);
        assert_eq!(fatal.error.kind(), ErrorKind::DiskNotDir);
        assert_eq!(fatal.paths.len(), 3);
        assert!(fatal.hint().contains("needs a directory"));
        assert_eq!(fx.registry.attached(), 0);
    }

    #[tokio::test]
    async fn test_single_drive_pool_with_fatal_condition_aborts() {
        let fx = fixture(1);
        let opener = ScriptedOpener::new(vec![(
            fx.dirs[0].path(),
            vec![Error::BackendFormat("bad".into())],
        )]);
        let bootstrap = Bootstrap::new(
            Arc::clone(&fx.registry),
            Arc::new(opener),
            Duration::from_millis(10),
        );
        assert!(bootstrap.run(fx.endpoints.clone()).await.is_err());
    }

    #[tokio::test]
    async fn test_mixed_failures_retry_until_attached() {
        let fx = fixture(3);
        let (d0, d1) = (fx.dirs[0].path(), fx.dirs[1].path());
        let opener = Arc::new(ScriptedOpener::new(vec![
            (d0, vec![not_dir(d0), not_dir(d0), Error::DiskFull]),
            (d1, vec![Error::UnsupportedDisk("d1".into())]),
        ]));
        let bootstrap = Bootstrap::new(
            Arc::clone(&fx.registry),
            Arc::clone(&opener) as Arc<dyn DiskOpener>,
            Duration::from_millis(10),
        );

        let retries = bootstrap.run(fx.endpoints.clone()).await.unwrap();
        assert_eq!(retries.len(), 2);
        // The healthy drive is visible straight away
        assert!(fx.registry.get(fx.endpoints[2].coord).is_some());

        for handle in retries {
            tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .unwrap()
                .unwrap();
        }
        assert_eq!(fx.registry.attached(), 3);
        assert_eq!(opener.successful_opens(d0), 1);
        assert_eq!(opener.successful_opens(d1), 1);
    }

    #[tokio::test]
    async fn test_pools_judged_separately() {
        let dirs: Vec<TempDir> = (0..3).map(|_| tempfile::tempdir().unwrap()).collect();
        let endpoints: Vec<Endpoint> = vec![
            Endpoint {
                path: dirs[0].path().to_path_buf(),
                coord: DiskCoord::new(0, 0, 0),
                is_local: true,
            },
            Endpoint {
                path: dirs[1].path().to_path_buf(),
                coord: DiskCoord::new(0, 0, 1),
                is_local: true,
            },
            Endpoint {
                path: dirs[2].path().to_path_buf(),
                coord: DiskCoord::new(1, 0, 0),
                is_local: true,
            },
        ];
        let registry = Arc::new(DiskRegistry::new(&[
            PoolTopology {
                set_count: 1,
                drives_per_set: 2,
            },
            PoolTopology {
                set_count: 1,
                drives_per_set: 1,
            },
        ]));
        // Pool 0 fails with one fatal condition on one drive only; pool 1 is healthy
        let opener = ScriptedOpener::new(vec![(dirs[0].path(), vec![not_dir(dirs[0].path())])]);
        let bootstrap = Bootstrap::new(
            Arc::clone(&registry),
            Arc::new(opener),
            Duration::from_secs(60),
        );

        let retries = bootstrap.run(endpoints).await.unwrap();
        assert_eq!(retries.len(), 1);
        assert_eq!(registry.attached(), 2);
    }
}
