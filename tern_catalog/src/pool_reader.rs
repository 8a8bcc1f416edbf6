//! Background thread polling HDFS for the current set of cache pools.

use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::catalog::Catalog;

#[derive(Debug, Default)]
struct Shutdown {
    stop: Mutex<bool>,
    signal: Condvar,
}

/// Polls the catalog's HDFS client on a fixed interval and diffs the listing
/// into the registry. Dropped with the catalog; stopping is prompt.
#[derive(Debug)]
pub(crate) struct CachePoolReader {
    shutdown: Arc<Shutdown>,
    thread: Option<JoinHandle<()>>,
}

impl CachePoolReader {
    pub(crate) fn start(catalog: Weak<Catalog>, interval: Duration) -> Self {
        let shutdown = Arc::new(Shutdown::default());
        let signal = Arc::clone(&shutdown);
        let thread = std::thread::Builder::new()
            .name("cache-pool-reader".into())
            .spawn(move || loop {
                match catalog.upgrade() {
                    Some(catalog) => {
                        debug!("polling cache pools");
                        if let Err(e) = catalog.poll_cache_pools(false) {
                            warn!(error = %e, "error polling cache pools; skipping this cycle");
                        }
                    }
                    None => {
                        // The catalog may still be under construction; only a
                        // raised shutdown flag means it is gone.
                        let mut stop = signal.stop.lock();
                        if *stop {
                            return;
                        }
                        let _ = signal.signal.wait_for(&mut stop, Duration::from_millis(10));
                        continue;
                    }
                }
                let mut stop = signal.stop.lock();
                if *stop {
                    return;
                }
                let _ = signal.signal.wait_for(&mut stop, interval);
                if *stop {
                    return;
                }
            })
            .expect("failed to spawn cache pool reader thread");
        Self {
            shutdown,
            thread: Some(thread),
        }
    }
}

impl Drop for CachePoolReader {
    fn drop(&mut self) {
        *self.shutdown.stop.lock() = true;
        self.shutdown.signal.notify_all();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CatalogConfig;
    use crate::metastore::{HdfsClient, MemHdfs, MemMetastore, MetastoreClient};
    use std::time::Instant;
    use tern_types::CachePoolInfo;
    use uuid::Uuid;

    #[test]
    fn reader_picks_up_new_and_dropped_pools() {
        let hdfs = MemHdfs::new();
        hdfs.set_pools(vec![CachePoolInfo::new("hot")]);
        let config = CatalogConfig {
            num_loading_threads: 1,
            cache_pool_poll_interval: Duration::from_millis(20),
            ..CatalogConfig::default()
        };
        let catalog = Catalog::new(
            config,
            Uuid::new_v4(),
            MemMetastore::new() as Arc<dyn MetastoreClient>,
            Some(Arc::clone(&hdfs) as Arc<dyn HdfsClient>),
        );

        let deadline = Instant::now() + Duration::from_secs(5);
        while catalog.all_cache_pools().is_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(catalog.all_cache_pools().len(), 1);

        hdfs.set_pools(vec![]);
        let deadline = Instant::now() + Duration::from_secs(5);
        while !catalog.all_cache_pools().is_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(catalog.all_cache_pools().is_empty());
        // The dropped pool left a tombstone behind.
        let version = catalog.current_version();
        assert_eq!(catalog.deleted_objects(0, version).len(), 1);
    }

    #[test]
    fn poll_errors_skip_the_cycle() {
        let hdfs = MemHdfs::new();
        hdfs.set_pools(vec![CachePoolInfo::new("hot")]);
        let config = CatalogConfig {
            num_loading_threads: 1,
            cache_pool_poll_interval: Duration::from_millis(20),
            ..CatalogConfig::default()
        };
        let catalog = Catalog::new(
            config,
            Uuid::new_v4(),
            MemMetastore::new() as Arc<dyn MetastoreClient>,
            Some(Arc::clone(&hdfs) as Arc<dyn HdfsClient>),
        );

        let deadline = Instant::now() + Duration::from_secs(5);
        while catalog.all_cache_pools().is_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }

        // A failing namenode must not drop the cached pools.
        hdfs.set_unavailable(true);
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(catalog.all_cache_pools().len(), 1);
    }
}
