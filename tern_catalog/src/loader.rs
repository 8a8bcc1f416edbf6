//! Background materialization of incomplete tables.
//!
//! A bounded pool of worker threads drains a dedup queue of load requests.
//! One load is in flight per table: callers that race on the same table share
//! a [`LoadHandle`]. The worker fetches the authoritative record from the
//! metastore and commits it through
//! [`Catalog::replace_table_if_unchanged`](crate::catalog::Catalog::replace_table_if_unchanged)
//! with the shell version observed at request time, so a table that was
//! dropped, renamed, or invalidated while loading simply discards the loaded
//! value.
//!
//! Loads are not cancellable: once queued, a load runs to completion and a
//! caller that gives up just stops waiting.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};
use tern_types::TableName;
use tracing::debug;

use crate::catalog::Catalog;
use crate::error::CatalogError;
use crate::metastore::MetastoreClient;
use crate::metrics;
use crate::object::CatalogTable;
use crate::Result;

/// Outcome of a load: the committed table, the current value if the shell
/// changed while loading, or `None` if the table is gone from the registry.
pub type LoadResult = Result<Option<Arc<CatalogTable>>>;

/// Shared completion slot for one in-flight load.
#[derive(Debug, Default)]
pub struct LoadHandle {
    result: Mutex<Option<LoadResult>>,
    done: Condvar,
}

impl LoadHandle {
    /// Block until the load commits or fails.
    pub fn wait(&self) -> LoadResult {
        let mut result = self.result.lock();
        loop {
            if let Some(result) = result.as_ref() {
                return result.clone();
            }
            self.done.wait(&mut result);
        }
    }

    pub fn try_result(&self) -> Option<LoadResult> {
        self.result.lock().clone()
    }

    fn complete(&self, outcome: LoadResult) {
        *self.result.lock() = Some(outcome);
        self.done.notify_all();
    }
}

#[derive(Debug, Clone)]
struct PendingLoad {
    /// Version of the shell when the load was requested; the commit is a
    /// no-op if the live version has moved past it.
    expected_version: u64,
    handle: Arc<LoadHandle>,
}

#[derive(Debug, Default)]
struct LoaderQueue {
    /// Tables awaiting a worker, front first. `prioritize` moves entries to
    /// the front.
    order: VecDeque<TableName>,
    /// Every queued or running load, by table. Entries are removed when the
    /// handle completes.
    inflight: HashMap<TableName, PendingLoad>,
    shutdown: bool,
}

#[derive(Debug)]
struct LoaderShared {
    queue: Mutex<LoaderQueue>,
    work_available: Condvar,
    catalog: Weak<Catalog>,
    metastore: Arc<dyn MetastoreClient>,
}

/// The table loader pool. Owned by the catalog; dropping it stops the
/// workers.
#[derive(Debug)]
pub struct TableLoader {
    shared: Arc<LoaderShared>,
    workers: Vec<JoinHandle<()>>,
}

impl TableLoader {
    pub(crate) fn start(
        catalog: Weak<Catalog>,
        metastore: Arc<dyn MetastoreClient>,
        num_threads: usize,
    ) -> Self {
        let shared = Arc::new(LoaderShared {
            queue: Mutex::new(LoaderQueue::default()),
            work_available: Condvar::new(),
            catalog,
            metastore,
        });
        let workers = (0..num_threads.max(1))
            .map(|i| {
                let shared = Arc::clone(&shared);
                std::thread::Builder::new()
                    .name(format!("table-loader-{i}"))
                    .spawn(move || worker_loop(&shared))
                    .expect("failed to spawn table loader thread")
            })
            .collect();
        Self { shared, workers }
    }

    /// Request a load of `table`, deduplicating against any load already in
    /// flight. Returns the handle callers wait on.
    pub(crate) fn load_async(&self, table: TableName, expected_version: u64) -> Arc<LoadHandle> {
        let mut queue = self.shared.queue.lock();
        if let Some(pending) = queue.inflight.get(&table) {
            return Arc::clone(&pending.handle);
        }
        let handle = Arc::new(LoadHandle::default());
        queue.inflight.insert(
            table.clone(),
            PendingLoad {
                expected_version,
                handle: Arc::clone(&handle),
            },
        );
        queue.order.push_back(table);
        metrics::set_loader_queue_depth(queue.order.len());
        drop(queue);
        self.shared.work_available.notify_one();
        handle
    }

    /// Enqueue at normal priority without waiting for the result.
    pub(crate) fn background_load(&self, table: TableName, expected_version: u64) {
        let _ = self.load_async(table, expected_version);
    }

    /// Move a queued load to the front of the queue.
    pub(crate) fn prioritize(&self, table: &TableName) {
        let mut queue = self.shared.queue.lock();
        if let Some(pos) = queue.order.iter().position(|t| t == table) {
            if let Some(entry) = queue.order.remove(pos) {
                queue.order.push_front(entry);
            }
        }
    }

    pub(crate) fn is_loading(&self, table: &TableName) -> bool {
        self.shared.queue.lock().inflight.contains_key(table)
    }
}

impl Drop for TableLoader {
    fn drop(&mut self) {
        self.shared.queue.lock().shutdown = true;
        self.shared.work_available.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn worker_loop(shared: &LoaderShared) {
    loop {
        let (table, pending) = {
            let mut queue = shared.queue.lock();
            loop {
                if queue.shutdown {
                    return;
                }
                if let Some(table) = queue.order.pop_front() {
                    metrics::set_loader_queue_depth(queue.order.len());
                    if let Some(pending) = queue.inflight.get(&table).cloned() {
                        break (table, pending);
                    }
                    continue;
                }
                shared.work_available.wait(&mut queue);
            }
        };

        let outcome = load_table(shared, &table, pending.expected_version);
        shared.queue.lock().inflight.remove(&table);
        pending.handle.complete(outcome);
    }
}

fn load_table(shared: &LoaderShared, table: &TableName, expected_version: u64) -> LoadResult {
    let Some(catalog) = shared.catalog.upgrade() else {
        return Err(CatalogError::Internal("catalog has shut down".into()));
    };
    debug!(%table, expected_version, "loading table metadata");

    let fetched = shared
        .metastore
        .get_table(&table.db, &table.table)
        .map_err(|e| {
            metrics::record_load("failed");
            CatalogError::LoadFailed {
                table: table.clone(),
                cause: e.to_string(),
            }
        })?;
    let Some(info) = fetched else {
        metrics::record_load("failed");
        return Err(CatalogError::LoadFailed {
            table: table.clone(),
            cause: "table no longer exists in the metastore".into(),
        });
    };

    let committed = catalog.replace_table_if_unchanged(info, expected_version)?;
    match &committed {
        Some(t) if t.is_loaded() && t.version() > expected_version => metrics::record_load("ok"),
        _ => metrics::record_load("discarded"),
    }
    Ok(committed)
}
