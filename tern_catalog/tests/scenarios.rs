//! End-to-end scenarios exercising the catalog, the delta builder, the
//! SYNC_DDL barrier, and the table loader together through the public API.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tern_catalog::metastore::{
    MemMetastore, MetastoreClient, MetastoreResult,
};
use tern_catalog::{
    Catalog, CatalogConfig, CatalogError, TopicMode, UpdateSink, FULL_TOPIC_PREFIX,
};
use tern_types::{
    CatalogPayload, CatalogRecord, ColumnInfo, DatabaseInfo, DdlResult, FunctionInfo, ObjectKey,
    PartitionInfo, TableInfo, TableName,
};
use uuid::Uuid;

#[derive(Debug)]
struct SinkItem {
    topic_key: String,
    record: CatalogRecord,
    deleted: bool,
}

#[derive(Debug, Default)]
struct RecordingSink {
    items: Mutex<Vec<SinkItem>>,
}

impl RecordingSink {
    fn full_topic(&self) -> Vec<(ObjectKey, u64, bool)> {
        self.items
            .lock()
            .iter()
            .filter(|i| i.topic_key.starts_with(FULL_TOPIC_PREFIX))
            .map(|i| (i.record.key(), i.record.version, i.deleted))
            .collect()
    }

    fn clear(&self) {
        self.items.lock().clear();
    }
}

impl UpdateSink for RecordingSink {
    fn publish(&self, topic_key: &str, _version: u64, payload: &[u8], deleted: bool) -> bool {
        self.items.lock().push(SinkItem {
            topic_key: topic_key.to_string(),
            record: serde_json::from_slice(payload).unwrap(),
            deleted,
        });
        true
    }
}

fn test_config() -> CatalogConfig {
    CatalogConfig {
        topic_mode: TopicMode::Full,
        num_loading_threads: 2,
        ..CatalogConfig::default()
    }
}

fn new_catalog(metastore: &Arc<MemMetastore>) -> Arc<Catalog> {
    Catalog::new(
        test_config(),
        Uuid::new_v4(),
        Arc::clone(metastore) as Arc<dyn MetastoreClient>,
        None,
    )
}

#[test]
fn add_then_delta_publishes_the_database_and_advances_the_cursor() {
    let metastore = MemMetastore::new();
    let catalog = new_catalog(&metastore);
    let sink = RecordingSink::default();

    assert_eq!(catalog.current_version(), 0);
    let db = catalog.add_database(DatabaseInfo::new("d"));
    assert_eq!(db.version(), 1);

    let cursor = catalog.get_catalog_delta(&sink, 0);
    assert_eq!(cursor, 1);
    assert_eq!(catalog.last_published_topic(), 1);

    let items = sink.full_topic();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0], (ObjectKey::database("d"), 1, false));
    let (terminal_key, terminal_version, _) = &items[1];
    assert_eq!(terminal_key, &ObjectKey::catalog());
    assert!(*terminal_version >= 1);
}

#[test]
fn concurrent_snapshots_never_see_a_rename_half_applied() {
    let metastore = MemMetastore::new();
    let catalog = new_catalog(&metastore);
    catalog.add_database(DatabaseInfo::new("a"));
    catalog.add_table("a", "t").unwrap();

    let writer = Arc::clone(&catalog);
    let writer_handle = std::thread::spawn(move || {
        for _ in 0..100 {
            writer
                .rename_table(&TableName::new("a", "t"), &TableName::new("a", "u"))
                .unwrap();
            writer
                .rename_table(&TableName::new("a", "u"), &TableName::new("a", "t"))
                .unwrap();
        }
    });

    let reader = Arc::clone(&catalog);
    let reader_handle = std::thread::spawn(move || {
        for _ in 0..500 {
            let db = reader.database("a").unwrap();
            let has_t = db.table("t").is_some();
            let has_u = db.table("u").is_some();
            assert!(
                has_t ^ has_u,
                "snapshot saw rename half-applied: t={has_t} u={has_u}"
            );
        }
    });

    writer_handle.join().unwrap();
    reader_handle.join().unwrap();
}

#[test]
fn delete_then_recreate_publishes_the_new_object_and_no_tombstone() {
    let metastore = MemMetastore::new();
    let catalog = new_catalog(&metastore);
    let sink = RecordingSink::default();

    catalog.add_database(DatabaseInfo::new("a"));
    catalog.add_table("a", "t").unwrap();
    let cursor = catalog.get_catalog_delta(&sink, 0);
    sink.clear();

    catalog.remove_table("a", "t").unwrap();
    let recreated = catalog.add_table("a", "t").unwrap();

    catalog.get_catalog_delta(&sink, cursor);
    let key = ObjectKey::table("a", "t");
    let for_key: Vec<_> = sink
        .full_topic()
        .into_iter()
        .filter(|(k, _, _)| k == &key)
        .collect();
    assert_eq!(for_key.len(), 1, "exactly one record for the re-created key");
    assert_eq!(for_key[0].1, recreated.version());
    assert!(!for_key[0].2, "the tombstone must not be published");
}

#[test]
fn sync_ddl_returns_the_topic_version_that_covers_the_result_set() {
    let metastore = MemMetastore::new();
    let catalog = new_catalog(&metastore);
    let sink = RecordingSink::default();

    catalog.add_database(DatabaseInfo::new("d"));
    let cursor = catalog.get_catalog_delta(&sink, 0);

    // The DDL commits and its caller blocks on the barrier before any topic
    // update has carried the new table.
    let shell = catalog.add_table("d", "t").unwrap();
    let result = DdlResult::new(shell.version()).with_updated(&shell.record());

    let waiter = Arc::clone(&catalog);
    let wait_handle = std::thread::spawn(move || waiter.wait_for_sync_ddl(&result));

    std::thread::sleep(Duration::from_millis(50));
    let covering_topic = catalog.get_catalog_delta(&sink, cursor);

    assert_eq!(wait_handle.join().unwrap().unwrap(), covering_topic);
}

#[test]
fn sync_ddl_covers_removals_too() {
    let metastore = MemMetastore::new();
    let catalog = new_catalog(&metastore);
    let sink = RecordingSink::default();

    catalog.add_database(DatabaseInfo::new("d"));
    catalog.add_table("d", "t").unwrap();
    let cursor = catalog.get_catalog_delta(&sink, 0);

    let tombstone = catalog.remove_table("d", "t").unwrap();
    let mut result = DdlResult::new(tombstone.version);
    result = result.with_removed(&tombstone);

    let waiter = Arc::clone(&catalog);
    let wait_handle = std::thread::spawn(move || waiter.wait_for_sync_ddl(&result));

    std::thread::sleep(Duration::from_millis(50));
    let covering_topic = catalog.get_catalog_delta(&sink, cursor);

    assert_eq!(wait_handle.join().unwrap().unwrap(), covering_topic);
}

#[test]
fn sync_ddl_with_an_empty_result_set_returns_immediately() {
    let metastore = MemMetastore::new();
    let catalog = new_catalog(&metastore);
    let result = DdlResult::new(42);
    assert_eq!(catalog.wait_for_sync_ddl(&result).unwrap(), 42);
}

/// Metastore wrapper whose `get_table` blocks until the test releases it,
/// so a load can be caught mid-flight.
#[derive(Debug)]
struct GatedMetastore {
    inner: Arc<MemMetastore>,
    entered: Mutex<bool>,
    released: Mutex<bool>,
    signal: Condvar,
}

impl GatedMetastore {
    fn new(inner: Arc<MemMetastore>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            entered: Mutex::new(false),
            released: Mutex::new(false),
            signal: Condvar::new(),
        })
    }

    fn wait_until_entered(&self) {
        let mut entered = self.entered.lock();
        while !*entered {
            self.signal.wait(&mut entered);
        }
    }

    fn release(&self) {
        *self.released.lock() = true;
        self.signal.notify_all();
    }
}

impl MetastoreClient for GatedMetastore {
    fn list_databases(&self) -> MetastoreResult<Vec<String>> {
        self.inner.list_databases()
    }

    fn get_database(&self, db: &str) -> MetastoreResult<Option<DatabaseInfo>> {
        self.inner.get_database(db)
    }

    fn list_tables(&self, db: &str) -> MetastoreResult<Vec<String>> {
        self.inner.list_tables(db)
    }

    fn get_table(&self, db: &str, table: &str) -> MetastoreResult<Option<TableInfo>> {
        {
            let mut entered = self.entered.lock();
            *entered = true;
            self.signal.notify_all();
        }
        let mut released = self.released.lock();
        while !*released {
            self.signal.wait(&mut released);
        }
        drop(released);
        self.inner.get_table(db, table)
    }

    fn table_exists(&self, db: &str, table: &str) -> MetastoreResult<bool> {
        // Unlike `get_table`, never gated: invalidation consults this.
        self.inner.table_exists(db, table)
    }

    fn list_functions(&self, db: &str) -> MetastoreResult<Vec<String>> {
        self.inner.list_functions(db)
    }

    fn get_function(&self, db: &str, function: &str) -> MetastoreResult<Option<FunctionInfo>> {
        self.inner.get_function(db, function)
    }

    fn get_partition(
        &self,
        db: &str,
        table: &str,
        spec: &[(String, String)],
    ) -> MetastoreResult<Option<PartitionInfo>> {
        self.inner.get_partition(db, table, spec)
    }
}

#[test]
fn invalidation_during_a_load_discards_the_loaded_value() {
    let inner = MemMetastore::new();
    inner.put_database(DatabaseInfo::new("a"));
    let mut upstream = TableInfo::incomplete(&TableName::new("a", "t"));
    upstream.columns.push(ColumnInfo::new("id", "BIGINT"));
    inner.put_table(upstream);

    let gated = GatedMetastore::new(Arc::clone(&inner));
    let catalog = Catalog::new(
        test_config(),
        Uuid::new_v4(),
        Arc::clone(&gated) as Arc<dyn MetastoreClient>,
        None,
    );
    catalog.add_database(DatabaseInfo::new("a"));
    let shell = catalog.add_table("a", "t").unwrap();
    let shell_version = shell.version();

    // The lazy load parks inside the metastore fetch.
    let loader_catalog = Arc::clone(&catalog);
    let load_handle = std::thread::spawn(move || loader_catalog.get_or_load_table("a", "t"));
    gated.wait_until_entered();

    // A concurrent invalidation swaps in a fresh shell with a newer version.
    let fresh = catalog
        .invalidate_table(&TableName::new("a", "t"))
        .unwrap()
        .unwrap();
    assert!(fresh.version() > shell_version);

    // The load completes, its commit loses the version race, and the caller
    // gets the current still-incomplete shell.
    gated.release();
    let got = load_handle.join().unwrap().unwrap().unwrap();
    assert!(!got.is_loaded());
    assert_eq!(got.version(), fresh.version());

    // The live entry is unchanged and a later load succeeds normally.
    let live = catalog.table("a", "t").unwrap().unwrap();
    assert_eq!(live.version(), fresh.version());
    let reloaded = catalog.get_or_load_table("a", "t").unwrap().unwrap();
    assert!(reloaded.is_loaded());
}

#[test]
fn reset_feeds_the_next_delta_with_fresh_versions_and_tombstones() {
    let metastore = MemMetastore::new();
    metastore.put_database(DatabaseInfo::new("d"));
    metastore.put_table(TableInfo::incomplete(&TableName::new("d", "kept")));

    let catalog = new_catalog(&metastore);
    let sink = RecordingSink::default();
    catalog.add_database(DatabaseInfo::new("d"));
    catalog.add_table("d", "kept").unwrap();
    catalog.add_table("d", "dropped").unwrap();
    let cursor = catalog.get_catalog_delta(&sink, 0);
    sink.clear();

    catalog.reset().unwrap();
    catalog.get_catalog_delta(&sink, cursor);

    let items = sink.full_topic();
    let kept_key = ObjectKey::table("d", "kept");
    let dropped_key = ObjectKey::table("d", "dropped");
    assert!(
        items.iter().any(|(k, _, deleted)| k == &kept_key && !deleted),
        "rebuilt table must be republished"
    );
    assert!(
        items.iter().any(|(k, _, deleted)| k == &dropped_key && *deleted),
        "vanished table must be tombstoned"
    );
    assert!(
        items.iter().any(|(k, _, _)| k == &ObjectKey::database("d")),
        "rebuilt database must be republished"
    );
}

#[test]
fn coordinator_view_converges_after_a_stream_of_ddl() {
    let metastore = MemMetastore::new();
    let catalog = new_catalog(&metastore);
    let sink = RecordingSink::default();

    catalog.add_database(DatabaseInfo::new("sales"));
    catalog.add_table("sales", "orders").unwrap();
    catalog.add_function(FunctionInfo::new("sales", "total")).unwrap();
    let mut cursor = catalog.get_catalog_delta(&sink, 0);

    catalog.remove_function("sales", "total").unwrap();
    catalog
        .rename_table(&TableName::new("sales", "orders"), &TableName::new("sales", "orders_v2"))
        .unwrap();
    cursor = catalog.get_catalog_delta(&sink, cursor);
    assert_eq!(cursor, catalog.current_version());

    // Replay the full stream the way a coordinator would and check the final
    // view.
    let mut live: std::collections::BTreeMap<ObjectKey, u64> = std::collections::BTreeMap::new();
    for (key, version, deleted) in sink.full_topic() {
        if deleted {
            live.remove(&key);
        } else {
            live.insert(key, version);
        }
    }
    assert!(live.contains_key(&ObjectKey::database("sales")));
    assert!(live.contains_key(&ObjectKey::table("sales", "orders_v2")));
    assert!(!live.contains_key(&ObjectKey::table("sales", "orders")));
    assert!(!live.contains_key(&ObjectKey::function("sales", "total")));

    // Terminal records carried each cursor; the last one matches.
    let catalog_records: Vec<u64> = sink
        .items
        .lock()
        .iter()
        .filter(|i| matches!(i.record.payload, CatalogPayload::Catalog(_)))
        .map(|i| i.record.version)
        .collect();
    assert_eq!(catalog_records.last().copied().unwrap(), cursor);
}

#[test]
fn partial_fetch_times_out_when_the_gate_is_saturated() {
    let metastore = MemMetastore::new();
    let config = CatalogConfig {
        topic_mode: TopicMode::Full,
        num_loading_threads: 1,
        max_parallel_partial_fetch: 1,
        partial_fetch_queue_timeout: Duration::from_millis(50),
        ..CatalogConfig::default()
    };
    let gated = GatedMetastore::new(Arc::clone(&metastore));
    {
        metastore.put_database(DatabaseInfo::new("d"));
        metastore.put_table(TableInfo::incomplete(&TableName::new("d", "t")));
    }
    let catalog = Catalog::new(
        config,
        Uuid::new_v4(),
        Arc::clone(&gated) as Arc<dyn MetastoreClient>,
        None,
    );
    catalog.add_database(DatabaseInfo::new("d"));
    catalog.add_table("d", "t").unwrap();

    // The first fetch holds the only permit while its table load is parked
    // in the metastore.
    let fetch_catalog = Arc::clone(&catalog);
    let first = std::thread::spawn(move || {
        fetch_catalog.get_partial_object(&tern_catalog::PartialObjectRequest::Table {
            name: TableName::new("d", "t"),
        })
    });
    gated.wait_until_entered();

    let err = catalog
        .get_partial_object(&tern_catalog::PartialObjectRequest::CatalogInfo)
        .unwrap_err();
    assert!(matches!(err, CatalogError::PartialFetchQueueTimeout));

    gated.release();
    first.join().unwrap().unwrap();
}
