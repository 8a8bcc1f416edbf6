//! The authoritative catalog: a versioned registry of schema objects guarded
//! by one fair reader/writer lock.
//!
//! Every mutation acquires the write side of the version lock, takes the next
//! global version, and applies its registry change in the same critical
//! section, so versions and registry contents are always atomically
//! consistent. Bulk readers (the delta builder, snapshot accessors) take the
//! read side and copy out `Arc`s; light objects are replaced copy-on-write so
//! a snapshot is immutable once taken.
//!
//! Tables are the heavy kind. They are created as incomplete shells and
//! materialized by the [`TableLoader`]; the only commit path for a load is
//! [`Catalog::replace_table_if_unchanged`]. Code that needs a table's own
//! lock together with the version lock must go through
//! [`Catalog::try_lock_table`], which acquires the version write lock first
//! and the table lock second. No code path acquires them in the other order.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::{ReentrantMutexGuard, RwLock, RwLockWriteGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use tern_types::{
    CatalogRecord, DatabaseInfo, FunctionInfo, PartitionInfo, PrincipalInfo, PrivilegeInfo,
    TableInfo, TableName, INITIAL_CATALOG_VERSION,
};

use crate::config::CatalogConfig;
use crate::delete_log::{DeleteLog, Tombstone};
use crate::error::CatalogError;
use crate::gate::FetchGate;
use crate::loader::TableLoader;
use crate::metastore::{HdfsClient, MetastoreClient};
use crate::object::{
    CachePool, CatalogFunction, CatalogTable, DataSource, Database, Principal, Privilege,
};
use crate::pool_reader::CachePoolReader;
use crate::topic_log::TopicUpdateLog;
use crate::Result;

/// Registry contents and the version counter, all guarded together by the
/// catalog's version lock.
#[derive(Debug)]
pub(crate) struct CatalogState {
    pub(crate) version: u64,
    pub(crate) databases: BTreeMap<Arc<str>, Arc<Database>>,
    pub(crate) data_sources: BTreeMap<Arc<str>, Arc<DataSource>>,
    pub(crate) cache_pools: BTreeMap<Arc<str>, Arc<CachePool>>,
    pub(crate) principals: BTreeMap<Arc<str>, Arc<Principal>>,
    pub(crate) delete_log: DeleteLog,
}

impl CatalogState {
    fn new() -> Self {
        Self {
            version: INITIAL_CATALOG_VERSION,
            databases: BTreeMap::new(),
            data_sources: BTreeMap::new(),
            cache_pools: BTreeMap::new(),
            principals: BTreeMap::new(),
            delete_log: DeleteLog::default(),
        }
    }

    pub(crate) fn next_version(&mut self) -> u64 {
        self.version += 1;
        self.version
    }

    fn update_database(&mut self, db: Database) -> Arc<Database> {
        let name = Arc::clone(db.name());
        let db = Arc::new(db);
        self.databases.insert(name, Arc::clone(&db));
        db
    }

    /// Tombstone a database and everything it owns: tables first, then
    /// functions, then the database itself, each with its own version.
    fn tombstone_database(&mut self, db: &Database) -> Vec<CatalogRecord> {
        let mut removed = Vec::new();
        for table in db.tables() {
            let version = self.next_version();
            table.set_version(version);
            let tombstone = table.tombstone(version);
            self.delete_log.add(tombstone.clone());
            removed.push(tombstone);
        }
        for function in db.functions() {
            let version = self.next_version();
            let tombstone = function.tombstone(version);
            self.delete_log.add(tombstone.clone());
            removed.push(tombstone);
        }
        let version = self.next_version();
        let tombstone = db.tombstone(version);
        self.delete_log.add(tombstone.clone());
        removed.push(tombstone);
        removed
    }
}

/// Both locks of one table, acquired version-lock first.
///
/// [`release_version_lock`](Self::release_version_lock) lets slow operations
/// (metastore fetches) keep the table lock while writers proceed.
#[derive(Debug)]
pub struct TableLock<'a> {
    state: Option<RwLockWriteGuard<'a, CatalogState>>,
    _table: ReentrantMutexGuard<'a, ()>,
}

impl TableLock<'_> {
    /// Take the next global version. Panics if the version lock was already
    /// released.
    pub fn next_version(&mut self) -> u64 {
        self.state
            .as_mut()
            .expect("version lock already released")
            .next_version()
    }

    pub fn release_version_lock(&mut self) {
        self.state = None;
    }
}

/// A request against the read-only partial object API.
#[derive(Debug, Clone)]
pub enum PartialObjectRequest {
    CatalogInfo,
    Database { name: String },
    Table { name: TableName },
    Function { db: String, name: String },
}

#[derive(Debug, Clone)]
pub enum PartialObjectResponse {
    CatalogInfo {
        service_id: Uuid,
        version: u64,
        database_names: Vec<String>,
    },
    Database {
        record: CatalogRecord,
        table_names: Vec<String>,
        function_names: Vec<String>,
    },
    Table {
        record: CatalogRecord,
    },
    Function {
        record: CatalogRecord,
    },
}

#[derive(Debug)]
pub struct Catalog {
    pub(crate) service_id: Uuid,
    pub(crate) config: CatalogConfig,
    pub(crate) state: RwLock<CatalogState>,
    pub(crate) topic_log: TopicUpdateLog,
    fetch_gate: FetchGate,
    metastore: Arc<dyn MetastoreClient>,
    hdfs: Option<Arc<dyn HdfsClient>>,
    loader: TableLoader,
    #[allow(dead_code)] // held for its background thread
    pool_reader: Option<CachePoolReader>,
}

impl Catalog {
    /// Build a catalog and start its background machinery (loader pool and,
    /// when an HDFS client is supplied, the cache pool poller).
    pub fn new(
        config: CatalogConfig,
        service_id: Uuid,
        metastore: Arc<dyn MetastoreClient>,
        hdfs: Option<Arc<dyn HdfsClient>>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|catalog| Self {
            service_id,
            state: RwLock::new(CatalogState::new()),
            topic_log: TopicUpdateLog::new(config.topic_update_log_retention),
            fetch_gate: FetchGate::new(config.max_parallel_partial_fetch),
            loader: TableLoader::start(
                Weak::clone(catalog),
                Arc::clone(&metastore),
                config.num_loading_threads,
            ),
            pool_reader: hdfs
                .as_ref()
                .map(|_| CachePoolReader::start(Weak::clone(catalog), config.cache_pool_poll_interval)),
            metastore,
            hdfs,
            config,
        })
    }

    pub fn service_id(&self) -> Uuid {
        self.service_id
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    /// Current value of the global version counter.
    pub fn current_version(&self) -> u64 {
        self.state.read().version
    }

    /// Bump the global version counter and return the new value.
    pub fn increment_version(&self) -> u64 {
        self.state.write().next_version()
    }

    /// Version of the last published topic update; 0 until the first one.
    pub fn last_published_topic(&self) -> u64 {
        self.topic_log.last_published()
    }

    pub fn partial_fetch_queue_len(&self) -> usize {
        self.fetch_gate.queue_len()
    }

    pub(crate) fn loader(&self) -> &TableLoader {
        &self.loader
    }

    // ---------------------------------------------------------------------
    // Snapshots (version read lock)
    // ---------------------------------------------------------------------

    pub fn database(&self, name: &str) -> Option<Arc<Database>> {
        self.state.read().databases.get(name).cloned()
    }

    pub fn all_databases(&self) -> Vec<Arc<Database>> {
        self.state.read().databases.values().cloned().collect()
    }

    pub fn database_names(&self) -> Vec<String> {
        self.state.read().databases.keys().map(|n| n.to_string()).collect()
    }

    /// The live table entry, loaded or not. Errors if the database does not
    /// exist.
    pub fn table(&self, db: &str, table: &str) -> Result<Option<Arc<CatalogTable>>> {
        let state = self.state.read();
        let db = state
            .databases
            .get(db)
            .ok_or_else(|| CatalogError::DatabaseNotFound(Arc::from(db)))?;
        Ok(db.tables.get(table).cloned())
    }

    pub fn all_data_sources(&self) -> Vec<Arc<DataSource>> {
        self.state.read().data_sources.values().cloned().collect()
    }

    pub fn data_source(&self, name: &str) -> Option<Arc<DataSource>> {
        self.state.read().data_sources.get(name).cloned()
    }

    pub fn all_cache_pools(&self) -> Vec<Arc<CachePool>> {
        self.state.read().cache_pools.values().cloned().collect()
    }

    pub fn all_principals(&self) -> Vec<Arc<Principal>> {
        self.state.read().principals.values().cloned().collect()
    }

    pub fn principal(&self, name: &str) -> Option<Arc<Principal>> {
        self.state.read().principals.get(name).cloned()
    }

    pub(crate) fn deleted_objects(&self, from_version: u64, to_version: u64) -> Vec<Tombstone> {
        self.state.read().delete_log.retrieve(from_version, to_version)
    }

    // ---------------------------------------------------------------------
    // Registry mutations (version write lock)
    // ---------------------------------------------------------------------

    /// Add (or replace) a database. Returns the new entry.
    pub fn add_database(&self, info: DatabaseInfo) -> Arc<Database> {
        let mut state = self.state.write();
        let version = state.next_version();
        let db = state.update_database(Database::new(info, version));
        debug!(db = %db.name(), version, "added database");
        db
    }

    /// Remove a database, tombstoning it and everything it owns in one
    /// critical section. Returns the tombstones, children first.
    pub fn remove_database(&self, name: &str) -> Option<Vec<CatalogRecord>> {
        let mut state = self.state.write();
        let db = state.databases.remove(name)?;
        let removed = state.tombstone_database(&db);
        info!(db = name, objects = removed.len(), "removed database");
        Some(removed)
    }

    /// Add an incomplete shell for a table. Returns the shell; its metadata
    /// loads on first access or via the background loader.
    pub fn add_table(&self, db: &str, table: &str) -> Result<Arc<CatalogTable>> {
        let mut state = self.state.write();
        let db_arc = state
            .databases
            .get(db)
            .cloned()
            .ok_or_else(|| CatalogError::DatabaseNotFound(Arc::from(db)))?;
        let version = state.next_version();
        let shell = CatalogTable::new_incomplete(TableName::new(db, table), version);
        let mut new_db = Database::clone(&db_arc);
        new_db
            .tables
            .insert(Arc::clone(&shell.name().table), Arc::clone(&shell));
        state.update_database(new_db);
        debug!(table = %shell.name(), version, "added table");
        Ok(shell)
    }

    /// Remove a table, appending its tombstone to the delete log. Returns the
    /// tombstone, or `None` if the database or table does not exist.
    pub fn remove_table(&self, db: &str, table: &str) -> Option<CatalogRecord> {
        let mut state = self.state.write();
        let db_arc = state.databases.get(db).cloned()?;
        let mut new_db = Database::clone(&db_arc);
        let removed = new_db.tables.remove(table)?;
        let version = state.next_version();
        removed.set_version(version);
        let tombstone = removed.tombstone(version);
        state.delete_log.add(tombstone.clone());
        state.update_database(new_db);
        debug!(table = %removed.name(), version, "removed table");
        Some(tombstone)
    }

    /// Atomic remove + add: the old entry is tombstoned and a fresh shell is
    /// created under the new name, with successive versions, in one critical
    /// section. Both databases are validated up front so a failed rename
    /// leaves the registry untouched.
    pub fn rename_table(
        &self,
        old: &TableName,
        new: &TableName,
    ) -> Result<(CatalogRecord, Arc<CatalogTable>)> {
        let mut state = self.state.write();
        let old_db = state
            .databases
            .get(&*old.db)
            .cloned()
            .ok_or_else(|| CatalogError::DatabaseNotFound(Arc::clone(&old.db)))?;
        if !state.databases.contains_key(&*new.db) {
            return Err(CatalogError::DatabaseNotFound(Arc::clone(&new.db)));
        }

        let mut old_db_updated = Database::clone(&old_db);
        let removed = old_db_updated
            .tables
            .remove(&*old.table)
            .ok_or_else(|| CatalogError::TableNotFound(old.clone()))?;
        let removal_version = state.next_version();
        removed.set_version(removal_version);
        let tombstone = removed.tombstone(removal_version);
        state.delete_log.add(tombstone.clone());

        let shell_version = state.next_version();
        let shell = CatalogTable::new_incomplete(new.clone(), shell_version);
        if old.db == new.db {
            old_db_updated
                .tables
                .insert(Arc::clone(&new.table), Arc::clone(&shell));
            state.update_database(old_db_updated);
        } else {
            state.update_database(old_db_updated);
            let new_db = state
                .databases
                .get(&*new.db)
                .cloned()
                .expect("destination database checked above");
            let mut new_db_updated = Database::clone(&new_db);
            new_db_updated
                .tables
                .insert(Arc::clone(&new.table), Arc::clone(&shell));
            state.update_database(new_db_updated);
        }
        info!(%old, %new, removal_version, shell_version, "renamed table");
        Ok((tombstone, shell))
    }

    pub fn add_function(&self, info: FunctionInfo) -> Result<Arc<CatalogFunction>> {
        let mut state = self.state.write();
        let db_arc = state
            .databases
            .get(&*info.db_name)
            .cloned()
            .ok_or_else(|| CatalogError::DatabaseNotFound(Arc::clone(&info.db_name)))?;
        let version = state.next_version();
        let name = Arc::clone(&info.name);
        let function = CatalogFunction::new(info, version);
        let mut new_db = Database::clone(&db_arc);
        new_db.functions.insert(name, Arc::clone(&function));
        state.update_database(new_db);
        Ok(function)
    }

    pub fn remove_function(&self, db: &str, name: &str) -> Option<CatalogRecord> {
        let mut state = self.state.write();
        let db_arc = state.databases.get(db).cloned()?;
        let mut new_db = Database::clone(&db_arc);
        let removed = new_db.functions.remove(name)?;
        let version = state.next_version();
        let tombstone = removed.tombstone(version);
        state.delete_log.add(tombstone.clone());
        state.update_database(new_db);
        Some(tombstone)
    }

    pub fn add_data_source(&self, info: tern_types::DataSourceInfo) -> Arc<DataSource> {
        let mut state = self.state.write();
        let version = state.next_version();
        let name = Arc::clone(&info.name);
        let source = DataSource::new(info, version);
        state.data_sources.insert(name, Arc::clone(&source));
        source
    }

    pub fn remove_data_source(&self, name: &str) -> Option<CatalogRecord> {
        let mut state = self.state.write();
        let removed = state.data_sources.remove(name)?;
        let version = state.next_version();
        let tombstone = removed.tombstone(version);
        state.delete_log.add(tombstone.clone());
        Some(tombstone)
    }

    pub fn add_principal(&self, info: PrincipalInfo) -> Arc<Principal> {
        let mut state = self.state.write();
        let version = state.next_version();
        let name = Arc::clone(&info.name);
        let principal = Arc::new(Principal::new(info, version));
        state.principals.insert(name, Arc::clone(&principal));
        principal
    }

    /// Remove a principal, tombstoning its privileges first.
    pub fn remove_principal(&self, name: &str) -> Option<Vec<CatalogRecord>> {
        let mut state = self.state.write();
        let principal = state.principals.remove(name)?;
        let mut removed = Vec::new();
        for privilege in principal.privileges() {
            let version = state.next_version();
            let tombstone = privilege.tombstone(version);
            state.delete_log.add(tombstone.clone());
            removed.push(tombstone);
        }
        let version = state.next_version();
        let tombstone = principal.tombstone(version);
        state.delete_log.add(tombstone.clone());
        removed.push(tombstone);
        Some(removed)
    }

    pub fn grant_privilege(&self, principal: &str, info: PrivilegeInfo) -> Result<Arc<Privilege>> {
        let mut state = self.state.write();
        let existing = state
            .principals
            .get(principal)
            .cloned()
            .ok_or_else(|| CatalogError::PrincipalNotFound(Arc::from(principal)))?;
        let version = state.next_version();
        let name = Arc::clone(&info.privilege_name);
        let privilege = Privilege::new(info, version);
        let mut updated = Principal::clone(&existing);
        updated.privileges.insert(name, Arc::clone(&privilege));
        state
            .principals
            .insert(Arc::clone(updated.name()), Arc::new(updated));
        Ok(privilege)
    }

    pub fn revoke_privilege(&self, principal: &str, privilege: &str) -> Result<Option<CatalogRecord>> {
        let mut state = self.state.write();
        let existing = state
            .principals
            .get(principal)
            .cloned()
            .ok_or_else(|| CatalogError::PrincipalNotFound(Arc::from(principal)))?;
        let mut updated = Principal::clone(&existing);
        let Some(removed) = updated.privileges.remove(privilege) else {
            return Ok(None);
        };
        let version = state.next_version();
        let tombstone = removed.tombstone(version);
        state.delete_log.add(tombstone.clone());
        state
            .principals
            .insert(Arc::clone(updated.name()), Arc::new(updated));
        Ok(Some(tombstone))
    }

    // ---------------------------------------------------------------------
    // Table locking and load commits
    // ---------------------------------------------------------------------

    /// Acquire the version write lock and `table`'s lock, in that order.
    ///
    /// The table lock is only tried, never waited on, while the version lock
    /// is held; on contention both are dropped and the attempt repeats after
    /// a short sleep, up to the configured deadline.
    pub fn try_lock_table<'a>(&'a self, table: &'a CatalogTable) -> Result<TableLock<'a>> {
        let begin = Instant::now();
        loop {
            let state = self.state.write();
            if let Some(table_guard) = table.lock().try_lock() {
                return Ok(TableLock {
                    state: Some(state),
                    _table: table_guard,
                });
            }
            drop(state);
            if begin.elapsed() >= self.config.table_lock_timeout {
                return Err(CatalogError::LockTimeout {
                    table: table.name().clone(),
                    timeout: self.config.table_lock_timeout,
                });
            }
            std::thread::sleep(self.config.table_lock_retry);
        }
    }

    /// Install a loaded table if the live entry still has
    /// `expected_version`; otherwise return the live entry unmodified. The
    /// sole commit path for background and lazy loads.
    pub fn replace_table_if_unchanged(
        &self,
        loaded: TableInfo,
        expected_version: u64,
    ) -> Result<Option<Arc<CatalogTable>>> {
        let name = loaded.name();
        let mut state = self.state.write();
        let db_arc = state
            .databases
            .get(&*name.db)
            .cloned()
            .ok_or_else(|| CatalogError::DatabaseNotFound(Arc::clone(&name.db)))?;
        let Some(existing) = db_arc.tables.get(&*name.table) else {
            return Ok(None);
        };
        if existing.version() != expected_version {
            return Ok(Some(Arc::clone(existing)));
        }
        let version = state.next_version();
        let table = CatalogTable::new_loaded(loaded, version);
        let mut new_db = Database::clone(&db_arc);
        new_db
            .tables
            .insert(Arc::clone(&name.table), Arc::clone(&table));
        state.update_database(new_db);
        debug!(table = %name, version, "committed loaded table");
        Ok(Some(table))
    }

    /// The live table, materializing it through the loader if it is still an
    /// incomplete shell. The load is awaited outside the version lock. If the
    /// table changed while loading, the current live value is returned, which
    /// may still be incomplete.
    pub fn get_or_load_table(&self, db: &str, table: &str) -> Result<Option<Arc<CatalogTable>>> {
        let handle = {
            let state = self.state.read();
            let db_arc = state
                .databases
                .get(db)
                .ok_or_else(|| CatalogError::DatabaseNotFound(Arc::from(db)))?;
            let Some(entry) = db_arc.tables.get(table) else {
                return Ok(None);
            };
            if entry.is_loaded() {
                return Ok(Some(Arc::clone(entry)));
            }
            self.loader.load_async(entry.name().clone(), entry.version())
        };
        handle.wait()
    }

    /// Front-load the named tables in the loader queue, submitting loads for
    /// any that are not already in flight.
    pub fn prioritize_load(&self, tables: &[TableName]) -> Result<()> {
        for name in tables {
            let Some(entry) = self.table(&name.db, &name.table)? else {
                continue;
            };
            if entry.is_loaded() {
                continue;
            }
            self.loader.load_async(name.clone(), entry.version());
            self.loader.prioritize(name);
        }
        Ok(())
    }

    /// In-place refresh of a loaded table from the metastore.
    ///
    /// Takes both locks, assigns the new version, then releases the version
    /// lock before the (slow) upstream fetch while keeping the table lock. On
    /// upstream failure the old payload stays in place.
    pub fn reload_table(&self, db: &str, table: &str) -> Result<CatalogRecord> {
        let name = TableName::new(db, table);
        let entry = self
            .table(db, table)?
            .ok_or_else(|| CatalogError::TableNotFound(name.clone()))?;
        if !entry.is_loaded() {
            return Err(CatalogError::AlreadyLoading(name));
        }
        let observed = entry.version();
        let mut lock = self.try_lock_table(&entry)?;
        if entry.version() != observed {
            return Err(CatalogError::Conflict {
                table: name,
                expected: observed,
                found: entry.version(),
            });
        }
        let version = lock.next_version();
        lock.release_version_lock();

        info!(table = %name, version, "refreshing table metadata");
        let fetched = self
            .metastore
            .get_table(db, table)
            .map_err(|e| CatalogError::LoadFailed {
                table: name.clone(),
                cause: e.to_string(),
            })?
            .ok_or_else(|| CatalogError::TableNotFound(name.clone()))?;
        entry.install(fetched, version);
        Ok(entry.record())
    }

    /// Refresh one partition of a loaded table from the metastore. A
    /// partition missing upstream is dropped from the table.
    pub fn reload_partition(
        &self,
        db: &str,
        table: &str,
        spec: &[(String, String)],
    ) -> Result<CatalogRecord> {
        let name = TableName::new(db, table);
        let entry = self
            .table(db, table)?
            .ok_or_else(|| CatalogError::TableNotFound(name.clone()))?;
        if !entry.is_loaded() {
            return Err(CatalogError::AlreadyLoading(name));
        }
        let mut lock = self.try_lock_table(&entry)?;
        let version = lock.next_version();
        lock.release_version_lock();

        let partition_name = crate::metastore::partition_name(spec);
        info!(table = %name, partition = %partition_name, "refreshing partition metadata");
        let fetched: Option<PartitionInfo> = self
            .metastore
            .get_partition(db, table, spec)
            .map_err(|e| CatalogError::LoadFailed {
                table: name.clone(),
                cause: e.to_string(),
            })?;
        entry.update_partition(&partition_name, fetched, version);
        Ok(entry.record())
    }

    // ---------------------------------------------------------------------
    // Invalidation
    // ---------------------------------------------------------------------

    /// Invalidate one table against the metastore: replace it with a fresh
    /// shell if it still exists upstream (adding the database shell if the
    /// database is new), or remove and tombstone it if it does not. Returns
    /// the new shell, or `None` when the table was removed.
    pub fn invalidate_table(&self, name: &TableName) -> Result<Option<Arc<CatalogTable>>> {
        let exists = self
            .metastore
            .table_exists(&name.db, &name.table)
            .map_err(|e| CatalogError::Upstream(e.to_string()))?;
        if !exists {
            if self.remove_table(&name.db, &name.table).is_some() {
                info!(table = %name, "invalidated table dropped; no longer in metastore");
            }
            return Ok(None);
        }

        // Fetched before taking the version lock; only needed when the
        // database is not cached locally.
        let upstream_db = if self.database(&name.db).is_none() {
            Some(
                self.metastore
                    .get_database(&name.db)
                    .map_err(|e| CatalogError::Upstream(e.to_string()))?
                    .ok_or_else(|| CatalogError::DatabaseNotFound(Arc::clone(&name.db)))?,
            )
        } else {
            None
        };

        let shell = {
            let mut state = self.state.write();
            let db_arc = match state.databases.get(&*name.db) {
                Some(db) => Arc::clone(db),
                None => {
                    let info = upstream_db
                        .ok_or_else(|| CatalogError::DatabaseNotFound(Arc::clone(&name.db)))?;
                    let version = state.next_version();
                    state.update_database(Database::new(info, version))
                }
            };
            let version = state.next_version();
            let shell = CatalogTable::new_incomplete(name.clone(), version);
            let mut new_db = Database::clone(&db_arc);
            new_db
                .tables
                .insert(Arc::clone(&name.table), Arc::clone(&shell));
            state.update_database(new_db);
            shell
        };
        info!(table = %name, version = shell.version(), "invalidated table");
        if self.config.load_in_background {
            self.loader.background_load(name.clone(), shell.version());
        }
        Ok(Some(shell))
    }

    /// Invalidate all metadata: rebuild every database from the metastore,
    /// tombstone what disappeared, and resubmit shells for background load.
    ///
    /// A metastore failure for a single database logs a warning and keeps
    /// that database's previous cached state; other databases still reload.
    /// Returns the catalog version observed before the reset took effect.
    pub fn reset(&self) -> Result<u64> {
        let before = self.current_version();
        info!(version = before, "invalidating all catalog metadata");

        // Refresh cache pools first, assigning new versions to survivors so
        // they ride the next topic update.
        if let Err(e) = self.poll_cache_pools(true) {
            warn!(error = %e, "cache pool refresh failed during invalidation");
        }

        let db_names = self
            .metastore
            .list_databases()
            .map_err(|e| CatalogError::Upstream(e.to_string()))?;

        let mut background = Vec::new();
        {
            let mut state = self.state.write();
            // The reset itself must move the version forward even if the new
            // catalog turns out empty.
            state.next_version();

            // New versions for the loaded data sources.
            let source_names: Vec<Arc<str>> = state.data_sources.keys().cloned().collect();
            for source in source_names {
                if let Some(existing) = state.data_sources.get(&*source).cloned() {
                    let version = state.next_version();
                    state
                        .data_sources
                        .insert(source, DataSource::new(existing.info.clone(), version));
                }
            }

            let old = std::mem::take(&mut state.databases);
            for db_name in db_names {
                let existing = old.get(db_name.as_str()).cloned();
                match self.rebuild_database(&mut state, &db_name, existing.as_ref()) {
                    Ok(tables) => background.extend(tables),
                    Err(e) => {
                        warn!(db = %db_name, error = %e, "skipping database during invalidation");
                        if let Some(previous) = existing {
                            state
                                .databases
                                .insert(Arc::clone(previous.name()), previous);
                        }
                    }
                }
            }

            // Databases that were neither rebuilt nor carried over vanished
            // upstream.
            for (db_name, db) in &old {
                if !state.databases.contains_key(db_name.as_ref()) {
                    state.tombstone_database(db);
                }
            }
        }

        if self.config.load_in_background {
            for (name, version) in background {
                self.loader.background_load(name, version);
            }
        }
        info!("invalidated all catalog metadata");
        Ok(before)
    }

    /// Rebuild one database from the metastore: fresh versions for the
    /// database, its functions, and shells for its tables; tombstones for
    /// anything the previous cached state had that upstream no longer does.
    fn rebuild_database(
        &self,
        state: &mut CatalogState,
        db_name: &str,
        existing: Option<&Arc<Database>>,
    ) -> Result<Vec<(TableName, u64)>> {
        let info = self
            .metastore
            .get_database(db_name)
            .map_err(|e| CatalogError::Upstream(e.to_string()))?
            .ok_or_else(|| CatalogError::DatabaseNotFound(Arc::from(db_name)))?;
        let version = state.next_version();
        let mut db = Database::new(info, version);

        for function_name in self
            .metastore
            .list_functions(db_name)
            .map_err(|e| CatalogError::Upstream(e.to_string()))?
        {
            if let Some(function) = self
                .metastore
                .get_function(db_name, &function_name)
                .map_err(|e| CatalogError::Upstream(e.to_string()))?
            {
                let version = state.next_version();
                let name = Arc::clone(&function.name);
                db.functions.insert(name, CatalogFunction::new(function, version));
            }
        }

        let mut to_load = Vec::new();
        for table_name in self
            .metastore
            .list_tables(db_name)
            .map_err(|e| CatalogError::Upstream(e.to_string()))?
        {
            let version = state.next_version();
            let name = TableName::new(db_name, table_name.as_str());
            db.tables.insert(
                Arc::clone(&name.table),
                CatalogTable::new_incomplete(name.clone(), version),
            );
            to_load.push((name, version));
        }

        if let Some(previous) = existing {
            for function in previous.functions() {
                if !db.functions.contains_key(function.name().as_ref()) {
                    let version = state.next_version();
                    state.delete_log.add(function.tombstone(version));
                }
            }
            for table in previous.tables() {
                if !db.tables.contains_key(table.name().table.as_ref()) {
                    let version = state.next_version();
                    table.set_version(version);
                    state.delete_log.add(table.tombstone(version));
                }
            }
        }

        state.update_database(db);
        Ok(to_load)
    }

    /// Diff the HDFS cache pool listing into the registry: new pools are
    /// added, dropped pools are tombstoned, and surviving pools get fresh
    /// versions when `refresh_surviving` is set (the invalidation path).
    ///
    /// A no-op when the catalog has no HDFS client.
    pub fn poll_cache_pools(&self, refresh_surviving: bool) -> Result<()> {
        let Some(hdfs) = &self.hdfs else {
            return Ok(());
        };
        let listed = hdfs
            .list_cache_pools()
            .map_err(|e| CatalogError::Upstream(e.to_string()))?;

        let mut state = self.state.write();
        for info in &listed {
            if !state.cache_pools.contains_key(&*info.pool_name) {
                let version = state.next_version();
                debug!(pool = %info.pool_name, version, "discovered cache pool");
                state
                    .cache_pools
                    .insert(Arc::clone(&info.pool_name), CachePool::new(info.clone(), version));
            } else if refresh_surviving {
                if let Some(existing) = state.cache_pools.get(&*info.pool_name).cloned() {
                    let version = state.next_version();
                    state.cache_pools.insert(
                        Arc::clone(&info.pool_name),
                        CachePool::new(existing.info.clone(), version),
                    );
                }
            }
        }
        let listed_names: std::collections::BTreeSet<&str> =
            listed.iter().map(|p| p.pool_name.as_ref()).collect();
        let dropped: Vec<Arc<str>> = state
            .cache_pools
            .keys()
            .filter(|name| !listed_names.contains(name.as_ref()))
            .cloned()
            .collect();
        for name in dropped {
            if let Some(pool) = state.cache_pools.remove(&*name) {
                let version = state.next_version();
                debug!(pool = %name, version, "cache pool dropped");
                state.delete_log.add(pool.tombstone(version));
            }
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Partial object reads
    // ---------------------------------------------------------------------

    /// Read-only partial view of one catalog object, bounded by the fetch
    /// gate.
    pub fn get_partial_object(&self, request: &PartialObjectRequest) -> Result<PartialObjectResponse> {
        let _permit = self
            .fetch_gate
            .try_acquire(self.config.partial_fetch_queue_timeout)?;
        match request {
            PartialObjectRequest::CatalogInfo => {
                let state = self.state.read();
                Ok(PartialObjectResponse::CatalogInfo {
                    service_id: self.service_id,
                    version: state.version,
                    database_names: state.databases.keys().map(|n| n.to_string()).collect(),
                })
            }
            PartialObjectRequest::Database { name } => {
                let db = self
                    .database(name)
                    .ok_or_else(|| CatalogError::DatabaseNotFound(Arc::from(name.as_str())))?;
                Ok(PartialObjectResponse::Database {
                    record: db.record(),
                    table_names: db.table_names().map(|n| n.to_string()).collect(),
                    function_names: db.functions().map(|f| f.name().to_string()).collect(),
                })
            }
            PartialObjectRequest::Table { name } => {
                let table = self
                    .get_or_load_table(&name.db, &name.table)?
                    .ok_or_else(|| CatalogError::TableNotFound(name.clone()))?;
                if !table.is_loaded() {
                    // A concurrent invalidation left a fresh shell behind.
                    return Err(CatalogError::AlreadyLoading(name.clone()));
                }
                let _guard = table.lock().lock();
                Ok(PartialObjectResponse::Table {
                    record: table.record(),
                })
            }
            PartialObjectRequest::Function { db, name } => {
                let database = self
                    .database(db)
                    .ok_or_else(|| CatalogError::DatabaseNotFound(Arc::from(db.as_str())))?;
                let function = database.function(name).ok_or_else(|| {
                    CatalogError::FunctionNotFound {
                        db: Arc::from(db.as_str()),
                        name: Arc::from(name.as_str()),
                    }
                })?;
                Ok(PartialObjectResponse::Function {
                    record: function.record(),
                })
            }
        }
    }
}
