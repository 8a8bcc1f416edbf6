//! Runtime representations of registry objects.
//!
//! Light objects (databases, functions, data sources, cache pools,
//! principals, privileges) are immutable snapshots replaced copy-on-write
//! under the version write lock. Tables are the heavy kind: they carry their
//! own reentrant lock and an atomic version so the delta builder can re-read
//! the version without the registry lock.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{ReentrantMutex, RwLock};
use tern_types::{
    CachePoolInfo, CatalogPayload, CatalogRecord, DataSourceInfo, DatabaseInfo, FunctionInfo,
    ObjectKey, PartitionInfo, PrincipalInfo, PrivilegeInfo, TableInfo, TableName,
};

/// A database and the tables/functions it owns.
#[derive(Debug, Clone)]
pub struct Database {
    pub(crate) info: DatabaseInfo,
    pub(crate) version: u64,
    pub(crate) tables: BTreeMap<Arc<str>, Arc<CatalogTable>>,
    pub(crate) functions: BTreeMap<Arc<str>, Arc<CatalogFunction>>,
}

impl Database {
    pub(crate) fn new(info: DatabaseInfo, version: u64) -> Self {
        Self {
            info,
            version,
            tables: BTreeMap::new(),
            functions: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &Arc<str> {
        &self.info.name
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn table(&self, name: &str) -> Option<&Arc<CatalogTable>> {
        self.tables.get(name)
    }

    pub fn tables(&self) -> impl Iterator<Item = &Arc<CatalogTable>> {
        self.tables.values()
    }

    pub fn table_names(&self) -> impl Iterator<Item = &Arc<str>> {
        self.tables.keys()
    }

    pub fn function(&self, name: &str) -> Option<&Arc<CatalogFunction>> {
        self.functions.get(name)
    }

    pub fn functions(&self) -> impl Iterator<Item = &Arc<CatalogFunction>> {
        self.functions.values()
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::database(&self.info.name)
    }

    pub fn record(&self) -> CatalogRecord {
        CatalogRecord::new(self.version, CatalogPayload::Database(self.info.clone()))
    }

    /// Identity-only record used when this database is tombstoned.
    pub(crate) fn tombstone(&self, version: u64) -> CatalogRecord {
        CatalogRecord::new(
            version,
            CatalogPayload::Database(DatabaseInfo::new(Arc::clone(&self.info.name))),
        )
    }
}

#[derive(Debug)]
enum TableState {
    Incomplete,
    Loaded(TableInfo),
}

/// A table or view. Created as an incomplete shell; the loaded payload is
/// installed either by replacing the registry entry (background/lazy load) or
/// in place under the table lock (reload).
#[derive(Debug)]
pub struct CatalogTable {
    name: TableName,
    version: AtomicU64,
    lock: ReentrantMutex<()>,
    state: RwLock<TableState>,
}

impl CatalogTable {
    pub(crate) fn new_incomplete(name: TableName, version: u64) -> Arc<Self> {
        Arc::new(Self {
            name,
            version: AtomicU64::new(version),
            lock: ReentrantMutex::new(()),
            state: RwLock::new(TableState::Incomplete),
        })
    }

    pub(crate) fn new_loaded(mut info: TableInfo, version: u64) -> Arc<Self> {
        info.loaded = true;
        Arc::new(Self {
            name: info.name(),
            version: AtomicU64::new(version),
            lock: ReentrantMutex::new(()),
            state: RwLock::new(TableState::Loaded(info)),
        })
    }

    pub fn name(&self) -> &TableName {
        &self.name
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    pub(crate) fn set_version(&self, version: u64) {
        self.version.store(version, Ordering::SeqCst);
    }

    pub fn is_loaded(&self) -> bool {
        matches!(*self.state.read(), TableState::Loaded(_))
    }

    pub(crate) fn lock(&self) -> &ReentrantMutex<()> {
        &self.lock
    }

    pub fn key(&self) -> ObjectKey {
        self.name.key()
    }

    /// Install a freshly fetched payload in place. The caller holds the table
    /// lock; `version` was assigned under the version write lock.
    pub(crate) fn install(&self, mut info: TableInfo, version: u64) {
        info.loaded = true;
        *self.state.write() = TableState::Loaded(info);
        self.set_version(version);
    }

    /// Replace or drop one partition of the loaded payload in place. The
    /// caller holds the table lock; `version` was assigned under the version
    /// write lock.
    pub(crate) fn update_partition(
        &self,
        partition_name: &str,
        partition: Option<PartitionInfo>,
        version: u64,
    ) {
        let mut state = self.state.write();
        if let TableState::Loaded(info) = &mut *state {
            info.partitions.retain(|p| p.name != partition_name);
            if let Some(partition) = partition {
                info.partitions.push(partition);
            }
        }
        self.set_version(version);
    }

    /// Snapshot of the table's loaded payload, if any.
    pub fn info(&self) -> Option<TableInfo> {
        match &*self.state.read() {
            TableState::Incomplete => None,
            TableState::Loaded(info) => Some(info.clone()),
        }
    }

    pub fn record(&self) -> CatalogRecord {
        let version = self.version();
        let payload = match &*self.state.read() {
            TableState::Incomplete => CatalogPayload::Table(TableInfo::incomplete(&self.name)),
            TableState::Loaded(info) if info.is_view() => CatalogPayload::View(info.clone()),
            TableState::Loaded(info) => CatalogPayload::Table(info.clone()),
        };
        CatalogRecord::new(version, payload)
    }

    pub(crate) fn tombstone(&self, version: u64) -> CatalogRecord {
        let payload = match &*self.state.read() {
            TableState::Loaded(info) if info.is_view() => CatalogPayload::View(info.identity()),
            _ => CatalogPayload::Table(TableInfo::incomplete(&self.name)),
        };
        CatalogRecord::new(version, payload)
    }
}

#[derive(Debug)]
pub struct CatalogFunction {
    pub(crate) info: FunctionInfo,
    pub(crate) version: u64,
}

impl CatalogFunction {
    pub(crate) fn new(info: FunctionInfo, version: u64) -> Arc<Self> {
        Arc::new(Self { info, version })
    }

    pub fn name(&self) -> &Arc<str> {
        &self.info.name
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::function(&self.info.db_name, &self.info.name)
    }

    pub fn record(&self) -> CatalogRecord {
        CatalogRecord::new(self.version, CatalogPayload::Function(self.info.clone()))
    }

    pub(crate) fn tombstone(&self, version: u64) -> CatalogRecord {
        CatalogRecord::new(
            version,
            CatalogPayload::Function(FunctionInfo::new(
                Arc::clone(&self.info.db_name),
                Arc::clone(&self.info.name),
            )),
        )
    }
}

#[derive(Debug)]
pub struct DataSource {
    pub(crate) info: DataSourceInfo,
    pub(crate) version: u64,
}

impl DataSource {
    pub(crate) fn new(info: DataSourceInfo, version: u64) -> Arc<Self> {
        Arc::new(Self { info, version })
    }

    pub fn name(&self) -> &Arc<str> {
        &self.info.name
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn record(&self) -> CatalogRecord {
        CatalogRecord::new(self.version, CatalogPayload::DataSource(self.info.clone()))
    }

    pub(crate) fn tombstone(&self, version: u64) -> CatalogRecord {
        CatalogRecord::new(version, CatalogPayload::DataSource(self.info.clone()))
    }
}

#[derive(Debug)]
pub struct CachePool {
    pub(crate) info: CachePoolInfo,
    pub(crate) version: u64,
}

impl CachePool {
    pub(crate) fn new(info: CachePoolInfo, version: u64) -> Arc<Self> {
        Arc::new(Self { info, version })
    }

    pub fn name(&self) -> &Arc<str> {
        &self.info.pool_name
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn record(&self) -> CatalogRecord {
        CatalogRecord::new(self.version, CatalogPayload::HdfsCachePool(self.info.clone()))
    }

    pub(crate) fn tombstone(&self, version: u64) -> CatalogRecord {
        CatalogRecord::new(version, CatalogPayload::HdfsCachePool(self.info.clone()))
    }
}

#[derive(Debug)]
pub struct Privilege {
    pub(crate) info: PrivilegeInfo,
    pub(crate) version: u64,
}

impl Privilege {
    pub(crate) fn new(info: PrivilegeInfo, version: u64) -> Arc<Self> {
        Arc::new(Self { info, version })
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn record(&self) -> CatalogRecord {
        CatalogRecord::new(self.version, CatalogPayload::Privilege(self.info.clone()))
    }

    pub(crate) fn tombstone(&self, version: u64) -> CatalogRecord {
        CatalogRecord::new(version, CatalogPayload::Privilege(self.info.clone()))
    }
}

/// A role or user, owning its granted privileges.
#[derive(Debug, Clone)]
pub struct Principal {
    pub(crate) info: PrincipalInfo,
    pub(crate) version: u64,
    pub(crate) privileges: BTreeMap<Arc<str>, Arc<Privilege>>,
}

impl Principal {
    pub(crate) fn new(info: PrincipalInfo, version: u64) -> Self {
        Self {
            info,
            version,
            privileges: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &Arc<str> {
        &self.info.name
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn privileges(&self) -> impl Iterator<Item = &Arc<Privilege>> {
        self.privileges.values()
    }

    pub fn record(&self) -> CatalogRecord {
        CatalogRecord::new(self.version, CatalogPayload::Principal(self.info.clone()))
    }

    pub(crate) fn tombstone(&self, version: u64) -> CatalogRecord {
        CatalogRecord::new(version, CatalogPayload::Principal(self.info.clone()))
    }
}
