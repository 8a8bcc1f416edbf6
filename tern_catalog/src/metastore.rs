//! Pluggable southbound clients: the upstream metastore holding the
//! authoritative schema objects, and the HDFS namenode exposing cache pools.
//!
//! [`MemMetastore`] / [`MemHdfs`] are in-memory implementations used by tests
//! and by embedded deployments that have no external metastore.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tern_types::{CachePoolInfo, DatabaseInfo, FunctionInfo, PartitionInfo, TableInfo, TableName};

#[derive(Debug, Clone, thiserror::Error)]
pub enum MetastoreError {
    #[error("metastore unavailable: {0}")]
    Unavailable(String),

    #[error("metastore request failed: {0}")]
    Request(String),
}

pub type MetastoreResult<T> = Result<T, MetastoreError>;

/// Client for the upstream metastore. Calls may block; they are never made
/// while holding a table lock's paired version lock.
pub trait MetastoreClient: std::fmt::Debug + Send + Sync {
    fn list_databases(&self) -> MetastoreResult<Vec<String>>;

    fn get_database(&self, db: &str) -> MetastoreResult<Option<DatabaseInfo>>;

    fn list_tables(&self, db: &str) -> MetastoreResult<Vec<String>>;

    fn get_table(&self, db: &str, table: &str) -> MetastoreResult<Option<TableInfo>>;

    fn table_exists(&self, db: &str, table: &str) -> MetastoreResult<bool> {
        Ok(self.get_table(db, table)?.is_some())
    }

    fn list_functions(&self, db: &str) -> MetastoreResult<Vec<String>>;

    fn get_function(&self, db: &str, function: &str) -> MetastoreResult<Option<FunctionInfo>>;

    /// Fetch one partition by its `k=v` component spec.
    fn get_partition(
        &self,
        db: &str,
        table: &str,
        spec: &[(String, String)],
    ) -> MetastoreResult<Option<PartitionInfo>>;
}

/// Client for the HDFS namenode's cache pool listing.
pub trait HdfsClient: std::fmt::Debug + Send + Sync {
    fn list_cache_pools(&self) -> MetastoreResult<Vec<CachePoolInfo>>;
}

/// Canonical `k1=v1/k2=v2` name for a partition spec.
pub fn partition_name(spec: &[(String, String)]) -> String {
    spec.iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("/")
}

#[derive(Debug, Default)]
struct MemMetastoreState {
    databases: BTreeMap<String, DatabaseInfo>,
    tables: BTreeMap<(String, String), TableInfo>,
    functions: BTreeMap<(String, String), FunctionInfo>,
    /// Databases that fail with an error when fetched, for exercising
    /// partial-progress invalidation.
    failing_databases: BTreeSet<String>,
    unavailable: bool,
}

/// In-memory [`MetastoreClient`].
#[derive(Debug, Default)]
pub struct MemMetastore {
    state: Mutex<MemMetastoreState>,
}

impl MemMetastore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn put_database(&self, info: DatabaseInfo) {
        let mut state = self.state.lock();
        state.databases.insert(info.name.to_string(), info);
    }

    pub fn drop_database(&self, db: &str) {
        let mut state = self.state.lock();
        state.databases.remove(db);
        state.tables.retain(|(d, _), _| d != db);
        state.functions.retain(|(d, _), _| d != db);
    }

    pub fn put_table(&self, info: TableInfo) {
        let mut state = self.state.lock();
        state
            .tables
            .insert((info.db_name.to_string(), info.table_name.to_string()), info);
    }

    pub fn drop_table(&self, name: &TableName) {
        self.state
            .lock()
            .tables
            .remove(&(name.db.to_string(), name.table.to_string()));
    }

    pub fn put_function(&self, info: FunctionInfo) {
        let mut state = self.state.lock();
        state
            .functions
            .insert((info.db_name.to_string(), info.name.to_string()), info);
    }

    /// Make every fetch against `db` fail until cleared.
    pub fn fail_database(&self, db: &str, failing: bool) {
        let mut state = self.state.lock();
        if failing {
            state.failing_databases.insert(db.to_string());
        } else {
            state.failing_databases.remove(db);
        }
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unavailable = unavailable;
    }

    fn check(&self, state: &MemMetastoreState, db: &str) -> MetastoreResult<()> {
        if state.unavailable {
            return Err(MetastoreError::Unavailable("metastore down".into()));
        }
        if state.failing_databases.contains(db) {
            return Err(MetastoreError::Request(format!(
                "injected failure for database {db}"
            )));
        }
        Ok(())
    }
}

impl MetastoreClient for MemMetastore {
    fn list_databases(&self) -> MetastoreResult<Vec<String>> {
        let state = self.state.lock();
        if state.unavailable {
            return Err(MetastoreError::Unavailable("metastore down".into()));
        }
        Ok(state.databases.keys().cloned().collect())
    }

    fn get_database(&self, db: &str) -> MetastoreResult<Option<DatabaseInfo>> {
        let state = self.state.lock();
        self.check(&state, db)?;
        Ok(state.databases.get(db).cloned())
    }

    fn list_tables(&self, db: &str) -> MetastoreResult<Vec<String>> {
        let state = self.state.lock();
        self.check(&state, db)?;
        Ok(state
            .tables
            .keys()
            .filter(|(d, _)| d == db)
            .map(|(_, t)| t.clone())
            .collect())
    }

    fn get_table(&self, db: &str, table: &str) -> MetastoreResult<Option<TableInfo>> {
        let state = self.state.lock();
        self.check(&state, db)?;
        Ok(state.tables.get(&(db.to_string(), table.to_string())).cloned())
    }

    fn list_functions(&self, db: &str) -> MetastoreResult<Vec<String>> {
        let state = self.state.lock();
        self.check(&state, db)?;
        Ok(state
            .functions
            .keys()
            .filter(|(d, _)| d == db)
            .map(|(_, f)| f.clone())
            .collect())
    }

    fn get_function(&self, db: &str, function: &str) -> MetastoreResult<Option<FunctionInfo>> {
        let state = self.state.lock();
        self.check(&state, db)?;
        Ok(state
            .functions
            .get(&(db.to_string(), function.to_string()))
            .cloned())
    }

    fn get_partition(
        &self,
        db: &str,
        table: &str,
        spec: &[(String, String)],
    ) -> MetastoreResult<Option<PartitionInfo>> {
        let state = self.state.lock();
        self.check(&state, db)?;
        let name = partition_name(spec);
        Ok(state
            .tables
            .get(&(db.to_string(), table.to_string()))
            .and_then(|t| t.partitions.iter().find(|p| p.name == name))
            .cloned())
    }
}

/// In-memory [`HdfsClient`].
#[derive(Debug, Default)]
pub struct MemHdfs {
    pools: Mutex<Vec<CachePoolInfo>>,
    unavailable: Mutex<bool>,
}

impl MemHdfs {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_pools(&self, pools: Vec<CachePoolInfo>) {
        *self.pools.lock() = pools;
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.lock() = unavailable;
    }
}

impl HdfsClient for MemHdfs {
    fn list_cache_pools(&self) -> MetastoreResult<Vec<CachePoolInfo>> {
        if *self.unavailable.lock() {
            return Err(MetastoreError::Unavailable("namenode down".into()));
        }
        Ok(self.pools.lock().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_metastore_scopes_lookups_by_database() {
        let metastore = MemMetastore::new();
        metastore.put_database(DatabaseInfo::new("a"));
        metastore.put_database(DatabaseInfo::new("b"));
        metastore.put_table(TableInfo::incomplete(&TableName::new("a", "t1")));
        metastore.put_table(TableInfo::incomplete(&TableName::new("b", "t2")));

        assert_eq!(metastore.list_databases().unwrap(), vec!["a", "b"]);
        assert_eq!(metastore.list_tables("a").unwrap(), vec!["t1"]);
        assert!(metastore.get_table("a", "t2").unwrap().is_none());
        assert!(metastore.table_exists("b", "t2").unwrap());
    }

    #[test]
    fn injected_failures_are_scoped_to_one_database() {
        let metastore = MemMetastore::new();
        metastore.put_database(DatabaseInfo::new("good"));
        metastore.put_database(DatabaseInfo::new("bad"));
        metastore.fail_database("bad", true);

        assert!(metastore.get_database("good").unwrap().is_some());
        assert!(metastore.get_database("bad").is_err());
        // Listing is not scoped to a database and still succeeds.
        assert_eq!(metastore.list_databases().unwrap().len(), 2);
    }

    #[test]
    fn partition_lookup_uses_canonical_names() {
        let metastore = MemMetastore::new();
        metastore.put_database(DatabaseInfo::new("db"));
        let mut table = TableInfo::incomplete(&TableName::new("db", "t"));
        table.partitions.push(PartitionInfo {
            name: "day=1/region=eu".into(),
            location: None,
        });
        metastore.put_table(table);

        let spec = vec![("day".to_string(), "1".to_string()), ("region".to_string(), "eu".to_string())];
        assert!(metastore.get_partition("db", "t", &spec).unwrap().is_some());
        let spec = vec![("day".to_string(), "2".to_string())];
        assert!(metastore.get_partition("db", "t", &spec).unwrap().is_none());
    }
}
