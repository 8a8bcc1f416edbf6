//! Shared object model for the tern catalog service.
//!
//! Every object managed by the catalog is described here as a tagged
//! [`CatalogPayload`] variant paired with the catalog version assigned to its
//! most recent mutation ([`CatalogRecord`]). The catalog service publishes
//! these records to query coordinators; the [`CatalogRecord::minimal`] form is
//! the identity-only rendering used by coordinators that fetch metadata on
//! demand.

#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The version "never assigned". The first version handed out by a catalog is
/// `INITIAL_CATALOG_VERSION + 1`.
pub const INITIAL_CATALOG_VERSION: u64 = 0;

/// The kind tag of a catalog object, as it appears in object keys and topic
/// entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    Database,
    Table,
    View,
    Function,
    DataSource,
    HdfsCachePool,
    Principal,
    Privilege,
    Catalog,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Database => "DATABASE",
            Self::Table => "TABLE",
            Self::View => "VIEW",
            Self::Function => "FUNCTION",
            Self::DataSource => "DATA_SOURCE",
            Self::HdfsCachePool => "HDFS_CACHE_POOL",
            Self::Principal => "PRINCIPAL",
            Self::Privilege => "PRIVILEGE",
            Self::Catalog => "CATALOG",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical `<kind>:<scoped-name>` key identifying a catalog object across
/// the registry, the delete log, and the topic update log.
///
/// Views share the table key namespace: a table and a view with the same
/// scoped name are the same catalog entry, so a drop/recreate that changes the
/// object's flavor still collapses onto one key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectKey(String);

impl ObjectKey {
    pub fn new(kind: ObjectKind, scoped_name: &str) -> Self {
        let kind = match kind {
            ObjectKind::View => ObjectKind::Table,
            other => other,
        };
        Self(format!("{kind}:{scoped_name}"))
    }

    pub fn database(name: &str) -> Self {
        Self::new(ObjectKind::Database, name)
    }

    pub fn table(db: &str, table: &str) -> Self {
        Self::new(ObjectKind::Table, &format!("{db}.{table}"))
    }

    pub fn function(db: &str, function: &str) -> Self {
        Self::new(ObjectKind::Function, &format!("{db}.{function}"))
    }

    pub fn data_source(name: &str) -> Self {
        Self::new(ObjectKind::DataSource, name)
    }

    pub fn cache_pool(name: &str) -> Self {
        Self::new(ObjectKind::HdfsCachePool, name)
    }

    pub fn principal(name: &str) -> Self {
        Self::new(ObjectKind::Principal, name)
    }

    pub fn privilege(principal: &str, privilege: &str) -> Self {
        Self::new(ObjectKind::Privilege, &format!("{principal}.{privilege}"))
    }

    pub fn catalog() -> Self {
        Self::new(ObjectKind::Catalog, "catalog")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fully qualified table name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TableName {
    pub db: Arc<str>,
    pub table: Arc<str>,
}

impl TableName {
    pub fn new(db: impl Into<Arc<str>>, table: impl Into<Arc<str>>) -> Self {
        Self {
            db: db.into(),
            table: table.into(),
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::table(&self.db, &self.table)
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.db, self.table)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseInfo {
    pub name: Arc<str>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl DatabaseInfo {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            comment: None,
            location: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub type_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            comment: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionInfo {
    /// Canonical `k1=v1/k2=v2` partition name.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// Payload of a table or view record.
///
/// An incomplete shell carries `loaded = false` and empty schema fields; the
/// loaded form is installed after the upstream metastore record has been
/// fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    pub db_name: Arc<str>,
    pub table_name: Arc<str>,
    pub loaded: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<ColumnInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub partitions: Vec<PartitionInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// `Some` for views; the expanded view definition text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_sql: Option<String>,
}

impl TableInfo {
    /// An unloaded shell for the named table.
    pub fn incomplete(name: &TableName) -> Self {
        Self {
            db_name: Arc::clone(&name.db),
            table_name: Arc::clone(&name.table),
            loaded: false,
            columns: Vec::new(),
            partitions: Vec::new(),
            location: None,
            view_sql: None,
        }
    }

    pub fn name(&self) -> TableName {
        TableName::new(Arc::clone(&self.db_name), Arc::clone(&self.table_name))
    }

    pub fn is_view(&self) -> bool {
        self.view_sql.is_some()
    }

    /// Identity-only rendering: table name and loaded flag, no schema.
    pub fn identity(&self) -> Self {
        Self {
            db_name: Arc::clone(&self.db_name),
            table_name: Arc::clone(&self.table_name),
            loaded: self.loaded,
            columns: Vec::new(),
            partitions: Vec::new(),
            location: None,
            view_sql: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionInfo {
    pub db_name: Arc<str>,
    pub name: Arc<str>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl FunctionInfo {
    pub fn new(db_name: impl Into<Arc<str>>, name: impl Into<Arc<str>>) -> Self {
        Self {
            db_name: db_name.into(),
            name: name.into(),
            class_name: None,
            signature: None,
        }
    }

    pub fn scoped_name(&self) -> String {
        format!("{}.{}", self.db_name, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSourceInfo {
    pub name: Arc<str>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachePoolInfo {
    pub pool_name: Arc<str>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_bytes: Option<u64>,
}

impl CachePoolInfo {
    pub fn new(pool_name: impl Into<Arc<str>>) -> Self {
        Self {
            pool_name: pool_name.into(),
            owner: None,
            limit_bytes: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrincipalKind {
    Role,
    User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrincipalInfo {
    pub name: Arc<str>,
    pub kind: PrincipalKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivilegeInfo {
    pub principal_name: Arc<str>,
    pub privilege_name: Arc<str>,
    #[serde(default)]
    pub grant_option: bool,
}

/// The synthetic terminal record of every topic update: the catalog service
/// identity plus the version cursor coordinators advance to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogInfo {
    pub service_id: Uuid,
    pub version: u64,
}

/// Tagged payload variant for every object kind the catalog manages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CatalogPayload {
    Database(DatabaseInfo),
    Table(TableInfo),
    View(TableInfo),
    Function(FunctionInfo),
    DataSource(DataSourceInfo),
    HdfsCachePool(CachePoolInfo),
    Principal(PrincipalInfo),
    Privilege(PrivilegeInfo),
    Catalog(CatalogInfo),
}

impl CatalogPayload {
    pub fn kind(&self) -> ObjectKind {
        match self {
            Self::Database(_) => ObjectKind::Database,
            Self::Table(_) => ObjectKind::Table,
            Self::View(_) => ObjectKind::View,
            Self::Function(_) => ObjectKind::Function,
            Self::DataSource(_) => ObjectKind::DataSource,
            Self::HdfsCachePool(_) => ObjectKind::HdfsCachePool,
            Self::Principal(_) => ObjectKind::Principal,
            Self::Privilege(_) => ObjectKind::Privilege,
            Self::Catalog(_) => ObjectKind::Catalog,
        }
    }

    pub fn key(&self) -> ObjectKey {
        match self {
            Self::Database(db) => ObjectKey::database(&db.name),
            Self::Table(t) | Self::View(t) => ObjectKey::table(&t.db_name, &t.table_name),
            Self::Function(f) => ObjectKey::function(&f.db_name, &f.name),
            Self::DataSource(ds) => ObjectKey::data_source(&ds.name),
            Self::HdfsCachePool(p) => ObjectKey::cache_pool(&p.pool_name),
            Self::Principal(p) => ObjectKey::principal(&p.name),
            Self::Privilege(p) => ObjectKey::privilege(&p.principal_name, &p.privilege_name),
            Self::Catalog(_) => ObjectKey::catalog(),
        }
    }

    /// The identity-only payload published on the on-demand topic, or `None`
    /// for kinds that topic does not carry.
    ///
    /// Principals, privileges, and the catalog sentinel have no useful
    /// minimization and are published in full.
    pub fn minimal(&self) -> Option<Self> {
        match self {
            Self::Database(db) => Some(Self::Database(DatabaseInfo::new(Arc::clone(&db.name)))),
            Self::Table(t) => Some(Self::Table(t.identity())),
            Self::View(t) => Some(Self::View(t.identity())),
            Self::Function(f) => Some(Self::Function(FunctionInfo::new(
                Arc::clone(&f.db_name),
                Arc::clone(&f.name),
            ))),
            Self::Principal(_) | Self::Privilege(_) | Self::Catalog(_) => Some(self.clone()),
            Self::DataSource(_) | Self::HdfsCachePool(_) => None,
        }
    }
}

/// A versioned catalog object as it is stored in logs and published to
/// coordinators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogRecord {
    pub version: u64,
    pub payload: CatalogPayload,
}

impl CatalogRecord {
    pub fn new(version: u64, payload: CatalogPayload) -> Self {
        Self { version, payload }
    }

    pub fn kind(&self) -> ObjectKind {
        self.payload.kind()
    }

    pub fn key(&self) -> ObjectKey {
        self.payload.key()
    }

    pub fn minimal(&self) -> Option<Self> {
        self.payload
            .minimal()
            .map(|payload| Self::new(self.version, payload))
    }
}

/// A `(key, version)` pair naming one record produced by a DDL operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedKey {
    pub key: ObjectKey,
    pub version: u64,
}

impl From<&CatalogRecord> for VersionedKey {
    fn from(record: &CatalogRecord) -> Self {
        Self {
            key: record.key(),
            version: record.version,
        }
    }
}

/// The result set of a completed DDL operation, consumed by the SYNC_DDL
/// barrier to compute the topic version the caller must wait for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DdlResult {
    /// Version carried by the operation itself; returned directly when the
    /// result set is empty.
    pub version: u64,
    pub updated: Vec<VersionedKey>,
    pub removed: Vec<VersionedKey>,
}

impl DdlResult {
    pub fn new(version: u64) -> Self {
        Self {
            version,
            updated: Vec::new(),
            removed: Vec::new(),
        }
    }

    pub fn with_updated(mut self, record: &CatalogRecord) -> Self {
        self.updated.push(record.into());
        self
    }

    pub fn with_removed(mut self, record: &CatalogRecord) -> Self {
        self.removed.push(record.into());
        self
    }
}
