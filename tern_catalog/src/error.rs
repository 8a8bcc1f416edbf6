use std::sync::Arc;
use std::time::Duration;

use tern_types::TableName;

use crate::gate::PARTIAL_FETCH_QUEUE_LEN_METRIC;

#[derive(Debug, Clone, thiserror::Error)]
pub enum CatalogError {
    #[error("database does not exist: {0}")]
    DatabaseNotFound(Arc<str>),

    #[error("table does not exist: {0}")]
    TableNotFound(TableName),

    #[error("function does not exist: {db}.{name}")]
    FunctionNotFound { db: Arc<str>, name: Arc<str> },

    #[error("principal does not exist: {0}")]
    PrincipalNotFound(Arc<str>),

    #[error("metadata load already in progress for table {0}")]
    AlreadyLoading(TableName),

    #[error("error loading metadata for table {table}: {cause}")]
    LoadFailed { table: TableName, cause: String },

    #[error(
        "table {table} changed concurrently: expected version {expected}, found {found}"
    )]
    Conflict {
        table: TableName,
        expected: u64,
        found: u64,
    },

    #[error("could not acquire lock for table {table} within {timeout:?}")]
    LockTimeout { table: TableName, timeout: Duration },

    #[error(
        "timed out while fetching partial object metadata; check the metric '{}' for the \
         current queue length and consider raising the partial fetch queue timeout and/or \
         the parallel fetch limit",
        PARTIAL_FETCH_QUEUE_LEN_METRIC
    )]
    PartialFetchQueueTimeout,

    #[error(
        "could not determine the catalog topic version for the SYNC_DDL operation after \
         {attempts} attempts; the operation has been executed but its effects may not \
         have been broadcast to all coordinators"
    )]
    SyncDdlTimeout { attempts: u64 },

    #[error("upstream metastore unavailable: {0}")]
    Upstream(String),

    #[error("internal catalog error: {0}")]
    Internal(String),
}
