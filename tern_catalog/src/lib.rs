//! # Tern Catalog
//!
//! The authoritative metadata cache of the tern distributed SQL engine. It
//! holds the canonical view of every schema object (databases, tables, views,
//! functions, data sources, HDFS cache pools, principals, privileges) and
//! publishes an incremental stream of change records to the fleet of query
//! coordinators, which maintain weakly consistent replicas.
//!
//! ## Versioning
//!
//! Every mutation is assigned a unique version from a global monotonic
//! counter, taken under the write side of one fair reader/writer lock that
//! also guards the registry and the delete log. The delta builder
//! ([`Catalog::get_catalog_delta`]) periodically walks registry snapshots and
//! publishes everything whose version falls inside `(from, to]`, followed by
//! a terminal catalog record carrying the new cursor. Removed objects are
//! tracked in a delete log until their tombstones have been published.
//!
//! ## SYNC_DDL
//!
//! Strongly ordered DDL blocks on [`Catalog::wait_for_sync_ddl`] until the
//! topic update log shows the operation's result set was broadcast. The delta
//! builder bounds how long a frequently mutated table can keep falling past
//! the topic's upper bound (`max_skipped_topic_updates`), which also bounds
//! SYNC_DDL latency.
//!
//! ## Loading
//!
//! Tables enter the registry as incomplete shells and are materialized by a
//! bounded pool of loader threads, committing through a
//! compare-by-version replace so that drops, renames, and invalidations that
//! race with a load win cleanly.

#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

pub mod catalog;
pub mod config;
mod delete_log;
pub mod delta;
pub mod error;
pub mod gate;
pub mod loader;
pub mod metastore;
pub mod metrics;
pub mod object;
mod pool_reader;
mod sync_ddl;
mod topic_log;

pub use catalog::{Catalog, PartialObjectRequest, PartialObjectResponse, TableLock};
pub use config::{CatalogConfig, TopicMode};
pub use delta::{UpdateSink, FULL_TOPIC_PREFIX, MINIMAL_TOPIC_PREFIX};
pub use error::CatalogError;
pub use loader::{LoadHandle, LoadResult};
pub use object::{CachePool, CatalogFunction, CatalogTable, DataSource, Database, Principal, Privilege};

pub(crate) type Result<T, E = CatalogError> = std::result::Result<T, E>;
