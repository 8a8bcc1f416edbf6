//! The delta builder: computes the set of objects changed since the last
//! published topic update and hands them to the publication sink.
//!
//! The builder samples the version counter once, enumerates registry
//! snapshots taken under the version read lock, and serializes heavy objects
//! under their own locks, so mutations never wait on a topic update. A table
//! whose version landed past the sampled upper bound is deferred to the next
//! delta, but only `max_skipped_topic_updates` times in a row; after that it
//! is force-included so a hot table cannot dodge publication indefinitely.

use std::collections::HashSet;
use std::time::Instant;

use tern_types::{CatalogInfo, CatalogPayload, CatalogRecord, ObjectKey, ObjectKind};
use tracing::{debug, error, info};

use crate::catalog::Catalog;
use crate::config::TopicMode;
use crate::metrics;
use crate::object::{CatalogTable, Database};
use crate::topic_log::{TopicEntry, TopicUpdateLog};

/// Key prefix of the full-payload topic namespace.
pub const FULL_TOPIC_PREFIX: &str = "catalog-v1:";

/// Key prefix of the identity-only topic namespace.
pub const MINIMAL_TOPIC_PREFIX: &str = "catalog-v2:";

/// Publication sink the delta builder pushes records into. Implementations
/// hand the bytes to whatever transport broadcasts them to coordinators.
pub trait UpdateSink: Send + Sync {
    /// Returns false if the item could not be accepted; the builder logs and
    /// moves on.
    fn publish(&self, topic_key: &str, version: u64, payload: &[u8], deleted: bool) -> bool;
}

struct DeltaContext<'a> {
    sink: &'a dyn UpdateSink,
    topic_log: &'a TopicUpdateLog,
    topic_mode: TopicMode,
    from_version: u64,
    to_version: u64,
    /// Keys published as live updates; tombstones for these keys are dropped
    /// so a delete-then-recreate does not retract the re-created object.
    updated_keys: HashSet<ObjectKey>,
    published: u64,
    deleted: u64,
}

impl<'a> DeltaContext<'a> {
    fn new(
        sink: &'a dyn UpdateSink,
        topic_log: &'a TopicUpdateLog,
        topic_mode: TopicMode,
        from_version: u64,
        to_version: u64,
    ) -> Self {
        Self {
            sink,
            topic_log,
            topic_mode,
            from_version,
            to_version,
            updated_keys: HashSet::new(),
            published: 0,
            deleted: 0,
        }
    }

    fn in_range(&self, version: u64) -> bool {
        version > self.from_version && version <= self.to_version
    }

    /// Serialize `record` and push it to the configured topic namespaces,
    /// recording the publication in the topic update log. A record that fails
    /// to serialize is logged and omitted; it will ride a later delta.
    fn add(&mut self, record: &CatalogRecord, deleted: bool) {
        let key = record.key();
        let payload = match serde_json::to_vec(record) {
            Ok(payload) => payload,
            Err(e) => {
                error!(key = %key, error = %e, "failed to serialize catalog object; omitting from topic update");
                return;
            }
        };

        if record.kind() != ObjectKind::Catalog {
            self.topic_log.put(
                key.clone(),
                TopicEntry {
                    skipped: 0,
                    last_sent_version: record.version,
                    last_sent_topic: self.to_version,
                },
            );
            if !deleted {
                self.updated_keys.insert(key.clone());
            }
        }

        if matches!(self.topic_mode, TopicMode::Full | TopicMode::Mixed) {
            let topic_key = format!("{FULL_TOPIC_PREFIX}{key}");
            if !self.sink.publish(&topic_key, record.version, &payload, deleted) {
                error!(topic_key = %topic_key, version = record.version, deleted, "sink rejected topic item");
            }
        }
        if matches!(self.topic_mode, TopicMode::Minimal | TopicMode::Mixed) {
            if let Some(minimal) = record.minimal() {
                match serde_json::to_vec(&minimal) {
                    Ok(payload) => {
                        let topic_key = format!("{MINIMAL_TOPIC_PREFIX}{key}");
                        if !self.sink.publish(&topic_key, record.version, &payload, deleted) {
                            error!(topic_key = %topic_key, version = record.version, deleted, "sink rejected topic item");
                        }
                    }
                    Err(e) => {
                        error!(key = %key, error = %e, "failed to serialize minimal catalog object");
                    }
                }
            }
        }

        if deleted {
            self.deleted += 1;
        } else {
            self.published += 1;
        }
    }
}

impl Catalog {
    /// Compute and publish the delta of every object changed since
    /// `from_version` (the cursor of the last published topic update), ending
    /// with the terminal catalog record that carries the new cursor. Returns
    /// the new cursor.
    ///
    /// Invocations must be serialized by the caller; the topic update log is
    /// written only from here.
    pub fn get_catalog_delta(&self, sink: &dyn UpdateSink, from_version: u64) -> u64 {
        let begin = Instant::now();
        let to_version = self.current_version();
        let mut ctx = DeltaContext::new(
            sink,
            &self.topic_log,
            self.config.topic_mode,
            from_version,
            to_version,
        );

        for db in self.all_databases() {
            self.add_database_to_delta(&db, &mut ctx);
        }
        for source in self.all_data_sources() {
            if ctx.in_range(source.version()) {
                ctx.add(&source.record(), false);
            }
        }
        for pool in self.all_cache_pools() {
            if ctx.in_range(pool.version()) {
                ctx.add(&pool.record(), false);
            }
        }
        for principal in self.all_principals() {
            if ctx.in_range(principal.version()) {
                ctx.add(&principal.record(), false);
            }
            for privilege in principal.privileges() {
                if ctx.in_range(privilege.version()) {
                    ctx.add(&privilege.record(), false);
                }
            }
        }

        // Deletions in range, except keys that were re-created and published
        // live above.
        for tombstone in self.deleted_objects(from_version, to_version) {
            if !ctx.updated_keys.contains(&tombstone.key) {
                ctx.add(&tombstone.record, true);
            }
        }

        // The terminal record: always last, always present, and what
        // coordinators use to advance their cursor. A service id change is
        // their signal to drop everything and resync.
        let catalog_record = CatalogRecord::new(
            to_version,
            CatalogPayload::Catalog(CatalogInfo {
                service_id: self.service_id,
                version: to_version,
            }),
        );
        ctx.add(&catalog_record, false);

        let (published, deleted) = (ctx.published, ctx.deleted);
        self.state.write().delete_log.garbage_collect(to_version);
        self.topic_log.garbage_collect(to_version);
        self.topic_log.publish(to_version);

        metrics::record_topic_update(begin.elapsed(), published, deleted);
        debug!(from_version, to_version, published, deleted, "published topic update");
        to_version
    }

    fn add_database_to_delta(&self, db: &Database, ctx: &mut DeltaContext<'_>) {
        if ctx.in_range(db.version()) {
            ctx.add(&db.record(), false);
        }
        for table in db.tables() {
            self.add_table_to_delta(table, ctx);
        }
        for function in db.functions() {
            if ctx.in_range(function.version()) {
                ctx.add(&function.record(), false);
            }
        }
    }

    /// Tables whose version moved past the sampled upper bound consult their
    /// skip count: under the limit they sit this delta out, at the limit they
    /// are included with their newer-than-`to_version` version.
    fn add_table_to_delta(&self, table: &CatalogTable, ctx: &mut DeltaContext<'_>) {
        if table.version() <= ctx.to_version {
            self.add_table_to_delta_locked(table, ctx);
        } else {
            let entry = self.topic_log.entry_or_default(&table.key());
            if entry.skipped >= self.config.max_skipped_topic_updates {
                self.add_table_to_delta_locked(table, ctx);
            } else {
                info!(table = %table.name(), topic_version = ctx.to_version, "table is skipping topic update");
                self.topic_log.put(
                    table.key(),
                    TopicEntry {
                        skipped: entry.skipped + 1,
                        ..entry
                    },
                );
            }
        }
    }

    /// Re-check the version under the table's own lock (it may have moved
    /// since enumeration) and serialize the payload while holding it.
    fn add_table_to_delta_locked(&self, table: &CatalogTable, ctx: &mut DeltaContext<'_>) {
        let _guard = table.lock().lock();
        let version = table.version();
        if version <= ctx.from_version {
            return;
        }
        if version > ctx.to_version {
            let entry = self.topic_log.entry_or_default(&table.key());
            if entry.skipped < self.config.max_skipped_topic_updates {
                info!(table = %table.name(), topic_version = ctx.to_version, "table is skipping topic update");
                self.topic_log.put(
                    table.key(),
                    TopicEntry {
                        skipped: entry.skipped + 1,
                        ..entry
                    },
                );
                return;
            }
        }
        ctx.add(&table.record(), false);
    }
}
