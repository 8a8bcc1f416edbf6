//! Log of removed catalog objects, kept until their tombstones have been
//! published in a topic update.

use std::collections::BTreeMap;
use std::ops::Bound;

use tern_types::{CatalogRecord, ObjectKey};

/// A removed object: its key, the version assigned to the removal, and the
/// minimal payload coordinators need to invalidate their replicas.
#[derive(Debug, Clone, PartialEq)]
pub struct Tombstone {
    pub key: ObjectKey,
    pub record: CatalogRecord,
}

impl Tombstone {
    pub fn new(record: CatalogRecord) -> Self {
        Self {
            key: record.key(),
            record,
        }
    }

    pub fn version(&self) -> u64 {
        self.record.version
    }
}

/// Tombstones ordered by removal version. Insertion order equals version
/// order because removal versions come from the global counter.
///
/// Only written under the catalog's version write lock.
#[derive(Debug, Default)]
pub(crate) struct DeleteLog {
    entries: BTreeMap<u64, Tombstone>,
}

impl DeleteLog {
    /// Record a removal. An older tombstone for the same key is superseded:
    /// coordinators only ever need the latest removal of an object.
    pub(crate) fn add(&mut self, record: CatalogRecord) {
        let tombstone = Tombstone::new(record);
        self.entries
            .retain(|_, existing| existing.key != tombstone.key);
        self.entries.insert(tombstone.version(), tombstone);
    }

    /// Tombstones with `from_version < version <= to_version`, in version
    /// order.
    pub(crate) fn retrieve(&self, from_version: u64, to_version: u64) -> Vec<Tombstone> {
        self.entries
            .range((Bound::Excluded(from_version), Bound::Included(to_version)))
            .map(|(_, t)| t.clone())
            .collect()
    }

    /// Drop every tombstone with `version <= up_to`; they have been published.
    pub(crate) fn garbage_collect(&mut self, up_to: u64) {
        self.entries = self.entries.split_off(&(up_to + 1));
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}
