//! Per-object publication history, used by the delta builder to bound how
//! long a hot table may dodge topic updates and by the SYNC_DDL barrier to
//! decide which topic update covers a DDL result set.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tern_types::{ObjectKey, INITIAL_CATALOG_VERSION};

/// Publication state of one catalog object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TopicEntry {
    /// Consecutive topic updates this object has skipped since it was last
    /// published.
    pub skipped: u32,
    /// Highest object version that has been added to a topic update.
    pub last_sent_version: u64,
    /// Version of the topic update that carried `last_sent_version`.
    pub last_sent_topic: u64,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<ObjectKey, TopicEntry>,
    /// Versions of the most recent topic updates, newest at the back. Bounds
    /// the retention window.
    recent_topics: VecDeque<u64>,
}

/// The topic update log. Entries are written only by the delta builder, which
/// runs single-threaded; readers are SYNC_DDL waiters.
///
/// Also owns the `last_published_topic` cursor and the condition variable
/// SYNC_DDL waiters block on, so that cursor advance and wakeup happen under
/// one lock.
#[derive(Debug)]
pub(crate) struct TopicUpdateLog {
    inner: Mutex<Inner>,
    publish_signal: Condvar,
    last_published: AtomicU64,
    retention: usize,
}

impl TopicUpdateLog {
    pub(crate) fn new(retention: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            publish_signal: Condvar::new(),
            last_published: AtomicU64::new(INITIAL_CATALOG_VERSION),
            retention,
        }
    }

    pub(crate) fn get(&self, key: &ObjectKey) -> Option<TopicEntry> {
        self.inner.lock().entries.get(key).copied()
    }

    pub(crate) fn entry_or_default(&self, key: &ObjectKey) -> TopicEntry {
        self.get(key).unwrap_or_default()
    }

    pub(crate) fn put(&self, key: ObjectKey, entry: TopicEntry) {
        self.inner.lock().entries.insert(key, entry);
    }

    /// Drop entries that have not been written for more than the retention
    /// window, measured in topic updates.
    pub(crate) fn garbage_collect(&self, topic_version: u64) {
        let mut inner = self.inner.lock();
        inner.recent_topics.push_back(topic_version);
        if inner.recent_topics.len() > self.retention {
            if let Some(expired) = inner.recent_topics.pop_front() {
                inner.entries.retain(|_, e| e.last_sent_topic > expired);
            }
        }
    }

    pub(crate) fn last_published(&self) -> u64 {
        self.last_published.load(Ordering::SeqCst)
    }

    /// Advance the published-topic cursor and wake every SYNC_DDL waiter.
    pub(crate) fn publish(&self, topic_version: u64) {
        let _inner = self.inner.lock();
        self.last_published.store(topic_version, Ordering::SeqCst);
        self.publish_signal.notify_all();
    }

    /// Block until a topic update newer than `last_seen` is published, or the
    /// timeout elapses.
    pub(crate) fn wait_for_publish(&self, last_seen: u64, timeout: Duration) {
        let mut inner = self.inner.lock();
        if self.last_published.load(Ordering::SeqCst) != last_seen {
            return;
        }
        let _ = self.publish_signal.wait_for(&mut inner, timeout);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    fn key(name: &str) -> ObjectKey {
        ObjectKey::table("db", name)
    }

    #[test]
    fn missing_entries_read_as_default() {
        let log = TopicUpdateLog::new(10);
        assert_eq!(log.get(&key("t")), None);
        assert_eq!(log.entry_or_default(&key("t")), TopicEntry::default());
    }

    #[test]
    fn entries_expire_after_the_retention_window() {
        let log = TopicUpdateLog::new(2);
        log.put(
            key("old"),
            TopicEntry {
                skipped: 0,
                last_sent_version: 1,
                last_sent_topic: 10,
            },
        );
        log.put(
            key("fresh"),
            TopicEntry {
                skipped: 0,
                last_sent_version: 2,
                last_sent_topic: 20,
            },
        );

        log.garbage_collect(10);
        log.garbage_collect(20);
        assert_eq!(log.len(), 2);

        // Third update pushes topic 10 out of the window.
        log.garbage_collect(30);
        assert_eq!(log.len(), 1);
        assert!(log.get(&key("old")).is_none());
        assert!(log.get(&key("fresh")).is_some());
    }

    #[test]
    fn rewritten_entries_survive_garbage_collection() {
        let log = TopicUpdateLog::new(1);
        log.put(
            key("t"),
            TopicEntry {
                skipped: 0,
                last_sent_version: 1,
                last_sent_topic: 10,
            },
        );
        log.garbage_collect(10);

        log.put(
            key("t"),
            TopicEntry {
                skipped: 0,
                last_sent_version: 5,
                last_sent_topic: 20,
            },
        );
        log.garbage_collect(20);
        assert!(log.get(&key("t")).is_some());
    }

    #[test]
    fn publish_wakes_waiters() {
        let log = Arc::new(TopicUpdateLog::new(10));
        let waiter = Arc::clone(&log);
        let handle = std::thread::spawn(move || {
            waiter.wait_for_publish(0, Duration::from_secs(30));
            waiter.last_published()
        });

        // Give the waiter a moment to block, then publish.
        std::thread::sleep(Duration::from_millis(20));
        log.publish(7);
        assert_eq!(handle.join().unwrap(), 7);
    }

    #[test]
    fn wait_returns_immediately_when_cursor_already_moved() {
        let log = TopicUpdateLog::new(10);
        log.publish(3);
        let begin = Instant::now();
        log.wait_for_publish(0, Duration::from_secs(30));
        assert!(begin.elapsed() < Duration::from_secs(1));
    }
}
