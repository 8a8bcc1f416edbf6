//! The SYNC_DDL barrier: blocks a DDL caller until the topic update log shows
//! that every record its operation produced has been published, and returns
//! the topic version coordinators must reach before the effects are visible.

use std::time::{Duration, Instant};

use tern_types::{DdlResult, VersionedKey};
use tracing::{debug, info};

use crate::catalog::Catalog;
use crate::error::CatalogError;
use crate::Result;

/// Bound for one wait on the topic publish signal. Spurious or missed
/// wakeups only cost another check, not an attempt.
const TOPIC_UPDATE_WAIT_TIMEOUT: Duration = Duration::from_secs(10);

impl Catalog {
    /// The topic version an operation using SYNC_DDL must wait for so that
    /// its result set has been broadcast to all coordinators. Operations with
    /// an empty result set get the version carried by the result directly.
    ///
    /// The attempt budget is `max(5, |updated| * (max_skipped + 1))` distinct
    /// topic publishes: each updated object can sit out at most `max_skipped`
    /// updates before the starvation bound forces it in, plus slack for
    /// scheduler jitter. Exhausting the budget fails with a retriable error;
    /// the DDL itself already succeeded.
    pub fn wait_for_sync_ddl(&self, result: &DdlResult) -> Result<u64> {
        if result.updated.is_empty() && result.removed.is_empty() {
            return Ok(result.version);
        }
        let max_attempts = (result.updated.len() as u64
            * (u64::from(self.config.max_skipped_topic_updates) + 1))
            .max(5);
        let begin = Instant::now();
        let mut last_seen_topic = self.topic_log.last_published();
        let mut attempts: u64 = 0;
        loop {
            debug!(attempts, "checking topic update log for SYNC_DDL coverage");
            let covering_updates = self.covering_topic_version(&result.updated);
            let covering_removes = self.covering_topic_version(&result.removed);
            if let (Some(updates), Some(removes)) = (covering_updates, covering_removes) {
                let version = updates.max(removes);
                info!(
                    version,
                    elapsed_ms = begin.elapsed().as_millis() as u64,
                    "SYNC_DDL operation waiting for catalog topic version"
                );
                return Ok(version);
            }

            self.topic_log
                .wait_for_publish(last_seen_topic, TOPIC_UPDATE_WAIT_TIMEOUT);
            let current = self.topic_log.last_published();
            // Timeout-based exits from the wait do not count toward the
            // attempt budget.
            if current != last_seen_topic {
                attempts += 1;
                if attempts > max_attempts {
                    return Err(CatalogError::SyncDdlTimeout {
                        attempts: max_attempts,
                    });
                }
                last_seen_topic = current;
            }
        }
    }

    /// The version of the topic update covering every record in `records`: a
    /// topic update covers a record when the object's last sent version is at
    /// least the record's version and the update is no older than the one
    /// that carried it. `None` when some record is not yet covered, either
    /// because no topic update has processed it or because its log entry was
    /// garbage collected.
    fn covering_topic_version(&self, records: &[VersionedKey]) -> Option<u64> {
        if records.is_empty() {
            return Some(self.topic_log.last_published());
        }
        let mut version = 0;
        for record in records {
            let entry = self.topic_log.get(&record.key)?;
            if entry.last_sent_version < record.version {
                return None;
            }
            version = version.max(entry.last_sent_topic);
        }
        Some(version)
    }
}
