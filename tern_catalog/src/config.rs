use std::time::Duration;

/// Which topic namespaces a delta is published to.
///
/// `Full` carries complete serialized payloads for coordinators that replicate
/// the whole catalog; `Minimal` carries identity-only payloads for
/// coordinators that pull object metadata on demand; `Mixed` publishes both.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TopicMode {
    Full,
    #[default]
    Mixed,
    Minimal,
}

#[derive(Debug, Clone)]
pub struct CatalogConfig {
    pub topic_mode: TopicMode,

    /// Maximum number of consecutive topic updates a hot table may skip
    /// before it is force-included regardless of its version.
    pub max_skipped_topic_updates: u32,

    /// Permits on the partial object fetch gate.
    pub max_parallel_partial_fetch: usize,

    /// How long a partial fetch waits for a gate permit before failing.
    pub partial_fetch_queue_timeout: Duration,

    /// Absolute deadline for acquiring a table lock.
    pub table_lock_timeout: Duration,

    /// Sleep between table lock acquisition attempts.
    pub table_lock_retry: Duration,

    /// Submit invalidated tables to the loader instead of waiting for the
    /// first access.
    pub load_in_background: bool,

    /// Worker threads in the table loader pool.
    pub num_loading_threads: usize,

    /// Topic update log entries are retained for this many topic updates
    /// after they were last written. Kept large so that slow SYNC_DDL
    /// waiters do not observe their entries garbage collected.
    pub topic_update_log_retention: usize,

    /// Poll interval for the HDFS cache pool reader.
    pub cache_pool_poll_interval: Duration,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            topic_mode: TopicMode::default(),
            max_skipped_topic_updates: 2,
            max_parallel_partial_fetch: 32,
            partial_fetch_queue_timeout: Duration::from_secs(60),
            table_lock_timeout: Duration::from_millis(7_200_000),
            table_lock_retry: Duration::from_millis(10),
            load_in_background: false,
            num_loading_threads: 16,
            topic_update_log_retention: 1000,
            cache_pool_poll_interval: Duration::from_secs(60),
        }
    }
}
