//! Database and library configuration.

/// Configuration for opening a database and the services around it.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether to create the database if it doesn't exist.
    pub create_if_missing: bool,

    /// Whether to error if the database already exists.
    pub error_if_exists: bool,

    /// Whether to flush the WAL on every record append.
    pub sync_on_commit: bool,

    /// WAL size that triggers an automatic checkpoint (0 = never).
    pub checkpoint_wal_bytes: u64,

    /// Number of search-indexing worker threads.
    pub search_workers: usize,

    /// Maximum pending search tasks before new ones are dropped.
    pub search_queue_capacity: usize,

    /// Attempts per search task before it is logged and discarded.
    pub search_max_attempts: u32,

    /// Events kept for polling subscribers.
    pub event_history: usize,

    /// Resolution attempts when concurrent creates race on one name.
    pub resolver_max_attempts: u32,

    /// Page size used when a caller passes 0.
    pub default_page_size: usize,

    /// Upper bound for any page.
    pub max_page_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            error_if_exists: false,
            sync_on_commit: true,
            checkpoint_wal_bytes: 64 * 1024 * 1024, // 64 MB
            search_workers: 2,
            search_queue_capacity: 1024,
            search_max_attempts: 3,
            event_history: 10_000,
            resolver_max_attempts: 3,
            default_page_size: 50,
            max_page_size: 500,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the database if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether to error if database exists.
    #[must_use]
    pub const fn error_if_exists(mut self, value: bool) -> Self {
        self.error_if_exists = value;
        self
    }

    /// Sets whether to sync WAL on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets the automatic checkpoint threshold.
    #[must_use]
    pub const fn checkpoint_wal_bytes(mut self, bytes: u64) -> Self {
        self.checkpoint_wal_bytes = bytes;
        self
    }

    /// Sets the number of search workers.
    #[must_use]
    pub const fn search_workers(mut self, workers: usize) -> Self {
        self.search_workers = workers;
        self
    }

    /// Sets the search queue capacity.
    #[must_use]
    pub const fn search_queue_capacity(mut self, capacity: usize) -> Self {
        self.search_queue_capacity = capacity;
        self
    }

    /// Sets the attempts per search task.
    #[must_use]
    pub const fn search_max_attempts(mut self, attempts: u32) -> Self {
        self.search_max_attempts = attempts;
        self
    }

    /// Sets the polled event history size.
    #[must_use]
    pub const fn event_history(mut self, events: usize) -> Self {
        self.event_history = events;
        self
    }

    /// Sets the resolver retry bound.
    #[must_use]
    pub const fn resolver_max_attempts(mut self, attempts: u32) -> Self {
        self.resolver_max_attempts = attempts;
        self
    }

    /// Sets default and maximum page sizes.
    #[must_use]
    pub const fn page_sizes(mut self, default: usize, max: usize) -> Self {
        self.default_page_size = default;
        self.max_page_size = max;
        self
    }

    /// Clamps a requested page size into `1..=max_page_size`.
    #[must_use]
    pub fn page_limit(&self, requested: usize) -> usize {
        let max = self.max_page_size.max(1);
        match requested {
            0 => self.default_page_size.clamp(1, max),
            n => n.min(max),
        }
    }
}
