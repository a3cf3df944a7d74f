//! Engine-wide tunables, matching the options of SPEC_FULL.md §6. Parsing
//! a config file is out of scope; callers build an `EngineConfig` in code
//! and pass it to whatever constructs the table/lifecycle controller.

#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Bytes of live data in the writable segment before it's frozen.
    pub writable_flush_size: usize,
    /// Upper bound, in bytes, on an adjacent-merge run.
    pub merge_max_size: usize,
    /// Upper bound on the number of segments combined in one merge.
    pub merge_max_count: usize,
    /// Fraction of tombstoned rows in a segment that triggers a purge.
    pub purge_delete_threshold: f64,
    /// Concurrent read-transaction ticket count.
    pub concurrent_read_tickets: usize,
    /// Concurrent write-transaction ticket count.
    pub concurrent_write_tickets: usize,
    /// Whether readonly segment files are faulted in eagerly on open.
    pub mmap_populate: bool,
    /// Byte cap on the `matchRegex` product-construction scan.
    pub regex_match_mem_limit: usize,
    /// Retries before an upsert surfaces `NeedRetry`.
    pub upsert_max_retry: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            writable_flush_size: 64 * 1024 * 1024,
            merge_max_size: 512 * 1024 * 1024,
            merge_max_count: 8,
            purge_delete_threshold: 0.3,
            concurrent_read_tickets: 128,
            concurrent_write_tickets: 128,
            mmap_populate: false,
            regex_match_mem_limit: 64 * 1024 * 1024,
            upsert_max_retry: 3,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn new() -> Self {
        EngineConfigBuilder {
            config: EngineConfig::default(),
        }
    }

    pub fn writable_flush_size(mut self, bytes: usize) -> Self {
        self.config.writable_flush_size = bytes;
        self
    }

    pub fn merge_max_size(mut self, bytes: usize) -> Self {
        self.config.merge_max_size = bytes;
        self
    }

    pub fn merge_max_count(mut self, count: usize) -> Self {
        self.config.merge_max_count = count;
        self
    }

    pub fn purge_delete_threshold(mut self, fraction: f64) -> Self {
        self.config.purge_delete_threshold = fraction;
        self
    }

    pub fn concurrent_read_tickets(mut self, count: usize) -> Self {
        self.config.concurrent_read_tickets = count;
        self
    }

    pub fn concurrent_write_tickets(mut self, count: usize) -> Self {
        self.config.concurrent_write_tickets = count;
        self
    }

    pub fn mmap_populate(mut self, populate: bool) -> Self {
        self.config.mmap_populate = populate;
        self
    }

    pub fn regex_match_mem_limit(mut self, bytes: usize) -> Self {
        self.config.regex_match_mem_limit = bytes;
        self
    }

    pub fn upsert_max_retry(mut self, retries: u32) -> Self {
        self.config.upsert_max_retry = retries;
        self
    }

    pub fn build(self) -> EngineConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_documented_defaults() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.concurrent_read_tickets, 128);
        assert_eq!(cfg.concurrent_write_tickets, 128);
        assert_eq!(cfg.upsert_max_retry, 3);
    }

    #[test]
    fn builder_overrides_individual_fields() {
        let cfg = EngineConfigBuilder::new().concurrent_read_tickets(8).upsert_max_retry(1).build();
        assert_eq!(cfg.concurrent_read_tickets, 8);
        assert_eq!(cfg.upsert_max_retry, 1);
        assert_eq!(cfg.concurrent_write_tickets, 128);
    }
}
