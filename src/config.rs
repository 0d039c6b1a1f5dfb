use crate::filter::{FilterRule, RuleSet};
use chrono::Duration;
use parking_lot::RwLock;
use std::sync::Arc;

/// Tunables for the buffering subsystem.
///
/// Capacity is accounted in bytes, using the sizes computed by the
/// serializer. Rules decide which records are buffered at all; with no
/// rules nothing is buffered and every record is logged normally.
#[derive(Clone, Debug)]
pub struct BufferingConfig {
    /// Soft byte capacity of each buffer. Exceeding it triggers
    /// oldest-first trimming, never blocking.
    pub per_buffer_capacity_bytes: usize,
    /// Records whose serialized size exceeds this are not buffered.
    pub max_record_size_bytes: usize,
    /// How long a buffer rejects enqueues after a flush.
    pub suspend_after_flush: Duration,
    /// Rolling window after which a per-scope buffer re-runs trimming even
    /// without an explicit flush.
    pub truncate_after: Duration,
    pub rules: Vec<FilterRule>,
}

impl Default for BufferingConfig {
    fn default() -> Self {
        BufferingConfig {
            per_buffer_capacity_bytes: 5_000_000,
            max_record_size_bytes: 50_000,
            suspend_after_flush: Duration::seconds(30),
            truncate_after: Duration::seconds(5),
            rules: Vec::new(),
        }
    }
}

impl BufferingConfig {
    /// Clamp degenerate values to workable minimums.
    fn normalized(mut self) -> Self {
        self.per_buffer_capacity_bytes = self.per_buffer_capacity_bytes.max(1024);
        self.max_record_size_bytes = self.max_record_size_bytes.max(256);
        if self.suspend_after_flush < Duration::zero() {
            self.suspend_after_flush = Duration::zero();
        }
        if self.truncate_after < Duration::milliseconds(10) {
            self.truncate_after = Duration::milliseconds(10);
        }
        self
    }
}

struct Snapshot {
    config: Arc<BufferingConfig>,
    rules: RuleSet,
}

/// Process-wide configuration state with hot-swap semantics.
///
/// `current` and `rule_set` return atomic snapshots; `update` replaces the
/// whole snapshot and bumps the rule-set generation, so selector caches
/// invalidate and no reader ever sees a half-applied change.
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<Snapshot>>,
}

impl ConfigHandle {
    pub fn new(config: BufferingConfig) -> Self {
        let config = config.normalized();
        let rules = RuleSet::new(config.rules.clone(), 1);
        ConfigHandle {
            inner: Arc::new(RwLock::new(Snapshot { config: Arc::new(config), rules })),
        }
    }

    /// The latest configuration snapshot.
    pub fn current(&self) -> Arc<BufferingConfig> {
        Arc::clone(&self.inner.read().config)
    }

    /// The latest rule-set generation.
    pub fn rule_set(&self) -> RuleSet {
        self.inner.read().rules.clone()
    }

    /// Replace the configuration wholesale.
    pub fn update(&self, config: BufferingConfig) {
        let config = config.normalized();
        let mut snapshot = self.inner.write();
        let generation = snapshot.rules.generation() + 1;
        snapshot.rules = RuleSet::new(config.rules.clone(), generation);
        snapshot.config = Arc::new(config);
    }
}

impl Default for ConfigHandle {
    fn default() -> Self {
        ConfigHandle::new(BufferingConfig::default())
    }
}
