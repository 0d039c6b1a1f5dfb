use crate::record::{AttributeList, EventId, LogLevel};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Predicate applied to a candidate record's attributes after the cheap
/// category/level/event-id filters have passed.
pub type AttributePredicate = Arc<dyn Fn(&AttributeList) -> bool + Send + Sync>;

/// A single buffering rule. All fields are optional; `None` means the rule
/// does not constrain that dimension.
///
/// A category ending in `*` matches any candidate category it is a prefix
/// of. The level is an upper bound: a rule with `level = Some(Warn)`
/// applies to records at `Warn` and below.
#[derive(Clone, Default)]
pub struct FilterRule {
    pub category: Option<String>,
    pub level: Option<LogLevel>,
    pub event_id: Option<i64>,
    pub predicate: Option<AttributePredicate>,
}

impl FilterRule {
    /// A wildcard rule matching every record.
    pub fn new() -> Self {
        FilterRule::default()
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = Some(level);
        self
    }

    pub fn with_event_id(mut self, event_id: i64) -> Self {
        self.event_id = Some(event_id);
        self
    }

    pub fn with_predicate(
        mut self,
        predicate: impl Fn(&AttributeList) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.predicate = Some(Arc::new(predicate));
        self
    }
}

impl fmt::Debug for FilterRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterRule")
            .field("category", &self.category)
            .field("level", &self.level)
            .field("event_id", &self.event_id)
            .field("predicate", &self.predicate.as_ref().map(|_| ".."))
            .finish()
    }
}

/// An immutable generation of filter rules.
///
/// A rule set is replaced wholesale when configuration changes; readers
/// clone the inner `Arc` and can never observe a partially updated set.
/// The generation number lets selector caches detect the swap.
#[derive(Clone)]
pub struct RuleSet {
    rules: Arc<[FilterRule]>,
    generation: u64,
}

impl RuleSet {
    pub fn new(rules: Vec<FilterRule>, generation: u64) -> Self {
        RuleSet { rules: rules.into(), generation }
    }

    pub fn empty() -> Self {
        RuleSet { rules: Arc::from(Vec::new()), generation: 0 }
    }

    pub fn rules(&self) -> &[FilterRule] {
        &self.rules
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// How precisely a rule's category constrained the candidate. Higher wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Specificity {
    Wildcard,
    Prefix,
    Exact,
}

fn category_specificity(rule_category: Option<&str>, candidate: &str) -> Option<Specificity> {
    match rule_category {
        None => Some(Specificity::Wildcard),
        Some(pattern) => {
            if let Some(prefix) = pattern.strip_suffix('*') {
                if candidate.starts_with(prefix) {
                    Some(Specificity::Prefix)
                } else {
                    None
                }
            } else if pattern == candidate {
                Some(Specificity::Exact)
            } else {
                None
            }
        }
    }
}

type CacheKey = (String, LogLevel, i64);
type CacheEntry = (u64, Option<usize>);

/// Selects the most specific rule matching a candidate record.
///
/// Selection by category, level and event id is cached per rule-set
/// generation; attribute predicates depend on per-record data and run on
/// every call. When the rule-set generation changes the whole cache is
/// dropped, not diffed.
pub struct RuleSelector {
    cache: RwLock<HashMap<CacheKey, CacheEntry>>,
    cached_generation: AtomicU64,
}

impl Default for RuleSelector {
    fn default() -> Self {
        RuleSelector::new()
    }
}

impl RuleSelector {
    pub fn new() -> Self {
        RuleSelector {
            cache: RwLock::new(HashMap::new()),
            cached_generation: AtomicU64::new(0),
        }
    }

    /// Pick the rule that applies to the candidate, or `None` when no rule
    /// matches. The caller interprets `None` as "log normally, do not
    /// buffer".
    pub fn select<'a>(
        &self,
        rule_set: &'a RuleSet,
        category: &str,
        level: LogLevel,
        event_id: &EventId,
        attributes: &AttributeList,
    ) -> Option<&'a FilterRule> {
        let generation = rule_set.generation();
        if self.cached_generation.load(Ordering::Acquire) != generation {
            let mut cache = self.cache.write();
            // Re-check under the write lock; another thread may have
            // already swapped the cache for this generation.
            if self.cached_generation.load(Ordering::Acquire) != generation {
                cache.clear();
                self.cached_generation.store(generation, Ordering::Release);
            }
        }

        let key: CacheKey = (category.to_owned(), level, event_id.id);
        // Entries carry the generation they were computed for: a clear
        // racing this lookup may run between the check above and the
        // insert below, so neither read nor insert may trust the cache
        // to hold entries of the current generation only.
        let cached = match self.cache.read().get(&key) {
            Some(&(entry_generation, index)) if entry_generation == generation => Some(index),
            _ => None,
        };
        let index = match cached {
            Some(index) => index,
            None => {
                let index = best_match(rule_set.rules(), category, level, event_id);
                self.cache.write().insert(key, (generation, index));
                index
            }
        };

        let rule = index.and_then(|i| rule_set.rules().get(i))?;
        match &rule.predicate {
            Some(predicate) if !predicate(attributes) => None,
            _ => Some(rule),
        }
    }
}

/// Index of the most specific rule passing the category, level and
/// event-id filters. Ties go to the first rule in declaration order.
fn best_match(
    rules: &[FilterRule],
    category: &str,
    level: LogLevel,
    event_id: &EventId,
) -> Option<usize> {
    let mut best: Option<(Specificity, usize)> = None;
    for (index, rule) in rules.iter().enumerate() {
        let Some(specificity) = category_specificity(rule.category.as_deref(), category) else {
            continue;
        };
        if let Some(max_level) = rule.level {
            if max_level < level {
                continue;
            }
        }
        if let Some(rule_event) = rule.event_id {
            if rule_event != event_id.id {
                continue;
            }
        }
        match best {
            Some((current, _)) if current >= specificity => {}
            _ => best = Some((specificity, index)),
        }
    }
    best.map(|(_, index)| index)
}
