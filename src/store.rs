//! Rule storage.
//!
//! The rule set only needs an ordered repository of [`RuleRecord`]s; where
//! they live is up to the embedding application. [`MemoryRuleStore`] keeps
//! them in process.

use ahash::AHashMap;
use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::rule::{NewRule, RuleId, RuleRecord};

/// Ordered repository of rules.
///
/// Stores persist records; they never pick ranks themselves. The rule set
/// decides every rank and hands it to the store.
pub trait RuleStore: Send + Sync {
    /// All rules ordered by rank, ties broken by id.
    fn rules(&self) -> Result<Vec<RuleRecord>>;

    /// Get one rule.
    fn get(&self, id: RuleId) -> Result<Option<RuleRecord>>;

    /// Persist a new rule at `rank`, assigning it a fresh id.
    fn insert(&self, rule: NewRule, rank: u32) -> Result<RuleRecord>;

    /// Persist the pattern, group and action of an existing rule.
    /// The stored rank is left alone.
    fn update(&self, rule: &RuleRecord) -> Result<()>;

    /// Set the ranks of several rules at once. Either all changes are
    /// applied or none.
    fn set_ranks(&self, ranks: &[(RuleId, u32)]) -> Result<()>;
}

#[derive(Debug, Default)]
struct MemoryInner {
    rules: AHashMap<RuleId, RuleRecord>,
    next_id: u64,
}

/// In-memory rule store.
#[derive(Debug, Default)]
pub struct MemoryRuleStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryRuleStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of stored rules.
    pub fn len(&self) -> usize {
        self.inner.read().rules.len()
    }

    /// Check if the store holds no rules.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RuleStore for MemoryRuleStore {
    fn rules(&self) -> Result<Vec<RuleRecord>> {
        let mut rules: Vec<RuleRecord> = self.inner.read().rules.values().cloned().collect();
        rules.sort_by_key(|r| (r.rank, r.id));
        Ok(rules)
    }

    fn get(&self, id: RuleId) -> Result<Option<RuleRecord>> {
        Ok(self.inner.read().rules.get(&id).cloned())
    }

    fn insert(&self, rule: NewRule, rank: u32) -> Result<RuleRecord> {
        let mut inner = self.inner.write();
        inner.next_id += 1;
        let record = RuleRecord {
            id: RuleId(inner.next_id),
            url_pattern: rule.url_pattern,
            ip_group: rule.ip_group,
            action: rule.action,
            rank,
        };
        inner.rules.insert(record.id, record.clone());
        Ok(record)
    }

    fn update(&self, rule: &RuleRecord) -> Result<()> {
        let mut inner = self.inner.write();
        let stored = inner
            .rules
            .get_mut(&rule.id)
            .ok_or(Error::UnknownRule(rule.id))?;
        stored.url_pattern = rule.url_pattern.clone();
        stored.ip_group = rule.ip_group.clone();
        stored.action = rule.action;
        Ok(())
    }

    fn set_ranks(&self, ranks: &[(RuleId, u32)]) -> Result<()> {
        let mut inner = self.inner.write();
        if let Some((missing, _)) = ranks.iter().find(|(id, _)| !inner.rules.contains_key(id)) {
            return Err(Error::UnknownRule(*missing));
        }
        for (id, rank) in ranks {
            if let Some(rule) = inner.rules.get_mut(id) {
                rule.rank = *rank;
            }
        }
        Ok(())
    }
}
