//! RuleSet: the ranked rule list, rank management and evaluation.

mod config;

pub use config::{GroupConfig, RestrictConfig};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::group::{GroupRegistry, ALL_GROUP};
use crate::rule::{compile_pattern, NewRule, Rule, RuleId, RuleRecord};
use crate::store::{MemoryRuleStore, RuleStore};
use crate::Action;

/// Rank of the default rule seeded into an empty store.
pub const DEFAULT_RULE_RANK: u32 = 65536;

/// Automatically assigned ranks only look at ranks below this ceiling,
/// so new rules land before the default rule.
pub const AUTO_RANK_CEILING: u32 = 65000;

/// URL pattern of the default rule.
pub const DEFAULT_URL_PATTERN: &str = ".*";

/// One rule's outcome when explaining a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleMatch {
    pub rule: RuleRecord,
    pub url_matches: bool,
    pub ip_matches: bool,
}

impl RuleMatch {
    /// Whether the rule matched the whole request.
    pub fn matched(&self) -> bool {
        self.url_matches && self.ip_matches
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Up,
    Down,
}

/// RuleSet owns the ordered rules and is the only place ranks change.
///
/// Rules are evaluated by ascending rank (ties by id) and the first rule
/// whose URL pattern and IP group both match decides. The default rule
/// (`.*` from `ALL`, allow) makes sure some rule always matches.
///
/// Evaluation reads an immutable snapshot and takes no locks. Each
/// administrative change goes through the store under a mutex and then
/// publishes a freshly compiled snapshot, so a concurrent evaluation sees
/// either the old rules or the new ones.
pub struct RuleSet {
    store: Arc<dyn RuleStore>,
    groups: Arc<GroupRegistry>,
    /// Compiled rules in evaluation order
    snapshot: ArcSwap<Vec<Rule>>,
    /// Serializes administrative changes
    admin: Mutex<()>,
}

impl RuleSet {
    /// Create a RuleSet over a store and a group registry.
    ///
    /// An empty store is seeded with the default rule. Fails if a stored
    /// rule has an invalid pattern or refers to an unknown group.
    pub fn new(store: Arc<dyn RuleStore>, groups: Arc<GroupRegistry>) -> Result<Self> {
        let ruleset = Self {
            store,
            groups,
            snapshot: ArcSwap::from_pointee(Vec::new()),
            admin: Mutex::new(()),
        };

        if ruleset.store.rules()?.is_empty() {
            let default_rule = NewRule::new(DEFAULT_URL_PATTERN, ALL_GROUP, Action::Allow);
            ruleset.store.insert(default_rule, DEFAULT_RULE_RANK)?;
        }
        ruleset.publish()?;

        Ok(ruleset)
    }

    /// Create a RuleSet with an in-memory store and only the `ALL` group.
    pub fn in_memory() -> Result<Self> {
        Self::new(
            Arc::new(MemoryRuleStore::new()),
            Arc::new(GroupRegistry::new()),
        )
    }

    /// The group registry rules are resolved against.
    pub fn groups(&self) -> &Arc<GroupRegistry> {
        &self.groups
    }

    /// Re-read the store and publish a new snapshot.
    pub fn reload(&self) -> Result<()> {
        let _guard = self.admin.lock();
        self.publish()
    }

    /// Reload every IP group, then re-read the store and publish.
    ///
    /// Runs under the same lock as the other administrative changes. If
    /// any group fails to compile, no group and no rule changes.
    pub fn reload_groups(&self) -> Result<()> {
        let _guard = self.admin.lock();
        self.groups.load_all()?;
        self.publish()
    }

    /// Callers hold `admin`, except `new` which has exclusive access.
    fn publish(&self) -> Result<()> {
        let rules = self
            .store
            .rules()?
            .into_iter()
            .map(|record| self.compile(record))
            .collect::<Result<Vec<_>>>()?;
        log::debug!("Published rule set with {} rules", rules.len());
        self.snapshot.store(Arc::new(rules));
        Ok(())
    }

    fn compile(&self, record: RuleRecord) -> Result<Rule> {
        let group = self
            .groups
            .get(&record.ip_group)
            .ok_or_else(|| Error::UnknownGroup(record.ip_group.clone()))?;
        Rule::compile(record, group)
    }

    fn validate(&self, url_pattern: &str, ip_group: &str) -> Result<()> {
        compile_pattern(url_pattern)?;
        if !self.groups.contains(ip_group) {
            return Err(Error::UnknownGroup(ip_group.to_string()));
        }
        Ok(())
    }

    /// Next automatic rank: one past the highest rank below the ceiling.
    fn next_rank(&self) -> Result<u32> {
        let highest = self
            .store
            .rules()?
            .iter()
            .map(|r| r.rank)
            .filter(|&rank| rank < AUTO_RANK_CEILING)
            .max();
        Ok(highest.map_or(1, |rank| rank + 1))
    }

    /// Create a rule.
    ///
    /// Without an explicit rank the rule is placed after every other rule
    /// below the ceiling. An explicit rank is used as-is, even if another
    /// rule already has it; no other rule is renumbered.
    pub fn create(&self, rule: NewRule) -> Result<RuleRecord> {
        let _guard = self.admin.lock();
        self.validate(&rule.url_pattern, &rule.ip_group)?;

        let rank = match rule.rank {
            Some(rank) => rank,
            None => self.next_rank()?,
        };
        let record = self.store.insert(rule, rank)?;
        log::debug!("Created rule {} at rank {}", record.id, record.rank);

        self.publish()?;
        Ok(record)
    }

    /// Update a rule's pattern, group and action. The rank is never
    /// changed; the returned record carries the stored rank.
    pub fn update(&self, rule: &RuleRecord) -> Result<RuleRecord> {
        let _guard = self.admin.lock();
        let existing = self
            .store
            .get(rule.id)?
            .ok_or(Error::UnknownRule(rule.id))?;
        self.validate(&rule.url_pattern, &rule.ip_group)?;

        let updated = RuleRecord {
            rank: existing.rank,
            ..rule.clone()
        };
        self.store.update(&updated)?;

        self.publish()?;
        Ok(updated)
    }

    /// Swap ranks with the nearest rule of strictly lower rank.
    ///
    /// Rules sharing this rule's rank are skipped, so a rule tied with its
    /// predecessor still moves ahead of it. Returns `false` (and changes
    /// nothing) when no rule has a lower rank.
    pub fn move_up(&self, id: RuleId) -> Result<bool> {
        self.swap_with_neighbour(id, Direction::Up)
    }

    /// Swap ranks with the nearest rule of strictly higher rank.
    ///
    /// Returns `false` (and changes nothing) when no rule has a higher
    /// rank. The default rule gets no special treatment, so a rule can be
    /// moved below it.
    pub fn move_down(&self, id: RuleId) -> Result<bool> {
        self.swap_with_neighbour(id, Direction::Down)
    }

    fn swap_with_neighbour(&self, id: RuleId, direction: Direction) -> Result<bool> {
        let _guard = self.admin.lock();
        let rules = self.store.rules()?;
        let pos = rules
            .iter()
            .position(|r| r.id == id)
            .ok_or(Error::UnknownRule(id))?;
        let rule = &rules[pos];

        let neighbour = match direction {
            Direction::Up => rules[..pos].iter().rev().find(|r| r.rank < rule.rank),
            Direction::Down => rules[pos + 1..].iter().find(|r| r.rank > rule.rank),
        };
        let Some(other) = neighbour else {
            return Ok(false);
        };

        self.store
            .set_ranks(&[(rule.id, other.rank), (other.id, rule.rank)])?;
        log::debug!(
            "Moved rule {} {:?}: rank {} -> {}",
            rule.id,
            direction,
            rule.rank,
            other.rank
        );

        self.publish()?;
        Ok(true)
    }

    /// Decide a request: the action of the first rule matching both the
    /// path and the client address.
    pub fn evaluate(&self, url: &str, ip: &str) -> Action {
        self.evaluate_with_match(url, ip).0
    }

    /// Like [`evaluate`](Self::evaluate), also returning the deciding rule.
    ///
    /// If the default rule has been edited so that nothing matches, the
    /// request is denied and no rule is returned.
    pub fn evaluate_with_match(&self, url: &str, ip: &str) -> (Action, Option<RuleRecord>) {
        let rules = self.snapshot.load();
        match rules.iter().find(|rule| rule.matches(url, ip)) {
            Some(rule) => (rule.action(), Some(rule.record().clone())),
            None => {
                log::warn!("No rule matched {} from {}, denying", url, ip);
                (Action::Deny, None)
            }
        }
    }

    /// Report, for every rule in evaluation order, whether its URL pattern
    /// and its IP group match the request.
    pub fn explain(&self, url: &str, ip: &str) -> Vec<RuleMatch> {
        self.snapshot
            .load()
            .iter()
            .map(|rule| RuleMatch {
                rule: rule.record().clone(),
                url_matches: rule.matches_url(url),
                ip_matches: rule.matches_ip(ip),
            })
            .collect()
    }

    /// All rules in evaluation order.
    pub fn rules(&self) -> Vec<RuleRecord> {
        self.snapshot
            .load()
            .iter()
            .map(|rule| rule.record().clone())
            .collect()
    }

    /// Get one rule from the current snapshot.
    pub fn get(&self, id: RuleId) -> Option<RuleRecord> {
        self.snapshot
            .load()
            .iter()
            .find(|rule| rule.id() == id)
            .map(|rule| rule.record().clone())
    }

    /// Get the number of rules.
    pub fn len(&self) -> usize {
        self.snapshot.load().len()
    }

    /// Check if the rule set has no rules (only after the default rule
    /// has been removed from the store by someone else).
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
