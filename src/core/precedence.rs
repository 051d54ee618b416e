use super::{ActivityId, ResourceId, Time};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

/// Ordered activity pair, the identity of a precedence.
pub type PairKey = (ActivityId, ActivityId);

/// `pred` must end before `succ` starts, posted because of `resource`.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Precedence {
    pub resource: ResourceId,
    pub pred: ActivityId,
    pub succ: ActivityId,
    /// Latest start of `succ` minus earliest end of `pred` when the precedence was chosen.
    pub slack: Time,
    /// Whether relaxation may remove it.
    pub critical: bool,
}

impl Precedence {
    /// Creates a critical precedence without slack information.
    #[must_use]
    pub const fn new(resource: ResourceId, pred: ActivityId, succ: ActivityId) -> Self {
        Self::with_slack(resource, pred, succ, 0)
    }

    /// Creates a critical precedence remembering its slack.
    #[must_use]
    pub const fn with_slack(
        resource: ResourceId,
        pred: ActivityId,
        succ: ActivityId,
        slack: Time,
    ) -> Self {
        Self {
            resource,
            pred,
            succ,
            slack,
            critical: true,
        }
    }

    /// The `(pred, succ)` pair.
    #[must_use]
    pub const fn key(&self) -> PairKey {
        (self.pred, self.succ)
    }
}

impl Display for Precedence {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{{}<{}}}", self.pred, self.succ)
    }
}

/// Orders candidate precedences by slack, largest first, then by pair.
#[must_use]
pub fn slack_comparator(first: &Precedence, second: &Precedence) -> Ordering {
    match second.slack.cmp(&first.slack) {
        Ordering::Equal => first.key().cmp(&second.key()),
        order => order,
    }
}

/// Set of precedences keyed by `(pred, succ)`, iterated in key order.
///
/// Every mutation bumps the version. Equality ignores the version.
#[derive(Clone, Debug, Default)]
pub struct PrecedenceSet {
    precedences: BTreeMap<PairKey, Precedence>,
    version: u64,
}

impl PrecedenceSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts the precedence. Returns `false` if the pair is already present.
    pub fn insert(&mut self, precedence: Precedence) -> bool {
        if self.precedences.contains_key(&precedence.key()) {
            return false;
        }
        self.precedences.insert(precedence.key(), precedence);
        self.version += 1;
        true
    }

    /// Removes the precedence on the pair, if any.
    pub fn remove(&mut self, key: PairKey) -> Option<Precedence> {
        let removed = self.precedences.remove(&key);
        if removed.is_some() {
            self.version += 1;
        }
        removed
    }

    /// Marks the precedence on the pair as critical or not. Returns `false` if absent.
    pub fn set_critical(&mut self, key: PairKey, critical: bool) -> bool {
        match self.precedences.get_mut(&key) {
            Some(precedence) => {
                precedence.critical = critical;
                self.version += 1;
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn contains(&self, key: PairKey) -> bool {
        self.precedences.contains_key(&key)
    }

    #[must_use]
    pub fn get(&self, key: PairKey) -> Option<&Precedence> {
        self.precedences.get(&key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Precedence> {
        self.precedences.values()
    }

    /// Snapshot of the keys, safe to hold while the set is mutated.
    #[must_use]
    pub fn keys(&self) -> Vec<PairKey> {
        self.precedences.keys().copied().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.precedences.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.precedences.is_empty()
    }

    pub fn clear(&mut self) {
        if !self.precedences.is_empty() {
            self.precedences.clear();
            self.version += 1;
        }
    }

    /// Number of mutations so far.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }
}

impl PartialEq for PrecedenceSet {
    fn eq(&self, other: &Self) -> bool {
        self.precedences == other.precedences
    }
}

impl Eq for PrecedenceSet {}

impl Display for PrecedenceSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for precedence in self.iter() {
            write!(f, "{precedence}")?;
        }
        Ok(())
    }
}

impl FromIterator<Precedence> for PrecedenceSet {
    fn from_iter<T: IntoIterator<Item = Precedence>>(iter: T) -> Self {
        let mut set = Self::new();
        for precedence in iter {
            set.insert(precedence);
        }
        set
    }
}
