use super::engine::{orderable_pairs, Bounds, Usage, ViolationInfo};
use super::{ActivityId, Time};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

/// Remaining capacity of one resource over time.
///
/// Holds only what it read at construction: the capacity and the bounds of every usage.
/// It must be rebuilt whenever the propagated bounds change.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResourceProfile {
    capacity: i64,
    levels: BTreeMap<Time, i64>,
    usages: Vec<(ActivityId, i64, Bounds)>,
}

impl ResourceProfile {
    /// Creates a profile with no activities: `capacity` everywhere from time 0.
    #[must_use]
    pub fn new(capacity: i64) -> Self {
        Self {
            capacity,
            levels: BTreeMap::from([(0, capacity)]),
            usages: Vec::new(),
        }
    }

    /// Builds the profile from usages and their current bounds.
    #[must_use]
    pub fn build(capacity: i64, usages: impl IntoIterator<Item = (Usage, Bounds)>) -> Self {
        let mut profile = Self::new(capacity);
        for (usage, bounds) in usages {
            profile.add(usage.activity, usage.quantity, bounds);
        }
        profile
    }

    /// Subtracts `quantity` over `[start_lb, end_lb)` of the activity.
    pub fn add(&mut self, activity: ActivityId, quantity: i64, bounds: Bounds) {
        self.usages.push((activity, quantity, bounds));

        let (start, end) = (bounds.start_lb, bounds.end_lb);
        if end <= start || quantity == 0 {
            return;
        }

        let end_level = self.level(end);
        let start_level = self.level(start);
        self.levels.insert(end, end_level);
        self.levels.insert(start, start_level);

        for (_, level) in self.levels.range_mut(start..end) {
            *level -= quantity;
        }
    }

    /// Capacity of the resource.
    #[must_use]
    pub const fn capacity(&self) -> i64 {
        self.capacity
    }

    /// Remaining capacity at `time`.
    #[must_use]
    pub fn level(&self, time: Time) -> i64 {
        self.levels
            .range(..=time)
            .next_back()
            .map_or(self.capacity, |(_, &level)| level)
    }

    /// Whether the resource is over capacity at `time`.
    #[must_use]
    pub fn is_violated(&self, time: Time) -> bool {
        self.level(time) < 0
    }

    /// Breakpoints in ascending time order.
    pub fn breakpoints(&self) -> impl Iterator<Item = (Time, i64)> + '_ {
        self.levels.iter().map(|(&time, &level)| (time, level))
    }

    /// The time with the lowest negative level, the earliest one on ties.
    #[must_use]
    pub fn max_violation(&self) -> Option<ViolationInfo> {
        let mut worst: Option<ViolationInfo> = None;

        for (time, level) in self.breakpoints() {
            if level < 0 && worst.map_or(true, |w| level < w.level) {
                worst = Some(ViolationInfo { time, level });
            }
        }

        worst
    }

    /// Orderable pairs among the activities covering `time`, ordered by key.
    #[must_use]
    pub fn conflict_set(&self, time: Time) -> Vec<(ActivityId, ActivityId)> {
        let mut covering: Vec<_> = self
            .usages
            .iter()
            .filter(|(_, quantity, bounds)| *quantity > 0 && bounds.covers(time))
            .map(|&(activity, _, bounds)| (activity, bounds))
            .collect();
        covering.sort_unstable_by_key(|(activity, _)| *activity);

        orderable_pairs(&covering)
    }
}

impl Display for ResourceProfile {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "capacity {} [", self.capacity)?;
        for (i, (time, level)) in self.breakpoints().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{time}:{level}")?;
        }
        write!(f, "]")
    }
}
