use super::{ActivityId, ResourceId, Time};

/// Current propagated bounds of one activity.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct Bounds {
    pub start_lb: Time,
    pub start_ub: Time,
    pub end_lb: Time,
    pub end_ub: Time,
}

impl Bounds {
    /// Whether the activity occupies `time` when started as early as possible.
    #[must_use]
    pub const fn covers(&self, time: Time) -> bool {
        self.start_lb <= time && time < self.end_lb
    }

    /// Slack left if `self` is ordered before `succ`: latest start of the successor minus
    /// earliest end of `self`. Negative slack means the ordering can never hold.
    #[must_use]
    pub const fn slack_before(&self, succ: &Self) -> Time {
        succ.start_ub - self.end_lb
    }
}

/// An activity using a resource together with its demand.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Usage {
    pub activity: ActivityId,
    pub quantity: i64,
}

/// Static description of a resource as seen by the engine.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ResourceInfo {
    pub id: ResourceId,
    pub name: String,
    pub capacity: i64,
}

/// The most over-subscribed point of a resource.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ViolationInfo {
    pub time: Time,
    pub level: i64,
}

/// Errors reported by an engine when it's asked to do something impossible.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("unknown activity {0}")]
    UnknownActivity(ActivityId),
    #[error("unknown resource {0}")]
    UnknownResource(ResourceId),
    #[error("no precedence {{{pred}<{succ}}} on resource {resource}")]
    MissingPrecedence {
        resource: ResourceId,
        pred: ActivityId,
        succ: ActivityId,
    },
}

/// Temporal constraint propagation engine the solvers drive.
///
/// The engine owns activity bounds and the constraint store. Solvers only read bounds and
/// post or retract precedences; every mutation is propagated immediately unless batch mode
/// is on.
pub trait Engine {
    /// All activities ordered by key.
    fn activities(&self) -> Vec<ActivityId>;

    /// All capacity resources ordered by id.
    fn resources(&self) -> Vec<ResourceInfo>;

    /// Current bounds of an activity.
    ///
    /// # Errors
    /// - If the activity is unknown.
    fn activity_bounds(&self, activity: ActivityId) -> Result<Bounds, EngineError>;

    /// Activities using a resource, ordered by key.
    ///
    /// # Errors
    /// - If the resource is unknown.
    fn resource_activities(&self, resource: ResourceId) -> Result<Vec<Usage>, EngineError>;

    /// Posts `pred` before `succ` on behalf of `resource`.
    ///
    /// # Errors
    /// - If an activity or the resource is unknown.
    fn add_precedence(
        &mut self,
        resource: ResourceId,
        pred: ActivityId,
        succ: ActivityId,
    ) -> Result<(), EngineError>;

    /// Retracts a precedence posted with [`Engine::add_precedence`].
    ///
    /// # Errors
    /// - If no such precedence is posted.
    fn remove_precedence(
        &mut self,
        resource: ResourceId,
        pred: ActivityId,
        succ: ActivityId,
    ) -> Result<(), EngineError>;

    /// Amount of temporal inconsistency. Zero means consistent.
    fn global_violation(&self) -> u64;

    /// Suspends propagation while `true`; switching back propagates once.
    fn set_batch_mode(&mut self, batch: bool);

    /// Replaces the project horizon and propagates.
    fn set_horizon(&mut self, horizon: Time);

    /// Current project horizon.
    fn horizon(&self) -> Time;

    /// Incremented on every propagation.
    fn version(&self) -> u64;

    /// Engine-side conflict set of a resource at `time`.
    ///
    /// # Errors
    /// - If the resource is unknown.
    fn resource_conflict_set(
        &self,
        resource: ResourceId,
        time: Time,
    ) -> Result<Vec<(ActivityId, ActivityId)>, EngineError>;

    /// Engine-side worst violation of a resource.
    ///
    /// # Errors
    /// - If the resource is unknown.
    fn resource_max_violation(
        &self,
        resource: ResourceId,
    ) -> Result<Option<ViolationInfo>, EngineError>;
}

/// Builds the conflict set out of the activities covering a time point.
///
/// Returns every ordered pair `(pred, succ)` of distinct activities for which
/// `pred` can still end before `succ` starts. Pairs come ordered by `(pred, succ)` key
/// when `covering` is ordered by key.
#[must_use]
pub fn orderable_pairs(covering: &[(ActivityId, Bounds)]) -> Vec<(ActivityId, ActivityId)> {
    let mut pairs = Vec::new();

    for (pred, pred_bounds) in covering {
        for (succ, succ_bounds) in covering {
            if pred != succ && pred_bounds.slack_before(succ_bounds) >= 0 {
                pairs.push((*pred, *succ));
            }
        }
    }

    pairs
}

#[cfg(test)]
mod test {
    use super::*;

    const fn bounds(start_lb: Time, start_ub: Time, duration: Time) -> Bounds {
        Bounds {
            start_lb,
            start_ub,
            end_lb: start_lb + duration,
            end_ub: start_ub + duration,
        }
    }

    #[test]
    fn covers_is_half_open() {
        let b = bounds(2, 10, 3);
        assert!(!b.covers(1));
        assert!(b.covers(2));
        assert!(b.covers(4));
        assert!(!b.covers(5));
        assert!(!bounds(3, 3, 0).covers(3));
    }

    #[test]
    fn orderable_pairs_rejects_impossible_orderings() {
        let covering = [
            (ActivityId(0), bounds(0, 0, 5)),
            (ActivityId(1), bounds(0, 10, 5)),
        ];

        // 1 cannot precede 0 because 0 must start at 0.
        assert_eq!(
            orderable_pairs(&covering),
            vec![(ActivityId(0), ActivityId(1))]
        );
    }

    #[test]
    fn orderable_pairs_is_empty_when_neither_direction_fits() {
        let covering = [
            (ActivityId(0), bounds(0, 1, 5)),
            (ActivityId(1), bounds(0, 1, 5)),
        ];

        assert!(orderable_pairs(&covering).is_empty());
    }
}
