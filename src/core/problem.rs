use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Discrete time used for all bounds, durations and makespans.
pub type Time = i64;

/// Stable integer key of an activity. Ordering by key is the ordering used everywhere
/// a deterministic order of activities is needed.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct ActivityId(pub usize);

impl Display for ActivityId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index of a capacity resource.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct ResourceId(pub usize);

impl Display for ResourceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Amount of a resource an activity holds for its whole duration.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Serialize, PartialEq)]
pub struct Requirement {
    pub resource: usize,
    pub quantity: i64,
}

/// A unit of work with a fixed duration and its resource requirements.
#[derive(Clone, Debug, Deserialize, Eq, Serialize, PartialEq)]
pub struct Activity {
    pub duration: Time,
    #[serde(default)]
    pub requirements: Vec<Requirement>,
}

/// A renewable resource with a capacity that never changes.
#[derive(Clone, Debug, Deserialize, Eq, Serialize, PartialEq)]
pub struct ResourceSpec {
    pub name: String,
    pub capacity: i64,
}

/// Generalized precedence between activity starts:
/// `min_lag <= start(to) - start(from) <= max_lag`.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Serialize, PartialEq)]
pub struct TemporalConstraint {
    pub from: usize,
    pub to: usize,
    pub min_lag: Time,
    #[serde(default)]
    pub max_lag: Option<Time>,
}

impl TemporalConstraint {
    /// Plain finish-to-start precedence: `to` cannot start before `from` ends.
    #[must_use]
    pub const fn finish_to_start(from: usize, to: usize, duration: Time) -> Self {
        Self {
            from,
            to,
            min_lag: duration,
            max_lag: None,
        }
    }
}

/// Errors found while validating an instance.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum InstanceError {
    #[error("horizon must be positive, got {0}")]
    Horizon(Time),
    #[error("activity {0} has negative duration {1}")]
    NegativeDuration(usize, Time),
    #[error("activity {activity} requires unknown resource {resource}")]
    UnknownResource { activity: usize, resource: usize },
    #[error("activity {activity} requires negative amount {quantity} of resource {resource}")]
    NegativeDemand {
        activity: usize,
        resource: usize,
        quantity: i64,
    },
    #[error("activity {activity} requires {quantity} of resource {resource} with capacity {capacity}")]
    DemandExceedsCapacity {
        activity: usize,
        resource: usize,
        quantity: i64,
        capacity: i64,
    },
    #[error("resource {0} has negative capacity")]
    NegativeCapacity(usize),
    #[error("temporal constraint references unknown activity {0}")]
    UnknownActivity(usize),
}

/// An instance of the resource-constrained project scheduling problem.
#[non_exhaustive]
#[derive(Clone, Debug, Deserialize, Eq, Serialize, PartialEq)]
pub struct Instance {
    pub resources: Vec<ResourceSpec>,
    pub activities: Vec<Activity>,
    #[serde(default)]
    pub temporal: Vec<TemporalConstraint>,
    pub horizon: Time,
    /// Known lower bound on the makespan, if any.
    #[serde(default)]
    pub bound: Option<Time>,
}

impl Instance {
    /// Creates a new instance without a known lower bound.
    #[must_use]
    pub const fn new(
        resources: Vec<ResourceSpec>,
        activities: Vec<Activity>,
        temporal: Vec<TemporalConstraint>,
        horizon: Time,
    ) -> Self {
        Self {
            resources,
            activities,
            temporal,
            horizon,
            bound: None,
        }
    }

    /// Sets the known lower bound on the makespan.
    #[must_use]
    pub const fn with_bound(mut self, bound: Time) -> Self {
        self.bound = Some(bound);
        self
    }

    /// Checks indices, signs and capacities.
    ///
    /// # Errors
    /// - The first inconsistency found, see [`InstanceError`].
    pub fn validate(&self) -> Result<(), InstanceError> {
        if self.horizon <= 0 {
            return Err(InstanceError::Horizon(self.horizon));
        }

        for (index, resource) in self.resources.iter().enumerate() {
            if resource.capacity < 0 {
                return Err(InstanceError::NegativeCapacity(index));
            }
        }

        for (activity, spec) in self.activities.iter().enumerate() {
            if spec.duration < 0 {
                return Err(InstanceError::NegativeDuration(activity, spec.duration));
            }

            for requirement in &spec.requirements {
                let resource = requirement.resource;
                let quantity = requirement.quantity;
                let Some(capacity) = self.resources.get(resource).map(|r| r.capacity) else {
                    return Err(InstanceError::UnknownResource { activity, resource });
                };
                if quantity < 0 {
                    return Err(InstanceError::NegativeDemand {
                        activity,
                        resource,
                        quantity,
                    });
                }
                if quantity > capacity {
                    return Err(InstanceError::DemandExceedsCapacity {
                        activity,
                        resource,
                        quantity,
                        capacity,
                    });
                }
            }
        }

        let activities = self.activities.len();
        for constraint in &self.temporal {
            for index in [constraint.from, constraint.to] {
                if index >= activities {
                    return Err(InstanceError::UnknownActivity(index));
                }
            }
        }

        Ok(())
    }

    /// Sum of all durations, the makespan of any serial schedule without lags.
    #[must_use]
    pub fn total_duration(&self) -> Time {
        self.activities.iter().map(|activity| activity.duration).sum()
    }
}
