use crate::core::{Activity, Instance, Requirement, ResourceSpec, TemporalConstraint, Time};
use rand::Rng;

/// Shape of randomly generated instances.
#[derive(Clone, Debug, PartialEq)]
pub struct GeneratorConfig {
    /// The number of activities.
    pub activities: usize,
    /// The number of resources.
    pub resources: usize,
    /// The maximum duration of an activity.
    pub max_duration: Time,
    /// The maximum capacity of a resource.
    pub max_capacity: i64,
    /// Chance that an activity uses a given resource.
    pub demand_ratio: f64,
    /// Chance of a finish-to-start constraint between two activities.
    pub precedence_ratio: f64,
    /// Horizon as a multiple of the total duration, at least 1.
    pub horizon_ratio: f64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            activities: 10,
            resources: 2,
            max_duration: 10,
            max_capacity: 3,
            demand_ratio: 0.5,
            precedence_ratio: 0.1,
            horizon_ratio: 1.0,
        }
    }
}

/// Generates a random instance.
///
/// Temporal constraints only run from lower to higher activity indices, so every instance
/// has a serial schedule that fits the horizon.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
pub fn generate(config: &GeneratorConfig, rng: &mut impl Rng) -> Instance {
    let demand_ratio = config.demand_ratio.clamp(0.0, 1.0);
    let precedence_ratio = config.precedence_ratio.clamp(0.0, 1.0);

    let resources: Vec<_> = (0..config.resources)
        .map(|index| ResourceSpec {
            name: format!("R{index}"),
            capacity: rng.gen_range(1..=config.max_capacity.max(1)),
        })
        .collect();

    let mut activities = Vec::with_capacity(config.activities);
    for _ in 0..config.activities {
        let duration = rng.gen_range(1..=config.max_duration.max(1));
        let mut requirements = Vec::new();
        for (resource, spec) in resources.iter().enumerate() {
            if rng.gen_bool(demand_ratio) {
                requirements.push(Requirement {
                    resource,
                    quantity: rng.gen_range(1..=spec.capacity),
                });
            }
        }
        activities.push(Activity {
            duration,
            requirements,
        });
    }

    let mut temporal = Vec::new();
    for from in 0..config.activities {
        for to in from + 1..config.activities {
            if rng.gen_bool(precedence_ratio) {
                let duration = activities[from].duration;
                temporal.push(TemporalConstraint::finish_to_start(from, to, duration));
            }
        }
    }

    let total: Time = activities.iter().map(|activity| activity.duration).sum();
    let horizon = (total as f64 * config.horizon_ratio.max(1.0)).ceil() as Time;

    Instance::new(resources, activities, temporal, horizon.max(total).max(1))
}

/// Activities sharing one resource of capacity 1, each demanding 1 unit, with the horizon
/// set to the sum of durations.
#[must_use]
pub fn unit_capacity_instance(durations: &[Time]) -> Instance {
    let activities = durations
        .iter()
        .map(|&duration| Activity {
            duration,
            requirements: vec![Requirement {
                resource: 0,
                quantity: 1,
            }],
        })
        .collect();
    let resources = vec![ResourceSpec {
        name: "R0".into(),
        capacity: 1,
    }];

    Instance::new(
        resources,
        activities,
        Vec::new(),
        durations.iter().sum::<Time>().max(1),
    )
}
