use super::engine::{
    orderable_pairs, Bounds, Engine, EngineError, ResourceInfo, Usage, ViolationInfo,
};
use super::{ActivityId, Instance, InstanceError, ResourceId, Time};
use ahash::{HashMap, HashMapExt};

/// `start(to) >= start(from) + weight`
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct Edge {
    from: usize,
    to: usize,
    weight: Time,
}

type PrecedenceKey = (ResourceId, ActivityId, ActivityId);

/// Simple temporal network over activity start times.
///
/// Earliest starts are longest paths from the time origin, latest starts are longest paths
/// back from the horizon. Both are recomputed from scratch on every propagation.
#[derive(Clone, Debug)]
pub struct TemporalNetwork {
    durations: Vec<Time>,
    resources: Vec<ResourceInfo>,
    usages: Vec<Vec<Usage>>,
    edges: Vec<Edge>,
    precedences: HashMap<PrecedenceKey, usize>,
    horizon: Time,
    bounds: Vec<Bounds>,
    violation: u64,
    batch: bool,
    dirty: bool,
    version: u64,
}

impl TemporalNetwork {
    /// Builds and propagates the network of an instance.
    ///
    /// # Errors
    /// - If the instance is invalid.
    pub fn new(instance: &Instance) -> Result<Self, InstanceError> {
        instance.validate()?;

        let resources = instance.resources.iter().enumerate();
        let resources: Vec<_> = resources
            .map(|(id, spec)| ResourceInfo {
                id: ResourceId(id),
                name: spec.name.clone(),
                capacity: spec.capacity,
            })
            .collect();

        let mut usages = vec![Vec::<Usage>::new(); resources.len()];
        for (activity, spec) in instance.activities.iter().enumerate() {
            for requirement in spec.requirements.iter().filter(|r| r.quantity > 0) {
                let usage = &mut usages[requirement.resource];
                match usage.last_mut() {
                    Some(last) if last.activity.0 == activity => {
                        last.quantity += requirement.quantity;
                    }
                    _ => usage.push(Usage {
                        activity: ActivityId(activity),
                        quantity: requirement.quantity,
                    }),
                }
            }
        }

        let mut edges = Vec::with_capacity(instance.temporal.len());
        for constraint in &instance.temporal {
            edges.push(Edge {
                from: constraint.from,
                to: constraint.to,
                weight: constraint.min_lag,
            });
            if let Some(max_lag) = constraint.max_lag {
                edges.push(Edge {
                    from: constraint.to,
                    to: constraint.from,
                    weight: -max_lag,
                });
            }
        }

        let durations: Vec<_> = instance.activities.iter().map(|a| a.duration).collect();
        let mut network = Self {
            bounds: vec![Bounds::default(); durations.len()],
            durations,
            resources,
            usages,
            edges,
            precedences: HashMap::new(),
            horizon: instance.horizon,
            violation: 0,
            batch: false,
            dirty: false,
            version: 0,
        };
        network.propagate();

        Ok(network)
    }

    /// Number of precedences currently posted, counting duplicates.
    #[must_use]
    pub fn precedence_count(&self) -> usize {
        self.precedences.values().sum()
    }

    /// Whether `pred` is ordered before `succ` by some posted precedence.
    #[must_use]
    pub fn has_precedence(&self, pred: ActivityId, succ: ActivityId) -> bool {
        self.precedences.keys().any(|&(_, p, s)| p == pred && s == succ)
    }

    fn check_activity(&self, activity: ActivityId) -> Result<(), EngineError> {
        if activity.0 < self.durations.len() {
            Ok(())
        } else {
            Err(EngineError::UnknownActivity(activity))
        }
    }

    fn resource_info(&self, resource: ResourceId) -> Result<&ResourceInfo, EngineError> {
        self.resources
            .get(resource.0)
            .ok_or(EngineError::UnknownResource(resource))
    }

    fn changed(&mut self) {
        if self.batch {
            self.dirty = true;
        } else {
            self.propagate();
        }
    }

    fn propagate(&mut self) {
        let mut edges = self.edges.clone();
        let mut ordered: Vec<_> = self.precedences.keys().map(|&(_, p, s)| (p, s)).collect();
        ordered.sort_unstable();
        ordered.dedup();
        edges.extend(ordered.into_iter().map(|(pred, succ)| Edge {
            from: pred.0,
            to: succ.0,
            weight: self.durations[pred.0],
        }));

        let mut earliest = vec![0; self.durations.len()];
        let mut latest: Vec<_> = self.durations.iter().map(|d| self.horizon - d).collect();

        let mut violation = relax_earliest(&mut earliest, &edges);
        violation += relax_latest(&mut latest, &edges);

        for (index, duration) in self.durations.iter().enumerate() {
            let (start_lb, start_ub) = (earliest[index], latest[index]);
            if start_lb > start_ub {
                violation += 1;
            }
            self.bounds[index] = Bounds {
                start_lb,
                start_ub,
                end_lb: start_lb + duration,
                end_ub: start_ub + duration,
            };
        }

        self.violation = violation;
        self.dirty = false;
        self.version += 1;
    }

    /// Resource level after every distinct event time, computed by sorting start and end events.
    fn sweep(&self, resource: ResourceId) -> Result<Vec<(Time, i64)>, EngineError> {
        let capacity = self.resource_info(resource)?.capacity;

        let mut events = Vec::new();
        for usage in &self.usages[resource.0] {
            let bounds = self.bounds[usage.activity.0];
            if bounds.end_lb > bounds.start_lb {
                events.push((bounds.start_lb, -usage.quantity));
                events.push((bounds.end_lb, usage.quantity));
            }
        }
        events.sort_unstable();

        let mut levels: Vec<(Time, i64)> = Vec::with_capacity(events.len());
        let mut level = capacity;
        for (time, delta) in events {
            level += delta;
            match levels.last_mut() {
                Some(last) if last.0 == time => last.1 = level,
                _ => levels.push((time, level)),
            }
        }

        Ok(levels)
    }
}

/// Pushes earliest starts forward. Returns the number of edges still violated after
/// `n + 1` rounds, which is non-zero only on a positive cycle.
fn relax_earliest(values: &mut [Time], edges: &[Edge]) -> u64 {
    for _ in 0..=values.len() {
        let mut changed = false;
        for edge in edges {
            let candidate = values[edge.from] + edge.weight;
            if candidate > values[edge.to] {
                values[edge.to] = candidate;
                changed = true;
            }
        }
        if !changed {
            return 0;
        }
    }

    let violated = edges.iter().filter(|e| values[e.from] + e.weight > values[e.to]);
    violated.count() as u64
}

/// Pulls latest starts backward, mirror image of [`relax_earliest`].
fn relax_latest(values: &mut [Time], edges: &[Edge]) -> u64 {
    for _ in 0..=values.len() {
        let mut changed = false;
        for edge in edges {
            let candidate = values[edge.to] - edge.weight;
            if candidate < values[edge.from] {
                values[edge.from] = candidate;
                changed = true;
            }
        }
        if !changed {
            return 0;
        }
    }

    let violated = edges.iter().filter(|e| values[e.to] - e.weight < values[e.from]);
    violated.count() as u64
}

impl Engine for TemporalNetwork {
    fn activities(&self) -> Vec<ActivityId> {
        (0..self.durations.len()).map(ActivityId).collect()
    }

    fn resources(&self) -> Vec<ResourceInfo> {
        self.resources.clone()
    }

    fn activity_bounds(&self, activity: ActivityId) -> Result<Bounds, EngineError> {
        self.bounds
            .get(activity.0)
            .copied()
            .ok_or(EngineError::UnknownActivity(activity))
    }

    fn resource_activities(&self, resource: ResourceId) -> Result<Vec<Usage>, EngineError> {
        self.resource_info(resource)?;
        Ok(self.usages[resource.0].clone())
    }

    fn add_precedence(
        &mut self,
        resource: ResourceId,
        pred: ActivityId,
        succ: ActivityId,
    ) -> Result<(), EngineError> {
        self.resource_info(resource)?;
        self.check_activity(pred)?;
        self.check_activity(succ)?;

        *self.precedences.entry((resource, pred, succ)).or_insert(0) += 1;
        self.changed();
        Ok(())
    }

    fn remove_precedence(
        &mut self,
        resource: ResourceId,
        pred: ActivityId,
        succ: ActivityId,
    ) -> Result<(), EngineError> {
        let key = (resource, pred, succ);
        let Some(count) = self.precedences.get_mut(&key) else {
            return Err(EngineError::MissingPrecedence {
                resource,
                pred,
                succ,
            });
        };

        *count -= 1;
        if *count == 0 {
            self.precedences.remove(&key);
        }
        self.changed();
        Ok(())
    }

    fn global_violation(&self) -> u64 {
        self.violation
    }

    fn set_batch_mode(&mut self, batch: bool) {
        self.batch = batch;
        if !batch && self.dirty {
            self.propagate();
        }
    }

    fn set_horizon(&mut self, horizon: Time) {
        self.horizon = horizon;
        self.changed();
    }

    fn horizon(&self) -> Time {
        self.horizon
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn resource_conflict_set(
        &self,
        resource: ResourceId,
        time: Time,
    ) -> Result<Vec<(ActivityId, ActivityId)>, EngineError> {
        self.resource_info(resource)?;

        let covering: Vec<_> = self.usages[resource.0]
            .iter()
            .map(|usage| (usage.activity, self.bounds[usage.activity.0]))
            .filter(|(_, bounds)| bounds.covers(time))
            .collect();

        Ok(orderable_pairs(&covering))
    }

    fn resource_max_violation(
        &self,
        resource: ResourceId,
    ) -> Result<Option<ViolationInfo>, EngineError> {
        let mut worst: Option<ViolationInfo> = None;

        for (time, level) in self.sweep(resource)? {
            if level < 0 && worst.map_or(true, |w| level < w.level) {
                worst = Some(ViolationInfo { time, level });
            }
        }

        Ok(worst)
    }
}
