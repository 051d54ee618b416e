use crate::core::{
    make_resources, Engine, EngineError, PairKey, Precedence, PrecedenceSet, Resource,
    ResourceMode, SolveStatus, Solver, SolverBase, SolverError, Time, TimeBudget,
};
use ahash::{HashSet, HashSetExt};
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

/// Parameters of [`FlattenRelax`].
#[derive(Clone, Debug, PartialEq)]
pub struct FlattenRelaxConfig {
    /// Upper limit on flatten/relax iterations.
    pub max_iterations: usize,
    /// Iterations without improvement before giving up.
    pub max_stable: usize,
    /// Chance that one relaxation pass removes a given critical precedence.
    pub relax_probability: f64,
    /// Relaxation passes per iteration.
    pub relax_passes: usize,
    /// Horizon imposed on the engine so only resource conflicts constrain the makespan.
    /// Never tighter than the instance horizon.
    pub relaxed_horizon: Time,
    /// Only precedences on the critical path are critical when set, all of them otherwise.
    /// Off by default, so relaxation may retract any precedence.
    pub mark_critical_path: bool,
    /// Seed of the relaxation coin flips. Entropy when `None`.
    pub seed: Option<u64>,
}

impl Default for FlattenRelaxConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10_000,
            max_stable: 100,
            relax_probability: 0.02,
            relax_passes: 4,
            relaxed_horizon: 100_000,
            mark_critical_path: false,
            seed: None,
        }
    }
}

/// Iterative flattening and relaxation.
///
/// Flattening posts the most slack-preserving precedence at the worst violation of every
/// resource until no resource is over capacity. Relaxation then randomly retracts critical
/// precedences to escape the local optimum. The heuristic is incomplete: it may end with
/// no feasible ordering at all.
#[derive(Debug)]
pub struct FlattenRelax {
    config: FlattenRelaxConfig,
    rng: StdRng,
    base: SolverBase,
    resources: Vec<Box<dyn Resource>>,
    no_goods: HashSet<PairKey>,
    stable: usize,
    bound: Time,
    horizon: Time,
    has_violations: bool,
}

impl FlattenRelax {
    /// Creates a new instance of `FlattenRelax`.
    #[must_use]
    pub fn new(config: FlattenRelaxConfig) -> Self {
        let rng = config
            .seed
            .map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);
        Self {
            config,
            rng,
            base: SolverBase::default(),
            resources: Vec::new(),
            no_goods: HashSet::new(),
            stable: 0,
            bound: 0,
            horizon: 0,
            has_violations: false,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &FlattenRelaxConfig {
        &self.config
    }

    /// Whether the pair produced an inconsistency during the last run.
    #[must_use]
    pub fn is_no_good(&self, key: PairKey) -> bool {
        self.no_goods.contains(&key)
    }

    /// Best precedence set of the last run.
    #[must_use]
    pub const fn best_solution(&self) -> &PrecedenceSet {
        self.base.best_solution()
    }

    /// Runs at most `max_iterations` flatten/relax rounds.
    ///
    /// # Errors
    /// - If the engine rejects a precedence change.
    pub fn run(
        &mut self,
        engine: &mut dyn Engine,
        max_iterations: usize,
        budget: TimeBudget,
        bound: Time,
        mode: ResourceMode,
    ) -> Result<SolveStatus, SolverError> {
        self.init(engine, bound, mode);

        let mut status = SolveStatus::IterationLimit;
        for iteration in 0..max_iterations {
            self.flatten(engine, &budget)?;
            self.update_solution(engine, iteration)?;
            self.update_critical_precedences(engine)?;

            if self.stable > self.config.max_stable {
                status = SolveStatus::Stalled;
                break;
            }
            if self.base.best_makespan().is_some_and(|best| best <= self.bound) {
                status = SolveStatus::BoundsCrossed;
                break;
            }
            if budget.is_exhausted() {
                status = SolveStatus::TimedOut;
                break;
            }

            self.relax(engine)?;
        }

        engine.set_horizon(self.horizon);
        self.base.restore_best_solution(engine)?;
        self.base.finish(status);

        info!(
            "{} finished ({status}) in {:?}, best makespan {:?} for solution {}",
            self.name(),
            self.base.elapsed(),
            self.base.best_makespan(),
            self.base.solution_string()
        );

        Ok(status)
    }

    fn init(&mut self, engine: &mut dyn Engine, bound: Time, mode: ResourceMode) {
        self.base.start(engine);
        self.resources = make_resources(engine, mode);
        self.no_goods.clear();
        self.stable = 0;
        self.bound = bound;
        self.has_violations = false;

        self.horizon = engine.horizon();
        engine.set_horizon(self.config.relaxed_horizon.max(self.horizon));
    }

    fn flatten(&mut self, engine: &mut dyn Engine, budget: &TimeBudget) -> Result<(), SolverError> {
        loop {
            self.has_violations = false;
            let mut added = false;

            for index in 0..self.resources.len() {
                let Some(violation) = self.resources[index].max_violation(engine)? else {
                    continue;
                };
                self.has_violations = true;
                if self.add_precedence_constraint(engine, index, violation.time)? {
                    added = true;
                }
            }

            if !self.has_violations || !added || budget.is_exhausted() {
                return Ok(());
            }
        }
    }

    /// Tries to fix the violation of a resource at `time` by ordering two of its activities.
    fn add_precedence_constraint(
        &mut self,
        engine: &mut dyn Engine,
        index: usize,
        time: Time,
    ) -> Result<bool, SolverError> {
        let resource = &self.resources[index];
        let conflict_set = resource.conflict_set(engine, time)?;

        if conflict_set.is_empty() {
            debug!(
                "{}: no orderable pair at {time}, no precedence added",
                resource.name()
            );
            return Ok(false);
        }

        let mut best: Option<Precedence> = None;
        for key @ (pred, succ) in conflict_set {
            if self.base.is_precedence(key) || self.no_goods.contains(&key) {
                continue;
            }
            let slack = engine
                .activity_bounds(pred)?
                .slack_before(&engine.activity_bounds(succ)?);
            if best.map_or(true, |b| slack > b.slack) {
                best = Some(Precedence::with_slack(resource.id(), pred, succ, slack));
            }
        }

        let Some(precedence) = best.filter(|p| p.slack >= 0) else {
            debug!(
                "{}: no pair with non-negative slack at {time}, no precedence added",
                resource.name()
            );
            return Ok(false);
        };

        self.base.add_precedence(engine, precedence)?;
        if engine.global_violation() > 0 {
            self.base.remove_precedence(engine, precedence.key())?;
            self.no_goods.insert(precedence.key());
            debug!("added no-good {precedence}");
            return Ok(false);
        }

        Ok(true)
    }

    fn update_solution(
        &mut self,
        engine: &dyn Engine,
        iteration: usize,
    ) -> Result<(), SolverError> {
        let makespan = self.base.makespan(engine)?;
        let feasible = !self.has_violations
            && engine.global_violation() == 0
            && makespan <= self.horizon;
        debug!(
            "iteration {iteration}: makespan {makespan}{}",
            if feasible { "" } else { " with violations" }
        );

        if feasible && self.base.best_makespan().map_or(true, |best| makespan < best) {
            self.base.record_best(makespan);
            self.stable = 0;
            info!(
                "iteration {iteration}: new best makespan {makespan} after {:?}",
                self.base.elapsed()
            );
        } else {
            self.stable += 1;
        }

        Ok(())
    }

    /// Marks tight precedences between activities on the critical path as the only
    /// relaxation candidates. Every precedence stays critical while violations remain.
    fn update_critical_precedences(&mut self, engine: &mut dyn Engine) -> Result<(), SolverError> {
        if !self.config.mark_critical_path {
            return Ok(());
        }

        let keys = self.base.precedences().keys();
        if self.has_violations || engine.global_violation() > 0 {
            for key in keys {
                self.base.set_critical(key, true);
            }
            return Ok(());
        }

        let makespan = self.base.makespan(engine)?;
        let relaxed = engine.horizon();
        engine.set_horizon(makespan);
        let flags = critical_flags(engine, &keys);
        engine.set_horizon(relaxed);

        for (key, critical) in keys.into_iter().zip(flags?) {
            self.base.set_critical(key, critical);
        }
        Ok(())
    }

    fn relax(&mut self, engine: &mut dyn Engine) -> Result<(), SolverError> {
        let before = self.base.precedences().len();

        engine.set_batch_mode(true);
        let result = self.relax_passes(engine);
        engine.set_batch_mode(false);
        result?;

        debug!(
            "removed {} out of {before} precedences",
            before - self.base.precedences().len()
        );
        Ok(())
    }

    fn relax_passes(&mut self, engine: &mut dyn Engine) -> Result<(), SolverError> {
        let probability = self.config.relax_probability.clamp(0.0, 1.0);

        for _ in 0..self.config.relax_passes {
            let marked: Vec<_> = self
                .base
                .precedences()
                .iter()
                .filter(|precedence| precedence.critical)
                .map(Precedence::key)
                .filter(|_| self.rng.gen_bool(probability))
                .collect();

            for key in marked {
                self.base.remove_precedence(engine, key)?;
            }
        }

        Ok(())
    }
}

/// A precedence is critical when both activities are fixed and the successor starts right
/// at the end of the predecessor.
fn critical_flags(engine: &dyn Engine, keys: &[PairKey]) -> Result<Vec<bool>, EngineError> {
    let mut flags = Vec::with_capacity(keys.len());
    for &(pred, succ) in keys {
        let pred_bounds = engine.activity_bounds(pred)?;
        let succ_bounds = engine.activity_bounds(succ)?;
        flags.push(
            pred_bounds.start_lb == pred_bounds.start_ub
                && succ_bounds.start_lb == succ_bounds.start_ub
                && succ_bounds.start_lb == pred_bounds.end_lb,
        );
    }
    Ok(flags)
}

impl Default for FlattenRelax {
    fn default() -> Self {
        Self::new(FlattenRelaxConfig::default())
    }
}

impl Solver for FlattenRelax {
    fn solve(
        &mut self,
        engine: &mut dyn Engine,
        timeout: Duration,
        bound: Time,
        mode: ResourceMode,
    ) -> Result<SolveStatus, SolverError> {
        let budget = TimeBudget::starting_now(timeout);
        self.run(engine, self.config.max_iterations, budget, bound, mode)
    }

    fn base(&self) -> &SolverBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut SolverBase {
        &mut self.base
    }

    fn name(&self) -> &str {
        "IFlatIRelax"
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::core::{
        make_resources, Activity, ActivityId, Instance, Requirement, ResourceId, ResourceSpec,
        TemporalConstraint, TemporalNetwork,
    };
    use crate::data::{generate, unit_capacity_instance, GeneratorConfig};

    fn config(seed: u64) -> FlattenRelaxConfig {
        FlattenRelaxConfig {
            max_stable: 10,
            seed: Some(seed),
            ..FlattenRelaxConfig::default()
        }
    }

    fn assert_installed_solution_is_feasible(
        network: &TemporalNetwork,
        solver: &FlattenRelax,
    ) -> anyhow::Result<()> {
        assert_eq!(network.global_violation(), 0);
        for resource in make_resources(network, ResourceMode::Local) {
            assert_eq!(resource.max_violation(network)?, None);
        }
        assert_eq!(network.precedence_count(), solver.best_solution().len());
        assert_eq!(Some(solver.base.makespan(network)?), solver.best_makespan());
        Ok(())
    }

    #[test]
    fn serializes_unit_capacity_activities() -> anyhow::Result<()> {
        let mut network = TemporalNetwork::new(&unit_capacity_instance(&[2, 3, 4]))?;
        let mut solver = FlattenRelax::new(config(1));

        let status = solver.solve(&mut network, Duration::from_secs(10), 0, ResourceMode::Local)?;

        assert_eq!(status, SolveStatus::Stalled);
        assert_eq!(solver.best_makespan(), Some(9));
        assert!(solver.best_solution().len() >= 2);
        assert_installed_solution_is_feasible(&network, &solver)?;
        Ok(())
    }

    #[test]
    fn stops_once_bound_is_met() -> anyhow::Result<()> {
        let mut network = TemporalNetwork::new(&unit_capacity_instance(&[2, 3, 4]))?;
        let mut solver = FlattenRelax::new(config(2));

        let status = solver.solve(&mut network, Duration::from_secs(10), 9, ResourceMode::Engine)?;

        assert_eq!(status, SolveStatus::BoundsCrossed);
        assert_eq!(solver.best_makespan(), Some(9));
        Ok(())
    }

    #[test]
    fn infeasible_orderings_become_no_goods() -> anyhow::Result<()> {
        // Both activities need the unit resource, but B must start within 2 of A.
        let activity = Activity {
            duration: 5,
            requirements: vec![Requirement {
                resource: 0,
                quantity: 1,
            }],
        };
        let instance = Instance::new(
            vec![ResourceSpec {
                name: "R0".into(),
                capacity: 1,
            }],
            vec![activity.clone(), activity],
            vec![TemporalConstraint {
                from: 0,
                to: 1,
                min_lag: 0,
                max_lag: Some(2),
            }],
            100,
        );
        let mut network = TemporalNetwork::new(&instance)?;
        let mut solver = FlattenRelax::new(FlattenRelaxConfig {
            max_stable: 3,
            ..config(3)
        });

        let status = solver.solve(&mut network, Duration::from_secs(10), 0, ResourceMode::Local)?;

        assert_eq!(status, SolveStatus::Stalled);
        assert_eq!(solver.best_makespan(), None);
        assert!(solver.is_no_good((ActivityId(0), ActivityId(1))));
        assert!(solver.is_no_good((ActivityId(1), ActivityId(0))));
        assert_eq!(network.precedence_count(), 0);
        assert_eq!(solver.solution_string(), "");
        Ok(())
    }

    #[test]
    fn random_instances_end_feasible() -> anyhow::Result<()> {
        let mut rng = StdRng::seed_from_u64(5);
        let generator = GeneratorConfig {
            activities: 12,
            resources: 2,
            ..GeneratorConfig::default()
        };

        for seed in 0..5 {
            let instance = generate(&generator, &mut rng);
            let mut network = TemporalNetwork::new(&instance)?;
            let mut solver = FlattenRelax::new(config(seed));

            solver.solve(&mut network, Duration::from_secs(10), 0, ResourceMode::Local)?;

            let best = solver.best_makespan();
            assert!(best.is_some_and(|best| best <= instance.total_duration()));
            assert_installed_solution_is_feasible(&network, &solver)?;

            solver.undo_solve(&mut network)?;
            assert_eq!(network.precedence_count(), 0);
        }
        Ok(())
    }

    #[test]
    fn iteration_limit_and_timeout_are_reported() -> anyhow::Result<()> {
        let mut network = TemporalNetwork::new(&unit_capacity_instance(&[2, 3, 4]))?;
        let mut solver = FlattenRelax::new(config(4));

        let status = solver.run(
            &mut network,
            1,
            TimeBudget::starting_now(Duration::from_secs(10)),
            0,
            ResourceMode::Local,
        )?;
        assert_eq!(status, SolveStatus::IterationLimit);
        assert_eq!(solver.best_makespan(), Some(9));

        solver.undo_solve(&mut network)?;
        let status = solver.solve(&mut network, Duration::ZERO, 0, ResourceMode::Local)?;
        assert_eq!(status, SolveStatus::TimedOut);
        assert_eq!(solver.status(), SolveStatus::TimedOut);
        Ok(())
    }

    #[test]
    fn same_solver_runs_on_fresh_networks() -> anyhow::Result<()> {
        let mut solver = FlattenRelax::new(config(7));

        let mut first = TemporalNetwork::new(&unit_capacity_instance(&[1, 1]))?;
        solver.solve(&mut first, Duration::from_secs(10), 0, ResourceMode::Local)?;
        assert_eq!(solver.best_makespan(), Some(2));

        let mut second = TemporalNetwork::new(&unit_capacity_instance(&[2, 3]))?;
        solver.solve(&mut second, Duration::from_secs(10), 0, ResourceMode::Engine)?;
        assert_eq!(solver.best_makespan(), Some(5));
        assert_installed_solution_is_feasible(&second, &solver)?;
        assert_eq!(first.precedence_count(), 1);
        Ok(())
    }

    #[test]
    fn orderings_past_the_horizon_are_not_solutions() -> anyhow::Result<()> {
        // The three activities need 9 units in sequence but must end by 7.
        let mut network = TemporalNetwork::new(&unit_capacity_instance(&[2, 3, 4]))?;
        network.set_horizon(7);
        let mut solver = FlattenRelax::new(config(8));

        let status = solver.solve(&mut network, Duration::from_secs(10), 0, ResourceMode::Local)?;

        assert_eq!(status, SolveStatus::Stalled);
        assert_eq!(solver.best_makespan(), None);
        assert_eq!(network.horizon(), 7);
        assert_eq!(network.precedence_count(), 0);
        assert_eq!(network.global_violation(), 0);
        Ok(())
    }

    #[test]
    fn relaxed_horizon_never_tightens_a_long_instance() -> anyhow::Result<()> {
        let mut network = TemporalNetwork::new(&unit_capacity_instance(&[60_000, 60_000]))?;
        network.set_horizon(200_000);
        let mut solver = FlattenRelax::new(config(9));

        solver.solve(&mut network, Duration::from_secs(10), 0, ResourceMode::Local)?;

        assert_eq!(solver.best_makespan(), Some(120_000));
        assert_eq!(network.horizon(), 200_000);
        assert_installed_solution_is_feasible(&network, &solver)?;
        Ok(())
    }

    #[test]
    fn relaxation_retracts_only_critical_precedences() -> anyhow::Result<()> {
        let mut network = TemporalNetwork::new(&unit_capacity_instance(&[2, 3, 4]))?;
        let mut solver = FlattenRelax::new(FlattenRelaxConfig {
            relax_probability: 1.0,
            relax_passes: 1,
            ..config(10)
        });
        solver.base.start(&network);

        let retracted = Precedence::new(ResourceId(0), ActivityId(0), ActivityId(1));
        let kept = Precedence::new(ResourceId(0), ActivityId(1), ActivityId(2));
        solver.base.add_precedence(&mut network, retracted)?;
        solver.base.add_precedence(&mut network, kept)?;
        solver.base.set_critical(kept.key(), false);

        solver.relax(&mut network)?;

        assert!(!solver.base.is_precedence(retracted.key()));
        assert!(!network.has_precedence(ActivityId(0), ActivityId(1)));
        assert!(solver.base.is_precedence(kept.key()));
        assert!(network.has_precedence(ActivityId(1), ActivityId(2)));
        assert_eq!(network.precedence_count(), 1);
        Ok(())
    }

    #[test]
    fn only_tight_fixed_precedences_are_critical() -> anyhow::Result<()> {
        let mut network = TemporalNetwork::new(&unit_capacity_instance(&[2, 3, 4]))?;
        let mut solver = FlattenRelax::new(FlattenRelaxConfig {
            mark_critical_path: true,
            ..config(11)
        });
        solver.base.start(&network);

        // 2 starts at 3, right after 1 ends. 0 ends at 2 and may slide by one.
        let loose = Precedence::new(ResourceId(0), ActivityId(0), ActivityId(2));
        let tight = Precedence::new(ResourceId(0), ActivityId(1), ActivityId(2));
        for precedence in [loose, tight] {
            solver.base.add_precedence(&mut network, precedence)?;
            solver.base.set_critical(precedence.key(), false);
        }

        solver.update_critical_precedences(&mut network)?;

        let critical = |key| solver.base.precedences().get(key).map(|p| p.critical);
        assert_eq!(critical(loose.key()), Some(false));
        assert_eq!(critical(tight.key()), Some(true));
        assert_eq!(network.horizon(), 9);

        solver.has_violations = true;
        solver.update_critical_precedences(&mut network)?;

        let critical = |key| solver.base.precedences().get(key).map(|p| p.critical);
        assert_eq!(critical(loose.key()), Some(true));
        assert_eq!(critical(tight.key()), Some(true));
        Ok(())
    }
}
