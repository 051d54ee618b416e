use super::{Exhaustive, FlattenRelax, FlattenRelaxConfig};
use crate::core::{
    Engine, ResourceMode, SolveStatus, Solver, SolverBase, SolverError, Time, TimeBudget,
};
use log::info;
use std::time::Duration;

/// Parameters of [`Hybrid`].
#[derive(Clone, Debug, PartialEq)]
pub struct HybridConfig {
    /// Share of the timeout given to the heuristic, the search gets the rest.
    pub heuristic_share: f64,
    pub flatten_relax: FlattenRelaxConfig,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            heuristic_share: 0.1,
            flatten_relax: FlattenRelaxConfig::default(),
        }
    }
}

/// Runs [`FlattenRelax`] for an upper bound and a first ordering, then [`Exhaustive`]
/// guided by that ordering for the rest of the time.
#[derive(Debug)]
pub struct Hybrid {
    heuristic_share: f64,
    base: SolverBase,
    flatten_relax: FlattenRelax,
    exhaustive: Exhaustive,
}

impl Hybrid {
    /// Creates a new instance of `Hybrid`.
    #[must_use]
    pub fn new(config: HybridConfig) -> Self {
        Self {
            heuristic_share: config.heuristic_share.clamp(0.0, 1.0),
            base: SolverBase::default(),
            flatten_relax: FlattenRelax::new(config.flatten_relax),
            exhaustive: Exhaustive::new(),
        }
    }

    #[must_use]
    pub const fn flatten_relax(&self) -> &FlattenRelax {
        &self.flatten_relax
    }

    #[must_use]
    pub const fn exhaustive(&self) -> &Exhaustive {
        &self.exhaustive
    }
}

impl Default for Hybrid {
    fn default() -> Self {
        Self::new(HybridConfig::default())
    }
}

impl Solver for Hybrid {
    fn solve(
        &mut self,
        engine: &mut dyn Engine,
        timeout: Duration,
        bound: Time,
        mode: ResourceMode,
    ) -> Result<SolveStatus, SolverError> {
        self.base.start(engine);
        let budget = TimeBudget::starting_now(timeout);

        let heuristic_timeout = timeout.mul_f64(self.heuristic_share);
        self.flatten_relax.solve(engine, heuristic_timeout, bound, mode)?;
        let heuristic_best = self.flatten_relax.best_makespan();
        info!(
            "heuristic phase ended with makespan {heuristic_best:?} after {:?}",
            self.flatten_relax.elapsed()
        );

        if heuristic_best.is_some_and(|best| best <= bound) {
            self.base.adopt(self.flatten_relax.base_mut(), Duration::ZERO);
            self.base.finish(SolveStatus::BoundsCrossed);
            return Ok(SolveStatus::BoundsCrossed);
        }

        let oracle = self.flatten_relax.best_solution().clone();
        self.flatten_relax.undo_solve(engine)?;

        let offset = self.base.elapsed();
        let search_budget = TimeBudget::starting_now(budget.remaining());
        let status = self.exhaustive.search(
            engine,
            search_budget,
            bound,
            heuristic_best,
            &oracle,
            mode,
        )?;

        if self.exhaustive.best_makespan().is_some() {
            self.base.adopt(self.exhaustive.base_mut(), offset);
        } else {
            self.base.adopt(self.flatten_relax.base_mut(), Duration::ZERO);
            self.base.restore_best_solution(engine)?;
        }
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

    fn base(&self) -> &SolverBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut SolverBase {
        &mut self.base
    }

    fn name(&self) -> &str {
        "Hybrid"
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::core::{make_resources, TemporalNetwork};
    use crate::data::{generate, unit_capacity_instance, GeneratorConfig};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const TIMEOUT: Duration = Duration::from_secs(30);

    fn hybrid(seed: u64) -> Hybrid {
        Hybrid::new(HybridConfig {
            flatten_relax: FlattenRelaxConfig {
                max_stable: 10,
                seed: Some(seed),
                ..FlattenRelaxConfig::default()
            },
            ..HybridConfig::default()
        })
    }

    #[test]
    fn met_bound_skips_exhaustive_search() -> anyhow::Result<()> {
        let mut network = TemporalNetwork::new(&unit_capacity_instance(&[2, 3, 4]))?;
        let mut solver = hybrid(1);

        let status = solver.solve(&mut network, TIMEOUT, 9, ResourceMode::Local)?;

        assert_eq!(status, SolveStatus::BoundsCrossed);
        assert_eq!(solver.exhaustive().stats().runs, 0);
        assert_eq!(solver.best_makespan(), Some(9));
        assert_eq!(network.global_violation(), 0);
        Ok(())
    }

    #[test]
    fn keeps_heuristic_solution_when_search_finds_nothing_better() -> anyhow::Result<()> {
        let mut network = TemporalNetwork::new(&unit_capacity_instance(&[2, 3, 4]))?;
        let mut solver = hybrid(2);

        let status = solver.solve(&mut network, TIMEOUT, 0, ResourceMode::Local)?;

        assert_eq!(status, SolveStatus::Exhausted);
        assert_eq!(solver.exhaustive().stats().runs, 1);
        assert_eq!(solver.exhaustive().best_makespan(), None);
        assert_eq!(solver.best_makespan(), Some(9));
        assert_eq!(
            solver.solution_string(),
            solver.flatten_relax().best_solution().to_string()
        );
        assert_eq!(network.precedence_count(), solver.base().best_solution().len());
        assert_eq!(network.global_violation(), 0);

        solver.undo_solve(&mut network)?;
        assert_eq!(network.precedence_count(), 0);
        Ok(())
    }

    #[test]
    fn never_worse_than_heuristic() -> anyhow::Result<()> {
        let mut rng = StdRng::seed_from_u64(31);
        let generator = GeneratorConfig {
            activities: 8,
            resources: 2,
            ..GeneratorConfig::default()
        };

        for seed in 0..4 {
            let instance = generate(&generator, &mut rng);
            let mut network = TemporalNetwork::new(&instance)?;
            let mut solver = hybrid(seed);

            solver.solve(&mut network, Duration::from_secs(2), 0, ResourceMode::Engine)?;

            let heuristic = solver.flatten_relax().best_makespan();
            let best = solver.best_makespan();
            assert!(best.is_some());
            assert!(best <= heuristic || heuristic.is_none());
            assert_eq!(network.global_violation(), 0);
            for resource in make_resources(&network, ResourceMode::Local) {
                assert_eq!(resource.max_violation(&network)?, None);
            }

            // Solving again starts from the unconstrained network.
            solver.undo_solve(&mut network)?;
            solver.solve(&mut network, Duration::from_secs(2), 0, ResourceMode::Local)?;
            assert_eq!(network.precedence_count(), solver.base().best_solution().len());
        }
        Ok(())
    }

    #[test]
    fn same_solver_runs_on_fresh_networks() -> anyhow::Result<()> {
        let mut solver = hybrid(3);

        let mut first = TemporalNetwork::new(&unit_capacity_instance(&[1, 1]))?;
        solver.solve(&mut first, TIMEOUT, 0, ResourceMode::Local)?;
        assert_eq!(solver.best_makespan(), Some(2));

        let mut second = TemporalNetwork::new(&unit_capacity_instance(&[2, 3]))?;
        solver.solve(&mut second, TIMEOUT, 0, ResourceMode::Local)?;

        assert_eq!(solver.best_makespan(), Some(5));
        assert_eq!(second.precedence_count(), 1);
        assert_eq!(second.global_violation(), 0);
        assert_eq!(solver.exhaustive().stats().runs, 2);
        Ok(())
    }

    #[test]
    fn no_solution_when_horizon_is_too_short() -> anyhow::Result<()> {
        // Serializing the activities takes 9 units, the horizon allows 7.
        let mut network = TemporalNetwork::new(&unit_capacity_instance(&[2, 3, 4]))?;
        network.set_horizon(7);
        let mut solver = hybrid(4);

        let status = solver.solve(&mut network, TIMEOUT, 0, ResourceMode::Local)?;

        assert_eq!(status, SolveStatus::Exhausted);
        assert_eq!(solver.flatten_relax().best_makespan(), None);
        assert_eq!(solver.best_makespan(), None);
        assert_eq!(solver.solution_string(), "");
        assert_eq!(network.precedence_count(), 0);
        assert_eq!(network.global_violation(), 0);
        Ok(())
    }
}
