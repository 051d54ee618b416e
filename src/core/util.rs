use super::engine::{Engine, EngineError};
use super::precedence::{PairKey, Precedence, PrecedenceSet};
use super::{ActivityId, Time};
use log::trace;
use std::fmt::{Display, Formatter};
use std::time::{Duration, Instant};

/// Wall-clock budget checked by polling.
#[derive(Clone, Copy, Debug)]
pub struct TimeBudget {
    started_at: Instant,
    budget: Duration,
}

impl TimeBudget {
    /// Starts a budget now.
    #[must_use]
    pub fn starting_now(budget: Duration) -> Self {
        Self {
            started_at: Instant::now(),
            budget,
        }
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.elapsed())
    }

    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.elapsed() >= self.budget
    }
}

/// How a solve call ended.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum SolveStatus {
    /// `solve` was never called.
    #[default]
    NotStarted,
    /// The best makespan reached the lower bound.
    BoundsCrossed,
    /// The whole search space was explored.
    Exhausted,
    /// The time budget ran out first.
    TimedOut,
    /// The heuristic stopped improving.
    Stalled,
    /// The heuristic used up its iterations.
    IterationLimit,
}

impl Display for SolveStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::NotStarted => "not started",
            Self::BoundsCrossed => "bounds crossed",
            Self::Exhausted => "exhausted",
            Self::TimedOut => "timed out",
            Self::Stalled => "stalled",
            Self::IterationLimit => "iteration limit",
        };
        write!(f, "{text}")
    }
}

/// Bookkeeping shared by every solver: the live precedence set mirrored in the engine,
/// the best solution found, and timing.
#[derive(Clone, Debug)]
pub struct SolverBase {
    started_at: Instant,
    elapsed: Option<Duration>,
    time_to_best: Duration,
    best_makespan: Option<Time>,
    activities: Vec<ActivityId>,
    precedences: PrecedenceSet,
    best_solution: PrecedenceSet,
    status: SolveStatus,
}

impl Default for SolverBase {
    fn default() -> Self {
        Self {
            started_at: Instant::now(),
            elapsed: Some(Duration::ZERO),
            time_to_best: Duration::ZERO,
            best_makespan: None,
            activities: Vec::new(),
            precedences: PrecedenceSet::new(),
            best_solution: PrecedenceSet::new(),
            status: SolveStatus::NotStarted,
        }
    }
}

impl SolverBase {
    /// Forgets everything from a previous run and starts the clock.
    pub fn start(&mut self, engine: &dyn Engine) {
        *self = Self {
            started_at: Instant::now(),
            elapsed: None,
            activities: engine.activities(),
            ..Self::default()
        };
    }

    /// Stops the clock.
    pub fn finish(&mut self, status: SolveStatus) {
        self.elapsed = Some(self.started_at.elapsed());
        self.status = status;
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.elapsed.unwrap_or_else(|| self.started_at.elapsed())
    }

    #[must_use]
    pub const fn time_to_best(&self) -> Duration {
        self.time_to_best
    }

    #[must_use]
    pub const fn best_makespan(&self) -> Option<Time> {
        self.best_makespan
    }

    #[must_use]
    pub const fn best_solution(&self) -> &PrecedenceSet {
        &self.best_solution
    }

    #[must_use]
    pub const fn precedences(&self) -> &PrecedenceSet {
        &self.precedences
    }

    #[must_use]
    pub const fn status(&self) -> SolveStatus {
        self.status
    }

    #[must_use]
    pub fn activities(&self) -> &[ActivityId] {
        &self.activities
    }

    #[must_use]
    pub fn is_precedence(&self, key: PairKey) -> bool {
        self.precedences.contains(key)
    }

    /// Latest earliest end over all activities.
    ///
    /// # Errors
    /// - If the engine lost one of the activities.
    pub fn makespan(&self, engine: &dyn Engine) -> Result<Time, EngineError> {
        let mut makespan = 0;
        for &activity in &self.activities {
            makespan = makespan.max(engine.activity_bounds(activity)?.end_lb);
        }
        Ok(makespan)
    }

    /// Posts a precedence and tracks it. Returns `false` without touching the engine
    /// if the pair is already held.
    ///
    /// # Errors
    /// - If the engine rejects the precedence.
    pub fn add_precedence(
        &mut self,
        engine: &mut dyn Engine,
        precedence: Precedence,
    ) -> Result<bool, EngineError> {
        if self.precedences.contains(precedence.key()) {
            return Ok(false);
        }
        engine.add_precedence(precedence.resource, precedence.pred, precedence.succ)?;
        self.precedences.insert(precedence);
        trace!("added {precedence} because of resource {}", precedence.resource);
        Ok(true)
    }

    /// Retracts a tracked precedence.
    ///
    /// # Errors
    /// - If the engine doesn't hold the precedence.
    pub fn remove_precedence(
        &mut self,
        engine: &mut dyn Engine,
        key: PairKey,
    ) -> Result<Option<Precedence>, EngineError> {
        let Some(precedence) = self.precedences.remove(key) else {
            return Ok(None);
        };
        engine.remove_precedence(precedence.resource, precedence.pred, precedence.succ)?;
        trace!("removed {precedence} because of resource {}", precedence.resource);
        Ok(Some(precedence))
    }

    pub fn set_critical(&mut self, key: PairKey, critical: bool) -> bool {
        self.precedences.set_critical(key, critical)
    }

    /// Saves a copy of the live precedences as the best solution.
    ///
    /// # Panics
    /// - In debug mode, if `makespan` doesn't improve on the current best.
    pub fn record_best(&mut self, makespan: Time) {
        debug_assert!(
            self.best_makespan.map_or(true, |best| makespan < best),
            "best makespan must decrease: {makespan} after {:?}",
            self.best_makespan
        );
        self.best_makespan = Some(makespan);
        self.best_solution = self.precedences.clone();
        self.time_to_best = self.elapsed();
    }

    /// Replaces the live precedences in the engine with the best solution.
    ///
    /// # Errors
    /// - If the engine rejects one of the changes.
    pub fn restore_best_solution(&mut self, engine: &mut dyn Engine) -> Result<(), EngineError> {
        let best = self.best_solution.clone();
        self.install(engine, &best)
    }

    /// Replaces the live precedences in the engine with `solution`, propagating once.
    ///
    /// # Errors
    /// - If the engine rejects one of the changes.
    pub fn install(
        &mut self,
        engine: &mut dyn Engine,
        solution: &PrecedenceSet,
    ) -> Result<(), EngineError> {
        engine.set_batch_mode(true);
        let result = self.replace_live(engine, solution);
        engine.set_batch_mode(false);
        result
    }

    fn replace_live(
        &mut self,
        engine: &mut dyn Engine,
        solution: &PrecedenceSet,
    ) -> Result<(), EngineError> {
        for key in self.precedences.keys() {
            self.remove_precedence(engine, key)?;
        }
        for &precedence in solution.iter() {
            self.add_precedence(engine, precedence)?;
        }
        Ok(())
    }

    /// Removes the installed solution from the engine. Does nothing if no best solution
    /// was recorded.
    ///
    /// # Errors
    /// - If the engine rejects one of the removals.
    pub fn undo_solve(&mut self, engine: &mut dyn Engine) -> Result<(), EngineError> {
        if self.best_makespan.is_none() {
            return Ok(());
        }
        self.install(engine, &PrecedenceSet::new())
    }

    /// Takes over the result of a sub-solver along with the precedences it has installed
    /// in the engine. `offset` is how long after this solver's start the sub-solver started.
    pub fn adopt(&mut self, other: &mut Self, offset: Duration) {
        self.best_makespan = other.best_makespan;
        self.best_solution = other.best_solution.clone();
        self.precedences = std::mem::take(&mut other.precedences);
        self.time_to_best = offset + other.time_to_best;
    }

    /// Every best precedence as `{pred<succ}`, ordered by pair.
    #[must_use]
    pub fn solution_string(&self) -> String {
        self.best_solution.to_string()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::core::{ResourceId, TemporalNetwork};
    use crate::data::unit_capacity_instance;

    fn precedence(pred: usize, succ: usize) -> Precedence {
        Precedence::new(ResourceId(0), ActivityId(pred), ActivityId(succ))
    }

    #[test]
    fn time_budget_runs_out() {
        let budget = TimeBudget::starting_now(Duration::ZERO);
        assert!(budget.is_exhausted());
        assert_eq!(budget.remaining(), Duration::ZERO);

        let budget = TimeBudget::starting_now(Duration::from_secs(3600));
        assert!(!budget.is_exhausted());
    }

    #[test]
    fn add_remove_tracks_engine() -> anyhow::Result<()> {
        let mut network = TemporalNetwork::new(&unit_capacity_instance(&[2, 3, 4]))?;
        let mut base = SolverBase::default();
        base.start(&network);

        assert_eq!(base.makespan(&network)?, 4);
        assert!(base.add_precedence(&mut network, precedence(0, 1))?);
        assert!(!base.add_precedence(&mut network, precedence(0, 1))?);
        assert_eq!(network.precedence_count(), 1);
        assert_eq!(base.makespan(&network)?, 5);

        assert!(base.remove_precedence(&mut network, (ActivityId(0), ActivityId(1)))?.is_some());
        assert!(base.remove_precedence(&mut network, (ActivityId(0), ActivityId(1)))?.is_none());
        assert_eq!(network.precedence_count(), 0);
        Ok(())
    }

    #[test]
    fn best_solution_is_a_copy() -> anyhow::Result<()> {
        let mut network = TemporalNetwork::new(&unit_capacity_instance(&[2, 3, 4]))?;
        let mut base = SolverBase::default();
        base.start(&network);

        base.add_precedence(&mut network, precedence(0, 1))?;
        base.add_precedence(&mut network, precedence(1, 2))?;
        base.record_best(9);
        base.remove_precedence(&mut network, (ActivityId(1), ActivityId(2)))?;
        base.add_precedence(&mut network, precedence(2, 0))?;

        assert_eq!(base.solution_string(), "{0<1}{1<2}");
        assert_eq!(base.best_makespan(), Some(9));

        base.restore_best_solution(&mut network)?;
        assert_eq!(base.precedences(), base.best_solution());
        assert!(network.has_precedence(ActivityId(1), ActivityId(2)));
        assert!(!network.has_precedence(ActivityId(2), ActivityId(0)));
        assert_eq!(base.makespan(&network)?, 9);
        Ok(())
    }

    #[test]
    fn undo_solve_without_solution_is_noop() -> anyhow::Result<()> {
        let mut network = TemporalNetwork::new(&unit_capacity_instance(&[2, 3]))?;
        let mut base = SolverBase::default();
        base.undo_solve(&mut network)?;
        assert_eq!(base.status(), SolveStatus::NotStarted);

        base.start(&network);
        base.add_precedence(&mut network, precedence(0, 1))?;
        base.record_best(5);
        base.undo_solve(&mut network)?;
        assert_eq!(network.precedence_count(), 0);

        // A second undo finds nothing left to remove.
        base.undo_solve(&mut network)?;
        assert_eq!(network.precedence_count(), 0);
        Ok(())
    }
}
