use crate::core::{
    make_resources, slack_comparator, Engine, EngineError, PairKey, Precedence, PrecedenceSet,
    Resource, ResourceId, ResourceMode, SolveStatus, Solver, SolverBase, SolverError, Time,
    TimeBudget, ViolationInfo,
};
use ahash::HashSet;
use log::{debug, info, trace, warn};
use std::fmt::{Display, Formatter};
use std::time::Duration;

/// Counters of the last search, plus the number of searches so far.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SearchStats {
    /// Choices committed on decision points.
    pub executions: usize,
    /// Choices retracted by backtracking.
    pub undos: usize,
    /// Decision points left on the stack when the search stopped.
    pub final_depth: usize,
    /// Searches started by this solver.
    pub runs: usize,
}

/// A violated time of a resource with the precedences that could resolve it.
#[derive(Debug)]
struct DecisionPoint {
    resource: ResourceId,
    time: Time,
    choices: Vec<Precedence>,
    last_executed: Option<Precedence>,
}

impl DecisionPoint {
    fn new(resource: ResourceId, time: Time, mut choices: Vec<Precedence>) -> Self {
        choices.sort_unstable_by(slack_comparator);
        Self {
            resource,
            time,
            choices,
            last_executed: None,
        }
    }

    fn has_choices(&self) -> bool {
        !self.choices.is_empty()
    }

    /// Commits the first untried choice found in `oracle`, or the one with the most slack.
    fn execute(
        &mut self,
        base: &mut SolverBase,
        engine: &mut dyn Engine,
        oracle: &PrecedenceSet,
    ) -> Result<Precedence, EngineError> {
        assert!(self.has_choices(), "{self} has no choice left to execute");

        let index = self
            .choices
            .iter()
            .position(|choice| oracle.contains(choice.key()))
            .unwrap_or(0);
        let choice = self.choices.remove(index);

        base.add_precedence(engine, choice)?;
        self.last_executed = Some(choice);
        trace!("{self}: executed {choice}");
        Ok(choice)
    }

    /// Retracts the last executed choice.
    fn undo(
        &mut self,
        base: &mut SolverBase,
        engine: &mut dyn Engine,
    ) -> Result<Precedence, EngineError> {
        let Some(choice) = self.last_executed.take() else {
            panic!("{self} undone without an executed choice");
        };

        base.remove_precedence(engine, choice.key())?;
        trace!("{self}: undid {choice}");
        Ok(choice)
    }
}

impl Display for DecisionPoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "decision on resource {} at {} ({} left)",
            self.resource,
            self.time,
            self.choices.len()
        )
    }
}

/// Complete depth-first branch and bound over precedence decisions.
///
/// Decision points live on an explicit stack. Each one branches over the orderable pairs of
/// the most violated resource. A branch is cut as soon as the engine becomes inconsistent or
/// the makespan exceeds the best one found.
#[derive(Debug, Default)]
pub struct Exhaustive {
    base: SolverBase,
    resources: Vec<Box<dyn Resource>>,
    decision_stack: Vec<DecisionPoint>,
    current: Option<DecisionPoint>,
    no_goods: HashSet<PairKey>,
    last_index: usize,
    lower_bound: Time,
    upper_bound: Option<Time>,
    stats: SearchStats,
}

impl Exhaustive {
    /// Creates a new instance of `Exhaustive`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn stats(&self) -> SearchStats {
        self.stats
    }

    /// Best precedence set of the last search.
    #[must_use]
    pub const fn best_solution(&self) -> &PrecedenceSet {
        self.base.best_solution()
    }

    /// Searches for a makespan below `upper_bound`, stopping once it reaches `lower_bound`.
    /// Choices present in `oracle` are tried first.
    ///
    /// # Errors
    /// - If the engine rejects a precedence change.
    pub fn search(
        &mut self,
        engine: &mut dyn Engine,
        budget: TimeBudget,
        lower_bound: Time,
        upper_bound: Option<Time>,
        oracle: &PrecedenceSet,
        mode: ResourceMode,
    ) -> Result<SolveStatus, SolverError> {
        self.init(engine, lower_bound, upper_bound, mode);

        let status = loop {
            if budget.is_exhausted() {
                break SolveStatus::TimedOut;
            }
            if let Some(status) = self.step(engine, oracle)? {
                break status;
            }
        };

        self.stats.final_depth = self.decision_stack.len();
        self.decision_stack.clear();
        self.current = None;

        self.base.restore_best_solution(engine)?;
        self.base.finish(status);

        info!(
            "{} finished ({status}) in {:?} after {} executions, best makespan {:?} for solution {}",
            self.name(),
            self.base.elapsed(),
            self.stats.executions,
            self.base.best_makespan(),
            self.base.solution_string()
        );

        Ok(status)
    }

    fn init(
        &mut self,
        engine: &dyn Engine,
        lower_bound: Time,
        upper_bound: Option<Time>,
        mode: ResourceMode,
    ) {
        self.base.start(engine);
        self.resources = make_resources(engine, mode);
        self.decision_stack.clear();
        self.current = None;
        self.no_goods.clear();
        self.last_index = 0;
        self.lower_bound = lower_bound;
        self.upper_bound = upper_bound;
        self.stats = SearchStats {
            runs: self.stats.runs + 1,
            ..SearchStats::default()
        };
    }

    /// One iteration of the search loop. Returns the final status once the search is over.
    fn step(
        &mut self,
        engine: &mut dyn Engine,
        oracle: &PrecedenceSet,
    ) -> Result<Option<SolveStatus>, SolverError> {
        if self.current.is_none() {
            let Some((resource, violation)) = self.find_violation(engine)? else {
                return self.on_solution(engine);
            };
            self.current = Some(self.decision_point(engine, resource, violation)?);
        }

        let Some(mut point) = self.current.take() else {
            return Ok(None);
        };

        if !point.has_choices() {
            if self.decision_stack.is_empty() {
                return Ok(Some(SolveStatus::Exhausted));
            }
            self.backtrack(engine)?;
            return Ok(None);
        }

        let root = self.decision_stack.is_empty();
        let choice = point.execute(&mut self.base, engine, oracle)?;
        self.stats.executions += 1;
        self.decision_stack.push(point);

        if engine.global_violation() > 0 {
            debug!("{choice} is inconsistent, backtracking");
            if root {
                self.no_goods.insert(choice.key());
            }
            self.backtrack(engine)?;
        } else if let Some(upper) = self.upper_bound {
            let makespan = self.base.makespan(engine)?;
            if makespan > upper {
                trace!("makespan {makespan} exceeds {upper}, backtracking");
                self.backtrack(engine)?;
            }
        }

        Ok(None)
    }

    /// Called when no resource is violated any more.
    fn on_solution(&mut self, engine: &mut dyn Engine) -> Result<Option<SolveStatus>, SolverError> {
        if engine.global_violation() == 0 {
            let makespan = self.base.makespan(engine)?;
            if self.upper_bound.map_or(true, |upper| makespan < upper) {
                self.base.record_best(makespan);
                self.upper_bound = Some(makespan);
                info!(
                    "new best makespan {makespan} at depth {} after {:?}",
                    self.decision_stack.len(),
                    self.base.elapsed()
                );
            }
        }

        if self.upper_bound.is_some_and(|upper| upper <= self.lower_bound) {
            return Ok(Some(SolveStatus::BoundsCrossed));
        }
        if self.decision_stack.is_empty() {
            return Ok(Some(SolveStatus::Exhausted));
        }

        self.backtrack(engine)?;
        Ok(None)
    }

    /// Pops the top decision point, undoes its last choice and makes it current again.
    fn backtrack(&mut self, engine: &mut dyn Engine) -> Result<(), SolverError> {
        let Some(mut point) = self.decision_stack.pop() else {
            return Ok(());
        };

        point.undo(&mut self.base, engine)?;
        self.stats.undos += 1;
        self.current = Some(point);
        Ok(())
    }

    /// Most violated resource, scanning round-robin from the one after the last pick.
    fn find_violation(
        &mut self,
        engine: &dyn Engine,
    ) -> Result<Option<(usize, ViolationInfo)>, EngineError> {
        let count = self.resources.len();
        let mut worst: Option<(usize, ViolationInfo)> = None;

        for offset in 0..count {
            let index = (self.last_index + offset) % count;
            let Some(violation) = self.resources[index].max_violation(engine)? else {
                continue;
            };
            if worst.map_or(true, |(_, w)| violation.level < w.level) {
                worst = Some((index, violation));
            }
        }

        if let Some((index, _)) = worst {
            self.last_index = (index + 1) % count;
        }
        Ok(worst)
    }

    fn decision_point(
        &self,
        engine: &dyn Engine,
        index: usize,
        violation: ViolationInfo,
    ) -> Result<DecisionPoint, EngineError> {
        let resource = &self.resources[index];
        let conflict_set = resource.conflict_set(engine, violation.time)?;

        if conflict_set.is_empty() {
            warn!(
                "{}: violated by {} at {} but no orderable pair",
                resource.name(),
                -violation.level,
                violation.time
            );
        }

        let mut choices = Vec::with_capacity(conflict_set.len());
        for key @ (pred, succ) in conflict_set {
            if self.base.is_precedence(key) || self.no_goods.contains(&key) {
                continue;
            }
            let slack = engine
                .activity_bounds(pred)?
                .slack_before(&engine.activity_bounds(succ)?);
            choices.push(Precedence::with_slack(resource.id(), pred, succ, slack));
        }

        Ok(DecisionPoint::new(resource.id(), violation.time, choices))
    }
}

impl Solver for Exhaustive {
    fn solve(
        &mut self,
        engine: &mut dyn Engine,
        timeout: Duration,
        bound: Time,
        mode: ResourceMode,
    ) -> Result<SolveStatus, SolverError> {
        let budget = TimeBudget::starting_now(timeout);
        self.search(engine, budget, bound, None, &PrecedenceSet::new(), mode)
    }

    fn base(&self) -> &SolverBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut SolverBase {
        &mut self.base
    }

    fn name(&self) -> &str {
        "Exhaustive"
    }
}
