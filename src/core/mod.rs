mod engine;
mod network;
mod precedence;
mod problem;
mod profile;
mod resource;
mod util;

pub use engine::*;
pub use network::*;
pub use precedence::*;
pub use problem::*;
pub use profile::*;
pub use resource::*;
pub use util::*;

use std::time::Duration;

/// Errors that abort a solve call.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SolverError {
    #[error("engine rejected an operation: {0}")]
    Engine(#[from] EngineError),
}

/// Orders activities by posting precedences until no resource is over capacity.
pub trait Solver {
    /// Solves the problem held by `engine` within `timeout`, stopping early once the
    /// makespan reaches `bound`. Leaves the best solution installed in the engine.
    ///
    /// The engine must not hold precedences of an earlier run: call
    /// [`Solver::undo_solve`] before solving the same engine again.
    ///
    /// # Errors
    /// - If the engine rejects a precedence change.
    fn solve(
        &mut self,
        engine: &mut dyn Engine,
        timeout: Duration,
        bound: Time,
        mode: ResourceMode,
    ) -> Result<SolveStatus, SolverError>;

    /// Shared bookkeeping of the solver.
    fn base(&self) -> &SolverBase;

    /// Mutable shared bookkeeping of the solver.
    fn base_mut(&mut self) -> &mut SolverBase;

    /// Returns the name of the solver.
    fn name(&self) -> &str;

    /// Best makespan found by the last run, `None` if no feasible ordering was found.
    fn best_makespan(&self) -> Option<Time> {
        self.base().best_makespan()
    }

    /// Duration of the last run.
    fn elapsed(&self) -> Duration {
        self.base().elapsed()
    }

    /// Time from the start of the last run to its best solution.
    fn time_to_best(&self) -> Duration {
        self.base().time_to_best()
    }

    /// The best precedence set as `{pred<succ}` edges.
    fn solution_string(&self) -> String {
        self.base().solution_string()
    }

    /// How the last run ended.
    fn status(&self) -> SolveStatus {
        self.base().status()
    }

    /// Removes the best solution from the engine. No-op when nothing was found.
    ///
    /// # Errors
    /// - If the engine rejects one of the removals.
    fn undo_solve(&mut self, engine: &mut dyn Engine) -> Result<(), SolverError> {
        Ok(self.base_mut().undo_solve(engine)?)
    }
}
