#![deny(clippy::all, clippy::cargo, clippy::expect_used, clippy::unwrap_used)]
#![deny(clippy::pedantic, clippy::nursery, unsafe_code)]
#![warn(clippy::unimplemented, clippy::redundant_type_annotations)]

use anyhow::Result;
use std::io::BufRead;
use std::time::Duration;

pub mod algo;
pub mod core;
pub mod data;

/// Runs the given solver on the instance read from reader and writes the result to stdout.
/// The first line holds the makespan, `none` if no feasible ordering was found, the second
/// line the precedences of the best solution.
///
/// The solver stops early once it reaches the bound stored in the instance, or `bound` if
/// given.
///
/// # Errors
/// - If the instance could not be read from the reader or is invalid.
/// - If the solver fails.
pub fn run_reader(
    solver: &mut dyn core::Solver,
    reader: &mut impl BufRead,
    timeout: Duration,
    bound: Option<core::Time>,
    mode: core::ResourceMode,
) -> Result<()> {
    let instance: core::Instance = data::deserialize(reader)?;
    let bound = bound.or(instance.bound).unwrap_or(0);
    let mut network = core::TemporalNetwork::new(&instance)?;

    let status = solver.solve(&mut network, timeout, bound, mode)?;
    log::info!("{} stopped: {status}", solver.name());

    match solver.best_makespan() {
        Some(makespan) => println!("{makespan}"),
        None => println!("none"),
    }
    println!("{}", solver.solution_string());

    Ok(())
}
