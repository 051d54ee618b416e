use crate::core::{Instance, ResourceMode, Solver, Time, TemporalNetwork};
use crate::data::deserialize;
use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Report of running a directory of instances.
#[derive(Debug, Deserialize, Serialize)]
pub struct Report {
    solver: String,
    entries: Vec<ReportEntry>,
}

impl Report {
    /// Create a new report.
    fn new(solver: String) -> Self {
        let entries = Vec::new();
        Self { solver, entries }
    }

    /// Get the solver name.
    #[must_use]
    pub fn solver_name(&self) -> &str {
        &self.solver
    }

    /// Get the entries.
    #[must_use]
    pub fn entries(&self) -> &[ReportEntry] {
        &self.entries
    }
}

impl Display for Report {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        writeln!(f, "Solver: {}", self.solver)?;
        for entry in &self.entries {
            writeln!(f, "{entry}")?;
        }
        writeln!(f, "-------------------")
    }
}

/// Result of solving a single instance.
#[non_exhaustive]
#[derive(Debug, Deserialize, Serialize)]
pub struct ReportEntry {
    pub name: String,
    pub bound: Time,
    /// 0 when no feasible ordering was found.
    pub makespan: Time,
    pub elapsed_ms: u128,
    pub time_to_best_ms: u128,
    pub solution: String,
}

impl Display for ReportEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(
            f,
            "{} {} {} {} {} {}",
            self.name,
            self.bound,
            self.makespan,
            self.elapsed_ms,
            self.time_to_best_ms,
            self.solution
        )
    }
}

/// Solve every `*.json` instance in `dir`, in file name order.
///
/// The solver stops early once it reaches the bound stored in an instance.
///
/// # Errors
/// - If a file cannot be read or isn't a valid instance.
/// - If the solver fails.
pub fn run(
    dir: impl AsRef<Path>,
    solver: &mut dyn Solver,
    timeout: Duration,
    mode: ResourceMode,
) -> anyhow::Result<Report> {
    let mut report = Report::new(solver.name().into());

    for path in instance_files(dir.as_ref())? {
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| anyhow!("Cannot read filename {}", path.display()))?
            .to_string();
        let instance: Instance = deserialize(&mut BufReader::new(File::open(&path)?))?;
        let bound = instance.bound.unwrap_or(0);

        let mut network = TemporalNetwork::new(&instance)?;
        solver.solve(&mut network, timeout, bound, mode)?;

        report.entries.push(ReportEntry {
            name,
            bound,
            makespan: solver.best_makespan().unwrap_or(0),
            elapsed_ms: solver.elapsed().as_millis(),
            time_to_best_ms: solver.time_to_best().as_millis(),
            solution: solver.solution_string(),
        });
    }

    Ok(report)
}

fn instance_files(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for file in std::fs::read_dir(dir)? {
        let path = file?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::algo::Exhaustive;
    use crate::data::{to_string, unit_capacity_instance};

    #[test]
    fn entry_is_one_row() {
        let entry = ReportEntry {
            name: "j30_1.json".into(),
            bound: 40,
            makespan: 43,
            elapsed_ms: 120,
            time_to_best_ms: 15,
            solution: "{0<1}{1<2}".into(),
        };
        assert_eq!(entry.to_string(), "j30_1.json 40 43 120 15 {0<1}{1<2}");
    }

    #[test]
    fn runs_every_instance_in_directory() -> anyhow::Result<()> {
        let dir = std::env::temp_dir().join(format!("rcpsp_search_run_{}", std::process::id()));
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join("b.json"), to_string(&unit_capacity_instance(&[2, 3]))?)?;
        std::fs::write(
            dir.join("a.json"),
            to_string(&unit_capacity_instance(&[1, 1, 1]).with_bound(3))?,
        )?;
        std::fs::write(dir.join("notes.txt"), "not an instance")?;

        let mut solver = Exhaustive::new();
        let report = run(&dir, &mut solver, Duration::from_secs(10), ResourceMode::Local);
        std::fs::remove_dir_all(&dir)?;
        let report = report?;

        assert_eq!(report.solver_name(), "Exhaustive");
        let rows: Vec<_> = report
            .entries()
            .iter()
            .map(|e| (e.name.as_str(), e.bound, e.makespan))
            .collect();
        assert_eq!(rows, vec![("a.json", 3, 3), ("b.json", 0, 5)]);
        assert!(report.to_string().starts_with("Solver: Exhaustive\n"));
        Ok(())
    }

    #[test]
    fn missing_directory_is_an_error() {
        let mut solver = Exhaustive::new();
        let report = run(
            "/nonexistent/rcpsp_search",
            &mut solver,
            Duration::from_secs(1),
            ResourceMode::Engine,
        );
        assert!(report.is_err());
    }
}
