//! Instance files, random instances and batch reports.

mod gen;
mod run;

pub use gen::{generate, unit_capacity_instance, GeneratorConfig};
pub use run::{run, Report, ReportEntry};

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::BufRead;

/// Reads a JSON document from `reader`.
///
/// # Errors
/// - If the reader fails or the document doesn't describe a `T`.
pub fn deserialize<T: DeserializeOwned>(reader: &mut impl BufRead) -> anyhow::Result<T> {
    Ok(serde_json::from_reader(reader)?)
}

/// Writes `value` as pretty-printed JSON.
///
/// # Errors
/// - If `value` cannot be represented as JSON.
pub fn to_string<T: Serialize>(value: &T) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}
