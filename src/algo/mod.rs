mod exhaustive;
mod flatten_relax;
mod hybrid;

pub use exhaustive::{Exhaustive, SearchStats};
pub use flatten_relax::{FlattenRelax, FlattenRelaxConfig};
pub use hybrid::{Hybrid, HybridConfig};
