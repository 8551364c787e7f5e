//! Season timing from reconstructed curves, per pixel and per grid.

pub mod engine;
pub mod extract;
pub mod record;

pub use engine::{AnnualPhenologyEngine, RunDiagnostics};
pub use extract::{EosConvention, PhenologyExtractor, DEFAULT_THRESHOLD_FRACTION};
pub use record::{Metric, PhenologyRaster, PhenologyRecord};
