//! Harmonic regression: fit per-pixel annual models, then reconstruct a
//! smooth daily curve from them.
pub mod curve;
pub mod fit;

pub use curve::{CurveLength, CurveReconstructor, DailyCurve};
pub use fit::{FitStats, HarmonicFitter, HarmonicModel, DEFAULT_HARMONIC_ORDER};
