//! Land-surface phenology from noisy vegetation-index time series.
//!
//! Per pixel and year: harmonic regression → daily curve → threshold-crossing
//! season metrics. Across years: OLS or Mann–Kendall/Sen trends per pixel or
//! per land-cover zone.

pub mod chunking;
pub mod config;
pub mod error;
pub mod grid;
pub mod harmonic;
pub mod nodata;
pub mod observation;
pub mod phenology;
pub mod smoothing;
pub mod stack;
pub mod synthetic;
pub mod trend;
pub mod zonal;

pub use chunking::{CancelFlag, ChunkPlan};
pub use config::{ClassLegend, PhenologyConfig, PipelineConfig, TrendConfig, ZonalConfig};
pub use error::{Error, Result};
pub use grid::{Extent, Grid};
pub use harmonic::{CurveLength, CurveReconstructor, DailyCurve, HarmonicFitter, HarmonicModel};
pub use observation::{ObservationCube, ObservationSeries};
pub use phenology::{
    AnnualPhenologyEngine, EosConvention, Metric, PhenologyExtractor, PhenologyRaster, PhenologyRecord, RunDiagnostics,
};
pub use stack::{MetricLayers, MetricStack};
pub use trend::{TrendEngine, TrendLabel, TrendMethod, TrendRaster, TrendResult, TrendScope};
pub use zonal::{ZonalAggregator, ZonalSeries, ZonalSummary, ZoneMap, ZoneSummaryRow};
