//! Per-year phenology over a whole grid: fit → reconstruct → extract for every
//! pixel, chunked by row bands.

use std::collections::BTreeMap;
use std::ops::AddAssign;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::extract::PhenologyExtractor;
use super::record::{PhenologyRaster, PhenologyRecord};
use crate::chunking::{process_row_chunks, CancelFlag, ChunkPlan, DEFAULT_CHUNK_ROWS};
use crate::config::PhenologyConfig;
use crate::error::{Error, Result};
use crate::grid::Grid;
use crate::harmonic::{CurveReconstructor, HarmonicFitter};
use crate::observation::{ObservationCube, ObservationSeries};
use crate::smoothing::SavitzkyGolay;
use crate::stack::MetricStack;

/// Above this fraction of unfitted pixels a year is logged as suspicious.
const UNDEFINED_WARN_FRACTION: f64 = 0.5;

/// Per-run counts of how pixels resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunDiagnostics {
    pub pixels: usize,
    pub fitted: usize,
    pub insufficient_data: usize,
    pub singular_system: usize,
    /// Fits whose daily curve was not finite everywhere.
    pub degenerate_curve: usize,
    /// Fitted pixels whose curve had no start-of-season crossing.
    pub undefined_sos: usize,
    /// Fitted pixels whose curve had no end-of-season crossing.
    pub undefined_eos: usize,
}

impl RunDiagnostics {
    pub fn unfitted(&self) -> usize {
        self.insufficient_data + self.singular_system + self.degenerate_curve
    }

    pub fn unfitted_fraction(&self) -> f64 {
        if self.pixels == 0 {
            0.0
        } else {
            self.unfitted() as f64 / self.pixels as f64
        }
    }
}

impl AddAssign for RunDiagnostics {
    fn add_assign(&mut self, rhs: Self) {
        self.pixels += rhs.pixels;
        self.fitted += rhs.fitted;
        self.insufficient_data += rhs.insufficient_data;
        self.singular_system += rhs.singular_system;
        self.degenerate_curve += rhs.degenerate_curve;
        self.undefined_sos += rhs.undefined_sos;
        self.undefined_eos += rhs.undefined_eos;
    }
}

impl RunDiagnostics {
    /// Count one pixel's outcome and turn recoverable failures into an
    /// undefined record. Fatal errors pass through.
    fn record(&mut self, outcome: Result<PhenologyRecord>) -> Result<PhenologyRecord> {
        self.pixels += 1;
        match outcome {
            // Only a non-finite curve leaves the peak undefined.
            Ok(rec) if rec.is_undefined() => {
                self.degenerate_curve += 1;
                Ok(rec)
            }
            Ok(rec) => {
                self.fitted += 1;
                self.undefined_sos += rec.sos_doy.is_none() as usize;
                self.undefined_eos += rec.eos_doy.is_none() as usize;
                Ok(rec)
            }
            Err(e) if e.is_pixel_recoverable() => {
                match e {
                    Error::InsufficientData { .. } => self.insufficient_data += 1,
                    _ => self.singular_system += 1,
                }
                Ok(PhenologyRecord::UNDEFINED)
            }
            Err(e) => Err(e),
        }
    }
}

#[derive(Debug, Clone)]
struct Smoother {
    filter: SavitzkyGolay,
    clip: Option<(f64, f64)>,
}

impl Smoother {
    /// Time-ordered samples with gaps interpolated, smoothed and clipped.
    /// Pixels with too few real observations are rejected before gap filling
    /// can hide it.
    fn apply(&self, series: &ObservationSeries, min_samples: usize) -> Result<Vec<(f64, f64)>> {
        let found = series.valid_count();
        if found < min_samples {
            return Err(Error::InsufficientData { needed: min_samples, found });
        }
        let mut samples: Vec<(f64, f64)> = series
            .times
            .iter()
            .zip(&series.values)
            .filter(|(t, _)| t.is_finite())
            .map(|(&t, &v)| (t, v))
            .collect();
        samples.sort_by(|a, b| a.0.total_cmp(&b.0));
        let raw: Vec<f64> = samples.iter().map(|&(_, v)| v).collect();
        let smoothed = self.filter.preprocess(&raw, self.clip);
        for (s, v) in samples.iter_mut().zip(smoothed) {
            s.1 = v;
        }
        Ok(samples)
    }
}

/// Runs the per-pixel chain across a grid for one year at a time.
///
/// Holds no per-pixel state: the same engine may be reused across years and
/// from several threads.
#[derive(Debug, Clone)]
pub struct AnnualPhenologyEngine {
    fitter: HarmonicFitter,
    reconstructor: CurveReconstructor,
    extractor: PhenologyExtractor,
    monthly_composite: bool,
    smoother: Option<Smoother>,
    fill_value: Option<f64>,
    value_scale: f64,
    chunk_rows: usize,
    cancel: Option<CancelFlag>,
}

impl AnnualPhenologyEngine {
    /// Engine with the given harmonic order and threshold fraction, other
    /// settings at their defaults.
    pub fn new(harmonic_order: usize, threshold_fraction: f64) -> Result<Self> {
        Self::from_config(&PhenologyConfig {
            harmonic_order,
            threshold_fraction,
            ..PhenologyConfig::default()
        })
    }

    pub fn from_config(cfg: &PhenologyConfig) -> Result<Self> {
        cfg.validate()?;
        let smoother = match &cfg.smoothing {
            Some(s) => Some(Smoother {
                filter: SavitzkyGolay::from_config(s)?,
                clip: s.clip,
            }),
            None => None,
        };
        Ok(Self {
            fitter: HarmonicFitter::new(cfg.harmonic_order)?,
            reconstructor: CurveReconstructor::new(cfg.curve_length),
            extractor: PhenologyExtractor::new(cfg.threshold_fraction, cfg.eos_convention),
            monthly_composite: cfg.monthly_composite,
            smoother,
            fill_value: cfg.fill_value,
            value_scale: cfg.value_scale,
            chunk_rows: cfg.chunk_rows,
            cancel: None,
        })
    }

    /// Check `flag` between chunks and stop with `Cancelled` once it is raised.
    pub fn with_cancel_flag(mut self, flag: CancelFlag) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn with_chunk_rows(mut self, chunk_rows: usize) -> Self {
        self.chunk_rows = chunk_rows.max(1);
        self
    }

    pub fn fitter(&self) -> &HarmonicFitter {
        &self.fitter
    }

    /// Full chain for one pixel: optional monthly compositing and
    /// preprocessing, then fit, daily curve and extraction. Recoverable fit
    /// failures come back as errors here; [`Self::process_into`] turns them
    /// into undefined records.
    pub fn process_series(&self, series: &ObservationSeries, year: i32) -> Result<PhenologyRecord> {
        let composite;
        let series = if self.monthly_composite {
            composite = series.monthly_composite(year);
            &composite
        } else {
            series
        };
        let samples = match &self.smoother {
            Some(smoother) => smoother.apply(series, self.fitter.min_samples())?,
            None => series.valid().collect(),
        };
        let (model, _) = self.fitter.fit_samples(&samples)?;
        let curve = self.reconstructor.daily(&model, year)?;
        Ok(self.extractor.extract(&curve))
    }

    /// Process `cube` for `year` into a preallocated raster of the same shape.
    ///
    /// On `Cancelled` the bands finished before the flag was seen hold final
    /// records and the rest are untouched.
    pub fn process_into(&self, cube: &ObservationCube, year: i32, out: &mut PhenologyRaster) -> Result<RunDiagnostics> {
        cube.check()?;
        if cube.shape() != out.shape() {
            return Err(Error::GridMismatch {
                expected: cube.shape(),
                found: out.shape(),
            });
        }
        let width = cube.width;
        let plan = ChunkPlan::new(width, cube.height, self.chunk_rows);

        let diag = process_row_chunks(&mut out.data, plan, self.cancel.as_ref(), |first_row, band| {
            let mut diag = RunDiagnostics::default();
            for (i, cell) in band.iter_mut().enumerate() {
                let (row, col) = (first_row + i / width, i % width);
                let series = cube.series(row, col, self.fill_value, self.value_scale);
                *cell = diag
                    .record(self.process_series(&series, year))
                    .map_err(|e| e.at_pixel(row, col))?;
            }
            debug!(year, first_row, pixels = diag.pixels, fitted = diag.fitted, "chunk done");
            Ok(diag)
        })?;

        info!(
            year,
            pixels = diag.pixels,
            fitted = diag.fitted,
            insufficient_data = diag.insufficient_data,
            singular_system = diag.singular_system,
            degenerate_curve = diag.degenerate_curve,
            undefined_sos = diag.undefined_sos,
            undefined_eos = diag.undefined_eos,
            "annual phenology complete"
        );
        if diag.unfitted_fraction() > UNDEFINED_WARN_FRACTION {
            warn!(
                year,
                unfitted = diag.unfitted(),
                pixels = diag.pixels,
                "more than half of the pixels could not be fitted"
            );
        }
        Ok(diag)
    }

    pub fn process(&self, cube: &ObservationCube, year: i32) -> Result<(PhenologyRaster, RunDiagnostics)> {
        let mut out = Grid::filled(cube.width, cube.height, cube.extent, PhenologyRecord::UNDEFINED);
        let diag = self.process_into(cube, year, &mut out)?;
        Ok((out, diag))
    }

    /// One raster per year, stacked. Years run one after another; the pixels
    /// of each year run in parallel.
    pub fn process_years(&self, cubes: &BTreeMap<i32, ObservationCube>) -> Result<(MetricStack, RunDiagnostics)> {
        let mut stack = MetricStack::new();
        let mut total = RunDiagnostics::default();
        for (&year, cube) in cubes {
            let (raster, diag) = self.process(cube, year)?;
            stack.insert(year, raster)?;
            total += diag;
        }
        Ok((stack, total))
    }
}

impl Default for AnnualPhenologyEngine {
    fn default() -> Self {
        Self {
            fitter: HarmonicFitter::default(),
            reconstructor: CurveReconstructor::default(),
            extractor: PhenologyExtractor::default(),
            monthly_composite: false,
            smoother: None,
            fill_value: None,
            value_scale: 1.0,
            chunk_rows: DEFAULT_CHUNK_ROWS,
            cancel: None,
        }
    }
}
