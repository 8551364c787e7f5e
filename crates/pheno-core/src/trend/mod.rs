//! Inter-annual trends of one phenology metric, per pixel or per zone.
//!
//! Undefined years (NaN) are dropped before either estimator runs. The year
//! axis is `year − first stacked year`, so slopes are in metric units per year
//! and intercepts refer to the first year of the stack.

pub mod mann_kendall;
pub mod ols;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::chunking::{process_row_chunks, CancelFlag, ChunkPlan, DEFAULT_CHUNK_ROWS};
use crate::error::{Error, Result};
use crate::grid::Grid;
use crate::nodata::{f64_or_nan, NullCell};
use crate::phenology::Metric;
use crate::stack::{MetricLayers, MetricStack};
use crate::zonal::ZonalSeries;

pub use crate::config::{TrendConfig, TrendMethod, TrendScope};
pub use mann_kendall::{mann_kendall, sens_slope, MannKendall};
pub use ols::{ols_fit, OlsFit};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendLabel {
    Increasing,
    Decreasing,
    NoTrend,
}

/// Trend of one metric at one pixel or zone.
///
/// `label` is `None` when there were too few valid years; every float is then
/// NaN. `statistic` is the t statistic for OLS and the z score for
/// Mann–Kendall.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendResult {
    pub label: Option<TrendLabel>,
    #[serde(deserialize_with = "f64_or_nan")]
    pub slope: f64,
    #[serde(deserialize_with = "f64_or_nan")]
    pub intercept: f64,
    #[serde(deserialize_with = "f64_or_nan")]
    pub statistic: f64,
    #[serde(deserialize_with = "f64_or_nan")]
    pub p_value: f64,
    /// Valid years that went into the estimate.
    pub n_valid: usize,
}

impl TrendResult {
    pub const UNDEFINED: TrendResult = TrendResult {
        label: None,
        slope: f64::NAN,
        intercept: f64::NAN,
        statistic: f64::NAN,
        p_value: f64::NAN,
        n_valid: 0,
    };

    pub fn is_undefined(&self) -> bool {
        self.label.is_none()
    }
}

impl Default for TrendResult {
    fn default() -> Self {
        Self::UNDEFINED
    }
}

impl NullCell for TrendResult {
    fn null() -> Self {
        Self::UNDEFINED
    }
}

pub type TrendRaster = Grid<TrendResult>;

/// Slope of every cell, NaN where undefined.
pub fn slopes(raster: &TrendRaster) -> Grid<f64> {
    raster.map(|r| r.slope)
}

/// Runs the configured estimator over per-year series.
#[derive(Debug, Clone)]
pub struct TrendEngine {
    config: TrendConfig,
    scope: TrendScope,
    chunk_rows: usize,
    cancel: Option<CancelFlag>,
}

impl TrendEngine {
    pub fn new(config: TrendConfig, scope: TrendScope) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            scope,
            chunk_rows: DEFAULT_CHUNK_ROWS,
            cancel: None,
        })
    }

    pub fn with_chunk_rows(mut self, chunk_rows: usize) -> Self {
        self.chunk_rows = chunk_rows.max(1);
        self
    }

    pub fn with_cancel_flag(mut self, flag: CancelFlag) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn config(&self) -> &TrendConfig {
        &self.config
    }

    pub fn min_valid_years(&self) -> usize {
        self.config.min_valid_years_for(self.scope)
    }

    /// Trend of `values[i]` observed in `years[i]`; NaN values are skipped.
    pub fn series(&self, years: &[i32], values: &[f64]) -> TrendResult {
        let Some(&origin) = years.first() else {
            return TrendResult::UNDEFINED;
        };
        let (xs, ys): (Vec<f64>, Vec<f64>) = years
            .iter()
            .zip(values)
            .filter(|(_, v)| v.is_finite())
            .map(|(&y, &v)| (f64::from(y - origin), v))
            .unzip();
        let n_valid = ys.len();
        let min = self.min_valid_years();

        match self.config.method {
            TrendMethod::Ols => {
                if n_valid <= min {
                    return TrendResult { n_valid, ..TrendResult::UNDEFINED };
                }
                match ols_fit(&xs, &ys) {
                    Some(fit) => TrendResult {
                        label: Some(self.label(fit.p_value, fit.slope, fit.t_statistic)),
                        slope: fit.slope,
                        intercept: fit.intercept,
                        statistic: fit.t_statistic,
                        p_value: fit.p_value,
                        n_valid,
                    },
                    None => TrendResult { n_valid, ..TrendResult::UNDEFINED },
                }
            }
            TrendMethod::MannKendall => {
                if n_valid < min {
                    return TrendResult { n_valid, ..TrendResult::UNDEFINED };
                }
                match mann_kendall(&xs, &ys) {
                    Some(mk) => TrendResult {
                        label: Some(self.label(mk.p_value, mk.sen_slope, mk.z)),
                        slope: mk.sen_slope,
                        intercept: mk.intercept,
                        statistic: mk.z,
                        p_value: mk.p_value,
                        n_valid,
                    },
                    None => TrendResult { n_valid, ..TrendResult::UNDEFINED },
                }
            }
        }
    }

    /// Significant trends take the sign of the slope, or of the test
    /// statistic when the robust slope is exactly zero.
    fn label(&self, p_value: f64, slope: f64, statistic: f64) -> TrendLabel {
        if !(p_value < self.config.alpha) {
            return TrendLabel::NoTrend;
        }
        let direction = if slope != 0.0 { slope } else { statistic };
        if direction > 0.0 {
            TrendLabel::Increasing
        } else if direction < 0.0 {
            TrendLabel::Decreasing
        } else {
            TrendLabel::NoTrend
        }
    }

    /// Per-pixel trend raster of one metric.
    pub fn pixel_trends(&self, layers: &MetricLayers) -> Result<TrendRaster> {
        let width = layers.width;
        let mut out = Grid::filled(width, layers.height, layers.extent, TrendResult::UNDEFINED);
        let plan = ChunkPlan::new(width, layers.height, self.chunk_rows);

        let undefined: usize = process_row_chunks(&mut out.data, plan, self.cancel.as_ref(), |first_row, band| {
            let mut undefined = 0;
            for (i, cell) in band.iter_mut().enumerate() {
                *cell = self.series(&layers.years, &layers.pixel_series(first_row * width + i));
                undefined += cell.is_undefined() as usize;
            }
            Ok(undefined)
        })?;

        info!(
            metric = %layers.metric,
            method = ?self.config.method,
            years = layers.years.len(),
            pixels = out.len(),
            undefined,
            "pixel trends complete"
        );
        Ok(out)
    }

    /// Trend of each zone's yearly mean series.
    pub fn zone_trends(&self, series: &ZonalSeries) -> BTreeMap<u16, TrendResult> {
        series
            .classes
            .iter()
            .map(|(&class_id, values)| (class_id, self.series(&series.years, values)))
            .collect()
    }

    /// EOS slope minus SOS slope per pixel: the trend of the season length
    /// implied by the two boundary trends.
    pub fn season_length_difference(&self, stack: &MetricStack) -> Result<Grid<f64>> {
        if stack.is_empty() {
            return Err(Error::InsufficientData { needed: 1, found: 0 });
        }
        let eos = self.pixel_trends(&stack.layers(Metric::Eos))?;
        let sos = self.pixel_trends(&stack.layers(Metric::Sos))?;
        let data = eos.data.iter().zip(&sos.data).map(|(e, s)| e.slope - s.slope).collect();
        Grid::from_vec(eos.width, eos.height, eos.extent, data)
    }
}
