//! Run configuration for every pipeline stage.
//!
//! All structs deserialize with per-field defaults, so a JSON file only needs
//! the keys it changes:
//!
//! ```json
//! { "phenology": { "threshold_fraction": 0.4 }, "trend": { "method": "mann_kendall" } }
//! ```

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::chunking::DEFAULT_CHUNK_ROWS;
use crate::error::{Error, Result};
use crate::harmonic::{CurveLength, DEFAULT_HARMONIC_ORDER};
use crate::phenology::{EosConvention, DEFAULT_THRESHOLD_FRACTION};
use crate::smoothing::{SavitzkyGolay, SmoothingConfig};

// ── Phenology ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhenologyConfig {
    /// Harmonic order K; the model has 2K+1 coefficients.
    pub harmonic_order: usize,
    /// Fraction of the seasonal amplitude above the minimum used as threshold.
    pub threshold_fraction: f64,
    pub eos_convention: EosConvention,
    pub curve_length: CurveLength,
    /// Grid rows per parallel work unit.
    pub chunk_rows: usize,
    /// Reduce each pixel-year to 12 monthly means before fitting.
    pub monthly_composite: bool,
    /// Gap interpolation, Savitzky–Golay smoothing and clipping of each
    /// pixel's time-ordered samples before fitting.
    pub smoothing: Option<SmoothingConfig>,
    /// Multiplier applied to raw values (MODIS NDVI: 0.0001).
    pub value_scale: f64,
    /// Raw value meaning "no observation" (MODIS NDVI: -3000).
    pub fill_value: Option<f64>,
}

impl Default for PhenologyConfig {
    fn default() -> Self {
        Self {
            harmonic_order: DEFAULT_HARMONIC_ORDER,
            threshold_fraction: DEFAULT_THRESHOLD_FRACTION,
            eos_convention: EosConvention::default(),
            curve_length: CurveLength::default(),
            chunk_rows: DEFAULT_CHUNK_ROWS,
            monthly_composite: false,
            smoothing: None,
            value_scale: 1.0,
            fill_value: None,
        }
    }
}

impl PhenologyConfig {
    /// MODIS MOD13 NDVI/EVI conventions for raw integer input.
    pub fn modis() -> Self {
        Self {
            value_scale: 1e-4,
            fill_value: Some(-3000.0),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.harmonic_order == 0 {
            return Err(Error::invalid("harmonic_order", self.harmonic_order, "must be a positive integer"));
        }
        if !(self.threshold_fraction > 0.0 && self.threshold_fraction < 1.0) {
            return Err(Error::invalid("threshold_fraction", self.threshold_fraction, "must lie in (0, 1)"));
        }
        if self.chunk_rows == 0 {
            return Err(Error::invalid("chunk_rows", self.chunk_rows, "must be at least 1"));
        }
        if !(self.value_scale.is_finite() && self.value_scale != 0.0) {
            return Err(Error::invalid("value_scale", self.value_scale, "must be finite and non-zero"));
        }
        if self.monthly_composite && 2 * self.harmonic_order + 2 > 12 {
            return Err(Error::invalid(
                "harmonic_order",
                self.harmonic_order,
                "needs more than the 12 samples of a monthly composite",
            ));
        }
        if let Some(smoothing) = &self.smoothing {
            SavitzkyGolay::from_config(smoothing)?;
            if let Some((lo, hi)) = smoothing.clip {
                if !(lo <= hi) {
                    return Err(Error::invalid("clip", format!("{lo}..{hi}"), "lower bound above upper"));
                }
            }
        }
        Ok(())
    }
}

// ── Trend ─────────────────────────────────────────────────────────────────────

/// Trend estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendMethod {
    /// Least-squares slope against year with a Student-t test.
    #[default]
    Ols,
    /// Mann–Kendall test with Sen's slope.
    MannKendall,
}

/// Whether a trend runs over single pixels or over zone means. Only changes
/// the default minimum number of valid years.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendScope {
    Pixel,
    Zone,
}

pub const OLS_PIXEL_MIN_YEARS: usize = 5;
pub const OLS_ZONE_MIN_YEARS: usize = 3;
pub const MANN_KENDALL_MIN_YEARS: usize = 4;
pub const DEFAULT_ALPHA: f64 = 0.05;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendConfig {
    pub method: TrendMethod,
    /// OLS needs strictly more valid years than this; Mann–Kendall at least
    /// this many. `None` picks the default for the method and scope.
    pub min_valid_years: Option<usize>,
    /// Two-sided significance level for the trend label.
    pub alpha: f64,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            method: TrendMethod::default(),
            min_valid_years: None,
            alpha: DEFAULT_ALPHA,
        }
    }
}

impl TrendConfig {
    pub fn ols() -> Self {
        Self::default()
    }

    pub fn mann_kendall() -> Self {
        Self {
            method: TrendMethod::MannKendall,
            ..Self::default()
        }
    }

    pub fn with_min_valid_years(mut self, years: usize) -> Self {
        self.min_valid_years = Some(years);
        self
    }

    pub fn min_valid_years_for(&self, scope: TrendScope) -> usize {
        self.min_valid_years.unwrap_or(match (self.method, scope) {
            (TrendMethod::Ols, TrendScope::Pixel) => OLS_PIXEL_MIN_YEARS,
            (TrendMethod::Ols, TrendScope::Zone) => OLS_ZONE_MIN_YEARS,
            (TrendMethod::MannKendall, _) => MANN_KENDALL_MIN_YEARS,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return Err(Error::invalid("alpha", self.alpha, "must lie in (0, 1)"));
        }
        Ok(())
    }
}

// ── Zonal ─────────────────────────────────────────────────────────────────────

/// Class id → human-readable label.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassLegend(pub BTreeMap<u16, String>);

impl ClassLegend {
    /// IGBP land-cover classification as used by MODIS MCD12Q1 (LC_Type1).
    pub fn igbp() -> Self {
        let entries: [(u16, &str); 18] = [
            (0, "Unclassified"),
            (1, "Evergreen Needleleaf Forests"),
            (2, "Evergreen Broadleaf Forests"),
            (3, "Deciduous Needleleaf Forests"),
            (4, "Deciduous Broadleaf Forests"),
            (5, "Mixed Forests"),
            (6, "Closed Shrublands"),
            (7, "Open Shrublands"),
            (8, "Woody Savannas"),
            (9, "Savannas"),
            (10, "Grasslands"),
            (11, "Permanent Wetlands"),
            (12, "Croplands"),
            (13, "Urban and Built-up Lands"),
            (14, "Cropland/Natural Vegetation Mosaics"),
            (15, "Permanent Snow and Ice"),
            (16, "Barren"),
            (17, "Water Bodies"),
        ];
        Self(entries.into_iter().map(|(id, name)| (id, name.to_string())).collect())
    }

    pub fn label(&self, class_id: u16) -> Option<&str> {
        self.0.get(&class_id).map(String::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZonalConfig {
    pub excluded_classes: BTreeSet<u16>,
    pub legend: ClassLegend,
    /// Overrides the trend minimum for per-zone series.
    pub min_zone_years: Option<usize>,
}

impl ZonalConfig {
    /// IGBP legend with unclassified, urban, snow/ice, barren and water
    /// excluded.
    pub fn igbp_vegetation() -> Self {
        Self {
            excluded_classes: [0, 13, 15, 16, 17].into_iter().collect(),
            legend: ClassLegend::igbp(),
            min_zone_years: None,
        }
    }
}

// ── Pipeline ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub phenology: PhenologyConfig,
    pub trend: TrendConfig,
    pub zonal: ZonalConfig,
}

impl PipelineConfig {
    /// Parse and validate.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(json)
            .map_err(|e| Error::invalid("config", "<json>", e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        self.phenology.validate()?;
        self.trend.validate()
    }

    /// Trend settings for per-zone series, honouring `min_zone_years`.
    pub fn zone_trend(&self) -> TrendConfig {
        TrendConfig {
            min_valid_years: self.zonal.min_zone_years.or(self.trend.min_valid_years),
            ..self.trend.clone()
        }
    }
}
