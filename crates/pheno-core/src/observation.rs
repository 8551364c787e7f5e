//! Per-pixel observation series and the (row, col, sample) observation cube.
//!
//! Timestamps are fractional years: `2013.0` is 1 January 2013, and day-of-year
//! `d` of year `y` sits at `y + (d − 1) / days_in_year(y)`. Missing values are
//! NaN throughout; raw fill codes are mapped to NaN on ingest.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::grid::{Extent, Grid};

// ── Calendar helpers ──────────────────────────────────────────────────────────

pub fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

pub fn days_in_year(year: i32) -> u16 {
    if is_leap_year(year) { 366 } else { 365 }
}

/// Fractional-year timestamp of day-of-year `doy` (1-based).
pub fn fractional_year(year: i32, doy: u16) -> f64 {
    year as f64 + (doy as f64 - 1.0) / days_in_year(year) as f64
}

/// Inverse of [`fractional_year`]: (year, 1-based day-of-year).
pub fn split_fractional_year(t: f64) -> (i32, u16) {
    let year = t.floor() as i32;
    let days = days_in_year(year);
    let doy = (((t - year as f64) * days as f64).floor() as u16 + 1).min(days);
    (year, doy)
}

const MONTH_STARTS: [u16; 12] = [1, 32, 60, 91, 121, 152, 182, 213, 244, 274, 305, 335];

/// Month index 0–11 for a 1-based day-of-year.
pub fn month_of_doy(year: i32, doy: u16) -> usize {
    let leap = if is_leap_year(year) { 1 } else { 0 };
    MONTH_STARTS
        .iter()
        .enumerate()
        .rev()
        .find(|&(m, &start)| doy >= start + if m >= 2 { leap } else { 0 })
        .map(|(m, _)| m)
        .unwrap_or(0)
}

/// Fractional-year timestamp of the middle of month `month` (0–11).
pub fn mid_month(year: i32, month: usize) -> f64 {
    let leap = if is_leap_year(year) { 1 } else { 0 };
    let start = MONTH_STARTS[month] + if month >= 2 { leap } else { 0 };
    let end = if month == 11 {
        days_in_year(year) + 1
    } else {
        MONTH_STARTS[month + 1] + if month + 1 >= 2 { leap } else { 0 }
    };
    let mid = (start + end) as f64 / 2.0;
    year as f64 + (mid - 1.0) / days_in_year(year) as f64
}

// ── Series ────────────────────────────────────────────────────────────────────

/// Ordered (timestamp, value) samples for one pixel within one year.
///
/// Duplicate timestamps are kept as-is; they simply weigh more in the fit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObservationSeries {
    #[serde(deserialize_with = "crate::nodata::deserialize_cells")]
    pub times: Vec<f64>,
    #[serde(deserialize_with = "crate::nodata::deserialize_cells")]
    pub values: Vec<f64>,
}

impl ObservationSeries {
    pub fn new(times: Vec<f64>, values: Vec<f64>) -> Result<Self> {
        if times.len() != values.len() {
            return Err(Error::invalid(
                "values",
                values.len(),
                format!("expected {} values to match timestamps", times.len()),
            ));
        }
        Ok(Self { times, values })
    }

    /// Build from raw sensor values: `fill_value` becomes missing, the rest
    /// are multiplied by `scale`.
    pub fn from_raw(times: &[f64], raw: &[f64], fill_value: Option<f64>, scale: f64) -> Self {
        let values = raw
            .iter()
            .map(|&v| match fill_value {
                Some(fill) if v == fill => f64::NAN,
                _ => v * scale,
            })
            .collect();
        Self { times: times.to_vec(), values }
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Samples whose timestamp and value are both finite.
    pub fn valid(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.times
            .iter()
            .zip(self.values.iter())
            .filter(|(t, v)| t.is_finite() && v.is_finite())
            .map(|(&t, &v)| (t, v))
    }

    pub fn valid_count(&self) -> usize {
        self.valid().count()
    }

    /// Mean of the valid samples falling in each calendar month of `year`.
    ///
    /// Months without any valid sample yield `None` rather than a zero.
    pub fn monthly_means(&self, year: i32) -> [Option<f64>; 12] {
        let mut sums = [0f64; 12];
        let mut counts = [0usize; 12];
        for (t, v) in self.valid() {
            let (y, doy) = split_fractional_year(t);
            if y != year {
                continue;
            }
            let m = month_of_doy(y, doy);
            sums[m] += v;
            counts[m] += 1;
        }
        let mut out = [None; 12];
        for m in 0..12 {
            if counts[m] > 0 {
                out[m] = Some(sums[m] / counts[m] as f64);
            }
        }
        out
    }

    /// Twelve samples at mid-month timestamps holding [`Self::monthly_means`];
    /// empty months stay as NaN placeholders.
    pub fn monthly_composite(&self, year: i32) -> ObservationSeries {
        Self {
            times: (0..12).map(|m| mid_month(year, m)).collect(),
            values: self.monthly_means(year).iter().map(|m| m.unwrap_or(f64::NAN)).collect(),
        }
    }

    /// Mean of the valid samples; NaN when there are none.
    pub fn mean(&self) -> f64 {
        let (sum, n) = self.valid().fold((0.0, 0usize), |(s, n), (_, v)| (s + v, n + 1));
        if n == 0 { f64::NAN } else { sum / n as f64 }
    }
}

// ── Cube ──────────────────────────────────────────────────────────────────────

/// Observation cube indexed by (row, col, sample).
///
/// Pixel (r, c) owns samples `[(r·width + c)·samples, …)` of both `times` and
/// `values`. NaN in either marks a missing sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationCube {
    pub width: usize,
    pub height: usize,
    pub samples: usize,
    #[serde(deserialize_with = "crate::nodata::deserialize_cells")]
    pub times: Vec<f64>,
    #[serde(deserialize_with = "crate::nodata::deserialize_cells")]
    pub values: Vec<f64>,
    #[serde(default)]
    pub extent: Extent,
}

impl ObservationCube {
    pub fn new(
        width: usize,
        height: usize,
        samples: usize,
        times: Vec<f64>,
        values: Vec<f64>,
        extent: Extent,
    ) -> Result<Self> {
        let cube = Self { width, height, samples, times, values, extent };
        cube.check()?;
        Ok(cube)
    }

    /// Cube whose pixels were all observed at the same acquisition times.
    pub fn with_shared_times(
        width: usize,
        height: usize,
        times: &[f64],
        values: Vec<f64>,
        extent: Extent,
    ) -> Result<Self> {
        let samples = times.len();
        let all_times = times.iter().cloned().cycle().take(width * height * samples).collect();
        Self::new(width, height, samples, all_times, values, extent)
    }

    /// Validate buffer lengths against the declared shape.
    pub fn check(&self) -> Result<()> {
        let expected = self.width * self.height * self.samples;
        if self.times.len() != expected || self.values.len() != expected {
            return Err(Error::invalid(
                "cube",
                format!("{} times / {} values", self.times.len(), self.values.len()),
                format!("expected {expected} = {}x{}x{}", self.width, self.height, self.samples),
            ));
        }
        Ok(())
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    #[inline]
    fn span(&self, row: usize, col: usize) -> std::ops::Range<usize> {
        let start = (row * self.width + col) * self.samples;
        start..start + self.samples
    }

    pub fn pixel_times(&self, row: usize, col: usize) -> &[f64] {
        &self.times[self.span(row, col)]
    }

    pub fn pixel_values(&self, row: usize, col: usize) -> &[f64] {
        &self.values[self.span(row, col)]
    }

    /// Series for one pixel with fill codes masked and values scaled.
    pub fn series(&self, row: usize, col: usize, fill_value: Option<f64>, scale: f64) -> ObservationSeries {
        ObservationSeries::from_raw(self.pixel_times(row, col), self.pixel_values(row, col), fill_value, scale)
    }

    /// Collapse each pixel's samples to 12 monthly means for `year`.
    ///
    /// Months with no valid observation become a fully masked (NaN) sample at
    /// the mid-month timestamp, so every pixel keeps the same 12-sample shape.
    pub fn monthly_composite(&self, year: i32) -> ObservationCube {
        let mut times = Vec::with_capacity(self.pixel_count() * 12);
        let mut values = Vec::with_capacity(self.pixel_count() * 12);
        for row in 0..self.height {
            for col in 0..self.width {
                let monthly = self.series(row, col, None, 1.0).monthly_composite(year);
                times.extend(monthly.times);
                values.extend(monthly.values);
            }
        }
        ObservationCube {
            width: self.width,
            height: self.height,
            samples: 12,
            times,
            values,
            extent: self.extent,
        }
    }

    /// Per-pixel mean of the valid, scaled observations: the annual mean
    /// index raster. NaN where a pixel has no valid sample.
    pub fn annual_mean(&self, fill_value: Option<f64>, scale: f64) -> Result<Grid<f64>> {
        self.check()?;
        let data = (0..self.height)
            .flat_map(|row| (0..self.width).map(move |col| (row, col)))
            .map(|(row, col)| self.series(row, col, fill_value, scale).mean())
            .collect();
        Grid::from_vec(self.width, self.height, self.extent, data)
    }
}
