//! Order-K harmonic (Fourier) regression of one pixel's annual observations.
//!
//! Design matrix columns for a sample at fractional year t:
//!   [1, sin(2π·1·t), cos(2π·1·t), …, sin(2π·K·t), cos(2π·K·t)]
//!
//! The system is solved by SVD least squares. The fit is rejected as singular
//! when the numerical rank falls below 2K+1 (e.g. every timestamp lands on the
//! same phase of the year).

use std::f64::consts::PI;

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::observation::ObservationSeries;

pub const DEFAULT_HARMONIC_ORDER: usize = 3;

/// Fitted coefficient vector `[c0, s1, c1, …, sK, cK]` for one pixel-year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarmonicModel {
    pub order: usize,
    pub coefficients: Vec<f64>,
}

impl HarmonicModel {
    /// Wrap an externally supplied coefficient vector. The length is not
    /// checked here; evaluation rejects a mismatched model.
    pub fn from_coefficients(order: usize, coefficients: Vec<f64>) -> Self {
        Self { order, coefficients }
    }

    /// Number of coefficients for a model of the given order.
    pub fn coefficient_count(order: usize) -> usize {
        2 * order + 1
    }

    pub fn check_shape(&self) -> Result<()> {
        let expected = Self::coefficient_count(self.order);
        if self.coefficients.len() != expected {
            return Err(Error::ModelShape {
                expected,
                found: self.coefficients.len(),
            });
        }
        Ok(())
    }

    pub fn constant(&self) -> f64 {
        self.coefficients.first().copied().unwrap_or(f64::NAN)
    }

    /// (sin, cos) coefficients of harmonic `k` (1-based).
    pub fn pair(&self, k: usize) -> Option<(f64, f64)> {
        if k == 0 || k > self.order {
            return None;
        }
        let i = 2 * k - 1;
        Some((*self.coefficients.get(i)?, *self.coefficients.get(i + 1)?))
    }

    /// Evaluate at fractional year `t`. Caller guarantees the shape.
    #[inline]
    pub(crate) fn evaluate_unchecked(&self, t: f64) -> f64 {
        let x = 2.0 * PI * t;
        let mut v = self.coefficients[0];
        for k in 1..=self.order {
            let (s, c) = (self.coefficients[2 * k - 1], self.coefficients[2 * k]);
            let kx = k as f64 * x;
            v += s * kx.sin() + c * kx.cos();
        }
        v
    }
}

/// Goodness of fit on the samples used.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitStats {
    pub samples: usize,
    pub rmse: f64,
    /// NaN when the observations have zero variance.
    pub r_squared: f64,
}

/// Least-squares harmonic regression of fixed order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HarmonicFitter {
    order: usize,
}

impl Default for HarmonicFitter {
    fn default() -> Self {
        Self { order: DEFAULT_HARMONIC_ORDER }
    }
}

impl HarmonicFitter {
    pub fn new(order: usize) -> Result<Self> {
        if order == 0 {
            return Err(Error::invalid("harmonic_order", order, "must be a positive integer"));
        }
        Ok(Self { order })
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn coefficient_count(&self) -> usize {
        HarmonicModel::coefficient_count(self.order)
    }

    /// Minimum valid samples for a well-posed fit: 2K+2.
    pub fn min_samples(&self) -> usize {
        2 * self.order + 2
    }

    pub fn fit(&self, series: &ObservationSeries) -> Result<HarmonicModel> {
        self.fit_with_stats(series).map(|(model, _)| model)
    }

    pub fn fit_with_stats(&self, series: &ObservationSeries) -> Result<(HarmonicModel, FitStats)> {
        let samples: Vec<(f64, f64)> = series.valid().collect();
        self.fit_samples(&samples)
    }

    /// Fit already-filtered (t, value) samples.
    pub fn fit_samples(&self, samples: &[(f64, f64)]) -> Result<(HarmonicModel, FitStats)> {
        let needed = self.min_samples();
        if samples.len() < needed {
            return Err(Error::InsufficientData {
                needed,
                found: samples.len(),
            });
        }

        let n = samples.len();
        let p = self.coefficient_count();
        let design = DMatrix::from_fn(n, p, |i, j| basis_value(samples[i].0, j));
        let y = DVector::from_iterator(n, samples.iter().map(|&(_, v)| v));

        let svd = design.clone().svd(true, true);
        let max_sv = svd.singular_values.iter().cloned().fold(0.0_f64, f64::max);
        let eps = max_sv * n.max(p) as f64 * f64::EPSILON;
        let rank = svd.rank(eps);
        if rank < p {
            return Err(Error::SingularSystem { rank, columns: p });
        }
        let beta = svd
            .solve(&y, eps)
            .map_err(|_| Error::SingularSystem { rank, columns: p })?;

        let fitted = &design * &beta;
        let rss: f64 = (&y - &fitted).iter().map(|r| r * r).sum();
        let mean = y.mean();
        let tss: f64 = y.iter().map(|v| (v - mean).powi(2)).sum();
        let stats = FitStats {
            samples: n,
            rmse: (rss / n as f64).sqrt(),
            r_squared: if tss > 0.0 { 1.0 - rss / tss } else { f64::NAN },
        };

        Ok((
            HarmonicModel {
                order: self.order,
                coefficients: beta.iter().cloned().collect(),
            },
            stats,
        ))
    }
}

/// Column `j` of the design matrix at fractional year `t`.
#[inline]
fn basis_value(t: f64, j: usize) -> f64 {
    if j == 0 {
        return 1.0;
    }
    let k = ((j + 1) / 2) as f64;
    let x = 2.0 * PI * k * t;
    if j % 2 == 1 { x.sin() } else { x.cos() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn series_from(model: &HarmonicModel, times: &[f64]) -> ObservationSeries {
        let values = times.iter().map(|&t| model.evaluate_unchecked(t)).collect();
        ObservationSeries::new(times.to_vec(), values).unwrap()
    }

    /// Irregular 16-day-ish sampling with jitter, like a MODIS composite.
    fn irregular_times(year: f64, n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| year + (i as f64 + 0.3 * ((i * 7) % 5) as f64 / 5.0) / n as f64)
            .collect()
    }

    #[test]
    fn recovers_generating_coefficients() {
        let truth = HarmonicModel::from_coefficients(3, vec![0.45, -0.20, -0.12, 0.05, 0.03, -0.01, 0.02]);
        let series = series_from(&truth, &irregular_times(2013.0, 23));
        let (model, stats) = HarmonicFitter::new(3).unwrap().fit_with_stats(&series).unwrap();
        for (a, b) in model.coefficients.iter().zip(truth.coefficients.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-9);
        }
        assert!(stats.rmse < 1e-9);
        assert_abs_diff_eq!(stats.r_squared, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn exactly_minimum_samples_is_enough() {
        let truth = HarmonicModel::from_coefficients(1, vec![0.3, 0.1, -0.2]);
        let series = series_from(&truth, &[2010.05, 2010.3, 2010.55, 2010.8]);
        let model = HarmonicFitter::new(1).unwrap().fit(&series).unwrap();
        assert_abs_diff_eq!(model.coefficients[2], -0.2, epsilon = 1e-9);
    }

    #[test]
    fn too_few_valid_samples() {
        let times = irregular_times(2013.0, 10);
        let mut values = vec![0.5; 10];
        for v in values.iter_mut().take(3) {
            *v = f64::NAN;
        }
        let series = ObservationSeries::new(times, values).unwrap();
        let err = HarmonicFitter::default().fit(&series).unwrap_err();
        assert_eq!(err, Error::InsufficientData { needed: 8, found: 7 });
    }

    #[test]
    fn coincident_timestamps_are_singular() {
        let series = ObservationSeries::new(vec![2013.25; 12], (0..12).map(|i| i as f64 * 0.01).collect()).unwrap();
        match HarmonicFitter::default().fit(&series) {
            Err(Error::SingularSystem { rank, columns }) => {
                assert_eq!(columns, 7);
                assert!(rank < 7);
            }
            other => panic!("expected SingularSystem, got {other:?}"),
        }
    }

    #[test]
    fn zero_order_rejected() {
        assert!(HarmonicFitter::new(0).is_err());
    }

    #[test]
    fn shape_check() {
        assert!(HarmonicModel::from_coefficients(3, vec![0.0; 7]).check_shape().is_ok());
        assert_eq!(
            HarmonicModel::from_coefficients(3, vec![0.0; 5]).check_shape(),
            Err(Error::ModelShape { expected: 7, found: 5 })
        );
    }

    #[test]
    fn harmonic_pairs_by_order() {
        let model = HarmonicModel::from_coefficients(2, vec![0.4, 0.1, -0.2, 0.03, 0.05]);
        assert_eq!(model.constant(), 0.4);
        assert_eq!(model.pair(1), Some((0.1, -0.2)));
        assert_eq!(model.pair(2), Some((0.03, 0.05)));
        assert_eq!(model.pair(0), None);
        assert_eq!(model.pair(3), None);
        assert!(HarmonicModel::from_coefficients(1, vec![]).constant().is_nan());
    }
}
