//! Series preprocessing: gap filling, Savitzky–Golay smoothing and clipping.
//!
//! Savitzky–Golay coefficients come from the least-squares projection onto a
//! polynomial of order `polyorder` over a centred window. Interior points use
//! the window centre; the first and last half-windows are evaluated on the
//! polynomial fitted to the first and last full window.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Parameters of the optional pre-fit smoothing pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SmoothingConfig {
    /// Odd window length in samples.
    pub window: usize,
    pub polyorder: usize,
    /// Optional `[lo, hi]` clamp applied after smoothing.
    #[serde(default)]
    pub clip: Option<(f64, f64)>,
}

impl Default for SmoothingConfig {
    /// Window 7, cubic, clamped to the NDVI range.
    fn default() -> Self {
        Self { window: 7, polyorder: 3, clip: Some((0.0, 1.0)) }
    }
}

/// Precomputed Savitzky–Golay filter.
#[derive(Debug, Clone)]
pub struct SavitzkyGolay {
    window: usize,
    polyorder: usize,
    /// (polyorder+1) × window projection from samples to polynomial coefficients.
    projection: DMatrix<f64>,
}

impl SavitzkyGolay {
    pub fn new(window: usize, polyorder: usize) -> Result<Self> {
        if window < 3 || window % 2 == 0 {
            return Err(Error::invalid("window", window, "must be odd and at least 3"));
        }
        if polyorder >= window {
            return Err(Error::invalid("polyorder", polyorder, format!("must be less than window {window}")));
        }
        let half = (window / 2) as f64;
        let vander = DMatrix::from_fn(window, polyorder + 1, |i, j| (i as f64 - half).powi(j as i32));
        let projection = vander
            .pseudo_inverse(1e-12)
            .map_err(|e| Error::invalid("polyorder", polyorder, e))?;
        Ok(Self { window, polyorder, projection })
    }

    pub fn from_config(cfg: &SmoothingConfig) -> Result<Self> {
        Self::new(cfg.window, cfg.polyorder)
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn polyorder(&self) -> usize {
        self.polyorder
    }

    /// Smooth a gap-free series. Series shorter than the window are returned
    /// unchanged.
    pub fn smooth(&self, values: &[f64]) -> Vec<f64> {
        let n = values.len();
        if n < self.window {
            return values.to_vec();
        }
        let half = self.window / 2;
        // Row 0 of the projection is the fitted value at the window centre.
        let centre = self.projection.row(0);

        let mut out = vec![0.0; n];
        for i in half..n - half {
            out[i] = (0..self.window).map(|k| centre[k] * values[i - half + k]).sum();
        }

        let head = self.fit_window(&values[..self.window]);
        for (i, o) in out.iter_mut().enumerate().take(half) {
            *o = eval_poly(&head, i as f64 - half as f64);
        }
        let tail = self.fit_window(&values[n - self.window..]);
        for i in n - half..n {
            let x = (i - (n - 1 - half)) as f64;
            out[i] = eval_poly(&tail, x);
        }
        out
    }

    /// Interpolate gaps, smooth, then clip: the full preprocessing chain for
    /// a regularly sampled series such as monthly composites.
    pub fn preprocess(&self, values: &[f64], range: Option<(f64, f64)>) -> Vec<f64> {
        let mut out = self.smooth(&interpolate_gaps(values));
        if let Some((lo, hi)) = range {
            clip(&mut out, lo, hi);
        }
        out
    }

    fn fit_window(&self, window: &[f64]) -> DVector<f64> {
        &self.projection * DVector::from_column_slice(window)
    }
}

fn eval_poly(coeffs: &DVector<f64>, x: f64) -> f64 {
    coeffs.iter().rev().fold(0.0, |acc, &c| acc * x + c)
}

/// Fill NaN gaps by linear interpolation over sample index. Leading and
/// trailing gaps take the nearest valid value. All-NaN input is returned as-is.
pub fn interpolate_gaps(values: &[f64]) -> Vec<f64> {
    let valid: Vec<usize> = (0..values.len()).filter(|&i| values[i].is_finite()).collect();
    let (Some(&first), Some(&last)) = (valid.first(), valid.last()) else {
        return values.to_vec();
    };
    let mut out = values.to_vec();
    for v in out.iter_mut().take(first) {
        *v = values[first];
    }
    for v in out.iter_mut().skip(last + 1) {
        *v = values[last];
    }
    for pair in valid.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if b - a < 2 {
            continue;
        }
        let (va, vb) = (values[a], values[b]);
        for (i, v) in out.iter_mut().enumerate().take(b).skip(a + 1) {
            let w = (i - a) as f64 / (b - a) as f64;
            *v = va + w * (vb - va);
        }
    }
    out
}

pub fn clip(values: &mut [f64], lo: f64, hi: f64) {
    for v in values.iter_mut() {
        *v = v.clamp(lo, hi);
    }
}
