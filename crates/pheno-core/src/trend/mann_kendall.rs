//! Mann–Kendall monotonic trend test and Sen's slope.
//!
//!   S   = Σ_{i<j} sign(y_j − y_i)
//!   Var = [n(n−1)(2n+5) − Σ_ties t(t−1)(2t+5)] / 18
//!   z   = (S − sign(S)) / √Var        (continuity correction, 0 when S = 0)
//!   p   = erfc(|z| / √2)              (two-sided normal)

use std::cmp::Ordering;

use statrs::function::erf::erfc;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MannKendall {
    pub s: i64,
    pub var_s: f64,
    pub z: f64,
    pub p_value: f64,
    pub sen_slope: f64,
    /// `median(y) − median(x) · sen_slope`.
    pub intercept: f64,
}

/// Test `ys` observed at increasing `xs`. Needs at least three points.
pub fn mann_kendall(xs: &[f64], ys: &[f64]) -> Option<MannKendall> {
    let n = ys.len();
    if n < 3 || xs.len() != n {
        return None;
    }

    let mut s: i64 = 0;
    for i in 0..n {
        for j in i + 1..n {
            s += match ys[j].partial_cmp(&ys[i]) {
                Some(Ordering::Greater) => 1,
                Some(Ordering::Less) => -1,
                _ => 0,
            };
        }
    }

    let var_s = (variance_term(n) - tie_groups(ys).map(variance_term).sum::<f64>()) / 18.0;
    let z = if var_s <= 0.0 || s == 0 {
        0.0
    } else {
        (s - s.signum()) as f64 / var_s.sqrt()
    };
    let p_value = erfc(z.abs() / std::f64::consts::SQRT_2);

    let sen_slope = sens_slope(xs, ys);
    let intercept = median(ys.to_vec()) - median(xs.to_vec()) * sen_slope;

    Some(MannKendall { s, var_s, z, p_value, sen_slope, intercept })
}

/// Median of every pairwise slope `(y_j − y_i) / (x_j − x_i)`, `i < j`.
pub fn sens_slope(xs: &[f64], ys: &[f64]) -> f64 {
    let mut slopes = Vec::with_capacity(xs.len() * xs.len().saturating_sub(1) / 2);
    for i in 0..xs.len() {
        for j in i + 1..xs.len() {
            let dx = xs[j] - xs[i];
            if dx != 0.0 {
                slopes.push((ys[j] - ys[i]) / dx);
            }
        }
    }
    median(slopes)
}

fn variance_term(t: usize) -> f64 {
    let t = t as f64;
    t * (t - 1.0) * (2.0 * t + 5.0)
}

/// Sizes of runs of equal values.
fn tie_groups(ys: &[f64]) -> impl Iterator<Item = usize> {
    let mut sorted = ys.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mut groups = Vec::new();
    let mut run = 1;
    for w in sorted.windows(2) {
        if w[0] == w[1] {
            run += 1;
        } else {
            groups.push(run);
            run = 1;
        }
    }
    if !sorted.is_empty() {
        groups.push(run);
    }
    groups.into_iter().filter(|&t| t > 1)
}

fn median(mut v: Vec<f64>) -> f64 {
    if v.is_empty() {
        return f64::NAN;
    }
    v.sort_by(f64::total_cmp);
    let mid = v.len() / 2;
    if v.len() % 2 == 1 {
        v[mid]
    } else {
        (v[mid - 1] + v[mid]) / 2.0
    }
}
