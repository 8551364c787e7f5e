//! Ordinary least-squares slope with a two-sided Student-t test.

use statrs::distribution::{ContinuousCDF, StudentsT};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OlsFit {
    pub slope: f64,
    pub intercept: f64,
    pub t_statistic: f64,
    pub p_value: f64,
}

/// Fit `y = intercept + slope·x`. Needs at least three points with distinct
/// `x`; returns `None` otherwise.
pub fn ols_fit(xs: &[f64], ys: &[f64]) -> Option<OlsFit> {
    let n = xs.len();
    if n < 3 || ys.len() != n {
        return None;
    }
    let nf = n as f64;
    let x_mean = xs.iter().sum::<f64>() / nf;
    let y_mean = ys.iter().sum::<f64>() / nf;
    let (mut sxx, mut sxy) = (0.0, 0.0);
    for (&x, &y) in xs.iter().zip(ys) {
        sxx += (x - x_mean) * (x - x_mean);
        sxy += (x - x_mean) * (y - y_mean);
    }
    if sxx <= 0.0 {
        return None;
    }
    let slope = sxy / sxx;
    let intercept = y_mean - slope * x_mean;
    let rss: f64 = xs
        .iter()
        .zip(ys)
        .map(|(&x, &y)| (y - intercept - slope * x).powi(2))
        .sum();
    let df = nf - 2.0;
    let std_err = (rss / df / sxx).sqrt();

    let (t_statistic, p_value) = if std_err > 0.0 {
        let t = slope / std_err;
        (t, two_sided_t_p(t, df))
    } else if slope == 0.0 {
        (0.0, 1.0)
    } else {
        // Exact line: residuals vanish.
        (slope.signum() * f64::INFINITY, 0.0)
    };
    Some(OlsFit { slope, intercept, t_statistic, p_value })
}

/// P(|T| ≥ |t|) for Student's t with `df` degrees of freedom.
pub fn two_sided_t_p(t: f64, df: f64) -> f64 {
    match StudentsT::new(0.0, 1.0, df) {
        Ok(dist) => (2.0 * dist.sf(t.abs())).min(1.0),
        Err(_) => f64::NAN,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn exact_line() {
        let fit = ols_fit(&[0.0, 1.0, 2.0, 3.0, 4.0], &[10.0, 12.0, 14.0, 16.0, 18.0]).unwrap();
        assert_eq!(fit.slope, 2.0);
        assert_eq!(fit.intercept, 10.0);
        assert_eq!(fit.p_value, 0.0);
        assert!(fit.t_statistic.is_infinite() && fit.t_statistic > 0.0);
    }

    #[test]
    fn constant_series() {
        let fit = ols_fit(&[0.0, 1.0, 2.0, 3.0], &[7.0; 4]).unwrap();
        assert_eq!(fit.slope, 0.0);
        assert_eq!(fit.t_statistic, 0.0);
        assert_eq!(fit.p_value, 1.0);
    }

    #[test]
    fn critical_value_gives_five_percent() {
        // t(0.975, 3) = 3.182446
        assert_abs_diff_eq!(two_sided_t_p(3.182446, 3.0), 0.05, epsilon = 1e-5);
        assert_abs_diff_eq!(two_sided_t_p(-3.182446, 3.0), 0.05, epsilon = 1e-5);
        assert_abs_diff_eq!(two_sided_t_p(0.0, 10.0), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn noisy_slope_recovered() {
        let xs: Vec<f64> = (0..8).map(f64::from).collect();
        let ys = [1.1, 0.8, 1.4, 1.2, 1.9, 1.6, 2.2, 2.1];
        let fit = ols_fit(&xs, &ys).unwrap();
        assert!(fit.slope > 0.1 && fit.slope < 0.25, "slope {}", fit.slope);
        assert!(fit.p_value < 0.01);
    }

    #[test]
    fn degenerate_inputs() {
        assert!(ols_fit(&[0.0, 1.0], &[1.0, 2.0]).is_none());
        assert!(ols_fit(&[2.0, 2.0, 2.0], &[1.0, 2.0, 3.0]).is_none());
    }
}
