use serde::{Deserialize, Serialize};

use super::fit::HarmonicModel;
use crate::error::{Error, Result};
use crate::observation::{days_in_year, fractional_year};

/// How many days a reconstructed curve spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurveLength {
    /// Days 1..=365 every year; 31 December of a leap year is dropped.
    #[default]
    Fixed365,
    /// Days 1..=365 or 1..=366 following the calendar.
    Calendar,
}

impl CurveLength {
    pub fn days(self, year: i32) -> u16 {
        match self {
            CurveLength::Fixed365 => 365,
            CurveLength::Calendar => days_in_year(year),
        }
    }
}

/// Model prediction at a run of days for one pixel-year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyCurve {
    pub year: i32,
    /// Ascending day-of-year of each value.
    pub doys: Vec<u16>,
    pub values: Vec<f64>,
}

impl DailyCurve {
    pub fn new(year: i32, doys: Vec<u16>, values: Vec<f64>) -> Result<Self> {
        let curve = Self { year, doys, values };
        curve.check()?;
        Ok(curve)
    }

    /// One value per day, days strictly ascending within `1..=days_in_year`.
    pub fn check(&self) -> Result<()> {
        if self.doys.len() != self.values.len() {
            return Err(Error::invalid(
                "doys",
                self.doys.len(),
                format!("expected {} days to match values", self.values.len()),
            ));
        }
        let max_doy = days_in_year(self.year);
        if let Some(&bad) = self.doys.iter().find(|&&d| d == 0 || d > max_doy) {
            return Err(Error::invalid("doy", bad, format!("must lie in 1..={max_doy} for {}", self.year)));
        }
        if let Some(pair) = self.doys.windows(2).find(|w| w[0] >= w[1]) {
            return Err(Error::invalid("doys", format!("{}, {}", pair[0], pair[1]), "must be strictly ascending"));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u16, f64)> + '_ {
        self.doys.iter().copied().zip(self.values.iter().copied())
    }
}

/// Evaluates fitted models on a day-of-year grid.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CurveReconstructor {
    pub length: CurveLength,
}

impl CurveReconstructor {
    pub fn new(length: CurveLength) -> Self {
        Self { length }
    }

    /// Dense daily curve for `year`: days 1..=N with N from the curve length.
    pub fn daily(&self, model: &HarmonicModel, year: i32) -> Result<DailyCurve> {
        let doys: Vec<u16> = (1..=self.length.days(year)).collect();
        self.at_days(model, year, &doys)
    }

    /// Evaluate at arbitrary days of `year`. Fails as a whole on a model of
    /// the wrong length or days that do not form a valid curve.
    pub fn at_days(&self, model: &HarmonicModel, year: i32, doys: &[u16]) -> Result<DailyCurve> {
        model.check_shape()?;
        let values = doys
            .iter()
            .map(|&d| model.evaluate_unchecked(fractional_year(year, d)))
            .collect();
        DailyCurve::new(year, doys.to_vec(), values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harmonic::fit::HarmonicFitter;
    use crate::observation::ObservationSeries;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::PI;

    fn truth(t: f64) -> f64 {
        0.4 - 0.25 * (2.0 * PI * t).cos() + 0.05 * (4.0 * PI * t).sin()
    }

    #[test]
    fn reproduces_generating_function_daily() {
        let times: Vec<f64> = (0..20).map(|i| 2015.0 + (i as f64 * 18.0 + 3.0) / 365.0).collect();
        let values = times.iter().map(|&t| truth(t)).collect();
        let series = ObservationSeries::new(times, values).unwrap();
        let model = HarmonicFitter::new(2).unwrap().fit(&series).unwrap();

        let curve = CurveReconstructor::default().daily(&model, 2015).unwrap();
        assert_eq!(curve.len(), 365);
        for (doy, v) in curve.iter() {
            assert_abs_diff_eq!(v, truth(fractional_year(2015, doy)), epsilon = 1e-9);
        }
    }

    #[test]
    fn calendar_length_covers_leap_day() {
        let model = HarmonicModel::from_coefficients(1, vec![1.0, 0.0, 0.0]);
        let cal = CurveReconstructor::new(CurveLength::Calendar);
        assert_eq!(cal.daily(&model, 2020).unwrap().len(), 366);
        assert_eq!(cal.daily(&model, 2021).unwrap().len(), 365);
        assert_eq!(CurveReconstructor::default().daily(&model, 2020).unwrap().len(), 365);
    }

    #[test]
    fn malformed_model_fails_whole_call() {
        let model = HarmonicModel::from_coefficients(3, vec![0.1; 6]);
        let err = CurveReconstructor::default().daily(&model, 2015).unwrap_err();
        assert_eq!(err, Error::ModelShape { expected: 7, found: 6 });
    }

    #[test]
    fn curve_check_catches_bad_days() {
        assert!(DailyCurve::new(2013, vec![1, 2, 3], vec![0.1, 0.2, 0.9, 0.5]).is_err());
        assert!(DailyCurve::new(2013, vec![0, 1], vec![0.1, 0.2]).is_err());
        assert!(DailyCurve::new(2013, vec![5, 5], vec![0.1, 0.2]).is_err());
        assert!(DailyCurve::new(2013, vec![366], vec![0.1]).is_err());
        assert!(DailyCurve::new(2016, vec![365, 366], vec![0.1, 0.2]).is_ok());
    }

    #[test]
    fn out_of_range_day_rejected() {
        let model = HarmonicModel::from_coefficients(1, vec![1.0, 0.0, 0.0]);
        assert!(CurveReconstructor::default().at_days(&model, 2015, &[0]).is_err());
        assert!(CurveReconstructor::default().at_days(&model, 2015, &[366]).is_err());
        assert!(CurveReconstructor::default().at_days(&model, 2016, &[366]).is_ok());
    }
}
