//! Dynamic-threshold season detection on a reconstructed daily curve.
//!
//!   threshold = min + f · (max − min)
//!   SOS  = first day, up to the peak, whose value exceeds the threshold
//!   EOS  = see [`EosConvention`]
//!   Peak = first day attaining the maximum

use serde::{Deserialize, Serialize};

use super::record::PhenologyRecord;
use crate::harmonic::DailyCurve;

pub const DEFAULT_THRESHOLD_FRACTION: f64 = 0.5;

/// How the end of season is read off the curve after the peak.
///
/// For a single-peaked curve both give the last day above the threshold. They
/// differ on a curve that stays above the threshold until the end of the year,
/// and on a double season: `FirstBelowMinusOne` ends at the first dip, while
/// `LastAbove` runs on to the end of the second hump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EosConvention {
    /// First day after the peak at or below the threshold, minus one.
    /// Undefined when the curve never falls back.
    #[default]
    FirstBelowMinusOne,
    /// Last day of the curve above the threshold, scanning back to the peak.
    /// Always defined when the amplitude is positive.
    LastAbove,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhenologyExtractor {
    pub threshold_fraction: f64,
    pub eos_convention: EosConvention,
}

impl Default for PhenologyExtractor {
    fn default() -> Self {
        Self {
            threshold_fraction: DEFAULT_THRESHOLD_FRACTION,
            eos_convention: EosConvention::default(),
        }
    }
}

impl PhenologyExtractor {
    pub fn new(threshold_fraction: f64, eos_convention: EosConvention) -> Self {
        Self { threshold_fraction, eos_convention }
    }

    /// Season metrics of one daily curve. A malformed curve (day list out of
    /// step with the values) or one with non-finite values is undefined.
    pub fn extract(&self, curve: &DailyCurve) -> PhenologyRecord {
        let values = &curve.values;
        if curve.check().is_err() || values.is_empty() || values.iter().any(|v| !v.is_finite()) {
            return PhenologyRecord::UNDEFINED;
        }

        let min_value = values.iter().cloned().fold(f64::INFINITY, f64::min);
        let max_value = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let amplitude = max_value - min_value;
        // First occurrence on ties.
        let peak = values.iter().position(|&v| v == max_value).unwrap_or(0);

        let mut record = PhenologyRecord {
            sos_doy: None,
            eos_doy: None,
            peak_doy: Some(curve.doys[peak]),
            amplitude,
            min_value,
            max_value,
        };
        if amplitude <= 0.0 {
            return record;
        }

        let threshold = min_value + self.threshold_fraction * amplitude;

        record.sos_doy = values[..=peak]
            .iter()
            .position(|&v| v > threshold)
            .map(|i| curve.doys[i]);

        record.eos_doy = match self.eos_convention {
            EosConvention::FirstBelowMinusOne => values[peak + 1..]
                .iter()
                .position(|&v| v <= threshold)
                .map(|i| curve.doys[peak + 1 + i] - 1),
            EosConvention::LastAbove => values[peak..]
                .iter()
                .rposition(|&v| v > threshold)
                .map(|i| curve.doys[peak + i]),
        };

        record
    }
}
