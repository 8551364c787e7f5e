use serde::{Deserialize, Serialize};

use crate::grid::Grid;
use crate::nodata::{f64_or_nan, NullCell};

/// Season timing and magnitude for one pixel-year.
///
/// Day-of-year fields are `None` when no valid crossing exists; value fields
/// are NaN when the pixel could not be fitted at all.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhenologyRecord {
    pub sos_doy: Option<u16>,
    pub eos_doy: Option<u16>,
    pub peak_doy: Option<u16>,
    #[serde(deserialize_with = "f64_or_nan")]
    pub amplitude: f64,
    #[serde(deserialize_with = "f64_or_nan")]
    pub min_value: f64,
    #[serde(deserialize_with = "f64_or_nan")]
    pub max_value: f64,
}

impl PhenologyRecord {
    pub const UNDEFINED: PhenologyRecord = PhenologyRecord {
        sos_doy: None,
        eos_doy: None,
        peak_doy: None,
        amplitude: f64::NAN,
        min_value: f64::NAN,
        max_value: f64::NAN,
    };

    pub fn is_undefined(&self) -> bool {
        self.peak_doy.is_none() && self.sos_doy.is_none() && self.eos_doy.is_none() && self.amplitude.is_nan()
    }

    /// Length of season in days, when both ends are defined.
    pub fn season_length(&self) -> Option<i32> {
        Some(self.eos_doy? as i32 - self.sos_doy? as i32)
    }
}

impl Default for PhenologyRecord {
    fn default() -> Self {
        Self::UNDEFINED
    }
}

impl NullCell for PhenologyRecord {
    fn null() -> Self {
        Self::UNDEFINED
    }
}

/// One year's record raster.
pub type PhenologyRaster = Grid<PhenologyRecord>;

/// A single named scalar drawn from a [`PhenologyRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Sos,
    Eos,
    Peak,
    Amplitude,
    MinValue,
    MaxValue,
    /// `eos − sos` in days.
    SeasonLength,
}

impl Metric {
    pub const ALL: [Metric; 7] = [
        Metric::Sos,
        Metric::Eos,
        Metric::Peak,
        Metric::Amplitude,
        Metric::MinValue,
        Metric::MaxValue,
        Metric::SeasonLength,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Metric::Sos => "sos",
            Metric::Eos => "eos",
            Metric::Peak => "peak",
            Metric::Amplitude => "amplitude",
            Metric::MinValue => "min_value",
            Metric::MaxValue => "max_value",
            Metric::SeasonLength => "season_length",
        }
    }

    pub fn from_name(name: &str) -> Option<Metric> {
        Metric::ALL.into_iter().find(|m| m.name() == name)
    }

    /// The metric as f64, NaN when undefined.
    pub fn value(self, rec: &PhenologyRecord) -> f64 {
        let doy = |d: Option<u16>| d.map_or(f64::NAN, f64::from);
        match self {
            Metric::Sos => doy(rec.sos_doy),
            Metric::Eos => doy(rec.eos_doy),
            Metric::Peak => doy(rec.peak_doy),
            Metric::Amplitude => rec.amplitude,
            Metric::MinValue => rec.min_value,
            Metric::MaxValue => rec.max_value,
            Metric::SeasonLength => rec.season_length().map_or(f64::NAN, f64::from),
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec() -> PhenologyRecord {
        PhenologyRecord {
            sos_doy: Some(120),
            eos_doy: Some(280),
            peak_doy: Some(200),
            amplitude: 0.5,
            min_value: 0.2,
            max_value: 0.7,
        }
    }

    #[test]
    fn metric_values() {
        let r = rec();
        assert_eq!(Metric::Sos.value(&r), 120.0);
        assert_eq!(Metric::SeasonLength.value(&r), 160.0);
        assert!(Metric::Sos.value(&PhenologyRecord::UNDEFINED).is_nan());
        assert!(Metric::SeasonLength.value(&PhenologyRecord { eos_doy: None, ..r }).is_nan());
    }

    #[test]
    fn names_round_trip() {
        for m in Metric::ALL {
            assert_eq!(Metric::from_name(m.name()), Some(m));
        }
        assert_eq!(Metric::from_name("los"), None);
    }

    #[test]
    fn undefined_record_survives_json() {
        let json = serde_json::to_string(&PhenologyRecord::UNDEFINED).unwrap();
        let back: PhenologyRecord = serde_json::from_str(&json).unwrap();
        assert!(back.is_undefined());
        let r = rec();
        let back: PhenologyRecord = serde_json::from_str(&serde_json::to_string(&r).unwrap()).unwrap();
        assert_eq!(back, r);
    }
}
