//! Year-indexed stack of phenology rasters over one fixed grid.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::grid::{Extent, Grid};
use crate::phenology::{Metric, PhenologyRaster};

/// Year → record raster. Every member shares shape and extent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<i32, PhenologyRaster>", into = "BTreeMap<i32, PhenologyRaster>")]
pub struct MetricStack {
    years: BTreeMap<i32, PhenologyRaster>,
}

impl MetricStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace one year. Rejects a raster that does not match the grid
    /// of the rasters already stacked.
    pub fn insert(&mut self, year: i32, raster: PhenologyRaster) -> Result<()> {
        if let Some(first) = self.years.values().next() {
            if !first.same_shape(&raster) {
                return Err(Error::GridMismatch {
                    expected: first.shape(),
                    found: raster.shape(),
                });
            }
            if first.extent != raster.extent {
                return Err(Error::invalid(
                    "extent",
                    format!("{:?}", raster.extent),
                    format!("year {year} does not match stacked extent {:?}", first.extent),
                ));
            }
        }
        self.years.insert(year, raster);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.years.len()
    }

    pub fn is_empty(&self) -> bool {
        self.years.is_empty()
    }

    /// Ascending years.
    pub fn years(&self) -> Vec<i32> {
        self.years.keys().copied().collect()
    }

    pub fn get(&self, year: i32) -> Option<&PhenologyRaster> {
        self.years.get(&year)
    }

    pub fn iter(&self) -> impl Iterator<Item = (i32, &PhenologyRaster)> + '_ {
        self.years.iter().map(|(&y, r)| (y, r))
    }

    /// `(width, height)` of the shared grid, `(0, 0)` when empty.
    pub fn shape(&self) -> (usize, usize) {
        self.years.values().next().map_or((0, 0), |r| r.shape())
    }

    pub fn extent(&self) -> Option<Extent> {
        self.years.values().next().map(|r| r.extent)
    }

    /// One metric across every year.
    pub fn layers(&self, metric: Metric) -> MetricLayers {
        let (width, height) = self.shape();
        MetricLayers {
            metric,
            width,
            height,
            extent: self.extent().unwrap_or_default(),
            years: self.years(),
            grids: self.years.values().map(|r| r.map(|rec| metric.value(rec))).collect(),
        }
    }

    /// Per-pixel mean of `metric` over the years where it is defined; NaN
    /// where it never is.
    pub fn mean_raster(&self, metric: Metric) -> Result<Grid<f64>> {
        Grid::<f64>::nan_mean(&self.layers(metric).grids)
    }
}

impl TryFrom<BTreeMap<i32, PhenologyRaster>> for MetricStack {
    type Error = Error;

    fn try_from(years: BTreeMap<i32, PhenologyRaster>) -> Result<Self> {
        let mut stack = MetricStack::new();
        for (year, raster) in years {
            if raster.data.len() != raster.width * raster.height {
                return Err(Error::GridMismatch {
                    expected: (raster.width, raster.height),
                    found: (raster.data.len(), 1),
                });
            }
            stack.insert(year, raster)?;
        }
        Ok(stack)
    }
}

impl From<MetricStack> for BTreeMap<i32, PhenologyRaster> {
    fn from(stack: MetricStack) -> Self {
        stack.years
    }
}

/// A single metric pulled out of a [`MetricStack`], one grid per year.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricLayers {
    pub metric: Metric,
    pub width: usize,
    pub height: usize,
    pub extent: Extent,
    pub years: Vec<i32>,
    pub grids: Vec<Grid<f64>>,
}

impl MetricLayers {
    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    /// The metric's value in every year at flat index `i`.
    pub fn pixel_series(&self, i: usize) -> Vec<f64> {
        self.grids.iter().map(|g| g.data[i]).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phenology::PhenologyRecord;

    fn rec(sos: Option<u16>) -> PhenologyRecord {
        PhenologyRecord {
            sos_doy: sos,
            eos_doy: Some(280),
            peak_doy: Some(200),
            amplitude: 0.4,
            min_value: 0.2,
            max_value: 0.6,
        }
    }

    fn raster(sos: [Option<u16>; 2]) -> PhenologyRaster {
        Grid::from_vec(2, 1, Extent::unit(), sos.iter().map(|&s| rec(s)).collect()).unwrap()
    }

    #[test]
    fn insert_rejects_other_shapes() {
        let mut stack = MetricStack::new();
        stack.insert(2010, raster([Some(100), Some(110)])).unwrap();
        let wrong = Grid::filled(1, 2, Extent::unit(), PhenologyRecord::UNDEFINED);
        assert!(matches!(stack.insert(2011, wrong), Err(Error::GridMismatch { .. })));
        let moved = Grid::filled(2, 1, Extent::new(5.0, 6.0, 5.0, 6.0), PhenologyRecord::UNDEFINED);
        assert!(stack.insert(2011, moved).is_err());
        assert_eq!(stack.years(), vec![2010]);
    }

    #[test]
    fn mean_skips_undefined_years() {
        let mut stack = MetricStack::new();
        stack.insert(2010, raster([Some(100), None])).unwrap();
        stack.insert(2011, raster([Some(110), None])).unwrap();
        stack.insert(2012, raster([None, None])).unwrap();
        let mean = stack.mean_raster(Metric::Sos).unwrap();
        assert_eq!(mean.data[0], 105.0);
        assert!(mean.data[1].is_nan());
        assert!(MetricStack::new().mean_raster(Metric::Sos).is_err());
    }

    #[test]
    fn layers_are_year_ordered() {
        let mut stack = MetricStack::new();
        stack.insert(2012, raster([Some(120), None])).unwrap();
        stack.insert(2010, raster([Some(100), None])).unwrap();
        let layers = stack.layers(Metric::Sos);
        assert_eq!(layers.years, vec![2010, 2012]);
        assert_eq!(layers.pixel_series(0), vec![100.0, 120.0]);
        assert!(layers.pixel_series(1).iter().all(|v| v.is_nan()));
    }

    #[test]
    fn json_round_trip_validates() {
        let mut stack = MetricStack::new();
        stack.insert(2010, raster([Some(100), None])).unwrap();
        let json = serde_json::to_string(&stack).unwrap();
        let back: MetricStack = serde_json::from_str(&json).unwrap();
        assert_eq!(back.years(), vec![2010]);
        assert_eq!(back.get(2010).unwrap().get(0, 0).sos_doy, Some(100));

        let bad = json.replace("\"width\":2", "\"width\":3");
        assert!(serde_json::from_str::<MetricStack>(&bad).is_err());
    }
}
