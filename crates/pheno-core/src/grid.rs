use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Geographic extent of a grid in degrees. Row 0 is the northern edge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extent {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl Extent {
    pub fn new(min_lon: f64, max_lon: f64, min_lat: f64, max_lat: f64) -> Self {
        Self { min_lon, max_lon, min_lat, max_lat }
    }

    /// Unit square, used when the caller has no georeferencing.
    pub fn unit() -> Self {
        Self::new(0.0, 1.0, 0.0, 1.0)
    }

    pub fn overlaps(&self, other: &Extent) -> bool {
        self.min_lon < other.max_lon
            && other.min_lon < self.max_lon
            && self.min_lat < other.max_lat
            && other.min_lat < self.max_lat
    }

    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        lon >= self.min_lon && lon <= self.max_lon && lat >= self.min_lat && lat <= self.max_lat
    }

    pub fn is_degenerate(&self) -> bool {
        !(self.max_lon > self.min_lon && self.max_lat > self.min_lat)
    }
}

impl Default for Extent {
    fn default() -> Self {
        Self::unit()
    }
}

/// A row-major 2D grid with geographic bounds.
///
/// Every raster in the pipeline (observation cubes aside) is a `Grid`: metric
/// rasters hold `f64` with NaN as nodata, zone maps hold `u16` class codes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grid<T> {
    /// Row-major cell values, length = `width × height`.
    #[serde(
        deserialize_with = "crate::nodata::deserialize_cells",
        bound(deserialize = "T: crate::nodata::NullCell + Deserialize<'de>")
    )]
    pub data: Vec<T>,
    pub width: usize,
    pub height: usize,
    #[serde(default)]
    pub extent: Extent,
}

impl<T: Clone> Grid<T> {
    /// Create a new grid filled with the given value.
    pub fn filled(width: usize, height: usize, extent: Extent, fill: T) -> Self {
        Self {
            data: vec![fill; width * height],
            width,
            height,
            extent,
        }
    }
}

impl<T> Grid<T> {
    /// Wrap an existing row-major buffer. Fails if the length does not match.
    pub fn from_vec(width: usize, height: usize, extent: Extent, data: Vec<T>) -> Result<Self> {
        if data.len() != width * height {
            return Err(Error::GridMismatch {
                expected: (width, height),
                found: (data.len(), 1),
            });
        }
        Ok(Self { data, width, height, extent })
    }

    #[inline]
    pub fn index(&self, row: usize, col: usize) -> usize {
        row * self.width + col
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> &T {
        &self.data[row * self.width + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, val: T) {
        self.data[row * self.width + col] = val;
    }

    /// `(width, height)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn same_shape<U>(&self, other: &Grid<U>) -> bool {
        self.width == other.width && self.height == other.height
    }

    /// Centre of cell (row, col) as (lon, lat).
    pub fn cell_center(&self, row: usize, col: usize) -> (f64, f64) {
        let dx = (self.extent.max_lon - self.extent.min_lon) / self.width as f64;
        let dy = (self.extent.max_lat - self.extent.min_lat) / self.height as f64;
        (
            self.extent.min_lon + (col as f64 + 0.5) * dx,
            self.extent.max_lat - (row as f64 + 0.5) * dy,
        )
    }

    /// Cell containing (lon, lat), or None outside the extent.
    pub fn locate(&self, lon: f64, lat: f64) -> Option<(usize, usize)> {
        if self.is_empty() || self.extent.is_degenerate() || !self.extent.contains(lon, lat) {
            return None;
        }
        let fx = (lon - self.extent.min_lon) / (self.extent.max_lon - self.extent.min_lon);
        let fy = (self.extent.max_lat - lat) / (self.extent.max_lat - self.extent.min_lat);
        let col = ((fx * self.width as f64) as usize).min(self.width - 1);
        let row = ((fy * self.height as f64) as usize).min(self.height - 1);
        Some((row, col))
    }

    /// Nearest-neighbour sample at (lon, lat). Never interpolates, so it is
    /// safe for categorical grids.
    pub fn sample_nearest(&self, lon: f64, lat: f64) -> Option<&T> {
        self.locate(lon, lat).map(|(r, c)| self.get(r, c))
    }

    pub fn map<U, F: Fn(&T) -> U>(&self, f: F) -> Grid<U> {
        Grid {
            data: self.data.iter().map(f).collect(),
            width: self.width,
            height: self.height,
            extent: self.extent,
        }
    }
}

impl Grid<f64> {
    /// NaN-aware minimum; NaN when every cell is nodata.
    pub fn min_valid(&self) -> f64 {
        self.data.iter().cloned().filter(|v| v.is_finite()).fold(f64::NAN, f64::min)
    }

    /// NaN-aware maximum; NaN when every cell is nodata.
    pub fn max_valid(&self) -> f64 {
        self.data.iter().cloned().filter(|v| v.is_finite()).fold(f64::NAN, f64::max)
    }

    pub fn count_valid(&self) -> usize {
        self.data.iter().filter(|v| v.is_finite()).count()
    }

    /// Cell-wise mean of same-shaped grids over their finite values; NaN
    /// where no grid has one.
    pub fn nan_mean(grids: &[Grid<f64>]) -> Result<Grid<f64>> {
        let Some(first) = grids.first() else {
            return Err(Error::InsufficientData { needed: 1, found: 0 });
        };
        let mut sums = vec![0.0; first.len()];
        let mut counts = vec![0usize; first.len()];
        for g in grids {
            if !g.same_shape(first) || g.data.len() != first.data.len() {
                return Err(Error::GridMismatch {
                    expected: first.shape(),
                    found: g.shape(),
                });
            }
            for (i, &v) in g.data.iter().enumerate() {
                if v.is_finite() {
                    sums[i] += v;
                    counts[i] += 1;
                }
            }
        }
        let data = sums
            .into_iter()
            .zip(counts)
            .map(|(s, n)| if n > 0 { s / n as f64 } else { f64::NAN })
            .collect();
        Grid::from_vec(first.width, first.height, first.extent, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_corners_return_exact_values() {
        let mut g = Grid::filled(4, 4, Extent::new(0.0, 4.0, 0.0, 4.0), 0u16);
        g.set(0, 0, 10);
        g.set(0, 3, 20);
        g.set(3, 0, 30);
        g.set(3, 3, 40);

        // Row 0 is the northern edge.
        assert_eq!(g.sample_nearest(0.1, 3.9), Some(&10));
        assert_eq!(g.sample_nearest(3.9, 3.9), Some(&20));
        assert_eq!(g.sample_nearest(0.1, 0.1), Some(&30));
        assert_eq!(g.sample_nearest(4.0, 0.0), Some(&40));
    }

    #[test]
    fn sample_out_of_bounds_returns_none() {
        let g = Grid::filled(4, 4, Extent::unit(), 1u16);
        assert!(g.sample_nearest(-0.5, 0.5).is_none());
        assert!(g.sample_nearest(0.5, 1.5).is_none());
    }

    #[test]
    fn cell_center_round_trips_through_locate() {
        let g = Grid::filled(7, 5, Extent::new(115.4, 116.2, 39.8, 40.2), 0.0f64);
        for r in 0..g.height {
            for c in 0..g.width {
                let (lon, lat) = g.cell_center(r, c);
                assert_eq!(g.locate(lon, lat), Some((r, c)));
            }
        }
    }

    #[test]
    fn from_vec_rejects_wrong_length() {
        assert!(Grid::from_vec(3, 3, Extent::unit(), vec![0.0f64; 8]).is_err());
        assert!(Grid::from_vec(3, 3, Extent::unit(), vec![0.0f64; 9]).is_ok());
    }

    #[test]
    fn nan_aware_min_max() {
        let g = Grid::from_vec(2, 2, Extent::unit(), vec![f64::NAN, 2.0, -1.0, f64::NAN]).unwrap();
        assert_eq!(g.min_valid(), -1.0);
        assert_eq!(g.max_valid(), 2.0);
        assert_eq!(g.count_valid(), 2);
    }

    #[test]
    fn nan_mean_skips_missing_cells() {
        let a = Grid::from_vec(3, 1, Extent::unit(), vec![1.0, f64::NAN, f64::NAN]).unwrap();
        let b = Grid::from_vec(3, 1, Extent::unit(), vec![3.0, 4.0, f64::NAN]).unwrap();
        let mean = Grid::<f64>::nan_mean(&[a.clone(), b]).unwrap();
        assert_eq!(mean.data[0], 2.0);
        assert_eq!(mean.data[1], 4.0);
        assert!(mean.data[2].is_nan());

        let other = Grid::from_vec(1, 3, Extent::unit(), vec![0.0; 3]).unwrap();
        assert!(matches!(Grid::<f64>::nan_mean(&[a, other]), Err(Error::GridMismatch { .. })));
        assert!(Grid::<f64>::nan_mean(&[]).is_err());
    }
}
