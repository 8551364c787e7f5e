//! Seeded synthetic scenes: noisy, cloud-gapped vegetation-index cubes whose
//! true season boundaries are known.
//!
//! Each pixel follows a double-logistic season
//!
//!   v(d) = base + (peak − base) · [σ(k(d − sos)) − σ(k(d − eos))]
//!
//! sampled every 16 days. SOS moves across columns by `sos_gradient` days and
//! every year by `sos_shift_per_year`; EOS moves by `eos_shift_per_year`.
//! Dropped (cloudy) samples are NaN.

use std::collections::BTreeMap;

use rand::distributions::Distribution;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use statrs::distribution::Normal;

use crate::error::{Error, Result};
use crate::grid::{Extent, Grid};
use crate::observation::{days_in_year, fractional_year, ObservationCube};
use crate::zonal::ZoneMap;

/// Days between acquisitions, as for MODIS 16-day composites.
pub const COMPOSITE_PERIOD_DAYS: u16 = 16;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneBuilder {
    pub width: usize,
    pub height: usize,
    pub extent: Extent,
    pub seed: u64,
    pub first_year: i32,
    pub years: usize,
    /// Dormant-season index value.
    pub base: f64,
    /// Growing-season plateau.
    pub peak: f64,
    /// Season boundaries of column 0 in the first year.
    pub sos_doy: f64,
    pub eos_doy: f64,
    /// Extra SOS delay at the last column.
    pub sos_gradient: f64,
    pub sos_shift_per_year: f64,
    pub eos_shift_per_year: f64,
    /// Logistic rate k, per day.
    pub steepness: f64,
    pub noise_sd: f64,
    /// Probability of dropping a sample.
    pub cloud_fraction: f64,
}

impl Default for SceneBuilder {
    fn default() -> Self {
        Self {
            width: 16,
            height: 16,
            extent: Extent::unit(),
            seed: 42,
            first_year: 2010,
            years: 10,
            base: 0.15,
            peak: 0.75,
            sos_doy: 120.0,
            eos_doy: 280.0,
            sos_gradient: 20.0,
            sos_shift_per_year: -1.0,
            eos_shift_per_year: 0.5,
            steepness: 0.08,
            noise_sd: 0.02,
            cloud_fraction: 0.15,
        }
    }
}

/// Output of [`SceneBuilder::build`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticScene {
    pub cubes: BTreeMap<i32, ObservationCube>,
    pub true_sos: BTreeMap<i32, Grid<f64>>,
    pub true_eos: BTreeMap<i32, Grid<f64>>,
}

impl SceneBuilder {
    pub fn new(width: usize, height: usize) -> Self {
        Self { width, height, ..Self::default() }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_years(mut self, first_year: i32, years: usize) -> Self {
        self.first_year = first_year;
        self.years = years;
        self
    }

    pub fn with_noise(mut self, noise_sd: f64, cloud_fraction: f64) -> Self {
        self.noise_sd = noise_sd;
        self.cloud_fraction = cloud_fraction;
        self
    }

    pub fn with_extent(mut self, extent: Extent) -> Self {
        self.extent = extent;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::invalid("shape", format!("{}x{}", self.width, self.height), "must be non-empty"));
        }
        if !(0.0..1.0).contains(&self.cloud_fraction) {
            return Err(Error::invalid("cloud_fraction", self.cloud_fraction, "must lie in [0, 1)"));
        }
        if !(self.noise_sd >= 0.0) {
            return Err(Error::invalid("noise_sd", self.noise_sd, "must be non-negative"));
        }
        if !(self.steepness > 0.0) {
            return Err(Error::invalid("steepness", self.steepness, "must be positive"));
        }
        Ok(())
    }

    /// True SOS at `col` in year offset `k`.
    pub fn true_sos(&self, k: usize, col: usize) -> f64 {
        let frac = if self.width > 1 { col as f64 / (self.width - 1) as f64 } else { 0.0 };
        self.sos_doy + self.sos_gradient * frac + self.sos_shift_per_year * k as f64
    }

    pub fn true_eos(&self, k: usize) -> f64 {
        self.eos_doy + self.eos_shift_per_year * k as f64
    }

    /// Noise-free index value on day `doy`.
    pub fn signal(&self, doy: f64, sos: f64, eos: f64) -> f64 {
        let sigma = |x: f64| 1.0 / (1.0 + (-self.steepness * x).exp());
        self.base + (self.peak - self.base) * (sigma(doy - sos) - sigma(doy - eos))
    }

    pub fn build(&self) -> Result<SyntheticScene> {
        self.validate()?;
        let mut rng = StdRng::seed_from_u64(self.seed);
        let noise = if self.noise_sd > 0.0 {
            Some(Normal::new(0.0, self.noise_sd).map_err(|e| Error::invalid("noise_sd", self.noise_sd, e.to_string()))?)
        } else {
            None
        };

        let mut scene = SyntheticScene {
            cubes: BTreeMap::new(),
            true_sos: BTreeMap::new(),
            true_eos: BTreeMap::new(),
        };
        for k in 0..self.years {
            let year = self.first_year + k as i32;
            let doys: Vec<u16> = (1..=days_in_year(year)).step_by(COMPOSITE_PERIOD_DAYS as usize).collect();
            let times: Vec<f64> = doys.iter().map(|&d| fractional_year(year, d)).collect();
            let eos = self.true_eos(k);

            let mut values = Vec::with_capacity(self.width * self.height * doys.len());
            for _row in 0..self.height {
                for col in 0..self.width {
                    let sos = self.true_sos(k, col);
                    for &d in &doys {
                        if rng.gen_bool(self.cloud_fraction) {
                            values.push(f64::NAN);
                            continue;
                        }
                        let eps = noise.as_ref().map_or(0.0, |n| n.sample(&mut rng));
                        values.push(self.signal(f64::from(d), sos, eos) + eps);
                    }
                }
            }

            let cube = ObservationCube::with_shared_times(self.width, self.height, &times, values, self.extent)?;
            let sos_grid = Grid::from_vec(
                self.width,
                self.height,
                self.extent,
                (0..self.height * self.width).map(|i| self.true_sos(k, i % self.width)).collect(),
            )?;
            scene.cubes.insert(year, cube);
            scene.true_sos.insert(year, sos_grid);
            scene.true_eos.insert(year, Grid::filled(self.width, self.height, self.extent, eos));
        }
        Ok(scene)
    }

    /// Zone map of vertical stripes, one per entry of `classes`, on the
    /// scene's extent.
    pub fn zone_map(&self, classes: &[u16]) -> Result<ZoneMap> {
        if classes.is_empty() {
            return Err(Error::invalid("classes", "[]", "need at least one class"));
        }
        let data = (0..self.height * self.width)
            .map(|i| classes[(i % self.width) * classes.len() / self.width])
            .collect();
        Ok(ZoneMap::new(Grid::from_vec(self.width, self.height, self.extent, data)?, None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_scene() {
        let a = SceneBuilder::new(4, 3).with_years(2015, 2).build().unwrap();
        let b = SceneBuilder::new(4, 3).with_years(2015, 2).build().unwrap();
        let cube_a = &a.cubes[&2015];
        let cube_b = &b.cubes[&2015];
        assert_eq!(cube_a.times, cube_b.times);
        for (x, y) in cube_a.values.iter().zip(&cube_b.values) {
            assert!(x == y || (x.is_nan() && y.is_nan()));
        }
        let c = SceneBuilder::new(4, 3).with_years(2015, 2).with_seed(7).build().unwrap();
        assert_ne!(format!("{:?}", c.cubes[&2015].values), format!("{:?}", cube_a.values));
    }

    #[test]
    fn shape_and_sampling() {
        let scene = SceneBuilder::new(5, 2).with_years(2019, 2).build().unwrap();
        let cube = &scene.cubes[&2020];
        assert_eq!(cube.samples, 23);
        assert_eq!(cube.shape(), (5, 2));
        assert_eq!(scene.true_sos[&2019].data[4], 140.0);
        assert_eq!(scene.true_sos[&2020].data[0], 119.0);
        assert_eq!(scene.true_eos[&2020].data[0], 280.5);
    }

    #[test]
    fn clouds_and_noise_off_gives_clean_signal() {
        let builder = SceneBuilder::new(1, 1).with_noise(0.0, 0.0).with_years(2013, 1);
        let scene = builder.build().unwrap();
        let cube = &scene.cubes[&2013];
        assert!(cube.values.iter().all(|v| v.is_finite()));
        let mid = builder.signal(200.0, 120.0, 280.0);
        assert!(mid > 0.74 && mid < 0.75);
        assert!((builder.signal(120.0, 120.0, 280.0) - 0.45).abs() < 0.01);
    }

    #[test]
    fn cloud_fraction_drops_samples() {
        let scene = SceneBuilder::new(10, 10).with_noise(0.0, 0.5).with_years(2013, 1).build().unwrap();
        let missing = scene.cubes[&2013].values.iter().filter(|v| v.is_nan()).count();
        let total = scene.cubes[&2013].values.len();
        assert!(missing > total / 3 && missing < 2 * total / 3, "{missing} of {total}");
    }

    #[test]
    fn stripes() {
        let zones = SceneBuilder::new(4, 2).zone_map(&[1, 2]).unwrap();
        assert_eq!(zones.grid.data, vec![1, 1, 2, 2, 1, 1, 2, 2]);
        assert!(SceneBuilder::new(4, 2).zone_map(&[]).is_err());
    }

    #[test]
    fn invalid_builders_rejected() {
        assert!(SceneBuilder::new(0, 4).build().is_err());
        assert!(SceneBuilder::new(2, 2).with_noise(0.0, 1.0).build().is_err());
        assert!(SceneBuilder::new(2, 2).with_noise(-1.0, 0.0).build().is_err());
    }
}
