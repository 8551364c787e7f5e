//! Per-class reduction of metric rasters against a categorical zone map.
//!
//! A pixel contributes to its class only when the class is known, not
//! excluded, and every metric being summarized is defined there. Classes
//! left with no pixels are absent from the output rather than reported as
//! zero.

pub mod resample;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{ClassLegend, ZonalConfig};
use crate::error::{Error, Result};
use crate::grid::Grid;
use crate::phenology::Metric;
use crate::stack::MetricStack;
use crate::trend::{TrendEngine, TrendResult};

pub use resample::align_zones;

/// Categorical raster of class ids.
///
/// `u16::MAX` never names a class: it is what a JSON `null` cell decodes to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneMap {
    pub grid: Grid<u16>,
    /// Additional code meaning "no class" (e.g. 255 in a byte raster).
    #[serde(default)]
    pub nodata: Option<u16>,
}

impl ZoneMap {
    pub fn new(grid: Grid<u16>, nodata: Option<u16>) -> Self {
        Self { grid, nodata }
    }

    /// `Some(code)` unless `code` is a nodata value.
    pub fn class_code(&self, code: u16) -> Option<u16> {
        if code == u16::MAX || Some(code) == self.nodata {
            None
        } else {
            Some(code)
        }
    }

    pub fn class_at(&self, row: usize, col: usize) -> Option<u16> {
        self.class_code(*self.grid.get(row, col))
    }

    /// Distinct valid class ids present.
    pub fn classes(&self) -> BTreeSet<u16> {
        self.grid.data.iter().filter_map(|&c| self.class_code(c)).collect()
    }
}

/// One class of a zonal summary. Columns are named after what was reduced:
/// a metric (`sos`), a trend slope raster (`sos_trend`) or the annual mean
/// index (`mean_index`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneSummaryRow {
    pub class_id: u16,
    #[serde(default)]
    pub label: Option<String>,
    pub pixel_count: usize,
    pub means: BTreeMap<String, f64>,
    /// Trend of the class's yearly mean series; empty for single rasters.
    #[serde(default)]
    pub trends: BTreeMap<String, TrendResult>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ZonalSummary {
    /// Ascending class id.
    pub rows: Vec<ZoneSummaryRow>,
}

impl ZonalSummary {
    pub fn class(&self, class_id: u16) -> Result<&ZoneSummaryRow> {
        self.rows
            .iter()
            .find(|r| r.class_id == class_id)
            .ok_or(Error::EmptyZone { class_id })
    }

    pub fn class_ids(&self) -> Vec<u16> {
        self.rows.iter().map(|r| r.class_id).collect()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn attach_trends(&mut self, series: &ZonalSeries, engine: &TrendEngine) {
        let trends = engine.zone_trends(series);
        for row in &mut self.rows {
            let result = trends.get(&row.class_id).copied().unwrap_or(TrendResult::UNDEFINED);
            row.trends.insert(series.column.clone(), result);
        }
    }
}

/// Per-class yearly mean of one column. NaN marks a year in which the class
/// had no contributing pixel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZonalSeries {
    pub column: String,
    pub years: Vec<i32>,
    pub classes: BTreeMap<u16, Vec<f64>>,
}

#[derive(Debug, Clone, Default)]
pub struct ZonalAggregator {
    excluded: BTreeSet<u16>,
    legend: ClassLegend,
}

impl ZonalAggregator {
    pub fn new(excluded: impl IntoIterator<Item = u16>) -> Self {
        Self {
            excluded: excluded.into_iter().collect(),
            legend: ClassLegend::default(),
        }
    }

    pub fn from_config(cfg: &ZonalConfig) -> Self {
        Self {
            excluded: cfg.excluded_classes.clone(),
            legend: cfg.legend.clone(),
        }
    }

    pub fn is_excluded(&self, class_id: u16) -> bool {
        self.excluded.contains(&class_id)
    }

    /// Mean of each named raster per class.
    pub fn summarize(&self, columns: &[(&str, &Grid<f64>)], zones: &ZoneMap) -> Result<ZonalSummary> {
        let Some(&(_, template)) = columns.first() else {
            return Ok(ZonalSummary::default());
        };
        check_same_grid(columns.iter().map(|&(_, g)| g), template)?;
        let aligned = align_zones(zones, template)?;
        let grids: Vec<&Grid<f64>> = columns.iter().map(|&(_, g)| g).collect();
        let groups = self.group_means(&aligned, &grids);

        let rows = groups
            .into_iter()
            .map(|(class_id, (pixel_count, means))| ZoneSummaryRow {
                class_id,
                label: self.legend.label(class_id).map(str::to_string),
                pixel_count,
                means: columns.iter().map(|&(name, _)| name.to_string()).zip(means).collect(),
                trends: BTreeMap::new(),
            })
            .collect();
        Ok(ZonalSummary { rows })
    }

    /// Per-class mean of `metric` for every stacked year.
    pub fn yearly_means(&self, stack: &MetricStack, metric: Metric, zones: &ZoneMap) -> Result<ZonalSeries> {
        let layers = stack.layers(metric);
        let Some(template) = layers.grids.first() else {
            return Err(Error::InsufficientData { needed: 1, found: 0 });
        };
        let aligned = align_zones(zones, template)?;
        Ok(self.yearly_means_aligned(metric.name(), &layers.years, &layers.grids, &aligned))
    }

    /// Per-class mean of an arbitrary per-year raster, such as the annual
    /// mean vegetation index of each year.
    pub fn yearly_grid_means(&self, column: &str, layers: &BTreeMap<i32, Grid<f64>>, zones: &ZoneMap) -> Result<ZonalSeries> {
        let (years, grids) = split_layers(layers)?;
        let aligned = align_zones(zones, &grids[0])?;
        Ok(self.yearly_means_aligned(column, &years, &grids, &aligned))
    }

    /// Multi-year mean per class of each metric and, with a trend engine, the
    /// trend of each class's yearly means.
    pub fn summarize_stack(
        &self,
        stack: &MetricStack,
        metrics: &[Metric],
        zones: &ZoneMap,
        trend: Option<&TrendEngine>,
    ) -> Result<ZonalSummary> {
        let means: Vec<(&str, Grid<f64>)> = metrics
            .iter()
            .map(|&m| stack.mean_raster(m).map(|g| (m.name(), g)))
            .collect::<Result<_>>()?;
        let refs: Vec<(&str, &Grid<f64>)> = means.iter().map(|(m, g)| (*m, g)).collect();
        let mut summary = self.summarize(&refs, zones)?;

        let Some(engine) = trend else {
            return Ok(summary);
        };
        let Some((_, template)) = means.first() else {
            return Ok(summary);
        };
        let aligned = align_zones(zones, template)?;
        for &metric in metrics {
            let layers = stack.layers(metric);
            let series = self.yearly_means_aligned(metric.name(), &layers.years, &layers.grids, &aligned);
            summary.attach_trends(&series, engine);
        }
        Ok(summary)
    }

    /// Multi-year mean per class of one per-year raster and, with a trend
    /// engine, the trend of each class's yearly means.
    pub fn summarize_yearly_grids(
        &self,
        column: &str,
        layers: &BTreeMap<i32, Grid<f64>>,
        zones: &ZoneMap,
        trend: Option<&TrendEngine>,
    ) -> Result<ZonalSummary> {
        let (years, grids) = split_layers(layers)?;
        let mean = Grid::<f64>::nan_mean(&grids)?;
        let mut summary = self.summarize(&[(column, &mean)], zones)?;
        if let Some(engine) = trend {
            let aligned = align_zones(zones, &mean)?;
            let series = self.yearly_means_aligned(column, &years, &grids, &aligned);
            summary.attach_trends(&series, engine);
        }
        Ok(summary)
    }

    fn yearly_means_aligned(
        &self,
        column: &str,
        years: &[i32],
        grids: &[Grid<f64>],
        aligned: &Grid<Option<u16>>,
    ) -> ZonalSeries {
        let mut classes: BTreeMap<u16, Vec<f64>> = BTreeMap::new();
        for (k, grid) in grids.iter().enumerate() {
            for (class_id, (_, means)) in self.group_means(aligned, &[grid]) {
                classes.entry(class_id).or_insert_with(|| vec![f64::NAN; years.len()])[k] = means[0];
            }
        }
        debug!(column, years = years.len(), classes = classes.len(), "zonal yearly means");
        ZonalSeries {
            column: column.to_string(),
            years: years.to_vec(),
            classes,
        }
    }

    /// class → (pixel count, mean of each grid).
    fn group_means(&self, aligned: &Grid<Option<u16>>, grids: &[&Grid<f64>]) -> BTreeMap<u16, (usize, Vec<f64>)> {
        let mut acc: BTreeMap<u16, (usize, Vec<f64>)> = BTreeMap::new();
        for (i, class) in aligned.data.iter().enumerate() {
            let Some(class_id) = *class else { continue };
            if self.is_excluded(class_id) {
                continue;
            }
            if grids.iter().any(|g| !g.data[i].is_finite()) {
                continue;
            }
            let entry = acc.entry(class_id).or_insert_with(|| (0, vec![0.0; grids.len()]));
            entry.0 += 1;
            for (sum, g) in entry.1.iter_mut().zip(grids) {
                *sum += g.data[i];
            }
        }
        for (count, sums) in acc.values_mut() {
            for s in sums.iter_mut() {
                *s /= *count as f64;
            }
        }
        acc
    }
}

/// Year-ordered copy of `layers`, every grid the shape of the first.
fn split_layers(layers: &BTreeMap<i32, Grid<f64>>) -> Result<(Vec<i32>, Vec<Grid<f64>>)> {
    let Some(template) = layers.values().next() else {
        return Err(Error::InsufficientData { needed: 1, found: 0 });
    };
    check_same_grid(layers.values(), template)?;
    Ok((layers.keys().copied().collect(), layers.values().cloned().collect()))
}

fn check_same_grid<'a>(grids: impl Iterator<Item = &'a Grid<f64>>, template: &Grid<f64>) -> Result<()> {
    for g in grids {
        if !g.same_shape(template) || g.data.len() != template.data.len() {
            return Err(Error::GridMismatch {
                expected: template.shape(),
                found: g.shape(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{TrendConfig, TrendScope};
    use crate::grid::Extent;
    use crate::phenology::{PhenologyRaster, PhenologyRecord};
    use crate::trend::TrendLabel;

    const A: u16 = 10;
    const B: u16 = 20;

    fn raster(values: Vec<f64>) -> Grid<f64> {
        Grid::from_vec(2, 2, Extent::unit(), values).unwrap()
    }

    fn zones(classes: Vec<u16>) -> ZoneMap {
        ZoneMap::new(Grid::from_vec(2, 2, Extent::unit(), classes).unwrap(), None)
    }

    #[test]
    fn two_by_two_means() {
        let metric = raster(vec![1.0, 2.0, 3.0, 4.0]);
        let summary = ZonalAggregator::default()
            .summarize(&[("sos", &metric)], &zones(vec![A, A, B, B]))
            .unwrap();
        assert_eq!(summary.class_ids(), vec![A, B]);
        assert_eq!(summary.class(A).unwrap().means["sos"], 1.5);
        assert_eq!(summary.class(B).unwrap().means["sos"], 3.5);
        assert_eq!(summary.class(A).unwrap().pixel_count, 2);
    }

    #[test]
    fn excluded_class_never_appears() {
        let metric = raster(vec![1.0, 2.0, 3.0, 4.0]);
        let summary = ZonalAggregator::new([B])
            .summarize(&[("sos", &metric)], &zones(vec![A, A, B, B]))
            .unwrap();
        assert_eq!(summary.class_ids(), vec![A]);
        assert_eq!(summary.class(B), Err(Error::EmptyZone { class_id: B }));
    }

    #[test]
    fn nodata_pixels_and_classes_dropped() {
        let sos = raster(vec![1.0, f64::NAN, 3.0, 5.0]);
        let eos = raster(vec![10.0, 20.0, f64::NAN, 50.0]);
        let zones = ZoneMap::new(Grid::from_vec(2, 2, Extent::unit(), vec![A, A, B, 255]).unwrap(), Some(255));
        let summary = ZonalAggregator::default()
            .summarize(&[("sos", &sos), ("eos", &eos)], &zones)
            .unwrap();
        // Pixel 1 lacks SOS, pixel 2 lacks EOS, pixel 3 has no class.
        assert_eq!(summary.class_ids(), vec![A]);
        let row = summary.class(A).unwrap();
        assert_eq!(row.pixel_count, 1);
        assert_eq!(row.means["sos"], 1.0);
        assert_eq!(row.means["eos"], 10.0);
    }

    #[test]
    fn legend_labels_rows() {
        let metric = raster(vec![1.0, 2.0, 3.0, 4.0]);
        let summary = ZonalAggregator::from_config(&ZonalConfig::igbp_vegetation())
            .summarize(&[("sos", &metric)], &zones(vec![4, 4, 17, 12]))
            .unwrap();
        assert_eq!(summary.class_ids(), vec![4, 12]);
        assert_eq!(summary.class(4).unwrap().label.as_deref(), Some("Deciduous Broadleaf Forests"));
    }

    #[test]
    fn mismatched_metric_grids_rejected() {
        let a = raster(vec![1.0; 4]);
        let b = Grid::from_vec(4, 1, Extent::unit(), vec![1.0; 4]).unwrap();
        let err = ZonalAggregator::default()
            .summarize(&[("sos", &a), ("eos", &b)], &zones(vec![A; 4]))
            .unwrap_err();
        assert!(matches!(err, Error::GridMismatch { .. }));
    }

    fn stack() -> MetricStack {
        let mut s = MetricStack::new();
        for (k, year) in (2001..=2008).enumerate() {
            let data = (0..4)
                .map(|i| PhenologyRecord {
                    // Class A pixels advance 2 days a year, class B stays put.
                    sos_doy: Some(if i < 2 { 150 - 2 * k as u16 + i as u16 } else { 120 }),
                    eos_doy: Some(280),
                    peak_doy: Some(200),
                    amplitude: 0.5,
                    min_value: 0.2,
                    max_value: 0.7,
                })
                .collect();
            let r: PhenologyRaster = Grid::from_vec(2, 2, Extent::unit(), data).unwrap();
            s.insert(year, r).unwrap();
        }
        s
    }

    #[test]
    fn yearly_means_per_class() {
        let series = ZonalAggregator::default()
            .yearly_means(&stack(), Metric::Sos, &zones(vec![A, A, B, B]))
            .unwrap();
        assert_eq!(series.years.len(), 8);
        assert_eq!(series.classes[&A][0], 150.5);
        assert_eq!(series.classes[&A][7], 136.5);
        assert!(series.classes[&B].iter().all(|&v| v == 120.0));
    }

    #[test]
    fn stack_summary_with_zone_trends() {
        let engine = TrendEngine::new(TrendConfig::ols(), TrendScope::Zone).unwrap();
        let summary = ZonalAggregator::default()
            .summarize_stack(&stack(), &[Metric::Sos, Metric::SeasonLength], &zones(vec![A, A, B, B]), Some(&engine))
            .unwrap();
        let a = summary.class(A).unwrap();
        assert_eq!(a.means["sos"], 143.5);
        let trend = a.trends["sos"];
        assert!((trend.slope + 2.0).abs() < 1e-9);
        assert_eq!(trend.label, Some(TrendLabel::Decreasing));
        assert!((a.trends["season_length"].slope - 2.0).abs() < 1e-9);

        let b = summary.class(B).unwrap();
        assert_eq!(b.trends["sos"].label, Some(TrendLabel::NoTrend));
    }

    #[test]
    fn yearly_grids_summarized_with_trend() {
        // Class A greens up 0.01 a year, class B is flat; one B pixel is
        // missing in the first year.
        let layers: BTreeMap<i32, Grid<f64>> = (0..6)
            .map(|k| {
                let a = 0.4 + 0.01 * k as f64;
                let b0 = if k == 0 { f64::NAN } else { 0.3 };
                (2010 + k, raster(vec![a, a + 0.02, b0, 0.3]))
            })
            .collect();
        let engine = TrendEngine::new(TrendConfig::mann_kendall(), TrendScope::Zone).unwrap();
        let aggregator = ZonalAggregator::default();
        let zones = zones(vec![A, A, B, B]);

        let series = aggregator.yearly_grid_means("mean_index", &layers, &zones).unwrap();
        assert_eq!(series.years, (2010..2016).collect::<Vec<_>>());
        assert!((series.classes[&A][0] - 0.41).abs() < 1e-12);

        let summary = aggregator
            .summarize_yearly_grids("mean_index", &layers, &zones, Some(&engine))
            .unwrap();
        let a = summary.class(A).unwrap();
        assert!((a.means["mean_index"] - 0.435).abs() < 1e-12);
        assert_eq!(a.trends["mean_index"].label, Some(TrendLabel::Increasing));
        assert!((a.trends["mean_index"].slope - 0.01).abs() < 1e-9);
        let b = summary.class(B).unwrap();
        assert_eq!(b.pixel_count, 2);
        assert_eq!(b.trends["mean_index"].label, Some(TrendLabel::NoTrend));
    }

    #[test]
    fn yearly_grids_must_share_a_shape() {
        let mut layers = BTreeMap::new();
        layers.insert(2010, raster(vec![0.1; 4]));
        layers.insert(2011, Grid::from_vec(4, 1, Extent::unit(), vec![0.1; 4]).unwrap());
        let err = ZonalAggregator::default()
            .yearly_grid_means("mean_index", &layers, &zones(vec![A; 4]))
            .unwrap_err();
        assert!(matches!(err, Error::GridMismatch { .. }));
        assert!(ZonalAggregator::default()
            .yearly_grid_means("mean_index", &BTreeMap::new(), &zones(vec![A; 4]))
            .is_err());
    }
}
