//! Nearest-neighbour alignment of a class raster onto a metric grid.

use tracing::warn;

use super::ZoneMap;
use crate::error::{Error, Result};
use crate::grid::Grid;

/// Class of every cell of `target`, `None` where the zone map has nodata or
/// does not reach.
///
/// Identical grids are copied cell for cell. Otherwise each target cell takes
/// the class of the zone cell under its centre; codes are never blended.
pub fn align_zones<U>(zones: &ZoneMap, target: &Grid<U>) -> Result<Grid<Option<u16>>> {
    let fail = |reason: &str| Error::Alignment {
        metric: target.shape(),
        zones: zones.grid.shape(),
        reason: reason.to_string(),
    };
    if target.is_empty() {
        return Err(fail("metric grid is empty"));
    }
    if zones.grid.is_empty() {
        return Err(fail("zone grid is empty"));
    }
    if zones.grid.data.len() != zones.grid.width * zones.grid.height {
        return Err(fail("zone buffer does not match its declared shape"));
    }

    if zones.grid.same_shape(target) && zones.grid.extent == target.extent {
        return Ok(zones.grid.map(|&c| zones.class_code(c)));
    }

    if zones.grid.extent.is_degenerate() || target.extent.is_degenerate() {
        return Err(fail("degenerate extent"));
    }
    if !zones.grid.extent.overlaps(&target.extent) {
        return Err(fail("extents do not overlap"));
    }

    warn!(
        zones = ?zones.grid.shape(),
        metric = ?target.shape(),
        "zone map resampled to metric grid (nearest neighbour)"
    );
    let mut out = Grid::filled(target.width, target.height, target.extent, None);
    for row in 0..target.height {
        for col in 0..target.width {
            let (lon, lat) = target.cell_center(row, col);
            let class = zones.grid.sample_nearest(lon, lat).and_then(|&c| zones.class_code(c));
            out.set(row, col, class);
        }
    }
    Ok(out)
}
