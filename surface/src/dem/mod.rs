//! Digital elevation model backend.
//!
//! Everything the service needs from a raster is built on a single
//! abstraction, [`ElevationSampler`]: a regular grid of elevation samples
//! that can be read at any location. Two samplers are provided:
//!
//! - [`MemoryGrid`]: an in-memory grid, used for tests and small surfaces
//! - [`HgtMosaic`]: SRTM `.hgt` tiles read from a directory on demand
//!
//! [`DemRaster`] exposes a sampler as a single-band raster, [`DemSurface`]
//! answers the terrain queries over it, and [`DemCatalog`] publishes any
//! number of them as map layers.

mod catalog;
pub mod filename;
mod memory;
#[cfg(feature = "hgt")]
mod mosaic;
mod raster;
mod surface;
#[cfg(feature = "hgt")]
pub mod tile;

pub use catalog::DemCatalog;
pub use memory::MemoryGrid;
#[cfg(feature = "hgt")]
pub use mosaic::{CacheStats, HgtMosaic, HgtMosaicBuilder, DEFAULT_CACHE_SIZE};
pub use raster::DemRaster;
pub use surface::{DemSurface, DEFAULT_REFRACTION_FACTOR, EARTH_RADIUS};
#[cfg(feature = "hgt")]
pub use tile::{HgtResolution, HgtTile, VOID_VALUE};

use crate::error::Result;
use crate::geometry::{Envelope, SpatialReference};
use crate::provider::{BandStatistics, PixelType};

/// Metres per degree of latitude on the WGS84 ellipsoid's equatorial circle.
pub const METRES_PER_DEGREE: f64 = 111_319.490_793;

/// A regular grid of elevation samples.
///
/// Locations are in the sampler's spatial reference. Samples are read with
/// bilinear interpolation; a location whose neighbouring samples include a
/// void, or that lies outside the grid, has no elevation.
pub trait ElevationSampler: Send + Sync {
    fn spatial_reference(&self) -> SpatialReference;

    fn extent(&self) -> Envelope;

    /// Distance between adjacent samples, in map units.
    fn cell_size(&self) -> f64;

    /// Number of samples across and down the whole grid.
    fn dimensions(&self) -> (usize, usize);

    /// Bilinear elevation at a location.
    fn sample(&self, x: f64, y: f64) -> Result<Option<f64>>;

    /// Elevation of the sample nearest to a location.
    fn nearest(&self, x: f64, y: f64) -> Result<Option<f64>>;

    fn statistics(&self) -> Option<BandStatistics>;

    fn pixel_type(&self) -> PixelType;

    /// Declared no-data value, if any.
    fn no_data(&self) -> Option<f64> {
        None
    }

    /// Whether the grid holds any samples at all.
    fn has_data(&self) -> bool {
        true
    }
}

/// Ground metres per map unit along x and y at latitude-ish coordinate `y`.
///
/// Projected references are taken to be in metres already.
pub fn metres_per_unit(spatial_reference: &SpatialReference, y: f64) -> (f64, f64) {
    if spatial_reference.is_geographic() {
        (METRES_PER_DEGREE * y.to_radians().cos(), METRES_PER_DEGREE)
    } else {
        (1.0, 1.0)
    }
}

/// Bilinear interpolation in sample space.
///
/// `col` and `row` are fractional sample indices, clamped to the grid;
/// `get` reads one sample and returns `None` for voids.
pub(crate) fn bilinear<F>(col: f64, row: f64, cols: usize, rows: usize, get: F) -> Result<Option<f64>>
where
    F: Fn(usize, usize) -> Result<Option<f64>>,
{
    if cols == 0 || rows == 0 {
        return Ok(None);
    }
    let col = col.clamp(0.0, (cols - 1) as f64);
    let row = row.clamp(0.0, (rows - 1) as f64);

    let c0 = col.floor() as usize;
    let r0 = row.floor() as usize;
    let c1 = (c0 + 1).min(cols - 1);
    let r1 = (r0 + 1).min(rows - 1);
    let dc = col - c0 as f64;
    let dr = row - r0 as f64;

    let (Some(v00), Some(v10), Some(v01), Some(v11)) =
        (get(c0, r0)?, get(c1, r0)?, get(c0, r1)?, get(c1, r1)?)
    else {
        return Ok(None);
    };

    let top = v00 * (1.0 - dc) + v10 * dc;
    let bottom = v01 * (1.0 - dc) + v11 * dc;
    Ok(Some(top * (1.0 - dr) + bottom * dr))
}

/// Running minimum and maximum over valid samples.
pub(crate) fn min_max<I: IntoIterator<Item = f64>>(values: I) -> Option<BandStatistics> {
    values.into_iter().fold(None, |acc, v| {
        Some(match acc {
            None => BandStatistics {
                minimum: v,
                maximum: v,
            },
            Some(s) => BandStatistics {
                minimum: s.minimum.min(v),
                maximum: s.maximum.max(v),
            },
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bilinear_center_and_edges() {
        // 2 x 2 samples: 0 1 / 2 3
        let values = [0.0, 1.0, 2.0, 3.0];
        let get = |c: usize, r: usize| Ok(Some(values[r * 2 + c]));
        assert_eq!(bilinear(0.5, 0.5, 2, 2, get).unwrap(), Some(1.5));
        assert_eq!(bilinear(0.0, 0.0, 2, 2, get).unwrap(), Some(0.0));
        // Clamped past the last sample
        assert_eq!(bilinear(5.0, 5.0, 2, 2, get).unwrap(), Some(3.0));
    }

    #[test]
    fn test_bilinear_void_neighbour() {
        let get = |c: usize, _r: usize| Ok(if c == 1 { None } else { Some(1.0) });
        assert_eq!(bilinear(0.5, 0.0, 2, 2, get).unwrap(), None);
    }

    #[test]
    fn test_single_column_grid() {
        let get = |_c: usize, r: usize| Ok(Some(r as f64));
        assert_eq!(bilinear(0.3, 1.5, 1, 3, get).unwrap(), Some(1.5));
    }

    #[test]
    fn test_min_max() {
        let stats = min_max([3.0, -1.0, 7.5]).unwrap();
        assert_eq!(stats.minimum, -1.0);
        assert_eq!(stats.maximum, 7.5);
        assert!(min_max(std::iter::empty()).is_none());
    }

    #[test]
    fn test_metres_per_unit() {
        assert_eq!(metres_per_unit(&SpatialReference::WEB_MERCATOR, 45.0), (1.0, 1.0));
        let (mx, my) = metres_per_unit(&SpatialReference::WGS84, 60.0);
        assert!((mx - METRES_PER_DEGREE / 2.0).abs() < 1e-6);
        assert_eq!(my, METRES_PER_DEGREE);
    }
}
