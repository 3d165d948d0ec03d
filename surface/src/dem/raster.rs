//! Single-band raster view of an elevation sampler.

use std::sync::Arc;

use crate::error::{Result, SurfaceError};
use crate::planar::transform_xy;
use crate::provider::{
    BandCollection, BandStatistics, BlockRequest, PixelBlock, RasterProperties, RasterSource,
    Resampling, TerrainProvider,
};

use super::{DemSurface, ElevationSampler};

/// Exposes a sampler as a one-band raster. A sampler without data has no
/// bands.
pub struct DemRaster<S> {
    sampler: Arc<S>,
}

impl<S: ElevationSampler + 'static> DemRaster<S> {
    pub fn new(sampler: Arc<S>) -> Self {
        Self { sampler }
    }

    pub fn sampler(&self) -> &Arc<S> {
        &self.sampler
    }

    fn check_band(&self, band: usize) -> Result<()> {
        if band < self.band_count() {
            Ok(())
        } else {
            Err(SurfaceError::provider(format!("band {} does not exist", band)))
        }
    }
}

impl<S: ElevationSampler + 'static> RasterSource for DemRaster<S> {
    fn properties(&self) -> RasterProperties {
        let (width, height) = self.sampler.dimensions();
        RasterProperties {
            width,
            height,
            extent: self.sampler.extent(),
            spatial_reference: self.sampler.spatial_reference(),
            pixel_type: self.sampler.pixel_type(),
            no_data: self.sampler.no_data(),
        }
    }

    fn statistics(&self, band: usize) -> Option<BandStatistics> {
        self.check_band(band).ok()?;
        self.sampler.statistics()
    }

    fn read_block(&self, request: &BlockRequest) -> Result<PixelBlock> {
        self.check_band(request.band)?;
        let native = self.sampler.spatial_reference();
        let mut block = PixelBlock::new(request.cols, request.rows);

        for col in 0..request.cols {
            for row in 0..request.rows {
                let (x, y) = request.cell_center(col, row);
                let (x, y) = transform_xy(&request.spatial_reference, &native, x, y)?;
                let value = match request.resampling {
                    Resampling::Bilinear => self.sampler.sample(x, y)?,
                    Resampling::Nearest => self.sampler.nearest(x, y)?,
                };
                block.set(col, row, value);
            }
        }
        Ok(block)
    }

    fn surface(&self, band: usize) -> Result<Arc<dyn TerrainProvider>> {
        self.check_band(band)?;
        Ok(Arc::new(DemSurface::new(self.sampler.clone())))
    }
}

impl<S: ElevationSampler + 'static> BandCollection for DemRaster<S> {
    fn band_count(&self) -> usize {
        usize::from(self.sampler.has_data())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dem::MemoryGrid;
    use crate::geometry::{Envelope, SpatialReference};
    use crate::planar::to_geographic;

    fn raster() -> DemRaster<MemoryGrid> {
        // 4 x 4 cells of 10 m, value = row * 4 + col
        let values = (0..16).map(f64::from).collect();
        let grid =
            MemoryGrid::new(4, 4, 0.0, 40.0, 10.0, SpatialReference::WEB_MERCATOR, values).unwrap();
        DemRaster::new(Arc::new(grid))
    }

    #[test]
    fn test_properties() {
        let props = raster().properties();
        assert_eq!((props.width, props.height), (4, 4));
        assert_eq!(props.extent, Envelope::new(0.0, 0.0, 40.0, 40.0));
        assert_eq!(props.spatial_reference, SpatialReference::WEB_MERCATOR);
        assert_eq!(raster().band_count(), 1);
    }

    #[test]
    fn test_read_block_native() {
        let block = raster()
            .read_block(&BlockRequest {
                band: 0,
                extent: Envelope::new(0.0, 0.0, 40.0, 40.0),
                spatial_reference: SpatialReference::WEB_MERCATOR,
                cols: 4,
                rows: 4,
                resampling: Resampling::Nearest,
            })
            .unwrap();
        assert_eq!(block.get(0, 0), Some(0.0));
        assert_eq!(block.get(3, 0), Some(3.0));
        assert_eq!(block.get(0, 3), Some(12.0));
    }

    #[test]
    fn test_read_block_reprojects() {
        let (west, south) = to_geographic(0.0, 0.0);
        let (east, north) = to_geographic(40.0, 40.0);
        let block = raster()
            .read_block(&BlockRequest {
                band: 0,
                extent: Envelope::new(west, south, east, north),
                spatial_reference: SpatialReference::WGS84,
                cols: 4,
                rows: 4,
                resampling: Resampling::Bilinear,
            })
            .unwrap();
        let top_left = block.get(0, 0).unwrap();
        assert!(top_left.abs() < 1e-3);
    }

    #[test]
    fn test_missing_band() {
        let raster = raster();
        assert!(raster.statistics(1).is_none());
        assert!(raster.surface(1).is_err());
        let request = BlockRequest {
            band: 2,
            extent: Envelope::new(0.0, 0.0, 1.0, 1.0),
            spatial_reference: SpatialReference::WEB_MERCATOR,
            cols: 1,
            rows: 1,
            resampling: Resampling::Bilinear,
        };
        assert!(raster.read_block(&request).is_err());
    }

    #[test]
    fn test_unsupported_reference() {
        let request = BlockRequest {
            band: 0,
            extent: Envelope::new(0.0, 0.0, 1.0, 1.0),
            spatial_reference: SpatialReference::new(32633),
            cols: 1,
            rows: 1,
            resampling: Resampling::Bilinear,
        };
        assert!(matches!(
            raster().read_block(&request).unwrap_err(),
            SurfaceError::UnsupportedSpatialReference { wkid: 32633 }
        ));
    }
}
