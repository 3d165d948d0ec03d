//! A published map of elevation layers.

use std::sync::Arc;

use crate::error::{Result, SurfaceError};
use crate::provider::{BandCollection, DataSource, MapLayerInfo, MapLayerSource, RasterSource};

use super::{DemRaster, ElevationSampler, MemoryGrid};

#[cfg(feature = "hgt")]
use std::path::Path;

#[cfg(feature = "hgt")]
use super::HgtMosaic;

const RASTER_LAYER: &str = "Raster Layer";
const FEATURE_LAYER: &str = "Feature Layer";

/// Data source backed by a [`DemRaster`].
struct RasterDataSource<S> {
    raster: Arc<DemRaster<S>>,
}

impl<S: ElevationSampler + 'static> DataSource for RasterDataSource<S> {
    fn raster(&self) -> Option<Arc<dyn RasterSource>> {
        Some(self.raster.clone())
    }

    fn bands(&self) -> Option<&dyn BandCollection> {
        Some(self.raster.as_ref())
    }
}

struct Entry {
    info: MapLayerInfo,
    source: Option<Arc<dyn DataSource>>,
}

/// Map layers numbered from 0 in the order they are added.
#[derive(Default)]
pub struct DemCatalog {
    entries: Vec<Entry>,
}

impl DemCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> i64 {
        self.entries.len() as i64
    }

    /// Publish an in-memory grid. Returns the layer id.
    pub fn add_grid(&mut self, name: &str, grid: MemoryGrid) -> i64 {
        self.add_sampler(name, Arc::new(grid))
    }

    /// Publish any sampler as a raster layer. Returns the layer id.
    pub fn add_sampler<S: ElevationSampler + 'static>(&mut self, name: &str, sampler: Arc<S>) -> i64 {
        let id = self.next_id();
        let (width, height) = sampler.dimensions();
        let info = MapLayerInfo {
            id,
            name: name.to_string(),
            layer_type: RASTER_LAYER.to_string(),
            extent: Some(sampler.extent()),
            spatial_reference: Some(sampler.spatial_reference()),
            description: format!("Elevation raster, {} x {} samples", width, height),
        };
        let raster = Arc::new(DemRaster::new(sampler));
        self.entries.push(Entry {
            info,
            source: Some(Arc::new(RasterDataSource { raster })),
        });
        id
    }

    /// Publish a layer without raster data. It is listed by the map but
    /// never becomes a surface.
    pub fn add_feature_layer(&mut self, name: &str) -> i64 {
        let id = self.next_id();
        self.entries.push(Entry {
            info: MapLayerInfo {
                id,
                name: name.to_string(),
                layer_type: FEATURE_LAYER.to_string(),
                extent: None,
                spatial_reference: None,
                description: String::new(),
            },
            source: None,
        });
        id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Publish the tiles under `root` as layers.
    ///
    /// Tiles directly in `root` form the first layer, named after the
    /// directory, when there are any. Every subdirectory becomes a further
    /// layer, in name order; one without tiles has no bands.
    ///
    /// # Errors
    ///
    /// Returns an error if `root` is not a readable directory or a tile
    /// directory cannot be opened.
    #[cfg(feature = "hgt")]
    pub fn open_dir<P: AsRef<Path>>(root: P, cache_size: u64) -> Result<Self> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(SurfaceError::config(format!(
                "data directory {} does not exist",
                root.display()
            )));
        }

        let mut children: Vec<_> = std::fs::read_dir(root)?
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        children.sort();

        let mut catalog = Self::new();
        for (i, dir) in std::iter::once(root.to_path_buf()).chain(children).enumerate() {
            let mosaic = HgtMosaic::builder(&dir).cache_size(cache_size).build()?;
            if i == 0 && mosaic.tile_count() == 0 {
                continue;
            }
            if mosaic.tile_count() == 0 {
                tracing::warn!(dir = %dir.display(), "Layer directory holds no tiles");
            }
            let name = dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "elevation".to_string());
            let id = catalog.add_sampler(&name, Arc::new(mosaic));
            tracing::info!(layer_id = id, name = %name, dir = %dir.display(), "Published tile layer");
        }
        Ok(catalog)
    }
}

impl MapLayerSource for DemCatalog {
    fn layers(&self) -> Vec<MapLayerInfo> {
        self.entries.iter().map(|e| e.info.clone()).collect()
    }

    fn data_source(&self, id: i64) -> Result<Option<Arc<dyn DataSource>>> {
        let entry = usize::try_from(id)
            .ok()
            .and_then(|i| self.entries.get(i))
            .ok_or_else(|| SurfaceError::not_found(format!("Could not find layer id: {}", id)))?;
        Ok(entry.source.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::SpatialReference;

    fn grid() -> MemoryGrid {
        MemoryGrid::new(2, 2, 0.0, 2.0, 1.0, SpatialReference::WGS84, vec![1.0; 4]).unwrap()
    }

    #[test]
    fn test_sequential_ids() {
        let mut catalog = DemCatalog::new();
        assert_eq!(catalog.add_grid("a", grid()), 0);
        assert_eq!(catalog.add_feature_layer("roads"), 1);
        assert_eq!(catalog.add_grid("b", grid()), 2);

        let layers = catalog.layers();
        assert_eq!(layers.len(), 3);
        assert_eq!(layers[1].layer_type, "Feature Layer");
        assert_eq!(layers[2].name, "b");
        assert_eq!(layers[0].spatial_reference, Some(SpatialReference::WGS84));
    }

    #[test]
    fn test_data_sources() {
        let mut catalog = DemCatalog::new();
        catalog.add_grid("a", grid());
        catalog.add_feature_layer("roads");

        let source = catalog.data_source(0).unwrap().unwrap();
        assert!(source.raster().is_some());
        assert_eq!(source.bands().unwrap().band_count(), 1);
        assert!(catalog.data_source(1).unwrap().is_none());
        assert!(catalog.data_source(5).is_err());
        assert!(catalog.data_source(-1).is_err());
    }
}

#[cfg(all(test, feature = "hgt"))]
mod dir_tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const SRTM3_SIZE: usize = 1201 * 1201 * 2;

    #[test]
    fn test_open_dir_layers() {
        let root = TempDir::new().unwrap();
        fs::write(root.path().join("N35E138.hgt"), vec![0u8; SRTM3_SIZE]).unwrap();
        fs::create_dir(root.path().join("alps")).unwrap();
        fs::write(root.path().join("alps").join("N46E007.hgt"), vec![0u8; SRTM3_SIZE]).unwrap();
        fs::create_dir(root.path().join("empty")).unwrap();

        let catalog = DemCatalog::open_dir(root.path(), 10).unwrap();
        let layers = catalog.layers();
        assert_eq!(layers.len(), 3);
        assert_eq!(layers[1].name, "alps");
        assert_eq!(layers[2].name, "empty");
        assert_eq!(layers[1].layer_type, "Raster Layer");

        let empty = catalog.data_source(2).unwrap().unwrap();
        assert_eq!(empty.bands().unwrap().band_count(), 0);
    }

    #[test]
    fn test_root_without_tiles() {
        let root = TempDir::new().unwrap();
        fs::create_dir(root.path().join("a")).unwrap();
        fs::write(root.path().join("a").join("S01W001.hgt"), vec![0u8; SRTM3_SIZE]).unwrap();

        let catalog = DemCatalog::open_dir(root.path(), 10).unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.layers()[0].name, "a");
    }

    #[test]
    fn test_open_missing_dir() {
        assert!(DemCatalog::open_dir("/nonexistent/surface/data", 10).is_err());
    }
}
