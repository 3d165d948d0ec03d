//! Discovery of elevation layers in a published map.
//!
//! The registry is built once at startup. A map layer becomes a
//! [`SurfaceLayer`] only when its data source is a raster with exactly one
//! band; everything else is skipped.

use std::fmt;
use std::sync::Arc;

use serde_json::{json, Value};

use crate::error::{Result, SurfaceError};
use crate::geometry::{Envelope, Geometry, Shape, SpatialReference};
use crate::provider::{MapLayerInfo, MapLayerSource, PixelType, RasterSource, TerrainProvider};

/// Immutable handle on the surface behind one layer.
#[derive(Clone)]
pub struct SurfaceModel {
    pub raster: Arc<dyn RasterSource>,
    pub band_index: usize,
    pub spatial_reference: SpatialReference,
    pub terrain: Arc<dyn TerrainProvider>,
    pub pixel_type: PixelType,
}

impl SurfaceModel {
    /// Bundle band 0 of `raster` with its terrain surface.
    ///
    /// # Errors
    ///
    /// Returns an error if the raster cannot build a terrain surface.
    pub fn from_raster(raster: Arc<dyn RasterSource>) -> Result<Self> {
        let band_index = 0;
        let properties = raster.properties();
        let terrain = raster.surface(band_index)?;
        Ok(Self {
            raster,
            band_index,
            spatial_reference: properties.spatial_reference,
            terrain,
            pixel_type: properties.pixel_type,
        })
    }
}

impl fmt::Debug for SurfaceModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SurfaceModel")
            .field("band_index", &self.band_index)
            .field("spatial_reference", &self.spatial_reference)
            .field("pixel_type", &self.pixel_type)
            .finish_non_exhaustive()
    }
}

/// A map layer usable as an elevation surface.
#[derive(Debug)]
pub struct SurfaceLayer {
    pub id: i64,
    pub name: String,
    pub layer_type: String,
    pub extent: Option<Envelope>,
    pub description: String,
    pub model: SurfaceModel,
}

impl SurfaceLayer {
    /// Layer descriptor: `{id, name, type, extent, description}`.
    pub fn to_json(&self) -> Value {
        let extent = self
            .extent
            .map(|e| {
                Geometry::new(Shape::Envelope(e), Some(self.model.spatial_reference)).to_json()
            })
            .unwrap_or(Value::Null);
        json!({
            "id": self.id,
            "name": self.name,
            "type": self.layer_type,
            "extent": extent,
            "description": self.description,
        })
    }
}

/// The set of usable elevation layers, fixed for the process lifetime.
#[derive(Debug, Default)]
pub struct LayerRegistry {
    layers: Vec<Arc<SurfaceLayer>>,
}

impl LayerRegistry {
    /// Probe every layer of `source` and keep the single-band rasters.
    ///
    /// Discovery is best effort: a layer whose data source cannot be read or
    /// whose terrain surface cannot be built is logged and skipped.
    pub fn discover(source: &dyn MapLayerSource) -> Self {
        let layers = source
            .layers()
            .into_iter()
            .filter_map(|info| Self::register(source, info))
            .map(Arc::new)
            .collect::<Vec<_>>();

        tracing::info!(count = layers.len(), "Discovered surface layers");
        Self { layers }
    }

    fn register(source: &dyn MapLayerSource, info: MapLayerInfo) -> Option<SurfaceLayer> {
        let data_source = match source.data_source(info.id) {
            Ok(Some(ds)) => ds,
            Ok(None) => {
                tracing::debug!(layer_id = info.id, "Layer has no data source, skipping");
                return None;
            }
            Err(e) => {
                tracing::warn!(layer_id = info.id, error = %e, "Failed to open layer data source");
                return None;
            }
        };

        let (Some(raster), Some(bands)) = (data_source.raster(), data_source.bands()) else {
            tracing::debug!(layer_id = info.id, name = %info.name, "Layer is not a raster, skipping");
            return None;
        };

        let band_count = bands.band_count();
        if band_count != 1 {
            tracing::debug!(layer_id = info.id, band_count, "Layer is not single-band, skipping");
            return None;
        }

        let model = match SurfaceModel::from_raster(raster) {
            Ok(model) => model,
            Err(e) => {
                tracing::warn!(layer_id = info.id, error = %e, "Failed to build terrain surface");
                return None;
            }
        };

        tracing::debug!(layer_id = info.id, name = %info.name, "Registered surface layer");
        Some(SurfaceLayer {
            id: info.id,
            name: info.name,
            layer_type: info.layer_type,
            extent: info.extent,
            description: info.description,
            model,
        })
    }

    /// Build a registry from already constructed layers.
    pub fn from_layers(layers: Vec<SurfaceLayer>) -> Self {
        Self {
            layers: layers.into_iter().map(Arc::new).collect(),
        }
    }

    /// Find a layer by id.
    ///
    /// # Errors
    ///
    /// - [`SurfaceError::Validation`] for a negative id
    /// - [`SurfaceError::NotFound`] when no layer has this id
    pub fn lookup(&self, id: i64) -> Result<Arc<SurfaceLayer>> {
        if id < 0 {
            return Err(SurfaceError::validation(format!("Invalid layer id: {}", id)));
        }
        self.layers
            .iter()
            .find(|layer| layer.id == id)
            .cloned()
            .ok_or_else(|| SurfaceError::not_found(format!("Could not find layer id: {}", id)))
    }

    pub fn layers(&self) -> &[Arc<SurfaceLayer>] {
        &self.layers
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Descriptors of every layer, in discovery order.
    pub fn to_json(&self) -> Vec<Value> {
        self.layers.iter().map(|l| l.to_json()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dem::{DemCatalog, DemRaster, MemoryGrid};
    use crate::provider::{BandCollection, DataSource};

    fn catalog() -> DemCatalog {
        let mut catalog = DemCatalog::new();
        catalog.add_grid(
            "flat",
            MemoryGrid::new(
                4,
                4,
                0.0,
                4.0,
                1.0,
                SpatialReference::WGS84,
                vec![10.0; 16],
            )
            .unwrap(),
        );
        catalog.add_feature_layer("roads");
        catalog.add_grid(
            "hill",
            MemoryGrid::new(
                3,
                3,
                0.0,
                3.0,
                1.0,
                SpatialReference::WGS84,
                vec![1.0, 2.0, 1.0, 2.0, 5.0, 2.0, 1.0, 2.0, 1.0],
            )
            .unwrap(),
        );
        catalog
    }

    #[test]
    fn test_discover_skips_bandless_layers() {
        let registry = LayerRegistry::discover(&catalog());
        assert_eq!(registry.len(), 2);
        let ids: Vec<i64> = registry.layers().iter().map(|l| l.id).collect();
        assert_eq!(ids, vec![0, 2]);
    }

    #[test]
    fn test_lookup_returns_same_layer() {
        let registry = LayerRegistry::discover(&catalog());
        let a = registry.lookup(2).unwrap();
        let b = registry.lookup(2).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.name, "hill");
    }

    #[test]
    fn test_lookup_errors() {
        let registry = LayerRegistry::discover(&catalog());
        assert!(matches!(
            registry.lookup(-1).unwrap_err(),
            SurfaceError::Validation { .. }
        ));
        assert!(matches!(
            registry.lookup(1).unwrap_err(),
            SurfaceError::NotFound { .. }
        ));
        assert!(matches!(
            registry.lookup(99).unwrap_err(),
            SurfaceError::NotFound { .. }
        ));
    }

    #[test]
    fn test_layer_json() {
        let registry = LayerRegistry::discover(&catalog());
        let json = registry.lookup(0).unwrap().to_json();
        assert_eq!(json["id"], 0);
        assert_eq!(json["name"], "flat");
        assert_eq!(json["type"], "Raster Layer");
        assert_eq!(json["extent"]["xmax"], 4.0);
        assert_eq!(json["extent"]["spatialReference"]["wkid"], 4326);
    }

    struct FixedBands(usize);

    impl BandCollection for FixedBands {
        fn band_count(&self) -> usize {
            self.0
        }
    }

    /// A data source whose raster and band answers are set independently.
    struct MixedSource {
        raster: Option<Arc<dyn RasterSource>>,
        bands: Option<FixedBands>,
    }

    impl DataSource for MixedSource {
        fn raster(&self) -> Option<Arc<dyn RasterSource>> {
            self.raster.clone()
        }

        fn bands(&self) -> Option<&dyn BandCollection> {
            self.bands.as_ref().map(|b| b as &dyn BandCollection)
        }
    }

    struct MixedMap {
        sources: Vec<Arc<dyn DataSource>>,
    }

    impl MapLayerSource for MixedMap {
        fn layers(&self) -> Vec<MapLayerInfo> {
            (0..self.sources.len() as i64)
                .map(|id| MapLayerInfo {
                    id,
                    name: format!("layer{}", id),
                    layer_type: "Raster Layer".to_string(),
                    extent: None,
                    spatial_reference: Some(SpatialReference::WGS84),
                    description: String::new(),
                })
                .collect()
        }

        fn data_source(&self, id: i64) -> Result<Option<Arc<dyn DataSource>>> {
            Ok(self.sources.get(id as usize).cloned())
        }
    }

    fn raster() -> Arc<dyn RasterSource> {
        let grid =
            MemoryGrid::new(2, 2, 0.0, 2.0, 1.0, SpatialReference::WGS84, vec![1.0; 4]).unwrap();
        Arc::new(DemRaster::new(Arc::new(grid)))
    }

    fn source(raster: Option<Arc<dyn RasterSource>>, bands: Option<usize>) -> Arc<dyn DataSource> {
        Arc::new(MixedSource {
            raster,
            bands: bands.map(FixedBands),
        })
    }

    #[test]
    fn test_discover_keeps_only_single_band_rasters() {
        let map = MixedMap {
            sources: vec![
                source(Some(raster()), Some(1)),
                source(Some(raster()), Some(2)),
                source(Some(raster()), None),
                source(None, Some(1)),
                source(Some(raster()), Some(1)),
            ],
        };
        let registry = LayerRegistry::discover(&map);
        let ids: Vec<i64> = registry.layers().iter().map(|l| l.id).collect();
        assert_eq!(ids, vec![0, 4]);
        assert!(matches!(
            registry.lookup(1).unwrap_err(),
            SurfaceError::NotFound { .. }
        ));
    }
}

