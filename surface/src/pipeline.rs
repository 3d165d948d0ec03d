//! Elevation assignment for arbitrary input geometries.
//!
//! Every geometry-accepting operation runs its input through
//! [`GeometryPipeline::interpolate`]: reproject into the surface's spatial
//! reference, assign Z per vertex, then reproject back to the caller's
//! reference. Nothing partial is ever returned.

use std::sync::Arc;

use crate::error::{Result, SurfaceError};
use crate::geometry::{Geometry, GeometryKind, Vertex};
use crate::provider::{GeometryEngine, TerrainProvider};
use crate::registry::SurfaceModel;

/// Spacing between densified vertices for a curve of `length`.
///
/// `interpolation_count` must be greater than 2, which
/// [`crate::SurfaceConfig::new`] guarantees.
pub fn densify_step(length: f64, interpolation_count: u32) -> f64 {
    length / (interpolation_count as f64 - 2.0)
}

/// Whether a multi-part curve needs topological repair before densifying.
///
/// Consecutive parts that meet end-to-start are assumed sound. Any nonzero
/// gap between the end of one part and the start of the next flags the
/// whole curve.
pub fn needs_simplify(engine: &dyn GeometryEngine, parts: &[Vec<Vertex>]) -> bool {
    parts.windows(2).any(|pair| match (pair[0].last(), pair[1].first()) {
        (Some(end), Some(start)) => engine.distance(end, start) > 0.0,
        _ => false,
    })
}

/// Drives reprojection, densification and per-vertex elevation lookups.
#[derive(Clone)]
pub struct GeometryPipeline {
    engine: Arc<dyn GeometryEngine>,
    interpolation_count: u32,
}

impl GeometryPipeline {
    pub fn new(engine: Arc<dyn GeometryEngine>, interpolation_count: u32) -> Self {
        Self {
            engine,
            interpolation_count,
        }
    }

    pub fn engine(&self) -> &dyn GeometryEngine {
        self.engine.as_ref()
    }

    /// Return a Z-aware copy of `geometry` with elevations from `model`.
    ///
    /// The result is in the caller's spatial reference; a geometry without
    /// one is taken to be in the surface's reference. Envelopes are only
    /// reprojected there and back.
    ///
    /// # Errors
    ///
    /// - [`SurfaceError::SurfaceDomain`] when any vertex has no valid elevation
    /// - [`SurfaceError::UnsupportedSpatialReference`] when reprojection fails
    pub fn interpolate(&self, geometry: &Geometry, model: &SurfaceModel) -> Result<Geometry> {
        let caller_sr = geometry.spatial_reference.unwrap_or(model.spatial_reference);

        let mut working = self.engine.project(geometry, &model.spatial_reference)?;
        working.z_aware = true;

        let mut result = match working.kind() {
            GeometryKind::Point | GeometryKind::Multipoint => {
                let terrain = model.terrain.as_ref();
                working.try_for_each_vertex_mut(|v| assign_point_z(terrain, v))?;
                working
            }
            GeometryKind::Polyline | GeometryKind::Polygon => {
                let parts = working.parts().unwrap_or_default();
                if needs_simplify(self.engine.as_ref(), parts) {
                    tracing::debug!(parts = parts.len(), "Simplifying disjoint multi-part curve");
                    working = self.engine.simplify(&working)?;
                }
                let step = densify_step(self.engine.length(&working), self.interpolation_count);
                let dense = self.engine.densify(&working, step)?;
                model.terrain.interpolate_shape(&dense)?.ok_or_else(|| {
                    SurfaceError::domain("Portion of the input feature falls outside the surface")
                })?
            }
            GeometryKind::Envelope => working,
        };

        // Providers may drop or rewrite the reference while interpolating.
        result.spatial_reference = Some(model.spatial_reference);
        result.z_aware = true;

        self.engine.project(&result, &caller_sr)
    }
}

fn assign_point_z(terrain: &dyn TerrainProvider, vertex: &mut Vertex) -> Result<()> {
    match terrain.valid_elevation(vertex.x, vertex.y)? {
        Some(z) => {
            vertex.z = Some(z);
            Ok(())
        }
        None => Err(SurfaceError::domain(format!(
            "Point ({}, {}) not valid: no elevation on the surface",
            vertex.x, vertex.y
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dem::{DemRaster, MemoryGrid};
    use crate::geometry::SpatialReference;
    use crate::planar::PlanarEngine;
    use serde_json::json;

    /// 100 x 100 cells of 10 m over a plane z = 0.1x + 0.01y.
    fn plane_model() -> SurfaceModel {
        let mut values = Vec::with_capacity(100 * 100);
        for row in 0..100 {
            for col in 0..100 {
                let x = 5.0 + 10.0 * col as f64;
                let y = 1000.0 - 5.0 - 10.0 * row as f64;
                values.push(0.1 * x + 0.01 * y);
            }
        }
        let grid = MemoryGrid::new(
            100,
            100,
            0.0,
            1000.0,
            10.0,
            SpatialReference::WEB_MERCATOR,
            values,
        )
        .unwrap();
        SurfaceModel::from_raster(Arc::new(DemRaster::new(Arc::new(grid)))).unwrap()
    }

    fn pipeline(count: u32) -> GeometryPipeline {
        GeometryPipeline::new(Arc::new(PlanarEngine::new()), count)
    }

    fn geometry(value: serde_json::Value) -> Geometry {
        Geometry::from_json(&value).unwrap().unwrap()
    }

    #[test]
    fn test_densify_step() {
        assert_eq!(densify_step(980.0, 100), 10.0);
    }

    #[test]
    fn test_needs_simplify_gap() {
        let engine = PlanarEngine::new();
        let touching = vec![
            vec![Vertex::new(0.0, 0.0), Vertex::new(1.0, 0.0)],
            vec![Vertex::new(1.0, 0.0), Vertex::new(2.0, 0.0)],
        ];
        assert!(!needs_simplify(&engine, &touching));

        let gapped = vec![
            vec![Vertex::new(0.0, 0.0), Vertex::new(1.0, 0.0)],
            vec![Vertex::new(1.001, 0.0), Vertex::new(2.0, 0.0)],
        ];
        assert!(needs_simplify(&engine, &gapped));

        let single = vec![vec![Vertex::new(0.0, 0.0), Vertex::new(5.0, 5.0)]];
        assert!(!needs_simplify(&engine, &single));
    }

    #[test]
    fn test_point_elevation() {
        let model = plane_model();
        let result = pipeline(100)
            .interpolate(&geometry(json!({"x": 500.0, "y": 500.0})), &model)
            .unwrap();
        let z = result.first_vertex().unwrap().z.unwrap();
        assert!((z - 55.0).abs() < 1e-9);
        assert!(result.z_aware);
        assert_eq!(result.spatial_reference, Some(SpatialReference::WEB_MERCATOR));
    }

    #[test]
    fn test_point_outside_surface() {
        let model = plane_model();
        let err = pipeline(100)
            .interpolate(&geometry(json!({"x": 5000.0, "y": 500.0})), &model)
            .unwrap_err();
        assert!(matches!(err, SurfaceError::SurfaceDomain { .. }));
    }

    #[test]
    fn test_multipoint_all_or_nothing() {
        let model = plane_model();
        let input = geometry(json!({"points": [[100.0, 100.0], [200.0, 200.0], [-50.0, 10.0]]}));
        let err = pipeline(100).interpolate(&input, &model).unwrap_err();
        assert!(matches!(err, SurfaceError::SurfaceDomain { .. }));

        let input = geometry(json!({"points": [[100.0, 100.0], [200.0, 200.0]]}));
        let result = pipeline(100).interpolate(&input, &model).unwrap();
        assert_eq!(result.vertex_count(), 2);
    }

    #[test]
    fn test_polyline_densified() {
        let model = plane_model();
        let input = geometry(json!({"paths": [[[100.0, 100.0], [900.0, 100.0]]]}));
        let result = pipeline(10).interpolate(&input, &model).unwrap();

        // 800 m / (10 - 2) = 100 m spacing
        assert_eq!(result.vertex_count(), 9);
        let parts = result.parts().unwrap();
        for v in &parts[0] {
            let expected = 0.1 * v.x + 0.01 * v.y;
            assert!((v.z.unwrap() - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn test_polyline_partly_outside() {
        let model = plane_model();
        let input = geometry(json!({"paths": [[[100.0, 100.0], [1900.0, 100.0]]]}));
        let err = pipeline(100).interpolate(&input, &model).unwrap_err();
        assert!(matches!(err, SurfaceError::SurfaceDomain { .. }));
    }

    #[test]
    fn test_reprojection_round_trip() {
        let model = plane_model();
        let (lon, lat) = crate::planar::to_geographic(500.0, 500.0);
        let input = geometry(json!({"x": lon, "y": lat, "spatialReference": {"wkid": 4326}}));

        let result = pipeline(100).interpolate(&input, &model).unwrap();
        let v = result.first_vertex().unwrap();
        assert_eq!(result.spatial_reference, Some(SpatialReference::WGS84));
        assert!((v.x - lon).abs() < 1e-9);
        assert!((v.y - lat).abs() < 1e-9);
        assert!((v.z.unwrap() - 55.0).abs() < 1e-6);
    }

    #[test]
    fn test_envelope_round_trip() {
        let model = plane_model();
        let input = geometry(json!({"xmin": 0.0, "ymin": 0.0, "xmax": 10.0, "ymax": 10.0}));
        let result = pipeline(100).interpolate(&input, &model).unwrap();
        assert_eq!(result.shape, input.shape);
    }
}
