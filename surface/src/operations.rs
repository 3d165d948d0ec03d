//! Handlers for the per-layer analytic operations.
//!
//! Each handler validates its inputs, calls the pipeline, the grid extractor
//! or the layer's terrain provider, and shapes a JSON result. Point and line
//! inputs are reprojected into the surface's spatial reference first, and
//! geometric outputs are returned in the caller's reference.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::config::SurfaceConfig;
use crate::error::{Result, SurfaceError};
use crate::geometry::{
    json_number, Geometry, GeometryKind, Ray, Shape, SpatialReference, Vector3, Vertex,
};
use crate::grid::{GridExtractor, GridRequest};
use crate::params::InputMap;
use crate::pipeline::GeometryPipeline;
use crate::provider::{AspectUnits, GeometryEngine, SightOptions, SlopeUnits};
use crate::registry::{LayerRegistry, SurfaceLayer, SurfaceModel};

/// Everything a handler needs, shared read-only across requests.
pub struct OperationContext {
    pub registry: LayerRegistry,
    pub pipeline: GeometryPipeline,
    pub grids: GridExtractor,
    pub config: SurfaceConfig,
}

impl OperationContext {
    pub fn new(
        registry: LayerRegistry,
        engine: Arc<dyn GeometryEngine>,
        config: SurfaceConfig,
    ) -> Self {
        Self {
            registry,
            pipeline: GeometryPipeline::new(engine, config.interpolation_count),
            grids: GridExtractor::new(config.max_data_values),
            config,
        }
    }

    fn engine(&self) -> &dyn GeometryEngine {
        self.pipeline.engine()
    }
}

/// Signature shared by every operation handler.
pub type OperationHandler = fn(&OperationContext, &SurfaceLayer, &InputMap) -> Result<Value>;

/// An input geometry resolved against a surface.
struct SurfaceInput {
    /// Reference to return results in.
    caller_sr: SpatialReference,
    /// The input reprojected into the surface's reference.
    local: Geometry,
}

fn geometry_input(
    ctx: &OperationContext,
    model: &SurfaceModel,
    inputs: &InputMap,
    kind: GeometryKind,
    label: &str,
) -> Result<SurfaceInput> {
    let wrong = || SurfaceError::validation(format!("{} is wrong", label));
    let value = inputs.try_sub_object("geometry").value().ok_or_else(wrong)?;
    let geometry = Geometry::from_json(&value)?
        .filter(|g| g.kind() == kind)
        .ok_or_else(wrong)?;
    let caller_sr = geometry.spatial_reference.unwrap_or(model.spatial_reference);
    let local = ctx.engine().project(&geometry, &model.spatial_reference)?;
    Ok(SurfaceInput { caller_sr, local })
}

/// A point input and its location on the surface.
fn point_input(
    ctx: &OperationContext,
    model: &SurfaceModel,
    inputs: &InputMap,
) -> Result<(SpatialReference, Vertex)> {
    let input = geometry_input(ctx, model, inputs, GeometryKind::Point, "Point")?;
    let vertex = input
        .local
        .first_vertex()
        .ok_or_else(|| SurfaceError::validation("Point is wrong"))?;
    Ok((input.caller_sr, vertex))
}

/// A polyline input's first and last vertices on the surface.
fn line_endpoints(
    ctx: &OperationContext,
    model: &SurfaceModel,
    inputs: &InputMap,
) -> Result<(SpatialReference, Vertex, Vertex)> {
    let input = geometry_input(ctx, model, inputs, GeometryKind::Polyline, "Geometry")?;
    match (input.local.first_vertex(), input.local.last_vertex()) {
        (Some(from), Some(to)) => Ok((input.caller_sr, from, to)),
        _ => Err(SurfaceError::validation("Geometry is wrong")),
    }
}

fn require_valid_point(model: &SurfaceModel, vertex: &Vertex) -> Result<f64> {
    model
        .terrain
        .valid_elevation(vertex.x, vertex.y)?
        .ok_or_else(|| SurfaceError::domain("Point not valid"))
}

/// Tag a provider geometry with the surface reference and return it to the
/// caller's reference as JSON. Absent geometries become `null`.
fn to_caller(
    ctx: &OperationContext,
    model: &SurfaceModel,
    geometry: Option<Geometry>,
    caller_sr: &SpatialReference,
) -> Result<Value> {
    match geometry {
        Some(mut g) => {
            g.spatial_reference = Some(model.spatial_reference);
            Ok(ctx.engine().project(&g, caller_sr)?.to_json())
        }
        None => Ok(Value::Null),
    }
}

fn point_geometry(v: Vector3) -> Geometry {
    Geometry::new(Shape::Point(Vertex::with_z(v.x, v.y, v.z)), None)
}

/// An optional offset; NaN counts as absent.
fn offset(inputs: &InputMap, name: &str) -> Option<f64> {
    inputs.try_double(name).value().filter(|v| !v.is_nan())
}

pub fn elevation_at_lon_lat(
    ctx: &OperationContext,
    layer: &SurfaceLayer,
    inputs: &InputMap,
) -> Result<Value> {
    let lon = inputs.try_double("lon").required("lon")?;
    if !(-180.0..=180.0).contains(&lon) {
        return Err(SurfaceError::validation(
            "lon must be between -180.0 and 180.0",
        ));
    }
    let lat = inputs.try_double("lat").required("lat")?;
    if !(-90.0..=90.0).contains(&lat) {
        return Err(SurfaceError::validation("lat must be between -90.0 and 90.0"));
    }

    let point = Geometry::point(lon, lat, Some(SpatialReference::WGS84));
    let result = ctx.pipeline.interpolate(&point, &layer.model)?;
    let elevation = result.first_vertex().and_then(|v| v.z).unwrap_or(f64::NAN);

    tracing::debug!(layer_id = layer.id, lon, lat, elevation, "Elevation at lon-lat");
    Ok(json!({ "elevation": json_number(elevation) }))
}

pub fn elevations(
    ctx: &OperationContext,
    layer: &SurfaceLayer,
    inputs: &InputMap,
) -> Result<Value> {
    let geometries = inputs.try_array("geometries").required("geometries")?;

    let results = geometries
        .iter()
        .map(|value| match Geometry::from_json(value)? {
            Some(geometry) => Ok(ctx.pipeline.interpolate(&geometry, &layer.model)?.to_json()),
            None => Ok(value.clone()),
        })
        .collect::<Result<Vec<_>>>()?;

    tracing::debug!(layer_id = layer.id, count = results.len(), "Elevations");
    Ok(json!({ "geometries": results }))
}

pub fn elevation_data(
    ctx: &OperationContext,
    layer: &SurfaceLayer,
    inputs: &InputMap,
) -> Result<Value> {
    let rows = inputs.try_long("rows").required("rows")?;
    let cols = match inputs.try_long("columns") {
        p if p.is_found() => p.required("columns")?,
        _ => inputs.try_long("cols").required("columns")?,
    };

    let extent_value = inputs.try_sub_object("extent").required("extent")?;
    let extent = Geometry::from_json(&extent_value)?
        .and_then(|g| match g.shape {
            Shape::Envelope(e) => Some((e, g.spatial_reference)),
            _ => None,
        })
        .ok_or_else(|| SurfaceError::validation("extent is wrong"))?;

    let request = GridRequest {
        extent: extent.0,
        spatial_reference: extent.1.unwrap_or(layer.model.spatial_reference),
        rows,
        cols,
    };
    Ok(ctx.grids.extract(&request, &layer.model)?.to_json())
}

pub fn line_of_sight(
    ctx: &OperationContext,
    layer: &SurfaceLayer,
    inputs: &InputMap,
) -> Result<Value> {
    let model = &layer.model;
    let (caller_sr, from, to) = line_endpoints(ctx, model, inputs)?;

    let terrain = model.terrain.as_ref();
    let (Some(from_z), Some(to_z)) = (
        terrain.valid_elevation(from.x, from.y)?,
        terrain.valid_elevation(to.x, to.y)?,
    ) else {
        return Err(SurfaceError::domain("End points line not valid"));
    };
    let observer = Vector3::new(from.x, from.y, from_z + offset(inputs, "offsetObserver").unwrap_or(0.0));
    let target = Vector3::new(to.x, to.y, to_z + offset(inputs, "offsetTarget").unwrap_or(0.0));

    let mut options = SightOptions {
        apply_curvature: inputs.try_bool("applyCurvature").value().unwrap_or(false),
        apply_refraction: inputs.try_bool("applyRefraction").value().unwrap_or(false),
        refraction_factor: offset(inputs, "refractionFactor"),
    };
    if !matches!(terrain.can_do_curvature(), Ok(true)) {
        options.apply_curvature = false;
        options.apply_refraction = false;
    }

    let sight = terrain.line_of_sight(observer, target, &options)?;
    tracing::debug!(layer_id = layer.id, is_visible = sight.is_visible, "Line of sight");

    Ok(json!({
        "pointObstruction": to_caller(ctx, model, sight.obstruction, &caller_sr)?,
        "visibleLines": to_caller(ctx, model, sight.visible, &caller_sr)?,
        "invisibleLines": to_caller(ctx, model, sight.invisible, &caller_sr)?,
        "isVisible": sight.is_visible,
    }))
}

pub fn steepest_path(
    ctx: &OperationContext,
    layer: &SurfaceLayer,
    inputs: &InputMap,
) -> Result<Value> {
    let model = &layer.model;
    let (caller_sr, point) = point_input(ctx, model, inputs)?;
    require_valid_point(model, &point)?;

    let path = model.terrain.steepest_path(point.x, point.y)?;
    Ok(json!({ "geometry": to_caller(ctx, model, path, &caller_sr)? }))
}

pub fn contour(ctx: &OperationContext, layer: &SurfaceLayer, inputs: &InputMap) -> Result<Value> {
    let model = &layer.model;
    let (caller_sr, point) = point_input(ctx, model, inputs)?;
    require_valid_point(model, &point)?;

    let contour = model.terrain.contour(point.x, point.y)?;
    Ok(json!({
        "geometry": to_caller(ctx, model, contour.geometry, &caller_sr)?,
        "elevation": json_number(contour.elevation),
    }))
}

pub fn slope(ctx: &OperationContext, layer: &SurfaceLayer, inputs: &InputMap) -> Result<Value> {
    let model = &layer.model;
    let (_, point) = point_input(ctx, model, inputs)?;
    require_valid_point(model, &point)?;

    // Unknown unit names fall back to the default instead of failing.
    let units = inputs
        .try_string("units")
        .value()
        .and_then(|u| SlopeUnits::from_name(&u))
        .unwrap_or_default();
    let slope = model.terrain.slope(point.x, point.y, units)?;
    Ok(json!({ "slope": json_number(slope), "units": units.as_str() }))
}

pub fn aspect(ctx: &OperationContext, layer: &SurfaceLayer, inputs: &InputMap) -> Result<Value> {
    let model = &layer.model;
    let (_, point) = point_input(ctx, model, inputs)?;
    require_valid_point(model, &point)?;

    let units = inputs
        .try_string("units")
        .value()
        .and_then(|u| AspectUnits::from_name(&u))
        .unwrap_or_default();
    let aspect = model.terrain.aspect(point.x, point.y, units)?;
    Ok(json!({ "aspect": json_number(aspect), "units": units.as_str() }))
}

pub fn surface_length(
    ctx: &OperationContext,
    layer: &SurfaceLayer,
    inputs: &InputMap,
) -> Result<Value> {
    let model = &layer.model;
    let input = geometry_input(ctx, model, inputs, GeometryKind::Polyline, "Polyline")?;
    let step_size = offset(inputs, "stepSize");

    let length = model.terrain.surface_length(&input.local, step_size)?;
    Ok(json!({ "surfaceLength": json_number(length) }))
}

pub fn normal(ctx: &OperationContext, layer: &SurfaceLayer, inputs: &InputMap) -> Result<Value> {
    let model = &layer.model;
    let (caller_sr, point) = point_input(ctx, model, inputs)?;
    let z = require_valid_point(model, &point)?;

    let normal = model.terrain.normal(point.x, point.y)?;
    let located = point_geometry(Vector3::new(point.x, point.y, z));
    Ok(json!({
        "geometry": to_caller(ctx, model, Some(located), &caller_sr)?,
        "vector3D": normal.to_array().map(json_number),
    }))
}

/// Z of a locate endpoint: surface elevation plus offset when an offset is
/// given, the vertex's own Z otherwise.
fn locate_endpoint_z(
    model: &SurfaceModel,
    vertex: &Vertex,
    offset: Option<f64>,
    message: &str,
) -> Result<f64> {
    let terrain = model.terrain.as_ref();
    let z = match offset {
        Some(offset) => terrain.elevation(vertex.x, vertex.y)? + offset,
        None => vertex.z.unwrap_or(f64::NAN),
    };
    if terrain.is_void(z) || z.is_nan() {
        return Err(SurfaceError::domain(message));
    }
    Ok(z)
}

fn locate_ray(
    ctx: &OperationContext,
    model: &SurfaceModel,
    inputs: &InputMap,
) -> Result<(SpatialReference, Ray, i32)> {
    let (caller_sr, from, to) = line_endpoints(ctx, model, inputs)?;
    let from_z = locate_endpoint_z(
        model,
        &from,
        offset(inputs, "offsetFromPoint"),
        "Start point line not valid",
    )?;
    let to_z = locate_endpoint_z(
        model,
        &to,
        offset(inputs, "offsetToPoint"),
        "End point line not valid",
    )?;
    let hint = inputs
        .try_long("hint")
        .value()
        .map(|h| h.clamp(i32::MIN as i64, i32::MAX as i64) as i32)
        .unwrap_or(0);

    let ray = Ray::between(
        Vector3::new(from.x, from.y, from_z),
        Vector3::new(to.x, to.y, to_z),
    );
    Ok((caller_sr, ray, hint))
}

pub fn locate(ctx: &OperationContext, layer: &SurfaceLayer, inputs: &InputMap) -> Result<Value> {
    let model = &layer.model;
    let (caller_sr, ray, hint) = locate_ray(ctx, model, inputs)?;

    let hit = model.terrain.locate(&ray, hint)?.map(point_geometry);
    Ok(json!({ "geometry": to_caller(ctx, model, hit, &caller_sr)? }))
}

pub fn locate_all(
    ctx: &OperationContext,
    layer: &SurfaceLayer,
    inputs: &InputMap,
) -> Result<Value> {
    let model = &layer.model;
    let (_, ray, hint) = locate_ray(ctx, model, inputs)?;

    let distances: Vec<Value> = model
        .terrain
        .locate_all(&ray, hint)?
        .into_iter()
        .map(json_number)
        .collect();
    Ok(json!({ "distances": distances }))
}
