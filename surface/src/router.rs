//! Capability-gated resource and operation routing.
//!
//! The resource tree is built once and never changes:
//!
//! ```text
//! /                                   service description
//! /Info                               configuration and granted capabilities
//! /Help                               operation documentation
//! /SurfaceLayers                      every surface layer
//! /SurfaceLayers/{id}                 one layer
//! /SurfaceLayers/{id}/{Operation}     an analytic operation on a layer
//! ```
//!
//! Every failure, whatever its kind, leaves the router as the same JSON
//! envelope `{"error": {"code": <status>, "message": <text>}}`.

use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::config::{Capability, CapabilitySet, SurfaceConfig};
use crate::error::{Result, SurfaceError};
use crate::operations::{self, OperationContext, OperationHandler};
use crate::params::InputMap;
use crate::provider::GeometryEngine;
use crate::registry::LayerRegistry;

/// Name of the path variable bound by the layer collection.
pub const LAYER_ID_VAR: &str = "SurfaceLayersID";

const JSON_FORMATS: &[&str] = &["json"];

const SERVICE_DESCRIPTION: &str = "Get elevation values at a location, along geometries, or \
interpolated over an extent, plus line of sight, contour, slope, aspect, steepest path, \
normal, surface length, locate and locate all.";

/// An operation exposed under a resource.
#[derive(Clone)]
pub struct Operation {
    pub name: &'static str,
    pub info: &'static str,
    /// Input names in declaration order, with their help text.
    pub inputs: &'static [(&'static str, &'static str)],
    pub output_formats: &'static [&'static str],
    pub capability: Capability,
    handler: OperationHandler,
}

impl Operation {
    pub fn input_names(&self) -> Vec<&'static str> {
        self.inputs.iter().map(|(name, _)| *name).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResourceKind {
    Root,
    Info,
    Help,
    SurfaceLayers,
}

/// A node of the resource tree.
#[derive(Clone)]
pub struct Resource {
    pub name: &'static str,
    pub is_collection: bool,
    pub description: &'static str,
    pub children: Vec<Resource>,
    pub operations: Vec<Operation>,
    kind: ResourceKind,
}

impl Resource {
    fn child(&self, name: &str) -> Option<&Resource> {
        self.children.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    fn operation(&self, name: &str) -> Option<&Operation> {
        self.operations.iter().find(|o| o.name.eq_ignore_ascii_case(name))
    }

    fn schema(&self) -> Value {
        json!({
            "name": self.name,
            "isCollection": self.is_collection,
            "resources": self.children.iter().map(Resource::schema).collect::<Vec<_>>(),
            "operations": self.operations.iter().map(|op| json!({
                "name": op.name,
                "parameters": op.input_names(),
                "supportedOutputFormats": op.output_formats,
                "capability": op.capability.label(),
            })).collect::<Vec<_>>(),
        })
    }
}

/// A serialized reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl Response {
    fn json(status: u16, value: &Value) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: value.to_string().into_bytes(),
        }
    }

    fn error(err: &SurfaceError) -> Self {
        let status = err.status_code();
        Self::json(
            status,
            &json!({ "error": { "code": status, "message": err.to_string() } }),
        )
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Parse the body back into JSON.
    pub fn to_json(&self) -> serde_json::Result<Value> {
        serde_json::from_slice(&self.body)
    }
}

/// A resolved request path.
#[derive(Debug, Default, PartialEq)]
struct ResolvedPath<'a> {
    layer_id: Option<&'a str>,
    operation: Option<&'a str>,
}

/// Dispatches requests to resource and operation handlers.
pub struct ResourceRouter {
    root: Arc<Resource>,
    context: OperationContext,
}

impl ResourceRouter {
    pub fn new(
        registry: LayerRegistry,
        engine: Arc<dyn GeometryEngine>,
        config: SurfaceConfig,
    ) -> Self {
        Self {
            root: Arc::new(build_tree()),
            context: OperationContext::new(registry, engine, config),
        }
    }

    pub fn registry(&self) -> &LayerRegistry {
        &self.context.registry
    }

    pub fn config(&self) -> &SurfaceConfig {
        &self.context.config
    }

    /// The resource tree.
    pub fn root(&self) -> &Resource {
        &self.root
    }

    /// Handle one request.
    ///
    /// # Arguments
    ///
    /// * `granted` - Capabilities enabled for this instance
    /// * `path` - Resource path, e.g. `SurfaceLayers/0/GetSlope`
    /// * `operation` - Explicit operation name; otherwise the last path
    ///   segment may name one
    /// * `format` - Requested output format (`f`); defaults to `json`
    /// * `inputs` - Parsed request inputs
    pub fn dispatch(
        &self,
        granted: &CapabilitySet,
        path: &str,
        operation: Option<&str>,
        format: Option<&str>,
        inputs: &InputMap,
    ) -> Response {
        match self.try_dispatch(granted, path, operation, format, inputs) {
            Ok(value) => Response::json(200, &value),
            Err(err) => {
                if err.status_code() >= 500 {
                    tracing::warn!(path, error = %err, "Request failed");
                } else {
                    tracing::debug!(path, error = %err, "Request rejected");
                }
                Response::error(&err)
            }
        }
    }

    fn try_dispatch(
        &self,
        granted: &CapabilitySet,
        path: &str,
        operation: Option<&str>,
        format: Option<&str>,
        inputs: &InputMap,
    ) -> Result<Value> {
        let (resource, resolved) = self.resolve(path, operation)?;

        let Some(op_name) = resolved.operation else {
            check_format(JSON_FORMATS, format)?;
            return self.resource_json(resource, resolved.layer_id, granted);
        };

        let op = resource.operation(op_name).ok_or_else(|| {
            SurfaceError::not_found(format!(
                "Operation '{}' not found on resource '{}'",
                op_name, resource.name
            ))
        })?;

        // Nothing about the request is examined before the capability check.
        if !granted.contains(op.capability) {
            return Err(SurfaceError::Forbidden {
                operation: op.name.to_string(),
                capability: op.capability.label().to_string(),
            });
        }
        check_format(op.output_formats, format)?;

        let raw_id = resolved
            .layer_id
            .ok_or_else(|| SurfaceError::validation(format!("{} requires a layer id", op.name)))?;
        let layer = self.context.registry.lookup(parse_layer_id(raw_id)?)?;

        tracing::debug!(layer_id = layer.id, operation = op.name, inputs = inputs.len(), "Dispatching");
        (op.handler)(&self.context, &layer, inputs)
    }

    fn resolve<'a>(
        &self,
        path: &'a str,
        operation: Option<&'a str>,
    ) -> Result<(&Resource, ResolvedPath<'a>)> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut resource: &Resource = &self.root;
        let mut resolved = ResolvedPath {
            operation,
            ..Default::default()
        };

        for (i, segment) in segments.iter().enumerate() {
            let is_last = i + 1 == segments.len();
            if resource.is_collection && resolved.layer_id.is_none() {
                resolved.layer_id = Some(segment);
            } else if let Some(child) = resource.child(segment) {
                resource = child;
            } else if is_last && resolved.operation.is_none() {
                resolved.operation = Some(segment);
            } else {
                return Err(SurfaceError::not_found(format!(
                    "Resource '{}' not found",
                    segment
                )));
            }
        }
        Ok((resource, resolved))
    }

    fn resource_json(
        &self,
        resource: &Resource,
        layer_id: Option<&str>,
        granted: &CapabilitySet,
    ) -> Result<Value> {
        match resource.kind {
            ResourceKind::Root => Ok(self.root_json()),
            ResourceKind::Info => Ok(self.info_json(granted)),
            ResourceKind::Help => Ok(self.help_json()),
            ResourceKind::SurfaceLayers => match layer_id {
                None => Ok(json!({ "SurfaceLayers": self.context.registry.to_json() })),
                Some(raw) => Ok(self.context.registry.lookup(parse_layer_id(raw)?)?.to_json()),
            },
        }
    }

    pub fn root_json(&self) -> Value {
        json!({
            "description": SERVICE_DESCRIPTION,
            "surfaceLayers": self.context.registry.to_json(),
        })
    }

    pub fn info_json(&self, granted: &CapabilitySet) -> Value {
        json!({
            "serviceVersion": env!("CARGO_PKG_VERSION"),
            "interpolationCount": self.context.config.interpolation_count,
            "maxDataValues": self.context.config.max_data_values,
            "capabilities": granted.labels(),
        })
    }

    pub fn help_json(&self) -> Value {
        let mut resources = Map::new();
        let mut operations = Map::new();
        collect_help(&self.root, &mut resources, &mut operations);

        json!({
            "Requirements": {
                "spatial reference": "Surfaces in WGS84 or Web Mercator; inputs in other references are rejected",
                "Z values": "Elevations in metres",
                "Surface layers": "Only single-band raster layers are published as surfaces",
                "Capabilities": "Operations are reachable only when their capability is enabled",
            },
            "Properties": {
                "interpolationCount": "Number of vertices targeted when densifying polylines and polygons in GetElevations",
                "maxDataValues": "Maximum rows * columns returned by GetElevationData",
            },
            "Resources": resources,
            "Operations": operations,
        })
    }

    /// The resource tree as JSON.
    pub fn schema(&self) -> Value {
        self.root.schema()
    }
}

fn collect_help(resource: &Resource, resources: &mut Map<String, Value>, operations: &mut Map<String, Value>) {
    for child in &resource.children {
        resources.insert(child.name.to_string(), Value::String(child.description.to_string()));
        collect_help(child, resources, operations);
    }
    for op in &resource.operations {
        let inputs: Map<String, Value> = op
            .inputs
            .iter()
            .map(|(name, help)| (name.to_string(), Value::String(help.to_string())))
            .collect();
        operations.insert(
            op.name.to_string(),
            json!({
                "info": op.info,
                "inputs": inputs,
                "outputFormats": op.output_formats,
                "capability": op.capability.label(),
            }),
        );
    }
}

fn parse_layer_id(raw: &str) -> Result<i64> {
    raw.parse()
        .map_err(|_| SurfaceError::validation(format!("Invalid layer id: {}", raw)))
}

fn check_format(supported: &[&str], requested: Option<&str>) -> Result<()> {
    let format = match requested.map(str::trim) {
        None | Some("") => "json",
        Some(f) if f.eq_ignore_ascii_case("pjson") => "json",
        Some(f) => f,
    };
    if supported.iter().any(|s| s.eq_ignore_ascii_case(format)) {
        Ok(())
    } else {
        Err(SurfaceError::validation(format!(
            "Output format '{}' is not supported",
            format
        )))
    }
}

const GEOMETRY_POINT: (&str, &str) = ("geometry", "(geometry) Point");
const LINE_GEOMETRY: (&str, &str) = (
    "geometry",
    "(geometry) Polyline; its first and last vertices are used",
);

fn layer_operations() -> Vec<Operation> {
    vec![
        Operation {
            name: "GetElevationAtLonLat",
            info: "Get the elevation at a WGS84 location.",
            inputs: &[
                ("lon", "(double) Longitude between -180.0 and 180.0"),
                ("lat", "(double) Latitude between -90.0 and 90.0"),
            ],
            output_formats: JSON_FORMATS,
            capability: Capability::ElevationAtLonLat,
            handler: operations::elevation_at_lon_lat,
        },
        Operation {
            name: "GetElevations",
            info: "Get elevations along points, multipoints, polylines and polygons. Curves are densified first.",
            inputs: &[("geometries", "(geometry[]) Geometries to interpolate")],
            output_formats: JSON_FORMATS,
            capability: Capability::Elevations,
            handler: operations::elevations,
        },
        Operation {
            name: "GetElevationData",
            info: "Get interpolated elevation values within an extent.",
            inputs: &[
                ("extent", "(extent) The interpolation extent"),
                ("rows", "(int) Number of rows; rows * columns may not exceed maxDataValues"),
                ("columns", "(int) Number of columns; rows * columns may not exceed maxDataValues"),
            ],
            output_formats: JSON_FORMATS,
            capability: Capability::ElevationData,
            handler: operations::elevation_data,
        },
        Operation {
            name: "GetLineOfSight",
            info: "Compute the visibility of a target from an observer (the end points of a line).",
            inputs: &[
                LINE_GEOMETRY,
                ("offsetObserver", "(double/NaN) Optional observer height above the surface"),
                ("offsetTarget", "(double/NaN) Optional target height above the surface"),
                ("applyCurvature", "(boolean) Optional earth curvature correction, default false"),
                ("applyRefraction", "(boolean) Optional refraction correction, default false"),
                ("refractionFactor", "(double/NaN) Optional refraction factor, default 0.13"),
            ],
            output_formats: JSON_FORMATS,
            capability: Capability::LineOfSight,
            handler: operations::line_of_sight,
        },
        Operation {
            name: "GetSteepestPath",
            info: "Get the steepest downhill path from a point, ending in a pit or at the surface edge.",
            inputs: &[GEOMETRY_POINT],
            output_formats: JSON_FORMATS,
            capability: Capability::SteepestPath,
            handler: operations::steepest_path,
        },
        Operation {
            name: "GetContour",
            info: "Get the contour line passing through a point.",
            inputs: &[GEOMETRY_POINT],
            output_formats: JSON_FORMATS,
            capability: Capability::Contour,
            handler: operations::contour,
        },
        Operation {
            name: "GetSlope",
            info: "Get the slope at a point.",
            inputs: &[
                GEOMETRY_POINT,
                ("units", "(string) Percent (default), Degrees or Radians"),
            ],
            output_formats: JSON_FORMATS,
            capability: Capability::Slope,
            handler: operations::slope,
        },
        Operation {
            name: "GetAspect",
            info: "Get the aspect at a point, clockwise from north.",
            inputs: &[
                GEOMETRY_POINT,
                ("units", "(string) Degrees (default) or Radians"),
            ],
            output_formats: JSON_FORMATS,
            capability: Capability::Aspect,
            handler: operations::aspect,
        },
        Operation {
            name: "GetSurfaceLength",
            info: "Get the 3D length of a polyline draped over the surface.",
            inputs: &[
                ("geometry", "(geometry) Polyline"),
                ("stepSize", "(double/NaN) Optional sampling step, default the surface cell size"),
            ],
            output_formats: JSON_FORMATS,
            capability: Capability::SurfaceLength,
            handler: operations::surface_length,
        },
        Operation {
            name: "GetNormal",
            info: "Get the surface normal at a point.",
            inputs: &[GEOMETRY_POINT],
            output_formats: JSON_FORMATS,
            capability: Capability::Normal,
            handler: operations::normal,
        },
        Operation {
            name: "GetLocate",
            info: "Get the first intersection of a ray with the surface.",
            inputs: &[
                LINE_GEOMETRY,
                ("offsetFromPoint", "(double/NaN) Optional start height above the surface; otherwise the vertex Z"),
                ("offsetToPoint", "(double/NaN) Optional end height above the surface; otherwise the vertex Z"),
                ("hint", "(int) Optional search hint, default 0"),
            ],
            output_formats: JSON_FORMATS,
            capability: Capability::Locate,
            handler: operations::locate,
        },
        Operation {
            name: "GetLocateAll",
            info: "Get the distances along a ray of every intersection with the surface.",
            inputs: &[
                LINE_GEOMETRY,
                ("offsetFromPoint", "(double/NaN) Optional start height above the surface; otherwise the vertex Z"),
                ("offsetToPoint", "(double/NaN) Optional end height above the surface; otherwise the vertex Z"),
                ("hint", "(int) Optional search hint, default 0"),
            ],
            output_formats: JSON_FORMATS,
            capability: Capability::Locate,
            handler: operations::locate_all,
        },
    ]
}

fn build_tree() -> Resource {
    let leaf = |name, description, kind| Resource {
        name,
        is_collection: false,
        description,
        children: Vec::new(),
        operations: Vec::new(),
        kind,
    };

    Resource {
        name: "",
        is_collection: false,
        description: SERVICE_DESCRIPTION,
        children: vec![
            leaf("Info", "Service configuration and enabled capabilities", ResourceKind::Info),
            leaf("Help", "Documentation of resources and operations", ResourceKind::Help),
            Resource {
                name: "SurfaceLayers",
                is_collection: true,
                description: "Single-band raster layers usable as elevation surfaces",
                children: Vec::new(),
                operations: layer_operations(),
                kind: ResourceKind::SurfaceLayers,
            },
        ],
        operations: Vec::new(),
        kind: ResourceKind::Root,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dem::{DemCatalog, MemoryGrid};
    use crate::geometry::SpatialReference;
    use crate::planar::PlanarEngine;

    fn router() -> ResourceRouter {
        let values = (0..20 * 20).map(|i| (i / 20) as f64).collect();
        let mut catalog = DemCatalog::new();
        catalog.add_grid(
            "ramp",
            MemoryGrid::new(20, 20, 0.0, 200.0, 10.0, SpatialReference::WEB_MERCATOR, values)
                .unwrap(),
        );
        ResourceRouter::new(
            LayerRegistry::discover(&catalog),
            Arc::new(PlanarEngine::new()),
            SurfaceConfig::default(),
        )
    }

    fn body(response: &Response) -> Value {
        response.to_json().unwrap()
    }

    #[test]
    fn test_forbidden_before_anything_else() {
        let router = router();
        let granted = CapabilitySet::default();
        // Bad layer id and no inputs: still Forbidden
        let response = router.dispatch(
            &granted,
            "SurfaceLayers/99/GetSlope",
            None,
            Some("xml"),
            &InputMap::new(),
        );
        assert_eq!(response.status, 403);
        assert_eq!(body(&response)["error"]["code"], 403);
    }

    #[test]
    fn test_operation_names_case_insensitive() {
        let router = router();
        let inputs = InputMap::from_json(json!({"geometry": {"x": 55.0, "y": 105.0}})).unwrap();
        let response = router.dispatch(
            &CapabilitySet::all(),
            "SurfaceLayers/0",
            Some("getslope"),
            None,
            &inputs,
        );
        assert!(response.is_success());
        assert_eq!(body(&response)["units"], "Percent");
    }

    #[test]
    fn test_unknown_operation_and_resource() {
        let router = router();
        let granted = CapabilitySet::all();
        let response = router.dispatch(&granted, "SurfaceLayers/0/GetNothing", None, None, &InputMap::new());
        assert_eq!(response.status, 404);

        let response = router.dispatch(&granted, "Nowhere/At/All", None, None, &InputMap::new());
        assert_eq!(response.status, 404);
    }

    #[test]
    fn test_layer_id_errors() {
        let router = router();
        let granted = CapabilitySet::all();
        let response = router.dispatch(&granted, "SurfaceLayers/-1", None, None, &InputMap::new());
        assert_eq!(response.status, 400);
        let response = router.dispatch(&granted, "SurfaceLayers/7", None, None, &InputMap::new());
        assert_eq!(response.status, 404);
        let response = router.dispatch(&granted, "SurfaceLayers/abc", None, None, &InputMap::new());
        assert_eq!(response.status, 400);
    }

    #[test]
    fn test_output_format() {
        let router = router();
        let granted = CapabilitySet::default();
        let response = router.dispatch(&granted, "Info", None, Some("pjson"), &InputMap::new());
        assert!(response.is_success());
        let response = router.dispatch(&granted, "Info", None, Some("kmz"), &InputMap::new());
        assert_eq!(response.status, 400);
    }

    #[test]
    fn test_resources() {
        let router = router();
        let granted = CapabilitySet::default();

        let root = body(&router.dispatch(&granted, "/", None, None, &InputMap::new()));
        assert_eq!(root["surfaceLayers"].as_array().unwrap().len(), 1);

        let info = body(&router.dispatch(&granted, "/Info", None, None, &InputMap::new()));
        assert_eq!(info["interpolationCount"], 100);
        assert_eq!(info["maxDataValues"], 10000);
        assert_eq!(info["capabilities"], json!(["Elevation at lon-lat", "Elevations"]));

        let list = body(&router.dispatch(&granted, "SurfaceLayers", None, None, &InputMap::new()));
        assert_eq!(list["SurfaceLayers"][0]["name"], "ramp");

        let layer = body(&router.dispatch(&granted, "SurfaceLayers/0", None, None, &InputMap::new()));
        assert_eq!(layer["id"], 0);

        let help = body(&router.dispatch(&granted, "help", None, None, &InputMap::new()));
        assert_eq!(help["Operations"]["GetLocateAll"]["capability"], "Locate");
        assert_eq!(help["Operations"]["GetSlope"]["inputs"]["units"].is_string(), true);
    }

    #[test]
    fn test_schema_lists_operations() {
        let router = router();
        let schema = router.schema();
        let layers = &schema["resources"][2];
        assert_eq!(layers["name"], "SurfaceLayers");
        assert_eq!(layers["isCollection"], true);
        assert_eq!(layers["operations"].as_array().unwrap().len(), 12);
        assert_eq!(
            layers["operations"][2]["parameters"],
            json!(["extent", "rows", "columns"])
        );
    }

    #[test]
    fn test_operation_requires_layer_id() {
        let router = router();
        let response = router.dispatch(
            &CapabilitySet::all(),
            "SurfaceLayers",
            Some("GetSlope"),
            None,
            &InputMap::new(),
        );
        assert_eq!(response.status, 400);
    }

    #[test]
    fn test_handler_errors_use_envelope() {
        let router = router();
        let inputs = InputMap::from_json(json!({"lon": 500.0, "lat": 0.0})).unwrap();
        let response = router.dispatch(
            &CapabilitySet::default(),
            "SurfaceLayers/0/GetElevationAtLonLat",
            None,
            None,
            &inputs,
        );
        assert_eq!(response.status, 400);
        let envelope = body(&response);
        assert!(envelope["error"]["message"].as_str().unwrap().contains("lon"));
    }
}
