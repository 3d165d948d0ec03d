//! Geometry model and its JSON wire form.
//!
//! Geometries use the map-service JSON layout: points carry `x`/`y`(/`z`),
//! multipoints a `points` array, polylines `paths`, polygons `rings` and
//! envelopes `xmin`/`ymin`/`xmax`/`ymax`. Every shape may carry a
//! `spatialReference` object with a `wkid`.

use serde_json::{json, Map, Value};

use crate::error::{Result, SurfaceError};

/// Web Mercator well-known ids, including the deprecated aliases.
const WEB_MERCATOR_WKIDS: [u32; 4] = [3857, 102100, 102113, 900913];

/// A coordinate system identified by its well-known id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpatialReference {
    pub wkid: u32,
}

impl SpatialReference {
    /// Geographic WGS84 (longitude/latitude in degrees).
    pub const WGS84: SpatialReference = SpatialReference { wkid: 4326 };

    /// Spherical Web Mercator (metres).
    pub const WEB_MERCATOR: SpatialReference = SpatialReference { wkid: 3857 };

    pub fn new(wkid: u32) -> Self {
        Self { wkid }
    }

    pub fn is_geographic(&self) -> bool {
        self.wkid == 4326
    }

    pub fn is_web_mercator(&self) -> bool {
        WEB_MERCATOR_WKIDS.contains(&self.wkid)
    }

    /// True when both ids name the same coordinate system, treating the Web
    /// Mercator aliases as equal.
    pub fn same_as(&self, other: &SpatialReference) -> bool {
        self.wkid == other.wkid || (self.is_web_mercator() && other.is_web_mercator())
    }

    pub fn to_json(&self) -> Value {
        json!({ "wkid": self.wkid })
    }

    /// Parse `{"wkid": n}`, falling back to `latestWkid`.
    pub fn from_json(value: &Value) -> Result<Self> {
        let wkid = value
            .get("wkid")
            .and_then(Value::as_u64)
            .or_else(|| value.get("latestWkid").and_then(Value::as_u64))
            .ok_or_else(|| SurfaceError::validation("spatialReference must carry a wkid"))?;
        u32::try_from(wkid)
            .map(Self::new)
            .map_err(|_| SurfaceError::validation(format!("wkid {} is out of range", wkid)))
    }
}

/// A single coordinate with an optional elevation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vertex {
    pub x: f64,
    pub y: f64,
    pub z: Option<f64>,
}

impl Vertex {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y, z: None }
    }

    pub fn with_z(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z: Some(z) }
    }

    /// Planar distance to another vertex, ignoring Z.
    pub fn distance_to(&self, other: &Vertex) -> f64 {
        (other.x - self.x).hypot(other.y - self.y)
    }
}

/// An axis-aligned rectangle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Envelope {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
}

impl Envelope {
    pub fn new(xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> Self {
        Self {
            xmin,
            ymin,
            xmax,
            ymax,
        }
    }

    pub fn width(&self) -> f64 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> f64 {
        self.ymax - self.ymin
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        (self.xmin..=self.xmax).contains(&x) && (self.ymin..=self.ymax).contains(&y)
    }

    /// Smallest envelope containing both.
    pub fn union(&self, other: &Envelope) -> Envelope {
        Envelope::new(
            self.xmin.min(other.xmin),
            self.ymin.min(other.ymin),
            self.xmax.max(other.xmax),
            self.ymax.max(other.ymax),
        )
    }
}

/// Kind of geometry, as named in error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryKind {
    Point,
    Multipoint,
    Polyline,
    Polygon,
    Envelope,
}

impl GeometryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeometryKind::Point => "point",
            GeometryKind::Multipoint => "multipoint",
            GeometryKind::Polyline => "polyline",
            GeometryKind::Polygon => "polygon",
            GeometryKind::Envelope => "envelope",
        }
    }
}

/// The coordinates of a geometry.
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Point(Vertex),
    Multipoint(Vec<Vertex>),
    Polyline(Vec<Vec<Vertex>>),
    Polygon(Vec<Vec<Vertex>>),
    Envelope(Envelope),
}

/// A shape tagged with its spatial reference and Z-awareness.
#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    pub shape: Shape,
    /// `None` means "same as the surface being queried".
    pub spatial_reference: Option<SpatialReference>,
    pub z_aware: bool,
}

impl Geometry {
    pub fn new(shape: Shape, spatial_reference: Option<SpatialReference>) -> Self {
        let z_aware = shape_has_z(&shape);
        Self {
            shape,
            spatial_reference,
            z_aware,
        }
    }

    pub fn point(x: f64, y: f64, spatial_reference: Option<SpatialReference>) -> Self {
        Self::new(Shape::Point(Vertex::new(x, y)), spatial_reference)
    }

    pub fn polyline(paths: Vec<Vec<Vertex>>, spatial_reference: Option<SpatialReference>) -> Self {
        Self::new(Shape::Polyline(paths), spatial_reference)
    }

    pub fn kind(&self) -> GeometryKind {
        match self.shape {
            Shape::Point(_) => GeometryKind::Point,
            Shape::Multipoint(_) => GeometryKind::Multipoint,
            Shape::Polyline(_) => GeometryKind::Polyline,
            Shape::Polygon(_) => GeometryKind::Polygon,
            Shape::Envelope(_) => GeometryKind::Envelope,
        }
    }

    /// Parts of a polyline or polygon; `None` for every other shape.
    pub fn parts(&self) -> Option<&[Vec<Vertex>]> {
        match &self.shape {
            Shape::Polyline(parts) | Shape::Polygon(parts) => Some(parts),
            _ => None,
        }
    }

    /// First vertex of the first part.
    pub fn first_vertex(&self) -> Option<Vertex> {
        match &self.shape {
            Shape::Point(v) => Some(*v),
            Shape::Multipoint(points) => points.first().copied(),
            Shape::Polyline(parts) | Shape::Polygon(parts) => {
                parts.iter().find_map(|p| p.first().copied())
            }
            Shape::Envelope(e) => Some(Vertex::new(e.xmin, e.ymin)),
        }
    }

    /// Last vertex of the last part.
    pub fn last_vertex(&self) -> Option<Vertex> {
        match &self.shape {
            Shape::Point(v) => Some(*v),
            Shape::Multipoint(points) => points.last().copied(),
            Shape::Polyline(parts) | Shape::Polygon(parts) => {
                parts.iter().rev().find_map(|p| p.last().copied())
            }
            Shape::Envelope(e) => Some(Vertex::new(e.xmax, e.ymax)),
        }
    }

    pub fn vertex_count(&self) -> usize {
        match &self.shape {
            Shape::Point(_) => 1,
            Shape::Multipoint(points) => points.len(),
            Shape::Polyline(parts) | Shape::Polygon(parts) => parts.iter().map(Vec::len).sum(),
            Shape::Envelope(_) => 2,
        }
    }

    /// Apply `f` to every vertex in place, stopping at the first error.
    ///
    /// Envelopes are visited as their lower-left and upper-right corners.
    pub fn try_for_each_vertex_mut<F>(&mut self, mut f: F) -> Result<()>
    where
        F: FnMut(&mut Vertex) -> Result<()>,
    {
        match &mut self.shape {
            Shape::Point(v) => f(v),
            Shape::Multipoint(points) => points.iter_mut().try_for_each(f),
            Shape::Polyline(parts) | Shape::Polygon(parts) => parts
                .iter_mut()
                .flat_map(|p| p.iter_mut())
                .try_for_each(f),
            Shape::Envelope(e) => {
                let mut ll = Vertex::new(e.xmin, e.ymin);
                let mut ur = Vertex::new(e.xmax, e.ymax);
                f(&mut ll)?;
                f(&mut ur)?;
                *e = Envelope::new(ll.x.min(ur.x), ll.y.min(ur.y), ll.x.max(ur.x), ll.y.max(ur.y));
                Ok(())
            }
        }
    }

    /// Parse a geometry from its JSON form.
    ///
    /// Keys are checked in the order `rings`, `paths`, `points`, `x`, `xmin`.
    ///
    /// # Returns
    ///
    /// `Ok(None)` when the value is not a recognizable geometry.
    ///
    /// # Errors
    ///
    /// Returns a validation error when a recognized shape has malformed
    /// coordinates or spatial reference.
    pub fn from_json(value: &Value) -> Result<Option<Geometry>> {
        let Some(object) = value.as_object() else {
            return Ok(None);
        };

        let shape = if let Some(rings) = object.get("rings") {
            Shape::Polygon(parse_parts(rings, "rings")?)
        } else if let Some(paths) = object.get("paths") {
            Shape::Polyline(parse_parts(paths, "paths")?)
        } else if let Some(points) = object.get("points") {
            Shape::Multipoint(parse_vertex_list(points, "points")?)
        } else if object.contains_key("x") {
            let x = number_field(object, "x")?;
            let y = number_field(object, "y")?;
            let z = match object.get("z") {
                None | Some(Value::Null) => None,
                Some(v) => Some(parse_number(v).ok_or_else(|| {
                    SurfaceError::validation("point z must be a number")
                })?),
            };
            Shape::Point(Vertex { x, y, z })
        } else if object.contains_key("xmin") {
            Shape::Envelope(Envelope::new(
                number_field(object, "xmin")?,
                number_field(object, "ymin")?,
                number_field(object, "xmax")?,
                number_field(object, "ymax")?,
            ))
        } else {
            return Ok(None);
        };

        let spatial_reference = match object.get("spatialReference") {
            None | Some(Value::Null) => None,
            Some(sr) => Some(SpatialReference::from_json(sr)?),
        };

        let mut geometry = Geometry::new(shape, spatial_reference);
        if object.get("hasZ").and_then(Value::as_bool) == Some(true) {
            geometry.z_aware = true;
        }
        Ok(Some(geometry))
    }

    /// Serialize to the JSON wire form. Z values are written only when the
    /// geometry is Z-aware; non-finite numbers are written as `"NaN"`.
    pub fn to_json(&self) -> Value {
        let mut object = Map::new();
        let z = self.z_aware;

        match &self.shape {
            Shape::Point(v) => {
                object.insert("x".into(), json_number(v.x));
                object.insert("y".into(), json_number(v.y));
                if z {
                    object.insert("z".into(), json_number(v.z.unwrap_or(f64::NAN)));
                }
            }
            Shape::Multipoint(points) => {
                if z {
                    object.insert("hasZ".into(), Value::Bool(true));
                }
                let points = points.iter().map(|v| vertex_json(v, z)).collect();
                object.insert("points".into(), Value::Array(points));
            }
            Shape::Polyline(parts) => {
                if z {
                    object.insert("hasZ".into(), Value::Bool(true));
                }
                object.insert("paths".into(), parts_json(parts, z));
            }
            Shape::Polygon(parts) => {
                if z {
                    object.insert("hasZ".into(), Value::Bool(true));
                }
                object.insert("rings".into(), parts_json(parts, z));
            }
            Shape::Envelope(e) => {
                object.insert("xmin".into(), json_number(e.xmin));
                object.insert("ymin".into(), json_number(e.ymin));
                object.insert("xmax".into(), json_number(e.xmax));
                object.insert("ymax".into(), json_number(e.ymax));
            }
        }

        if let Some(sr) = &self.spatial_reference {
            object.insert("spatialReference".into(), sr.to_json());
        }
        Value::Object(object)
    }
}

fn shape_has_z(shape: &Shape) -> bool {
    match shape {
        Shape::Point(v) => v.z.is_some(),
        Shape::Multipoint(points) => points.iter().any(|v| v.z.is_some()),
        Shape::Polyline(parts) | Shape::Polygon(parts) => {
            parts.iter().flatten().any(|v| v.z.is_some())
        }
        Shape::Envelope(_) => false,
    }
}

/// Encode a number, using the string `"NaN"` for values JSON cannot carry.
pub fn json_number(value: f64) -> Value {
    if value.is_finite() {
        json!(value)
    } else {
        Value::String("NaN".to_string())
    }
}

/// Decode a number, accepting the `"NaN"` string written by [`json_number`].
pub fn parse_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) if s.eq_ignore_ascii_case("nan") => Some(f64::NAN),
        _ => None,
    }
}

fn number_field(object: &Map<String, Value>, key: &str) -> Result<f64> {
    object
        .get(key)
        .and_then(parse_number)
        .ok_or_else(|| SurfaceError::validation(format!("geometry field '{}' must be a number", key)))
}

fn parse_vertex(value: &Value, key: &str) -> Result<Vertex> {
    let coords = value
        .as_array()
        .filter(|c| c.len() >= 2)
        .ok_or_else(|| {
            SurfaceError::validation(format!("'{}' must hold [x, y] coordinate arrays", key))
        })?;
    let mut numbers = coords.iter().take(3).map(parse_number);
    let bad = || SurfaceError::validation(format!("'{}' holds a non-numeric coordinate", key));
    let x = numbers.next().flatten().ok_or_else(bad)?;
    let y = numbers.next().flatten().ok_or_else(bad)?;
    let z = match numbers.next() {
        Some(z) => Some(z.ok_or_else(bad)?),
        None => None,
    };
    Ok(Vertex { x, y, z })
}

fn parse_vertex_list(value: &Value, key: &str) -> Result<Vec<Vertex>> {
    value
        .as_array()
        .ok_or_else(|| SurfaceError::validation(format!("'{}' must be an array", key)))?
        .iter()
        .map(|v| parse_vertex(v, key))
        .collect()
}

fn parse_parts(value: &Value, key: &str) -> Result<Vec<Vec<Vertex>>> {
    value
        .as_array()
        .ok_or_else(|| SurfaceError::validation(format!("'{}' must be an array", key)))?
        .iter()
        .map(|part| parse_vertex_list(part, key))
        .collect()
}

fn vertex_json(v: &Vertex, z: bool) -> Value {
    let mut coords = vec![json_number(v.x), json_number(v.y)];
    if z {
        coords.push(json_number(v.z.unwrap_or(f64::NAN)));
    }
    Value::Array(coords)
}

fn parts_json(parts: &[Vec<Vertex>], z: bool) -> Value {
    Value::Array(
        parts
            .iter()
            .map(|p| Value::Array(p.iter().map(|v| vertex_json(v, z)).collect()))
            .collect(),
    )
}

/// A 3D vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn length(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Unit vector in the same direction; the zero vector stays zero.
    pub fn normalized(&self) -> Self {
        let len = self.length();
        if len == 0.0 {
            *self
        } else {
            Self::new(self.x / len, self.y / len, self.z / len)
        }
    }

    pub fn to_array(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }
}

/// A half-line from `origin` along `direction`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Vector3,
    pub direction: Vector3,
}

impl Ray {
    /// Ray from `from` through `to`.
    pub fn between(from: Vector3, to: Vector3) -> Self {
        Self {
            origin: from,
            direction: Vector3::new(to.x - from.x, to.y - from.y, to.z - from.z),
        }
    }

    /// Point at parameter `t` (in units of `direction`).
    pub fn at(&self, t: f64) -> Vector3 {
        Vector3::new(
            self.origin.x + self.direction.x * t,
            self.origin.y + self.direction.y * t,
            self.origin.z + self.direction.z * t,
        )
    }
}
