//! Reference [`GeometryEngine`] for WGS84 and Web Mercator.
//!
//! Distances and lengths are planar in the geometry's own units, so a
//! geographic geometry measures in degrees.

use std::f64::consts::PI;

use crate::error::{Result, SurfaceError};
use crate::geometry::{Geometry, Shape, SpatialReference, Vertex};
use crate::provider::GeometryEngine;

/// Sphere radius used by Web Mercator.
const EARTH_RADIUS: f64 = 6378137.0;

/// Latitude where Web Mercator becomes square.
const MAX_MERCATOR_LAT: f64 = 85.051_128_779_806_59;

/// Convert longitude/latitude in degrees to Web Mercator metres.
pub fn to_web_mercator(lon: f64, lat: f64) -> (f64, f64) {
    let lat = lat.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT);
    let x = lon.to_radians() * EARTH_RADIUS;
    let y = ((PI / 4.0) + (lat.to_radians() / 2.0)).tan().ln() * EARTH_RADIUS;
    (x, y)
}

/// Convert Web Mercator metres to longitude/latitude in degrees.
pub fn to_geographic(x: f64, y: f64) -> (f64, f64) {
    let lon = (x / EARTH_RADIUS).to_degrees();
    let lat = (2.0 * (y / EARTH_RADIUS).exp().atan() - PI / 2.0).to_degrees();
    (lon, lat)
}

/// Transform a single coordinate between two spatial references.
///
/// # Errors
///
/// Returns [`SurfaceError::UnsupportedSpatialReference`] for any reference
/// other than WGS84 or Web Mercator.
pub fn transform_xy(
    from: &SpatialReference,
    to: &SpatialReference,
    x: f64,
    y: f64,
) -> Result<(f64, f64)> {
    for sr in [from, to] {
        if !sr.is_geographic() && !sr.is_web_mercator() {
            return Err(SurfaceError::UnsupportedSpatialReference { wkid: sr.wkid });
        }
    }
    if from.same_as(to) {
        Ok((x, y))
    } else if from.is_geographic() {
        Ok(to_web_mercator(x, y))
    } else {
        Ok(to_geographic(x, y))
    }
}

/// Planar geometry engine with a spherical Web Mercator transform.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanarEngine;

impl PlanarEngine {
    pub fn new() -> Self {
        Self
    }
}

impl GeometryEngine for PlanarEngine {
    fn project(&self, geometry: &Geometry, target: &SpatialReference) -> Result<Geometry> {
        let mut projected = geometry.clone();
        projected.spatial_reference = Some(*target);

        let Some(source) = geometry.spatial_reference else {
            return Ok(projected);
        };
        if source.same_as(target) {
            return Ok(projected);
        }

        projected.try_for_each_vertex_mut(|v| {
            let (x, y) = transform_xy(&source, target, v.x, v.y)?;
            v.x = x;
            v.y = y;
            Ok(())
        })?;
        Ok(projected)
    }

    fn densify(&self, geometry: &Geometry, max_segment_length: f64) -> Result<Geometry> {
        if !max_segment_length.is_finite() || max_segment_length <= 0.0 {
            return Ok(geometry.clone());
        }
        let densify_parts = |parts: &[Vec<Vertex>]| -> Vec<Vec<Vertex>> {
            parts
                .iter()
                .map(|part| densify_part(part, max_segment_length))
                .collect()
        };
        let shape = match &geometry.shape {
            Shape::Polyline(parts) => Shape::Polyline(densify_parts(parts)),
            Shape::Polygon(parts) => Shape::Polygon(densify_parts(parts)),
            other => other.clone(),
        };
        Ok(Geometry {
            shape,
            ..geometry.clone()
        })
    }

    fn simplify(&self, geometry: &Geometry) -> Result<Geometry> {
        let shape = match &geometry.shape {
            Shape::Polyline(parts) => Shape::Polyline(
                parts
                    .iter()
                    .map(|p| dedup_vertices(p))
                    .filter(|p| p.len() >= 2)
                    .collect(),
            ),
            Shape::Polygon(rings) => Shape::Polygon(
                rings
                    .iter()
                    .map(|r| close_ring(dedup_vertices(r)))
                    .filter(|r| r.len() >= 4)
                    .collect(),
            ),
            Shape::Multipoint(points) => {
                let mut unique: Vec<Vertex> = Vec::with_capacity(points.len());
                for p in points {
                    if !unique.iter().any(|u| u.x == p.x && u.y == p.y) {
                        unique.push(*p);
                    }
                }
                Shape::Multipoint(unique)
            }
            other => other.clone(),
        };
        Ok(Geometry {
            shape,
            ..geometry.clone()
        })
    }

    fn length(&self, geometry: &Geometry) -> f64 {
        geometry
            .parts()
            .map(|parts| parts.iter().map(|p| part_length(p)).sum())
            .unwrap_or(0.0)
    }

    fn distance(&self, a: &Vertex, b: &Vertex) -> f64 {
        a.distance_to(b)
    }
}

fn part_length(part: &[Vertex]) -> f64 {
    part.windows(2).map(|w| w[0].distance_to(&w[1])).sum()
}

fn densify_part(part: &[Vertex], max_segment_length: f64) -> Vec<Vertex> {
    let mut out = Vec::with_capacity(part.len());
    for window in part.windows(2) {
        let (a, b) = (window[0], window[1]);
        out.push(a);
        let len = a.distance_to(&b);
        let pieces = (len / max_segment_length).ceil() as usize;
        for i in 1..pieces {
            let t = i as f64 / pieces as f64;
            let z = match (a.z, b.z) {
                (Some(za), Some(zb)) => Some(za + (zb - za) * t),
                _ => None,
            };
            out.push(Vertex {
                x: a.x + (b.x - a.x) * t,
                y: a.y + (b.y - a.y) * t,
                z,
            });
        }
    }
    if let Some(last) = part.last() {
        out.push(*last);
    }
    out
}

fn dedup_vertices(part: &[Vertex]) -> Vec<Vertex> {
    let mut out: Vec<Vertex> = Vec::with_capacity(part.len());
    for v in part {
        if out.last().map_or(true, |last| last.distance_to(v) > 0.0) {
            out.push(*v);
        }
    }
    out
}

fn close_ring(mut ring: Vec<Vertex>) -> Vec<Vertex> {
    if let (Some(first), Some(last)) = (ring.first().copied(), ring.last()) {
        if first.distance_to(last) > 0.0 {
            ring.push(first);
        }
    }
    ring
}
