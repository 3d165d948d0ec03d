//! Terrain analysis over an elevation sampler.
//!
//! Derivatives use Horn's 3 × 3 finite differences at one cell spacing.
//! A void neighbour is replaced by the centre elevation. Distances along
//! the ground are in metres whatever the sampler's reference.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Result, SurfaceError};
use crate::geometry::{Geometry, Ray, Shape, Vector3, Vertex};
use crate::provider::{
    AspectUnits, Contour, LineOfSight, SightOptions, SlopeUnits, TerrainProvider,
};

use super::{metres_per_unit, ElevationSampler};

/// Earth radius used for the curvature correction, in metres.
pub const EARTH_RADIUS: f64 = 6_371_000.0;

/// Coefficient of refraction applied when none is given.
pub const DEFAULT_REFRACTION_FACTOR: f64 = 0.13;

/// Half-width, in cells, of the window a contour is traced in.
const CONTOUR_WINDOW: usize = 32;

const MAX_PATH_STEPS: usize = 10_000;

const MAX_RAY_STEPS: usize = 1_000_000;

/// Most stations a single surface-length request may sample.
pub const MAX_PROFILE_STEPS: u64 = 1_000_000;

const BISECTION_STEPS: usize = 40;

/// Smallest gradient treated as sloping ground.
const FLAT: f64 = 1e-12;

/// Elevation derivatives, in metres per ground metre.
#[derive(Debug, Clone, Copy)]
struct Gradient {
    /// Rise toward the east.
    dzdx: f64,
    /// Rise toward the north.
    dzdy: f64,
}

impl Gradient {
    fn rise(&self) -> f64 {
        self.dzdx.hypot(self.dzdy)
    }
}

/// Crossing of the sample lattice by a contour: one lattice edge, either
/// horizontal (`0`) or vertical (`1`), identified by its lower-left node.
type EdgeKey = (u8, usize, usize);

/// A [`TerrainProvider`] over any [`ElevationSampler`].
pub struct DemSurface<S> {
    sampler: Arc<S>,
}

impl<S: ElevationSampler> DemSurface<S> {
    pub fn new(sampler: Arc<S>) -> Self {
        Self { sampler }
    }

    pub fn sampler(&self) -> &S {
        &self.sampler
    }

    fn point_not_valid() -> SurfaceError {
        SurfaceError::domain("Point not valid")
    }

    fn gradient(&self, x: f64, y: f64) -> Result<Option<Gradient>> {
        let Some(center) = self.sampler.sample(x, y)? else {
            return Ok(None);
        };
        let cs = self.sampler.cell_size();
        let z = |dx: f64, dy: f64| -> Result<f64> {
            Ok(self.sampler.sample(x + dx * cs, y + dy * cs)?.unwrap_or(center))
        };

        // a b c
        // d e f
        // g h i
        let (a, b, c) = (z(-1.0, 1.0)?, z(0.0, 1.0)?, z(1.0, 1.0)?);
        let (d, f) = (z(-1.0, 0.0)?, z(1.0, 0.0)?);
        let (g, h, i) = (z(-1.0, -1.0)?, z(0.0, -1.0)?, z(1.0, -1.0)?);

        let (mx, my) = metres_per_unit(&self.sampler.spatial_reference(), y);
        Ok(Some(Gradient {
            dzdx: ((c + 2.0 * f + i) - (a + 2.0 * d + g)) / (8.0 * cs * mx),
            dzdy: ((a + 2.0 * b + c) - (g + 2.0 * h + i)) / (8.0 * cs * my),
        }))
    }

    fn require_gradient(&self, x: f64, y: f64) -> Result<Gradient> {
        self.gradient(x, y)?.ok_or_else(Self::point_not_valid)
    }

    /// Ground distance in metres between two locations.
    fn ground_distance(&self, (x0, y0): (f64, f64), (x1, y1): (f64, f64)) -> f64 {
        let (mx, my) = metres_per_unit(&self.sampler.spatial_reference(), (y0 + y1) / 2.0);
        ((x1 - x0) * mx).hypot((y1 - y0) * my)
    }

    /// Location of station `k` of `pieces` between `from` and `to`.
    fn station(from: (f64, f64), to: (f64, f64), k: usize, pieces: usize) -> (f64, f64) {
        let t = k as f64 / pieces as f64;
        (from.0 + (to.0 - from.0) * t, from.1 + (to.1 - from.1) * t)
    }

    /// Elevations along a segment at `pieces + 1` evenly spaced stations.
    fn profile(
        &self,
        from: (f64, f64),
        to: (f64, f64),
        pieces: usize,
    ) -> Result<Vec<(f64, f64, Option<f64>)>> {
        (0..=pieces)
            .map(|k| {
                let (x, y) = Self::station(from, to, k, pieces);
                Ok((x, y, self.sampler.sample(x, y)?))
            })
            .collect()
    }

    /// Intersections of a ray with the surface, as ray parameters.
    fn ray_hits(&self, ray: &Ray, hint: i32, first_only: bool) -> Result<Vec<f64>> {
        let origin = ray.origin;
        let dir = ray.direction;
        let horizontal = dir.x.hypot(dir.y);

        // Vertical ray: only the surface below the origin can be hit.
        if horizontal == 0.0 {
            let Some(zs) = self.sampler.sample(origin.x, origin.y)? else {
                return Ok(Vec::new());
            };
            if origin.z == zs {
                return Ok(vec![0.0]);
            }
            if dir.z == 0.0 {
                return Ok(Vec::new());
            }
            let t = (zs - origin.z) / dir.z;
            return Ok(if t >= 0.0 { vec![t] } else { Vec::new() });
        }

        let Some(t_exit) = exit_parameter(&self.sampler.extent(), ray) else {
            return Ok(Vec::new());
        };
        let dt = self.sampler.cell_size() / 2.0 / horizontal;
        let steps = ((t_exit / dt).ceil() as usize).min(MAX_RAY_STEPS);

        let gap = |t: f64| -> Result<Option<f64>> {
            let p = ray.at(t);
            Ok(self.sampler.sample(p.x, p.y)?.map(|zs| p.z - zs))
        };

        let mut hits = Vec::new();
        let mut previous: Option<(f64, f64)> = None;
        for k in hint.max(0) as usize..=steps {
            let t = (k as f64 * dt).min(t_exit);
            let Some(f) = gap(t)? else {
                previous = None;
                continue;
            };

            if f == 0.0 {
                hits.push(t);
            } else if let Some((tp, fp)) = previous.filter(|(_, fp)| *fp != 0.0) {
                if (fp > 0.0) != (f > 0.0) {
                    hits.push(bisect(&gap, (tp, fp), (t, f))?);
                }
            }
            if first_only && !hits.is_empty() {
                break;
            }
            previous = Some((t, f));
        }
        Ok(hits)
    }
}

/// Largest ray parameter at which the ray is still inside `extent`, or
/// `None` when it never enters.
fn exit_parameter(extent: &crate::geometry::Envelope, ray: &Ray) -> Option<f64> {
    let mut t_enter = 0.0_f64;
    let mut t_exit = f64::INFINITY;
    for (o, d, min, max) in [
        (ray.origin.x, ray.direction.x, extent.xmin, extent.xmax),
        (ray.origin.y, ray.direction.y, extent.ymin, extent.ymax),
    ] {
        if d == 0.0 {
            if o < min || o > max {
                return None;
            }
        } else {
            let (t1, t2) = ((min - o) / d, (max - o) / d);
            t_enter = t_enter.max(t1.min(t2));
            t_exit = t_exit.min(t1.max(t2));
        }
    }
    (t_exit >= t_enter).then_some(t_exit)
}

/// Refine a sign change of `gap` between two ray parameters.
fn bisect<F>(gap: &F, (mut lo, mut f_lo): (f64, f64), (mut hi, mut f_hi): (f64, f64)) -> Result<f64>
where
    F: Fn(f64) -> Result<Option<f64>>,
{
    for _ in 0..BISECTION_STEPS {
        let mid = (lo + hi) / 2.0;
        let Some(f_mid) = gap(mid)? else {
            break;
        };
        if f_mid == 0.0 {
            return Ok(mid);
        }
        if (f_mid > 0.0) == (f_lo > 0.0) {
            lo = mid;
            f_lo = f_mid;
        } else {
            hi = mid;
            f_hi = f_mid;
        }
    }
    // Linear estimate inside the final bracket.
    Ok(lo + (hi - lo) * f_lo / (f_lo - f_hi))
}

fn polyline(parts: Vec<Vec<Vertex>>) -> Option<Geometry> {
    let parts: Vec<Vec<Vertex>> = parts.into_iter().filter(|p| p.len() >= 2).collect();
    (!parts.is_empty()).then(|| {
        let mut geometry = Geometry::polyline(parts, None);
        geometry.z_aware = true;
        geometry
    })
}

impl<S: ElevationSampler> DemSurface<S> {
    /// Marching squares over a window of the sample lattice centred on the
    /// query point, keeping the line through it.
    fn trace_contour(&self, x: f64, y: f64, level: f64) -> Result<Option<Geometry>> {
        let cs = self.sampler.cell_size();
        let n = 2 * CONTOUR_WINDOW + 1;
        let node = |i: usize, j: usize| {
            (
                x + (i as f64 - CONTOUR_WINDOW as f64) * cs,
                y + (j as f64 - CONTOUR_WINDOW as f64) * cs,
            )
        };

        let mut lattice = vec![None; n * n];
        for j in 0..n {
            for i in 0..n {
                let (nx, ny) = node(i, j);
                lattice[j * n + i] = self.sampler.sample(nx, ny)?;
            }
        }
        let value = |i: usize, j: usize| lattice[j * n + i];

        let mut crossings: HashMap<EdgeKey, (f64, f64)> = HashMap::new();
        let mut segments: Vec<(EdgeKey, EdgeKey)> = Vec::new();

        for j in 0..n - 1 {
            for i in 0..n - 1 {
                // Corners counter-clockwise from the south-west.
                let (Some(v0), Some(v1), Some(v2), Some(v3)) =
                    (value(i, j), value(i + 1, j), value(i + 1, j + 1), value(i, j + 1))
                else {
                    continue;
                };
                let above = [v0 >= level, v1 >= level, v2 >= level, v3 >= level];
                let edges: [(EdgeKey, (usize, usize, f64), (usize, usize, f64)); 4] = [
                    ((0, i, j), (i, j, v0), (i + 1, j, v1)),
                    ((1, i + 1, j), (i + 1, j, v1), (i + 1, j + 1, v2)),
                    ((0, i, j + 1), (i, j + 1, v3), (i + 1, j + 1, v2)),
                    ((1, i, j), (i, j, v0), (i, j + 1, v3)),
                ];
                let crossed = [
                    above[0] != above[1],
                    above[1] != above[2],
                    above[3] != above[2],
                    above[0] != above[3],
                ];

                for (k, (key, a, b)) in edges.iter().enumerate() {
                    if crossed[k] {
                        crossings.entry(*key).or_insert_with(|| {
                            let t = (level - a.2) / (b.2 - a.2);
                            let (ax, ay) = node(a.0, a.1);
                            let (bx, by) = node(b.0, b.1);
                            (ax + (bx - ax) * t, ay + (by - ay) * t)
                        });
                    }
                }

                let keys: Vec<EdgeKey> = (0..4).filter(|k| crossed[*k]).map(|k| edges[k].0).collect();
                match keys.len() {
                    2 => segments.push((keys[0], keys[1])),
                    4 => {
                        // Saddle: split off the corners that disagree with the centre.
                        let center_above = (v0 + v1 + v2 + v3) / 4.0 >= level;
                        if above[0] != center_above {
                            segments.push((edges[0].0, edges[3].0));
                            segments.push((edges[1].0, edges[2].0));
                        } else {
                            segments.push((edges[0].0, edges[1].0));
                            segments.push((edges[2].0, edges[3].0));
                        }
                    }
                    _ => {}
                }
            }
        }

        let distance = |key: &EdgeKey| {
            let (px, py) = crossings[key];
            (px - x).hypot(py - y)
        };
        let Some(start) = (0..segments.len()).min_by(|a, b| {
            let da = distance(&segments[*a].0).min(distance(&segments[*a].1));
            let db = distance(&segments[*b].0).min(distance(&segments[*b].1));
            da.total_cmp(&db)
        }) else {
            return Ok(None);
        };

        let mut by_edge: HashMap<EdgeKey, Vec<usize>> = HashMap::new();
        for (s, (a, b)) in segments.iter().enumerate() {
            by_edge.entry(*a).or_default().push(s);
            by_edge.entry(*b).or_default().push(s);
        }

        let mut used = vec![false; segments.len()];
        used[start] = true;
        let mut forward = vec![segments[start].0, segments[start].1];
        let mut backward = Vec::new();
        for chain in [&mut forward, &mut backward] {
            loop {
                let end = match chain.last() {
                    Some(end) => *end,
                    None => segments[start].0,
                };
                let next = by_edge
                    .get(&end)
                    .and_then(|candidates| candidates.iter().copied().find(|s| !used[*s]));
                let Some(s) = next else { break };
                used[s] = true;
                let (a, b) = segments[s];
                chain.push(if a == end { b } else { a });
            }
        }

        let keys = backward.iter().rev().chain(forward.iter());
        let mut vertices: Vec<Vertex> = Vec::new();
        for key in keys {
            let (px, py) = crossings[key];
            if vertices.last().map_or(true, |v| v.x != px || v.y != py) {
                vertices.push(Vertex::with_z(px, py, level));
            }
        }
        Ok(polyline(vec![vertices]))
    }
}

impl<S: ElevationSampler> TerrainProvider for DemSurface<S> {
    fn elevation(&self, x: f64, y: f64) -> Result<f64> {
        Ok(self.sampler.sample(x, y)?.unwrap_or(f64::NAN))
    }

    fn interpolate_shape(&self, geometry: &Geometry) -> Result<Option<Geometry>> {
        let mut result = geometry.clone();
        let mut outside = false;
        result.try_for_each_vertex_mut(|v| {
            match self.sampler.sample(v.x, v.y)? {
                Some(z) => v.z = Some(z),
                None => outside = true,
            }
            Ok(())
        })?;
        if outside {
            return Ok(None);
        }
        result.z_aware = true;
        Ok(Some(result))
    }

    fn contour(&self, x: f64, y: f64) -> Result<Contour> {
        let level = self.sampler.sample(x, y)?.ok_or_else(Self::point_not_valid)?;
        Ok(Contour {
            geometry: self.trace_contour(x, y, level)?,
            elevation: level,
        })
    }

    fn steepest_path(&self, x: f64, y: f64) -> Result<Option<Geometry>> {
        let Some(mut z) = self.sampler.sample(x, y)? else {
            return Err(Self::point_not_valid());
        };
        let sr = self.sampler.spatial_reference();
        let cs = self.sampler.cell_size();
        let (mut px, mut py) = (x, y);
        let mut path = vec![Vertex::with_z(px, py, z)];

        for _ in 0..MAX_PATH_STEPS {
            let Some(gradient) = self.gradient(px, py)? else { break };
            let rise = gradient.rise();
            if rise < FLAT {
                break;
            }
            // One cell along the ground, downhill.
            let (mx, my) = metres_per_unit(&sr, py);
            let step = cs * my;
            let nx = px - gradient.dzdx / rise * step / mx;
            let ny = py - gradient.dzdy / rise * step / my;

            let Some(nz) = self.sampler.sample(nx, ny)? else { break };
            if nz >= z {
                break;
            }
            (px, py, z) = (nx, ny, nz);
            path.push(Vertex::with_z(px, py, z));
        }

        tracing::debug!(vertices = path.len(), "Traced steepest path");
        Ok(polyline(vec![path]))
    }

    fn slope(&self, x: f64, y: f64, units: SlopeUnits) -> Result<f64> {
        let rise = self.require_gradient(x, y)?.rise();
        Ok(match units {
            SlopeUnits::Percent => rise * 100.0,
            SlopeUnits::Degrees => rise.atan().to_degrees(),
            SlopeUnits::Radians => rise.atan(),
        })
    }

    /// Compass direction the slope faces, clockwise from north; -1 on flat
    /// ground.
    fn aspect(&self, x: f64, y: f64, units: AspectUnits) -> Result<f64> {
        let gradient = self.require_gradient(x, y)?;
        if gradient.rise() < FLAT {
            return Ok(-1.0);
        }
        // Downhill points along the negative gradient.
        let radians = (-gradient.dzdx).atan2(-gradient.dzdy).rem_euclid(std::f64::consts::TAU);
        Ok(match units {
            AspectUnits::Degrees => radians.to_degrees(),
            AspectUnits::Radians => radians,
        })
    }

    fn surface_length(&self, line: &Geometry, step_size: Option<f64>) -> Result<f64> {
        let step = step_size.unwrap_or_else(|| self.sampler.cell_size());
        if !(step.is_finite() && step > 0.0) {
            return Err(SurfaceError::validation("stepSize must be positive"));
        }
        let outside = || SurfaceError::domain("Portion of the input feature falls outside the surface");

        let segments: Vec<((f64, f64), (f64, f64), f64)> = line
            .parts()
            .unwrap_or_default()
            .iter()
            .flat_map(|part| part.windows(2))
            .map(|pair| {
                let (a, b) = ((pair[0].x, pair[0].y), (pair[1].x, pair[1].y));
                (a, b, ((b.0 - a.0).hypot(b.1 - a.1) / step).ceil().max(1.0))
            })
            .collect();

        let requested: f64 = segments.iter().map(|s| s.2).sum();
        if requested.is_nan() || requested > MAX_PROFILE_STEPS as f64 {
            return Err(SurfaceError::RequestTooLarge {
                requested: requested.min(u64::MAX as f64) as u64,
                limit: MAX_PROFILE_STEPS,
            });
        }

        let mut length = 0.0;
        for (a, b, pieces) in segments {
            let pieces = pieces as usize;
            let mut prev = (a.0, a.1, self.sampler.sample(a.0, a.1)?.ok_or_else(outside)?);
            for k in 1..=pieces {
                let (x, y) = Self::station(a, b, k, pieces);
                let z = self.sampler.sample(x, y)?.ok_or_else(outside)?;
                let ground = self.ground_distance((prev.0, prev.1), (x, y));
                length += ground.hypot(z - prev.2);
                prev = (x, y, z);
            }
        }
        Ok(length)
    }

    fn normal(&self, x: f64, y: f64) -> Result<Vector3> {
        let gradient = self.require_gradient(x, y)?;
        Ok(Vector3::new(-gradient.dzdx, -gradient.dzdy, 1.0).normalized())
    }

    fn locate(&self, ray: &Ray, hint: i32) -> Result<Option<Vector3>> {
        Ok(self
            .ray_hits(ray, hint, true)?
            .first()
            .map(|t| ray.at(*t)))
    }

    fn locate_all(&self, ray: &Ray, hint: i32) -> Result<Vec<f64>> {
        let (mx, my) = metres_per_unit(&self.sampler.spatial_reference(), ray.origin.y);
        let d = ray.direction;
        let metres_per_t = (d.x * mx).hypot(d.y * my).hypot(d.z);
        Ok(self
            .ray_hits(ray, hint, false)?
            .into_iter()
            .map(|t| t * metres_per_t)
            .collect())
    }

    fn line_of_sight(
        &self,
        observer: Vector3,
        target: Vector3,
        options: &SightOptions,
    ) -> Result<LineOfSight> {
        let from = (observer.x, observer.y);
        let to = (target.x, target.y);
        let total = self.ground_distance(from, to);
        if total == 0.0 {
            return Ok(LineOfSight {
                obstruction: None,
                visible: None,
                invisible: None,
                is_visible: true,
            });
        }

        let refraction = options.refraction_factor.unwrap_or(DEFAULT_REFRACTION_FACTOR);
        let drop = |d: f64| {
            if !options.apply_curvature {
                return 0.0;
            }
            let curvature = d * d / (2.0 * EARTH_RADIUS);
            if options.apply_refraction {
                curvature * (1.0 - refraction)
            } else {
                curvature
            }
        };

        let map_length = (to.0 - from.0).hypot(to.1 - from.1);
        let pieces = (map_length / (self.sampler.cell_size() / 2.0))
            .ceil()
            .clamp(1.0, MAX_PROFILE_STEPS as f64) as usize;
        let profile = self.profile(from, to, pieces)?;

        let target_angle = (target.z - drop(total) - observer.z) / total;
        let mut horizon = f64::NEG_INFINITY;
        let mut obstruction = None;
        // Visibility of each station, `None` where the surface is void.
        let mut visibility: Vec<Option<bool>> = Vec::with_capacity(profile.len());

        for (k, (x, y, z)) in profile.iter().enumerate() {
            let Some(z) = z else {
                visibility.push(None);
                continue;
            };
            if k == 0 {
                visibility.push(Some(true));
                continue;
            }
            let d = total * k as f64 / pieces as f64;
            let angle = (z - drop(d) - observer.z) / d;
            visibility.push(Some(angle >= horizon));
            horizon = horizon.max(angle);

            if obstruction.is_none() && k < pieces && angle > target_angle {
                obstruction = Some(Geometry::new(Shape::Point(Vertex::with_z(*x, *y, *z)), None));
            }
        }

        let mut visible = Vec::new();
        let mut invisible = Vec::new();
        let mut run: Vec<Vertex> = Vec::new();
        let mut run_visible = true;
        for k in 1..profile.len() {
            let (Some(_), Some(seen)) = (visibility[k - 1], visibility[k]) else {
                flush(&mut run, run_visible, &mut visible, &mut invisible);
                continue;
            };
            let vertex = |i: usize| {
                let (x, y, z) = profile[i];
                Vertex::with_z(x, y, z.unwrap_or(f64::NAN))
            };
            if run.is_empty() || seen != run_visible {
                flush(&mut run, run_visible, &mut visible, &mut invisible);
                run_visible = seen;
                run.push(vertex(k - 1));
            }
            run.push(vertex(k));
        }
        flush(&mut run, run_visible, &mut visible, &mut invisible);

        let is_visible = obstruction.is_none();
        tracing::debug!(stations = profile.len(), is_visible, "Computed line of sight");
        Ok(LineOfSight {
            obstruction,
            visible: polyline(visible),
            invisible: polyline(invisible),
            is_visible,
        })
    }

    fn can_do_curvature(&self) -> Result<bool> {
        Ok(!self.sampler.spatial_reference().is_geographic())
    }
}

fn flush(
    run: &mut Vec<Vertex>,
    run_visible: bool,
    visible: &mut Vec<Vec<Vertex>>,
    invisible: &mut Vec<Vec<Vertex>>,
) {
    if run.len() >= 2 {
        let part = std::mem::take(run);
        if run_visible {
            visible.push(part);
        } else {
            invisible.push(part);
        }
    } else {
        run.clear();
    }
}
