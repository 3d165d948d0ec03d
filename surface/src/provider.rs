//! Collaborator interfaces consumed by the query core.
//!
//! The core never computes terrain itself. Map layers, rasters, terrain
//! surfaces and geometry operations are reached through the traits in this
//! module, and every implementation must tolerate concurrent read-only calls.

use std::sync::Arc;

use crate::error::Result;
use crate::geometry::{Envelope, Geometry, Ray, SpatialReference, Vector3, Vertex};

/// Reprojection and planar geometry operations.
pub trait GeometryEngine: Send + Sync {
    /// Reproject a geometry into `target`.
    ///
    /// A geometry without a spatial reference is returned unchanged apart
    /// from being tagged with `target`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::SurfaceError::UnsupportedSpatialReference`] when no
    /// transformation between the two references is known.
    fn project(&self, geometry: &Geometry, target: &SpatialReference) -> Result<Geometry>;

    /// Insert vertices so that no segment is longer than `max_segment_length`.
    fn densify(&self, geometry: &Geometry, max_segment_length: f64) -> Result<Geometry>;

    /// Repair topology: drop repeated vertices and degenerate parts.
    fn simplify(&self, geometry: &Geometry) -> Result<Geometry>;

    /// Planar length of a polyline, or perimeter of a polygon.
    fn length(&self, geometry: &Geometry) -> f64;

    /// Planar distance between two vertices.
    fn distance(&self, a: &Vertex, b: &Vertex) -> f64;
}

/// Units for slope queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlopeUnits {
    #[default]
    Percent,
    Degrees,
    Radians,
}

impl SlopeUnits {
    /// Match a unit name, ignoring case.
    pub fn from_name(name: &str) -> Option<Self> {
        [Self::Percent, Self::Degrees, Self::Radians]
            .into_iter()
            .find(|u| u.as_str().eq_ignore_ascii_case(name.trim()))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Percent => "Percent",
            Self::Degrees => "Degrees",
            Self::Radians => "Radians",
        }
    }
}

/// Units for aspect queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AspectUnits {
    #[default]
    Degrees,
    Radians,
}

impl AspectUnits {
    /// Match a unit name, ignoring case.
    pub fn from_name(name: &str) -> Option<Self> {
        [Self::Degrees, Self::Radians]
            .into_iter()
            .find(|u| u.as_str().eq_ignore_ascii_case(name.trim()))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Degrees => "Degrees",
            Self::Radians => "Radians",
        }
    }
}

/// Line-of-sight switches.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SightOptions {
    pub apply_curvature: bool,
    pub apply_refraction: bool,
    /// Provider default when `None`.
    pub refraction_factor: Option<f64>,
}

/// Result of a line-of-sight query.
#[derive(Debug, Clone, PartialEq)]
pub struct LineOfSight {
    /// First point where the terrain blocks the sight line.
    pub obstruction: Option<Geometry>,
    /// Portions of the profile visible from the observer.
    pub visible: Option<Geometry>,
    /// Portions of the profile hidden from the observer.
    pub invisible: Option<Geometry>,
    /// Whether the target itself can be seen.
    pub is_visible: bool,
}

/// Result of a contour query.
#[derive(Debug, Clone, PartialEq)]
pub struct Contour {
    pub geometry: Option<Geometry>,
    pub elevation: f64,
}

/// Analytic queries against a continuous elevation surface.
///
/// Coordinates are in the surface's own spatial reference. Geometries
/// returned by the provider may omit their spatial reference; callers
/// re-assert it.
pub trait TerrainProvider: Send + Sync {
    /// Elevation at a location. Locations without data yield a value for
    /// which [`TerrainProvider::is_void`] is true.
    fn elevation(&self, x: f64, y: f64) -> Result<f64>;

    /// Whether `z` is the provider's no-data marker.
    fn is_void(&self, z: f64) -> bool {
        z.is_nan()
    }

    /// Elevation at a location, or `None` when it is void.
    fn valid_elevation(&self, x: f64, y: f64) -> Result<Option<f64>> {
        let z = self.elevation(x, y)?;
        Ok(if self.is_void(z) { None } else { Some(z) })
    }

    /// Assign an elevation to every vertex of a geometry.
    ///
    /// Returns `None` when any vertex falls outside the surface.
    fn interpolate_shape(&self, geometry: &Geometry) -> Result<Option<Geometry>>;

    /// Contour line passing through a location.
    fn contour(&self, x: f64, y: f64) -> Result<Contour>;

    /// Path of steepest descent starting at a location; `None` on flat ground.
    fn steepest_path(&self, x: f64, y: f64) -> Result<Option<Geometry>>;

    fn slope(&self, x: f64, y: f64, units: SlopeUnits) -> Result<f64>;

    fn aspect(&self, x: f64, y: f64, units: AspectUnits) -> Result<f64>;

    /// 3D length of a polyline draped over the surface. The provider picks
    /// its own step (the surface cell size) when `step_size` is `None`.
    fn surface_length(&self, line: &Geometry, step_size: Option<f64>) -> Result<f64>;

    /// Unit normal of the surface at a location.
    fn normal(&self, x: f64, y: f64) -> Result<Vector3>;

    /// First intersection of a ray with the surface.
    fn locate(&self, ray: &Ray, hint: i32) -> Result<Option<Vector3>>;

    /// Distances along the ray of every intersection with the surface.
    fn locate_all(&self, ray: &Ray, hint: i32) -> Result<Vec<f64>>;

    fn line_of_sight(
        &self,
        observer: Vector3,
        target: Vector3,
        options: &SightOptions,
    ) -> Result<LineOfSight>;

    /// Whether earth curvature and refraction corrections are supported.
    fn can_do_curvature(&self) -> Result<bool>;
}

/// Raster pixel types, named as the map service reports them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelType {
    U1,
    U2,
    U4,
    Char,
    UChar,
    Short,
    UShort,
    Long,
    ULong,
    LongLong,
    ULongLong,
    Float,
    Double,
    Complex,
    DComplex,
    CShort,
    CLong,
    Unknown,
}

impl PixelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PixelType::U1 => "PT_U1",
            PixelType::U2 => "PT_U2",
            PixelType::U4 => "PT_U4",
            PixelType::Char => "PT_CHAR",
            PixelType::UChar => "PT_UCHAR",
            PixelType::Short => "PT_SHORT",
            PixelType::UShort => "PT_USHORT",
            PixelType::Long => "PT_LONG",
            PixelType::ULong => "PT_ULONG",
            PixelType::LongLong => "PT_LONGLONG",
            PixelType::ULongLong => "PT_ULONGLONG",
            PixelType::Float => "PT_FLOAT",
            PixelType::Double => "PT_DOUBLE",
            PixelType::Complex => "PT_COMPLEX",
            PixelType::DComplex => "PT_DCOMPLEX",
            PixelType::CShort => "PT_CSHORT",
            PixelType::CLong => "PT_CLONG",
            PixelType::Unknown => "PT_UNKNOWN",
        }
    }

    pub fn is_integer(&self) -> bool {
        !matches!(
            self,
            PixelType::Float
                | PixelType::Double
                | PixelType::Complex
                | PixelType::DComplex
                | PixelType::Unknown
        )
    }
}

/// Native properties of a raster.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterProperties {
    pub width: usize,
    pub height: usize,
    pub extent: Envelope,
    pub spatial_reference: SpatialReference,
    pub pixel_type: PixelType,
    /// Explicit no-data value, if the raster declares one.
    pub no_data: Option<f64>,
}

impl RasterProperties {
    pub fn is_integer(&self) -> bool {
        self.pixel_type.is_integer()
    }
}

/// Dataset-wide band statistics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandStatistics {
    pub minimum: f64,
    pub maximum: f64,
}

/// Resampling used when a block does not align with native cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Resampling {
    Nearest,
    #[default]
    Bilinear,
}

/// A request for a block of pixels resampled onto an arbitrary grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockRequest {
    pub band: usize,
    pub extent: Envelope,
    pub spatial_reference: SpatialReference,
    pub cols: usize,
    pub rows: usize,
    pub resampling: Resampling,
}

impl BlockRequest {
    /// Centre of cell (`col`, `row`), with row 0 at the top of the extent.
    pub fn cell_center(&self, col: usize, row: usize) -> (f64, f64) {
        let cell_w = self.extent.width() / self.cols as f64;
        let cell_h = self.extent.height() / self.rows as f64;
        (
            self.extent.xmin + (col as f64 + 0.5) * cell_w,
            self.extent.ymax - (row as f64 + 0.5) * cell_h,
        )
    }
}

/// Pixels in column-major order with a validity mask (`true` = valid).
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBlock {
    pub cols: usize,
    pub rows: usize,
    pub values: Vec<f64>,
    pub mask: Vec<bool>,
}

impl PixelBlock {
    pub fn new(cols: usize, rows: usize) -> Self {
        Self {
            cols,
            rows,
            values: vec![0.0; cols * rows],
            mask: vec![false; cols * rows],
        }
    }

    fn index(&self, col: usize, row: usize) -> usize {
        col * self.rows + row
    }

    pub fn set(&mut self, col: usize, row: usize, value: Option<f64>) {
        let i = self.index(col, row);
        match value {
            Some(v) => {
                self.values[i] = v;
                self.mask[i] = true;
            }
            None => self.mask[i] = false,
        }
    }

    /// Sample at (`col`, `row`), or `None` when masked.
    pub fn get(&self, col: usize, row: usize) -> Option<f64> {
        let i = self.index(col, row);
        self.mask[i].then(|| self.values[i])
    }
}

/// Raster access for one data source.
pub trait RasterSource: Send + Sync {
    fn properties(&self) -> RasterProperties;

    /// Statistics for `band`, when the raster has computed them.
    fn statistics(&self, band: usize) -> Option<BandStatistics>;

    /// Read a resampled block. The request is passed by value so concurrent
    /// readers never share raster state.
    fn read_block(&self, request: &BlockRequest) -> Result<PixelBlock>;

    /// Terrain surface built over `band`.
    fn surface(&self, band: usize) -> Result<Arc<dyn TerrainProvider>>;
}

/// Band enumeration for a data source.
pub trait BandCollection: Send + Sync {
    fn band_count(&self) -> usize;
}

/// The data behind a map layer, queried for raster and band capabilities.
pub trait DataSource: Send + Sync {
    fn raster(&self) -> Option<Arc<dyn RasterSource>>;

    fn bands(&self) -> Option<&dyn BandCollection>;
}

/// Descriptor of a layer in a published map.
#[derive(Debug, Clone, PartialEq)]
pub struct MapLayerInfo {
    pub id: i64,
    pub name: String,
    pub layer_type: String,
    pub extent: Option<Envelope>,
    pub spatial_reference: Option<SpatialReference>,
    pub description: String,
}

/// The published map whose layers are candidate surfaces.
pub trait MapLayerSource: Send + Sync {
    fn layers(&self) -> Vec<MapLayerInfo>;

    /// Data source behind layer `id`; `None` when the layer has none.
    fn data_source(&self, id: i64) -> Result<Option<Arc<dyn DataSource>>>;
}
