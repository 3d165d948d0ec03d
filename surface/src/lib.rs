//! # Surface - Terrain analysis over elevation rasters
//!
//! Library behind the surface analysis service: it discovers single-band
//! elevation layers in a published map and answers terrain queries against
//! them through a small, capability-gated resource tree.
//!
//! ## Features
//!
//! - **Elevation queries**: at a lon/lat, along arbitrary geometries, or as a
//!   resampled grid over an extent
//! - **Terrain analysis**: slope, aspect, normal, contour, steepest path,
//!   line of sight, surface length, ray locate
//! - **Capabilities**: every operation can be switched off per instance
//! - **SRTM backend**: memory-mapped `.hgt` tiles with an LRU cache
//!   (`hgt` feature, on by default)
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use surface::{CapabilitySet, DemCatalog, InputMap, LayerRegistry, PlanarEngine,
//!     ResourceRouter, SurfaceConfig};
//!
//! let catalog = DemCatalog::open_dir("/data/srtm", 100)?;
//! let router = ResourceRouter::new(
//!     LayerRegistry::discover(&catalog),
//!     Arc::new(PlanarEngine::new()),
//!     SurfaceConfig::default(),
//! );
//!
//! let inputs = InputMap::from_pairs([("lon", "138.7274"), ("lat", "35.3606")]);
//! let response = router.dispatch(
//!     &CapabilitySet::default(),
//!     "SurfaceLayers/0/GetElevationAtLonLat",
//!     None,
//!     None,
//!     &inputs,
//! );
//! println!("{}", String::from_utf8_lossy(&response.body));
//! ```

pub mod config;
pub mod dem;
pub mod error;
pub mod geometry;
pub mod grid;
pub mod operations;
pub mod params;
pub mod pipeline;
pub mod planar;
pub mod provider;
pub mod registry;
pub mod router;

// Re-export main types at crate root for convenience
pub use config::{Capability, CapabilitySet, SurfaceConfig};
pub use dem::{DemCatalog, DemRaster, DemSurface, ElevationSampler, MemoryGrid};
#[cfg(feature = "hgt")]
pub use dem::{HgtMosaic, HgtTile};
pub use error::{Result, SurfaceError};
pub use geometry::{Envelope, Geometry, SpatialReference, Vertex};
pub use grid::{GridExtractor, GridResult};
pub use params::InputMap;
pub use pipeline::GeometryPipeline;
pub use planar::PlanarEngine;
pub use provider::{GeometryEngine, MapLayerSource, RasterSource, TerrainProvider};
pub use registry::{LayerRegistry, SurfaceLayer, SurfaceModel};
pub use router::{ResourceRouter, Response};
