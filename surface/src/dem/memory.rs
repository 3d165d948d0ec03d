//! In-memory elevation grids.

use crate::error::{Result, SurfaceError};
use crate::geometry::{Envelope, SpatialReference};
use crate::provider::{BandStatistics, PixelType};

use super::{bilinear, min_max, ElevationSampler};

/// A north-up grid of cell-centred samples held in memory.
///
/// Values are row-major starting at the north-west cell. NaN marks a void,
/// as does any value equal to the declared no-data value.
#[derive(Debug, Clone)]
pub struct MemoryGrid {
    cols: usize,
    rows: usize,
    west: f64,
    north: f64,
    cell_size: f64,
    spatial_reference: SpatialReference,
    values: Vec<f64>,
    no_data: Option<f64>,
    pixel_type: PixelType,
    statistics: Option<BandStatistics>,
}

impl MemoryGrid {
    /// Create a grid.
    ///
    /// # Arguments
    ///
    /// * `cols`, `rows` - Grid dimensions in cells
    /// * `west`, `north` - Coordinates of the grid's north-west corner
    /// * `cell_size` - Cell width and height in map units
    /// * `spatial_reference` - Reference of the grid coordinates
    /// * `values` - `cols * rows` elevations, row-major from the north-west
    ///
    /// # Errors
    ///
    /// Returns [`SurfaceError::Config`] if the dimensions or cell size are
    /// unusable or `values` has the wrong length.
    pub fn new(
        cols: usize,
        rows: usize,
        west: f64,
        north: f64,
        cell_size: f64,
        spatial_reference: SpatialReference,
        values: Vec<f64>,
    ) -> Result<Self> {
        if cols == 0 || rows == 0 {
            return Err(SurfaceError::config("grid must have at least one cell"));
        }
        if !(cell_size.is_finite() && cell_size > 0.0) {
            return Err(SurfaceError::config(format!(
                "cell size must be positive, got {}",
                cell_size
            )));
        }
        if values.len() != cols * rows {
            return Err(SurfaceError::config(format!(
                "expected {} values for a {}x{} grid, got {}",
                cols * rows,
                cols,
                rows,
                values.len()
            )));
        }

        let mut grid = Self {
            cols,
            rows,
            west,
            north,
            cell_size,
            spatial_reference,
            values,
            no_data: None,
            pixel_type: PixelType::Float,
            statistics: None,
        };
        grid.statistics = grid.compute_statistics();
        Ok(grid)
    }

    /// Declare a no-data value; cells holding it become voids.
    pub fn with_no_data(mut self, no_data: f64) -> Self {
        self.no_data = Some(no_data);
        self.statistics = self.compute_statistics();
        self
    }

    /// Report a different pixel type. Values are not converted.
    pub fn with_pixel_type(mut self, pixel_type: PixelType) -> Self {
        self.pixel_type = pixel_type;
        self
    }

    fn is_void(&self, value: f64) -> bool {
        value.is_nan() || self.no_data == Some(value)
    }

    fn compute_statistics(&self) -> Option<BandStatistics> {
        min_max(self.values.iter().copied().filter(|v| !self.is_void(*v)))
    }

    /// Value of cell (`col`, `row`), row 0 at the north edge.
    pub fn get(&self, col: usize, row: usize) -> Option<f64> {
        if col >= self.cols || row >= self.rows {
            return None;
        }
        let v = self.values[row * self.cols + col];
        (!self.is_void(v)).then_some(v)
    }

    /// Fractional cell indices of a location, or `None` outside the grid.
    fn position(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        if !self.extent().contains(x, y) {
            return None;
        }
        Some((
            (x - self.west) / self.cell_size - 0.5,
            (self.north - y) / self.cell_size - 0.5,
        ))
    }
}

impl ElevationSampler for MemoryGrid {
    fn spatial_reference(&self) -> SpatialReference {
        self.spatial_reference
    }

    fn extent(&self) -> Envelope {
        Envelope::new(
            self.west,
            self.north - self.rows as f64 * self.cell_size,
            self.west + self.cols as f64 * self.cell_size,
            self.north,
        )
    }

    fn cell_size(&self) -> f64 {
        self.cell_size
    }

    fn dimensions(&self) -> (usize, usize) {
        (self.cols, self.rows)
    }

    fn sample(&self, x: f64, y: f64) -> Result<Option<f64>> {
        let Some((col, row)) = self.position(x, y) else {
            return Ok(None);
        };
        bilinear(col, row, self.cols, self.rows, |c, r| Ok(self.get(c, r)))
    }

    fn nearest(&self, x: f64, y: f64) -> Result<Option<f64>> {
        let Some((col, row)) = self.position(x, y) else {
            return Ok(None);
        };
        let col = col.round().clamp(0.0, (self.cols - 1) as f64) as usize;
        let row = row.round().clamp(0.0, (self.rows - 1) as f64) as usize;
        Ok(self.get(col, row))
    }

    fn statistics(&self) -> Option<BandStatistics> {
        self.statistics
    }

    fn pixel_type(&self) -> PixelType {
        self.pixel_type
    }

    fn no_data(&self) -> Option<f64> {
        self.no_data
    }
}
