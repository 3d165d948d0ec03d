//! Elevation grid extraction over an arbitrary extent.

use serde_json::{json, Value};

use crate::error::{Result, SurfaceError};
use crate::geometry::{json_number, Envelope, SpatialReference};
use crate::provider::{BlockRequest, PixelBlock, PixelType, Resampling};
use crate::registry::SurfaceModel;

/// A grid request as received from the caller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridRequest {
    pub extent: Envelope,
    pub spatial_reference: SpatialReference,
    pub rows: i64,
    pub cols: i64,
}

/// A resampled elevation grid, stored row-major from the top row.
#[derive(Debug, Clone, PartialEq)]
pub struct GridResult {
    pub cols: usize,
    pub rows: usize,
    pub ll_center_x: f64,
    pub ll_center_y: f64,
    pub cell_size: f64,
    pub no_data_value: Option<f64>,
    pub spatial_reference: SpatialReference,
    pub pixel_type: PixelType,
    pub is_integer: bool,
    pub dataset_min: f64,
    pub dataset_max: f64,
    /// `None` only for masked cells when the pixel type has no no-data value.
    pub data: Vec<Option<f64>>,
}

impl GridResult {
    pub fn value(&self, col: usize, row: usize) -> Option<f64> {
        self.data[row * self.cols + col]
    }

    pub fn to_json(&self) -> Value {
        let is_integer = self.is_integer;
        let rows: Vec<Value> = self
            .data
            .chunks(self.cols.max(1))
            .map(|row| {
                Value::Array(
                    row.iter()
                        .map(|v| v.map_or(Value::Null, |v| cell_json(v, is_integer)))
                        .collect(),
                )
            })
            .collect();

        json!({
            "nCols": self.cols,
            "nRows": self.rows,
            "xLLCenter": json_number(self.ll_center_x),
            "yLLCenter": json_number(self.ll_center_y),
            "cellSize": json_number(self.cell_size),
            "pixelType": self.pixel_type.as_str(),
            "noDataValue": self.no_data_value.map_or(Value::Null, |v| cell_json(v, is_integer)),
            "spatialReference": self.spatial_reference.to_json(),
            "rasterProperties": {
                "isInteger": self.is_integer,
                "datasetMin": json_number(self.dataset_min),
                "datasetMax": json_number(self.dataset_max),
            },
            "data": rows,
        })
    }
}

fn cell_json(value: f64, is_integer: bool) -> Value {
    if is_integer && value.is_finite() {
        json!(value.round() as i64)
    } else {
        json_number(value)
    }
}

/// No-data marker reported for a pixel type.
///
/// A declared raster no-data value wins. Otherwise the minimum of the pixel
/// type's numeric category is used: 0 for unsigned types, the signed
/// minimum for signed ones. Complex types use their component's minimum.
/// Sub-byte and unknown types have no marker.
pub fn default_no_data(pixel_type: PixelType, declared: Option<f64>) -> Option<f64> {
    if declared.is_some() {
        return declared;
    }
    match pixel_type {
        PixelType::Char => Some(i8::MIN as f64),
        PixelType::UChar | PixelType::UShort | PixelType::ULong | PixelType::ULongLong => {
            Some(0.0)
        }
        PixelType::Short | PixelType::CShort => Some(i16::MIN as f64),
        PixelType::Long | PixelType::CLong => Some(i32::MIN as f64),
        PixelType::LongLong => Some(i64::MIN as f64),
        PixelType::Float | PixelType::Complex => Some(f32::MIN as f64),
        PixelType::Double | PixelType::DComplex => Some(f64::MIN),
        PixelType::U1 | PixelType::U2 | PixelType::U4 | PixelType::Unknown => None,
    }
}

/// Reorder a column-major block row-major, replacing masked cells with
/// `no_data`.
pub fn transpose_masked(block: &PixelBlock, no_data: Option<f64>) -> Vec<Option<f64>> {
    let mut out = Vec::with_capacity(block.cols * block.rows);
    for row in 0..block.rows {
        for col in 0..block.cols {
            out.push(block.get(col, row).or(no_data));
        }
    }
    out
}

/// Rasterizes extents into elevation grids, enforcing the data-size cap.
#[derive(Debug, Clone, Copy)]
pub struct GridExtractor {
    max_data_values: u64,
}

impl GridExtractor {
    pub fn new(max_data_values: u64) -> Self {
        Self { max_data_values }
    }

    pub fn max_data_values(&self) -> u64 {
        self.max_data_values
    }

    /// Read a `rows` x `cols` bilinear grid of `model` over the request extent.
    ///
    /// # Errors
    ///
    /// - [`SurfaceError::Validation`] for non-positive sizes
    /// - [`SurfaceError::RequestTooLarge`] when `rows * cols` exceeds the cap;
    ///   this is checked before the raster is touched
    pub fn extract(&self, request: &GridRequest, model: &SurfaceModel) -> Result<GridResult> {
        if request.rows <= 0 {
            return Err(SurfaceError::validation("rows must be a positive integer"));
        }
        if request.cols <= 0 {
            return Err(SurfaceError::validation("columns must be a positive integer"));
        }
        let rows = request.rows as u64;
        let cols = request.cols as u64;
        let requested = rows.saturating_mul(cols);
        if requested > self.max_data_values {
            return Err(SurfaceError::RequestTooLarge {
                requested,
                limit: self.max_data_values,
            });
        }

        let (rows, cols) = (rows as usize, cols as usize);
        let extent = request.extent;
        let block = model.raster.read_block(&BlockRequest {
            band: model.band_index,
            extent,
            spatial_reference: request.spatial_reference,
            cols,
            rows,
            resampling: Resampling::Bilinear,
        })?;

        let properties = model.raster.properties();
        let no_data_value = default_no_data(properties.pixel_type, properties.no_data);
        let (dataset_min, dataset_max) = model
            .raster
            .statistics(model.band_index)
            .map_or((f64::NAN, f64::NAN), |s| (s.minimum, s.maximum));

        let cell_size = extent.width() / cols as f64;
        let cell_height = extent.height() / rows as f64;

        tracing::debug!(rows, cols, pixel_type = properties.pixel_type.as_str(), "Extracted grid");

        Ok(GridResult {
            cols,
            rows,
            ll_center_x: extent.xmin + cell_size * 0.5,
            ll_center_y: extent.ymin + cell_height * 0.5,
            cell_size,
            no_data_value,
            spatial_reference: request.spatial_reference,
            pixel_type: properties.pixel_type,
            is_integer: properties.is_integer(),
            dataset_min,
            dataset_max,
            data: transpose_masked(&block, no_data_value),
        })
    }
}
