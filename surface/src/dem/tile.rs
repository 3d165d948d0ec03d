//! SRTM `.hgt` tile parsing.
//!
//! A tile is a square of big-endian `i16` samples covering 1° × 1°, stored
//! north to south, west to east. Edge samples are shared with the
//! neighbouring tiles.

use std::fs::File;
use std::path::Path;

use memmap2::Mmap;

use crate::error::{Result, SurfaceError};
use crate::provider::BandStatistics;

use super::{bilinear, min_max};

/// File size for SRTM1 (1 arc-second, ~30m resolution): 3601 × 3601 × 2 bytes
const SRTM1_SIZE: usize = 3601 * 3601 * 2;

/// File size for SRTM3 (3 arc-second, ~90m resolution): 1201 × 1201 × 2 bytes
const SRTM3_SIZE: usize = 1201 * 1201 * 2;

/// Value marking a void sample.
pub const VOID_VALUE: i16 = -32768;

/// Sample spacing of a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HgtResolution {
    /// 1 arc-second, 3601 samples per side
    Srtm1,
    /// 3 arc-second, 1201 samples per side
    Srtm3,
}

impl HgtResolution {
    /// Detect the resolution from a file size in bytes.
    pub fn from_file_size(size: usize) -> Result<Self> {
        match size {
            SRTM1_SIZE => Ok(HgtResolution::Srtm1),
            SRTM3_SIZE => Ok(HgtResolution::Srtm3),
            size => Err(SurfaceError::InvalidFileSize { size }),
        }
    }

    /// Samples per row and per column.
    pub fn samples(&self) -> usize {
        match self {
            HgtResolution::Srtm1 => 3601,
            HgtResolution::Srtm3 => 1201,
        }
    }

    /// Sample spacing in degrees.
    pub fn cell_size(&self) -> f64 {
        1.0 / (self.samples() - 1) as f64
    }
}

/// A memory-mapped `.hgt` tile.
pub struct HgtTile {
    data: Mmap,
    resolution: HgtResolution,
    /// South-west corner.
    base_lat: i32,
    base_lon: i32,
}

impl HgtTile {
    /// Map a tile whose south-west corner is at (`base_lat`, `base_lon`).
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be mapped or its size matches
    /// neither SRTM1 nor SRTM3.
    pub fn open<P: AsRef<Path>>(path: P, base_lat: i32, base_lon: i32) -> Result<Self> {
        let file = File::open(&path)?;

        // SAFETY: the file is opened read-only and the mapping never escapes
        // this struct; tiles are not rewritten while the service runs.
        let data = unsafe { Mmap::map(&file)? };
        let resolution = HgtResolution::from_file_size(data.len())?;

        Ok(Self {
            data,
            resolution,
            base_lat,
            base_lon,
        })
    }

    pub fn resolution(&self) -> HgtResolution {
        self.resolution
    }

    pub fn base_lat(&self) -> i32 {
        self.base_lat
    }

    pub fn base_lon(&self) -> i32 {
        self.base_lon
    }

    /// Raw sample at (`row`, `col`), row 0 at the north edge. `None` for
    /// voids and indices past the edge.
    pub fn get(&self, row: usize, col: usize) -> Option<i16> {
        let samples = self.resolution.samples();
        if row >= samples || col >= samples {
            return None;
        }
        let offset = (row * samples + col) * 2;
        let value = i16::from_be_bytes([self.data[offset], self.data[offset + 1]]);
        (value != VOID_VALUE).then_some(value)
    }

    /// Fractional (col, row) of a location, or `None` outside the tile.
    fn position(&self, lat: f64, lon: f64) -> Option<(f64, f64)> {
        let lat_frac = lat - self.base_lat as f64;
        let lon_frac = lon - self.base_lon as f64;
        if !(0.0..=1.0).contains(&lat_frac) || !(0.0..=1.0).contains(&lon_frac) {
            return None;
        }
        let last = (self.resolution.samples() - 1) as f64;
        Some((lon_frac * last, (1.0 - lat_frac) * last))
    }

    /// Bilinear elevation at a location inside the tile.
    pub fn sample(&self, lat: f64, lon: f64) -> Result<Option<f64>> {
        let Some((col, row)) = self.position(lat, lon) else {
            return Ok(None);
        };
        let samples = self.resolution.samples();
        bilinear(col, row, samples, samples, |c, r| {
            Ok(self.get(r, c).map(f64::from))
        })
    }

    /// Elevation of the nearest sample.
    pub fn nearest(&self, lat: f64, lon: f64) -> Option<i16> {
        let (col, row) = self.position(lat, lon)?;
        self.get(row.round() as usize, col.round() as usize)
    }

    /// Minimum and maximum over the tile's valid samples.
    pub fn statistics(&self) -> Option<BandStatistics> {
        min_max(
            self.data
                .chunks_exact(2)
                .map(|b| i16::from_be_bytes([b[0], b[1]]))
                .filter(|v| *v != VOID_VALUE)
                .map(f64::from),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SRTM3_SAMPLES: usize = 1201;

    fn put(data: &mut [u8], row: usize, col: usize, value: i16) {
        let offset = (row * SRTM3_SAMPLES + col) * 2;
        data[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
    }

    /// SRTM3 tile: 1000 m in the north-west corner, 500 m in the centre,
    /// 100 m in the south-east corner, a void next to the centre.
    fn create_test_tile() -> NamedTempFile {
        let mut data = vec![0u8; SRTM3_SIZE];
        put(&mut data, 0, 0, 1000);
        put(&mut data, 600, 600, 500);
        put(&mut data, 1200, 1200, 100);
        put(&mut data, 600, 700, VOID_VALUE);

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&data).unwrap();
        file
    }

    #[test]
    fn test_open_srtm3() {
        let file = create_test_tile();
        let tile = HgtTile::open(file.path(), 35, 138).unwrap();
        assert_eq!(tile.resolution(), HgtResolution::Srtm3);
        assert_eq!(tile.resolution().samples(), SRTM3_SAMPLES);
    }

    #[test]
    fn test_invalid_file_size() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&vec![0u8; 1000]).unwrap();

        match HgtTile::open(file.path(), 0, 0) {
            Err(SurfaceError::InvalidFileSize { size }) => assert_eq!(size, 1000),
            _ => panic!("Expected InvalidFileSize error"),
        }
    }

    #[test]
    fn test_corners_and_centre() {
        let file = create_test_tile();
        let tile = HgtTile::open(file.path(), 35, 138).unwrap();

        assert_eq!(tile.sample(36.0, 138.0).unwrap(), Some(1000.0));
        assert_eq!(tile.sample(35.0, 139.0).unwrap(), Some(100.0));
        assert_eq!(tile.sample(35.5, 138.5).unwrap(), Some(500.0));
        assert_eq!(tile.nearest(35.5001, 138.4999), Some(500));
    }

    #[test]
    fn test_bilinear_between_samples() {
        let file = create_test_tile();
        let tile = HgtTile::open(file.path(), 35, 138).unwrap();

        // Halfway between (600, 600) = 500 and (600, 601) = 0
        let half_cell = 0.5 / 1200.0;
        let z = tile.sample(35.5, 138.5 + half_cell).unwrap().unwrap();
        assert!((z - 250.0).abs() < 1e-6);
    }

    #[test]
    fn test_void_and_outside() {
        let file = create_test_tile();
        let tile = HgtTile::open(file.path(), 35, 138).unwrap();

        assert_eq!(tile.get(600, 700), None);
        let lon = 138.0 + 700.0 / 1200.0;
        assert_eq!(tile.sample(35.5, lon).unwrap(), None);
        assert_eq!(tile.sample(37.0, 138.5).unwrap(), None);
    }

    #[test]
    fn test_statistics_skip_voids() {
        let file = create_test_tile();
        let tile = HgtTile::open(file.path(), 35, 138).unwrap();
        let stats = tile.statistics().unwrap();
        assert_eq!(stats.minimum, 0.0);
        assert_eq!(stats.maximum, 1000.0);
    }

    #[test]
    fn test_resolution_cell_size() {
        assert_eq!(HgtResolution::Srtm1.samples(), 3601);
        assert_eq!(HgtResolution::Srtm3.cell_size(), 1.0 / 1200.0);
    }
}
