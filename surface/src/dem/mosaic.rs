//! A directory of SRTM tiles read as one continuous surface.
//!
//! Tiles are memory-mapped on first use and kept in an LRU cache. A tile
//! missing from the directory is a hole in the surface, not an error.
//!
//! ```ignore
//! use surface::dem::HgtMosaic;
//!
//! let mosaic = HgtMosaic::builder("/data/srtm").cache_size(100).build()?;
//! let z = mosaic.elevation(35.3606, 138.7274)?; // Mount Fuji
//! ```

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use moka::sync::Cache;

use crate::error::{Result, SurfaceError};
use crate::geometry::{Envelope, SpatialReference};
use crate::provider::{BandStatistics, PixelType};

use super::filename::{filename_to_key, key_to_filename, tile_key};
use super::tile::{HgtResolution, HgtTile};
use super::{min_max, ElevationSampler};

/// Default number of tiles kept in memory.
pub const DEFAULT_CACHE_SIZE: u64 = 100;

/// Statistics about cache usage.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Number of tiles currently in the cache.
    pub entry_count: u64,
    /// Requests served from the cache.
    pub hit_count: u64,
    /// Tiles loaded from disk.
    pub miss_count: u64,
}

impl CacheStats {
    /// Cache hit rate between 0.0 and 1.0; 0.0 before any request.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hit_count + self.miss_count;
        if total == 0 {
            0.0
        } else {
            self.hit_count as f64 / total as f64
        }
    }
}

/// SRTM tiles under one directory, sampled as a WGS84 surface.
pub struct HgtMosaic {
    data_dir: PathBuf,
    /// South-west corners of every tile present on disk.
    keys: BTreeSet<(i32, i32)>,
    resolution: HgtResolution,
    tile_cache: Cache<(i32, i32), Arc<HgtTile>>,
    hit_count: AtomicU64,
    miss_count: AtomicU64,
    statistics: OnceLock<Option<BandStatistics>>,
}

impl HgtMosaic {
    pub fn builder<P: AsRef<Path>>(data_dir: P) -> HgtMosaicBuilder {
        HgtMosaicBuilder::new(data_dir)
    }

    /// Open `data_dir` with the default cache size.
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        Self::builder(data_dir).build()
    }

    pub fn resolution(&self) -> HgtResolution {
        self.resolution
    }

    /// Number of tiles found on disk.
    pub fn tile_count(&self) -> usize {
        self.keys.len()
    }

    /// Filenames of the tiles found on disk, sorted.
    pub fn tile_names(&self) -> Vec<String> {
        self.keys.iter().map(|k| key_to_filename(*k)).collect()
    }

    /// Bilinear elevation at a WGS84 location, `None` for voids and holes.
    pub fn elevation(&self, lat: f64, lon: f64) -> Result<Option<f64>> {
        match self.tile_for(lat, lon)? {
            Some(tile) => tile.sample(lat, lon),
            None => Ok(None),
        }
    }

    pub fn cache_stats(&self) -> CacheStats {
        CacheStats {
            entry_count: self.tile_cache.entry_count(),
            hit_count: self.hit_count.load(Ordering::Relaxed),
            miss_count: self.miss_count.load(Ordering::Relaxed),
        }
    }

    pub fn cache_capacity(&self) -> u64 {
        self.tile_cache.policy().max_capacity().unwrap_or(0)
    }

    /// Load every tile into the cache, up to its capacity. Returns the
    /// number of tiles loaded.
    pub fn preload(&self) -> usize {
        let mut loaded = 0;
        for key in &self.keys {
            match self.load_tile(*key) {
                Ok(_) => loaded += 1,
                Err(e) => {
                    tracing::warn!(tile = %key_to_filename(*key), error = %e, "Failed to preload tile")
                }
            }
        }
        loaded
    }

    fn tile_for(&self, lat: f64, lon: f64) -> Result<Option<Arc<HgtTile>>> {
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return Ok(None);
        }
        let mut key = tile_key(lat, lon);
        // The north and east edges of the last tile belong to it.
        if !self.keys.contains(&key) {
            let edge = [
                (key.0 - 1, key.1),
                (key.0, key.1 - 1),
                (key.0 - 1, key.1 - 1),
            ]
            .into_iter()
            .find(|k| {
                self.keys.contains(k)
                    && lat <= (k.0 + 1) as f64
                    && lon <= (k.1 + 1) as f64
                    && lat >= k.0 as f64
                    && lon >= k.1 as f64
            });
            match edge {
                Some(k) => key = k,
                None => return Ok(None),
            }
        }
        self.load_tile(key).map(Some)
    }

    /// Load a tile from the cache or from disk.
    fn load_tile(&self, key: (i32, i32)) -> Result<Arc<HgtTile>> {
        if let Some(tile) = self.tile_cache.get(&key) {
            self.hit_count.fetch_add(1, Ordering::Relaxed);
            return Ok(tile);
        }
        self.miss_count.fetch_add(1, Ordering::Relaxed);

        let filename = key_to_filename(key);
        let path = self.data_dir.join(&filename);
        if !path.exists() {
            let zip_path = self.data_dir.join(format!("{}.zip", filename));
            extract_hgt_from_zip(&zip_path, &path)?;
        }

        tracing::debug!(tile = %filename, "Loading tile");
        let tile = Arc::new(HgtTile::open(&path, key.0, key.1)?);
        self.tile_cache.insert(key, tile.clone());
        Ok(tile)
    }
}

/// Extract the `.hgt` entry of a `.hgt.zip` archive to `out_path`.
fn extract_hgt_from_zip(zip_path: &Path, out_path: &Path) -> Result<()> {
    let invalid = |e: zip::result::ZipError| {
        SurfaceError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    };

    let file = std::fs::File::open(zip_path)?;
    let mut archive = zip::ZipArchive::new(file).map_err(invalid)?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(invalid)?;
        if entry.name().to_ascii_lowercase().ends_with(".hgt") {
            let mut out_file = std::fs::File::create(out_path)?;
            std::io::copy(&mut entry, &mut out_file)?;
            tracing::info!(archive = %zip_path.display(), "Extracted tile");
            return Ok(());
        }
    }

    Err(SurfaceError::Io(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        format!("No .hgt file found in {}", zip_path.display()),
    )))
}

/// Scan a directory for `.hgt` and `.hgt.zip` tiles.
///
/// Both forms of the same tile count once. Files whose names are not tile
/// names are ignored, as is a missing directory.
pub fn scan_tile_files(data_dir: &Path) -> BTreeSet<(i32, i32)> {
    let Ok(entries) = std::fs::read_dir(data_dir) else {
        return BTreeSet::new();
    };

    entries
        .flatten()
        .filter(|e| e.path().is_file())
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().into_owned();
            (name.ends_with(".hgt") || name.ends_with(".hgt.zip"))
                .then(|| filename_to_key(&name))
                .flatten()
        })
        .collect()
}

/// Size in bytes of the tile stored for `key`, without extracting archives.
fn tile_file_size(data_dir: &Path, key: (i32, i32)) -> Option<usize> {
    let path = data_dir.join(key_to_filename(key));
    std::fs::metadata(path).ok().map(|m| m.len() as usize)
}

impl ElevationSampler for HgtMosaic {
    fn spatial_reference(&self) -> SpatialReference {
        SpatialReference::WGS84
    }

    fn extent(&self) -> Envelope {
        self.keys
            .iter()
            .map(|(lat, lon)| {
                Envelope::new(*lon as f64, *lat as f64, (*lon + 1) as f64, (*lat + 1) as f64)
            })
            .reduce(|a, b| a.union(&b))
            .unwrap_or(Envelope::new(0.0, 0.0, 0.0, 0.0))
    }

    fn cell_size(&self) -> f64 {
        self.resolution.cell_size()
    }

    fn dimensions(&self) -> (usize, usize) {
        let extent = self.extent();
        let per_degree = self.resolution.samples() - 1;
        (
            extent.width() as usize * per_degree + 1,
            extent.height() as usize * per_degree + 1,
        )
    }

    fn sample(&self, x: f64, y: f64) -> Result<Option<f64>> {
        self.elevation(y, x)
    }

    fn nearest(&self, x: f64, y: f64) -> Result<Option<f64>> {
        Ok(self
            .tile_for(y, x)?
            .and_then(|tile| tile.nearest(y, x))
            .map(f64::from))
    }

    /// Computed over every tile on first use.
    fn statistics(&self) -> Option<BandStatistics> {
        *self.statistics.get_or_init(|| {
            let per_tile: Vec<BandStatistics> = self
                .keys
                .iter()
                .filter_map(|key| match self.load_tile(*key) {
                    Ok(tile) => tile.statistics(),
                    Err(e) => {
                        tracing::warn!(tile = %key_to_filename(*key), error = %e, "Skipping tile statistics");
                        None
                    }
                })
                .collect();
            min_max(per_tile.iter().flat_map(|s| [s.minimum, s.maximum]))
        })
    }

    fn pixel_type(&self) -> PixelType {
        PixelType::Short
    }

    fn has_data(&self) -> bool {
        !self.keys.is_empty()
    }
}

/// Builder for [`HgtMosaic`].
pub struct HgtMosaicBuilder {
    data_dir: PathBuf,
    cache_size: u64,
}

impl HgtMosaicBuilder {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            cache_size: DEFAULT_CACHE_SIZE,
        }
    }

    /// Maximum number of tiles kept in memory.
    pub fn cache_size(mut self, size: u64) -> Self {
        self.cache_size = size;
        self
    }

    /// Scan the directory and open the mosaic.
    ///
    /// The resolution is taken from the first tile; an empty directory
    /// yields an empty SRTM3 mosaic.
    ///
    /// # Errors
    ///
    /// Returns an error if the first tile cannot be read or has an invalid
    /// size.
    pub fn build(self) -> Result<HgtMosaic> {
        let keys = scan_tile_files(&self.data_dir);
        let mut mosaic = HgtMosaic {
            data_dir: self.data_dir,
            keys,
            resolution: HgtResolution::Srtm3,
            tile_cache: Cache::builder().max_capacity(self.cache_size).build(),
            hit_count: AtomicU64::new(0),
            miss_count: AtomicU64::new(0),
            statistics: OnceLock::new(),
        };

        if let Some(first) = mosaic.keys.iter().next().copied() {
            mosaic.resolution = match tile_file_size(&mosaic.data_dir, first) {
                Some(size) => HgtResolution::from_file_size(size)?,
                None => mosaic.load_tile(first)?.resolution(),
            };
        }

        tracing::info!(
            data_dir = %mosaic.data_dir.display(),
            tiles = mosaic.keys.len(),
            cache_size = self.cache_size,
            "Opened tile mosaic"
        );
        Ok(mosaic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;
    use tempfile::TempDir;

    const SRTM3_SAMPLES: usize = 1201;

    /// SRTM3 tile, flat at `base` metres except the centre sample.
    fn tile_bytes(base: i16, center: i16) -> Vec<u8> {
        let mut data = base.to_be_bytes().repeat(SRTM3_SAMPLES * SRTM3_SAMPLES);
        let offset = (600 * SRTM3_SAMPLES + 600) * 2;
        data[offset..offset + 2].copy_from_slice(&center.to_be_bytes());
        data
    }

    fn create_test_tile(dir: &Path, filename: &str, center: i16) {
        fs::write(dir.join(filename), tile_bytes(0, center)).unwrap();
    }

    #[test]
    fn test_elevation_and_cache() {
        let temp_dir = TempDir::new().unwrap();
        create_test_tile(temp_dir.path(), "N35E138.hgt", 500);

        let mosaic = HgtMosaic::open(temp_dir.path()).unwrap();
        assert_eq!(mosaic.elevation(35.5, 138.5).unwrap(), Some(500.0));
        assert_eq!(mosaic.cache_stats().miss_count, 1);

        assert_eq!(mosaic.elevation(35.5, 138.5).unwrap(), Some(500.0));
        let stats = mosaic.cache_stats();
        assert_eq!(stats.hit_count, 1);
        assert_eq!(stats.hit_rate(), 0.5);
    }

    #[test]
    fn test_missing_tile_is_a_hole() {
        let temp_dir = TempDir::new().unwrap();
        create_test_tile(temp_dir.path(), "N35E138.hgt", 500);

        let mosaic = HgtMosaic::open(temp_dir.path()).unwrap();
        assert_eq!(mosaic.elevation(10.5, 10.5).unwrap(), None);
        assert_eq!(mosaic.elevation(95.0, 10.5).unwrap(), None);
    }

    #[test]
    fn test_north_east_edges_of_last_tile() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("N35E138.hgt"), tile_bytes(7, 7)).unwrap();

        let mosaic = HgtMosaic::open(temp_dir.path()).unwrap();
        assert_eq!(mosaic.elevation(36.0, 139.0).unwrap(), Some(7.0));
        assert_eq!(mosaic.elevation(36.0, 138.5).unwrap(), Some(7.0));
        assert_eq!(mosaic.elevation(36.001, 138.5).unwrap(), None);
    }

    #[test]
    fn test_scan_and_extent() {
        let temp_dir = TempDir::new().unwrap();
        create_test_tile(temp_dir.path(), "N35E138.hgt", 1);
        create_test_tile(temp_dir.path(), "N36E139.hgt", 2);
        fs::write(temp_dir.path().join("notes.txt"), b"not a tile").unwrap();

        let mosaic = HgtMosaic::open(temp_dir.path()).unwrap();
        assert_eq!(mosaic.tile_names(), vec!["N35E138.hgt", "N36E139.hgt"]);
        assert_eq!(mosaic.extent(), Envelope::new(138.0, 35.0, 140.0, 37.0));
        assert_eq!(mosaic.dimensions(), (2401, 2401));
        assert!(mosaic.has_data());
    }

    #[test]
    fn test_empty_directory() {
        let temp_dir = TempDir::new().unwrap();
        let mosaic = HgtMosaic::open(temp_dir.path()).unwrap();
        assert!(!mosaic.has_data());
        assert!(mosaic.statistics().is_none());
        assert_eq!(mosaic.resolution(), HgtResolution::Srtm3);
    }

    #[test]
    fn test_statistics_across_tiles() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("N35E138.hgt"), tile_bytes(100, 900)).unwrap();
        fs::write(temp_dir.path().join("N35E139.hgt"), tile_bytes(-20, 40)).unwrap();

        let mosaic = HgtMosaic::open(temp_dir.path()).unwrap();
        let stats = mosaic.statistics().unwrap();
        assert_eq!(stats.minimum, -20.0);
        assert_eq!(stats.maximum, 900.0);
    }

    #[test]
    fn test_hgt_zip_extraction() {
        let temp_dir = TempDir::new().unwrap();
        let zip_path = temp_dir.path().join("N40E010.hgt.zip");
        let file = fs::File::create(&zip_path).unwrap();
        let mut zip_writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        zip_writer.start_file("N40E010.hgt", options).unwrap();
        zip_writer.write_all(&tile_bytes(0, 750)).unwrap();
        zip_writer.finish().unwrap();

        let mosaic = HgtMosaic::open(temp_dir.path()).unwrap();
        assert_eq!(mosaic.tile_count(), 1);
        assert_eq!(mosaic.elevation(40.5, 10.5).unwrap(), Some(750.0));
        assert!(temp_dir.path().join("N40E010.hgt").exists());
    }

    #[test]
    fn test_invalid_tile_size() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("N01E001.hgt"), vec![0u8; 1000]).unwrap();
        let result = HgtMosaic::open(temp_dir.path());
        assert!(matches!(result, Err(SurfaceError::InvalidFileSize { size: 1000 })));
    }

    #[test]
    fn test_cache_capacity() {
        let temp_dir = TempDir::new().unwrap();
        let mosaic = HgtMosaic::builder(temp_dir.path()).cache_size(25).build().unwrap();
        assert_eq!(mosaic.cache_capacity(), 25);
    }
}
