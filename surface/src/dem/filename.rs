//! Tile naming for SRTM `.hgt` files.
//!
//! Tiles are named after their **south-west corner**:
//! `{N|S}{lat:02}{E|W}{lon:03}.hgt`, e.g. `N35E138.hgt` covers
//! 35°..36°N, 138°..139°E.

/// Key of the tile containing a location: the floored (lat, lon).
pub fn tile_key(lat: f64, lon: f64) -> (i32, i32) {
    (lat.floor() as i32, lon.floor() as i32)
}

/// Filename of the tile whose south-west corner is `key`.
///
/// ```
/// use surface::dem::filename::key_to_filename;
///
/// assert_eq!(key_to_filename((35, 138)), "N35E138.hgt");
/// assert_eq!(key_to_filename((-13, -78)), "S13W078.hgt");
/// ```
pub fn key_to_filename(key: (i32, i32)) -> String {
    let (lat, lon) = key;
    format!(
        "{}{:02}{}{:03}.hgt",
        if lat >= 0 { 'N' } else { 'S' },
        lat.abs(),
        if lon >= 0 { 'E' } else { 'W' },
        lon.abs()
    )
}

/// Filename of the tile containing a location.
///
/// ```
/// use surface::dem::filename::lat_lon_to_filename;
///
/// assert_eq!(lat_lon_to_filename(35.5, 138.7), "N35E138.hgt");
/// assert_eq!(lat_lon_to_filename(-0.5, 0.5), "S01E000.hgt");
/// ```
pub fn lat_lon_to_filename(lat: f64, lon: f64) -> String {
    key_to_filename(tile_key(lat, lon))
}

/// Parse a tile filename into its south-west corner.
///
/// Any directory part and a `.hgt` or `.hgt.zip` extension are ignored;
/// prefixes are case-insensitive.
///
/// ```
/// use surface::dem::filename::filename_to_key;
///
/// assert_eq!(filename_to_key("N35E138.hgt"), Some((35, 138)));
/// assert_eq!(filename_to_key("tiles/s12w077.hgt.zip"), Some((-12, -77)));
/// assert_eq!(filename_to_key("readme.txt"), None);
/// ```
pub fn filename_to_key(filename: &str) -> Option<(i32, i32)> {
    let name = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let name = name.strip_suffix(".zip").unwrap_or(name);
    let name = name.strip_suffix(".hgt").unwrap_or(name);

    if name.len() != 7 || !name.is_ascii() {
        return None;
    }
    let bytes = name.as_bytes();

    let lat_sign = match bytes[0].to_ascii_uppercase() {
        b'N' => 1,
        b'S' => -1,
        _ => return None,
    };
    let lon_sign = match bytes[3].to_ascii_uppercase() {
        b'E' => 1,
        b'W' => -1,
        _ => return None,
    };
    let lat: i32 = name[1..3].parse().ok()?;
    let lon: i32 = name[4..7].parse().ok()?;

    Some((lat * lat_sign, lon * lon_sign))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_floor_toward_south_west() {
        assert_eq!(lat_lon_to_filename(35.5, 138.7), "N35E138.hgt");
        assert_eq!(lat_lon_to_filename(-12.3, -77.1), "S13W078.hgt");
        assert_eq!(lat_lon_to_filename(-0.1, -0.1), "S01W001.hgt");
        assert_eq!(lat_lon_to_filename(0.0, 0.0), "N00E000.hgt");
        assert_eq!(lat_lon_to_filename(19.4, -99.1), "N19W100.hgt");
    }

    #[test]
    fn test_parse() {
        assert_eq!(filename_to_key("N00E000.hgt"), Some((0, 0)));
        assert_eq!(filename_to_key("C:\\data\\S12W077.hgt"), Some((-12, -77)));
        assert_eq!(filename_to_key("/data/N35E138"), Some((35, 138)));
        assert_eq!(filename_to_key("n35e138.HGT"), None);
    }

    #[test]
    fn test_parse_invalid() {
        assert_eq!(filename_to_key("N35E13.hgt"), None);
        assert_eq!(filename_to_key("X35E138.hgt"), None);
        assert_eq!(filename_to_key("N35X138.hgt"), None);
        assert_eq!(filename_to_key("NAAE138.hgt"), None);
        assert_eq!(filename_to_key("N35E1é8.hgt"), None);
    }

    #[test]
    fn test_key_round_trip() {
        for (lat, lon) in [(35.5, 138.7), (-12.3, -77.1), (0.5, -0.5), (-59.9, 179.9)] {
            let key = tile_key(lat, lon);
            assert_eq!(filename_to_key(&key_to_filename(key)), Some(key));
        }
    }
}
