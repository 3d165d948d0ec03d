use anyhow::{bail, Context, Result};
use geojson::{GeoJson, Geometry, Value as GeoValue};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::{json, Value};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use surface::InputMap;

use super::Session;

pub fn run(
    session: &Session,
    layer: i64,
    input: &Path,
    output: Option<PathBuf>,
    lon_col: &str,
    lat_col: &str,
) -> Result<()> {
    let extension = input
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    let elevations = Elevations { session, layer };
    match extension.as_str() {
        "csv" => process_csv(&elevations, input, output, lon_col, lat_col),
        "geojson" | "json" => process_geojson(&elevations, input, output),
        _ => bail!(
            "Unsupported file format: {}. Use .csv or .geojson",
            extension
        ),
    }
}

fn progress_bar(len: u64) -> Result<ProgressBar> {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

fn output_path(input: &Path, output: Option<PathBuf>, extension: &str) -> PathBuf {
    output.unwrap_or_else(|| {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".to_string());
        input.with_file_name(format!("{}_elevation.{}", stem, extension))
    })
}

/// GetElevations against one layer.
struct Elevations<'a> {
    session: &'a Session,
    layer: i64,
}

impl Elevations<'_> {
    fn interpolate(&self, geometries: Vec<Value>) -> Result<Vec<Value>> {
        let mut inputs = InputMap::new();
        inputs.insert("geometries", Value::Array(geometries));
        let body = self.session.call(
            &format!("SurfaceLayers/{}/GetElevations", self.layer),
            None,
            &inputs,
        )?;
        match body["geometries"].as_array() {
            Some(results) => Ok(results.clone()),
            None => bail!("GetElevations returned no geometries"),
        }
    }

    fn at(&self, lon: f64, lat: f64) -> Result<Option<f64>> {
        let results = self.interpolate(vec![json!({
            "x": lon,
            "y": lat,
            "spatialReference": { "wkid": 4326 },
        })])?;
        Ok(results.first().and_then(|g| g["z"].as_f64()))
    }
}

fn process_csv(
    elevations: &Elevations,
    input: &Path,
    output: Option<PathBuf>,
    lon_col: &str,
    lat_col: &str,
) -> Result<()> {
    let file = File::open(input).context("Failed to open input file")?;
    let mut reader = csv::Reader::from_reader(BufReader::new(file));

    let headers = reader.headers()?.clone();
    let lon_idx = headers
        .iter()
        .position(|h| h == lon_col)
        .with_context(|| format!("Column '{}' not found in CSV", lon_col))?;
    let lat_idx = headers
        .iter()
        .position(|h| h == lat_col)
        .with_context(|| format!("Column '{}' not found in CSV", lat_col))?;

    let records: Vec<_> = reader.records().collect::<Result<_, _>>()?;
    let pb = progress_bar(records.len() as u64)?;

    let output_path = output_path(input, output, "csv");
    let output_file = File::create(&output_path).context("Failed to create output file")?;
    let mut writer = csv::Writer::from_writer(BufWriter::new(output_file));

    let mut new_headers: Vec<&str> = headers.iter().collect();
    new_headers.push("elevation");
    writer.write_record(&new_headers)?;

    let mut voids = 0;
    for record in records {
        let lon: f64 = record
            .get(lon_idx)
            .context("Missing longitude")?
            .trim()
            .parse()
            .context("Invalid longitude")?;
        let lat: f64 = record
            .get(lat_idx)
            .context("Missing latitude")?
            .trim()
            .parse()
            .context("Invalid latitude")?;

        // A point off the surface fails the whole request, so points go one at a time.
        let elevation = match elevations.at(lon, lat).ok().flatten() {
            Some(e) => format!("{:.2}", e),
            None => {
                voids += 1;
                "void".to_string()
            }
        };

        let mut new_record: Vec<&str> = record.iter().collect();
        new_record.push(&elevation);
        writer.write_record(&new_record)?;

        pb.inc(1);
    }

    pb.finish_with_message("done");
    writer.flush()?;

    if voids > 0 {
        println!("{} points had no elevation", voids);
    }
    println!("Output written to: {}", output_path.display());
    Ok(())
}

fn process_geojson(elevations: &Elevations, input: &Path, output: Option<PathBuf>) -> Result<()> {
    let file = File::open(input).context("Failed to open input file")?;
    let geojson: GeoJson =
        serde_json::from_reader(BufReader::new(file)).context("Failed to parse GeoJSON")?;

    let mut skipped = 0;
    let mut enrich = |geometry: Geometry| -> Geometry {
        match add_elevations(elevations, &geometry.value) {
            Ok(value) => Geometry::new(value),
            Err(_) => {
                skipped += 1;
                geometry
            }
        }
    };

    let result = match geojson {
        GeoJson::Geometry(geometry) => GeoJson::Geometry(enrich(geometry)),
        GeoJson::Feature(mut feature) => {
            feature.geometry = feature.geometry.take().map(&mut enrich);
            GeoJson::Feature(feature)
        }
        GeoJson::FeatureCollection(mut fc) => {
            let pb = progress_bar(fc.features.len() as u64)?;
            for feature in &mut fc.features {
                feature.geometry = feature.geometry.take().map(&mut enrich);
                pb.inc(1);
            }
            pb.finish_with_message("done");
            GeoJson::FeatureCollection(fc)
        }
    };

    let output_path = output_path(input, output, "geojson");
    let output_file = File::create(&output_path).context("Failed to create output file")?;
    let mut writer = BufWriter::new(output_file);
    serde_json::to_writer_pretty(&mut writer, &result)?;
    writer.flush()?;

    if skipped > 0 {
        println!("{} geometries left unchanged (off the surface or unsupported)", skipped);
    }
    println!("Output written to: {}", output_path.display());
    Ok(())
}

/// Send one GeoJSON geometry through GetElevations. Lines and polygons come
/// back densified.
fn add_elevations(elevations: &Elevations, value: &GeoValue) -> Result<GeoValue> {
    let requests = to_surface_json(value)?;
    let count = requests.len();
    let results = elevations.interpolate(requests)?;
    if results.len() != count {
        bail!("expected {} geometries, got {}", count, results.len());
    }
    from_surface_json(value, &results)
}

fn with_wgs84(mut geometry: Value) -> Value {
    geometry["spatialReference"] = json!({ "wkid": 4326 });
    geometry
}

/// GeoJSON to request geometries. Multipolygons become one polygon each.
fn to_surface_json(value: &GeoValue) -> Result<Vec<Value>> {
    let geometries = match value {
        GeoValue::Point(p) => {
            let (x, y) = xy(p)?;
            vec![json!({ "x": x, "y": y })]
        }
        GeoValue::MultiPoint(points) => vec![json!({ "points": points })],
        GeoValue::LineString(line) => vec![json!({ "paths": [line] })],
        GeoValue::MultiLineString(lines) => vec![json!({ "paths": lines })],
        GeoValue::Polygon(rings) => vec![json!({ "rings": rings })],
        GeoValue::MultiPolygon(polygons) => polygons
            .iter()
            .map(|rings| json!({ "rings": rings }))
            .collect(),
        GeoValue::GeometryCollection(_) => bail!("geometry collections are not supported"),
    };
    Ok(geometries.into_iter().map(with_wgs84).collect())
}

fn xy(position: &[f64]) -> Result<(f64, f64)> {
    match position {
        [x, y, ..] => Ok((*x, *y)),
        _ => bail!("position needs at least two coordinates"),
    }
}

/// A returned `[x, y, z]` vertex; a missing or non-numeric z is an error.
fn position(vertex: &Value) -> Result<Vec<f64>> {
    let coords = vertex.as_array().context("vertex is not an array")?;
    let values: Option<Vec<f64>> = coords.iter().take(3).map(Value::as_f64).collect();
    match values {
        Some(v) if v.len() == 3 => Ok(v),
        _ => bail!("vertex has no elevation"),
    }
}

fn positions(list: &Value) -> Result<Vec<Vec<f64>>> {
    list.as_array()
        .context("expected a vertex list")?
        .iter()
        .map(position)
        .collect()
}

fn parts(geometry: &Value, key: &str) -> Result<Vec<Vec<Vec<f64>>>> {
    geometry[key]
        .as_array()
        .with_context(|| format!("result has no {}", key))?
        .iter()
        .map(positions)
        .collect()
}

fn from_surface_json(original: &GeoValue, results: &[Value]) -> Result<GeoValue> {
    let first = results.first().context("empty result")?;
    let value = match original {
        GeoValue::Point(_) => {
            let coords = [&first["x"], &first["y"], &first["z"]]
                .iter()
                .map(|v| v.as_f64())
                .collect::<Option<Vec<f64>>>()
                .context("point has no elevation")?;
            GeoValue::Point(coords)
        }
        GeoValue::MultiPoint(_) => GeoValue::MultiPoint(positions(&first["points"])?),
        GeoValue::LineString(_) => {
            let mut paths = parts(first, "paths")?;
            if paths.len() != 1 {
                bail!("expected a single path, got {}", paths.len());
            }
            GeoValue::LineString(paths.remove(0))
        }
        GeoValue::MultiLineString(_) => GeoValue::MultiLineString(parts(first, "paths")?),
        GeoValue::Polygon(_) => GeoValue::Polygon(parts(first, "rings")?),
        GeoValue::MultiPolygon(_) => GeoValue::MultiPolygon(
            results
                .iter()
                .map(|r| parts(r, "rings"))
                .collect::<Result<_>>()?,
        ),
        GeoValue::GeometryCollection(_) => bail!("geometry collections are not supported"),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_surface_json() {
        let line = GeoValue::LineString(vec![vec![7.0, 46.0], vec![7.1, 46.1]]);
        let requests = to_surface_json(&line).unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0]["paths"], json!([[[7.0, 46.0], [7.1, 46.1]]]));
        assert_eq!(requests[0]["spatialReference"]["wkid"], 4326);

        let polygons = GeoValue::MultiPolygon(vec![
            vec![vec![vec![0.0, 0.0], vec![1.0, 0.0], vec![0.0, 1.0], vec![0.0, 0.0]]],
            vec![vec![vec![2.0, 2.0], vec![3.0, 2.0], vec![2.0, 3.0], vec![2.0, 2.0]]],
        ]);
        assert_eq!(to_surface_json(&polygons).unwrap().len(), 2);
    }

    #[test]
    fn test_from_surface_json_point() {
        let original = GeoValue::Point(vec![7.5, 46.5]);
        let result = json!({"x": 7.5, "y": 46.5, "z": 600.0});
        match from_surface_json(&original, &[result]).unwrap() {
            GeoValue::Point(coords) => assert_eq!(coords, vec![7.5, 46.5, 600.0]),
            other => panic!("unexpected geometry {:?}", other),
        }
    }

    #[test]
    fn test_from_surface_json_rejects_void() {
        let original = GeoValue::Point(vec![7.5, 46.5]);
        let result = json!({"x": 7.5, "y": 46.5, "z": "NaN"});
        assert!(from_surface_json(&original, &[result]).is_err());
    }

    #[test]
    fn test_from_surface_json_line() {
        let original = GeoValue::LineString(vec![vec![0.0, 0.0], vec![1.0, 0.0]]);
        let result = json!({"hasZ": true, "paths": [[[0.0, 0.0, 5.0], [0.5, 0.0, 6.0], [1.0, 0.0, 7.0]]]});
        match from_surface_json(&original, &[result]).unwrap() {
            GeoValue::LineString(coords) => {
                assert_eq!(coords.len(), 3);
                assert_eq!(coords[1], vec![0.5, 0.0, 6.0]);
            }
            other => panic!("unexpected geometry {:?}", other),
        }
    }
}
